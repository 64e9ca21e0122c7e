//! Envelope encryption engine
//!
//! Every stored ciphertext is an *envelope*: the plaintext is sealed with a
//! fresh data-encryption key (DEK) under AES-256-GCM, and the DEK itself is
//! sealed under a key-encryption key (KEK). The envelope records which KEK
//! was used so ciphertexts are self-describing. The byte layout is
//! contractual and consumed bit-exactly:
//!
//! ```text
//! [1B version=1]
//! [4B BE key-id length][key-id UTF-8]
//! [4B BE dek-block length][12B dek IV][AES-GCM(32B DEK) ∥ 16B tag]
//! [12B data IV][AES-GCM(plaintext) ∥ 16B tag]
//! ```
//!
//! The whole sequence is base64-encoded for transport and storage.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::{rngs::OsRng, Rng, RngCore};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};
use crate::kdf;

/// Envelope format version this engine produces and consumes.
pub const ENVELOPE_VERSION: u8 = 1;

/// Key id recorded in envelopes sealed under the default storage KEK.
pub const DEFAULT_KEY_ID: &str = "master-v1";

/// AES-256 key size.
pub const AES_KEY_SIZE: usize = 32;

/// Plaintext ceiling for a single envelope.
pub const MAX_PLAINTEXT_SIZE: usize = 1024 * 1024;

/// Bounds for [`EncryptionEngine::generate_random_string`].
pub const MAX_RANDOM_STRING_LEN: usize = 4096;

const IV_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KDF_INFO_PREFIX: &str = "codeops-vault-";
const STORAGE_PURPOSE: &str = "secret-storage";

const ALPHA_UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHA_LOWER: &str = "abcdefghijklmnopqrstuvwxyz";
const DIGITS: &str = "0123456789";
const HEX_LOWER: &str = "0123456789abcdef";

/// The envelope encryption engine.
///
/// Holds the master keying material and the storage KEK derived from it.
/// Construction fails unless the master key is long enough and an
/// encrypt/decrypt probe round-trips, so a misconfigured process refuses to
/// start instead of producing unreadable ciphertexts.
pub struct EncryptionEngine {
    master: Zeroizing<Vec<u8>>,
    storage_kek: Zeroizing<[u8; 32]>,
}

impl EncryptionEngine {
    pub fn new(master_key: &str) -> Result<Self> {
        let master = Zeroizing::new(master_key.as_bytes().to_vec());
        if master.len() < AES_KEY_SIZE {
            return Err(CryptoError::InvalidInput(format!(
                "master key must be at least {AES_KEY_SIZE} bytes"
            )));
        }

        let mut storage_kek = Zeroizing::new([0u8; 32]);
        let okm = derive_for(&master, STORAGE_PURPOSE)?;
        storage_kek.copy_from_slice(&okm);

        let engine = Self {
            master,
            storage_kek,
        };

        // Refuse to start unless a probe value survives a round trip.
        let probe = b"codeops-vault-startup-probe";
        let envelope = engine.encrypt(probe)?;
        let recovered = engine.decrypt(&envelope)?;
        if recovered.as_slice() != probe {
            return Err(CryptoError::IntegrityFailure(
                "master key self-check round trip failed".into(),
            ));
        }

        Ok(engine)
    }

    /// Derive a purpose-bound 32-byte key from the master keying material.
    pub fn derive_key(&self, purpose: &str) -> Result<Zeroizing<[u8; 32]>> {
        let okm = derive_for(&self.master, purpose)?;
        let mut key = Zeroizing::new([0u8; 32]);
        key.copy_from_slice(&okm);
        Ok(key)
    }

    /// Seal `plaintext` under the storage KEK.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        self.encrypt_with_key(plaintext, DEFAULT_KEY_ID, &*self.storage_kek)
    }

    /// Open an envelope sealed under the storage KEK.
    pub fn decrypt(&self, envelope: &str) -> Result<Vec<u8>> {
        self.decrypt_with_key(envelope, &*self.storage_kek)
    }

    /// Seal `plaintext` under a caller-supplied KEK, recording `key_id` in
    /// the envelope header. Used by the transit engine.
    pub fn encrypt_with_key(&self, plaintext: &[u8], key_id: &str, kek: &[u8]) -> Result<String> {
        if plaintext.is_empty() {
            return Err(CryptoError::InvalidInput("plaintext must not be empty".into()));
        }
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(CryptoError::InvalidInput(format!(
                "plaintext exceeds {MAX_PLAINTEXT_SIZE} bytes"
            )));
        }
        if key_id.is_empty() {
            return Err(CryptoError::InvalidInput("key id must not be empty".into()));
        }
        let kek = check_kek(kek)?;

        let mut dek = Zeroizing::new([0u8; AES_KEY_SIZE]);
        OsRng.fill_bytes(&mut *dek);
        let mut dek_iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut dek_iv);
        let mut data_iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut data_iv);

        let wrapped_dek = aead_seal(&kek, &dek_iv, &*dek)?;
        let ciphertext = aead_seal(&*dek, &data_iv, plaintext)?;

        let key_id_bytes = key_id.as_bytes();
        let dek_block_len = IV_SIZE + wrapped_dek.len();
        let mut raw = Vec::with_capacity(
            1 + 4 + key_id_bytes.len() + 4 + dek_block_len + IV_SIZE + ciphertext.len(),
        );
        raw.push(ENVELOPE_VERSION);
        raw.extend_from_slice(&(key_id_bytes.len() as u32).to_be_bytes());
        raw.extend_from_slice(key_id_bytes);
        raw.extend_from_slice(&(dek_block_len as u32).to_be_bytes());
        raw.extend_from_slice(&dek_iv);
        raw.extend_from_slice(&wrapped_dek);
        raw.extend_from_slice(&data_iv);
        raw.extend_from_slice(&ciphertext);

        Ok(BASE64.encode(raw))
    }

    /// Open an envelope with a caller-supplied KEK.
    pub fn decrypt_with_key(&self, envelope: &str, kek: &[u8]) -> Result<Vec<u8>> {
        let kek = check_kek(kek)?;
        let parsed = parse_envelope(envelope)?;

        let dek_bytes = aead_open(&kek, &parsed.dek_iv, &parsed.wrapped_dek)?;
        let dek = Zeroizing::new(dek_bytes);
        if dek.len() != AES_KEY_SIZE {
            return Err(CryptoError::IntegrityFailure(
                "unwrapped data key has unexpected size".into(),
            ));
        }

        aead_open(&dek, &parsed.data_iv, &parsed.ciphertext)
    }

    /// Re-seal an envelope under a new KEK without surfacing the plaintext.
    pub fn rewrap(
        &self,
        envelope: &str,
        old_kek: &[u8],
        new_kek: &[u8],
        new_key_id: &str,
    ) -> Result<String> {
        let plaintext = Zeroizing::new(self.decrypt_with_key(envelope, old_kek)?);
        self.encrypt_with_key(&plaintext, new_key_id, new_kek)
    }

    /// Generate a fresh 32-byte data key.
    pub fn generate_data_key(&self) -> Zeroizing<[u8; AES_KEY_SIZE]> {
        let mut key = Zeroizing::new([0u8; AES_KEY_SIZE]);
        OsRng.fill_bytes(&mut *key);
        key
    }

    /// Generate a data key and return it both as base64 plaintext and
    /// sealed in a storage envelope.
    pub fn generate_and_wrap_data_key(&self) -> Result<(String, String)> {
        let key = self.generate_data_key();
        let plaintext = BASE64.encode(&*key);
        let wrapped = self.encrypt(&*key)?;
        Ok((plaintext, wrapped))
    }

    /// Draw a uniform random string over a named alphabet.
    ///
    /// Recognized charsets: `alphanumeric`, `alpha`, `numeric`, `hex`,
    /// `ascii-printable`. Any other value is treated as the literal
    /// alphabet to sample from.
    pub fn generate_random_string(&self, length: usize, charset: &str) -> Result<String> {
        if length == 0 || length > MAX_RANDOM_STRING_LEN {
            return Err(CryptoError::InvalidInput(format!(
                "length must lie in 1..={MAX_RANDOM_STRING_LEN}"
            )));
        }

        let alphabet: Vec<char> = match charset {
            "alphanumeric" => format!("{ALPHA_UPPER}{ALPHA_LOWER}{DIGITS}").chars().collect(),
            "alpha" => format!("{ALPHA_UPPER}{ALPHA_LOWER}").chars().collect(),
            "numeric" => DIGITS.chars().collect(),
            "hex" => HEX_LOWER.chars().collect(),
            "ascii-printable" => (0x20u8..=0x7E).map(char::from).collect(),
            literal => literal.chars().collect(),
        };
        if alphabet.is_empty() {
            return Err(CryptoError::InvalidInput("charset must not be empty".into()));
        }

        let mut rng = OsRng;
        let mut out = String::with_capacity(length);
        for _ in 0..length {
            out.push(alphabet[rng.gen_range(0..alphabet.len())]);
        }
        Ok(out)
    }

    /// Lowercase-hex SHA-256 digest.
    pub fn hash(&self, data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }
}

/// Read the key id out of an envelope header. No cryptography is performed.
pub fn extract_key_id(envelope: &str) -> Result<String> {
    let raw = decode_envelope(envelope)?;
    let (key_id, _) = read_header(&raw)?;
    Ok(key_id)
}

fn derive_for(master: &[u8], purpose: &str) -> Result<Vec<u8>> {
    if purpose.is_empty() {
        return Err(CryptoError::InvalidInput("purpose must not be empty".into()));
    }
    let info = format!("{KDF_INFO_PREFIX}{purpose}");
    kdf::derive(master, None, info.as_bytes(), AES_KEY_SIZE)
}

fn check_kek(kek: &[u8]) -> Result<[u8; AES_KEY_SIZE]> {
    <[u8; AES_KEY_SIZE]>::try_from(kek)
        .map_err(|_| CryptoError::InvalidInput(format!("KEK must be exactly {AES_KEY_SIZE} bytes")))
}

fn aead_seal(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidInput("AEAD key has invalid size".into()))?;
    cipher
        .encrypt(Nonce::from_slice(iv), plaintext)
        .map_err(|_| CryptoError::IntegrityFailure("AEAD seal failed".into()))
}

fn aead_open(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidInput("AEAD key has invalid size".into()))?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::IntegrityFailure("envelope authentication failed".into()))
}

struct ParsedEnvelope {
    dek_iv: Vec<u8>,
    wrapped_dek: Vec<u8>,
    data_iv: Vec<u8>,
    ciphertext: Vec<u8>,
}

fn decode_envelope(envelope: &str) -> Result<Vec<u8>> {
    if envelope.trim().is_empty() {
        return Err(CryptoError::InvalidInput("envelope must not be empty".into()));
    }
    BASE64
        .decode(envelope.trim())
        .map_err(|_| CryptoError::InvalidInput("envelope is not valid base64".into()))
}

/// Parse the fixed header, returning the key id and the offset just past it.
fn read_header(raw: &[u8]) -> Result<(String, usize)> {
    if raw.len() < 5 {
        return Err(CryptoError::IntegrityFailure("envelope truncated".into()));
    }
    if raw[0] != ENVELOPE_VERSION {
        return Err(CryptoError::VersionMismatch(raw[0]));
    }
    let key_id_len = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]) as usize;
    let key_id_end = 5usize
        .checked_add(key_id_len)
        .ok_or_else(|| CryptoError::IntegrityFailure("envelope truncated".into()))?;
    if key_id_end > raw.len() {
        return Err(CryptoError::IntegrityFailure("envelope truncated".into()));
    }
    let key_id = std::str::from_utf8(&raw[5..key_id_end])
        .map_err(|_| CryptoError::InvalidInput("key id is not valid UTF-8".into()))?
        .to_string();
    Ok((key_id, key_id_end))
}

fn parse_envelope(envelope: &str) -> Result<ParsedEnvelope> {
    let raw = decode_envelope(envelope)?;
    let (_, mut offset) = read_header(&raw)?;

    if offset + 4 > raw.len() {
        return Err(CryptoError::IntegrityFailure("envelope truncated".into()));
    }
    let dek_block_len = u32::from_be_bytes([
        raw[offset],
        raw[offset + 1],
        raw[offset + 2],
        raw[offset + 3],
    ]) as usize;
    offset += 4;

    let dek_block_end = offset
        .checked_add(dek_block_len)
        .ok_or_else(|| CryptoError::IntegrityFailure("envelope truncated".into()))?;
    if dek_block_len < IV_SIZE + TAG_SIZE || dek_block_end > raw.len() {
        return Err(CryptoError::IntegrityFailure("envelope truncated".into()));
    }
    let dek_iv = raw[offset..offset + IV_SIZE].to_vec();
    let wrapped_dek = raw[offset + IV_SIZE..dek_block_end].to_vec();
    offset = dek_block_end;

    if offset + IV_SIZE + TAG_SIZE > raw.len() {
        return Err(CryptoError::IntegrityFailure("envelope truncated".into()));
    }
    let data_iv = raw[offset..offset + IV_SIZE].to_vec();
    let ciphertext = raw[offset + IV_SIZE..].to_vec();

    Ok(ParsedEnvelope {
        dek_iv,
        wrapped_dek,
        data_iv,
        ciphertext,
    })
}
