//! Integration tests across the crypto core: envelope + shamir + kdf
//! working together the way the vault uses them.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use codeops_crypto::engine::{extract_key_id, EncryptionEngine};
use codeops_crypto::{shamir, CryptoError};

const MASTER: &str = "0123456789abcdef0123456789abcdef";

#[test]
fn master_key_survives_share_round_trip() {
    // Split the master key, reconstruct from an arbitrary threshold subset,
    // and verify the reconstructed bytes still drive the same KEK.
    let shares = shamir::split(MASTER.as_bytes(), 5, 3).unwrap();

    let encoded: Vec<String> = shares.iter().map(|s| shamir::encode_share(s)).collect();
    let decoded: Vec<Vec<u8>> = encoded
        .iter()
        .map(|s| shamir::decode_share(s).unwrap())
        .collect();

    let subset = vec![decoded[1].clone(), decoded[3].clone(), decoded[4].clone()];
    let reconstructed = shamir::combine(&subset).unwrap();
    assert_eq!(reconstructed, MASTER.as_bytes());

    let original = EncryptionEngine::new(MASTER).unwrap();
    let rebuilt = EncryptionEngine::new(std::str::from_utf8(&reconstructed).unwrap()).unwrap();

    let envelope = original.encrypt(b"cross-engine payload").unwrap();
    assert_eq!(rebuilt.decrypt(&envelope).unwrap(), b"cross-engine payload");
}

#[test]
fn transit_style_rewrap_chain() {
    let engine = EncryptionEngine::new(MASTER).unwrap();

    let v1 = *engine.generate_data_key();
    let v2 = *engine.generate_data_key();

    let envelope = engine.encrypt_with_key(b"api credential", "orders:v1", &v1).unwrap();
    assert_eq!(extract_key_id(&envelope).unwrap(), "orders:v1");

    let rewrapped = engine.rewrap(&envelope, &v1, &v2, "orders:v2").unwrap();
    assert_eq!(extract_key_id(&rewrapped).unwrap(), "orders:v2");
    assert_eq!(
        engine.decrypt_with_key(&rewrapped, &v2).unwrap(),
        b"api credential"
    );
}

#[test]
fn foreign_share_corrupts_reconstruction() {
    let shares_a = shamir::split(MASTER.as_bytes(), 5, 3).unwrap();
    let shares_b = shamir::split(b"ffffffffffffffffffffffffffffffff", 5, 3).unwrap();

    let mixed = vec![
        shares_a[0].clone(),
        shares_a[1].clone(),
        // index 3 from a different split; indices stay distinct so combine
        // runs, but the result must not match the original secret
        shares_b[2].clone(),
    ];
    let reconstructed = shamir::combine(&mixed).unwrap();
    assert_ne!(reconstructed, MASTER.as_bytes());
}

#[test]
fn envelope_header_survives_base64_transport() {
    let engine = EncryptionEngine::new(MASTER).unwrap();
    let envelope = engine.encrypt(b"payload").unwrap();

    // Transport is plain base64; decoding and re-encoding is lossless.
    let raw = BASE64.decode(&envelope).unwrap();
    assert_eq!(BASE64.encode(&raw), envelope);
    assert_eq!(extract_key_id(&envelope).unwrap(), "master-v1");
}

#[test]
fn wrong_version_reports_the_version_it_saw() {
    let engine = EncryptionEngine::new(MASTER).unwrap();
    let mut raw = BASE64.decode(engine.encrypt(b"x").unwrap()).unwrap();
    raw[0] = 9;
    match engine.decrypt(&BASE64.encode(&raw)) {
        Err(CryptoError::VersionMismatch(9)) => {}
        other => panic!("expected version mismatch, got {other:?}"),
    }
}
