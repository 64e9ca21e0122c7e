//! Transit-key engine: encryption as a service
//!
//! Named, team-owned keys with versioned material. Callers never see key
//! bytes: they submit plaintext or envelopes and get envelopes back. Each
//! envelope self-identifies the key version that sealed it
//! (`<name>:v<version>`), and decryption enforces the key's minimum
//! decryption version so old ciphertexts can be retired by policy.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use codeops_crypto::engine::extract_key_id;
use codeops_crypto::EncryptionEngine;

use crate::audit::{ops, AuditSink};
use crate::context::OperationContext;
use crate::error::{Result, VaultError};
use crate::seal::SealService;
use crate::store::TransitKeyRepository;
use crate::types::TransitKey;

const TRANSIT_ALGORITHM: &str = "aes256-gcm";

/// One version's key material, stored (encrypted) as a JSON array.
#[derive(Debug, Serialize, Deserialize)]
struct MaterialEntry {
    version: i32,
    key: String,
}

/// Result of a transit encryption.
#[derive(Debug, Clone, Serialize)]
pub struct TransitCiphertext {
    pub key_name: String,
    pub key_version: i32,
    pub ciphertext: String,
}

/// A generated data key: plaintext (base64) plus transit ciphertext.
#[derive(Debug, Clone, Serialize)]
pub struct TransitDataKey {
    pub plaintext: String,
    pub ciphertext: TransitCiphertext,
}

/// Metadata patch for a transit key. `None` means "no change".
#[derive(Debug, Clone, Default)]
pub struct UpdateTransitKeyRequest {
    pub description: Option<String>,
    pub min_decryption_version: Option<i32>,
    pub is_deletable: Option<bool>,
    pub is_exportable: Option<bool>,
    pub active: Option<bool>,
}

pub struct TransitService {
    repo: Arc<dyn TransitKeyRepository>,
    engine: Arc<EncryptionEngine>,
    seal: Arc<SealService>,
    audit: AuditSink,
}

impl TransitService {
    pub fn new(
        repo: Arc<dyn TransitKeyRepository>,
        engine: Arc<EncryptionEngine>,
        seal: Arc<SealService>,
        audit: AuditSink,
    ) -> Self {
        Self {
            repo,
            engine,
            seal,
            audit,
        }
    }

    pub async fn create_key(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        name: &str,
        description: Option<String>,
        is_exportable: bool,
    ) -> Result<TransitKey> {
        self.seal.require_unsealed()?;
        if name.trim().is_empty() {
            return Err(VaultError::InvalidInput("key name must not be empty".into()));
        }
        if name.contains(':') {
            return Err(VaultError::InvalidInput(
                "key name must not contain ':'".into(),
            ));
        }

        let material = vec![MaterialEntry {
            version: 1,
            key: BASE64.encode(*self.engine.generate_data_key()),
        }];
        let encrypted_material = self.encrypt_material(&material)?;

        let now = chrono::Utc::now();
        let key = TransitKey {
            id: Uuid::new_v4(),
            team_id,
            name: name.to_string(),
            description,
            current_version: 1,
            min_decryption_version: 1,
            encrypted_material,
            algorithm: TRANSIT_ALGORITHM.to_string(),
            is_deletable: false,
            is_exportable,
            active: true,
            created_at: now,
            updated_at: now,
            row_version: 0,
        };

        let key = self.repo.insert_key(key).await?;
        self.audit.log_success(
            ctx,
            ops::TRANSIT_CREATE,
            None,
            "transit-key",
            Some(key.id.to_string()),
            Some(serde_json::json!({ "name": key.name })),
        );
        info!(key = %key.name, "transit key created");
        Ok(key)
    }

    /// Append a fresh key version and make it current. Older versions stay
    /// decryptable while they satisfy the minimum decryption version.
    pub async fn rotate_key(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        name: &str,
    ) -> Result<TransitKey> {
        self.seal.require_unsealed()?;
        let mut key = self.owned_key(team_id, name).await?;

        let mut material = self.decrypt_material(&key.encrypted_material)?;
        let next_version = key.current_version + 1;
        material.push(MaterialEntry {
            version: next_version,
            key: BASE64.encode(*self.engine.generate_data_key()),
        });
        key.encrypted_material = self.encrypt_material(&material)?;
        key.current_version = next_version;

        let key = self.repo.save_key(key).await?;
        self.audit.log_success(
            ctx,
            ops::TRANSIT_ROTATE,
            None,
            "transit-key",
            Some(key.id.to_string()),
            Some(serde_json::json!({ "name": key.name, "version": key.current_version })),
        );
        Ok(key)
    }

    pub async fn encrypt(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        name: &str,
        plaintext: &[u8],
    ) -> Result<TransitCiphertext> {
        self.seal.require_unsealed()?;
        let key = self.owned_key(team_id, name).await?;
        if !key.active {
            return Err(VaultError::InvalidInput(format!("key {name} is not active")));
        }

        let material = self.decrypt_material(&key.encrypted_material)?;
        let kek = self.material_version(&material, key.current_version)?;
        let key_id = format!("{}:v{}", key.name, key.current_version);
        let ciphertext = self.engine.encrypt_with_key(plaintext, &key_id, &kek)?;

        self.audit.log_success(
            ctx,
            ops::TRANSIT_ENCRYPT,
            None,
            "transit-key",
            Some(key.id.to_string()),
            Some(serde_json::json!({ "name": key.name, "version": key.current_version })),
        );
        Ok(TransitCiphertext {
            key_name: key.name,
            key_version: key.current_version,
            ciphertext,
        })
    }

    pub async fn decrypt(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        name: &str,
        envelope: &str,
    ) -> Result<Vec<u8>> {
        self.seal.require_unsealed()?;
        let key = self.owned_key(team_id, name).await?;

        let result: Result<Vec<u8>> = async {
            let version = self.envelope_version(&key, envelope)?;
            let material = self.decrypt_material(&key.encrypted_material)?;
            let kek = self.material_version(&material, version)?;
            Ok(self.engine.decrypt_with_key(envelope, &kek)?)
        }
        .await;

        match result {
            Ok(plaintext) => {
                self.audit.log_success(
                    ctx,
                    ops::TRANSIT_DECRYPT,
                    None,
                    "transit-key",
                    Some(key.id.to_string()),
                    Some(serde_json::json!({ "name": key.name })),
                );
                Ok(plaintext)
            }
            Err(err) => {
                self.audit.log_failure(
                    ctx,
                    ops::TRANSIT_DECRYPT,
                    None,
                    "transit-key",
                    Some(key.id.to_string()),
                    &err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Re-seal an envelope under the current key version. Plaintext never
    /// crosses the call boundary.
    pub async fn rewrap(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        name: &str,
        envelope: &str,
    ) -> Result<TransitCiphertext> {
        self.seal.require_unsealed()?;
        let key = self.owned_key(team_id, name).await?;

        let version = self.envelope_version(&key, envelope)?;
        let material = self.decrypt_material(&key.encrypted_material)?;
        let old_kek = self.material_version(&material, version)?;
        let new_kek = self.material_version(&material, key.current_version)?;
        let new_key_id = format!("{}:v{}", key.name, key.current_version);

        let rewrapped = self
            .engine
            .rewrap(envelope, &old_kek, &new_kek, &new_key_id)?;

        self.audit.log_success(
            ctx,
            ops::TRANSIT_ENCRYPT,
            None,
            "transit-key",
            Some(key.id.to_string()),
            Some(serde_json::json!({
                "name": key.name,
                "action": "rewrap",
                "from_version": version,
                "to_version": key.current_version,
            })),
        );
        Ok(TransitCiphertext {
            key_name: key.name,
            key_version: key.current_version,
            ciphertext: rewrapped,
        })
    }

    /// Fresh 32-byte data key, returned in plaintext (base64) and sealed
    /// under this transit key.
    pub async fn generate_data_key(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        name: &str,
    ) -> Result<TransitDataKey> {
        self.seal.require_unsealed()?;
        let plaintext = BASE64.encode(*self.engine.generate_data_key());
        let ciphertext = self.encrypt(ctx, team_id, name, plaintext.as_bytes()).await?;
        Ok(TransitDataKey {
            plaintext,
            ciphertext,
        })
    }

    pub async fn get_key(&self, team_id: Uuid, name: &str) -> Result<TransitKey> {
        self.seal.require_unsealed()?;
        let mut key = self.owned_key(team_id, name).await?;
        key.encrypted_material = String::new();
        Ok(key)
    }

    pub async fn list_keys(&self, team_id: Uuid) -> Result<Vec<TransitKey>> {
        self.seal.require_unsealed()?;
        let mut keys = self.repo.list_keys(team_id).await?;
        for key in &mut keys {
            key.encrypted_material = String::new();
        }
        Ok(keys)
    }

    /// Metadata-only update. Raising the minimum decryption version above
    /// the current version is rejected.
    pub async fn update_key(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        name: &str,
        request: UpdateTransitKeyRequest,
    ) -> Result<TransitKey> {
        self.seal.require_unsealed()?;
        let mut key = self.owned_key(team_id, name).await?;

        if let Some(min) = request.min_decryption_version {
            if min < 1 || min > key.current_version {
                return Err(VaultError::InvalidInput(format!(
                    "min_decryption_version must lie in 1..={}",
                    key.current_version
                )));
            }
            key.min_decryption_version = min;
        }
        if let Some(description) = request.description {
            key.description = Some(description);
        }
        if let Some(deletable) = request.is_deletable {
            key.is_deletable = deletable;
        }
        if let Some(exportable) = request.is_exportable {
            key.is_exportable = exportable;
        }
        if let Some(active) = request.active {
            key.active = active;
        }

        let key = self.repo.save_key(key).await?;
        self.audit.log_success(
            ctx,
            ops::POLICY_UPDATE,
            None,
            "transit-key",
            Some(key.id.to_string()),
            Some(serde_json::json!({ "name": key.name, "action": "update" })),
        );
        Ok(key)
    }

    /// Deletion is opt-in: the key must have been marked deletable first.
    pub async fn delete_key(&self, ctx: &OperationContext, team_id: Uuid, name: &str) -> Result<()> {
        self.seal.require_unsealed()?;
        let key = self.owned_key(team_id, name).await?;
        if !key.is_deletable {
            return Err(VaultError::InvalidInput(format!(
                "key {name} is not marked deletable"
            )));
        }
        self.repo.delete_key(key.id).await?;
        self.audit.log_success(
            ctx,
            ops::DELETE,
            None,
            "transit-key",
            Some(key.id.to_string()),
            Some(serde_json::json!({ "name": name })),
        );
        Ok(())
    }

    async fn owned_key(&self, team_id: Uuid, name: &str) -> Result<TransitKey> {
        self.repo
            .get_key(team_id, name)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("transit key {name}")))
    }

    /// Parse and check the version embedded in an envelope's key id.
    fn envelope_version(&self, key: &TransitKey, envelope: &str) -> Result<i32> {
        let key_id = extract_key_id(envelope)?;
        let (name, version) = key_id.rsplit_once(":v").ok_or_else(|| {
            VaultError::InvalidInput("envelope was not produced by a transit key".into())
        })?;
        if name != key.name {
            return Err(VaultError::InvalidInput(format!(
                "envelope belongs to key {name}, not {}",
                key.name
            )));
        }
        let version: i32 = version
            .parse()
            .map_err(|_| VaultError::InvalidInput("envelope key version is malformed".into()))?;
        if version < key.min_decryption_version {
            return Err(VaultError::InvalidInput(format!(
                "key version {version} is below the minimum decryption version {}",
                key.min_decryption_version
            )));
        }
        if version > key.current_version {
            return Err(VaultError::NotFound(format!(
                "key version {version} does not exist"
            )));
        }
        Ok(version)
    }

    fn encrypt_material(&self, material: &[MaterialEntry]) -> Result<String> {
        let json = serde_json::to_vec(material).map_err(VaultError::internal)?;
        Ok(self.engine.encrypt(&json)?)
    }

    fn decrypt_material(&self, encrypted: &str) -> Result<Vec<MaterialEntry>> {
        let json = self.engine.decrypt(encrypted)?;
        serde_json::from_slice(&json).map_err(VaultError::internal)
    }

    fn material_version(&self, material: &[MaterialEntry], version: i32) -> Result<Vec<u8>> {
        let entry = material
            .iter()
            .find(|m| m.version == version)
            .ok_or_else(|| {
                VaultError::IntegrityFailure(format!("key material for version {version} is missing"))
            })?;
        BASE64
            .decode(&entry.key)
            .map_err(|_| VaultError::IntegrityFailure("key material is corrupt".into()))
    }
}
