//! Secret store
//!
//! Secrets are team-owned entities at hierarchical paths with immutable,
//! envelope-encrypted versions. Every operation passes the seal gate first
//! and reports to the audit sink. Version destruction is in-place and
//! terminal; retention trims old versions by count and age but never
//! touches the current one.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use codeops_crypto::EncryptionEngine;

use crate::audit::{ops, AuditSink};
use crate::context::OperationContext;
use crate::error::{Result, VaultError};
use crate::seal::SealService;
use crate::store::{Page, SecretListFilter, SecretRepository};
use crate::types::{
    Secret, SecretMetadataEntry, SecretType, SecretVersion, MAX_SECRET_PATH_LEN,
};

#[derive(Debug, Clone)]
pub struct CreateSecretRequest {
    pub path: String,
    pub name: String,
    pub description: Option<String>,
    pub secret_type: SecretType,
    pub value: Option<String>,
    pub metadata: Option<Vec<(String, String)>>,
    pub max_versions: Option<i32>,
    pub retention_days: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub external_reference: Option<String>,
}

/// Patch semantics: `None` means "no change".
#[derive(Debug, Clone, Default)]
pub struct UpdateSecretRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub value: Option<String>,
    pub change_description: Option<String>,
    pub max_versions: Option<i32>,
    pub retention_days: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub external_reference: Option<String>,
}

/// A decrypted secret value. The only place plaintext leaves the service.
#[derive(Debug, Clone, Serialize)]
pub struct SecretValue {
    pub secret_id: Uuid,
    pub path: String,
    pub version: i32,
    pub value: String,
}

pub struct SecretService {
    repo: Arc<dyn SecretRepository>,
    engine: Arc<EncryptionEngine>,
    seal: Arc<SealService>,
    audit: AuditSink,
}

impl SecretService {
    pub fn new(
        repo: Arc<dyn SecretRepository>,
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

    pub async fn create(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        request: CreateSecretRequest,
    ) -> Result<Secret> {
        self.seal.require_unsealed()?;
        validate_path(&request.path)?;
        if request.name.trim().is_empty() {
            return Err(VaultError::InvalidInput("secret name must not be empty".into()));
        }
        if let Some(max) = request.max_versions {
            if max < 1 {
                return Err(VaultError::InvalidInput("max_versions must be at least 1".into()));
            }
        }
        if let Some(days) = request.retention_days {
            if days < 1 {
                return Err(VaultError::InvalidInput("retention_days must be at least 1".into()));
            }
        }

        let CreateSecretRequest {
            path,
            name,
            description,
            secret_type,
            value,
            metadata,
            max_versions,
            retention_days,
            expires_at,
            owner,
            external_reference,
        } = request;

        let now = Utc::now();
        let secret = Secret {
            id: Uuid::new_v4(),
            team_id,
            path: path.clone(),
            name,
            description,
            secret_type,
            current_version: 1,
            max_versions,
            retention_days,
            expires_at,
            last_accessed_at: None,
            last_rotated_at: None,
            owner,
            external_reference,
            active: true,
            created_at: now,
            updated_at: now,
            row_version: 0,
        };

        let result: Result<Secret> = async {
            let secret = self.repo.insert_secret(secret).await?;
            if let Some(value) = &value {
                let ciphertext = self.engine.encrypt(value.as_bytes())?;
                self.repo
                    .allocate_version(
                        secret.id,
                        ciphertext,
                        codeops_crypto::DEFAULT_KEY_ID.to_string(),
                        Some("initial value".to_string()),
                        ctx.actor.clone(),
                    )
                    .await?;
            }
            if let Some(pairs) = metadata {
                self.repo.replace_metadata(secret.id, pairs).await?;
            }
            // Re-read so version allocation is reflected.
            self.repo
                .get_secret(secret.id)
                .await?
                .ok_or_else(|| VaultError::NotFound(format!("secret {}", secret.id)))
        }
        .await;

        match result {
            Ok(secret) => {
                self.audit.log_success(
                    ctx,
                    ops::WRITE,
                    Some(&secret.path),
                    "secret",
                    Some(secret.id.to_string()),
                    Some(serde_json::json!({ "action": "create" })),
                );
                Ok(secret)
            }
            Err(err) => {
                self.audit.log_failure(ctx, ops::WRITE, Some(&path), "secret", None, &err.to_string());
                Err(err)
            }
        }
    }

    pub async fn get(&self, team_id: Uuid, secret_id: Uuid) -> Result<Secret> {
        self.seal.require_unsealed()?;
        self.owned_secret(team_id, secret_id).await
    }

    pub async fn get_by_path(&self, team_id: Uuid, path: &str) -> Result<Secret> {
        self.seal.require_unsealed()?;
        self.repo
            .get_secret_by_path(team_id, path)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("secret at {path}")))
    }

    /// Decrypt the current version, or a named one. Destroyed versions are
    /// unreadable. Bumps the secret's last-accessed timestamp.
    pub async fn read_value(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        secret_id: Uuid,
        version: Option<i32>,
    ) -> Result<SecretValue> {
        self.seal.require_unsealed()?;
        let mut secret = self.owned_secret(team_id, secret_id).await?;
        let version_number = version.unwrap_or(secret.current_version);

        let result: Result<SecretValue> = async {
            let record = self
                .repo
                .get_version(secret_id, version_number)
                .await?
                .ok_or_else(|| {
                    VaultError::NotFound(format!("version {version_number} of secret {secret_id}"))
                })?;
            if record.destroyed {
                return Err(VaultError::InvalidInput(format!(
                    "version {version_number} has been destroyed"
                )));
            }
            let plaintext = self.engine.decrypt(&record.ciphertext)?;
            let value = String::from_utf8(plaintext)
                .map_err(|_| VaultError::IntegrityFailure("stored value is not UTF-8".into()))?;
            Ok(SecretValue {
                secret_id,
                path: secret.path.clone(),
                version: version_number,
                value,
            })
        }
        .await;

        match result {
            Ok(value) => {
                secret.last_accessed_at = Some(Utc::now());
                self.repo.save_secret(secret.clone()).await?;
                self.audit.log_success(
                    ctx,
                    ops::READ,
                    Some(&secret.path),
                    "secret",
                    Some(secret_id.to_string()),
                    Some(serde_json::json!({ "version": version_number })),
                );
                Ok(value)
            }
            Err(err) => {
                self.audit.log_failure(
                    ctx,
                    ops::READ,
                    Some(&secret.path),
                    "secret",
                    Some(secret_id.to_string()),
                    &err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Patch fields; a non-null value allocates the next version and then
    /// applies retention.
    pub async fn update(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        secret_id: Uuid,
        request: UpdateSecretRequest,
    ) -> Result<Secret> {
        self.seal.require_unsealed()?;
        let mut secret = self.owned_secret(team_id, secret_id).await?;

        let result: Result<Secret> = async {
            if let Some(name) = request.name {
                secret.name = name;
            }
            if let Some(description) = request.description {
                secret.description = Some(description);
            }
            if let Some(max) = request.max_versions {
                if max < 1 {
                    return Err(VaultError::InvalidInput("max_versions must be at least 1".into()));
                }
                secret.max_versions = Some(max);
            }
            if let Some(days) = request.retention_days {
                if days < 1 {
                    return Err(VaultError::InvalidInput("retention_days must be at least 1".into()));
                }
                secret.retention_days = Some(days);
            }
            if let Some(expires_at) = request.expires_at {
                secret.expires_at = Some(expires_at);
            }
            if let Some(owner) = request.owner {
                secret.owner = Some(owner);
            }
            if let Some(reference) = request.external_reference {
                secret.external_reference = Some(reference);
            }
            let secret = self.repo.save_secret(secret).await?;

            if let Some(value) = &request.value {
                let ciphertext = self.engine.encrypt(value.as_bytes())?;
                self.repo
                    .allocate_version(
                        secret_id,
                        ciphertext,
                        codeops_crypto::DEFAULT_KEY_ID.to_string(),
                        request.change_description.clone(),
                        ctx.actor.clone(),
                    )
                    .await?;
                self.apply_retention(secret_id).await?;
            }

            self.repo
                .get_secret(secret_id)
                .await?
                .ok_or_else(|| VaultError::NotFound(format!("secret {secret_id}")))
        }
        .await;

        match result {
            Ok(secret) => {
                self.audit.log_success(
                    ctx,
                    ops::WRITE,
                    Some(&secret.path),
                    "secret",
                    Some(secret_id.to_string()),
                    Some(serde_json::json!({ "action": "update" })),
                );
                Ok(secret)
            }
            Err(err) => {
                self.audit.log_failure(
                    ctx,
                    ops::WRITE,
                    None,
                    "secret",
                    Some(secret_id.to_string()),
                    &err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Fetch by id without team scoping. For internal callers that act on
    /// behalf of the system, like the rotation scheduler.
    pub(crate) async fn get_unchecked(&self, secret_id: Uuid) -> Result<Secret> {
        self.repo
            .get_secret(secret_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("secret {secret_id}")))
    }

    /// Record a rotation outcome on the secret itself.
    pub(crate) async fn mark_rotated(&self, secret_id: Uuid) -> Result<Secret> {
        let mut secret = self
            .repo
            .get_secret(secret_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("secret {secret_id}")))?;
        secret.last_rotated_at = Some(Utc::now());
        self.repo.save_secret(secret).await
    }

    pub async fn soft_delete(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        secret_id: Uuid,
    ) -> Result<Secret> {
        self.seal.require_unsealed()?;
        let mut secret = self.owned_secret(team_id, secret_id).await?;
        secret.active = false;
        let secret = self.repo.save_secret(secret).await?;
        self.audit.log_success(
            ctx,
            ops::DELETE,
            Some(&secret.path),
            "secret",
            Some(secret_id.to_string()),
            Some(serde_json::json!({ "soft": true })),
        );
        Ok(secret)
    }

    /// Remove the secret with its versions, metadata and rotation policy.
    /// Rotation history and leases keep their plain-id references.
    pub async fn hard_delete(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        secret_id: Uuid,
    ) -> Result<()> {
        self.seal.require_unsealed()?;
        let secret = self.owned_secret(team_id, secret_id).await?;
        self.repo.delete_secret(secret_id).await?;
        self.audit.log_success(
            ctx,
            ops::DELETE,
            Some(&secret.path),
            "secret",
            Some(secret_id.to_string()),
            Some(serde_json::json!({ "soft": false })),
        );
        Ok(())
    }

    /// Destroy one version in place. The current version is protected.
    pub async fn destroy_version(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        secret_id: Uuid,
        version_number: i32,
    ) -> Result<SecretVersion> {
        self.seal.require_unsealed()?;
        let secret = self.owned_secret(team_id, secret_id).await?;

        let result: Result<SecretVersion> = async {
            if version_number == secret.current_version {
                return Err(VaultError::InvalidInput(
                    "the current version cannot be destroyed".into(),
                ));
            }
            self.repo
                .get_version(secret_id, version_number)
                .await?
                .ok_or_else(|| {
                    VaultError::NotFound(format!("version {version_number} of secret {secret_id}"))
                })?;
            self.repo.destroy_version(secret_id, version_number).await
        }
        .await;

        match result {
            Ok(version) => {
                self.audit.log_success(
                    ctx,
                    ops::DESTROY,
                    Some(&secret.path),
                    "secret-version",
                    Some(secret_id.to_string()),
                    Some(serde_json::json!({ "version": version_number })),
                );
                Ok(version)
            }
            Err(err) => {
                self.audit.log_failure(
                    ctx,
                    ops::DESTROY,
                    Some(&secret.path),
                    "secret-version",
                    Some(secret_id.to_string()),
                    &err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Destroy versions beyond `max_versions` (oldest first) and versions
    /// older than `retention_days`. The current version is always excluded.
    pub async fn apply_retention(&self, secret_id: Uuid) -> Result<Vec<i32>> {
        let secret = self
            .repo
            .get_secret(secret_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("secret {secret_id}")))?;

        let versions = self.repo.list_versions(secret_id).await?;
        let mut live: Vec<&SecretVersion> = versions
            .iter()
            .filter(|v| !v.destroyed && v.version_number != secret.current_version)
            .collect();
        live.sort_by_key(|v| v.version_number);

        let mut eligible: Vec<i32> = Vec::new();

        if let Some(max) = secret.max_versions {
            // Count includes the current version.
            let live_total = versions.iter().filter(|v| !v.destroyed).count();
            let excess = live_total.saturating_sub(max as usize);
            for version in live.iter().take(excess) {
                eligible.push(version.version_number);
            }
        }

        if let Some(days) = secret.retention_days {
            let cutoff = Utc::now() - Duration::days(days as i64);
            for version in &live {
                if version.created_at < cutoff && !eligible.contains(&version.version_number) {
                    eligible.push(version.version_number);
                }
            }
        }

        for &number in &eligible {
            self.repo.destroy_version(secret_id, number).await?;
            debug!(secret_id = %secret_id, version = number, "version destroyed by retention");
        }

        Ok(eligible)
    }

    pub async fn list(
        &self,
        team_id: Uuid,
        filter: &SecretListFilter,
        page: Page,
    ) -> Result<Vec<Secret>> {
        self.seal.require_unsealed()?;
        self.repo.list_secrets(team_id, filter, page).await
    }

    pub async fn search(&self, team_id: Uuid, query: &str, page: Page) -> Result<Vec<Secret>> {
        self.seal.require_unsealed()?;
        self.repo.search_secrets(team_id, query, page).await
    }

    pub async fn paths(&self, team_id: Uuid, prefix: &str) -> Result<Vec<String>> {
        self.seal.require_unsealed()?;
        self.repo.secret_paths(team_id, prefix).await
    }

    pub async fn list_versions(&self, team_id: Uuid, secret_id: Uuid) -> Result<Vec<SecretVersion>> {
        self.seal.require_unsealed()?;
        self.owned_secret(team_id, secret_id).await?;
        self.repo.list_versions(secret_id).await
    }

    /// Active secrets expiring within the next `hours`.
    pub async fn expiring(&self, team_id: Uuid, hours: i64) -> Result<Vec<Secret>> {
        self.seal.require_unsealed()?;
        let deadline = Utc::now() + Duration::hours(hours);
        self.repo.expiring_secrets(team_id, deadline).await
    }

    pub async fn set_metadata(
        &self,
        team_id: Uuid,
        secret_id: Uuid,
        key: &str,
        value: &str,
    ) -> Result<SecretMetadataEntry> {
        self.seal.require_unsealed()?;
        self.owned_secret(team_id, secret_id).await?;
        self.repo.set_metadata(secret_id, key, value).await
    }

    pub async fn remove_metadata(&self, team_id: Uuid, secret_id: Uuid, key: &str) -> Result<()> {
        self.seal.require_unsealed()?;
        self.owned_secret(team_id, secret_id).await?;
        self.repo.remove_metadata(secret_id, key).await
    }

    pub async fn get_metadata(
        &self,
        team_id: Uuid,
        secret_id: Uuid,
    ) -> Result<Vec<SecretMetadataEntry>> {
        self.seal.require_unsealed()?;
        self.owned_secret(team_id, secret_id).await?;
        self.repo.get_metadata(secret_id).await
    }

    pub async fn replace_metadata(
        &self,
        team_id: Uuid,
        secret_id: Uuid,
        pairs: Vec<(String, String)>,
    ) -> Result<Vec<SecretMetadataEntry>> {
        self.seal.require_unsealed()?;
        self.owned_secret(team_id, secret_id).await?;
        self.repo.replace_metadata(secret_id, pairs).await
    }

    async fn owned_secret(&self, team_id: Uuid, secret_id: Uuid) -> Result<Secret> {
        let secret = self
            .repo
            .get_secret(secret_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("secret {secret_id}")))?;
        if secret.team_id != team_id {
            // Cross-team ids are indistinguishable from unknown ones.
            return Err(VaultError::NotFound(format!("secret {secret_id}")));
        }
        Ok(secret)
    }
}

fn validate_path(path: &str) -> Result<()> {
    if !path.starts_with('/') {
        return Err(VaultError::InvalidInput("path must start with '/'".into()));
    }
    if path.len() > MAX_SECRET_PATH_LEN {
        return Err(VaultError::InvalidInput(format!(
            "path exceeds {MAX_SECRET_PATH_LEN} characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const MASTER: &str = "0123456789abcdef0123456789abcdef";

    fn service() -> (SecretService, Arc<MemoryStore>, Uuid, OperationContext) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(EncryptionEngine::new(MASTER).unwrap());
        let seal = Arc::new(SealService::new(MASTER, 5, 3, true).unwrap());
        let audit = AuditSink::new(store.clone());
        let service = SecretService::new(store.clone(), engine, seal, audit);
        let team = Uuid::new_v4();
        let ctx = OperationContext::for_user("tester", team);
        (service, store, team, ctx)
    }

    fn create_request(path: &str, value: Option<&str>) -> CreateSecretRequest {
        CreateSecretRequest {
            path: path.to_string(),
            name: path.rsplit('/').next().unwrap_or(path).to_string(),
            description: None,
            secret_type: SecretType::Static,
            value: value.map(str::to_string),
            metadata: None,
            max_versions: None,
            retention_days: None,
            expires_at: None,
            owner: None,
            external_reference: None,
        }
    }

    fn value_update(value: &str) -> UpdateSecretRequest {
        UpdateSecretRequest {
            value: Some(value.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_read_round_trips() {
        let (service, _store, team, ctx) = service();
        let secret = service
            .create(&ctx, team, create_request("/db/password", Some("hunter2")))
            .await
            .unwrap();
        assert_eq!(secret.current_version, 1);

        let value = service.read_value(&ctx, team, secret.id, None).await.unwrap();
        assert_eq!(value.value, "hunter2");
        assert_eq!(value.version, 1);

        let stored = service.get(team, secret.id).await.unwrap();
        assert!(stored.last_accessed_at.is_some());
    }

    #[tokio::test]
    async fn duplicate_paths_fail_and_bad_paths_are_rejected() {
        let (service, _store, team, ctx) = service();
        service
            .create(&ctx, team, create_request("/db/password", None))
            .await
            .unwrap();

        let err = service
            .create(&ctx, team, create_request("/db/password", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-input");

        let err = service
            .create(&ctx, team, create_request("no-leading-slash", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-input");

        let long = format!("/{}", "x".repeat(MAX_SECRET_PATH_LEN));
        let err = service
            .create(&ctx, team, create_request(&long, None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-input");
    }

    #[tokio::test]
    async fn updates_allocate_new_versions() {
        let (service, _store, team, ctx) = service();
        let secret = service
            .create(&ctx, team, create_request("/db/password", Some("v1")))
            .await
            .unwrap();

        let updated = service
            .update(&ctx, team, secret.id, value_update("v2"))
            .await
            .unwrap();
        assert_eq!(updated.current_version, 2);

        // Old versions stay readable until destroyed.
        let old = service
            .read_value(&ctx, team, secret.id, Some(1))
            .await
            .unwrap();
        assert_eq!(old.value, "v1");
        let new = service.read_value(&ctx, team, secret.id, None).await.unwrap();
        assert_eq!(new.value, "v2");
    }

    #[tokio::test]
    async fn retention_by_count_destroys_oldest() {
        let (service, _store, team, ctx) = service();
        let mut request = create_request("/db/password", Some("v1"));
        request.max_versions = Some(3);
        let secret = service.create(&ctx, team, request).await.unwrap();

        for value in ["v2", "v3", "v4", "v5"] {
            service
                .update(&ctx, team, secret.id, value_update(value))
                .await
                .unwrap();
        }

        let versions = service.list_versions(team, secret.id).await.unwrap();
        let destroyed: Vec<i32> = versions
            .iter()
            .filter(|v| v.destroyed)
            .map(|v| v.version_number)
            .collect();
        assert_eq!(destroyed, vec![1, 2]);
        for version in versions.iter().filter(|v| v.destroyed) {
            assert_eq!(version.ciphertext, crate::types::DESTROYED_CIPHERTEXT);
        }

        // Destroyed versions are unreadable.
        let err = service
            .read_value(&ctx, team, secret.id, Some(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-input");

        // Versions 3..=5 survive, 5 is current.
        let live: Vec<i32> = versions
            .iter()
            .filter(|v| !v.destroyed)
            .map(|v| v.version_number)
            .collect();
        assert_eq!(live, vec![3, 4, 5]);
        assert_eq!(
            service.get(team, secret.id).await.unwrap().current_version,
            5
        );
    }

    #[tokio::test]
    async fn current_version_cannot_be_destroyed() {
        let (service, _store, team, ctx) = service();
        let secret = service
            .create(&ctx, team, create_request("/a", Some("v1")))
            .await
            .unwrap();
        service
            .update(&ctx, team, secret.id, value_update("v2"))
            .await
            .unwrap();

        let err = service
            .destroy_version(&ctx, team, secret.id, 2)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-input");

        // An older version can be destroyed, once.
        service.destroy_version(&ctx, team, secret.id, 1).await.unwrap();
        let err = service
            .destroy_version(&ctx, team, secret.id, 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid-input");
    }

    #[tokio::test]
    async fn sealed_gate_blocks_everything() {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(EncryptionEngine::new(MASTER).unwrap());
        let seal = Arc::new(SealService::new(MASTER, 5, 3, false).unwrap());
        let audit = AuditSink::new(store.clone());
        let service = SecretService::new(store, engine, seal, audit);
        let team = Uuid::new_v4();
        let ctx = OperationContext::for_user("tester", team);

        let err = service
            .create(&ctx, team, create_request("/a", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sealed");

        let err = service
            .list(team, &SecretListFilter::All, Page::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "sealed");
    }

    #[tokio::test]
    async fn soft_delete_clears_active_and_hard_delete_cascades() {
        let (service, store, team, ctx) = service();
        let secret = service
            .create(&ctx, team, create_request("/a", Some("v1")))
            .await
            .unwrap();

        let softened = service.soft_delete(&ctx, team, secret.id).await.unwrap();
        assert!(!softened.active);

        service.hard_delete(&ctx, team, secret.id).await.unwrap();
        assert!(store.get_secret(secret.id).await.unwrap().is_none());
        assert!(service.get(team, secret.id).await.is_err());
    }

    #[tokio::test]
    async fn cross_team_access_reads_as_not_found() {
        let (service, _store, team, ctx) = service();
        let secret = service
            .create(&ctx, team, create_request("/a", Some("v")))
            .await
            .unwrap();

        let other_team = Uuid::new_v4();
        let err = service
            .read_value(&ctx, other_team, secret.id, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not-found");
    }

    #[tokio::test]
    async fn list_filters_apply_one_at_a_time() {
        let (service, _store, team, ctx) = service();
        let mut dynamic = create_request("/dyn/db", None);
        dynamic.secret_type = SecretType::Dynamic;
        service.create(&ctx, team, dynamic).await.unwrap();
        service.create(&ctx, team, create_request("/static/a", None)).await.unwrap();
        let s = service.create(&ctx, team, create_request("/static/b", None)).await.unwrap();
        service.soft_delete(&ctx, team, s.id).await.unwrap();

        let by_type = service
            .list(team, &SecretListFilter::Type(SecretType::Dynamic), Page::default())
            .await
            .unwrap();
        assert_eq!(by_type.len(), 1);

        let by_prefix = service
            .list(
                team,
                &SecretListFilter::PathPrefix("/static".into()),
                Page::default(),
            )
            .await
            .unwrap();
        assert_eq!(by_prefix.len(), 2);

        let active = service
            .list(team, &SecretListFilter::ActiveOnly, Page::default())
            .await
            .unwrap();
        assert_eq!(active.len(), 2);

        let found = service.search(team, "B", Page::default()).await.unwrap();
        assert_eq!(found.len(), 1);

        let paths = service.paths(team, "/static").await.unwrap();
        assert_eq!(paths, vec!["/static/a".to_string(), "/static/b".to_string()]);
    }

    #[tokio::test]
    async fn expiring_window_filters_on_deadline() {
        let (service, _store, team, ctx) = service();
        let mut soon = create_request("/soon", None);
        soon.expires_at = Some(Utc::now() + Duration::hours(2));
        service.create(&ctx, team, soon).await.unwrap();

        let mut later = create_request("/later", None);
        later.expires_at = Some(Utc::now() + Duration::hours(100));
        service.create(&ctx, team, later).await.unwrap();

        let expiring = service.expiring(team, 24).await.unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].path, "/soon");
    }
}
