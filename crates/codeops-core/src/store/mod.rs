//! Repository traits over the persistent store
//!
//! The store itself is an external collaborator; these traits name exactly
//! the indexed reads and guarded writes the engines need. Implementations
//! must honor the isolation contracts stated on each method. In
//! particular, [`AuditRepository::append`] commits in its own transaction
//! so an audit failure can never poison a primary operation.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::types::*;

pub use memory::MemoryStore;

/// Offset/limit pagination. The store clamps, it never errors on bounds.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub offset: usize,
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Exactly one list filter applies per query, in this priority order.
#[derive(Debug, Clone)]
pub enum SecretListFilter {
    Type(SecretType),
    PathPrefix(String),
    ActiveOnly,
    All,
}

/// Single highest-priority audit filter: resource > user > operation >
/// path > time range > failures-only > all.
#[derive(Debug, Clone)]
pub enum AuditFilter {
    Resource {
        resource_type: String,
        resource_id: String,
    },
    User(String),
    Operation(String),
    Path(String),
    TimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    FailuresOnly,
    All,
}

/// Fields of an audit record before the store assigns its sequence id.
#[derive(Debug, Clone)]
pub struct NewAuditRecord {
    pub team_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub operation: String,
    pub path: Option<String>,
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub client_ip: Option<String>,
    pub correlation_id: Option<String>,
    pub details: Option<serde_json::Value>,
}

#[async_trait]
pub trait SecretRepository: Send + Sync {
    /// Insert a new secret. Fails `invalid-input` if `(team_id, path)`
    /// already exists; the uniqueness check and insert are atomic.
    async fn insert_secret(&self, secret: Secret) -> Result<Secret>;

    async fn get_secret(&self, id: Uuid) -> Result<Option<Secret>>;

    async fn get_secret_by_path(&self, team_id: Uuid, path: &str) -> Result<Option<Secret>>;

    /// Persist a mutated secret. Bumps `row_version` and `updated_at`.
    /// Fails `not-found` if the secret no longer exists.
    async fn save_secret(&self, secret: Secret) -> Result<Secret>;

    /// Hard delete: removes the secret, its versions, its metadata and any
    /// attached rotation policy in one transaction. Rotation history and
    /// leases are untouched.
    async fn delete_secret(&self, id: Uuid) -> Result<()>;

    async fn list_secrets(
        &self,
        team_id: Uuid,
        filter: &SecretListFilter,
        page: Page,
    ) -> Result<Vec<Secret>>;

    /// Case-insensitive substring match on name.
    async fn search_secrets(&self, team_id: Uuid, query: &str, page: Page) -> Result<Vec<Secret>>;

    /// Distinct paths starting with `prefix`, sorted.
    async fn secret_paths(&self, team_id: Uuid, prefix: &str) -> Result<Vec<String>>;

    /// Active secrets with `expires_at <= before`.
    async fn expiring_secrets(&self, team_id: Uuid, before: DateTime<Utc>) -> Result<Vec<Secret>>;

    /// Allocate the next version number for a secret and advance the
    /// secret's `current_version`, atomically. Version numbers never
    /// collide even under concurrent writers.
    async fn allocate_version(
        &self,
        secret_id: Uuid,
        ciphertext: String,
        key_id: String,
        change_description: Option<String>,
        created_by: Option<String>,
    ) -> Result<SecretVersion>;

    async fn get_version(
        &self,
        secret_id: Uuid,
        version_number: i32,
    ) -> Result<Option<SecretVersion>>;

    async fn list_versions(&self, secret_id: Uuid) -> Result<Vec<SecretVersion>>;

    /// Overwrite the version's ciphertext with the literal `DESTROYED` and
    /// set the destroyed flag. The transition is terminal: fails
    /// `invalid-input` if already destroyed, `not-found` if absent.
    async fn destroy_version(&self, secret_id: Uuid, version_number: i32) -> Result<SecretVersion>;

    /// Upsert one metadata pair.
    async fn set_metadata(
        &self,
        secret_id: Uuid,
        key: &str,
        value: &str,
    ) -> Result<SecretMetadataEntry>;

    async fn remove_metadata(&self, secret_id: Uuid, key: &str) -> Result<()>;

    async fn get_metadata(&self, secret_id: Uuid) -> Result<Vec<SecretMetadataEntry>>;

    /// Delete all pairs and re-insert the given ones in one transaction.
    async fn replace_metadata(
        &self,
        secret_id: Uuid,
        entries: Vec<(String, String)>,
    ) -> Result<Vec<SecretMetadataEntry>>;
}

#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Fails `invalid-input` if `(team_id, name)` already exists.
    async fn insert_policy(&self, policy: AccessPolicy) -> Result<AccessPolicy>;

    async fn get_policy(&self, id: Uuid) -> Result<Option<AccessPolicy>>;

    async fn save_policy(&self, policy: AccessPolicy) -> Result<AccessPolicy>;

    /// Cascades the policy's bindings.
    async fn delete_policy(&self, id: Uuid) -> Result<()>;

    async fn list_policies(&self, team_id: Uuid) -> Result<Vec<AccessPolicy>>;

    /// Fails `invalid-input` if `(policy_id, binding_type, target_id)`
    /// already exists.
    async fn insert_binding(&self, binding: PolicyBinding) -> Result<PolicyBinding>;

    async fn delete_binding(&self, id: Uuid) -> Result<()>;

    async fn list_bindings(&self, policy_id: Uuid) -> Result<Vec<PolicyBinding>>;

    /// Active bindings whose `(binding_type, target_id)` matches any of the
    /// given targets.
    async fn bindings_for_targets(
        &self,
        targets: &[(BindingType, String)],
    ) -> Result<Vec<PolicyBinding>>;
}

#[async_trait]
pub trait RotationRepository: Send + Sync {
    /// Upsert keyed by `secret_id`, atomic.
    async fn upsert_policy(&self, policy: RotationPolicy) -> Result<RotationPolicy>;

    async fn get_policy_by_secret(&self, secret_id: Uuid) -> Result<Option<RotationPolicy>>;

    async fn save_policy(&self, policy: RotationPolicy) -> Result<RotationPolicy>;

    async fn delete_policy_by_secret(&self, secret_id: Uuid) -> Result<()>;

    /// Active policies with `next_rotation_at < now`.
    async fn due_policies(&self, now: DateTime<Utc>) -> Result<Vec<RotationPolicy>>;

    async fn append_history(&self, record: RotationHistoryRecord) -> Result<RotationHistoryRecord>;

    /// Newest first.
    async fn history_for_secret(
        &self,
        secret_id: Uuid,
        page: Page,
    ) -> Result<Vec<RotationHistoryRecord>>;

    async fn last_successful_rotation(
        &self,
        secret_id: Uuid,
    ) -> Result<Option<RotationHistoryRecord>>;

    /// `(total attempts, failed attempts)` for one secret.
    async fn history_counts(&self, secret_id: Uuid) -> Result<(u64, u64)>;
}

#[async_trait]
pub trait LeaseRepository: Send + Sync {
    async fn insert_lease(&self, lease: DynamicLease) -> Result<DynamicLease>;

    async fn get_lease(&self, lease_id: &str) -> Result<Option<DynamicLease>>;

    async fn leases_for_secret(&self, secret_id: Uuid) -> Result<Vec<DynamicLease>>;

    async fn active_leases_for_secret(&self, secret_id: Uuid) -> Result<Vec<DynamicLease>>;

    /// ACTIVE leases with `expires_at < now`.
    async fn expired_active_leases(&self, now: DateTime<Utc>) -> Result<Vec<DynamicLease>>;

    /// Guarded read-modify-write: only an ACTIVE lease may transition, and
    /// only to EXPIRED or REVOKED. Fails `invalid-input` otherwise.
    async fn transition_lease(
        &self,
        lease_id: &str,
        to: LeaseStatus,
        revoked_by: Option<String>,
    ) -> Result<DynamicLease>;
}

#[async_trait]
pub trait TransitKeyRepository: Send + Sync {
    /// Fails `invalid-input` if `(team_id, name)` already exists.
    async fn insert_key(&self, key: TransitKey) -> Result<TransitKey>;

    async fn get_key(&self, team_id: Uuid, name: &str) -> Result<Option<TransitKey>>;

    async fn save_key(&self, key: TransitKey) -> Result<TransitKey>;

    async fn delete_key(&self, id: Uuid) -> Result<()>;

    async fn list_keys(&self, team_id: Uuid) -> Result<Vec<TransitKey>>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Commits in a transaction independent of any caller transaction.
    /// Assigns the auto-incrementing record id.
    async fn append(&self, record: NewAuditRecord) -> Result<AuditRecord>;

    /// Newest first, with the single given filter applied.
    async fn query(&self, team_id: Uuid, filter: &AuditFilter, page: Page)
        -> Result<Vec<AuditRecord>>;
}
