//! Persistent record types
//!
//! Everything that lives in the store. All records carry creation and
//! mutation timestamps except [`AuditRecord`], which is immutable and keyed
//! by an auto-incrementing integer for write throughput. Mutable entities
//! carry a `row_version` optimistic-concurrency column that the store bumps
//! on every committed mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Longest path a secret may live at.
pub const MAX_SECRET_PATH_LEN: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SecretType {
    Static,
    Dynamic,
    Reference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    Read,
    Write,
    Delete,
    List,
    Rotate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BindingType {
    User,
    Team,
    Service,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RotationStrategy {
    RandomGenerate,
    ExternalApi,
    CustomScript,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LeaseStatus {
    Active,
    Expired,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseBackend {
    Postgresql,
    Mysql,
}

impl LeaseBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Postgresql => "postgresql",
            Self::Mysql => "mysql",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "postgresql" => Some(Self::Postgresql),
            "mysql" => Some(Self::Mysql),
            _ => None,
        }
    }
}

/// Team-owned entity at a hierarchical path. `(team_id, path)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Secret {
    pub id: Uuid,
    pub team_id: Uuid,
    pub path: String,
    pub name: String,
    pub description: Option<String>,
    pub secret_type: SecretType,
    pub current_version: i32,
    pub max_versions: Option<i32>,
    pub retention_days: Option<i32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub owner: Option<String>,
    pub external_reference: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i64,
}

/// Ciphertext that replaces a destroyed version's envelope. Terminal.
pub const DESTROYED_CIPHERTEXT: &str = "DESTROYED";

/// Immutable record of one encrypted value. `(secret_id, version_number)`
/// is unique; numbering starts at 1 and is monotonic per secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretVersion {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub version_number: i32,
    pub ciphertext: String,
    pub key_id: String,
    pub change_description: Option<String>,
    pub created_by: Option<String>,
    pub destroyed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Labeled key-value pair attached to a secret. `(secret_id, key)` unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretMetadataEntry {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Named rule set within a team. `(team_id, name)` unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub path_pattern: String,
    pub permissions: Vec<Permission>,
    pub deny: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i64,
}

/// Attaches one policy to one target. `(policy_id, binding_type, target_id)`
/// unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBinding {
    pub id: Uuid,
    pub policy_id: Uuid,
    pub binding_type: BindingType,
    pub target_id: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// At most one per secret; drives the rotation scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationPolicy {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub strategy: RotationStrategy,
    pub interval_hours: i64,
    pub random_length: Option<usize>,
    pub random_charset: Option<String>,
    pub external_api_url: Option<String>,
    /// JSON object of header name → value sent with EXTERNAL_API calls.
    pub external_api_headers: Option<String>,
    pub last_rotated_at: Option<DateTime<Utc>>,
    pub next_rotation_at: DateTime<Utc>,
    pub active: bool,
    pub failure_count: i32,
    pub max_failures: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i64,
}

/// Append-only record of one rotation attempt. Carries the secret id and
/// path as plain columns so history survives secret deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationHistoryRecord {
    pub id: Uuid,
    pub secret_id: Uuid,
    pub secret_path: String,
    pub previous_version: Option<i32>,
    pub new_version: Option<i32>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: i64,
    pub rotated_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A leased credential set. References its source secret by plain id and
/// path only, so leases survive secret deletion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicLease {
    pub id: Uuid,
    /// Opaque unique handle clients hold.
    pub lease_id: String,
    pub secret_id: Uuid,
    pub secret_path: String,
    pub backend: LeaseBackend,
    /// Envelope-encrypted credential blob; plaintext surfaces only in the
    /// create response.
    pub encrypted_credentials: String,
    pub status: LeaseStatus,
    pub ttl_seconds: i64,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_by: Option<String>,
    pub requested_by: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i64,
}

/// Team-owned named key with versioned material. `(team_id, name)` unique.
/// Versions are dense `1..=current_version` and
/// `min_decryption_version <= current_version`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitKey {
    pub id: Uuid,
    pub team_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub current_version: i32,
    pub min_decryption_version: i32,
    /// Envelope-encrypted JSON array of `{version, key}` entries.
    pub encrypted_material: String,
    pub algorithm: String,
    pub is_deletable: bool,
    pub is_exportable: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i64,
}

/// Immutable operation log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
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
    pub created_at: DateTime<Utc>,
}
