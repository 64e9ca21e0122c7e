//! Dynamic-lease engine
//!
//! Dynamic secrets describe a database whose credentials this engine mints
//! on demand. A lease tracks one minted credential set: created ACTIVE with
//! a TTL, then terminally EXPIRED (by the sweep) or REVOKED (by a caller).
//! Backend SQL is best-effort and gated by configuration; a backend failure
//! never blocks the lease's own state transition. Full credentials surface
//! exactly once, in the create response.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use codeops_crypto::EncryptionEngine;

use crate::audit::{ops, AuditSink};
use crate::config::MIN_LEASE_TTL_SECONDS;
use crate::context::OperationContext;
use crate::error::{Result, VaultError};
use crate::seal::SealService;
use crate::store::{LeaseRepository, SecretRepository};
use crate::types::{DynamicLease, LeaseBackend, LeaseStatus, Secret, SecretType};

/// Connection coordinates read from the source secret's metadata.
#[derive(Debug, Clone)]
pub struct BackendConnection {
    pub backend: LeaseBackend,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub admin_username: String,
    pub admin_password: String,
}

/// Executes credential SQL against a backend database. The production
/// implementation connects with the admin credentials; tests and dev
/// deployments record or drop the statements.
#[async_trait]
pub trait CredentialBackend: Send + Sync {
    async fn execute(&self, connection: &BackendConnection, statements: &[String]) -> Result<()>;
}

/// Default wiring for development: acknowledges statements without
/// touching any database.
pub struct LoggingCredentialBackend;

#[async_trait]
impl CredentialBackend for LoggingCredentialBackend {
    async fn execute(&self, connection: &BackendConnection, statements: &[String]) -> Result<()> {
        debug!(
            backend = connection.backend.as_str(),
            host = %connection.host,
            statements = statements.len(),
            "no live credential backend wired; statements logged only"
        );
        Ok(())
    }
}

/// Full credentials; returned only from `create_lease`.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseCredentials {
    pub lease_id: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub backend: LeaseBackend,
    pub ttl_seconds: i64,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// The credential blob persisted (encrypted) on the lease.
#[derive(Debug, Serialize, Deserialize)]
struct CredentialBlob {
    username: String,
    password: String,
    host: String,
    port: u16,
    database: String,
    backend: String,
}

#[derive(Debug, Clone)]
pub struct LeaseSettings {
    pub execute_sql: bool,
    pub default_ttl_seconds: i64,
    pub max_ttl_seconds: i64,
    pub username_prefix: String,
    pub password_length: usize,
}

pub struct LeaseService {
    leases: Arc<dyn LeaseRepository>,
    secrets: Arc<dyn SecretRepository>,
    engine: Arc<EncryptionEngine>,
    seal: Arc<SealService>,
    audit: AuditSink,
    backend: Arc<dyn CredentialBackend>,
    settings: LeaseSettings,
}

impl LeaseService {
    pub fn new(
        leases: Arc<dyn LeaseRepository>,
        secrets: Arc<dyn SecretRepository>,
        engine: Arc<EncryptionEngine>,
        seal: Arc<SealService>,
        audit: AuditSink,
        backend: Arc<dyn CredentialBackend>,
        settings: LeaseSettings,
    ) -> Self {
        Self {
            leases,
            secrets,
            engine,
            seal,
            audit,
            backend,
            settings,
        }
    }

    /// Mint credentials for a DYNAMIC secret. `ttl_seconds` defaults from
    /// configuration and must lie in the configured bounds.
    pub async fn create_lease(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        secret_id: Uuid,
        ttl_seconds: Option<i64>,
    ) -> Result<LeaseCredentials> {
        self.seal.require_unsealed()?;

        let ttl = ttl_seconds.unwrap_or(self.settings.default_ttl_seconds);
        if !(MIN_LEASE_TTL_SECONDS..=self.settings.max_ttl_seconds).contains(&ttl) {
            return Err(VaultError::InvalidInput(format!(
                "lease TTL must lie in {}..={} seconds",
                MIN_LEASE_TTL_SECONDS, self.settings.max_ttl_seconds
            )));
        }

        let secret = self
            .secrets
            .get_secret(secret_id)
            .await?
            .filter(|s| s.team_id == team_id)
            .ok_or_else(|| VaultError::NotFound(format!("secret {secret_id}")))?;
        if secret.secret_type != SecretType::Dynamic {
            return Err(VaultError::InvalidInput(
                "leases can only be created for DYNAMIC secrets".into(),
            ));
        }

        let result: Result<LeaseCredentials> = async {
            let connection = self.backend_connection(&secret).await?;

            let username = self.build_username(&secret.name);
            let password = self
                .engine
                .generate_random_string(self.settings.password_length, "alphanumeric")?;

            let blob = CredentialBlob {
                username: username.clone(),
                password: password.clone(),
                host: connection.host.clone(),
                port: connection.port,
                database: connection.database.clone(),
                backend: connection.backend.as_str().to_string(),
            };
            let encrypted = self
                .engine
                .encrypt(serde_json::to_vec(&blob).map_err(VaultError::internal)?.as_slice())?;

            self.run_backend_sql(
                &connection,
                create_statements(&connection, &username, &password),
            )
            .await;

            let now = Utc::now();
            let expires_at = now + Duration::seconds(ttl);
            let lease = DynamicLease {
                id: Uuid::new_v4(),
                lease_id: Uuid::new_v4().to_string(),
                secret_id,
                secret_path: secret.path.clone(),
                backend: connection.backend,
                encrypted_credentials: encrypted,
                status: LeaseStatus::Active,
                ttl_seconds: ttl,
                expires_at,
                revoked_at: None,
                revoked_by: None,
                requested_by: ctx.actor.clone(),
                metadata: None,
                created_at: now,
                updated_at: now,
                row_version: 0,
            };
            let lease = self.leases.insert_lease(lease).await?;

            Ok(LeaseCredentials {
                lease_id: lease.lease_id,
                username,
                password,
                host: connection.host,
                port: connection.port,
                database: connection.database,
                backend: connection.backend,
                ttl_seconds: ttl,
                expires_at,
            })
        }
        .await;

        match result {
            Ok(credentials) => {
                self.audit.log_success(
                    ctx,
                    ops::LEASE_CREATE,
                    Some(&secret.path),
                    "lease",
                    Some(credentials.lease_id.clone()),
                    Some(serde_json::json!({ "ttl_seconds": ttl })),
                );
                info!(lease_id = %credentials.lease_id, "lease created");
                Ok(credentials)
            }
            Err(err) => {
                self.audit.log_failure(
                    ctx,
                    ops::LEASE_CREATE,
                    Some(&secret.path),
                    "lease",
                    None,
                    &err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Metadata view of a lease. Credentials stay encrypted.
    pub async fn get_lease(&self, lease_id: &str) -> Result<DynamicLease> {
        self.seal.require_unsealed()?;
        let mut lease = self
            .leases
            .get_lease(lease_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("lease {lease_id}")))?;
        lease.encrypted_credentials = String::new();
        Ok(lease)
    }

    pub async fn leases_for_secret(&self, secret_id: Uuid) -> Result<Vec<DynamicLease>> {
        self.seal.require_unsealed()?;
        let mut leases = self.leases.leases_for_secret(secret_id).await?;
        for lease in &mut leases {
            lease.encrypted_credentials = String::new();
        }
        Ok(leases)
    }

    /// Revoke an ACTIVE lease: drop the backend user (best-effort), then
    /// transition to REVOKED recording the actor.
    pub async fn revoke(&self, ctx: &OperationContext, lease_id: &str) -> Result<DynamicLease> {
        self.seal.require_unsealed()?;
        let lease = self
            .leases
            .get_lease(lease_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("lease {lease_id}")))?;
        if lease.status != LeaseStatus::Active {
            let err = VaultError::InvalidInput(format!("lease {lease_id} is not active"));
            self.audit.log_failure(
                ctx,
                ops::LEASE_REVOKE,
                Some(&lease.secret_path),
                "lease",
                Some(lease_id.to_string()),
                &err.to_string(),
            );
            return Err(err);
        }

        self.drop_backend_user(&lease).await;

        let lease = self
            .leases
            .transition_lease(lease_id, LeaseStatus::Revoked, ctx.actor.clone())
            .await?;
        self.audit.log_success(
            ctx,
            ops::LEASE_REVOKE,
            Some(&lease.secret_path),
            "lease",
            Some(lease_id.to_string()),
            None,
        );
        Ok(lease)
    }

    /// Revoke every ACTIVE lease of a secret. Returns how many.
    pub async fn revoke_all(&self, ctx: &OperationContext, secret_id: Uuid) -> Result<usize> {
        self.seal.require_unsealed()?;
        let active = self.leases.active_leases_for_secret(secret_id).await?;
        let mut revoked = 0;
        for lease in active {
            if self.revoke(ctx, &lease.lease_id).await.is_ok() {
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    /// Expiry sweep: every ACTIVE lease past its deadline transitions to
    /// EXPIRED. Idempotent; returns the number expired.
    pub async fn process_expired_leases(&self) -> Result<usize> {
        self.seal.require_unsealed()?;
        let expired = self.leases.expired_active_leases(Utc::now()).await?;
        let mut count = 0;
        for lease in expired {
            self.drop_backend_user(&lease).await;
            match self
                .leases
                .transition_lease(&lease.lease_id, LeaseStatus::Expired, None)
                .await
            {
                Ok(_) => {
                    count += 1;
                    let ctx = OperationContext::system("lease-scheduler");
                    self.audit.log_success(
                        &ctx,
                        ops::LEASE_EXPIRE,
                        Some(&lease.secret_path),
                        "lease",
                        Some(lease.lease_id.clone()),
                        None,
                    );
                }
                Err(err) => {
                    // Another worker got there first; the sweep stays calm.
                    debug!(lease_id = %lease.lease_id, error = %err, "expiry transition skipped");
                }
            }
        }
        Ok(count)
    }

    /// Read the backend coordinates from the secret's metadata entries.
    async fn backend_connection(&self, secret: &Secret) -> Result<BackendConnection> {
        let entries = self.secrets.get_metadata(secret.id).await?;
        let get = |key: &str| -> Result<String> {
            entries
                .iter()
                .find(|e| e.key == key)
                .map(|e| e.value.clone())
                .ok_or_else(|| {
                    VaultError::InvalidInput(format!(
                        "dynamic secret metadata is missing `{key}`"
                    ))
                })
        };

        let backend_name = get("backendType")?;
        let backend = LeaseBackend::parse(&backend_name).ok_or_else(|| {
            VaultError::InvalidInput(format!("unsupported backend type `{backend_name}`"))
        })?;
        let port: u16 = get("port")?
            .parse()
            .map_err(|_| VaultError::InvalidInput("metadata `port` must be a number".into()))?;

        Ok(BackendConnection {
            backend,
            host: get("host")?,
            port,
            database: get("database")?,
            admin_username: get("adminUsername")?,
            admin_password: get("adminPassword")?,
        })
    }

    /// `<prefix><slug>_<8 hex of a fresh uuid>`, truncated to 63 chars to
    /// satisfy both backends' identifier limits.
    fn build_username(&self, secret_name: &str) -> String {
        let slug: String = secret_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let token = Uuid::new_v4().simple().to_string();
        let mut username = format!("{}{}_{}", self.settings.username_prefix, slug, &token[..8]);
        username.truncate(63);
        username
    }

    async fn drop_backend_user(&self, lease: &DynamicLease) {
        // Recover the username and coordinates from the encrypted blob; if
        // the blob is unreadable there is nothing to drop.
        let blob: CredentialBlob = match self
            .engine
            .decrypt(&lease.encrypted_credentials)
            .map_err(VaultError::from)
            .and_then(|bytes| serde_json::from_slice(&bytes).map_err(VaultError::internal))
        {
            Ok(blob) => blob,
            Err(err) => {
                warn!(lease_id = %lease.lease_id, error = %err, "cannot read lease credentials");
                return;
            }
        };

        let connection = BackendConnection {
            backend: lease.backend,
            host: blob.host,
            port: blob.port,
            database: blob.database,
            admin_username: String::new(),
            admin_password: String::new(),
        };
        self.run_backend_sql(&connection, drop_statements(&connection, &blob.username))
            .await;
    }

    /// Best-effort: failures are logged and absorbed so the lease's own
    /// state transition still completes.
    async fn run_backend_sql(&self, connection: &BackendConnection, statements: Vec<String>) {
        if !self.settings.execute_sql {
            debug!(
                backend = connection.backend.as_str(),
                "execute_sql disabled; skipping backend statements"
            );
            return;
        }
        if let Err(err) = self.backend.execute(connection, &statements).await {
            warn!(
                backend = connection.backend.as_str(),
                error = %err,
                "backend credential statement failed"
            );
        }
    }
}

fn create_statements(
    connection: &BackendConnection,
    username: &str,
    password: &str,
) -> Vec<String> {
    match connection.backend {
        LeaseBackend::Postgresql => vec![
            format!("CREATE ROLE \"{username}\" WITH LOGIN PASSWORD '{password}'"),
            format!(
                "GRANT CONNECT ON DATABASE \"{}\" TO \"{username}\"",
                connection.database
            ),
            format!("GRANT USAGE ON SCHEMA public TO \"{username}\""),
        ],
        LeaseBackend::Mysql => vec![
            format!("CREATE USER '{username}'@'%' IDENTIFIED BY '{password}'"),
            format!(
                "GRANT SELECT, INSERT, UPDATE, DELETE ON {}.* TO '{username}'@'%'",
                connection.database
            ),
            "FLUSH PRIVILEGES".to_string(),
        ],
    }
}

fn drop_statements(connection: &BackendConnection, username: &str) -> Vec<String> {
    match connection.backend {
        LeaseBackend::Postgresql => vec![format!("DROP ROLE IF EXISTS \"{username}\"")],
        LeaseBackend::Mysql => vec![
            format!("DROP USER IF EXISTS '{username}'@'%'"),
            "FLUSH PRIVILEGES".to_string(),
        ],
    }
}
