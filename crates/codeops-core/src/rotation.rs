//! Rotation engine
//!
//! Rotation policies are upserted per secret and driven by the scheduler.
//! A rotation produces a new secret version via the configured strategy and
//! records every attempt in append-only history. Failures advance the next
//! rotation time anyway so a broken policy cannot hot-loop, and a policy
//! that keeps failing deactivates itself once it spends its failure budget.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use codeops_crypto::EncryptionEngine;

use crate::audit::{ops, AuditSink};
use crate::context::OperationContext;
use crate::error::{Result, VaultError};
use crate::seal::SealService;
use crate::secrets::{SecretService, UpdateSecretRequest};
use crate::store::{Page, RotationRepository};
use crate::types::{RotationHistoryRecord, RotationPolicy, RotationStrategy};

const EXTERNAL_CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(10);
const EXTERNAL_READ_TIMEOUT: StdDuration = StdDuration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RotationPolicyRequest {
    pub strategy: RotationStrategy,
    pub interval_hours: i64,
    pub random_length: Option<usize>,
    pub random_charset: Option<String>,
    pub external_api_url: Option<String>,
    pub external_api_headers: Option<String>,
    pub max_failures: i32,
}

pub struct RotationService {
    repo: Arc<dyn RotationRepository>,
    secrets: Arc<SecretService>,
    engine: Arc<EncryptionEngine>,
    seal: Arc<SealService>,
    audit: AuditSink,
    http: reqwest::Client,
}

impl RotationService {
    pub fn new(
        repo: Arc<dyn RotationRepository>,
        secrets: Arc<SecretService>,
        engine: Arc<EncryptionEngine>,
        seal: Arc<SealService>,
        audit: AuditSink,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(EXTERNAL_CONNECT_TIMEOUT)
            .timeout(EXTERNAL_READ_TIMEOUT)
            .build()
            .map_err(VaultError::internal)?;
        Ok(Self {
            repo,
            secrets,
            engine,
            seal,
            audit,
            http,
        })
    }

    /// Upsert the policy for a secret. Resets the failure count and
    /// schedules the next rotation one interval out.
    pub async fn create_or_update_policy(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        secret_id: Uuid,
        request: RotationPolicyRequest,
    ) -> Result<RotationPolicy> {
        self.seal.require_unsealed()?;
        self.secrets.get(team_id, secret_id).await?;

        if request.interval_hours < 1 {
            return Err(VaultError::InvalidInput(
                "rotation interval must be at least one hour".into(),
            ));
        }
        if request.max_failures < 1 {
            return Err(VaultError::InvalidInput("max_failures must be at least 1".into()));
        }
        match request.strategy {
            RotationStrategy::RandomGenerate => {
                if request.random_length.is_none() || request.random_charset.is_none() {
                    return Err(VaultError::InvalidInput(
                        "random rotation requires random_length and random_charset".into(),
                    ));
                }
            }
            RotationStrategy::ExternalApi => {
                if request.external_api_url.as_deref().unwrap_or("").is_empty() {
                    return Err(VaultError::InvalidInput(
                        "external rotation requires external_api_url".into(),
                    ));
                }
            }
            // Stored, but every rotation attempt will fail not-implemented.
            RotationStrategy::CustomScript => {}
        }

        let now = Utc::now();
        let policy = RotationPolicy {
            id: Uuid::new_v4(),
            secret_id,
            strategy: request.strategy,
            interval_hours: request.interval_hours,
            random_length: request.random_length,
            random_charset: request.random_charset,
            external_api_url: request.external_api_url,
            external_api_headers: request.external_api_headers,
            last_rotated_at: None,
            next_rotation_at: now + Duration::hours(request.interval_hours),
            active: true,
            failure_count: 0,
            max_failures: request.max_failures,
            created_at: now,
            updated_at: now,
            row_version: 0,
        };

        let policy = self.repo.upsert_policy(policy).await?;
        self.audit.log_success(
            ctx,
            ops::POLICY_CREATE,
            None,
            "rotation-policy",
            Some(policy.id.to_string()),
            Some(serde_json::json!({ "secret_id": secret_id, "strategy": policy.strategy })),
        );
        Ok(policy)
    }

    pub async fn get_policy(&self, team_id: Uuid, secret_id: Uuid) -> Result<RotationPolicy> {
        self.seal.require_unsealed()?;
        self.secrets.get(team_id, secret_id).await?;
        self.repo
            .get_policy_by_secret(secret_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("rotation policy for secret {secret_id}")))
    }

    pub async fn delete_policy(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        secret_id: Uuid,
    ) -> Result<()> {
        self.seal.require_unsealed()?;
        self.secrets.get(team_id, secret_id).await?;
        self.repo.delete_policy_by_secret(secret_id).await?;
        self.audit.log_success(
            ctx,
            ops::POLICY_DELETE,
            None,
            "rotation-policy",
            Some(secret_id.to_string()),
            None,
        );
        Ok(())
    }

    /// Rotate one secret now. On success the failure count resets; on
    /// failure the next-rotation time still advances, the failure count
    /// grows, and the policy deactivates at its budget. The original error
    /// is always re-surfaced.
    pub async fn rotate_secret(&self, ctx: &OperationContext, secret_id: Uuid) -> Result<()> {
        self.seal.require_unsealed()?;
        let mut policy = self
            .repo
            .get_policy_by_secret(secret_id)
            .await?
            .ok_or_else(|| {
                VaultError::NotFound(format!("rotation policy for secret {secret_id}"))
            })?;

        let secret = self
            .secrets
            .get_unchecked(secret_id)
            .await?;

        // Scheduler-driven contexts carry no team; audit against the
        // secret's own team either way.
        let mut ctx = ctx.clone();
        ctx.team_id.get_or_insert(secret.team_id);
        let ctx = &ctx;

        let previous_version = secret.current_version;
        let started = std::time::Instant::now();
        let now = Utc::now();

        let outcome: Result<i32> = async {
            let new_value = self.execute_strategy(&policy).await?;
            let updated = self
                .secrets
                .update(
                    ctx,
                    secret.team_id,
                    secret_id,
                    UpdateSecretRequest {
                        value: Some(new_value),
                        change_description: Some("scheduled rotation".to_string()),
                        ..Default::default()
                    },
                )
                .await?;
            self.secrets.mark_rotated(secret_id).await?;
            Ok(updated.current_version)
        }
        .await;

        let duration_ms = started.elapsed().as_millis() as i64;

        match outcome {
            Ok(new_version) => {
                self.repo
                    .append_history(RotationHistoryRecord {
                        id: Uuid::new_v4(),
                        secret_id,
                        secret_path: secret.path.clone(),
                        previous_version: Some(previous_version),
                        new_version: Some(new_version),
                        success: true,
                        error: None,
                        duration_ms,
                        rotated_by: ctx.actor.clone(),
                        created_at: Utc::now(),
                    })
                    .await?;

                policy.last_rotated_at = Some(now);
                policy.next_rotation_at = now + Duration::hours(policy.interval_hours);
                policy.failure_count = 0;
                self.repo.save_policy(policy).await?;

                self.audit.log_success(
                    ctx,
                    ops::ROTATE,
                    Some(&secret.path),
                    "secret",
                    Some(secret_id.to_string()),
                    Some(serde_json::json!({
                        "previous_version": previous_version,
                        "new_version": new_version,
                    })),
                );
                info!(secret_id = %secret_id, new_version, "secret rotated");
                Ok(())
            }
            Err(err) => {
                self.repo
                    .append_history(RotationHistoryRecord {
                        id: Uuid::new_v4(),
                        secret_id,
                        secret_path: secret.path.clone(),
                        previous_version: Some(previous_version),
                        new_version: None,
                        success: false,
                        error: Some(err.to_string()),
                        duration_ms,
                        rotated_by: ctx.actor.clone(),
                        created_at: Utc::now(),
                    })
                    .await?;

                // Advance anyway: the next tick must not re-pick this row.
                policy.next_rotation_at = now + Duration::hours(policy.interval_hours);
                policy.failure_count += 1;
                if policy.failure_count >= policy.max_failures {
                    policy.active = false;
                    warn!(
                        secret_id = %secret_id,
                        failures = policy.failure_count,
                        "rotation policy deactivated after exhausting its failure budget"
                    );
                }
                self.repo.save_policy(policy).await?;

                self.audit.log_failure(
                    ctx,
                    ops::ROTATE,
                    Some(&secret.path),
                    "secret",
                    Some(secret_id.to_string()),
                    &err.to_string(),
                );
                Err(err)
            }
        }
    }

    /// Sweep every due policy. Failures are isolated per policy; the batch
    /// always completes. Returns the number of policies processed.
    pub async fn process_due_rotations(&self) -> Result<usize> {
        self.seal.require_unsealed()?;
        let due = self.repo.due_policies(Utc::now()).await?;
        let count = due.len();
        for policy in due {
            let ctx = OperationContext::system("rotation-scheduler");
            if let Err(err) = self.rotate_secret(&ctx, policy.secret_id).await {
                error!(secret_id = %policy.secret_id, error = %err, "scheduled rotation failed");
            }
        }
        Ok(count)
    }

    pub async fn history(
        &self,
        team_id: Uuid,
        secret_id: Uuid,
        page: Page,
    ) -> Result<Vec<RotationHistoryRecord>> {
        self.seal.require_unsealed()?;
        self.secrets.get(team_id, secret_id).await?;
        self.repo.history_for_secret(secret_id, page).await
    }

    pub async fn last_successful(
        &self,
        team_id: Uuid,
        secret_id: Uuid,
    ) -> Result<Option<RotationHistoryRecord>> {
        self.seal.require_unsealed()?;
        self.secrets.get(team_id, secret_id).await?;
        self.repo.last_successful_rotation(secret_id).await
    }

    /// `(total attempts, failures)` for one secret.
    pub async fn history_counts(&self, team_id: Uuid, secret_id: Uuid) -> Result<(u64, u64)> {
        self.seal.require_unsealed()?;
        self.secrets.get(team_id, secret_id).await?;
        self.repo.history_counts(secret_id).await
    }

    async fn execute_strategy(&self, policy: &RotationPolicy) -> Result<String> {
        match policy.strategy {
            RotationStrategy::RandomGenerate => {
                let length = policy.random_length.ok_or_else(|| {
                    VaultError::InvalidInput("rotation policy is missing random_length".into())
                })?;
                let charset = policy.random_charset.as_deref().ok_or_else(|| {
                    VaultError::InvalidInput("rotation policy is missing random_charset".into())
                })?;
                Ok(self.engine.generate_random_string(length, charset)?)
            }
            RotationStrategy::ExternalApi => self.fetch_external_value(policy).await,
            RotationStrategy::CustomScript => Err(VaultError::NotImplemented(
                "custom-script rotation is reserved".into(),
            )),
        }
    }

    /// GET the configured URL; the trimmed response body is the new value.
    async fn fetch_external_value(&self, policy: &RotationPolicy) -> Result<String> {
        let url = policy.external_api_url.as_deref().ok_or_else(|| {
            VaultError::InvalidInput("rotation policy is missing external_api_url".into())
        })?;

        let mut request = self.http.get(url);
        if let Some(headers) = policy.external_api_headers.as_deref() {
            let parsed: HashMap<String, String> = serde_json::from_str(headers)
                .map_err(|_| {
                    VaultError::InvalidInput(
                        "external_api_headers must be a JSON object of strings".into(),
                    )
                })?;
            for (name, value) in parsed {
                request = request.header(name, value);
            }
        }

        let response = request.send().await.map_err(VaultError::internal)?;
        if !response.status().is_success() {
            return Err(VaultError::InvalidInput(format!(
                "external rotation endpoint returned {}",
                response.status()
            )));
        }
        let body = response.text().await.map_err(VaultError::internal)?;
        let value = body.trim().to_string();
        if value.is_empty() {
            return Err(VaultError::InvalidInput(
                "external rotation endpoint returned an empty body".into(),
            ));
        }
        Ok(value)
    }
}
