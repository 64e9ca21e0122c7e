//! Access policies: management and evaluation
//!
//! Policies are named per-team rule sets bound to users, teams, or
//! services. Evaluation is deny-overrides-allow over single-segment path
//! globs. The evaluator is a library surface: callers decide where to
//! enforce it.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::audit::{ops, AuditSink};
use crate::context::OperationContext;
use crate::error::{Result, VaultError};
use crate::store::PolicyRepository;
use crate::types::{AccessPolicy, BindingType, Permission, PolicyBinding};

/// Match a path against a pattern. Both are split on `/`. An interior `*`
/// matches exactly one non-empty segment and segment counts must agree; a
/// trailing `*` matches the entire remaining subtree (one or more non-empty
/// segments). Every other segment matches literally.
pub fn path_matches(pattern: &str, path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();

    match pattern_segments.split_last() {
        Some((&"*", head)) => {
            path_segments.len() >= pattern_segments.len()
                && head
                    .iter()
                    .zip(&path_segments)
                    .all(|(p, s)| segment_matches(p, s))
                && path_segments[head.len()..].iter().all(|s| !s.is_empty())
        }
        _ => {
            pattern_segments.len() == path_segments.len()
                && pattern_segments
                    .iter()
                    .zip(&path_segments)
                    .all(|(p, s)| segment_matches(p, s))
        }
    }
}

fn segment_matches(pattern: &str, segment: &str) -> bool {
    if pattern == "*" {
        !segment.is_empty()
    } else {
        pattern == segment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessOutcome {
    Allowed,
    Denied,
    DefaultDenied,
}

/// The evaluator's verdict, carrying the deciding policy when one matched.
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub outcome: AccessOutcome,
    pub policy_id: Option<Uuid>,
    pub policy_name: Option<String>,
}

impl AccessDecision {
    pub fn allowed(&self) -> bool {
        self.outcome == AccessOutcome::Allowed
    }
}

pub struct PolicyService {
    repo: Arc<dyn PolicyRepository>,
    audit: AuditSink,
}

#[derive(Debug, Clone)]
pub struct CreatePolicyRequest {
    pub name: String,
    pub path_pattern: String,
    pub permissions: Vec<Permission>,
    pub deny: bool,
}

impl PolicyService {
    pub fn new(repo: Arc<dyn PolicyRepository>, audit: AuditSink) -> Self {
        Self { repo, audit }
    }

    pub async fn create_policy(
        &self,
        ctx: &OperationContext,
        team_id: Uuid,
        request: CreatePolicyRequest,
    ) -> Result<AccessPolicy> {
        if request.name.trim().is_empty() {
            return Err(VaultError::InvalidInput("policy name must not be empty".into()));
        }
        if request.path_pattern.trim().is_empty() {
            return Err(VaultError::InvalidInput("path pattern must not be empty".into()));
        }
        if request.permissions.is_empty() {
            return Err(VaultError::InvalidInput(
                "policy must grant at least one permission".into(),
            ));
        }

        let now = chrono::Utc::now();
        let policy = AccessPolicy {
            id: Uuid::new_v4(),
            team_id,
            name: request.name,
            path_pattern: request.path_pattern,
            permissions: request.permissions,
            deny: request.deny,
            active: true,
            created_at: now,
            updated_at: now,
            row_version: 0,
        };

        match self.repo.insert_policy(policy).await {
            Ok(policy) => {
                self.audit.log_success(
                    ctx,
                    ops::POLICY_CREATE,
                    Some(&policy.path_pattern),
                    "policy",
                    Some(policy.id.to_string()),
                    None,
                );
                Ok(policy)
            }
            Err(err) => {
                self.audit
                    .log_failure(ctx, ops::POLICY_CREATE, None, "policy", None, &err.to_string());
                Err(err)
            }
        }
    }

    pub async fn set_policy_active(
        &self,
        ctx: &OperationContext,
        policy_id: Uuid,
        active: bool,
    ) -> Result<AccessPolicy> {
        let mut policy = self
            .repo
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("policy {policy_id}")))?;
        policy.active = active;
        let policy = self.repo.save_policy(policy).await?;
        self.audit.log_success(
            ctx,
            ops::POLICY_UPDATE,
            Some(&policy.path_pattern),
            "policy",
            Some(policy.id.to_string()),
            Some(serde_json::json!({ "active": active })),
        );
        Ok(policy)
    }

    pub async fn delete_policy(&self, ctx: &OperationContext, policy_id: Uuid) -> Result<()> {
        self.repo.delete_policy(policy_id).await?;
        self.audit.log_success(
            ctx,
            ops::POLICY_DELETE,
            None,
            "policy",
            Some(policy_id.to_string()),
            None,
        );
        Ok(())
    }

    pub async fn list_policies(&self, team_id: Uuid) -> Result<Vec<AccessPolicy>> {
        self.repo.list_policies(team_id).await
    }

    pub async fn bind(
        &self,
        ctx: &OperationContext,
        policy_id: Uuid,
        binding_type: BindingType,
        target_id: String,
    ) -> Result<PolicyBinding> {
        self.repo
            .get_policy(policy_id)
            .await?
            .ok_or_else(|| VaultError::NotFound(format!("policy {policy_id}")))?;

        let now = chrono::Utc::now();
        let binding = self
            .repo
            .insert_binding(PolicyBinding {
                id: Uuid::new_v4(),
                policy_id,
                binding_type,
                target_id,
                active: true,
                created_at: now,
                updated_at: now,
            })
            .await?;
        self.audit.log_success(
            ctx,
            ops::BIND,
            None,
            "policy-binding",
            Some(binding.id.to_string()),
            Some(serde_json::json!({ "policy_id": policy_id })),
        );
        Ok(binding)
    }

    pub async fn unbind(&self, ctx: &OperationContext, binding_id: Uuid) -> Result<()> {
        self.repo.delete_binding(binding_id).await?;
        self.audit.log_success(
            ctx,
            ops::UNBIND,
            None,
            "policy-binding",
            Some(binding_id.to_string()),
            None,
        );
        Ok(())
    }

    pub async fn list_bindings(&self, policy_id: Uuid) -> Result<Vec<PolicyBinding>> {
        self.repo.list_bindings(policy_id).await
    }

    /// Decide `(user, team, path, permission)` over USER and TEAM bindings.
    pub async fn evaluate(
        &self,
        user_id: &str,
        team_id: Uuid,
        path: &str,
        permission: Permission,
    ) -> Result<AccessDecision> {
        let targets = [
            (BindingType::User, user_id.to_string()),
            (BindingType::Team, team_id.to_string()),
        ];
        self.evaluate_targets(&targets, team_id, path, permission)
            .await
    }

    /// Same decision procedure over SERVICE bindings.
    pub async fn evaluate_service_access(
        &self,
        service_id: &str,
        team_id: Uuid,
        path: &str,
        permission: Permission,
    ) -> Result<AccessDecision> {
        let targets = [(BindingType::Service, service_id.to_string())];
        self.evaluate_targets(&targets, team_id, path, permission)
            .await
    }

    async fn evaluate_targets(
        &self,
        targets: &[(BindingType, String)],
        team_id: Uuid,
        path: &str,
        permission: Permission,
    ) -> Result<AccessDecision> {
        let bindings = self.repo.bindings_for_targets(targets).await?;

        let mut allow: Option<AccessPolicy> = None;
        for binding in bindings {
            let Some(policy) = self.repo.get_policy(binding.policy_id).await? else {
                continue;
            };
            if !policy.active || policy.team_id != team_id {
                continue;
            }
            if !policy.permissions.contains(&permission) {
                continue;
            }
            if !path_matches(&policy.path_pattern, path) {
                continue;
            }
            if policy.deny {
                // A single matching deny settles it.
                return Ok(AccessDecision {
                    outcome: AccessOutcome::Denied,
                    policy_id: Some(policy.id),
                    policy_name: Some(policy.name),
                });
            }
            allow.get_or_insert(policy);
        }

        Ok(match allow {
            Some(policy) => AccessDecision {
                outcome: AccessOutcome::Allowed,
                policy_id: Some(policy.id),
                policy_name: Some(policy.name),
            },
            None => AccessDecision {
                outcome: AccessOutcome::DefaultDenied,
                policy_id: None,
                policy_name: None,
            },
        })
    }
}
