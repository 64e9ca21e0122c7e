//! Per-operation request context
//!
//! Carries the acting principal and ambient request attributes the audit
//! sink records. Passed explicitly into every service call; there is no
//! thread-local channel.

use uuid::Uuid;

#[derive(Debug, Clone, Default)]
pub struct OperationContext {
    /// Who is acting (user id or system actor like `scheduler`).
    pub actor: Option<String>,
    pub team_id: Option<Uuid>,
    pub client_ip: Option<String>,
    pub correlation_id: Option<String>,
}

impl OperationContext {
    /// Context for the internal schedulers and other system-driven work.
    pub fn system(actor: &str) -> Self {
        Self {
            actor: Some(actor.to_string()),
            ..Self::default()
        }
    }

    pub fn for_user(actor: impl Into<String>, team_id: Uuid) -> Self {
        Self {
            actor: Some(actor.into()),
            team_id: Some(team_id),
            client_ip: None,
            correlation_id: None,
        }
    }

    pub fn with_request_attrs(
        mut self,
        client_ip: Option<String>,
        correlation_id: Option<String>,
    ) -> Self {
        self.client_ip = client_ip;
        self.correlation_id = correlation_id;
        self
    }
}
