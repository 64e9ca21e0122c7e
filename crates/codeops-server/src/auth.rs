//! Bearer-token authentication middleware
//!
//! Validates the `Authorization: Bearer` header through the identity
//! adapter and attaches the principal plus a per-operation context to the
//! request. Access control in handlers is role-based from the token; the
//! policy evaluator is exposed as its own endpoint for callers that want
//! path-level decisions.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use codeops_core::{OperationContext, Principal, VaultError};
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

/// Role required for seal management and share generation.
pub const ADMIN_ROLE: &str = "vault-admin";

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(principal) = token.and_then(|t| state.identity.authenticate(t)) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized", "message": "missing or invalid bearer token" })),
        )
            .into_response();
    };

    let ctx = OperationContext::for_user(principal.user_id.to_string(), principal.team_id)
        .with_request_attrs(
            header_value(&request, "x-forwarded-for"),
            header_value(&request, "x-correlation-id"),
        );

    request.extensions_mut().insert(principal);
    request.extensions_mut().insert(ctx);
    next.run(request).await
}

pub fn require_role(principal: &Principal, role: &str) -> Result<(), ApiError> {
    if principal.has_role(role) {
        Ok(())
    } else {
        Err(ApiError(VaultError::Forbidden(format!(
            "role {role} required"
        ))))
    }
}

fn header_value(request: &Request, name: &str) -> Option<String> {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
