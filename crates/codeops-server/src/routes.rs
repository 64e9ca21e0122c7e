//! HTTP routes
//!
//! Thin translation between the wire protocol and the core services. Every
//! request/response type lives here; handlers validate nothing beyond
//! shape, business rules belong to the services.

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{middleware, Extension, Json, Router};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use codeops_core::audit::AuditQueryParams;
use codeops_core::leases::LeaseCredentials;
use codeops_core::policy::{AccessDecision, CreatePolicyRequest};
use codeops_core::rotation::RotationPolicyRequest;
use codeops_core::secrets::{CreateSecretRequest, SecretValue, UpdateSecretRequest};
use codeops_core::seal::SealInfo;
use codeops_core::store::{Page, SecretListFilter};
use codeops_core::transit::{TransitCiphertext, TransitDataKey, UpdateTransitKeyRequest};
use codeops_core::types::{
    AccessPolicy, AuditRecord, BindingType, DynamicLease, Permission, PolicyBinding,
    RotationHistoryRecord, RotationPolicy, RotationStrategy, Secret, SecretMetadataEntry,
    SecretType, SecretVersion, TransitKey,
};
use codeops_core::{OperationContext, Principal, VaultError};

use crate::auth::{authenticate, require_role, ADMIN_ROLE};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    // Seal status and share submission stay reachable while sealed and
    // before any token can be validated.
    let open = Router::new()
        .route("/v1/sys/seal-status", get(seal_status))
        .route("/v1/sys/unseal", post(submit_share));

    let protected = Router::new()
        .route("/v1/sys/seal", post(seal))
        .route("/v1/sys/generate-shares", post(generate_shares))
        .route("/v1/secrets", post(create_secret).get(list_secrets))
        .route("/v1/secrets/search", get(search_secrets))
        .route("/v1/secrets/paths", get(secret_paths))
        .route("/v1/secrets/expiring", get(expiring_secrets))
        .route(
            "/v1/secrets/:id",
            get(get_secret).put(update_secret).delete(delete_secret),
        )
        .route("/v1/secrets/:id/value", get(read_value))
        .route("/v1/secrets/:id/versions", get(list_versions))
        .route("/v1/secrets/:id/versions/:version/destroy", post(destroy_version))
        .route(
            "/v1/secrets/:id/metadata",
            get(get_metadata).put(replace_metadata),
        )
        .route(
            "/v1/secrets/:id/metadata/:key",
            put(set_metadata).delete(remove_metadata),
        )
        .route(
            "/v1/secrets/:id/rotation",
            get(get_rotation_policy)
                .put(upsert_rotation_policy)
                .delete(delete_rotation_policy),
        )
        .route("/v1/secrets/:id/rotate", post(rotate_now))
        .route("/v1/secrets/:id/rotation/history", get(rotation_history))
        .route("/v1/secrets/:id/leases/revoke-all", post(revoke_all_leases))
        .route("/v1/policies", post(create_policy).get(list_policies))
        .route("/v1/policies/:id", delete(delete_policy).patch(set_policy_active))
        .route("/v1/policies/:id/bindings", post(bind_policy).get(list_bindings))
        .route("/v1/bindings/:id", delete(unbind_policy))
        .route("/v1/access/evaluate", post(evaluate_access))
        .route("/v1/leases", post(create_lease))
        .route("/v1/leases/:lease_id", get(get_lease))
        .route("/v1/leases/:lease_id/revoke", post(revoke_lease))
        .route("/v1/transit/keys", post(create_transit_key).get(list_transit_keys))
        .route(
            "/v1/transit/keys/:name",
            get(get_transit_key)
                .patch(update_transit_key)
                .delete(delete_transit_key),
        )
        .route("/v1/transit/keys/:name/rotate", post(rotate_transit_key))
        .route("/v1/transit/keys/:name/encrypt", post(transit_encrypt))
        .route("/v1/transit/keys/:name/decrypt", post(transit_decrypt))
        .route("/v1/transit/keys/:name/rewrap", post(transit_rewrap))
        .route("/v1/transit/keys/:name/datakey", post(transit_data_key))
        .route("/v1/audit", get(query_audit))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate));

    open.merge(protected).with_state(state)
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    offset: Option<usize>,
    limit: Option<usize>,
}

impl PageQuery {
    fn page(&self) -> Page {
        let default = Page::default();
        Page {
            offset: self.offset.unwrap_or(default.offset),
            limit: self.limit.unwrap_or(default.limit).min(500),
        }
    }
}

// ---- seal ----

async fn seal_status(State(state): State<AppState>) -> Json<SealInfo> {
    Json(state.seal.seal_info())
}

#[derive(Debug, Deserialize)]
struct UnsealRequest {
    share: String,
}

async fn submit_share(
    State(state): State<AppState>,
    Json(request): Json<UnsealRequest>,
) -> ApiResult<Json<SealInfo>> {
    Ok(Json(state.seal.submit_key_share(&request.share)?))
}

async fn seal(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<SealInfo>> {
    require_role(&principal, ADMIN_ROLE)?;
    Ok(Json(state.seal.seal()?))
}

#[derive(Debug, Serialize)]
struct SharesResponse {
    shares: Vec<String>,
}

async fn generate_shares(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<SharesResponse>> {
    require_role(&principal, ADMIN_ROLE)?;
    Ok(Json(SharesResponse {
        shares: state.seal.generate_key_shares()?,
    }))
}

// ---- secrets ----

#[derive(Debug, Deserialize)]
struct CreateSecretBody {
    path: String,
    name: String,
    description: Option<String>,
    #[serde(default = "default_secret_type")]
    secret_type: SecretType,
    value: Option<String>,
    metadata: Option<Vec<(String, String)>>,
    max_versions: Option<i32>,
    retention_days: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    owner: Option<String>,
    external_reference: Option<String>,
}

fn default_secret_type() -> SecretType {
    SecretType::Static
}

async fn create_secret(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Json(body): Json<CreateSecretBody>,
) -> ApiResult<Json<Secret>> {
    let request = CreateSecretRequest {
        path: body.path,
        name: body.name,
        description: body.description,
        secret_type: body.secret_type,
        value: body.value,
        metadata: body.metadata,
        max_versions: body.max_versions,
        retention_days: body.retention_days,
        expires_at: body.expires_at,
        owner: body.owner,
        external_reference: body.external_reference,
    };
    Ok(Json(
        state
            .secrets
            .create(&ctx, principal.team_id, request)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    secret_type: Option<SecretType>,
    path_prefix: Option<String>,
    active_only: Option<bool>,
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn list_secrets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Secret>>> {
    // One filter applies, in priority order.
    let filter = if let Some(secret_type) = query.secret_type {
        SecretListFilter::Type(secret_type)
    } else if let Some(prefix) = query.path_prefix {
        SecretListFilter::PathPrefix(prefix)
    } else if query.active_only.unwrap_or(false) {
        SecretListFilter::ActiveOnly
    } else {
        SecretListFilter::All
    };
    let page = PageQuery {
        offset: query.offset,
        limit: query.limit,
    }
    .page();
    Ok(Json(
        state.secrets.list(principal.team_id, &filter, page).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: String,
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn search_secrets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Secret>>> {
    let page = PageQuery {
        offset: query.offset,
        limit: query.limit,
    }
    .page();
    Ok(Json(
        state.secrets.search(principal.team_id, &query.q, page).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct PathsQuery {
    #[serde(default)]
    prefix: String,
}

async fn secret_paths(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<PathsQuery>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(
        state.secrets.paths(principal.team_id, &query.prefix).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct ExpiringQuery {
    #[serde(default = "default_expiring_hours")]
    hours: i64,
}

fn default_expiring_hours() -> i64 {
    24
}

async fn expiring_secrets(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<ExpiringQuery>,
) -> ApiResult<Json<Vec<Secret>>> {
    Ok(Json(
        state.secrets.expiring(principal.team_id, query.hours).await?,
    ))
}

async fn get_secret(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Secret>> {
    Ok(Json(state.secrets.get(principal.team_id, id).await?))
}

#[derive(Debug, Deserialize)]
struct UpdateSecretBody {
    name: Option<String>,
    description: Option<String>,
    value: Option<String>,
    change_description: Option<String>,
    max_versions: Option<i32>,
    retention_days: Option<i32>,
    expires_at: Option<DateTime<Utc>>,
    owner: Option<String>,
    external_reference: Option<String>,
}

async fn update_secret(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateSecretBody>,
) -> ApiResult<Json<Secret>> {
    let request = UpdateSecretRequest {
        name: body.name,
        description: body.description,
        value: body.value,
        change_description: body.change_description,
        max_versions: body.max_versions,
        retention_days: body.retention_days,
        expires_at: body.expires_at,
        owner: body.owner,
        external_reference: body.external_reference,
    };
    Ok(Json(
        state
            .secrets
            .update(&ctx, principal.team_id, id, request)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    #[serde(default)]
    hard: bool,
}

async fn delete_secret(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    if query.hard {
        state.secrets.hard_delete(&ctx, principal.team_id, id).await?;
    } else {
        state.secrets.soft_delete(&ctx, principal.team_id, id).await?;
    }
    Ok(Json(serde_json::json!({ "deleted": true, "hard": query.hard })))
}

#[derive(Debug, Deserialize)]
struct ReadValueQuery {
    version: Option<i32>,
}

async fn read_value(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Query(query): Query<ReadValueQuery>,
) -> ApiResult<Json<SecretValue>> {
    Ok(Json(
        state
            .secrets
            .read_value(&ctx, principal.team_id, id, query.version)
            .await?,
    ))
}

/// Version listing without envelope ciphertexts.
#[derive(Debug, Serialize)]
struct VersionInfo {
    version_number: i32,
    destroyed: bool,
    change_description: Option<String>,
    created_by: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<SecretVersion> for VersionInfo {
    fn from(version: SecretVersion) -> Self {
        Self {
            version_number: version.version_number,
            destroyed: version.destroyed,
            change_description: version.change_description,
            created_by: version.created_by,
            created_at: version.created_at,
        }
    }
}

async fn list_versions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<VersionInfo>>> {
    let versions = state.secrets.list_versions(principal.team_id, id).await?;
    Ok(Json(versions.into_iter().map(VersionInfo::from).collect()))
}

async fn destroy_version(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path((id, version)): Path<(Uuid, i32)>,
) -> ApiResult<Json<VersionInfo>> {
    let destroyed = state
        .secrets
        .destroy_version(&ctx, principal.team_id, id, version)
        .await?;
    Ok(Json(destroyed.into()))
}

// ---- secret metadata ----

async fn get_metadata(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<SecretMetadataEntry>>> {
    Ok(Json(state.secrets.get_metadata(principal.team_id, id).await?))
}

async fn replace_metadata(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Json(pairs): Json<Vec<(String, String)>>,
) -> ApiResult<Json<Vec<SecretMetadataEntry>>> {
    Ok(Json(
        state
            .secrets
            .replace_metadata(principal.team_id, id, pairs)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct MetadataValue {
    value: String,
}

async fn set_metadata(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((id, key)): Path<(Uuid, String)>,
    Json(body): Json<MetadataValue>,
) -> ApiResult<Json<SecretMetadataEntry>> {
    Ok(Json(
        state
            .secrets
            .set_metadata(principal.team_id, id, &key, &body.value)
            .await?,
    ))
}

async fn remove_metadata(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((id, key)): Path<(Uuid, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .secrets
        .remove_metadata(principal.team_id, id, &key)
        .await?;
    Ok(Json(serde_json::json!({ "removed": true })))
}

// ---- rotation ----

#[derive(Debug, Deserialize)]
struct RotationPolicyBody {
    strategy: RotationStrategy,
    interval_hours: i64,
    random_length: Option<usize>,
    random_charset: Option<String>,
    external_api_url: Option<String>,
    external_api_headers: Option<String>,
    #[serde(default = "default_max_failures")]
    max_failures: i32,
}

fn default_max_failures() -> i32 {
    3
}

async fn upsert_rotation_policy(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<RotationPolicyBody>,
) -> ApiResult<Json<RotationPolicy>> {
    let request = RotationPolicyRequest {
        strategy: body.strategy,
        interval_hours: body.interval_hours,
        random_length: body.random_length,
        random_charset: body.random_charset,
        external_api_url: body.external_api_url,
        external_api_headers: body.external_api_headers,
        max_failures: body.max_failures,
    };
    Ok(Json(
        state
            .rotation
            .create_or_update_policy(&ctx, principal.team_id, id, request)
            .await?,
    ))
}

async fn get_rotation_policy(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<RotationPolicy>> {
    Ok(Json(state.rotation.get_policy(principal.team_id, id).await?))
}

async fn delete_rotation_policy(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .rotation
        .delete_policy(&ctx, principal.team_id, id)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn rotate_now(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Secret>> {
    // Scope check first; rotation itself works by secret id.
    state.secrets.get(principal.team_id, id).await?;
    state.rotation.rotate_secret(&ctx, id).await?;
    Ok(Json(state.secrets.get(principal.team_id, id).await?))
}

#[derive(Debug, Serialize)]
struct RotationHistoryResponse {
    records: Vec<RotationHistoryRecord>,
    total_attempts: u64,
    failed_attempts: u64,
}

async fn rotation_history(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> ApiResult<Json<RotationHistoryResponse>> {
    let records = state
        .rotation
        .history(principal.team_id, id, page.page())
        .await?;
    let (total_attempts, failed_attempts) =
        state.rotation.history_counts(principal.team_id, id).await?;
    Ok(Json(RotationHistoryResponse {
        records,
        total_attempts,
        failed_attempts,
    }))
}

// ---- policies ----

#[derive(Debug, Deserialize)]
struct CreatePolicyBody {
    name: String,
    path_pattern: String,
    permissions: Vec<Permission>,
    #[serde(default)]
    deny: bool,
}

async fn create_policy(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Json(body): Json<CreatePolicyBody>,
) -> ApiResult<Json<AccessPolicy>> {
    let request = CreatePolicyRequest {
        name: body.name,
        path_pattern: body.path_pattern,
        permissions: body.permissions,
        deny: body.deny,
    };
    Ok(Json(
        state
            .policies
            .create_policy(&ctx, principal.team_id, request)
            .await?,
    ))
}

async fn list_policies(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<AccessPolicy>>> {
    Ok(Json(state.policies.list_policies(principal.team_id).await?))
}

#[derive(Debug, Deserialize)]
struct PolicyPatch {
    active: bool,
}

async fn set_policy_active(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<PolicyPatch>,
) -> ApiResult<Json<AccessPolicy>> {
    Ok(Json(
        state.policies.set_policy_active(&ctx, id, body.active).await?,
    ))
}

async fn delete_policy(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.policies.delete_policy(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct BindRequest {
    binding_type: BindingType,
    target_id: String,
}

async fn bind_policy(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<BindRequest>,
) -> ApiResult<Json<PolicyBinding>> {
    Ok(Json(
        state
            .policies
            .bind(&ctx, id, body.binding_type, body.target_id)
            .await?,
    ))
}

async fn list_bindings(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<PolicyBinding>>> {
    Ok(Json(state.policies.list_bindings(id).await?))
}

async fn unbind_policy(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.policies.unbind(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct EvaluateRequest {
    user_id: Option<String>,
    service_id: Option<String>,
    path: String,
    permission: Permission,
}

async fn evaluate_access(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<EvaluateRequest>,
) -> ApiResult<Json<AccessDecision>> {
    let decision = match (&body.user_id, &body.service_id) {
        (_, Some(service_id)) => {
            state
                .policies
                .evaluate_service_access(service_id, principal.team_id, &body.path, body.permission)
                .await?
        }
        (user_id, None) => {
            let user = user_id
                .clone()
                .unwrap_or_else(|| principal.user_id.to_string());
            state
                .policies
                .evaluate(&user, principal.team_id, &body.path, body.permission)
                .await?
        }
    };
    Ok(Json(decision))
}

// ---- leases ----

#[derive(Debug, Deserialize)]
struct CreateLeaseRequest {
    secret_id: Uuid,
    ttl_seconds: Option<i64>,
}

async fn create_lease(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Json(body): Json<CreateLeaseRequest>,
) -> ApiResult<Json<LeaseCredentials>> {
    Ok(Json(
        state
            .leases
            .create_lease(&ctx, principal.team_id, body.secret_id, body.ttl_seconds)
            .await?,
    ))
}

async fn get_lease(
    State(state): State<AppState>,
    Path(lease_id): Path<String>,
) -> ApiResult<Json<DynamicLease>> {
    Ok(Json(state.leases.get_lease(&lease_id).await?))
}

async fn revoke_lease(
    State(state): State<AppState>,
    Extension(ctx): Extension<OperationContext>,
    Path(lease_id): Path<String>,
) -> ApiResult<Json<DynamicLease>> {
    Ok(Json(state.leases.revoke(&ctx, &lease_id).await?))
}

async fn revoke_all_leases(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    // Scope check against the caller's team before the sweep.
    state.secrets.get(principal.team_id, id).await?;
    let revoked = state.leases.revoke_all(&ctx, id).await?;
    Ok(Json(serde_json::json!({ "revoked": revoked })))
}

// ---- transit ----

#[derive(Debug, Deserialize)]
struct CreateTransitKeyRequest {
    name: String,
    description: Option<String>,
    #[serde(default)]
    is_exportable: bool,
}

async fn create_transit_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Json(body): Json<CreateTransitKeyRequest>,
) -> ApiResult<Json<TransitKey>> {
    Ok(Json(
        state
            .transit
            .create_key(
                &ctx,
                principal.team_id,
                &body.name,
                body.description,
                body.is_exportable,
            )
            .await?,
    ))
}

async fn list_transit_keys(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<TransitKey>>> {
    Ok(Json(state.transit.list_keys(principal.team_id).await?))
}

async fn get_transit_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(name): Path<String>,
) -> ApiResult<Json<TransitKey>> {
    Ok(Json(state.transit.get_key(principal.team_id, &name).await?))
}

async fn rotate_transit_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<TransitKey>> {
    Ok(Json(
        state.transit.rotate_key(&ctx, principal.team_id, &name).await?,
    ))
}

#[derive(Debug, Deserialize)]
struct UpdateTransitKeyBody {
    description: Option<String>,
    min_decryption_version: Option<i32>,
    is_deletable: Option<bool>,
    is_exportable: Option<bool>,
    active: Option<bool>,
}

async fn update_transit_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(name): Path<String>,
    Json(body): Json<UpdateTransitKeyBody>,
) -> ApiResult<Json<TransitKey>> {
    let request = UpdateTransitKeyRequest {
        description: body.description,
        min_decryption_version: body.min_decryption_version,
        is_deletable: body.is_deletable,
        is_exportable: body.is_exportable,
        active: body.active,
    };
    Ok(Json(
        state
            .transit
            .update_key(&ctx, principal.team_id, &name, request)
            .await?,
    ))
}

async fn delete_transit_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.transit.delete_key(&ctx, principal.team_id, &name).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Debug, Deserialize)]
struct TransitEncryptRequest {
    /// Base64-encoded plaintext.
    plaintext: String,
}

async fn transit_encrypt(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(name): Path<String>,
    Json(body): Json<TransitEncryptRequest>,
) -> ApiResult<Json<TransitCiphertext>> {
    let plaintext = BASE64
        .decode(&body.plaintext)
        .map_err(|_| ApiError(VaultError::InvalidInput("plaintext must be base64".into())))?;
    Ok(Json(
        state
            .transit
            .encrypt(&ctx, principal.team_id, &name, &plaintext)
            .await?,
    ))
}

#[derive(Debug, Deserialize)]
struct TransitDecryptRequest {
    ciphertext: String,
}

#[derive(Debug, Serialize)]
struct TransitDecryptResponse {
    /// Base64-encoded plaintext.
    plaintext: String,
}

async fn transit_decrypt(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(name): Path<String>,
    Json(body): Json<TransitDecryptRequest>,
) -> ApiResult<Json<TransitDecryptResponse>> {
    let plaintext = state
        .transit
        .decrypt(&ctx, principal.team_id, &name, &body.ciphertext)
        .await?;
    Ok(Json(TransitDecryptResponse {
        plaintext: BASE64.encode(plaintext),
    }))
}

async fn transit_rewrap(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(name): Path<String>,
    Json(body): Json<TransitDecryptRequest>,
) -> ApiResult<Json<TransitCiphertext>> {
    Ok(Json(
        state
            .transit
            .rewrap(&ctx, principal.team_id, &name, &body.ciphertext)
            .await?,
    ))
}

async fn transit_data_key(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Extension(ctx): Extension<OperationContext>,
    Path(name): Path<String>,
) -> ApiResult<Json<TransitDataKey>> {
    Ok(Json(
        state
            .transit
            .generate_data_key(&ctx, principal.team_id, &name)
            .await?,
    ))
}

// ---- audit ----

#[derive(Debug, Deserialize)]
struct AuditQuery {
    resource_type: Option<String>,
    resource_id: Option<String>,
    user_id: Option<String>,
    operation: Option<String>,
    path: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    failures_only: bool,
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn query_audit(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<Vec<AuditRecord>>> {
    let params = AuditQueryParams {
        resource_type: query.resource_type,
        resource_id: query.resource_id,
        user_id: query.user_id,
        operation: query.operation,
        path: query.path,
        start: query.start,
        end: query.end,
        failures_only: query.failures_only,
    };
    let page = PageQuery {
        offset: query.offset,
        limit: query.limit,
    }
    .page();
    Ok(Json(state.audit.query(principal.team_id, params, page).await?))
}
