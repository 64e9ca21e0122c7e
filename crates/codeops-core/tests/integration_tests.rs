//! End-to-end flows across the vault core: unseal, store, rotate, lease,
//! transit, audit. The services are wired together the way the server
//! wires them.

use std::sync::Arc;

use codeops_core::audit::AuditQueryParams;
use codeops_core::leases::{LeaseService, LeaseSettings, LoggingCredentialBackend};
use codeops_core::rotation::{RotationPolicyRequest, RotationService};
use codeops_core::secrets::{CreateSecretRequest, SecretService, UpdateSecretRequest};
use codeops_core::seal::SealService;
use codeops_core::store::{MemoryStore, Page, SecretRepository};
use codeops_core::transit::TransitService;
use codeops_core::types::{RotationStrategy, SecretType};
use codeops_core::{AuditSink, OperationContext};
use codeops_crypto::EncryptionEngine;
use uuid::Uuid;

const MASTER: &str = "0123456789abcdef0123456789abcdef";

struct Vault {
    seal: Arc<SealService>,
    secrets: Arc<SecretService>,
    rotation: RotationService,
    leases: LeaseService,
    transit: TransitService,
    audit: AuditSink,
    store: Arc<MemoryStore>,
    team: Uuid,
    ctx: OperationContext,
}

fn vault(auto_unseal: bool) -> Vault {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(EncryptionEngine::new(MASTER).unwrap());
    let seal = Arc::new(SealService::new(MASTER, 5, 3, auto_unseal).unwrap());
    let audit = AuditSink::new(store.clone());
    let secrets = Arc::new(SecretService::new(
        store.clone(),
        engine.clone(),
        seal.clone(),
        audit.clone(),
    ));
    let rotation = RotationService::new(
        store.clone(),
        secrets.clone(),
        engine.clone(),
        seal.clone(),
        audit.clone(),
    )
    .unwrap();
    let leases = LeaseService::new(
        store.clone(),
        store.clone(),
        engine.clone(),
        seal.clone(),
        audit.clone(),
        Arc::new(LoggingCredentialBackend),
        LeaseSettings {
            execute_sql: false,
            default_ttl_seconds: 3600,
            max_ttl_seconds: 86_400,
            username_prefix: "cv_".into(),
            password_length: 24,
        },
    );
    let transit = TransitService::new(store.clone(), engine, seal.clone(), audit.clone());
    let team = Uuid::new_v4();
    let ctx = OperationContext::for_user("integration", team);
    Vault {
        seal,
        secrets,
        rotation,
        leases,
        transit,
        audit,
        store,
        team,
        ctx,
    }
}

fn static_secret(path: &str, value: &str) -> CreateSecretRequest {
    CreateSecretRequest {
        path: path.to_string(),
        name: path.rsplit('/').next().unwrap().to_string(),
        description: None,
        secret_type: SecretType::Static,
        value: Some(value.to_string()),
        metadata: None,
        max_versions: Some(3),
        retention_days: None,
        expires_at: None,
        owner: None,
        external_reference: None,
    }
}

#[tokio::test]
async fn unseal_then_full_secret_lifecycle() {
    let v = vault(false);

    // Everything is gated while sealed.
    let err = v
        .secrets
        .create(&v.ctx, v.team, static_secret("/db/password", "v1"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "sealed");

    // Operator unseals with 3 of 5 shares. Shares were cut while the vault
    // was up previously; reproduce that by generating from a twin service.
    let twin = SealService::new(MASTER, 5, 3, true).unwrap();
    let shares = twin.generate_key_shares().unwrap();
    v.seal.submit_key_share(&shares[0]).unwrap();
    v.seal.submit_key_share(&shares[2]).unwrap();
    v.seal.submit_key_share(&shares[4]).unwrap();
    assert!(v.seal.require_unsealed().is_ok());

    // Create, read, update through five values with max_versions=3.
    let secret = v
        .secrets
        .create(&v.ctx, v.team, static_secret("/db/password", "v1"))
        .await
        .unwrap();
    for value in ["v2", "v3", "v4", "v5"] {
        v.secrets
            .update(
                &v.ctx,
                v.team,
                secret.id,
                UpdateSecretRequest {
                    value: Some(value.to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    // Retention kept versions 3..=5; 1 and 2 are destroyed and unreadable.
    let versions = v.secrets.list_versions(v.team, secret.id).await.unwrap();
    let destroyed: Vec<i32> = versions
        .iter()
        .filter(|ver| ver.destroyed)
        .map(|ver| ver.version_number)
        .collect();
    assert_eq!(destroyed, vec![1, 2]);
    assert_eq!(
        v.secrets
            .read_value(&v.ctx, v.team, secret.id, None)
            .await
            .unwrap()
            .value,
        "v5"
    );
    assert_eq!(
        v.secrets
            .read_value(&v.ctx, v.team, secret.id, Some(2))
            .await
            .unwrap_err()
            .kind(),
        "invalid-input"
    );

    // Sealing again closes the gate.
    v.seal.seal().unwrap();
    assert_eq!(
        v.secrets
            .read_value(&v.ctx, v.team, secret.id, None)
            .await
            .unwrap_err()
            .kind(),
        "sealed"
    );
}

#[tokio::test]
async fn rotation_policy_drives_new_versions_and_history() {
    let v = vault(true);
    let secret = v
        .secrets
        .create(&v.ctx, v.team, static_secret("/svc/token", "seed"))
        .await
        .unwrap();

    v.rotation
        .create_or_update_policy(
            &v.ctx,
            v.team,
            secret.id,
            RotationPolicyRequest {
                strategy: RotationStrategy::RandomGenerate,
                interval_hours: 12,
                random_length: Some(40),
                random_charset: Some("hex".into()),
                external_api_url: None,
                external_api_headers: None,
                max_failures: 3,
            },
        )
        .await
        .unwrap();

    v.rotation.rotate_secret(&v.ctx, secret.id).await.unwrap();

    let value = v
        .secrets
        .read_value(&v.ctx, v.team, secret.id, None)
        .await
        .unwrap();
    assert_eq!(value.version, 2);
    assert_eq!(value.value.len(), 40);
    assert!(value.value.chars().all(|c| "0123456789abcdef".contains(c)));

    let history = v
        .rotation
        .history(v.team, secret.id, Page::default())
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    let last = v
        .rotation
        .last_successful(v.team, secret.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.new_version, Some(2));
}

#[tokio::test]
async fn lease_lifecycle_over_a_dynamic_secret() {
    let v = vault(true);
    let secret = v
        .secrets
        .create(
            &v.ctx,
            v.team,
            CreateSecretRequest {
                path: "/db/orders".into(),
                name: "orders".into(),
                description: None,
                secret_type: SecretType::Dynamic,
                value: None,
                metadata: Some(vec![
                    ("backendType".into(), "postgresql".into()),
                    ("host".into(), "db.internal".into()),
                    ("port".into(), "5432".into()),
                    ("database".into(), "orders".into()),
                    ("adminUsername".into(), "admin".into()),
                    ("adminPassword".into(), "admin-pw".into()),
                ]),
                max_versions: None,
                retention_days: None,
                expires_at: None,
                owner: None,
                external_reference: None,
            },
        )
        .await
        .unwrap();

    let credentials = v
        .leases
        .create_lease(&v.ctx, v.team, secret.id, Some(600))
        .await
        .unwrap();
    assert!(credentials.username.starts_with("cv_orders_"));

    // Hard-deleting the secret leaves the lease queryable by plain id.
    v.secrets.hard_delete(&v.ctx, v.team, secret.id).await.unwrap();
    let lease = v.leases.get_lease(&credentials.lease_id).await.unwrap();
    assert_eq!(lease.secret_path, "/db/orders");

    let revoked = v.leases.revoke(&v.ctx, &credentials.lease_id).await.unwrap();
    assert_eq!(revoked.status, codeops_core::types::LeaseStatus::Revoked);
}

#[tokio::test]
async fn transit_keys_serve_rotating_envelopes() {
    let v = vault(true);
    v.transit
        .create_key(&v.ctx, v.team, "payments", None, false)
        .await
        .unwrap();

    let sealed = v
        .transit
        .encrypt(&v.ctx, v.team, "payments", b"pan-4242")
        .await
        .unwrap();
    v.transit.rotate_key(&v.ctx, v.team, "payments").await.unwrap();

    // Old ciphertext still opens, then gets rewrapped forward.
    assert_eq!(
        v.transit
            .decrypt(&v.ctx, v.team, "payments", &sealed.ciphertext)
            .await
            .unwrap(),
        b"pan-4242"
    );
    let rewrapped = v
        .transit
        .rewrap(&v.ctx, v.team, "payments", &sealed.ciphertext)
        .await
        .unwrap();
    assert_eq!(rewrapped.key_version, 2);
}

#[tokio::test]
async fn audit_records_accumulate_and_filter() {
    let v = vault(true);
    let secret = v
        .secrets
        .create(&v.ctx, v.team, static_secret("/a/b", "v1"))
        .await
        .unwrap();
    v.secrets
        .read_value(&v.ctx, v.team, secret.id, None)
        .await
        .unwrap();
    let _ = v
        .secrets
        .read_value(&v.ctx, v.team, secret.id, Some(9))
        .await;

    // Audit writes are detached; let them land.
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }

    let reads = v
        .audit
        .query(
            v.team,
            AuditQueryParams {
                operation: Some("READ".into()),
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(reads.len(), 2);

    let failures = v
        .audit
        .query(
            v.team,
            AuditQueryParams {
                failures_only: true,
                ..Default::default()
            },
            Page::default(),
        )
        .await
        .unwrap();
    assert_eq!(failures.len(), 1);
    assert!(!failures[0].success);

    // Primary state never depended on the audit writes.
    assert!(v.store.get_secret(secret.id).await.unwrap().is_some());
}
