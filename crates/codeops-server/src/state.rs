//! Shared application state

use std::sync::Arc;

use codeops_core::audit::AuditSink;
use codeops_core::config::VaultConfig;
use codeops_core::leases::{LeaseService, LeaseSettings, LoggingCredentialBackend};
use codeops_core::policy::PolicyService;
use codeops_core::rotation::RotationService;
use codeops_core::seal::SealService;
use codeops_core::secrets::SecretService;
use codeops_core::store::MemoryStore;
use codeops_core::transit::TransitService;
use codeops_core::{IdentityAdapter, Result};
use codeops_crypto::EncryptionEngine;

#[derive(Clone)]
pub struct AppState {
    pub seal: Arc<SealService>,
    pub secrets: Arc<SecretService>,
    pub rotation: Arc<RotationService>,
    pub leases: Arc<LeaseService>,
    pub transit: Arc<TransitService>,
    pub policies: Arc<PolicyService>,
    pub audit: AuditSink,
    pub identity: Arc<IdentityAdapter>,
}

impl AppState {
    /// Wire every service over the in-memory store. A production
    /// deployment substitutes repository implementations here.
    pub fn build(config: &VaultConfig) -> Result<Self> {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(EncryptionEngine::new(&config.master_key)?);
        let seal = Arc::new(SealService::new(
            &config.master_key,
            config.total_shares,
            config.threshold,
            config.auto_unseal,
        )?);
        let audit = AuditSink::new(store.clone());

        let secrets = Arc::new(SecretService::new(
            store.clone(),
            engine.clone(),
            seal.clone(),
            audit.clone(),
        ));
        let rotation = Arc::new(RotationService::new(
            store.clone(),
            secrets.clone(),
            engine.clone(),
            seal.clone(),
            audit.clone(),
        )?);
        let leases = Arc::new(LeaseService::new(
            store.clone(),
            store.clone(),
            engine.clone(),
            seal.clone(),
            audit.clone(),
            Arc::new(LoggingCredentialBackend),
            LeaseSettings {
                execute_sql: config.execute_sql,
                default_ttl_seconds: config.default_ttl_seconds,
                max_ttl_seconds: config.max_ttl_seconds,
                username_prefix: config.username_prefix.clone(),
                password_length: config.password_length,
            },
        ));
        let transit = Arc::new(TransitService::new(
            store.clone(),
            engine,
            seal.clone(),
            audit.clone(),
        ));
        let policies = Arc::new(PolicyService::new(store, audit.clone()));
        let identity = Arc::new(IdentityAdapter::new(&config.token_signing_key)?);

        Ok(Self {
            seal,
            secrets,
            rotation,
            leases,
            transit,
            policies,
            audit,
            identity,
        })
    }
}
