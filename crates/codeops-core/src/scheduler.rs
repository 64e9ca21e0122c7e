//! Scheduler harness
//!
//! Two independent periodic drivers: the rotation sweep and the lease
//! expiry sweep. Each runs on its own task so a slow rotation cannot wedge
//! request handling, and each awaits its sweep inline with
//! `MissedTickBehavior::Skip`, so a driver never overlaps itself. Both are
//! disabled in test mode via configuration.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::VaultConfig;
use crate::leases::LeaseService;
use crate::rotation::RotationService;

pub struct SchedulerHandles {
    rotation: JoinHandle<()>,
    leases: JoinHandle<()>,
}

impl SchedulerHandles {
    pub fn shutdown(self) {
        self.rotation.abort();
        self.leases.abort();
    }
}

/// Spawn both drivers. Returns `None` when the scheduler is disabled.
pub fn start(
    rotation: Arc<RotationService>,
    leases: Arc<LeaseService>,
    config: &VaultConfig,
) -> Option<SchedulerHandles> {
    if !config.scheduler_enabled {
        info!("schedulers disabled by configuration");
        return None;
    }

    let rotation_tick = Duration::from_secs(config.rotation_tick_seconds.max(1));
    let lease_tick = Duration::from_secs(config.lease_tick_seconds.max(1));

    let rotation_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(rotation_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match rotation.process_due_rotations().await {
                Ok(0) => {}
                Ok(count) => info!(count, "rotation sweep processed due policies"),
                // A sealed vault is routine at startup; anything else is not.
                Err(err) if err.kind() == "sealed" => {
                    debug!("rotation sweep skipped: vault sealed")
                }
                Err(err) => warn!(error = %err, "rotation sweep failed"),
            }
        }
    });

    let lease_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(lease_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match leases.process_expired_leases().await {
                Ok(0) => {}
                Ok(count) => info!(count, "lease sweep expired leases"),
                Err(err) if err.kind() == "sealed" => {
                    debug!("lease sweep skipped: vault sealed")
                }
                Err(err) => warn!(error = %err, "lease sweep failed"),
            }
        }
    });

    info!(
        rotation_tick_seconds = rotation_tick.as_secs(),
        lease_tick_seconds = lease_tick.as_secs(),
        "schedulers started"
    );
    Some(SchedulerHandles {
        rotation: rotation_task,
        leases: lease_task,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditSink;
    use crate::leases::{LeaseSettings, LoggingCredentialBackend};
    use crate::seal::SealService;
    use crate::secrets::SecretService;
    use crate::store::MemoryStore;
    use codeops_crypto::EncryptionEngine;

    const MASTER: &str = "0123456789abcdef0123456789abcdef";

    fn services() -> (Arc<RotationService>, Arc<LeaseService>) {
        let store = Arc::new(MemoryStore::new());
        let engine = Arc::new(EncryptionEngine::new(MASTER).unwrap());
        let seal = Arc::new(SealService::new(MASTER, 5, 3, true).unwrap());
        let audit = AuditSink::new(store.clone());
        let secrets = Arc::new(SecretService::new(
            store.clone(),
            engine.clone(),
            seal.clone(),
            audit.clone(),
        ));
        let rotation = Arc::new(
            RotationService::new(store.clone(), secrets, engine.clone(), seal.clone(), audit.clone())
                .unwrap(),
        );
        let leases = Arc::new(LeaseService::new(
            store.clone(),
            store,
            engine,
            seal,
            audit,
            Arc::new(LoggingCredentialBackend),
            LeaseSettings {
                execute_sql: false,
                default_ttl_seconds: 3600,
                max_ttl_seconds: 86_400,
                username_prefix: "cv_".into(),
                password_length: 24,
            },
        ));
        (rotation, leases)
    }

    #[tokio::test]
    async fn disabled_scheduler_spawns_nothing() {
        let (rotation, leases) = services();
        let config = VaultConfig {
            scheduler_enabled: false,
            ..VaultConfig::default()
        };
        assert!(start(rotation, leases, &config).is_none());
    }

    #[tokio::test]
    async fn drivers_tick_and_shut_down() {
        let (rotation, leases) = services();
        let config = VaultConfig {
            scheduler_enabled: true,
            rotation_tick_seconds: 1,
            lease_tick_seconds: 1,
            ..VaultConfig::default()
        };

        let handles = start(rotation, leases, &config).expect("schedulers should start");
        // Let both drivers take their first (immediate) tick.
        tokio::time::sleep(Duration::from_millis(50)).await;
        handles.shutdown();
    }
}
