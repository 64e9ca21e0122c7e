//! Seal service
//!
//! Process-local gate in front of every protected operation. The master key
//! is configured at startup; what the seal state machine tracks is whether
//! enough Shamir shares have been presented to prove the operator holds it.
//! State is never persisted and all mutations run under one critical
//! section. Nothing under the lock touches I/O.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use codeops_crypto::engine::AES_KEY_SIZE;
use codeops_crypto::shamir;

use crate::error::{Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SealStatus {
    Sealed,
    Unsealing,
    Unsealed,
}

/// Non-mutating snapshot of the seal state.
#[derive(Debug, Clone, Serialize)]
pub struct SealInfo {
    pub status: SealStatus,
    pub total_shares: u8,
    pub threshold: u8,
    pub shares_collected: u8,
    pub last_sealed_at: Option<DateTime<Utc>>,
    pub last_unsealed_at: Option<DateTime<Utc>>,
}

struct SealState {
    status: SealStatus,
    /// Index-prefixed shares accumulated so far.
    pending_shares: Vec<Vec<u8>>,
    pending_indices: HashSet<u8>,
    last_sealed_at: Option<DateTime<Utc>>,
    last_unsealed_at: Option<DateTime<Utc>>,
}

pub struct SealService {
    master_key: Vec<u8>,
    total_shares: u8,
    threshold: u8,
    state: Mutex<SealState>,
}

impl SealService {
    /// `auto_unseal` starts the service unsealed; otherwise the first
    /// protected call fails until enough shares arrive.
    pub fn new(master_key: &str, total_shares: u8, threshold: u8, auto_unseal: bool) -> Result<Self> {
        if master_key.len() < AES_KEY_SIZE {
            return Err(VaultError::InvalidInput(format!(
                "master key must be at least {AES_KEY_SIZE} bytes"
            )));
        }
        if threshold == 0 || threshold > total_shares {
            return Err(VaultError::InvalidInput(format!(
                "threshold {threshold} must lie in 1..={total_shares}"
            )));
        }

        let now = Utc::now();
        let state = SealState {
            status: if auto_unseal {
                SealStatus::Unsealed
            } else {
                SealStatus::Sealed
            },
            pending_shares: Vec::new(),
            pending_indices: HashSet::new(),
            last_sealed_at: None,
            last_unsealed_at: auto_unseal.then_some(now),
        };
        if auto_unseal {
            info!("seal service starting unsealed (auto-unseal)");
        }

        Ok(Self {
            master_key: master_key.as_bytes().to_vec(),
            total_shares,
            threshold,
            state: Mutex::new(state),
        })
    }

    /// The gate. Every protected component call begins here.
    pub fn require_unsealed(&self) -> Result<()> {
        let state = self.state.lock().expect("seal lock poisoned");
        if state.status == SealStatus::Unsealed {
            Ok(())
        } else {
            Err(VaultError::Sealed)
        }
    }

    pub fn status(&self) -> SealStatus {
        self.state.lock().expect("seal lock poisoned").status
    }

    pub fn seal_info(&self) -> SealInfo {
        let state = self.state.lock().expect("seal lock poisoned");
        SealInfo {
            status: state.status,
            total_shares: self.total_shares,
            threshold: self.threshold,
            shares_collected: state.pending_shares.len() as u8,
            last_sealed_at: state.last_sealed_at,
            last_unsealed_at: state.last_unsealed_at,
        }
    }

    /// Seal from UNSEALED or UNSEALING. Clears any collected shares.
    pub fn seal(&self) -> Result<SealInfo> {
        let mut state = self.state.lock().expect("seal lock poisoned");
        if state.status == SealStatus::Sealed {
            return Err(VaultError::InvalidInput("vault is already sealed".into()));
        }
        state.status = SealStatus::Sealed;
        state.pending_shares.clear();
        state.pending_indices.clear();
        state.last_sealed_at = Some(Utc::now());
        info!("vault sealed");
        Ok(self.snapshot(&state))
    }

    /// Submit one base64 share. At the threshold the master key is
    /// reconstructed and verified; a mismatch resets to SEALED.
    pub fn submit_key_share(&self, encoded: &str) -> Result<SealInfo> {
        let share = shamir::decode_share(encoded)?;
        let index = share[0];
        if index == 0 || index > self.total_shares {
            return Err(VaultError::InvalidInput(format!(
                "share index {index} must lie in 1..={}",
                self.total_shares
            )));
        }

        let mut state = self.state.lock().expect("seal lock poisoned");
        if state.status == SealStatus::Unsealed {
            return Err(VaultError::InvalidInput("vault is already unsealed".into()));
        }
        if state.pending_indices.contains(&index) {
            return Err(VaultError::InvalidInput(format!(
                "share index {index} was already submitted"
            )));
        }

        state.pending_shares.push(share);
        state.pending_indices.insert(index);
        state.status = SealStatus::Unsealing;

        if state.pending_shares.len() < self.threshold as usize {
            return Ok(self.snapshot(&state));
        }

        // Threshold reached: reconstruct and verify against the configured
        // master key. On mismatch everything resets so an operator can
        // start over with the right shares.
        let reconstructed = shamir::combine(&state.pending_shares);
        state.pending_shares.clear();
        state.pending_indices.clear();

        match reconstructed {
            Ok(candidate)
                if candidate.len() >= AES_KEY_SIZE
                    && candidate[..AES_KEY_SIZE] == self.master_key[..AES_KEY_SIZE] =>
            {
                state.status = SealStatus::Unsealed;
                state.last_unsealed_at = Some(Utc::now());
                info!("vault unsealed");
                Ok(self.snapshot(&state))
            }
            _ => {
                state.status = SealStatus::Sealed;
                warn!("share reconstruction did not match the master key; resealing");
                Err(VaultError::IntegrityFailure(
                    "reconstructed key does not match the master key".into(),
                ))
            }
        }
    }

    /// Split the master key into transport-encoded shares. Advisory output:
    /// the caller stores them externally. Permitted only while unsealed.
    pub fn generate_key_shares(&self) -> Result<Vec<String>> {
        {
            let state = self.state.lock().expect("seal lock poisoned");
            if state.status != SealStatus::Unsealed {
                return Err(VaultError::Sealed);
            }
        }
        let shares = shamir::split(&self.master_key, self.total_shares, self.threshold)?;
        Ok(shares.iter().map(|s| shamir::encode_share(s)).collect())
    }

    fn snapshot(&self, state: &SealState) -> SealInfo {
        SealInfo {
            status: state.status,
            total_shares: self.total_shares,
            threshold: self.threshold,
            shares_collected: state.pending_shares.len() as u8,
            last_sealed_at: state.last_sealed_at,
            last_unsealed_at: state.last_unsealed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "0123456789abcdef0123456789abcdef";

    fn unsealed_service() -> SealService {
        SealService::new(MASTER, 5, 3, true).unwrap()
    }

    #[test]
    fn auto_unseal_opens_the_gate() {
        let service = unsealed_service();
        assert_eq!(service.status(), SealStatus::Unsealed);
        assert!(service.require_unsealed().is_ok());
    }

    #[test]
    fn sealed_start_refuses_protected_calls() {
        let service = SealService::new(MASTER, 5, 3, false).unwrap();
        assert_eq!(service.status(), SealStatus::Sealed);
        assert!(matches!(service.require_unsealed(), Err(VaultError::Sealed)));
    }

    #[test]
    fn three_of_five_unseals() {
        let service = unsealed_service();
        let shares = service.generate_key_shares().unwrap();
        assert_eq!(shares.len(), 5);

        service.seal().unwrap();
        assert!(service.require_unsealed().is_err());

        // Any three shares, in any order.
        let info = service.submit_key_share(&shares[4]).unwrap();
        assert_eq!(info.status, SealStatus::Unsealing);
        assert_eq!(info.shares_collected, 1);

        let info = service.submit_key_share(&shares[1]).unwrap();
        assert_eq!(info.status, SealStatus::Unsealing);
        assert_eq!(info.shares_collected, 2);

        let info = service.submit_key_share(&shares[2]).unwrap();
        assert_eq!(info.status, SealStatus::Unsealed);
        assert!(service.require_unsealed().is_ok());
    }

    #[test]
    fn duplicate_share_index_is_rejected() {
        let service = unsealed_service();
        let shares = service.generate_key_shares().unwrap();
        service.seal().unwrap();

        service.submit_key_share(&shares[0]).unwrap();
        let err = service.submit_key_share(&shares[0]).unwrap_err();
        assert_eq!(err.kind(), "invalid-input");
        assert_eq!(service.seal_info().shares_collected, 1);
    }

    #[test]
    fn foreign_share_resets_to_sealed() {
        let service = unsealed_service();
        let shares = service.generate_key_shares().unwrap();

        let other = SealService::new("ffffffffffffffffffffffffffffffff", 5, 3, true).unwrap();
        let foreign = other.generate_key_shares().unwrap();

        service.seal().unwrap();
        service.submit_key_share(&shares[0]).unwrap();
        service.submit_key_share(&shares[1]).unwrap();

        // Third share from a different master key: reconstruction runs and
        // the mismatch resets everything.
        let err = service.submit_key_share(&foreign[2]).unwrap_err();
        assert_eq!(err.kind(), "integrity-failure");
        assert_eq!(service.status(), SealStatus::Sealed);
        assert_eq!(service.seal_info().shares_collected, 0);

        // A clean run still works afterwards.
        service.submit_key_share(&shares[0]).unwrap();
        service.submit_key_share(&shares[2]).unwrap();
        let info = service.submit_key_share(&shares[3]).unwrap();
        assert_eq!(info.status, SealStatus::Unsealed);
    }

    #[test]
    fn share_generation_requires_unsealed() {
        let service = SealService::new(MASTER, 5, 3, false).unwrap();
        assert!(matches!(
            service.generate_key_shares(),
            Err(VaultError::Sealed)
        ));
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        let service = unsealed_service();
        service.seal().unwrap();

        // Index 9 with n=5.
        let bogus = codeops_crypto::shamir::encode_share(&[9u8, 1, 2, 3]);
        let err = service.submit_key_share(&bogus).unwrap_err();
        assert_eq!(err.kind(), "invalid-input");

        assert!(service.submit_key_share("not base64 at all").is_err());
    }
}
