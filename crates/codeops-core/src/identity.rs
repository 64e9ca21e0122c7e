//! Identity adapter
//!
//! Validates externally issued bearer tokens (HS256, shared secret) and
//! yields the acting principal. This service never issues tokens and keeps
//! no blacklist: a token is good until its embedded expiry.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, VaultError};

/// Minimum length of the shared signing secret.
pub const MIN_SIGNING_KEY_LEN: usize = 32;

#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub team_id: Uuid,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl Principal {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(rename = "teamId")]
    team_id: String,
    #[serde(default)]
    roles: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    #[allow(dead_code)]
    exp: u64,
}

pub struct IdentityAdapter {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl IdentityAdapter {
    pub fn new(signing_key: &str) -> Result<Self> {
        if signing_key.len() < MIN_SIGNING_KEY_LEN {
            return Err(VaultError::InvalidInput(format!(
                "token signing key must be at least {MIN_SIGNING_KEY_LEN} bytes"
            )));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        // `exp` must genuinely be in the future.
        validation.leeway = 0;
        Ok(Self {
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
            validation,
        })
    }

    /// Expired, malformed, or badly signed tokens yield no principal.
    pub fn authenticate(&self, token: &str) -> Option<Principal> {
        let data = match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
        {
            Ok(data) => data,
            Err(err) => {
                debug!(error = %err, "bearer token rejected");
                return None;
            }
        };

        let user_id = Uuid::parse_str(&data.claims.sub).ok()?;
        let team_id = Uuid::parse_str(&data.claims.team_id).ok()?;
        Some(Principal {
            user_id,
            team_id,
            roles: data.claims.roles,
            permissions: data.claims.permissions,
        })
    }
}
