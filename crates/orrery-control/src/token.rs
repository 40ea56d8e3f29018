//! Claim-scoped bearer tokens.
//!
//! Two token families share this machinery: user tokens (claim key
//! `user_id`) minted by the identity service, and job tokens (claim key
//! `model_id`) minted here so asynchronous job callbacks can authenticate
//! back to the control plane. A token is bound to exactly one claim value;
//! the callback path verifies the bound model id against the one the
//! callback names.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// Claim key for user tokens.
pub const USER_CLAIM: &str = "user_id";

/// Claim key for job tokens.
pub const MODEL_CLAIM: &str = "model_id";

/// TTL for the self-reporting token handed to a deployment job.
#[must_use]
pub fn job_token_ttl() -> Duration {
    Duration::days(30)
}

/// TTL for the one-shot update token returned by the clone operation.
#[must_use]
pub fn update_token_ttl() -> Duration {
    Duration::hours(1)
}

#[derive(Debug, Serialize, Deserialize)]
struct RawClaims {
    exp: i64,
    #[serde(flatten)]
    extra: HashMap<String, String>,
}

/// Mints and verifies claim-scoped tokens.
pub trait TokenSigner: Send + Sync {
    /// Issue a token binding `claim_key = claim_value`, expiring after `ttl`.
    fn issue(&self, claim_key: &str, claim_value: &str, ttl: Duration) -> ControlResult<String>;

    /// Verify a token and return the value bound to `claim_key`.
    fn verify(&self, token: &str, claim_key: &str) -> ControlResult<String>;
}

/// HS256 implementation of [`TokenSigner`].
#[derive(Clone)]
pub struct HsTokenSigner {
    secret: String,
}

impl HsTokenSigner {
    /// Create a signer over a shared secret.
    #[must_use]
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }
}

impl TokenSigner for HsTokenSigner {
    fn issue(&self, claim_key: &str, claim_value: &str, ttl: Duration) -> ControlResult<String> {
        let claims = RawClaims {
            exp: (Utc::now() + ttl).timestamp(),
            extra: HashMap::from([(claim_key.to_owned(), claim_value.to_owned())]),
        };

        let key = EncodingKey::from_secret(self.secret.as_bytes());
        encode(&Header::default(), &claims, &key)
            .map_err(|e| ControlError::token(format!("failed to sign token: {e}")))
    }

    fn verify(&self, token: &str, claim_key: &str) -> ControlResult<String> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let mut validation = Validation::default();
        validation.validate_aud = false;

        let data = decode::<RawClaims>(token, &key, &validation)
            .map_err(|e| ControlError::token(format!("invalid token: {e}")))?;

        data.claims
            .extra
            .get(claim_key)
            .cloned()
            .ok_or_else(|| ControlError::token(format!("token carries no {claim_key} claim")))
    }
}

impl std::fmt::Debug for HsTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HsTokenSigner").finish_non_exhaustive()
    }
}
