//! JWT validation for user access tokens.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only HS256 is accepted; other `alg` headers are rejected before verification
//! - Expiration and issued-at claims are validated with clock skew tolerance
//! - Generic error messages prevent information leakage

use crate::auth::claims::Claims;
use crate::errors::MatchError;
use common::jwt::{extract_alg, validate_iat};
use common::secret::{ExposeSecret, SecretString};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::time::Duration;
use tracing::instrument;

const INVALID_TOKEN_MESSAGE: &str = "The access token is invalid or expired";

/// HS256 validator for tokens minted by the external auth service.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    clock_skew: Duration,
}

impl JwtValidator {
    /// Create a new JWT validator.
    ///
    /// # Arguments
    ///
    /// * `secret` - Shared HS256 secret
    /// * `clock_skew` - Tolerance for `iat` in the future
    pub fn new(secret: &SecretString, clock_skew: Duration) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.expose_secret().as_bytes()),
            clock_skew,
        }
    }

    /// Validate a JWT and return the claims.
    ///
    /// # Security Checks
    ///
    /// 1. Size check and `alg` extraction (via `common::jwt`)
    /// 2. Reject anything but HS256
    /// 3. Verify signature and `exp`
    /// 4. Validate `iat` with clock skew tolerance
    ///
    /// # Errors
    ///
    /// Returns `MatchError::InvalidToken` for all validation failures with a
    /// generic message.
    #[instrument(skip_all)]
    pub fn validate(&self, token: &str) -> Result<Claims, MatchError> {
        let alg = extract_alg(token).map_err(|e| {
            tracing::debug!(target: "match.auth.jwt", error = ?e, "Token header rejected");
            invalid_token()
        })?;

        if alg != "HS256" {
            tracing::warn!(target: "match.auth.jwt", alg = %alg, "Unexpected token algorithm");
            return Err(invalid_token());
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(target: "match.auth.jwt", error = %e, "Token verification failed");
                invalid_token()
            })?
            .claims;

        if let Err(e) = validate_iat(claims.iat, self.clock_skew) {
            tracing::debug!(target: "match.auth.jwt", error = ?e, "Token iat validation failed");
            return Err(invalid_token());
        }

        if claims.sub.is_empty() {
            tracing::debug!(target: "match.auth.jwt", "Token has an empty subject");
            return Err(invalid_token());
        }

        tracing::debug!(target: "match.auth.jwt", "Token validated successfully");
        Ok(claims)
    }
}

fn invalid_token() -> MatchError {
    MatchError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string())
}
