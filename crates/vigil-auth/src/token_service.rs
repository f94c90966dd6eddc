//! Token validation against the persistence collaborator.
//!
//! Lookup and scrypt verification run on the blocking thread pool; the
//! per-connection task only suspends, it never computes the KDF inline.

use std::sync::Arc;

use vigil_storage::TokenStore;

use crate::{burn_verification, verify_secret, AuthError};

/// Why a credential was rejected. The string forms are part of the wire
/// contract (`authentication failed: <reason>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    InvalidFormat,
    NotFound,
    Revoked,
    Expired,
    InvalidSecret,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::InvalidFormat => "invalid_format",
            InvalidReason::NotFound => "not_found",
            InvalidReason::Revoked => "revoked",
            InvalidReason::Expired => "expired",
            InvalidReason::InvalidSecret => "invalid_secret",
        }
    }
}

impl std::fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenValidation {
    Valid {
        token_id: String,
        scopes: Vec<String>,
    },
    Invalid {
        reason: InvalidReason,
    },
}

impl TokenValidation {
    fn invalid(reason: InvalidReason) -> Self {
        TokenValidation::Invalid { reason }
    }
}

/// Validates presented `tokenId.secret` credentials.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn TokenStore>,
}

impl TokenService {
    pub fn new(store: Arc<dyn TokenStore>) -> Self {
        Self { store }
    }

    /// Validate a presented credential.
    ///
    /// Check order: format, existence, revocation, lazy expiry, secret.
    /// Every reachable failure path costs one key derivation so timing does
    /// not reveal whether the token id exists.
    pub async fn validate(&self, token_string: &str) -> Result<TokenValidation, AuthError> {
        let store = self.store.clone();
        let token_string = token_string.to_string();

        let result = tokio::task::spawn_blocking(move || {
            Self::validate_blocking(store.as_ref(), &token_string)
        })
        .await??;

        Ok(result)
    }

    fn validate_blocking(
        store: &dyn TokenStore,
        token_string: &str,
    ) -> Result<TokenValidation, AuthError> {
        let Some((token_id, secret)) = token_string.split_once('.') else {
            return Ok(TokenValidation::invalid(InvalidReason::InvalidFormat));
        };
        if token_id.is_empty() || secret.is_empty() {
            return Ok(TokenValidation::invalid(InvalidReason::InvalidFormat));
        }

        let Some(record) = store.get_by_token_id(token_id)? else {
            burn_verification(secret);
            return Ok(TokenValidation::invalid(InvalidReason::NotFound));
        };

        if record.revoked {
            burn_verification(secret);
            return Ok(TokenValidation::invalid(InvalidReason::Revoked));
        }

        // Expiry is checked lazily at validation time; nothing sweeps
        // expired rows proactively.
        if let Some(expires_at) = record.expires_at {
            if crate::now_millis() > expires_at {
                burn_verification(secret);
                return Ok(TokenValidation::invalid(InvalidReason::Expired));
            }
        }

        if !verify_secret(secret, &record.secret_hash)? {
            return Ok(TokenValidation::invalid(InvalidReason::InvalidSecret));
        }

        Ok(TokenValidation::Valid {
            token_id: record.token_id,
            scopes: record.scopes,
        })
    }
}
