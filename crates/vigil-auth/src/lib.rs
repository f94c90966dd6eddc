//! Vigil Auth -- token secrets, scrypt hashing, minting, scope checks.
//!
//! A presented credential is `tokenId.secret`. Only the scrypt hash of the
//! secret is stored; the plaintext exists exactly once, at mint time.
//!
//! Stored hash format: `s1$<salt b64>$<key b64>` with N=2^15, r=8, p=1,
//! 32-byte derived key. Comparison goes through ring's constant-time check.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use vigil_storage::{TokenRecord, TokenStore};

pub mod scopes;
pub mod token_service;

pub use scopes::{authorize, WILDCARD_SCOPE};
pub use token_service::{InvalidReason, TokenService, TokenValidation};

/// scrypt parameters: N=2^15, r=8, p=1.
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const KEY_LENGTH: usize = 32;
const SALT_LENGTH: usize = 16;

const HASH_VERSION_TAG: &str = "s1";

/// Salt used for the burn-time verification on unknown token ids.
const DUMMY_SALT: [u8; SALT_LENGTH] = [0x5a; SALT_LENGTH];

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("key derivation failed: {0}")]
    KeyDerivationFailed(String),
    #[error("malformed secret hash")]
    MalformedHash,
    #[error("storage error: {0}")]
    Storage(#[from] vigil_storage::StorageError),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

fn derive_key(secret: &[u8], salt: &[u8]) -> Result<[u8; KEY_LENGTH], AuthError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LENGTH)
        .map_err(|e| AuthError::KeyDerivationFailed(e.to_string()))?;

    let mut key = [0u8; KEY_LENGTH];
    scrypt::scrypt(secret, salt, &params, &mut key)
        .map_err(|e| AuthError::KeyDerivationFailed(e.to_string()))?;

    Ok(key)
}

/// Hash a plaintext secret for storage.
pub fn hash_secret(secret: &str) -> Result<String, AuthError> {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);

    let key = derive_key(secret.as_bytes(), &salt)?;
    Ok(format!(
        "{HASH_VERSION_TAG}${}${}",
        BASE64.encode(salt),
        BASE64.encode(key)
    ))
}

/// Verify a plaintext secret against a stored hash in constant time.
pub fn verify_secret(secret: &str, stored_hash: &str) -> Result<bool, AuthError> {
    let mut parts = stored_hash.split('$');
    let (tag, salt_b64, key_b64) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(tag), Some(salt), Some(key), None) => (tag, salt, key),
        _ => return Err(AuthError::MalformedHash),
    };
    if tag != HASH_VERSION_TAG {
        return Err(AuthError::MalformedHash);
    }

    let salt = BASE64.decode(salt_b64).map_err(|_| AuthError::MalformedHash)?;
    let expected = BASE64.decode(key_b64).map_err(|_| AuthError::MalformedHash)?;

    let derived = derive_key(secret.as_bytes(), &salt)?;
    Ok(ring::constant_time::verify_slices_are_equal(&derived, &expected).is_ok())
}

/// Burn one key derivation so an unknown token id costs the same as a
/// wrong secret. The comparison target is all-zero and never matches.
pub(crate) fn burn_verification(secret: &str) {
    if let Ok(derived) = derive_key(secret.as_bytes(), &DUMMY_SALT) {
        let _ = ring::constant_time::verify_slices_are_equal(&derived, &[0u8; KEY_LENGTH]);
    }
}

/// A freshly minted token. `display` is the one-time `tokenId.secret`
/// credential; it is not recoverable afterwards.
#[derive(Debug)]
pub struct MintedToken {
    pub token_id: String,
    pub display: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<i64>,
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Mint a token with the given scopes and optional lifetime, and persist it.
pub fn mint_token(
    store: &dyn TokenStore,
    scopes: &[String],
    expires_seconds: Option<u64>,
) -> Result<MintedToken, AuthError> {
    let mut id_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut id_bytes);
    let token_id = hex::encode(id_bytes);

    let mut secret_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret_bytes);
    let secret = URL_SAFE_NO_PAD.encode(secret_bytes);

    let created_at = now_millis();
    let expires_at = expires_seconds.map(|s| created_at + (s as i64) * 1000);

    let record = TokenRecord {
        token_id: token_id.clone(),
        secret_hash: hash_secret(&secret)?,
        scopes: scopes.to_vec(),
        created_at,
        expires_at,
        revoked: false,
    };
    store.insert_token(&record)?;

    tracing::info!(token_id = %token_id, scopes = ?scopes, "token minted");

    Ok(MintedToken {
        display: format!("{token_id}.{secret}"),
        token_id,
        scopes: scopes.to_vec(),
        expires_at,
    })
}
