//! Identity: secret hashing and signed bearer credentials.
//!
//! A credential binds {account id, display name} and is verified before any
//! session-scoped event is accepted. Secrets are stored as argon2 hashes;
//! the cleartext never reaches the store.

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tonic::metadata::MetadataMap;

const TOKEN_VALIDITY_DAYS: i64 = 7;

/// Verified identity of a connection or request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub account_id: String,
    pub display_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credential processing failed")]
    Internal,
}

#[derive(Serialize, Deserialize)]
struct Claims {
    sub: String,
    name: String,
    exp: usize,
}

/// Signing and verification keys for identity credentials.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, account_id: &str, display_name: &str) -> Result<String, AuthError> {
        let expiration = Utc::now()
            .checked_add_signed(Duration::days(TOKEN_VALIDITY_DAYS))
            .ok_or(AuthError::Internal)?
            .timestamp();

        let claims = Claims {
            sub: account_id.to_string(),
            name: display_name.to_string(),
            exp: expiration as usize,
        };

        encode(&Header::default(), &claims, &self.encoding).map_err(|_| AuthError::Internal)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default())
            .map_err(|_| AuthError::InvalidCredentials)?;
        Ok(Identity {
            account_id: data.claims.sub,
            display_name: data.claims.name,
        })
    }
}

pub fn hash_secret(secret: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|_| AuthError::Internal)
}

pub fn verify_secret(secret: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}

/// Extract and verify the bearer credential from request metadata.
pub fn identity_from_metadata(
    metadata: &MetadataMap,
    keys: &TokenKeys,
) -> Result<Identity, AuthError> {
    let value = metadata
        .get("authorization")
        .ok_or(AuthError::InvalidCredentials)?
        .to_str()
        .map_err(|_| AuthError::InvalidCredentials)?;
    let token = value.strip_prefix("Bearer ").unwrap_or(value);
    keys.verify(token)
}
