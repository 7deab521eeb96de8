use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::AuthError;

const ALGORITHM: &str = "HS256";
const DEFAULT_EXPIRY_SECS: i64 = 24 * 60 * 60;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Claims {
    user: String,
    role: String,
    algorithm: String,
    expires_at: i64,
}

/// Decoded, validated claims returned by [`AuthTokenManager::validate_token`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user: String,
    pub role: String,
    pub expires_at: i64,
}

/// Signs and validates bearer tokens for the REST collaborator.
///
/// Tokens are `base64url(json(claims)) + "." + base64url(hmac)`, signed
/// with a process-local secret. `validate_token` re-derives the HMAC
/// and rejects both a bad signature and a claims payload whose declared
/// `algorithm` doesn't match what this manager signs with.
pub struct AuthTokenManager {
    secret: Vec<u8>,
    credentials: DashMap<String, (String, String)>, // user -> (salted_hash_hex, role)
    default_expiry_secs: i64,
}

impl AuthTokenManager {
    pub fn new(secret: impl Into<Vec<u8>>, default_expiry_secs: i64) -> Self {
        AuthTokenManager {
            secret: secret.into(),
            credentials: DashMap::new(),
            default_expiry_secs: if default_expiry_secs <= 0 { DEFAULT_EXPIRY_SECS } else { default_expiry_secs },
        }
    }

    /// Registers (or replaces) a user's salted password hash, hex
    /// encoded, as computed by the collaborator that owns hashing.
    pub fn set_credentials(&self, user: impl Into<String>, salted_hash_hex: impl Into<String>, role: impl Into<String>) {
        self.credentials.insert(user.into(), (salted_hash_hex.into(), role.into()));
    }

    /// Constant-time comparison against the stored hash; does not hash
    /// the password itself (that is the collaborator's job — this
    /// manager only compares what it's given).
    pub fn validate_credentials(&self, user: &str, candidate_hash_hex: &str) -> Result<(), AuthError> {
        let stored = self.credentials.get(user).ok_or(AuthError::InvalidCredentials)?;
        if constant_time_eq(stored.0.as_bytes(), candidate_hash_hex.as_bytes()) {
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    /// Returns the bearer token string and its expiry (epoch seconds).
    pub fn generate_token(&self, user: &str, now_secs: i64) -> (String, i64) {
        let role = self.credentials.get(user).map(|c| c.1.clone()).unwrap_or_else(|| "user".to_string());
        let expires_at = now_secs + self.default_expiry_secs;
        let claims = Claims { user: user.to_string(), role, algorithm: ALGORITHM.to_string(), expires_at };
        let token = self.sign(&claims);
        (token, expires_at)
    }

    /// Generates a token with an explicit expiry. Non-positive values
    /// are clamped to the default expiry (24 h unless configured
    /// otherwise).
    pub fn generate_token_with_expiry(&self, user: &str, now_secs: i64, requested_expiry_secs: i64) -> (String, i64) {
        let expiry = if requested_expiry_secs <= 0 { self.default_expiry_secs } else { requested_expiry_secs };
        let role = self.credentials.get(user).map(|c| c.1.clone()).unwrap_or_else(|| "user".to_string());
        let expires_at = now_secs + expiry;
        let claims = Claims { user: user.to_string(), role, algorithm: ALGORITHM.to_string(), expires_at };
        let token = self.sign(&claims);
        (token, expires_at)
    }

    pub fn validate_token(&self, token: &str, now_secs: i64) -> Result<TokenClaims, AuthError> {
        let (payload_b64, sig_b64) = token.split_once('.').ok_or(AuthError::InvalidToken)?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).map_err(|_| AuthError::InvalidToken)?;
        let sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| AuthError::InvalidToken)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret).map_err(|_| AuthError::InvalidToken)?;
        mac.update(&payload);
        mac.verify_slice(&sig).map_err(|_| AuthError::InvalidToken)?;

        let claims: Claims = serde_json::from_slice(&payload).map_err(|_| AuthError::InvalidToken)?;
        if claims.algorithm != ALGORITHM {
            return Err(AuthError::InvalidToken);
        }
        if claims.expires_at <= now_secs {
            return Err(AuthError::TokenExpired);
        }
        Ok(TokenClaims { user: claims.user, role: claims.role, expires_at: claims.expires_at })
    }

    fn sign(&self, claims: &Claims) -> String {
        let payload = serde_json::to_vec(claims).expect("claims always serialize");
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length");
        mac.update(&payload);
        let sig = mac.finalize().into_bytes();
        format!("{}.{}", URL_SAFE_NO_PAD.encode(&payload), URL_SAFE_NO_PAD.encode(sig))
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
