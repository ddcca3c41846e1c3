//! Session tokens and password checks.
//!
//! A session token is `base64url(claims).base64url(mac)` where the MAC is
//! HMAC-SHA256 over the encoded claims, keyed with `SESSION_SECRET`. Tokens
//! carry only the user id; every request re-resolves the user through the
//! directory so role changes and archived accounts apply immediately.

use std::sync::LazyLock;

use axum::http::{HeaderMap, header};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::config::SessionConfig;
use crate::data::{AppUser, UserDirectory};
use crate::error::{ConfigError, DatabaseError};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("malformed session token")]
    Malformed,

    #[error("session signature mismatch")]
    BadSignature,

    #[error("session expired")]
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id as issued by the active user directory.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// Issues and verifies session tokens.
#[derive(Clone)]
pub struct SessionSigner {
    mac: HmacSha256,
    ttl: Duration,
}

impl SessionSigner {
    pub fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
        let mac = HmacSha256::new_from_slice(config.secret.expose_secret().as_bytes()).map_err(
            |e| ConfigError::InvalidValue {
                key: "SESSION_SECRET".to_string(),
                message: e.to_string(),
            },
        )?;
        Ok(Self {
            mac,
            ttl: Duration::hours(config.ttl_hours),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user_id: &str) -> String {
        self.issue_at(user_id, Utc::now())
    }

    pub fn issue_at(&self, user_id: &str, now: DateTime<Utc>) -> String {
        let claims = SessionClaims {
            sub: user_id.to_string(),
            exp: (now + self.ttl).timestamp(),
        };
        // Serializing two plain fields cannot fail.
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
        let signature = URL_SAFE_NO_PAD.encode(self.sign(payload.as_bytes()));
        format!("{payload}.{signature}")
    }

    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<SessionClaims, SessionError> {
        let (payload, signature) = token.trim().split_once('.').ok_or(SessionError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| SessionError::Malformed)?;
        let expected = self.sign(payload.as_bytes());
        if !bool::from(expected.as_slice().ct_eq(&signature)) {
            return Err(SessionError::BadSignature);
        }

        let raw = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| SessionError::Malformed)?;
        let claims: SessionClaims =
            serde_json::from_slice(&raw).map_err(|_| SessionError::Malformed)?;
        if claims.exp <= now.timestamp() {
            return Err(SessionError::Expired);
        }
        Ok(claims)
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("bcrypt failed: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("password worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Hash at `bcrypt::DEFAULT_COST` on the blocking pool.
pub async fn hash_password(password: &str) -> Result<String, PasswordError> {
    let password = password.to_owned();
    let hash =
        tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST)).await??;
    Ok(hash)
}

pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

/// Check `password` against a bcrypt hash on the blocking pool. A malformed
/// hash never verifies.
pub async fn verify_password(password: &str, hash: &str) -> bool {
    let (password, hash) = (password.to_owned(), hash.to_owned());
    match tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash)).await {
        Ok(verified) => verified.unwrap_or(false),
        Err(e) => {
            tracing::error!(error = %e, "Password check did not complete");
            false
        }
    }
}

/// Hash checked when the email is unknown, so both login paths pay for one
/// bcrypt verification at the default cost.
static UNKNOWN_USER_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| bcrypt::hash("unknown-user", bcrypt::DEFAULT_COST).ok());

async fn unknown_user_hash() -> String {
    let hash = tokio::task::spawn_blocking(|| UNKNOWN_USER_HASH.clone()).await;
    hash.ok().flatten().unwrap_or_default()
}

/// `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Check credentials against the active user directory.
///
/// Unknown emails and wrong passwords are indistinguishable to the caller.
pub async fn login(
    directory: &dyn UserDirectory,
    email: &str,
    password: &str,
) -> Result<Option<AppUser>, DatabaseError> {
    let Some(user) = directory.find_user_by_email(email).await? else {
        tracing::debug!("Login attempt for unknown email");
        verify_password(password, &unknown_user_hash().await).await;
        return Ok(None);
    };
    if verify_password(password, &user.password_hash).await {
        Ok(Some(user))
    } else {
        tracing::debug!(user_id = %user.id, "Login attempt with wrong password");
        Ok(None)
    }
}

/// Resolve the live user behind a session token. Any token problem yields
/// `None`; only directory failures are errors.
pub async fn resolve_session(
    directory: &dyn UserDirectory,
    signer: &SessionSigner,
    token: &str,
) -> Result<Option<AppUser>, DatabaseError> {
    match signer.verify(token) {
        Ok(claims) => directory.get_user(&claims.sub).await,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected session token");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::HeaderValue;
    use secrecy::SecretString;

    use super::*;
    use crate::data::RelationalUsers;
    use crate::db::{CreateUserParams, UserRole, UserStore};
    use crate::testing::test_db;

    fn signer() -> SessionSigner {
        SessionSigner::new(&SessionConfig {
            secret: SecretString::from("0123456789abcdef0123456789abcdef".to_string()),
            ttl_hours: 2,
        })
        .expect("signer")
    }

    #[test]
    fn issued_tokens_verify() {
        let signer = signer();
        let now = Utc::now();
        let token = signer.issue_at("user-1", now);
        let claims = signer.verify_at(&token, now).expect("verify");
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.exp, (now + Duration::hours(2)).timestamp());
    }

    #[test]
    fn tampered_and_expired_tokens_are_rejected() {
        let signer = signer();
        let now = Utc::now();
        let token = signer.issue_at("user-1", now);

        let (_, signature) = token.split_once('.').expect("dot");
        let forged_claims = URL_SAFE_NO_PAD.encode(br#"{"sub":"admin","exp":9999999999}"#);
        assert_eq!(
            signer.verify_at(&format!("{forged_claims}.{signature}"), now),
            Err(SessionError::BadSignature)
        );
        assert_eq!(
            signer.verify_at(&token, now + Duration::hours(3)),
            Err(SessionError::Expired)
        );
        assert_eq!(signer.verify_at("garbage", now), Err(SessionError::Malformed));

        let other = SessionSigner::new(&SessionConfig {
            secret: SecretString::from("another-secret-another-secret-xx".to_string()),
            ttl_hours: 2,
        })
        .expect("signer");
        assert_eq!(other.verify_at(&token, now), Err(SessionError::BadSignature));
    }

    #[test]
    fn bearer_tokens_are_extracted() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        assert_eq!(bearer_token(&headers), Some("abc.def"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[tokio::test]
    async fn login_checks_bcrypt_and_sessions_resolve_users() {
        let fixture = test_db().await;
        fixture
            .db
            .create_user(&CreateUserParams {
                email: "owner@agency.test".to_string(),
                full_name: "Owner".to_string(),
                role: UserRole::Admin,
                password_hash: hash_password_with_cost("hunter22", 4).expect("hash"),
            })
            .await
            .expect("user");
        let directory = RelationalUsers::new(Arc::new(fixture.db.clone()));

        assert!(
            login(&directory, "owner@agency.test", "wrong")
                .await
                .expect("login")
                .is_none()
        );
        assert!(
            login(&directory, "nobody@agency.test", "hunter22")
                .await
                .expect("login")
                .is_none()
        );
        let user = login(&directory, "OWNER@agency.test", "hunter22")
            .await
            .expect("login")
            .expect("user");

        let signer = signer();
        let token = signer.issue(&user.id);
        let resolved = resolve_session(&directory, &signer, &token)
            .await
            .expect("resolve")
            .expect("user");
        assert_eq!(resolved.id, user.id);
        assert!(
            resolve_session(&directory, &signer, "nope.nope")
                .await
                .expect("resolve")
                .is_none()
        );
    }

    #[tokio::test]
    async fn password_checks_run_off_the_async_workers() {
        let hash = hash_password_with_cost("hunter22", 4).expect("hash");
        assert!(verify_password("hunter22", &hash).await);
        assert!(!verify_password("hunter23", &hash).await);
        assert!(!verify_password("hunter22", "not-a-bcrypt-hash").await);

        let hashed = hash_password("opensesame").await.expect("hash");
        assert!(hashed.starts_with(&format!("$2b${}$", bcrypt::DEFAULT_COST)));
        assert!(verify_password("opensesame", &hashed).await);
    }

    #[tokio::test]
    async fn unknown_emails_are_checked_against_a_default_cost_hash() {
        let hash = unknown_user_hash().await;
        assert!(hash.starts_with(&format!("$2b${}$", bcrypt::DEFAULT_COST)));
        assert!(!verify_password("hunter22", &hash).await);
    }
}
