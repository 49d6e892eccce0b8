//! Bearer-credential validation.
//!
//! Credentials are compact HS256 JWS strings issued by the portal's login
//! flow with the shared `auth.jwt_secret`. A valid signature is not enough:
//! every call re-reads the user row, so deleting or disabling an account
//! revokes its outstanding credentials immediately.

use crate::authz::Role;
use crate::config::AuthConfig;
use crate::error::StoreError;
use crate::hierarchy;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{TimeDelta, Utc};
use hmac::{Hmac, Mac};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing header, wrong scheme, or a credential that does not parse.
    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// Signature, algorithm or expiry check failed.
    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    /// Credential verifies but no longer matches a live, enabled account.
    #[error("credential refers to user {user_id}, which is no longer active")]
    StaleIdentity { user_id: i64 },

    #[error("credential encoding: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error(transparent)]
    Storage(StoreError),
}

/// Signed payload of a credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub id: i64,
    pub email: String,
    pub role: Role,
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated principal attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub email: String,
    pub name: String,
    pub role: Role,
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

fn mac_for(secret: &str) -> Result<HmacSha256, AuthError> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AuthError::InvalidCredential(format!("signing key: {e}")))
}

/// Signs a credential for `identity` valid for `auth.token_ttl_hours`.
pub fn issue_token(auth: &AuthConfig, identity: &Identity) -> Result<String, AuthError> {
    let now = Utc::now();
    let claims = Claims {
        id: identity.user_id,
        email: identity.email.clone(),
        role: identity.role,
        name: identity.name.clone(),
        iat: now.timestamp(),
        exp: (now + TimeDelta::hours(auth.token_ttl_hours)).timestamp(),
    };
    sign_claims(&auth.jwt_secret, &claims)
}

pub fn sign_claims(secret: &str, claims: &Claims) -> Result<String, AuthError> {
    let header = Header {
        alg: "HS256".into(),
        typ: Some("JWT".into()),
    };
    let signing_input = format!(
        "{}.{}",
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
    );
    let mut mac = mac_for(secret)?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{signing_input}.{signature}"))
}

/// Checks structure, signature and expiry. Does not touch the store.
pub fn verify_token(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(sig_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::Unauthenticated(
            "credential is not a three-part token".into(),
        ));
    };

    let header: Header = decode_segment(header_b64, "header")?;
    if header.alg != "HS256" {
        return Err(AuthError::InvalidCredential(format!(
            "unsupported algorithm {}",
            header.alg
        )));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|e| AuthError::Unauthenticated(format!("signature encoding: {e}")))?;
    let mut mac = mac_for(secret)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AuthError::InvalidCredential("signature mismatch".into()))?;

    let claims: Claims = decode_segment(payload_b64, "payload")?;
    if claims.exp <= Utc::now().timestamp() {
        return Err(AuthError::InvalidCredential("credential expired".into()));
    }
    Ok(claims)
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    what: &str,
) -> Result<T, AuthError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::Unauthenticated(format!("{what} encoding: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::Unauthenticated(format!("{what} json: {e}")))
}

/// Extracts the token from an `Authorization` header value.
pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let Some(value) = header else {
        return Err(AuthError::Unauthenticated(
            "missing Authorization header".into(),
        ));
    };
    let value = value.trim();
    let token = value
        .split_once(' ')
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, rest)| rest.trim())
        .filter(|t| !t.is_empty());
    token.ok_or_else(|| AuthError::Unauthenticated("expected a Bearer credential".into()))
}

/// Verifies the credential and cross-checks it against the live users table.
pub fn authenticate(
    conn: &Connection,
    auth: &AuthConfig,
    authorization: Option<&str>,
) -> Result<Identity, AuthError> {
    let token = bearer_token(authorization)?;
    let claims = verify_token(&auth.jwt_secret, token)?;

    let user = match hierarchy::resolve_user(conn, claims.id) {
        Ok(u) => u,
        Err(StoreError::NotFound { .. }) => {
            return Err(AuthError::StaleIdentity { user_id: claims.id })
        }
        Err(e) => return Err(AuthError::Storage(e)),
    };
    if !user.enabled || user.role != Some(claims.role) {
        return Err(AuthError::StaleIdentity { user_id: claims.id });
    }

    Ok(Identity {
        user_id: user.id,
        email: user.email,
        name: user.name,
        role: claims.role,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    const SECRET: &str = "unit-test-secret";

    fn auth() -> AuthConfig {
        AuthConfig {
            jwt_secret: SECRET.into(),
            token_ttl_hours: 12,
        }
    }

    fn conn_with_user(enabled: bool) -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn.execute(
            "INSERT INTO users(id, email, name, role, enabled) VALUES(5, 'ada@x.edu', 'Ada', 'admin', ?)",
            [enabled as i64],
        )
        .expect("user");
        conn
    }

    fn ada() -> Identity {
        Identity {
            user_id: 5,
            email: "ada@x.edu".into(),
            name: "Ada".into(),
            role: Role::Admin,
        }
    }

    #[test]
    fn issued_token_authenticates() {
        let conn = conn_with_user(true);
        let token = issue_token(&auth(), &ada()).expect("sign");
        let header = format!("Bearer {token}");
        let identity = authenticate(&conn, &auth(), Some(&header)).expect("authenticate");
        assert_eq!(identity, ada());
    }

    #[test]
    fn missing_or_malformed_header_is_unauthenticated() {
        let conn = conn_with_user(true);
        for header in [None, Some("Basic abc"), Some("Bearer "), Some("Bearer a.b")] {
            let err = authenticate(&conn, &auth(), header).unwrap_err();
            assert!(matches!(err, AuthError::Unauthenticated(_)), "{header:?}");
        }
    }

    #[test]
    fn wrong_secret_is_invalid_credential() {
        let conn = conn_with_user(true);
        let other = AuthConfig {
            jwt_secret: "someone-else".into(),
            token_ttl_hours: 12,
        };
        let token = issue_token(&other, &ada()).expect("sign");
        let err = authenticate(&conn, &auth(), Some(&format!("Bearer {token}"))).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[test]
    fn expired_token_is_invalid_credential() {
        let now = Utc::now().timestamp();
        let claims = Claims {
            id: 5,
            email: "ada@x.edu".into(),
            role: Role::Admin,
            name: "Ada".into(),
            iat: now - 7200,
            exp: now - 60,
        };
        let token = sign_claims(SECRET, &claims).expect("sign");
        let err = verify_token(SECRET, &token).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[test]
    fn tampered_payload_fails_signature() {
        let token = issue_token(&auth(), &ada()).expect("sign");
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&serde_json::json!({
                "id": 5, "email": "ada@x.edu", "role": "admin", "name": "Ada",
                "iat": 0, "exp": i64::MAX
            }))
            .expect("json"),
        );
        parts[1] = &forged;
        let err = verify_token(SECRET, &parts.join(".")).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential(_)));
    }

    #[test]
    fn deleted_user_is_stale() {
        let conn = conn_with_user(true);
        let token = issue_token(&auth(), &ada()).expect("sign");
        conn.execute("DELETE FROM users WHERE id = 5", []).expect("delete");
        let err = authenticate(&conn, &auth(), Some(&format!("Bearer {token}"))).unwrap_err();
        assert!(matches!(err, AuthError::StaleIdentity { user_id: 5 }));
    }

    #[test]
    fn disabled_user_is_stale() {
        let conn = conn_with_user(false);
        let token = issue_token(&auth(), &ada()).expect("sign");
        let err = authenticate(&conn, &auth(), Some(&format!("Bearer {token}"))).unwrap_err();
        assert!(matches!(err, AuthError::StaleIdentity { user_id: 5 }));
    }

    #[test]
    fn demoted_user_is_stale() {
        let conn = conn_with_user(true);
        let token = issue_token(&auth(), &ada()).expect("sign");
        conn.execute("UPDATE users SET role = 'faculty' WHERE id = 5", [])
            .expect("demote");
        let err = authenticate(&conn, &auth(), Some(&format!("Bearer {token}"))).unwrap_err();
        assert!(matches!(err, AuthError::StaleIdentity { user_id: 5 }));
    }
}
