//! Password hashing, bearer-token sessions, and the `AuthUser` extractor.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::api::{ApiError, SharedState};
use super::db::DbHandle;
use super::models::User;
use crate::errors::BoardError;
use crate::realtime::ws::bearer_token;
use crate::realtime::{SessionResolver, UserId};

pub fn new_salt() -> String {
    Uuid::new_v4().to_string()
}

/// Hex SHA-256 of `salt || password`.
pub fn hash_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Constant-time comparison against the stored digest.
pub fn verify_password(password: &str, salt: &str, expected_hash: &str) -> bool {
    let actual = hash_password(password, salt);
    actual.as_bytes().ct_eq(expected_hash.as_bytes()).into()
}

/// The authenticated caller of a REST request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(BoardError::Unauthorized)?;
        let lookup = token.clone();
        let user = state
            .db
            .call(move |db| Ok(db.session_user(&lookup)?))
            .await?
            .ok_or(BoardError::Unauthorized)?;
        Ok(Self { user, token })
    }
}

/// Resolves WebSocket session tokens against the sessions table.
#[derive(Clone)]
pub struct SessionStore {
    db: DbHandle,
}

impl SessionStore {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionResolver for SessionStore {
    async fn resolve(&self, token: &str) -> Option<UserId> {
        let token = token.to_string();
        match self.db.call(move |db| Ok(db.session_user(&token)?)).await {
            Ok(user) => user.map(|u| UserId::from(u.id)),
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::db::BoardDb;

    #[test]
    fn test_hash_is_salted_and_deterministic() {
        let a = hash_password("hunter2", "salt-a");
        assert_eq!(a, hash_password("hunter2", "salt-a"));
        assert_ne!(a, hash_password("hunter2", "salt-b"));
        assert_eq!(a.len(), 64);
        assert!(verify_password("hunter2", "salt-a", &a));
        assert!(!verify_password("hunter3", "salt-a", &a));
    }

    #[test]
    fn test_verify_rejects_truncated_and_altered_digests() {
        let hash = hash_password("hunter2", "salt");
        assert!(!verify_password("hunter2", "salt", &hash[..63]));
        assert!(!verify_password("hunter2", "salt", ""));

        let mut altered = hash.clone().into_bytes();
        altered[0] = if altered[0] == b'0' { b'1' } else { b'0' };
        let altered = String::from_utf8(altered).unwrap();
        assert!(!verify_password("hunter2", "salt", &altered));
    }

    #[test]
    fn test_salts_are_unique() {
        assert_ne!(new_salt(), new_salt());
    }

    #[tokio::test]
    async fn test_session_store_resolves_tokens() {
        let db = BoardDb::new_in_memory().unwrap();
        let user = db.create_user("alice", "Alice", "h", "s").unwrap();
        let token = db.create_session(&user.id).unwrap();
        let store = SessionStore::new(DbHandle::new(db));

        assert_eq!(store.resolve(&token).await, Some(UserId::from(user.id)));
        assert_eq!(store.resolve("bogus").await, None);
    }
}
