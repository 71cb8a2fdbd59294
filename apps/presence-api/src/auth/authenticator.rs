//! Bearer credential verification for gateway handshakes and the HTTP API.

use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::db::store::UserDirectory;
use crate::error::{CoreError, CoreResult};
use crate::models::user::Identity;

/// Claims carried by portal-issued access tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User ID.
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Resolves a bearer credential to an [`Identity`].
///
/// Pure verification: a failed check leaves no trace, and a successful one
/// does not touch presence state.
#[derive(Clone)]
pub struct PresenceAuthenticator {
    key: DecodingKey,
    validation: Validation,
    users: Arc<dyn UserDirectory>,
}

impl PresenceAuthenticator {
    pub fn new(secret: &str, users: Arc<dyn UserDirectory>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            users,
        }
    }

    pub async fn verify(&self, credential: &str) -> CoreResult<Identity> {
        let token = credential.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        if token.is_empty() {
            return Err(CoreError::auth("missing credential"));
        }

        let data = jsonwebtoken::decode::<AccessClaims>(token, &self.key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => CoreError::auth("credential expired"),
                ErrorKind::InvalidSignature => CoreError::auth("invalid signature"),
                _ => {
                    tracing::debug!(?e, "token decode failed");
                    CoreError::auth("malformed credential")
                }
            })?;

        let user = self
            .users
            .find_user(&data.claims.sub)
            .await?
            .ok_or_else(|| CoreError::auth("unknown user"))?;

        if !user.is_active {
            return Err(CoreError::auth("account is inactive"));
        }

        Ok(Identity::from(user))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::memory::MemoryUserDirectory;
    use crate::models::user::{Role, UserRecord};
    use jsonwebtoken::{EncodingKey, Header};

    pub const SECRET: &str = "unit-test-secret";

    pub fn mint(secret: &str, user_id: &str, ttl_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + ttl_secs,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn directory() -> Arc<MemoryUserDirectory> {
        let dir = Arc::new(MemoryUserDirectory::new());
        dir.upsert(UserRecord {
            id: "usr_amy".into(),
            username: "amy".into(),
            full_name: "Amy Pond".into(),
            avatar_url: None,
            role: Role::Admin,
            is_active: true,
        });
        dir.upsert(UserRecord {
            id: "usr_gone".into(),
            username: "gone".into(),
            full_name: "Gone User".into(),
            avatar_url: None,
            role: Role::User,
            is_active: false,
        });
        dir
    }

    fn assert_auth_failed(result: CoreResult<Identity>, reason: &str) {
        match result {
            Err(CoreError::AuthenticationFailed(r)) => assert_eq!(r, reason),
            other => panic!("expected AuthenticationFailed({reason}), got {other:?}"),
        }
    }

    #[tokio::test]
    async fn verifies_valid_token() {
        let auth = PresenceAuthenticator::new(SECRET, directory());
        let identity = auth.verify(&mint(SECRET, "usr_amy", 60)).await.unwrap();
        assert_eq!(identity.user_id, "usr_amy");
        assert_eq!(identity.full_name, "Amy Pond");
        assert_eq!(identity.role, Role::Admin);
    }

    #[tokio::test]
    async fn accepts_bearer_prefix() {
        let auth = PresenceAuthenticator::new(SECRET, directory());
        let header = format!("Bearer {}", mint(SECRET, "usr_amy", 60));
        assert!(auth.verify(&header).await.is_ok());
    }

    #[tokio::test]
    async fn rejects_missing_credential() {
        let auth = PresenceAuthenticator::new(SECRET, directory());
        assert_auth_failed(auth.verify("  ").await, "missing credential");
    }

    #[tokio::test]
    async fn rejects_malformed_credential() {
        let auth = PresenceAuthenticator::new(SECRET, directory());
        assert_auth_failed(auth.verify("not-a-jwt").await, "malformed credential");
    }

    #[tokio::test]
    async fn rejects_wrong_signature() {
        let auth = PresenceAuthenticator::new(SECRET, directory());
        assert_auth_failed(
            auth.verify(&mint("other-secret", "usr_amy", 60)).await,
            "invalid signature",
        );
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let auth = PresenceAuthenticator::new(SECRET, directory());
        assert_auth_failed(auth.verify(&mint(SECRET, "usr_amy", -60)).await, "credential expired");
    }

    #[tokio::test]
    async fn rejects_unknown_and_inactive_users() {
        let auth = PresenceAuthenticator::new(SECRET, directory());
        assert_auth_failed(auth.verify(&mint(SECRET, "usr_nobody", 60)).await, "unknown user");
        assert_auth_failed(auth.verify(&mint(SECRET, "usr_gone", 60)).await, "account is inactive");
    }
}
