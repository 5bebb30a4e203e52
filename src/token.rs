//! Token issuer: signed, time-limited, role-scoped credentials (HS256 JWT).

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::entities::user::Role;
use crate::error::{BlogError, Result};
use crate::identity::Identity;

const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Account id.
    pub sub: String,
    pub email: String,
    /// Lowercase role name; compared case-insensitively by the gate.
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    member_ttl: Duration,
    admin_ttl: Duration,
}

impl std::fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("member_ttl", &self.member_ttl)
            .field("admin_ttl", &self.admin_ttl)
            .finish_non_exhaustive()
    }
}

impl TokenIssuer {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            member_ttl: config.member_token_ttl,
            admin_ttl: config.admin_token_ttl,
        }
    }

    pub fn ttl_for(&self, role: Role) -> Duration {
        match role {
            Role::Admin => self.admin_ttl,
            Role::Member => self.member_ttl,
        }
    }

    pub fn issue(&self, identity: &Identity) -> Result<IssuedToken> {
        self.issue_at(identity, Utc::now())
    }

    pub(crate) fn issue_at(&self, identity: &Identity, now: DateTime<Utc>) -> Result<IssuedToken> {
        let ttl = chrono::Duration::from_std(self.ttl_for(identity.role))
            .map_err(|e| BlogError::Internal(format!("token ttl out of range: {e}")))?;
        let expires_at = now + ttl;

        let claims = Claims {
            sub: identity.id.to_string(),
            email: identity.email.clone(),
            role: identity.role.as_str().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode(&Header::new(ALGORITHM), &claims, &self.encoding)
            .map_err(|e| BlogError::Internal(format!("failed to sign token: {e}")))?;

        Ok(IssuedToken {
            token,
            role: identity.role,
            expires_at,
        })
    }

    /// Check signature and expiry. Every failure is `Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::debug!(error = %e, "token rejected");
                BlogError::unauthorized("invalid or expired token")
            })
    }
}

impl Claims {
    /// Parse the subject claim back into an account id.
    pub fn subject_id(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.sub).map_err(|_| BlogError::unauthorized("malformed subject"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer(secret: &str) -> TokenIssuer {
        TokenIssuer::new(&AuthConfig {
            jwt_secret: secret.to_string(),
            member_token_ttl: Duration::from_secs(630),
            admin_token_ttl: Duration::from_secs(60 * 60 * 24 * 30),
        })
    }

    fn identity(role: Role) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            email: "someone@example.com".into(),
            role,
        }
    }

    #[test]
    fn issue_then_verify_carries_claims() {
        let issuer = issuer("secret");
        let who = identity(Role::Admin);
        let issued = issuer.issue(&who).unwrap();

        let claims = issuer.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, who.id.to_string());
        assert_eq!(claims.email, who.email);
        assert_eq!(claims.role, "admin");
        assert_eq!(claims.subject_id().unwrap(), who.id);
    }

    #[test]
    fn member_and_admin_lifetimes_differ() {
        let issuer = issuer("secret");
        let now = Utc::now();
        let member = issuer.issue_at(&identity(Role::Member), now).unwrap();
        let admin = issuer.issue_at(&identity(Role::Admin), now).unwrap();

        assert_eq!((member.expires_at - now).num_seconds(), 630);
        assert_eq!((admin.expires_at - now).num_days(), 30);
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let issuer = issuer("secret");
        let long_ago = Utc::now() - chrono::Duration::hours(1);
        let stale = issuer.issue_at(&identity(Role::Member), long_ago).unwrap();

        assert!(matches!(
            issuer.verify(&stale.token),
            Err(BlogError::Unauthorized(_))
        ));
    }

    #[test]
    fn foreign_signature_is_unauthorized() {
        let theirs = issuer("other-secret").issue(&identity(Role::Admin)).unwrap();
        assert!(matches!(
            issuer("secret").verify(&theirs.token),
            Err(BlogError::Unauthorized(_))
        ));
    }

    #[test]
    fn garbage_is_unauthorized() {
        assert!(matches!(
            issuer("secret").verify("not.a.jwt"),
            Err(BlogError::Unauthorized(_))
        ));
    }
}
