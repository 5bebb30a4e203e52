//! Authorization gate run before every scoped operation.
//!
//! The gate only verifies the credential and the role claim. Ownership of
//! stored rows is checked by the stores against the identity returned here.

use crate::entities::user::Role;
use crate::error::{BlogError, Result};
use crate::identity::Identity;
use crate::token::TokenIssuer;

/// Name of the cookie set on login.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// What a caller presented with the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct Presented<'a> {
    /// Raw `Authorization` header value.
    pub authorization: Option<&'a str>,
    /// Value of the `access_token` cookie.
    pub cookie: Option<&'a str>,
}

impl<'a> Presented<'a> {
    pub fn bearer(header: &'a str) -> Self {
        Self {
            authorization: Some(header),
            cookie: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Gate {
    issuer: TokenIssuer,
}

impl Gate {
    pub fn new(issuer: TokenIssuer) -> Self {
        Self { issuer }
    }

    pub fn authorize(&self, required: Role, presented: Presented<'_>) -> Result<Identity> {
        let token = extract_token(presented)
            .ok_or_else(|| BlogError::unauthorized("missing or malformed bearer token"))?;

        let claims = self.issuer.verify(token)?;

        if !claims.role.eq_ignore_ascii_case(required.as_str()) {
            tracing::debug!(required = %required, presented = %claims.role, "role mismatch");
            return Err(BlogError::Forbidden(format!("{required} role required")));
        }

        Ok(Identity {
            id: claims.subject_id()?,
            email: claims.email,
            role: required,
        })
    }
}

/// The header wins when present; a malformed header does not fall back to the
/// cookie.
fn extract_token(presented: Presented<'_>) -> Option<&str> {
    match presented.authorization {
        Some(header) => parse_bearer(header),
        None => presented.cookie.map(str::trim).filter(|c| !c.is_empty()),
    }
}

fn parse_bearer(header: &str) -> Option<&str> {
    let mut parts = header.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => Some(token),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use std::time::Duration;
    use uuid::Uuid;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&AuthConfig {
            jwt_secret: "gate-secret".into(),
            member_token_ttl: Duration::from_secs(630),
            admin_token_ttl: Duration::from_secs(3600),
        })
    }

    fn token_for(role: Role) -> (Identity, String) {
        let who = Identity {
            id: Uuid::new_v4(),
            email: format!("{role}@example.com"),
            role,
        };
        let token = issuer().issue(&who).unwrap().token;
        (who, token)
    }

    #[test]
    fn admin_token_passes_admin_gate() {
        let gate = Gate::new(issuer());
        let (who, token) = token_for(Role::Admin);
        let header = format!("Bearer {token}");

        let resolved = gate.authorize(Role::Admin, Presented::bearer(&header)).unwrap();
        assert_eq!(resolved, who);
    }

    #[test]
    fn member_token_is_forbidden_at_admin_gate() {
        let gate = Gate::new(issuer());
        let (_, token) = token_for(Role::Member);
        let header = format!("Bearer {token}");

        assert!(matches!(
            gate.authorize(Role::Admin, Presented::bearer(&header)),
            Err(BlogError::Forbidden(_))
        ));
    }

    #[test]
    fn missing_or_malformed_header_is_unauthorized() {
        let gate = Gate::new(issuer());
        let (_, token) = token_for(Role::Member);

        for header in [
            String::new(),
            token.clone(),
            format!("bearer {token}"),
            format!("Token {token}"),
            format!("Bearer {token} extra"),
            "Bearer ".to_string(),
        ] {
            let result = gate.authorize(Role::Member, Presented::bearer(&header));
            assert!(
                matches!(result, Err(BlogError::Unauthorized(_))),
                "header {header:?} should be rejected"
            );
        }

        assert!(matches!(
            gate.authorize(Role::Member, Presented::default()),
            Err(BlogError::Unauthorized(_))
        ));
    }

    #[test]
    fn cookie_is_accepted_when_header_absent() {
        let gate = Gate::new(issuer());
        let (who, token) = token_for(Role::Member);
        let presented = Presented {
            authorization: None,
            cookie: Some(&token),
        };
        assert_eq!(gate.authorize(Role::Member, presented).unwrap().id, who.id);
    }

    #[test]
    fn role_comparison_ignores_case() {
        use jsonwebtoken::{EncodingKey, Header, encode};

        let id = Uuid::new_v4();
        let claims = crate::token::Claims {
            sub: id.to_string(),
            email: "shouty@example.com".into(),
            role: "ADMIN".into(),
            iat: chrono::Utc::now().timestamp(),
            exp: chrono::Utc::now().timestamp() + 60,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"gate-secret"),
        )
        .unwrap();
        let header = format!("Bearer {token}");

        let resolved = Gate::new(issuer())
            .authorize(Role::Admin, Presented::bearer(&header))
            .unwrap();
        assert_eq!(resolved.id, id);
        assert_eq!(resolved.role, Role::Admin);
    }

    #[test]
    fn token_signed_elsewhere_is_unauthorized() {
        let other = TokenIssuer::new(&AuthConfig {
            jwt_secret: "someone-else".into(),
            member_token_ttl: Duration::from_secs(630),
            admin_token_ttl: Duration::from_secs(3600),
        });
        let who = Identity {
            id: Uuid::new_v4(),
            email: "admin@example.com".into(),
            role: Role::Admin,
        };
        let header = format!("Bearer {}", other.issue(&who).unwrap().token);

        assert!(matches!(
            Gate::new(issuer()).authorize(Role::Admin, Presented::bearer(&header)),
            Err(BlogError::Unauthorized(_))
        ));
    }
}
