//! Unverified JWT claim extraction.
//!
//! The backend issues the token; this client only peeks at the payload to
//! recover the user id and role when a login response carries nothing else.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use campuslink_protocol::{Role, User};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClaimsError {
    #[error("Token is not a three-part JWT")]
    Malformed,

    #[error("Token payload is not base64url: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Token payload is not JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub id: Option<i64>,
    pub username: Option<String>,
    pub role: Option<String>,
    pub email: Option<String>,
    pub iat: Option<u64>,
    pub exp: Option<u64>,
}

impl TokenClaims {
    pub fn decode(token: &str) -> Result<Self, ClaimsError> {
        let mut parts = token.split('.');
        let (Some(_header), Some(payload), Some(_signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ClaimsError::Malformed);
        };
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('='))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// `exp` is in seconds since the epoch. Tokens without it never expire here.
    pub fn is_expired(&self, now_secs: u64) -> bool {
        self.exp.is_some_and(|exp| exp <= now_secs)
    }

    pub fn role(&self) -> Role {
        match self.role.as_deref().map(str::to_ascii_uppercase).as_deref() {
            Some("ADMIN") | Some("ROLE_ADMIN") => Role::Admin,
            _ => Role::Student,
        }
    }

    /// Minimal user built from the claims, for when the profile lookup fails.
    pub fn minimal_user(&self, fallback_email: &str) -> User {
        let email = self
            .email
            .clone()
            .or_else(|| self.sub.clone().filter(|s| s.contains('@')))
            .unwrap_or_else(|| fallback_email.to_string());
        User {
            id: self.id.unwrap_or(0),
            name: String::new(),
            username: self.username.clone().unwrap_or_else(|| email.clone()),
            email,
            role: self.role(),
            department: None,
            phone: None,
            location: None,
            profile_image_path: None,
            is_verified: Some(true),
        }
    }
}

#[cfg(test)]
pub(crate) fn encode_test_token(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.c2ln")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_payload_fields() {
        let token = encode_test_token(&json!({
            "sub": "asha@gct.ac.in",
            "id": 42,
            "role": "ADMIN",
            "exp": 2_000_000_000u64
        }));
        let claims = TokenClaims::decode(&token).unwrap();
        assert_eq!(claims.id, Some(42));
        assert_eq!(claims.role(), Role::Admin);
        assert!(!claims.is_expired(1_700_000_000));
        assert!(claims.is_expired(2_000_000_000));
    }

    #[test]
    fn minimal_user_prefers_claims_then_fallback() {
        let token = encode_test_token(&json!({"sub": "asha@gct.ac.in", "id": 5}));
        let user = TokenClaims::decode(&token)
            .unwrap()
            .minimal_user("other@gct.ac.in");
        assert_eq!(user.id, 5);
        assert_eq!(user.email, "asha@gct.ac.in");
        assert_eq!(user.username, "asha@gct.ac.in");
        assert!(user.is_student());

        let bare = TokenClaims::default().minimal_user("x@gct.ac.in");
        assert_eq!(bare.email, "x@gct.ac.in");
        assert_eq!(bare.id, 0);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(matches!(
            TokenClaims::decode("only.two"),
            Err(ClaimsError::Malformed)
        ));
        assert!(matches!(
            TokenClaims::decode("a.b.c.d"),
            Err(ClaimsError::Malformed)
        ));
        assert!(matches!(
            TokenClaims::decode("a.!!!.c"),
            Err(ClaimsError::Base64(_))
        ));
    }
}
