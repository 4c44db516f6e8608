use std::sync::{PoisonError, RwLock};
use base64::Engine;
use base64::prelude::BASE64_URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use tracing::warn;
use super::models::AuthTokens;

/// Holds the current session's tokens.
pub trait TokenStore: Send + Sync {
    fn access_token(&self) -> Option<String>;

    fn refresh_token(&self) -> Option<String>;

    /// Overwrites only the tokens present in `tokens`.
    fn set_tokens(&self, tokens: &AuthTokens);

    fn clear(&self);

    fn token_expiration(&self, token: &str) -> Option<DateTime<Utc>> {
        decode_expiration(token)
    }
}

/// Reads `exp` (seconds since epoch) from a JWT payload without verifying the signature.
pub fn decode_expiration(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let decoded = match BASE64_URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(?err, "Invalid token format");
            return None;
        }
    };

    let claims: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

#[derive(Debug, Default)]
struct Session {
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// In-process token store.
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    session: RwLock<Session>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            session: RwLock::new(Session {
                access_token: Some(access_token.into()),
                refresh_token: Some(refresh_token.into()),
            }),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn access_token(&self) -> Option<String> {
        self.session.read().unwrap_or_else(PoisonError::into_inner).access_token.clone()
    }

    fn refresh_token(&self) -> Option<String> {
        self.session.read().unwrap_or_else(PoisonError::into_inner).refresh_token.clone()
    }

    fn set_tokens(&self, tokens: &AuthTokens) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(access) = tokens.usable_access_token() {
            session.access_token = Some(access.to_string());
        }
        if let Some(refresh) = tokens.refresh_token.as_ref() {
            session.refresh_token = Some(refresh.clone());
        }
    }

    fn clear(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Session::default();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn jwt_with_exp(exp: i64) -> String {
        let header = BASE64_URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let payload = BASE64_URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"u1","exp":{}}}"#, exp));
        format!("{}.{}.signature", header, payload)
    }

    #[test]
    fn test_decode_expiration() {
        let token = jwt_with_exp(1_900_000_000);
        let exp = decode_expiration(&token).unwrap();
        assert_eq!(exp.timestamp(), 1_900_000_000);
    }

    #[test]
    fn test_malformed_token_has_no_expiration() {
        assert!(decode_expiration("not-a-jwt").is_none());
        assert!(decode_expiration("a.%%%.c").is_none());
        let no_exp = format!("x.{}.y", BASE64_URL_SAFE_NO_PAD.encode(br#"{"sub":"u1"}"#));
        assert!(decode_expiration(&no_exp).is_none());
    }

    #[test]
    fn test_set_keeps_missing_fields() {
        let store = MemoryTokenStore::with_tokens("old-access", "old-refresh");
        store.set_tokens(&AuthTokens {
            access_token: Some("new-access".into()),
            ..Default::default()
        });

        assert_eq!(store.access_token().as_deref(), Some("new-access"));
        assert_eq!(store.refresh_token().as_deref(), Some("old-refresh"));

        store.clear();
        assert!(store.access_token().is_none());
        assert!(store.refresh_token().is_none());
    }
}
