//! Signed user-identity cookie and trusted-subnet checks
//!
//! Owners are not authenticated accounts: any request without a valid `auth`
//! cookie is handed a fresh random owner id, signed into an HS256 JWT.

mod subnet;

pub use subnet::is_trusted;

use anyhow::{Context, Result};
use axum::{
    extract::Request,
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::alias::new_random_string;

pub const AUTH_COOKIE: &str = "auth";
const TOKEN_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 30);

#[derive(Debug, Serialize, Deserialize)]
struct UserClaims {
    user_id: i64,
    exp: u64,
}

/// Owner making the current request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: i64,
    /// False when the id was issued by this very request
    pub authenticated: bool,
}

pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl AuthService {
    /// Without a secret a random one is generated, and cookies do not survive restarts
    pub fn new(secret: Option<&str>) -> Self {
        let secret = match secret {
            Some(s) => s.to_string(),
            None => {
                warn!("No AUTH_SECRET configured; user cookies will not survive restarts");
                new_random_string(32)
            }
        };

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn issue(&self, user_id: i64) -> Result<String> {
        let exp = SystemTime::now()
            .duration_since(UNIX_EPOCH)?
            .saturating_add(TOKEN_TTL)
            .as_secs();

        encode(
            &Header::new(Algorithm::HS256),
            &UserClaims { user_id, exp },
            &self.encoding,
        )
        .context("failed to sign user token")
    }

    pub fn verify(&self, token: &str) -> Result<i64> {
        let data = decode::<UserClaims>(token, &self.decoding, &self.validation)
            .context("invalid user token")?;
        Ok(data.claims.user_id)
    }

    pub fn new_user_id() -> i64 {
        rand::rng().random_range(1..=i64::from(u32::MAX))
    }
}

fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Attach a [`CurrentUser`] to every request, issuing a cookie when needed
pub async fn user_middleware(
    auth_service: Arc<AuthService>,
    mut request: Request,
    next: Next,
) -> Response {
    let existing = cookie_value(request.headers(), AUTH_COOKIE)
        .and_then(|token| auth_service.verify(token).ok());

    let user = match existing {
        Some(id) => CurrentUser {
            id,
            authenticated: true,
        },
        None => CurrentUser {
            id: AuthService::new_user_id(),
            authenticated: false,
        },
    };
    request.extensions_mut().insert(user);

    let mut response = next.run(request).await;

    if !user.authenticated {
        match auth_service.issue(user.id) {
            Ok(token) => {
                let cookie = format!(
                    "{AUTH_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
                    TOKEN_TTL.as_secs()
                );
                match HeaderValue::from_str(&cookie) {
                    Ok(value) => {
                        response.headers_mut().append(header::SET_COOKIE, value);
                        debug!(user_id = user.id, "issued user cookie");
                    }
                    Err(e) => warn!("Failed to encode user cookie: {}", e),
                }
            }
            Err(e) => warn!("Failed to issue user cookie: {}", e),
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issued_token_verifies() {
        let auth = AuthService::new(Some("secret"));
        let token = auth.issue(42).unwrap();
        assert_eq!(auth.verify(&token).unwrap(), 42);
    }

    #[test]
    fn test_token_from_other_secret_is_rejected() {
        let token = AuthService::new(Some("one")).issue(42).unwrap();
        assert!(AuthService::new(Some("two")).verify(&token).is_err());
        assert!(AuthService::new(Some("two")).verify("garbage").is_err());
    }

    #[test]
    fn test_cookie_value_parses_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth=abc.def.ghi"),
        );
        assert_eq!(cookie_value(&headers, "auth"), Some("abc.def.ghi"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_new_user_ids_are_positive() {
        for _ in 0..100 {
            assert!(AuthService::new_user_id() > 0);
        }
    }
}
