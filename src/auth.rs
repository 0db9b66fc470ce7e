use crate::{config::AppConfig, shortener::derive_short_id, AppState};
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{
    cookie::{Cookie, SameSite},
    CookieJar,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// ── Tokens ─────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: String,
    exp: i64,
}

/// Signs and verifies the HS256 tokens that carry a user ID.
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: chrono::Duration,
    pub cookie_name: String,
}

impl TokenKeys {
    pub fn new(config: &AppConfig) -> Self {
        let secret = config.secret_key.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
            ttl: chrono::Duration::hours(config.token_exp_hours as i64),
            cookie_name: config.cookie_name.clone(),
        }
    }

    pub fn issue(&self, user_id: &str) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            user_id: user_id.to_owned(),
            exp: (chrono::Utc::now() + self.ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
    }

    /// Return the user ID carried by a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<String> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .ok()
            .map(|data| data.claims.user_id)
            .filter(|id| !id.is_empty())
    }
}

/// Mint a fresh user ID.
pub fn generate_user_id() -> String {
    format!("us-{}", derive_short_id(&Uuid::new_v4().to_string()))
}

// ── Middleware ─────────────────────────────────────────────────────────────

/// The caller, as resolved by [`identify`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
    /// The ID was minted for this request; the caller has no history yet.
    pub is_new: bool,
}

/// Resolve the caller from the token cookie or a bearer header.
///
/// A missing or invalid token mints a new user and sets a fresh cookie on
/// the response, so every handler downstream sees a [`CurrentUser`].
pub async fn identify(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    mut req: Request,
    next: Next,
) -> Response {
    let keys = &state.tokens;

    let existing = jar
        .get(&keys.cookie_name)
        .and_then(|c| keys.verify(c.value()))
        .or_else(|| bearer_token(req.headers()).and_then(|token| keys.verify(&token)));

    if let Some(id) = existing {
        req.extensions_mut().insert(CurrentUser { id, is_new: false });
        return next.run(req).await;
    }

    let id = generate_user_id();
    let token = match keys.issue(&id) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!("Cannot sign token for new user {}: {:?}", id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
        }
    };
    tracing::info!("New user ID '{}' issued", id);

    let cookie = Cookie::build((keys.cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(keys.ttl.num_seconds()))
        .build();

    req.extensions_mut().insert(CurrentUser { id, is_new: true });
    (jar.add(cookie), next.run(req).await).into_response()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_owned())
}

// ── Extractor ──────────────────────────────────────────────────────────────

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or((StatusCode::UNAUTHORIZED, "Unauthorized: No user ID"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Cli;
    use clap::Parser;

    fn keys(secret: &str) -> TokenKeys {
        let cli = Cli::try_parse_from(["shortener", "--secret-key", secret]).unwrap();
        TokenKeys::new(&AppConfig::from_cli(cli).unwrap())
    }

    #[test]
    fn issued_token_verifies() {
        let keys = keys("secret-1");
        let token = keys.issue("us-ABCDEF01").unwrap();
        assert_eq!(keys.verify(&token).as_deref(), Some("us-ABCDEF01"));
    }

    #[test]
    fn foreign_or_garbage_tokens_are_rejected() {
        let token = keys("secret-1").issue("us-ABCDEF01").unwrap();

        assert_eq!(keys("secret-2").verify(&token), None);
        assert_eq!(keys("secret-1").verify("not-a-jwt"), None);
        assert_eq!(keys("secret-1").verify(""), None);
    }

    #[test]
    fn generated_ids_are_prefixed_and_distinct() {
        let a = generate_user_id();
        let b = generate_user_id();

        assert!(a.starts_with("us-"));
        assert_eq!(a.len(), 11);
        assert_ne!(a, b);
    }

    #[test]
    fn bearer_header_is_read() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer abc.def.ghi".parse().unwrap());
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, "Basic Zm9vOmJhcg==".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
