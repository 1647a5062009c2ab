use axum::extract::FromRef;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use time::{Duration, OffsetDateTime};
use tracing::debug;

use super::claims::Claims;
use crate::{config::JwtConfig, state::AppState};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("malformed or badly signed token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("token expired")]
    Expired,
    #[error("token is past its refresh window")]
    RefreshWindowClosed,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub ttl: Duration,
    /// How long after expiry a token may still be exchanged for a new one.
    pub refresh_window: Duration,
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        Self::new(&state.config.jwt)
    }
}

impl JwtKeys {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            ttl: Duration::minutes(cfg.ttl_minutes),
            refresh_window: Duration::minutes(cfg.refresh_ttl_minutes),
        }
    }

    pub fn sign(&self, username: &str) -> anyhow::Result<IssuedToken> {
        self.sign_at(username, OffsetDateTime::now_utc())
    }

    pub fn sign_at(&self, username: &str, now: OffsetDateTime) -> anyhow::Result<IssuedToken> {
        let expires_at = now + self.ttl;
        let claims = Claims {
            sub: username.to_string(),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(username, "jwt signed");
        Ok(IssuedToken { token, expires_at })
    }

    /// Signature and shape only; expiry is checked by the callers against their own clock.
    fn decode_claims(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        Ok(data.claims)
    }

    pub fn verify_at(&self, token: &str, now: OffsetDateTime) -> Result<Claims, TokenError> {
        let claims = self.decode_claims(token)?;
        if now.unix_timestamp() >= claims.exp {
            return Err(TokenError::Expired);
        }
        debug!(username = %claims.sub, "jwt verified");
        Ok(claims)
    }

    /// Accepts tokens that are still valid or expired less than `refresh_window` ago.
    pub fn verify_refreshable_at(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<Claims, TokenError> {
        let claims = self.decode_claims(token)?;
        let deadline = claims.exp + self.refresh_window.whole_seconds();
        if now.unix_timestamp() >= deadline {
            return Err(TokenError::RefreshWindowClosed);
        }
        Ok(claims)
    }

    pub fn refresh_at(&self, token: &str, now: OffsetDateTime) -> anyhow::Result<IssuedToken> {
        let claims = self.verify_refreshable_at(token, now)?;
        self.sign_at(&claims.sub, now)
    }
}
