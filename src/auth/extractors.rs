use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, Query},
    http::{header, request::Parts},
};
use serde::Deserialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::jwt::JwtKeys;
use crate::{error::ApiError, kv::KvStore, state::AppState, users::repo::Profile};

pub const TOKEN_COOKIE: &str = "jwt";

/// Outcome of looking up the caller behind a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Identity(Profile),
    Anonymous,
}

/// Verifies `token` at `now` and loads the live profile it names.
///
/// Bad signatures, expired tokens and unknown usernames all resolve to
/// [`Resolution::Anonymous`]. Store failures are errors, not anonymity.
pub async fn resolve_at(
    keys: &JwtKeys,
    kv: &dyn KvStore,
    token: &str,
    now: OffsetDateTime,
) -> Result<Resolution, ApiError> {
    let claims = match keys.verify_at(token, now) {
        Ok(c) => c,
        Err(e) => {
            debug!(error = %e, "token rejected");
            return Ok(Resolution::Anonymous);
        }
    };
    match Profile::find(kv, &claims.sub).await? {
        Some(profile) => Ok(Resolution::Identity(profile)),
        None => {
            warn!(username = %claims.sub, "token names a user without a profile");
            Ok(Resolution::Anonymous)
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Header `Authorization: Bearer`, then `?token=`, then the `jwt` cookie.
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(token) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    if let Ok(Query(TokenQuery { token: Some(token) })) = Query::try_from_uri(&parts.uri) {
        return Some(token);
    }

    parts
        .headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            pair.trim()
                .strip_prefix(TOKEN_COOKIE)
                .and_then(|rest| rest.strip_prefix('='))
                .map(str::to_string)
        })
}

/// The authenticated caller. Extracting it is the gate in front of every
/// protected handler: anything short of a live profile becomes `401`.
#[derive(Debug, Clone)]
pub struct Identity(pub Profile);

impl Identity {
    pub fn username(&self) -> &str {
        &self.0.username
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Some(token) = token_from_parts(parts) else {
            return Err(ApiError::Unauthenticated);
        };
        let keys = JwtKeys::from_ref(state);
        match resolve_at(&keys, state.kv.as_ref(), &token, OffsetDateTime::now_utc()).await? {
            Resolution::Identity(profile) => Ok(Identity(profile)),
            Resolution::Anonymous => Err(ApiError::Unauthenticated),
        }
    }
}
