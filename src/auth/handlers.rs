use axum::{
    extract::{rejection::JsonRejection, FromRef, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use time::OffsetDateTime;
use tracing::{instrument, warn};

use super::{
    dto::{LoginRequest, TokenResponse},
    extractors::token_from_parts,
    jwt::{IssuedToken, JwtKeys},
    services::authenticate,
};
use crate::{
    error::{message, ApiError},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh_token", post(refresh))
}

fn token_response(issued: IssuedToken) -> Json<TokenResponse> {
    Json(TokenResponse {
        code: StatusCode::OK.as_u16(),
        token: issued.token,
        expire: issued.expires_at,
    })
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Json(payload) = payload?;
    let keys = JwtKeys::from_ref(&state);
    let username = payload.username.trim();
    let issued = authenticate(state.kv.as_ref(), &keys, username, &payload.password).await?;
    Ok(token_response(issued))
}

/// Sessions are stateless; this only drops the cookie copy of the token.
pub async fn logout() -> impl IntoResponse {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        header::HeaderValue::from_static("jwt=; Path=/; Max-Age=0; HttpOnly"),
    );
    (headers, message(StatusCode::OK, "logged out"))
}

#[instrument(skip_all)]
pub async fn refresh(
    State(state): State<AppState>,
    parts: Parts,
) -> Result<Json<TokenResponse>, ApiError> {
    let token = token_from_parts(&parts).ok_or(ApiError::Unauthenticated)?;
    let keys = JwtKeys::from_ref(&state);
    let issued = keys
        .refresh_at(&token, OffsetDateTime::now_utc())
        .map_err(|e| {
            warn!(error = %e, "refresh rejected");
            ApiError::Unauthenticated
        })?;
    Ok(token_response(issued))
}
