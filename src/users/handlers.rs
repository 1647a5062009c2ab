use axum::{
    extract::{
        multipart::MultipartRejection, rejection::JsonRejection, DefaultBodyLimit, Multipart,
        State,
    },
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{NewUser, ProfileChanges, ProfileForm, ResetPointsRequest},
    repo::Profile,
    services::{register_user, reset_points, update_profile},
};
use crate::{
    auth::Identity,
    error::{message, ApiError, Envelope, Message},
    state::AppState,
};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

type Reply = (StatusCode, Json<Envelope<Message>>);

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/getmes", get(get_me))
        .route("/resetpoints", post(reset_points_handler))
        .route(
            "/modify",
            put(modify).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
}

#[instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Reply, ApiError> {
    let new_user = NewUser::try_from(ProfileForm::read(mp?).await?)?;
    register_user(&state, new_user).await?;
    Ok(message(StatusCode::OK, "signed up"))
}

#[instrument(skip_all, fields(username = %identity.username()))]
pub async fn get_me(identity: Identity) -> Json<Profile> {
    Json(identity.0)
}

#[instrument(skip_all, fields(username = %identity.username()))]
pub async fn modify(
    State(state): State<AppState>,
    identity: Identity,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Reply, ApiError> {
    let changes = ProfileChanges::from(ProfileForm::read(mp?).await?);
    update_profile(&state, &identity.0, changes).await?;
    Ok(message(StatusCode::OK, "profile updated"))
}

#[instrument(skip_all, fields(username = %identity.username()))]
pub async fn reset_points_handler(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<ResetPointsRequest>, JsonRejection>,
) -> Result<Reply, ApiError> {
    let Json(body) = body?;
    let points = body
        .points
        .ok_or_else(|| ApiError::Validation("points is required".into()))?;
    reset_points(&state, &identity.0, points).await?;
    Ok(message(StatusCode::OK, "points updated"))
}
