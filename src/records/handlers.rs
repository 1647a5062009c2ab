use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use tracing::instrument;

use super::{
    dto::{AddRecordRequest, DeleteRecordRequest},
    repo::Record,
    services,
};
use crate::{
    auth::Identity,
    error::{data, message, ApiError, Data, Envelope, Message},
    state::AppState,
};

pub fn protected_routes() -> Router<AppState> {
    Router::new()
        .route("/getlist", get(list_records))
        .route("/add", post(add_record))
        .route("/delete", delete(delete_record))
}

#[instrument(skip_all, fields(username = %identity.username()))]
pub async fn list_records(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<Envelope<Data<Vec<Record>>>>, ApiError> {
    let records = services::list(state.kv.as_ref(), &identity).await?;
    Ok(data(records))
}

#[instrument(skip_all, fields(username = %identity.username()))]
pub async fn add_record(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<AddRecordRequest>, JsonRejection>,
) -> Result<Json<Envelope<Data<Record>>>, ApiError> {
    let Json(req) = body?;
    let record = services::append(state.kv.as_ref(), &identity, req).await?;
    Ok(data(record))
}

#[instrument(skip_all, fields(username = %identity.username()))]
pub async fn delete_record(
    State(state): State<AppState>,
    identity: Identity,
    body: Result<Json<DeleteRecordRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Envelope<Message>>), ApiError> {
    let Json(req) = body?;
    if req.id.is_empty() {
        return Err(ApiError::Validation("id is required".into()));
    }
    services::delete_by_id(state.kv.as_ref(), &identity, &req.id).await?;
    Ok(message(StatusCode::OK, "record deleted"))
}
