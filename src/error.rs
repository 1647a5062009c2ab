use axum::{
    extract::{multipart::MultipartRejection, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::kv::KvError;

/// Failure classes surfaced at the request boundary.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("username already registered")]
    UsernameTaken,
    #[error("not logged in")]
    Unauthenticated,
    #[error("{0} cannot be changed")]
    ImmutableField(&'static str),
    #[error("no record with this id")]
    NotFound,
    #[error("store unavailable")]
    StoreUnavailable(#[from] KvError),
    #[error("stored data is corrupt")]
    Serialization(#[from] serde_json::Error),
    #[error("internal error")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    #[serde(flatten)]
    pub body: T,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Data<T: Serialize> {
    pub data: T,
}

/// `{"code": 200, "message": ...}`
pub fn message(status: StatusCode, text: impl Into<String>) -> (StatusCode, Json<Envelope<Message>>) {
    (
        status,
        Json(Envelope {
            code: status.as_u16(),
            body: Message {
                message: text.into(),
            },
        }),
    )
}

/// `{"code": 200, "data": ...}`
pub fn data<T: Serialize>(data: T) -> Json<Envelope<Data<T>>> {
    Json(Envelope {
        code: StatusCode::OK.as_u16(),
        body: Data { data },
    })
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::ImmutableField(_) => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials | ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::UsernameTaken => StatusCode::CONFLICT,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Serialization(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::Validation(e.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(e: MultipartRejection) -> Self {
        ApiError::Validation(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::StoreUnavailable(e) => error!(error = %e, "store failure"),
            ApiError::Serialization(e) => error!(error = %e, "serialization failure"),
            ApiError::Internal(e) => error!(error = ?e, "internal failure"),
            _ => {}
        }
        // Display of the 5xx variants never includes the source error.
        message(status, self.to_string()).into_response()
    }
}
