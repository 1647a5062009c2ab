use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Returned by login and refresh.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub code: u16,
    pub token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expire: OffsetDateTime,
}
