use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::kv::{KvStore, PROFILES_KEY};

/// Public user data, stored as JSON under the username in the profiles hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub nickname: String,
    pub points: u64,
    pub phone: String,
    #[serde(rename = "imgUrl")]
    pub image_url: String,
}

impl Profile {
    pub async fn find(kv: &dyn KvStore, username: &str) -> Result<Option<Profile>, ApiError> {
        match kv.hget(PROFILES_KEY, username).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Creates or overwrites the profile.
    pub async fn save(&self, kv: &dyn KvStore) -> Result<(), ApiError> {
        let raw = serde_json::to_string(self)?;
        kv.hset(PROFILES_KEY, &self.username, &raw).await?;
        Ok(())
    }
}
