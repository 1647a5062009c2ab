use crate::error::ApiError;
use crate::kv::{KvStore, CREDENTIALS_KEY};

/// Password hash stored under the username in the credentials hash.
#[derive(Debug, Clone)]
pub struct Credential {
    pub username: String,
    pub password_hash: String, // Argon2 PHC string
}

impl Credential {
    pub async fn find(kv: &dyn KvStore, username: &str) -> Result<Option<Credential>, ApiError> {
        let hash = kv.hget(CREDENTIALS_KEY, username).await?;
        Ok(hash
            .filter(|h| !h.is_empty())
            .map(|password_hash| Credential {
                username: username.to_string(),
                password_hash,
            }))
    }

    pub async fn exists(kv: &dyn KvStore, username: &str) -> Result<bool, ApiError> {
        Ok(Self::find(kv, username).await?.is_some())
    }

    /// Creates or overwrites the credential.
    pub async fn save(&self, kv: &dyn KvStore) -> Result<(), ApiError> {
        kv.hset(CREDENTIALS_KEY, &self.username, &self.password_hash)
            .await?;
        Ok(())
    }
}
