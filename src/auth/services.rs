use tracing::{info, warn};

use super::{
    jwt::{IssuedToken, JwtKeys},
    password,
    repo::Credential,
};
use crate::{error::ApiError, kv::KvStore};

/// Checks a username/password pair and issues a token for it.
///
/// Unknown usernames and wrong passwords fail identically.
pub async fn authenticate(
    kv: &dyn KvStore,
    keys: &JwtKeys,
    username: &str,
    plain: &str,
) -> Result<IssuedToken, ApiError> {
    if username.is_empty() || plain.is_empty() {
        return Err(ApiError::Validation("username and password are required".into()));
    }

    let credential = Credential::find(kv, username).await?;
    let known = credential.is_some();
    let ok = password::verify(plain.to_string(), credential.map(|c| c.password_hash)).await?;
    if !ok {
        warn!(username, known, "login rejected");
        return Err(ApiError::InvalidCredentials);
    }

    let issued = keys.sign(username)?;
    info!(username, "user logged in");
    Ok(issued)
}
