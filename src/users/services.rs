use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};

use super::{
    dto::{NewUser, ProfileChanges},
    repo::Profile,
};
use crate::{
    auth::{password, repo::Credential},
    error::ApiError,
    images::services::{discard_image, discard_image_by_url, store_image},
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 6;

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.@-]{1,64}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

fn check_password(plain: &str) -> Result<(), ApiError> {
    if plain.chars().count() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

/// Creates the profile and credential for a new user.
///
/// The profile is written first and the credential last. A failed credential
/// write is not undone: a timeout does not tell whether the write landed, and
/// deleting the profile could strand a credential with no profile. A
/// profile left without a credential cannot sign in, and the name is still
/// free for a retry, which overwrites it. The absence check and the writes are
/// separate store calls, so two concurrent signups for the same new name can
/// both pass it and the later writes win.
pub async fn register_user(state: &AppState, new: NewUser) -> Result<Profile, ApiError> {
    if !is_valid_username(&new.username) {
        warn!(username = %new.username, "invalid username");
        return Err(ApiError::Validation("invalid username".into()));
    }
    check_password(&new.password)?;

    let kv = state.kv.as_ref();
    if Credential::exists(kv, &new.username).await? {
        warn!(username = %new.username, "username already registered");
        return Err(ApiError::UsernameTaken);
    }

    let password_hash = password::hash(new.password).await?;
    let image = store_image(state.storage.as_ref(), new.image).await?;

    let profile = Profile {
        username: new.username,
        nickname: new.nickname,
        points: 0,
        phone: new.phone,
        image_url: image.url,
    };
    if let Err(e) = profile.save(kv).await {
        discard_image(state.storage.as_ref(), &image.key).await;
        return Err(e);
    }

    let credential = Credential {
        username: profile.username.clone(),
        password_hash,
    };
    if let Err(e) = credential.save(kv).await {
        error!(error = %e, username = %profile.username, "credential write failed after profile write");
        return Err(e);
    }

    info!(username = %profile.username, "user registered");
    Ok(profile)
}

/// Applies the fields present in `changes` to the caller's profile.
///
/// The profile is written before the credential. If the password write then
/// fails the call errors, but the other changes (and the avatar swap) stay.
pub async fn update_profile(
    state: &AppState,
    current: &Profile,
    changes: ProfileChanges,
) -> Result<Profile, ApiError> {
    if let Some(username) = &changes.username {
        if username != &current.username {
            warn!(username = %current.username, requested = %username, "attempt to rename account");
            return Err(ApiError::ImmutableField("username"));
        }
    }
    let password_hash = match changes.password {
        Some(plain) => {
            check_password(&plain)?;
            Some(password::hash(plain).await?)
        }
        None => None,
    };

    let kv = state.kv.as_ref();
    let storage = state.storage.as_ref();

    let mut updated = current.clone();
    if let Some(nickname) = changes.nickname {
        updated.nickname = nickname;
    }
    if let Some(phone) = changes.phone {
        updated.phone = phone;
    }
    let new_image = match changes.image {
        Some(img) => Some(store_image(storage, img).await?),
        None => None,
    };
    if let Some(img) = &new_image {
        updated.image_url = img.url.clone();
    }

    if let Err(e) = updated.save(kv).await {
        if let Some(img) = &new_image {
            discard_image(storage, &img.key).await;
        }
        return Err(e);
    }

    // The stored profile now points at the new avatar.
    if new_image.is_some() && !current.image_url.is_empty() {
        discard_image_by_url(storage, &current.image_url).await;
    }

    if let Some(password_hash) = password_hash {
        Credential {
            username: updated.username.clone(),
            password_hash,
        }
        .save(kv)
        .await?;
        info!(username = %updated.username, "password rotated");
    }

    info!(username = %updated.username, "profile updated");
    Ok(updated)
}

pub async fn reset_points(state: &AppState, current: &Profile, points: i64) -> Result<Profile, ApiError> {
    let points = u64::try_from(points)
        .map_err(|_| ApiError::Validation("points must not be negative".into()))?;
    let mut updated = current.clone();
    updated.points = points;
    updated.save(state.kv.as_ref()).await?;
    info!(username = %updated.username, points, "points reset");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use time::OffsetDateTime;

    use super::*;
    use crate::{
        auth::{
            extractors::{resolve_at, Resolution},
            jwt::JwtKeys,
            services::authenticate,
        },
        images::services::UploadItem,
        kv::{KvError, KvStore, MemoryStore, CREDENTIALS_KEY},
        state::fake::{self, FakeStorage},
    };

    /// Memory store whose writes to the credentials hash can be made to time
    /// out, either before or after they are applied.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_credentials: AtomicBool,
        late_reply_credentials: AtomicBool,
    }

    #[async_trait]
    impl KvStore for FlakyStore {
        async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
            self.inner.hget(key, field).await
        }
        async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
            if key == CREDENTIALS_KEY && self.fail_credentials.load(Ordering::SeqCst) {
                return Err(KvError::Timeout(std::time::Duration::from_secs(5)));
            }
            self.inner.hset(key, field, value).await?;
            if key == CREDENTIALS_KEY && self.late_reply_credentials.load(Ordering::SeqCst) {
                return Err(KvError::Timeout(std::time::Duration::from_secs(5)));
            }
            Ok(())
        }
        async fn rpush(&self, key: &str, value: &str) -> Result<(), KvError> {
            self.inner.rpush(key, value).await
        }
        async fn lrange_all(&self, key: &str) -> Result<Vec<String>, KvError> {
            self.inner.lrange_all(key).await
        }
        async fn lrem_first(&self, key: &str, value: &str) -> Result<bool, KvError> {
            self.inner.lrem_first(key, value).await
        }
    }

    fn png() -> UploadItem {
        UploadItem {
            body: Bytes::from_static(b"\x89PNG"),
            content_type: Some("image/png".into()),
            file_name: Some("a.png".into()),
        }
    }

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.into(),
            nickname: "Alice".into(),
            phone: "555-0100".into(),
            password: "secret".into(),
            image: png(),
        }
    }

    fn state_with(kv: Arc<dyn KvStore>, storage: Arc<FakeStorage>) -> AppState {
        AppState::from_parts(Arc::new(fake::config()), kv, storage)
    }

    #[tokio::test]
    async fn signup_creates_profile_and_credential() {
        let state = AppState::fake();
        let profile = register_user(&state, new_user("alice")).await.unwrap();
        assert_eq!(profile.username, "alice");
        assert_eq!(profile.points, 0);

        let kv = state.kv.as_ref();
        assert_eq!(Profile::find(kv, "alice").await.unwrap(), Some(profile));
        assert!(Credential::exists(kv, "alice").await.unwrap());
    }

    #[tokio::test]
    async fn signup_rejects_taken_username() {
        let state = AppState::fake();
        register_user(&state, new_user("alice")).await.unwrap();
        let err = register_user(&state, new_user("alice")).await.unwrap_err();
        assert!(matches!(err, ApiError::UsernameTaken));
    }

    #[tokio::test]
    async fn signup_validates_input() {
        let state = AppState::fake();
        let err = register_user(&state, new_user("bad name")).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let mut short = new_user("alice");
        short.password = "123".into();
        let err = register_user(&state, short).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn failed_credential_write_leaves_name_free_for_retry() {
        let kv = Arc::new(FlakyStore::default());
        kv.fail_credentials.store(true, Ordering::SeqCst);
        let state = state_with(kv.clone(), Arc::new(FakeStorage::default()));

        let err = register_user(&state, new_user("alice")).await.unwrap_err();
        assert!(matches!(err, ApiError::StoreUnavailable(_)));
        assert!(!Credential::exists(kv.as_ref(), "alice").await.unwrap());

        let err = authenticate(kv.as_ref(), &JwtKeys::new(&state.config.jwt), "alice", "secret")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidCredentials));

        kv.fail_credentials.store(false, Ordering::SeqCst);
        let mut retry = new_user("alice");
        retry.nickname = "Second try".into();
        register_user(&state, retry).await.unwrap();
        let stored = Profile::find(kv.as_ref(), "alice").await.unwrap().unwrap();
        assert_eq!(stored.nickname, "Second try");
    }

    #[tokio::test]
    async fn credential_applied_but_reply_lost_keeps_account_usable() {
        let kv = Arc::new(FlakyStore::default());
        kv.late_reply_credentials.store(true, Ordering::SeqCst);
        let state = state_with(kv.clone(), Arc::new(FakeStorage::default()));

        let err = register_user(&state, new_user("alice")).await.unwrap_err();
        assert!(matches!(err, ApiError::StoreUnavailable(KvError::Timeout(_))));
        kv.late_reply_credentials.store(false, Ordering::SeqCst);

        // Both halves landed, so the account works and the name is taken.
        assert!(Credential::exists(kv.as_ref(), "alice").await.unwrap());
        assert!(Profile::find(kv.as_ref(), "alice").await.unwrap().is_some());
        let keys = JwtKeys::new(&state.config.jwt);
        let issued = authenticate(kv.as_ref(), &keys, "alice", "secret").await.unwrap();
        let resolved = resolve_at(&keys, kv.as_ref(), &issued.token, OffsetDateTime::now_utc())
            .await
            .unwrap();
        assert!(matches!(resolved, Resolution::Identity(p) if p.username == "alice"));
        assert!(matches!(
            register_user(&state, new_user("alice")).await.unwrap_err(),
            ApiError::UsernameTaken
        ));
    }

    #[tokio::test]
    async fn rename_is_rejected_and_profile_untouched() {
        let state = AppState::fake();
        let alice = register_user(&state, new_user("alice")).await.unwrap();

        let changes = ProfileChanges {
            username: Some("bob".into()),
            nickname: Some("Bobby".into()),
            ..Default::default()
        };
        let err = update_profile(&state, &alice, changes).await.unwrap_err();
        assert!(matches!(err, ApiError::ImmutableField("username")));
        assert_eq!(
            Profile::find(state.kv.as_ref(), "alice").await.unwrap(),
            Some(alice)
        );
    }

    #[tokio::test]
    async fn partial_update_keeps_omitted_fields() {
        let state = AppState::fake();
        let alice = register_user(&state, new_user("alice")).await.unwrap();

        let changes = ProfileChanges {
            username: Some("alice".into()),
            phone: Some("555-0199".into()),
            ..Default::default()
        };
        let updated = update_profile(&state, &alice, changes).await.unwrap();
        assert_eq!(updated.phone, "555-0199");
        assert_eq!(updated.nickname, alice.nickname);
        assert_eq!(updated.image_url, alice.image_url);
        assert_eq!(
            Profile::find(state.kv.as_ref(), "alice").await.unwrap(),
            Some(updated)
        );
    }

    #[tokio::test]
    async fn new_avatar_replaces_old_file() {
        let storage = Arc::new(FakeStorage::default());
        let state = state_with(Arc::new(MemoryStore::new()), storage.clone());
        let alice = register_user(&state, new_user("alice")).await.unwrap();

        let changes = ProfileChanges {
            image: Some(png()),
            ..Default::default()
        };
        let updated = update_profile(&state, &alice, changes).await.unwrap();
        assert_ne!(updated.image_url, alice.image_url);
        let objects = storage.objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        assert!(updated.image_url.ends_with(objects.keys().next().unwrap().as_str()));
    }

    #[tokio::test]
    async fn old_avatar_removed_even_if_password_write_fails() {
        let kv = Arc::new(FlakyStore::default());
        let storage = Arc::new(FakeStorage::default());
        let state = state_with(kv.clone(), storage.clone());
        let alice = register_user(&state, new_user("alice")).await.unwrap();

        kv.fail_credentials.store(true, Ordering::SeqCst);
        let changes = ProfileChanges {
            password: Some("better-secret".into()),
            image: Some(png()),
            ..Default::default()
        };
        let err = update_profile(&state, &alice, changes).await.unwrap_err();
        assert!(matches!(err, ApiError::StoreUnavailable(_)));

        let stored = Profile::find(kv.as_ref(), "alice").await.unwrap().unwrap();
        assert_ne!(stored.image_url, alice.image_url);
        let objects = storage.objects.lock().unwrap();
        assert_eq!(objects.len(), 1);
        assert!(stored.image_url.ends_with(objects.keys().next().unwrap().as_str()));
    }

    #[tokio::test]
    async fn password_rotation_changes_login() {
        let state = AppState::fake();
        let alice = register_user(&state, new_user("alice")).await.unwrap();
        let changes = ProfileChanges {
            password: Some("better-secret".into()),
            ..Default::default()
        };
        update_profile(&state, &alice, changes).await.unwrap();

        let stored = Credential::find(state.kv.as_ref(), "alice").await.unwrap().unwrap();
        assert!(password::verify_password("better-secret", &stored.password_hash).unwrap());
        assert!(!password::verify_password("secret", &stored.password_hash).unwrap());
    }

    #[tokio::test]
    async fn reset_points_overwrites_and_rejects_negative() {
        let state = AppState::fake();
        let alice = register_user(&state, new_user("alice")).await.unwrap();

        let updated = reset_points(&state, &alice, 42).await.unwrap();
        assert_eq!(updated.points, 42);
        let err = reset_points(&state, &updated, -1).await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));
        assert_eq!(
            Profile::find(state.kv.as_ref(), "alice").await.unwrap().unwrap().points,
            42
        );
    }

    #[test]
    fn username_rules() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("a.b-c_d@e"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username("colon:sep"));
    }
}
