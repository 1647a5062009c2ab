use std::collections::HashMap;

use axum::extract::Multipart;
use serde::Deserialize;

use crate::{error::ApiError, images::services::UploadItem};

/// Text fields plus the optional `img` file of a multipart form.
#[derive(Default)]
pub struct ProfileForm {
    fields: HashMap<String, String>,
    pub image: Option<UploadItem>,
}

impl ProfileForm {
    pub async fn read(mut mp: Multipart) -> Result<Self, ApiError> {
        let mut form = ProfileForm::default();
        while let Some(field) = mp
            .next_field()
            .await
            .map_err(|e| ApiError::Validation(e.body_text()))?
        {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == "img" {
                let content_type = field.content_type().map(str::to_string);
                let file_name = field.file_name().map(str::to_string);
                let body = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::Validation(e.body_text()))?;
                form.image = Some(UploadItem {
                    body,
                    content_type,
                    file_name,
                });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::Validation(e.body_text()))?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    pub fn take(&mut self, name: &str) -> Option<String> {
        self.fields.remove(name)
    }

    pub fn require(&mut self, name: &'static str) -> Result<String, ApiError> {
        self.take(name)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ApiError::Validation(format!("{name} is required")))
    }
}

/// Signup input after the multipart form has been unpacked.
pub struct NewUser {
    pub username: String,
    pub nickname: String,
    pub phone: String,
    pub password: String,
    pub image: UploadItem,
}

impl TryFrom<ProfileForm> for NewUser {
    type Error = ApiError;

    fn try_from(mut form: ProfileForm) -> Result<Self, Self::Error> {
        Ok(NewUser {
            username: form.require("username")?.trim().to_string(),
            nickname: form.require("nickname")?,
            phone: form.require("phone")?,
            password: form.require("password")?,
            image: form
                .image
                .take()
                .filter(|img| !img.body.is_empty())
                .ok_or_else(|| ApiError::Validation("img is required".into()))?,
        })
    }
}

/// Partial profile update; `None` leaves the stored value alone.
///
/// A blank `username` and an empty `img` part count as not sent, since form
/// clients tend to submit every input whether or not it was filled in.
#[derive(Default)]
pub struct ProfileChanges {
    pub username: Option<String>,
    pub nickname: Option<String>,
    pub phone: Option<String>,
    pub password: Option<String>,
    pub image: Option<UploadItem>,
}

impl From<ProfileForm> for ProfileChanges {
    fn from(mut form: ProfileForm) -> Self {
        ProfileChanges {
            username: form.take("username").filter(|u| !u.trim().is_empty()),
            nickname: form.take("nickname"),
            phone: form.take("phone"),
            password: form.take("password"),
            image: form.image.take().filter(|img| !img.body.is_empty()),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResetPointsRequest {
    pub points: Option<i64>,
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn form(fields: &[(&str, &str)], img: &'static [u8]) -> ProfileForm {
        ProfileForm {
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            image: Some(UploadItem {
                body: Bytes::from_static(img),
                content_type: Some("image/png".into()),
                file_name: Some("a.png".into()),
            }),
        }
    }

    const SIGNUP: &[(&str, &str)] = &[
        ("username", "alice"),
        ("nickname", "Alice"),
        ("phone", "555-0100"),
        ("password", "secret"),
    ];

    #[test]
    fn signup_needs_a_non_empty_image() {
        let err = NewUser::try_from(form(SIGNUP, b"")).err().unwrap();
        assert!(matches!(err, ApiError::Validation(m) if m == "img is required"));
        assert!(NewUser::try_from(form(SIGNUP, b"PNG")).is_ok());
    }

    #[test]
    fn blank_username_and_empty_image_are_not_changes() {
        let changes = ProfileChanges::from(form(&[("username", "  "), ("phone", "1")], b""));
        assert!(changes.username.is_none());
        assert!(changes.image.is_none());
        assert_eq!(changes.phone.as_deref(), Some("1"));
    }
}
