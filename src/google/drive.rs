use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sqlx::PgPool;

use super::client::{access_token_for, http_client, ProvisionError};

#[derive(Debug, Clone)]
pub struct FolderHandle {
    pub folder_id: String,
    pub folder_name: String,
}

/// Storage-sharing capability, performed under a delegating user's identity.
#[async_trait]
pub trait DriveClient: Send + Sync {
    /// Search-then-create; concurrent calls with the same name may create
    /// duplicate folders (accepted race, narrow window).
    async fn find_or_create_folder(
        &self,
        user_id: i32,
        name: &str,
    ) -> Result<FolderHandle, ProvisionError>;

    /// Grants access and triggers a notification email to the grantee.
    async fn share_folder(
        &self,
        user_id: i32,
        folder_id: &str,
        email: &str,
        role: &str,
    ) -> Result<(), ProvisionError>;
}

pub struct GoogleDriveClient {
    pool: PgPool,
    base: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
    name: String,
}

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

impl GoogleDriveClient {
    pub fn new(pool: PgPool) -> Self {
        Self::with_base(pool, crate::config::GOOGLE_DRIVE_API_BASE.clone())
    }

    pub fn with_base(pool: PgPool, base: impl Into<String>) -> Self {
        Self {
            pool,
            base: base.into().trim_end_matches('/').to_string(),
            http: http_client(),
        }
    }
}

#[async_trait]
impl DriveClient for GoogleDriveClient {
    async fn find_or_create_folder(
        &self,
        user_id: i32,
        name: &str,
    ) -> Result<FolderHandle, ProvisionError> {
        let token = access_token_for(&self.pool, user_id).await?;
        let query = format!("name='{name}' and mimeType='{FOLDER_MIME}' and trashed=false");
        let found: FileList = self
            .http
            .get(format!("{}/files", self.base))
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id, name)"),
                ("spaces", "drive"),
            ])
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(existing) = found.files.into_iter().next() {
            return Ok(FolderHandle {
                folder_id: existing.id,
                folder_name: existing.name,
            });
        }

        let created: DriveFile = self
            .http
            .post(format!("{}/files", self.base))
            .query(&[("fields", "id, name")])
            .bearer_auth(&token)
            .json(&json!({ "name": name, "mimeType": FOLDER_MIME }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(FolderHandle {
            folder_id: created.id,
            folder_name: created.name,
        })
    }

    async fn share_folder(
        &self,
        user_id: i32,
        folder_id: &str,
        email: &str,
        role: &str,
    ) -> Result<(), ProvisionError> {
        let token = access_token_for(&self.pool, user_id).await?;
        self.http
            .post(format!("{}/files/{}/permissions", self.base, folder_id))
            .query(&[("sendNotificationEmail", "true")])
            .bearer_auth(&token)
            .json(&json!({ "type": "user", "role": role, "emailAddress": email }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
