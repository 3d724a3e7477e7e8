//! Folder, file and collaboration calls the orchestrator needs.
//!
//! Folder creation treats a 409 name collision as "already there", but only
//! after re-fetching the conflicting entry and checking it is a folder under
//! the expected parent.

use bytes::Bytes;
use reqwest::{StatusCode, multipart};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
    errors::{ApiError, ApiResult},
    models::object::{FileAttributes, FileCollection, FileObject, Folder, ItemEntry, ItemPage},
    services::{
        digest::ContentDigest,
        transport::{AuthenticatedTransport, check, read_json},
    },
};

/// Page size for folder listings (the API maximum).
const LIST_PAGE_LIMIT: u64 = 1000;

#[derive(Debug, Clone)]
pub struct ApiClient {
    transport: AuthenticatedTransport,
    api_base_url: String,
    upload_base_url: String,
}

impl ApiClient {
    pub fn new(
        transport: AuthenticatedTransport,
        api_base_url: impl Into<String>,
        upload_base_url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            upload_base_url: upload_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    pub async fn get_folder(&self, id: &str, cancel: &CancellationToken) -> ApiResult<Folder> {
        let operation = format!("get folder {id}");
        let url = self.api_url(&format!("/folders/{id}"));
        let response = self
            .transport
            .send(&operation, cancel, |http| {
                http.get(&url).query(&[("fields", "id,name,parent")])
            })
            .await?;
        read_json(&operation, response).await
    }

    /// All entries of a folder, following pagination.
    pub async fn list_folder_items(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Vec<ItemEntry>> {
        let operation = format!("list folder {id}");
        let url = self.api_url(&format!("/folders/{id}/items"));
        let mut entries = Vec::new();
        let mut offset = 0u64;

        loop {
            let query = [
                ("fields", "id,type,name,size,sha1".to_string()),
                ("limit", LIST_PAGE_LIMIT.to_string()),
                ("offset", offset.to_string()),
            ];
            let response = self
                .transport
                .send(&operation, cancel, |http| http.get(&url).query(&query))
                .await?;
            let page: ItemPage = read_json(&operation, response).await?;
            let received = page.entries.len() as u64;
            entries.extend(page.entries);

            offset += received;
            if received == 0 || offset >= page.total_count {
                break;
            }
        }
        Ok(entries)
    }

    /// The direct child folder of `parent_id` named exactly `name`.
    pub async fn find_child_folder(
        &self,
        parent_id: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Option<ItemEntry>> {
        let entries = self.list_folder_items(parent_id, cancel).await?;
        Ok(entries
            .into_iter()
            .find(|entry| entry.is_folder() && entry.name == name))
    }

    /// Create a folder, reusing a verified same-named folder on conflict.
    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Folder> {
        let operation = format!("create folder {name:?} in {parent_id}");
        let url = self.api_url("/folders");
        let body = json!({ "name": name, "parent": { "id": parent_id } });
        let response = self
            .transport
            .send(&operation, cancel, |http| http.post(&url).json(&body))
            .await?;

        match read_json::<Folder>(&operation, response).await {
            Ok(folder) => {
                info!(folder_id = %folder.id, name, parent_id, "folder created");
                Ok(folder)
            }
            Err(err) if err.is_conflict() => {
                match self.verified_conflict(&err, name, parent_id, cancel).await? {
                    Some(folder) => {
                        debug!(folder_id = %folder.id, name, "reusing conflicting folder");
                        Ok(folder)
                    }
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn verified_conflict(
        &self,
        err: &ApiError,
        name: &str,
        parent_id: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<Option<Folder>> {
        let Some(candidate) = err
            .conflicts()
            .into_iter()
            .find(|entry| entry.is_folder() && entry.name == name)
        else {
            return Ok(None);
        };

        let folder = self.get_folder(&candidate.id, cancel).await?;
        let same_parent = folder.parent.as_ref().is_some_and(|p| p.id == parent_id);
        Ok((same_parent && folder.name == name).then_some(folder))
    }

    /// Resolve `segments` below `base_id`, creating what is missing.
    ///
    /// Existing folders are reused by exact name, so resolving the same path
    /// twice yields the same id and creates nothing the second time.
    pub async fn resolve_folder_path(
        &self,
        base_id: &str,
        segments: &[String],
        cancel: &CancellationToken,
    ) -> ApiResult<String> {
        let mut current = base_id.to_string();
        for segment in segments {
            current = match self.find_child_folder(&current, segment, cancel).await? {
                Some(existing) => existing.id,
                None => self.create_folder(segment, &current, cancel).await?.id,
            };
        }
        Ok(current)
    }

    pub async fn get_file(&self, id: &str, cancel: &CancellationToken) -> ApiResult<FileObject> {
        let operation = format!("get file {id}");
        let url = self.api_url(&format!("/files/{id}"));
        let response = self
            .transport
            .send(&operation, cancel, |http| {
                http.get(&url)
                    .query(&[("fields", "id,name,size,sha1,parent,created_at")])
            })
            .await?;
        read_json(&operation, response).await
    }

    /// Upload a whole file in one multipart request.
    pub async fn upload_file(
        &self,
        attributes: &FileAttributes,
        content: Bytes,
        digest: &ContentDigest,
        cancel: &CancellationToken,
    ) -> ApiResult<FileObject> {
        let operation = format!("upload file {:?}", attributes.name);
        let url = format!("{}/files/content", self.upload_base_url);
        let attributes_json = serde_json::to_string(attributes)
            .map_err(|e| ApiError::invalid_response(&operation, e.to_string()))?;
        let digest_hex = digest.to_hex();

        let response = self
            .transport
            .send(&operation, cancel, |http| {
                let file_part =
                    multipart::Part::bytes(content.to_vec()).file_name(attributes.name.clone());
                let form = multipart::Form::new()
                    .text("attributes", attributes_json.clone())
                    .part("file", file_part);
                http.post(&url)
                    .header("content-md5", digest_hex.as_str())
                    .multipart(form)
            })
            .await?;

        let files: FileCollection = read_json(&operation, response).await?;
        files
            .entries
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::invalid_response(&operation, "upload returned no file"))
    }

    /// Share a folder with a user by login. An existing collaboration is
    /// not an error.
    pub async fn add_collaborator(
        &self,
        folder_id: &str,
        login: &str,
        role: &str,
        cancel: &CancellationToken,
    ) -> ApiResult<()> {
        let operation = format!("share folder {folder_id} with {login}");
        let url = self.api_url("/collaborations");
        let body = json!({
            "item": { "type": "folder", "id": folder_id },
            "accessible_by": { "type": "user", "login": login },
            "role": role,
        });
        let response = self
            .transport
            .send(&operation, cancel, |http| http.post(&url).json(&body))
            .await?;

        match check(&operation, response).await {
            Ok(_) => Ok(()),
            Err(ApiError::Status { status, body, .. })
                if status == StatusCode::CONFLICT
                    || body.code.as_deref() == Some("user_already_collaborator") =>
            {
                debug!(folder_id, login, "already a collaborator");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}
