//! HTTP transport for the chat backend. Every operation degrades to an
//! empty/None result where the caller can proceed with a partial view;
//! authentication recovery happens underneath in [`TokenManager`].

use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::{
    with_bearer, ApiChatDetails, AppleAuthData, AuthResponse, FileUploadResponse, GoogleAuthData,
    JobStatus, NewConfiguration, UploadError, UserInfoResponse,
};
use crate::auth::store::SecretStore;
use crate::auth::{SessionEvent, TokenManager};
use crate::core::message::{Chat, ChatDetails, Configuration, Message};
use crate::utils::url::{construct_api_url, normalize_base_url};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// The chat list plus the persisted persona configuration, fetched in one
/// call from `GET /`.
#[derive(Debug, Clone, Default)]
pub struct UserInfo {
    pub chats: Vec<Chat>,
    pub configuration: Option<Configuration>,
}

#[derive(Debug, Deserialize)]
struct CurrentUserResponse {
    user: crate::api::User,
}

#[derive(Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    tokens: TokenManager,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, store: Arc<dyn SecretStore>) -> Self {
        let base_url = normalize_base_url(&base_url.into());
        let client = reqwest::Client::new();
        let tokens = TokenManager::new(store, client.clone(), base_url.clone());
        Self {
            client,
            base_url,
            tokens,
        }
    }

    pub fn with_session_events(mut self, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.tokens = self.tokens.with_session_events(tx);
        self
    }

    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the chat list and persisted persona configuration. Degrades to
    /// an empty result on any failure.
    pub async fn get_user_info(&self) -> UserInfo {
        let url = construct_api_url(&self.base_url, "");
        let response = match self
            .tokens
            .send_authenticated(|token| with_bearer(self.client.get(&url), token))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!("user info request failed: {err}");
                return UserInfo::default();
            }
        };
        if !response.status().is_success() {
            tracing::debug!("user info request returned {}", response.status());
            return UserInfo::default();
        }
        match response.json::<UserInfoResponse>().await {
            Ok(info) => UserInfo {
                chats: info.chats,
                configuration: info.chat_configuration,
            },
            Err(err) => {
                tracing::debug!("user info response was malformed: {err}");
                UserInfo::default()
            }
        }
    }

    /// Fetch one conversation's full history. None on any failure.
    pub async fn get_chat_details(&self, chat_id: &str) -> Option<ChatDetails> {
        let url = construct_api_url(&self.base_url, &format!("chat/{chat_id}"));
        let response = self
            .tokens
            .send_authenticated(|token| with_bearer(self.client.get(&url), token))
            .await
            .ok()?;
        if !response.status().is_success() {
            tracing::debug!("chat details request returned {}", response.status());
            return None;
        }
        let details = response.json::<ApiChatDetails>().await.ok()?;
        Some(ChatDetails {
            id: details.id,
            title: details.title,
            created_at: details.created_at,
            messages: details
                .messages
                .into_iter()
                .map(|message| Message {
                    id: message.id,
                    role: message.role,
                    content: message.content,
                    attachment_ids: message.attachment_ids,
                    image_url: message.image_url,
                })
                .collect(),
            configuration: details.configuration,
        })
    }

    /// Poll one asynchronous job. None means "not ready yet", never fatal.
    pub async fn get_job_status(&self, job_id: &str) -> Option<JobStatus> {
        let url = construct_api_url(&self.base_url, &format!("job/{job_id}"));
        let response = self
            .tokens
            .send_authenticated(|token| with_bearer(self.client.get(&url), token))
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json::<JobStatus>().await.ok()
    }

    /// Persist a persona configuration; returns the server echo with its
    /// assigned id, or None on failure.
    pub async fn create_configuration(
        &self,
        configuration: &NewConfiguration,
    ) -> Option<Configuration> {
        let url = construct_api_url(&self.base_url, "configure/chat");
        let response = self
            .tokens
            .send_authenticated(|token| with_bearer(self.client.post(&url).json(configuration), token))
            .await
            .ok()?;
        if !response.status().is_success() {
            tracing::debug!("configuration request returned {}", response.status());
            return None;
        }
        response.json::<Configuration>().await.ok()
    }

    /// Upload one local file as a multipart form. Progress percentages are
    /// reported on `progress` as bytes go out; cancellation via `cancel`
    /// surfaces as [`UploadError::Aborted`] so the caller can tell it apart
    /// from a failure.
    pub async fn upload_file(
        &self,
        path: &Path,
        name: &str,
        mime_type: &str,
        progress: mpsc::UnboundedSender<u8>,
        cancel: CancellationToken,
    ) -> Result<String, UploadError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|err| UploadError::Failed(format!("could not read {}: {err}", path.display())))?;
        let url = construct_api_url(&self.base_url, "files");

        let request = self.tokens.send_authenticated(|token| {
            let part = file_part(data.clone(), name, mime_type, &progress);
            with_bearer(self.client.post(&url).multipart(Form::new().part("file", part)), token)
        });
        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::Aborted),
            result = request => result,
        };

        let response = result.map_err(|err| UploadError::Failed(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Failed(format!(
                "upload failed with status {status}: {body}"
            )));
        }
        let uploaded = response
            .json::<FileUploadResponse>()
            .await
            .map_err(|err| UploadError::Failed(err.to_string()))?;
        let _ = progress.send(100);
        Ok(uploaded.file_id)
    }

    /// Exchange Google sign-in credentials for a backend session.
    pub async fn authenticate_with_google(&self, data: &GoogleAuthData) -> Option<AuthResponse> {
        self.authenticate("auth/google", data).await
    }

    /// Exchange Apple sign-in credentials for a backend session.
    pub async fn authenticate_with_apple(&self, data: &AppleAuthData) -> Option<AuthResponse> {
        self.authenticate("auth/apple", data).await
    }

    async fn authenticate<T: serde::Serialize>(
        &self,
        endpoint: &str,
        data: &T,
    ) -> Option<AuthResponse> {
        let url = construct_api_url(&self.base_url, endpoint);
        let response = match self.client.post(url).json(data).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!("{endpoint} request failed: {err}");
                return None;
            }
        };
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("{endpoint} rejected ({status}): {body}");
            return None;
        }
        response.json::<AuthResponse>().await.ok()
    }

    /// Invalidate the session server-side. Returns whether the backend
    /// acknowledged; local token clearing is the caller's move either way.
    pub async fn logout(&self, access_token: &str, refresh_token: Option<&str>) -> bool {
        let url = construct_api_url(&self.base_url, "auth/logout");
        let response = self
            .client
            .post(url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {access_token}"),
            )
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await;
        match response {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                tracing::debug!("logout request failed: {err}");
                false
            }
        }
    }

    /// Fetch the authenticated user's profile. None on any failure.
    pub async fn get_current_user(&self) -> Option<crate::api::User> {
        let url = construct_api_url(&self.base_url, "auth/me");
        let response = self
            .tokens
            .send_authenticated(|token| with_bearer(self.client.get(&url), token))
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response
            .json::<CurrentUserResponse>()
            .await
            .ok()
            .map(|body| body.user)
    }
}

fn file_part(
    data: Vec<u8>,
    name: &str,
    mime_type: &str,
    progress: &mpsc::UnboundedSender<u8>,
) -> Part {
    let length = data.len() as u64;
    let body = Body::wrap_stream(progress_stream(data.clone(), progress.clone()));
    let part = Part::stream_with_length(body, length).file_name(name.to_string());
    match part.mime_str(mime_type) {
        Ok(part) => part,
        // An unparseable MIME string downgrades to an untyped part rather
        // than failing the upload.
        Err(_) => {
            let body = Body::wrap_stream(progress_stream(data, progress.clone()));
            Part::stream_with_length(body, length).file_name(name.to_string())
        }
    }
}

fn progress_stream(
    data: Vec<u8>,
    progress: mpsc::UnboundedSender<u8>,
) -> impl futures_util::Stream<Item = Result<Vec<u8>, std::io::Error>> + Send {
    let total = data.len().max(1);
    let chunks: Vec<Vec<u8>> = data.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();
    let mut sent = 0_usize;
    futures_util::stream::iter(chunks).map(move |chunk| {
        sent += chunk.len();
        let percent = ((sent * 100) / total).min(100) as u8;
        let _ = progress.send(percent);
        Ok(chunk)
    })
}
