use serde::{Deserialize, Serialize};

use crate::core::message::{Chat, Configuration, Role};

/// Request body for the streaming chat endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatStreamRequest {
    pub chat_id: Option<String>,
    pub configuration_id: Option<String>,
    pub content: String,
    pub attachment_ids: Vec<String>,
    pub think_model: bool,
}

/// One line of the newline-delimited streaming response, as sent on the
/// wire. Fields are all optional; [`ChatChunk::from_raw`] resolves them into
/// a single event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawChunk {
    pub chat_id: Option<String>,
    pub content: Option<String>,
    pub error: Option<String>,
    pub background_processing: Option<String>,
    pub generation_id: Option<String>,
    pub generation_message: Option<String>,
}

/// A decoded streaming event. Exactly one kind per wire line.
///
/// When a malformed line populates several of the raw fields at once,
/// precedence is: error, chat id, content, generation, background
/// processing. A generation event requires both the id and the message; a
/// line with neither field populated decodes to nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatChunk {
    ChatId(String),
    Content(String),
    Error(String),
    BackgroundProcessing(String),
    Generation { id: String, message: String },
}

impl ChatChunk {
    pub fn from_raw(raw: RawChunk) -> Option<Self> {
        if let Some(error) = raw.error {
            return Some(ChatChunk::Error(error));
        }
        if let Some(chat_id) = raw.chat_id {
            return Some(ChatChunk::ChatId(chat_id));
        }
        if let Some(content) = raw.content {
            return Some(ChatChunk::Content(content));
        }
        if let (Some(id), Some(message)) = (raw.generation_id, raw.generation_message) {
            return Some(ChatChunk::Generation { id, message });
        }
        raw.background_processing.map(ChatChunk::BackgroundProcessing)
    }
}

/// Message as returned by `GET /chat/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub attachment_ids: Vec<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiChatDetails {
    pub id: String,
    pub title: String,
    pub created_at: i64,
    pub messages: Vec<ApiMessage>,
    pub configuration: Option<Configuration>,
}

/// Response of `GET /`: the chat list plus the persisted persona
/// configuration, if any.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserInfoResponse {
    #[serde(default)]
    pub chats: Vec<Chat>,
    pub chat_configuration: Option<Configuration>,
}

/// Persona configuration as submitted to `POST /configure/chat`; the server
/// echoes it back with an assigned id.
#[derive(Debug, Clone, Serialize)]
pub struct NewConfiguration {
    pub user_name: String,
    pub ai_name: String,
    pub description: String,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileUploadResponse {
    pub file_id: String,
}

/// Status of an asynchronous generation job. `url` stays null until the job
/// resolves.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub status: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub uid: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub profile_picture: Option<String>,
    pub auth_provider: String,
    pub is_email_verified: bool,
    pub created_at: Option<String>,
    pub last_login_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoogleAuthData {
    pub id_token: String,
    pub name: String,
    pub email: String,
    pub google_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_picture: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppleAuthData {
    pub identity_token: String,
    pub authorization_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub apple_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
}

/// Outcome of an attachment upload that did not complete.
///
/// Cancellation is deliberately distinct from failure: an aborted upload is
/// dropped silently, a failed one stays visible with its error message.
#[derive(Debug)]
pub enum UploadError {
    Aborted,
    Failed(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::Aborted => write!(f, "upload aborted"),
            UploadError::Failed(message) => write!(f, "upload failed: {message}"),
        }
    }
}

impl std::error::Error for UploadError {}

/// Attach the bearer credential when one is available. Requests without a
/// stored access token go out unauthenticated and degrade at the call site.
pub(crate) fn with_bearer(
    request: reqwest::RequestBuilder,
    token: Option<&str>,
) -> reqwest::RequestBuilder {
    match token {
        Some(token) => request.header(
            reqwest::header::AUTHORIZATION,
            format!("Bearer {token}"),
        ),
        None => request,
    }
}

pub mod client;
