//! Bearer-token lifecycle: persistence, refresh-on-401, and the
//! authenticated-request wrapper used by every backend call.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::api::RefreshResponse;
use crate::auth::store::{SecretStore, SecretStoreError, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY};
use crate::utils::url::construct_api_url;

pub mod store;

/// The persisted token pair. A missing access token means unauthenticated.
#[derive(Debug, Clone, Default)]
pub struct Tokens {
    pub access: Option<String>,
    pub refresh: Option<String>,
}

impl Tokens {
    pub fn is_authenticated(&self) -> bool {
        self.access.is_some()
    }
}

#[derive(Debug)]
pub enum AuthError {
    /// A 401 could not be recovered by refreshing; tokens were cleared and
    /// the session-expired notification fired.
    SessionExpired,
    Store(SecretStoreError),
    Http(reqwest::Error),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::SessionExpired => write!(f, "session expired, please log in again"),
            AuthError::Store(err) => write!(f, "credential store error: {err}"),
            AuthError::Http(err) => write!(f, "request failed: {err}"),
        }
    }
}

impl Error for AuthError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AuthError::SessionExpired => None,
            AuthError::Store(err) => Some(err),
            AuthError::Http(err) => Some(err),
        }
    }
}

/// Emitted when the session can no longer be recovered locally. Subscribers
/// (the driver) decide what "go back to login" means for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Expired,
}

#[derive(Clone)]
pub struct TokenManager {
    store: Arc<dyn SecretStore>,
    client: reqwest::Client,
    base_url: String,
    session_tx: Option<mpsc::UnboundedSender<SessionEvent>>,
}

impl TokenManager {
    pub fn new(store: Arc<dyn SecretStore>, client: reqwest::Client, base_url: String) -> Self {
        Self {
            store,
            client,
            base_url,
            session_tx: None,
        }
    }

    /// Subscribe the given channel to session-expiry notifications.
    pub fn with_session_events(mut self, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        self.session_tx = Some(tx);
        self
    }

    /// Read both tokens. Store failures degrade to "no token".
    pub async fn tokens(&self) -> Tokens {
        Tokens {
            access: self.read_secret(ACCESS_TOKEN_KEY).await,
            refresh: self.read_secret(REFRESH_TOKEN_KEY).await,
        }
    }

    async fn read_secret(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!("failed to read {key}: {err}");
                None
            }
        }
    }

    /// Persist the token pair. A write failure is fatal: credentials that
    /// cannot be persisted are unusable.
    pub async fn store_tokens(&self, access: &str, refresh: Option<&str>) -> Result<(), AuthError> {
        self.store
            .set(ACCESS_TOKEN_KEY, access)
            .await
            .map_err(AuthError::Store)?;
        if let Some(refresh) = refresh {
            self.store
                .set(REFRESH_TOKEN_KEY, refresh)
                .await
                .map_err(AuthError::Store)?;
        }
        Ok(())
    }

    /// Best-effort deletion of both tokens. Clearing must never fail the
    /// caller.
    pub async fn clear_tokens(&self) {
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(err) = self.store.delete(key).await {
                tracing::warn!("failed to delete {key}: {err}");
            }
        }
    }

    /// Exchange the refresh token for a new access token and persist it.
    /// The refresh token itself is not rotated. Returns None on any failure.
    pub async fn refresh_access_token(&self, refresh_token: &str) -> Option<String> {
        let url = construct_api_url(&self.base_url, "auth/refresh");
        let response = match self
            .client
            .post(url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!("token refresh request failed: {err}");
                return None;
            }
        };
        if !response.status().is_success() {
            tracing::debug!("token refresh rejected with status {}", response.status());
            return None;
        }
        let refreshed = response.json::<RefreshResponse>().await.ok()?;
        if let Err(err) = self
            .store
            .set(ACCESS_TOKEN_KEY, &refreshed.access_token)
            .await
        {
            tracing::warn!("failed to persist refreshed access token: {err}");
            return None;
        }
        Some(refreshed.access_token)
    }

    /// Build and send a request with the current bearer credential. On a 401
    /// with a refresh token on hand: exactly one refresh and exactly one
    /// retry with the new token. A second 401 after the retry is returned
    /// as-is; a failed refresh clears the tokens, notifies subscribers, and
    /// surfaces [`AuthError::SessionExpired`].
    pub async fn send_authenticated<F>(&self, build: F) -> Result<reqwest::Response, AuthError>
    where
        F: Fn(Option<&str>) -> reqwest::RequestBuilder,
    {
        let Tokens { access, refresh } = self.tokens().await;
        let response = build(access.as_deref())
            .send()
            .await
            .map_err(AuthError::Http)?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        let Some(refresh) = refresh else {
            return Ok(response);
        };

        tracing::debug!("request returned 401, refreshing access token");
        match self.refresh_access_token(&refresh).await {
            Some(new_token) => build(Some(&new_token))
                .send()
                .await
                .map_err(AuthError::Http),
            None => {
                self.clear_tokens().await;
                self.notify_session_expired();
                Err(AuthError::SessionExpired)
            }
        }
    }

    fn notify_session_expired(&self) {
        if let Some(tx) = &self.session_tx {
            let _ = tx.send(SessionEvent::Expired);
        }
    }
}
