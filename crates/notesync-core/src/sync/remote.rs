//! Remote notes API
//!
//! [`RemoteApi`] is the seam between the orchestrator and the network.
//! [`RestClient`] talks to the REST service:
//!
//! - `GET    /user/{u}/notes`      list notes
//! - `GET    /user/{u}/note/{id}`  fetch one note (only 404 means gone)
//! - `POST   /user/{u}/notes`      create, returns the new id
//! - `POST   /user/{u}/note/{id}`  update
//! - `DELETE /user/{u}/note/{id}`  delete
//!
//! Every response is wrapped in `{"status", "data", "id", "extra"}`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::models::EntryContent;
use crate::storage::millis_to_datetime;

/// Errors from the remote API
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Request took longer than the configured timeout
    #[error("Request timed out")]
    Timeout,

    /// Could not reach the service
    #[error("Service unreachable: {0}")]
    Unreachable(String),

    /// Non-success HTTP status
    #[error("Server returned {status}: {message}")]
    Http { status: u16, message: String },

    /// Service answered with `status: "error"`
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Response body didn't match the expected shape
    #[error("Invalid response: {0}")]
    Decode(String),

    /// No API URL or user configured
    #[error("Remote sync is not configured (set api_url and user_id)")]
    NotConfigured,
}

impl RemoteError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            RemoteError::Timeout | RemoteError::Unreachable(_) => true,
            RemoteError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RemoteError::Timeout
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RemoteError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            RemoteError::Unreachable(e.to_string())
        }
    }
}

/// A note as the remote stores it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteNote {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub color: String,
    /// Epoch millis
    pub created: i64,
    /// Epoch millis
    pub edited: i64,
}

impl RemoteNote {
    pub fn content(&self) -> EntryContent {
        EntryContent {
            title: self.title.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            edited_at: millis_to_datetime(self.edited),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        millis_to_datetime(self.created)
    }
}

/// Request body for create and update
#[derive(Debug, Serialize)]
struct NoteBody<'a> {
    title: &'a str,
    description: &'a str,
    color: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<i64>,
    edited: i64,
}

impl<'a> NoteBody<'a> {
    fn new(content: &'a EntryContent, created: Option<DateTime<Utc>>) -> Self {
        Self {
            title: &content.title,
            description: &content.description,
            color: &content.color,
            created: created.map(|t| t.timestamp_millis()),
            edited: content.edited_at.timestamp_millis(),
        }
    }
}

/// Response envelope
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: String,
    data: Option<T>,
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    extra: Option<serde_json::Value>,
}

impl<T> Envelope<T> {
    fn into_result(self) -> Result<Self, RemoteError> {
        if self.status.eq_ignore_ascii_case("error") {
            let reason = match &self.extra {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "no reason given".to_string(),
            };
            return Err(RemoteError::Rejected(reason));
        }
        Ok(self)
    }

    /// Only a 404 means a note is gone, so a missing `data` is malformed
    fn require_data(self, request: &str) -> Result<T, RemoteError> {
        self.data
            .ok_or_else(|| RemoteError::Decode(format!("{} response carries no data", request)))
    }
}

/// Access to the remote copy of the user's notes
#[async_trait]
pub trait RemoteApi: Send + Sync {
    /// All notes of the user
    async fn list_notes(&self) -> Result<Vec<RemoteNote>, RemoteError>;

    /// One note, `None` if it no longer exists
    async fn get_note(&self, id: &str) -> Result<Option<RemoteNote>, RemoteError>;

    /// Create a note, returning its remote id
    async fn create_note(
        &self,
        content: &EntryContent,
        created_at: DateTime<Utc>,
    ) -> Result<String, RemoteError>;

    /// Overwrite a note's content
    async fn update_note(&self, id: &str, content: &EntryContent) -> Result<(), RemoteError>;

    /// Delete a note
    async fn delete_note(&self, id: &str) -> Result<(), RemoteError>;
}

/// REST implementation of [`RemoteApi`]
#[derive(Debug, Clone)]
pub struct RestClient {
    base_url: String,
    user_id: String,
    client: reqwest::Client,
}

impl RestClient {
    /// Create a client for `user_id` on `base_url`
    pub fn new(
        base_url: impl Into<String>,
        user_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("notesync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
            client,
        })
    }

    /// Create a client from configuration
    pub fn from_config(config: &Config) -> Result<Self, RemoteError> {
        match (&config.api_url, &config.user_id) {
            (Some(url), Some(user)) => Self::new(url, user, config.request_timeout()),
            _ => Err(RemoteError::NotConfigured),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn notes_url(&self) -> String {
        format!("{}/user/{}/notes", self.base_url, self.user_id)
    }

    fn note_url(&self, id: &str) -> String {
        format!("{}/user/{}/note/{}", self.base_url, self.user_id, id)
    }

    async fn read<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, RemoteError> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        envelope.into_result()
    }
}

#[async_trait]
impl RemoteApi for RestClient {
    async fn list_notes(&self) -> Result<Vec<RemoteNote>, RemoteError> {
        let url = self.notes_url();
        debug!(url = %url, "Listing remote notes");

        let response = self.client.get(&url).send().await?;
        let envelope: Envelope<Vec<RemoteNote>> = Self::read(response).await?;
        envelope.require_data("list")
    }

    async fn get_note(&self, id: &str) -> Result<Option<RemoteNote>, RemoteError> {
        let response = self.client.get(self.note_url(id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let envelope: Envelope<RemoteNote> = Self::read(response).await?;
        envelope.require_data("get").map(Some)
    }

    async fn create_note(
        &self,
        content: &EntryContent,
        created_at: DateTime<Utc>,
    ) -> Result<String, RemoteError> {
        let response = self
            .client
            .post(self.notes_url())
            .json(&NoteBody::new(content, Some(created_at)))
            .send()
            .await?;

        let envelope: Envelope<RemoteNote> = Self::read(response).await?;
        let id = match (envelope.id, envelope.data) {
            (Some(serde_json::Value::String(id)), _) => id,
            (Some(serde_json::Value::Number(id)), _) => id.to_string(),
            (_, Some(note)) => note.id,
            _ => {
                return Err(RemoteError::Decode(
                    "create response carries no note id".to_string(),
                ))
            }
        };
        Ok(id)
    }

    async fn update_note(&self, id: &str, content: &EntryContent) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.note_url(id))
            .json(&NoteBody::new(content, None))
            .send()
            .await?;

        Self::read::<serde_json::Value>(response).await?;
        Ok(())
    }

    async fn delete_note(&self, id: &str) -> Result<(), RemoteError> {
        let response = self.client.delete(self.note_url(id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            // Already gone
            return Ok(());
        }

        Self::read::<serde_json::Value>(response).await?;
        Ok(())
    }
}

/// Accept note ids sent either as strings or as numbers
fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}
