//! Minimal Bot API client: long-poll for updates, send text, send files.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DeliveryError;

const API_BASE: &str = "https://api.telegram.org";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Outbound side of the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError>;

    /// Uploads the file at `path`; recipients see it as `file_name`.
    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

impl Chat {
    pub fn label(&self) -> String {
        self.title
            .clone()
            .or_else(|| self.username.as_ref().map(|name| format!("@{name}")))
            .or_else(|| self.first_name.clone())
            .unwrap_or_else(|| "-".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Serialize)]
struct GetUpdates {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: [&'static str; 1],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
}

impl TelegramClient {
    pub fn new(token: &str) -> Result<Self, DeliveryError> {
        Self::with_api_base(API_BASE, token)
    }

    fn with_api_base(api_base: &str, token: &str) -> Result<Self, DeliveryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base: format!("{api_base}/bot{token}"),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base, method)
    }

    async fn decode<T: DeserializeOwned>(
        method: &'static str,
        response: reqwest::Response,
    ) -> Result<T, DeliveryError> {
        let body: ApiResponse<T> = response.json().await?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(DeliveryError::Rejected {
                method,
                description: body
                    .description
                    .unwrap_or_else(|| "no description".to_string()),
            }),
        }
    }

    pub async fn get_me(&self) -> Result<BotIdentity, DeliveryError> {
        let response = self.http.get(self.url("getMe")).send().await?;
        Self::decode("getMe", response).await
    }

    /// Waits up to `poll_secs` for new messages after `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        poll_secs: u64,
    ) -> Result<Vec<Update>, DeliveryError> {
        let request = GetUpdates {
            offset,
            timeout: poll_secs,
            allowed_updates: ["message"],
        };
        let response = self
            .http
            .post(self.url("getUpdates"))
            .timeout(REQUEST_TIMEOUT + Duration::from_secs(poll_secs))
            .json(&request)
            .send()
            .await?;
        Self::decode("getUpdates", response).await
    }
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .http
            .post(self.url("sendMessage"))
            .json(&SendMessage { chat_id, text })
            .send()
            .await?;
        let _: serde_json::Value = Self::decode("sendMessage", response).await?;
        debug!(chat_id, "message sent");
        Ok(())
    }

    async fn send_document(
        &self,
        chat_id: i64,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<(), DeliveryError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|cause| DeliveryError::Artifact {
                path: path.to_path_buf(),
                cause,
            })?;
        let size = bytes.len();
        let document = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("document", document);

        let response = self
            .http
            .post(self.url("sendDocument"))
            .timeout(UPLOAD_TIMEOUT)
            .multipart(form)
            .send()
            .await?;
        let _: serde_json::Value = Self::decode("sendDocument", response).await?;
        debug!(chat_id, file_name, size, "document sent");
        Ok(())
    }
}
