//! Telegram Bot API adapter.
//!
//! Telegram chats serve as the blob host: an uploaded audio message yields a
//! `file_id` that can be resent to any chat without re-uploading. The same
//! client delivers ingestion results back to the requesting chat.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Body;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::warn;

use super::{BlobUploader, UploadMeta, UploadedBlob};
use crate::domain::{JobResult, Requester};

/// Telegram Bot API client
pub struct TelegramClient {
    /// Bot token
    bot_token: String,
    /// HTTP client
    client: reqwest::Client,
}

/// Response from Telegram API
#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Message result from sendMessage/sendAudio
#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
    #[serde(default)]
    audio: Option<AudioResult>,
}

/// Audio attachment of a sent message
#[derive(Debug, Deserialize)]
struct AudioResult {
    file_id: String,
    #[serde(default)]
    file_size: Option<u64>,
}

/// Configuration for Telegram client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat the ingested audio is stored in
    pub chat_id: String,
}

impl<T> TelegramResponse<T> {
    fn into_result(self) -> Result<T> {
        if !self.ok {
            anyhow::bail!(
                "Telegram API error: {}",
                self.description.unwrap_or_default()
            );
        }
        self.result.context("Telegram response missing result")
    }
}

impl TelegramClient {
    /// Create a new Telegram client
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    /// Create from config
    pub fn from_config(config: &TelegramConfig) -> Self {
        Self::new(config.bot_token.clone())
    }

    /// Build API URL
    fn api_url(&self, method: &str) -> String {
        format!(
            "https://api.telegram.org/bot{}/{}",
            self.bot_token, method
        )
    }

    async fn post_json(&self, method: &str, body: serde_json::Value) -> Result<MessageResult> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to call Telegram {}", method))?;

        let result: TelegramResponse<MessageResult> = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        result.into_result()
    }

    /// Send a text message
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<i64> {
        let message = self
            .post_json(
                "sendMessage",
                serde_json::json!({
                    "chat_id": chat_id,
                    "text": text,
                }),
            )
            .await?;
        Ok(message.message_id)
    }

    /// Stream an audio file up, returning the stored file reference
    pub async fn send_audio(
        &self,
        chat_id: &str,
        audio_path: &Path,
        meta: UploadMeta<'_>,
    ) -> Result<UploadedBlob> {
        let (file_part, _) = audio_part(audio_path, meta).await?;

        let mut form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("title", meta.title.to_string())
            .text("performer", meta.artist.to_string())
            .part("audio", file_part);

        if let Some(cap) = meta.caption {
            form = form.text("caption", cap.to_string());
        }

        let response = self
            .client
            .post(self.api_url("sendAudio"))
            .multipart(form)
            .send()
            .await
            .context("Failed to send Telegram audio")?;

        let result: TelegramResponse<MessageResult> = response
            .json()
            .await
            .context("Failed to parse Telegram response")?;

        blob_from_message(result.into_result()?)
    }

    /// Resend previously stored audio by its file reference
    pub async fn send_audio_by_ref(
        &self,
        chat_id: &str,
        blob_ref: &str,
        caption: Option<&str>,
    ) -> Result<i64> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "audio": blob_ref,
        });
        if let Some(cap) = caption {
            body["caption"] = serde_json::Value::String(cap.to_string());
        }

        let message = self.post_json("sendAudio", body).await?;
        Ok(message.message_id)
    }
}

/// Multipart part reading the file in chunks, with its declared length
async fn audio_part(path: &Path, meta: UploadMeta<'_>) -> Result<(Part, u64)> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
    let length = file
        .metadata()
        .await
        .context("Failed to stat audio file")?
        .len();

    let body = Body::wrap_stream(ReaderStream::new(file));
    let part = Part::stream_with_length(body, length)
        .file_name(upload_file_name(meta.artist, meta.title))
        .mime_str("audio/mpeg")?;
    Ok((part, length))
}

fn upload_file_name(artist: &str, title: &str) -> String {
    format!("{} - {}.mp3", artist, title).replace(['/', '\\'], "_")
}

fn blob_from_message(message: MessageResult) -> Result<UploadedBlob> {
    let audio = message
        .audio
        .context("Telegram message carries no audio attachment")?;

    Ok(UploadedBlob {
        blob_ref: audio.file_id,
        size_bytes: audio.file_size.unwrap_or(0),
    })
}

#[async_trait]
impl BlobUploader for TelegramClient {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn upload(
        &self,
        destination: &str,
        path: &Path,
        meta: UploadMeta<'_>,
    ) -> Result<UploadedBlob> {
        self.send_audio(destination, path, meta).await
    }
}

/// Delivers job results to a Telegram chat
pub struct TelegramRequester {
    client: std::sync::Arc<TelegramClient>,
    chat_id: String,
}

impl TelegramRequester {
    pub fn new(client: std::sync::Arc<TelegramClient>, chat_id: impl Into<String>) -> Self {
        Self {
            client,
            chat_id: chat_id.into(),
        }
    }
}

#[async_trait]
impl Requester for TelegramRequester {
    async fn deliver(&self, source_url: &str, result: &JobResult) {
        let sent = match result {
            Ok(outcome) => {
                let record = &outcome.record;
                let caption = format!("🎵 {} - {}", record.artist, record.title);
                self.client
                    .send_audio_by_ref(&self.chat_id, &record.blob_ref, Some(&caption))
                    .await
            }
            Err(e) => {
                self.client
                    .send_message(&self.chat_id, &format!("❌ Download failed\n\n{}", e))
                    .await
            }
        };

        if let Err(e) = sent {
            warn!(url = %source_url, chat_id = %self.chat_id, error = %e, "Failed to deliver result");
        }
    }
}
