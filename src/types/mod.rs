//! Core data model: accounts, chat summaries, messages, and the normalization
//! of provider-shaped JSON into engine types.
//!
//! The remote API returns loosely-typed JSON whose exact schema is owned by the
//! provider. Normalization here is deliberately tolerant: unknown message kinds
//! map to [`MessageKind::Unknown`], missing fields become `None`, and a message
//! without a chat identifier is dropped by callers rather than failing a fetch.

use crate::errors::{ChatSyncError, ChatSyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;


/// Which hosted messaging provider an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ProviderKind {
    #[default]
    GreenApi,
}

/// One configured messaging-provider instance. Read-only input to the engine;
/// owned and persisted by the hosting application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub instance_id: String,
    pub token: String,
    #[serde(default)]
    pub provider: ProviderKind,
}

impl Account {
    pub fn new(instance_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            token: token.into(),
            provider: ProviderKind::GreenApi,
        }
    }

    /// Provider-specific credential shape check. Runs before any network call
    /// so a doomed request is never issued.
    pub fn validate(&self) -> ChatSyncResult<()> {
        if self.instance_id.is_empty() || !self.instance_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ChatSyncError::InvalidCredentials(
                "instance id must be a non-empty numeric string".into(),
            ));
        }
        let token_len = self.token.len();
        if !(16..=128).contains(&token_len)
            || !self.token.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ChatSyncError::InvalidCredentials(
                "token must be 16-128 alphanumeric characters".into(),
            ));
        }
        Ok(())
    }
}

/// Message direction relative to the account owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Normalized message kind. The provider's `typeMessage` strings collapse into
/// this set; anything unrecognized becomes `Unknown` rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Sticker,
    Location,
    Quoted,
    Deleted,
    Unknown,
}

impl MessageKind {
    /// Map a provider `typeMessage` string to a kind.
    pub fn from_provider(type_message: &str) -> Self {
        match type_message {
            "textMessage" | "extendedTextMessage" => MessageKind::Text,
            "imageMessage" => MessageKind::Image,
            "videoMessage" => MessageKind::Video,
            "audioMessage" => MessageKind::Audio,
            "documentMessage" => MessageKind::Document,
            "stickerMessage" => MessageKind::Sticker,
            "locationMessage" => MessageKind::Location,
            "quotedMessage" => MessageKind::Quoted,
            "deletedMessage" => MessageKind::Deleted,
            _ => MessageKind::Unknown,
        }
    }
}

/// Kind-specific attachment metadata, passed through raw-ish for rendering.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl Attachment {
    fn is_empty(&self) -> bool {
        self == &Attachment::default()
    }
}

/// One chat message, inbound or outbound.
///
/// Within one chat's ordered sequence the epoch-seconds timestamp is the sole
/// ordering and dedup key; two messages with an identical timestamp are
/// treated as the same message for merge purposes. The provider id is kept for
/// rendering and reconciliation but is absent on freshly sent local echoes
/// until a refresh returns server truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub chat_id: String,
    pub direction: Direction,
    pub timestamp: i64,
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Attachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

impl Message {
    /// Normalize one provider message object.
    ///
    /// `fallback_direction` applies to list endpoints whose direction is
    /// implied by the endpoint itself; history items carry an explicit `type`
    /// field which wins. Returns `None` when the object has no chat id;
    /// callers count and drop those.
    pub fn from_provider(value: &Value, fallback_direction: Direction) -> Option<Self> {
        let chat_id = value
            .get("chatId")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())?
            .to_string();

        let direction = match value.get("type").and_then(|v| v.as_str()) {
            Some("incoming") => Direction::Inbound,
            Some("outgoing") => Direction::Outbound,
            _ => fallback_direction,
        };

        let kind = value
            .get("typeMessage")
            .and_then(|v| v.as_str())
            .map_or(MessageKind::Unknown, MessageKind::from_provider);

        let text = value
            .get("textMessage")
            .and_then(|v| v.as_str())
            .or_else(|| {
                value
                    .pointer("/extendedTextMessage/text")
                    .and_then(|v| v.as_str())
            })
            .or_else(|| value.get("caption").and_then(|v| v.as_str()))
            .map(str::to_string);

        let attachment = Attachment {
            download_url: str_field(value, "downloadUrl"),
            thumbnail: str_field(value, "jpegThumbnail"),
            file_name: str_field(value, "fileName"),
            caption: str_field(value, "caption"),
            duration_seconds: value
                .get("duration")
                .and_then(|v| v.as_u64())
                .map(|d| d as u32),
            latitude: value
                .pointer("/location/latitude")
                .or_else(|| value.get("latitude"))
                .and_then(|v| v.as_f64()),
            longitude: value
                .pointer("/location/longitude")
                .or_else(|| value.get("longitude"))
                .and_then(|v| v.as_f64()),
        };

        Some(Message {
            id: str_field(value, "idMessage"),
            chat_id,
            direction,
            timestamp: value.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0),
            kind,
            text,
            attachment: if attachment.is_empty() {
                None
            } else {
                Some(attachment)
            },
            sender_name: str_field(value, "senderName"),
        })
    }

    /// Preview text for chat lists. Text-bearing kinds show their text; media
    /// kinds map through a fixed label table; unmapped kinds fall back to a
    /// generic attachment label.
    pub fn preview(&self) -> String {
        match self.kind {
            MessageKind::Text | MessageKind::Quoted => self
                .text
                .clone()
                .unwrap_or_else(|| "Message".to_string()),
            MessageKind::Image => "📷 Photo".to_string(),
            MessageKind::Video => "🎥 Video".to_string(),
            MessageKind::Audio => "🎵 Voice message".to_string(),
            MessageKind::Document => self
                .attachment
                .as_ref()
                .and_then(|a| a.file_name.clone())
                .map_or_else(|| "📄 Document".to_string(), |f| format!("📄 {}", f)),
            MessageKind::Sticker => "🖼 Sticker".to_string(),
            MessageKind::Location => "📍 Location".to_string(),
            MessageKind::Deleted => "Message deleted".to_string(),
            MessageKind::Unknown => "📎 Attachment".to_string(),
        }
    }
}

/// One conversation in the chat list, rebuilt on every chat-list fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub chat_id: String,
    pub name: String,
    pub preview: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Display name fallback: the local part of a provider-qualified chat id
/// ("79001234567@c.us" -> "79001234567").
pub fn display_name_from_chat_id(chat_id: &str) -> String {
    chat_id.split('@').next().unwrap_or(chat_id).to_string()
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
