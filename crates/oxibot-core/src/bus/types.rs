//! Bus event types — messages flowing between channels and the agent loop.
//!
//! Replaces nanobot's `bus/events.py` `InboundMessage` / `OutboundMessage` dataclasses.
//! Both types are `Serialize`/`Deserialize` with `deny_unknown_fields` so the
//! network bus envelope (§6) round-trips exactly and schema drift fails loudly
//! instead of silently dropping a field.

use crate::error::CoreError;
use crate::types::MediaAttachment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An inbound message from a channel to the agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InboundMessage {
    /// Channel name (e.g. "telegram", "discord", "cli").
    pub channel: String,
    /// Sender identifier within the channel.
    pub sender_id: String,
    /// Chat/conversation identifier.
    pub chat_id: String,
    /// Text content of the message.
    pub content: String,
    /// When the message was received.
    pub timestamp: DateTime<Utc>,
    /// Attached media (photos, voice, documents).
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata (e.g. message_id, username).
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Create a new inbound message with minimal required fields.
    pub fn new(
        channel: impl Into<String>,
        sender_id: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        InboundMessage {
            channel: channel.into(),
            sender_id: sender_id.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            timestamp: Utc::now(),
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Session key combining channel and chat_id (e.g. "telegram:123456").
    ///
    /// Used as the key for session persistence and history lookup.
    pub fn session_key(&self) -> String {
        format!("{}:{}", self.channel, self.chat_id)
    }

    /// Serialize to a JSON-compatible mapping (the wire envelope's `data` field).
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("InboundMessage always serializes")
    }

    /// Inverse of [`Self::to_dict`]. Rejects unknown fields to surface schema drift.
    pub fn from_dict(value: serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(value)
            .map_err(|e| CoreError::Protocol(format!("invalid InboundMessage: {e}")))
    }
}

/// An outbound message from the agent to a channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Optional message ID to reply to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Attached media to send.
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl OutboundMessage {
    /// Create a new outbound message.
    pub fn new(
        channel: impl Into<String>,
        chat_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        OutboundMessage {
            channel: channel.into(),
            chat_id: chat_id.into(),
            content: content.into(),
            reply_to: None,
            media: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// Serialize to a JSON-compatible mapping (the wire envelope's `data` field).
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("OutboundMessage always serializes")
    }

    /// Inverse of [`Self::to_dict`]. Rejects unknown fields to surface schema drift.
    pub fn from_dict(value: serde_json::Value) -> Result<Self, CoreError> {
        serde_json::from_value(value)
            .map_err(|e| CoreError::Protocol(format!("invalid OutboundMessage: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_message_creation() {
        let msg = InboundMessage::new("telegram", "user_42", "chat_99", "Hello Oxibot!");

        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.sender_id, "user_42");
        assert_eq!(msg.chat_id, "chat_99");
        assert_eq!(msg.content, "Hello Oxibot!");
        assert!(msg.media.is_empty());
        assert!(msg.metadata.is_empty());
    }

    #[test]
    fn test_session_key() {
        let msg = InboundMessage::new("discord", "user_1", "channel_abc", "test");
        assert_eq!(msg.session_key(), "discord:channel_abc");
    }

    #[test]
    fn test_session_key_format_cli() {
        let msg = InboundMessage::new("cli", "local", "default", "hello");
        assert_eq!(msg.session_key(), "cli:default");
    }

    #[test]
    fn test_outbound_message_creation() {
        let msg = OutboundMessage::new("telegram", "chat_99", "Here's your answer!");

        assert_eq!(msg.channel, "telegram");
        assert_eq!(msg.chat_id, "chat_99");
        assert_eq!(msg.content, "Here's your answer!");
        assert!(msg.reply_to.is_none());
        assert!(msg.media.is_empty());
    }

    #[test]
    fn test_inbound_with_metadata() {
        let mut msg = InboundMessage::new("telegram", "user_1", "chat_1", "hi");
        msg.metadata
            .insert("message_id".to_string(), serde_json::json!("12345"));
        msg.metadata
            .insert("username".to_string(), serde_json::json!("torrefacto"));

        assert_eq!(msg.metadata.get("username").unwrap(), "torrefacto");
        assert_eq!(msg.metadata.get("message_id").unwrap(), "12345");
    }

    #[test]
    fn test_inbound_with_media() {
        let mut msg = InboundMessage::new("telegram", "user_1", "chat_1", "check this");
        msg.media.push(MediaAttachment {
            mime_type: "image/jpeg".to_string(),
            path: "/tmp/photo.jpg".to_string(),
            filename: Some("photo.jpg".to_string()),
            size: Some(102400),
        });

        assert_eq!(msg.media.len(), 1);
        assert_eq!(msg.media[0].mime_type, "image/jpeg");
        assert_eq!(msg.media[0].size, Some(102400));
    }

    #[test]
    fn test_inbound_round_trip() {
        let mut msg = InboundMessage::new("telegram", "123|alice", "-1001", "hi");
        msg.metadata
            .insert("username".into(), serde_json::json!("alice"));
        let dict = msg.to_dict();
        let decoded = InboundMessage::from_dict(dict).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_outbound_round_trip() {
        let msg = OutboundMessage::new("telegram", "-1001", "pong");
        let dict = msg.to_dict();
        let decoded = OutboundMessage::from_dict(dict).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_inbound_rejects_unknown_fields() {
        let mut dict = InboundMessage::new("cli", "local", "default", "hi").to_dict();
        dict.as_object_mut()
            .unwrap()
            .insert("bogus_field".into(), serde_json::json!(true));
        assert!(InboundMessage::from_dict(dict).is_err());
    }
}
