//! Bus event types — messages flowing between channels and the agent loop.
//!

use crate::types::{MediaAttachment, RouteInput};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// An inbound message from a channel to the agent.
#[derive(Clone, Debug)]
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
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata (e.g. message_id, username).
    pub metadata: HashMap<String, String>,
    /// Routing hints gathered by the adapter (peer/guild/team/account).
    /// `None` for sources that have no routing concept beyond channel+chat_id
    /// (e.g. CLI, cron, heartbeat, device events).
    pub route_input: Option<RouteInput>,
    /// Session key resolved by `RouteResolver`. Empty until routing runs.
    pub session_key: String,
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
            route_input: None,
            session_key: String::new(),
        }
    }

    /// Attach routing hints (builder pattern).
    pub fn with_route_input(mut self, route_input: RouteInput) -> Self {
        self.route_input = Some(route_input);
        self
    }

    /// The `RouteInput` for this message, synthesizing a bare channel-only
    /// input when the adapter didn't supply one.
    pub fn route_input_or_default(&self) -> RouteInput {
        self.route_input.clone().unwrap_or_else(|| RouteInput {
            channel: self.channel.clone(),
            account_id: self.chat_id.clone(),
            ..Default::default()
        })
    }
}

/// An outbound message from the agent to a channel.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    /// Target channel name.
    pub channel: String,
    /// Target chat/conversation identifier.
    pub chat_id: String,
    /// Text content to send.
    pub content: String,
    /// Optional message ID to reply to.
    pub reply_to: Option<String>,
    /// Attached media to send.
    pub media: Vec<MediaAttachment>,
    /// Channel-specific metadata.
    pub metadata: HashMap<String, String>,
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
}


