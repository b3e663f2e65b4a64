//! The project-message envelope carried by the messaging channel.

use serde::{Deserialize, Serialize};

use crate::participant::ParticipantRef;

/// Event name for project-scoped chat traffic.
pub const PROJECT_MESSAGE_EVENT: &str = "project-message";

/// A message exchanged between workspace participants.
///
/// Messages append to the transcript in receipt order; the channel performs
/// no reordering and no deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectMessage {
    /// Who sent it. The reserved agent identity marks structured replies.
    pub sender: ParticipantRef,

    /// The payload.
    #[serde(flatten)]
    pub body: MessageBody,
}

/// Message payload variants.
///
/// Human participants send plain text or a base64 image attachment. The
/// agent sends text that is itself a JSON-encoded envelope; that string is
/// decoded into [`crate::AgentPayload`] at the channel boundary, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageBody {
    /// A base64-encoded image, attached instead of text.
    Image {
        image: String,
    },
    /// Plain or JSON-encoded text.
    Text {
        message: String,
    },
}

impl ProjectMessage {
    /// A plain-text message from `sender`.
    pub fn text(sender: ParticipantRef, message: impl Into<String>) -> Self {
        Self {
            sender,
            body: MessageBody::Text {
                message: message.into(),
            },
        }
    }

    /// An image attachment from `sender`.
    pub fn image(sender: ParticipantRef, image: impl Into<String>) -> Self {
        Self {
            sender,
            body: MessageBody::Image {
                image: image.into(),
            },
        }
    }

    /// The raw text body, if this is a text message.
    pub fn as_text(&self) -> Option<&str> {
        match &self.body {
            MessageBody::Text { message } => Some(message),
            MessageBody::Image { .. } => None,
        }
    }
}
