//! The session transcript.

use chrono::{DateTime, Utc};
use serde::Serialize;

use atrium_protocol::ParticipantRef;

/// One transcript entry. Entries append in receipt order; duplicate
/// delivery is possible and not guarded against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptEntry {
    pub sender: ParticipantRef,
    #[serde(flatten)]
    pub body: TranscriptBody,
    pub at: DateTime<Utc>,
}

/// What a transcript entry shows.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TranscriptBody {
    /// Plain text: human chat or agent commentary.
    Text { text: String },
    /// A base64 image attachment.
    Image { image: String },
    /// Placeholder for an agent message that failed structured handling.
    Error { reason: String },
}

impl TranscriptEntry {
    pub fn text(sender: ParticipantRef, text: impl Into<String>) -> Self {
        Self {
            sender,
            body: TranscriptBody::Text { text: text.into() },
            at: Utc::now(),
        }
    }

    pub fn image(sender: ParticipantRef, image: impl Into<String>) -> Self {
        Self {
            sender,
            body: TranscriptBody::Image {
                image: image.into(),
            },
            at: Utc::now(),
        }
    }

    pub fn error(sender: ParticipantRef, reason: impl Into<String>) -> Self {
        Self {
            sender,
            body: TranscriptBody::Error {
                reason: reason.into(),
            },
            at: Utc::now(),
        }
    }
}
