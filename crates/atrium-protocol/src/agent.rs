//! Structured agent replies.
//!
//! The agent authors its messages as a JSON-encoded envelope
//! `{"text": ..., "fileTree": ...}` carried inside the ordinary text body of
//! a project message. [`AgentPayload::decode`] turns that string into a
//! tagged variant exactly once, at the channel boundary. Decoding never
//! fails the session: a malformed payload becomes [`AgentPayload::Error`],
//! fatal to that message only.

use serde::Deserialize;
use thiserror::Error;

use crate::filetree::FileTree;

/// Reserved sender id for the automated agent.
pub const AGENT_SENDER_ID: &str = "ai";

/// Why an agent payload failed to decode.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The body was not valid JSON.
    #[error("agent payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope decoded but carried neither text nor a file tree.
    #[error("agent envelope carried neither text nor a file tree")]
    Empty,
}

/// A decoded agent reply.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentPayload {
    /// Plain commentary; does not touch the file tree.
    Text(String),

    /// A full or partial replacement tree, optionally with commentary.
    /// Always merged key-wise into the store, never wholesale-replaced.
    FileTreeUpdate {
        text: Option<String>,
        file_tree: FileTree,
    },

    /// The payload could not be decoded; the message is dropped from
    /// structured handling and rendered as an error transcript entry.
    Error { reason: String },
}

/// The legacy wire envelope.
#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    text: Option<String>,
    #[serde(default, rename = "fileTree", alias = "file_tree")]
    file_tree: Option<FileTree>,
}

impl AgentPayload {
    /// Decode a raw agent message body.
    ///
    /// Total: malformed input maps to [`AgentPayload::Error`] rather than an
    /// `Err`, so callers never have a failure path to mishandle.
    pub fn decode(raw: &str) -> Self {
        match Self::try_decode(raw) {
            Ok(payload) => payload,
            Err(err) => Self::Error {
                reason: err.to_string(),
            },
        }
    }

    fn try_decode(raw: &str) -> Result<Self, DecodeError> {
        let envelope: Envelope = serde_json::from_str(raw)?;
        match (envelope.text, envelope.file_tree) {
            (text, Some(file_tree)) => Ok(Self::FileTreeUpdate { text, file_tree }),
            (Some(text), None) => Ok(Self::Text(text)),
            (None, None) => Err(DecodeError::Empty),
        }
    }
}
