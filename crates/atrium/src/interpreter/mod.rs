//! AI response interpreter.
//!
//! Decodes raw agent message bodies into [`AgentPayload`] once, at the
//! boundary, and applies file-tree payloads to the store. A malformed
//! payload is fatal to that message only: it is dropped from structured
//! handling and reported as [`AgentOutcome::Rejected`] so the session can
//! render an error transcript entry instead of failing.

use log::{info, warn};

use atrium_protocol::AgentPayload;

use crate::filetree::FileTreeStore;

/// What interpreting one agent message did.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutcome {
    /// Commentary only; the file tree was not touched.
    Commentary(String),

    /// A tree payload was merged into the store.
    Merged {
        /// Commentary accompanying the tree, if any.
        text: Option<String>,
        /// How many files the payload carried.
        file_count: usize,
        /// File to activate, when the session had none open.
        activate: Option<String>,
    },

    /// The payload could not be decoded; the store is unchanged.
    Rejected { reason: String },
}

/// Interprets structured agent replies against a file tree store.
#[derive(Clone)]
pub struct ResponseInterpreter {
    store: FileTreeStore,
}

impl ResponseInterpreter {
    pub fn new(store: FileTreeStore) -> Self {
        Self { store }
    }

    /// Interpret a raw agent message body.
    ///
    /// `has_active_file` tells the interpreter whether the session already
    /// has a file open; only when it does not is the first path of an
    /// incoming tree promoted to the active file.
    ///
    /// Tree payloads are always merged key-wise — full and partial trees
    /// alike — so files untouched by the agent survive concurrent edits.
    pub async fn interpret(&self, raw: &str, has_active_file: bool) -> AgentOutcome {
        match AgentPayload::decode(raw) {
            AgentPayload::Text(text) => AgentOutcome::Commentary(text),

            AgentPayload::FileTreeUpdate { text, file_tree } => {
                let activate = if has_active_file {
                    None
                } else {
                    file_tree.first_path().map(str::to_string)
                };
                let file_count = file_tree.len();

                // A failed write-back is reported by the store; the merge
                // itself has already landed locally either way.
                if let Err(err) = self.store.merge(file_tree).await {
                    warn!("agent tree merged locally but not persisted: {err}");
                }
                info!(
                    "merged {} file(s) from agent into project {}",
                    file_count,
                    self.store.project_id()
                );

                AgentOutcome::Merged {
                    text,
                    file_count,
                    activate,
                }
            }

            AgentPayload::Error { reason } => {
                warn!("dropping undecodable agent message: {reason}");
                AgentOutcome::Rejected { reason }
            }
        }
    }
}
