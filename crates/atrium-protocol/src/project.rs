//! The project as fetched from the persistence backend.

use serde::{Deserialize, Serialize};

use crate::filetree::FileTree;
use crate::participant::ParticipantRef;

/// A persisted project: identity, mutable name, membership, file tree.
///
/// Fetched once per workspace session; its tree is the canonical seed for
/// the local file tree store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Stable project id. Accepts the backend's legacy `_id` key.
    #[serde(alias = "_id")]
    pub id: String,

    /// Mutable display name.
    pub name: String,

    /// Member participants.
    #[serde(default)]
    pub users: Vec<ParticipantRef>,

    /// The persisted file tree.
    #[serde(default, rename = "fileTree", alias = "file_tree")]
    pub file_tree: FileTree,
}
