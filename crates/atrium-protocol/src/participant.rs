//! Participant identities.

use serde::{Deserialize, Serialize};

use crate::agent::AGENT_SENDER_ID;

/// A reference to a workspace participant: identity plus email.
///
/// The reserved id [`AGENT_SENDER_ID`] marks the automated agent; every other
/// id refers to a human participant managed by the persistence backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRef {
    /// Stable participant id. Accepts the backend's legacy `_id` key.
    #[serde(alias = "_id")]
    pub id: String,

    /// Display email.
    pub email: String,
}

impl ParticipantRef {
    /// Create a participant reference.
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
        }
    }

    /// The reserved automated-agent identity.
    pub fn agent() -> Self {
        Self::new(AGENT_SENDER_ID, "AI Assistant")
    }

    /// Whether this reference names the automated agent.
    pub fn is_agent(&self) -> bool {
        self.id == AGENT_SENDER_ID
    }
}
