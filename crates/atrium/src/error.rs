//! Error taxonomy shared across orchestrator boundaries.
//!
//! Each boundary owns its failure type: transport and persistence failures
//! live here, sandbox lifecycle failures in [`crate::sandbox::SandboxError`],
//! agent decode failures in `atrium_protocol::DecodeError`. A remote failure
//! never leaves local component state inconsistent.

use thiserror::Error;

/// Network or channel failure.
///
/// Reported to the caller; local state is untouched.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The channel (or its transport) is no longer accepting traffic.
    #[error("channel closed")]
    ChannelClosed,

    /// An HTTP request to the backend collaborator failed outright.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an unexpected status.
    #[error("unexpected status {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    /// The backend's response body did not decode.
    #[error("decoding response from {endpoint}: {message}")]
    Decode { endpoint: String, message: String },
}

/// Failed write-back of the file tree to the persistence backend.
///
/// The local mutation is NOT rolled back: the in-memory tree stays
/// authoritative for the session and the backend is eventually consistent
/// with it. No retry is scheduled automatically.
#[derive(Debug, Error)]
#[error("persisting file tree for project {project_id}")]
pub struct PersistenceError {
    /// Which project's tree failed to persist.
    pub project_id: String,
    /// The underlying transport failure.
    #[source]
    pub source: TransportError,
}
