//! Canonical wire types for Atrium workspace communication.
//!
//! This crate defines the shapes that cross every Atrium boundary:
//!
//! ```text
//! Workspace <--[channel: project-message]--> other participants + agent
//!     |
//!     +--[REST]--> persistence backend
//!     +--[runtime boundary]--> sandbox (mount/spawn/server-ready)
//! ```
//!
//! ## Design principles
//!
//! 1. **Decode once at the boundary.** Agent replies arrive as a JSON string
//!    inside the message body; they are decoded into [`AgentPayload`] exactly
//!    once, at the channel boundary, never re-parsed downstream.
//! 2. **A malformed payload poisons only itself.** Decoding is total:
//!    failures become [`AgentPayload::Error`] and the session continues.
//! 3. **Paths are flat keys.** A [`FileTree`] is a flat map of relative path
//!    to contents; the path string itself encodes hierarchy.

pub mod agent;
pub mod filetree;
pub mod message;
pub mod participant;
pub mod project;
pub mod sandbox;

pub use agent::{AGENT_SENDER_ID, AgentPayload, DecodeError};
pub use filetree::FileTree;
pub use message::{MessageBody, PROJECT_MESSAGE_EVENT, ProjectMessage};
pub use participant::ParticipantRef;
pub use project::Project;
pub use sandbox::ServerReady;
