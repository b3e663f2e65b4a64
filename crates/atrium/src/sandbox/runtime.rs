//! The opaque sandbox runtime boundary.
//!
//! The orchestrator drives a sandbox through this trait pair; it never
//! reimplements the runtime's internal process/VM semantics. The crate ships
//! a process-backed implementation ([`super::LocalSandbox`]); a
//! browser-hosted container would slot in behind the same boundary.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::sync::broadcast;

use atrium_protocol::{FileTree, ServerReady};

use super::error::SandboxError;

/// Stream of a sandbox process's interleaved stdout/stderr lines.
pub type OutputStream = Pin<Box<dyn Stream<Item = String> + Send>>;

/// An opaque sandbox runtime capability.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Write `tree` into the sandbox filesystem, replacing prior contents
    /// path-by-path.
    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError>;

    /// Write one file into the live sandbox filesystem.
    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError>;

    /// Spawn a process inside the sandbox.
    async fn spawn(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<Box<dyn SandboxProcess>, SandboxError>;

    /// Subscribe to readiness notifications for servers bound inside the
    /// sandbox.
    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady>;
}

/// Handle to one spawned sandbox process.
#[async_trait]
pub trait SandboxProcess: Send {
    /// Take the process's output stream. Yields `Some` exactly once.
    fn take_output(&mut self) -> Option<OutputStream>;

    /// Await process exit, returning the exit code when known.
    async fn wait(&mut self) -> Result<Option<i32>, SandboxError>;

    /// Kill the process and await its termination.
    async fn kill(&mut self) -> Result<(), SandboxError>;
}
