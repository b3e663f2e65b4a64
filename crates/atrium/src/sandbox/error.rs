//! Sandbox lifecycle error types.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while driving a sandbox run.
///
/// Any of these aborts the current lifecycle transition and leaves the
/// controller in its `Failed` state; none are silently swallowed.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Writing the mount snapshot into the sandbox filesystem failed.
    #[error("mounting into sandbox: {0}")]
    Mount(String),

    /// A path escaped the sandbox root or was otherwise unusable.
    #[error("invalid sandbox path {0:?}")]
    InvalidPath(String),

    /// Spawning a sandbox process failed.
    #[error("spawning {command}: {message}")]
    Spawn { command: String, message: String },

    /// The install step never exited.
    #[error("install step did not exit within {0:?}")]
    InstallTimeout(Duration),

    /// No readiness signal arrived for the started server.
    #[error("no readiness signal within {0:?}")]
    ReadyTimeout(Duration),

    /// The runtime stopped emitting readiness signals mid-run.
    #[error("readiness signal source closed")]
    ReadySignalLost,

    /// A single-file write-through was requested with nothing mounted.
    #[error("no sandbox filesystem is mounted")]
    NotMounted,

    /// The configured readiness pattern is not a valid expression.
    #[error("invalid readiness pattern: {0}")]
    Pattern(String),

    /// Generic IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
