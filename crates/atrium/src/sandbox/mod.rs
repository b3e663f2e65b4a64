//! Sandbox runtime controller.
//!
//! Owns the lifecycle of at most one active sandbox execution. A run walks
//! the pipeline `Mounting -> Installing -> Starting -> Ready`; requesting a
//! run while a previous process exists first kills that process and awaits
//! its termination, so two long-running processes never coexist. Both the
//! install-exit wait and the readiness wait are bounded by configurable
//! timeouts; expiry lands the controller in the terminal `Failed` state,
//! distinct from `Idle`, so callers can tell "never started" from
//! "timed out".

mod bootstrap;
mod error;
mod local;
mod runtime;

pub use bootstrap::{MANIFEST_PATH, SERVER_ENTRY_PATH, mount_snapshot};
pub use error::SandboxError;
pub use local::{LocalSandbox, LocalSandboxConfig};
pub use runtime::{OutputStream, SandboxProcess, SandboxRuntime};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::time::timeout;

use atrium_protocol::{FileTree, ServerReady};

/// Size of the lifecycle/output event buffer.
const EVENT_BUFFER_SIZE: usize = 256;

/// A command to run inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Sandbox lifecycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Port the synthesized bootstrap server binds inside the sandbox.
    pub preview_port: u16,
    /// Dependency-install step.
    pub install_command: CommandSpec,
    /// Long-running server start command.
    pub start_command: CommandSpec,
    /// Bound on the install step's exit wait.
    pub install_timeout_secs: u64,
    /// Bound on the readiness-signal wait after start.
    pub ready_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            preview_port: 3000,
            install_command: CommandSpec::new("npm", &["install"]),
            start_command: CommandSpec::new("npm", &["start"]),
            install_timeout_secs: 300,
            ready_timeout_secs: 60,
        }
    }
}

impl SandboxConfig {
    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// Lifecycle states of the single run slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    /// No process; nothing has been attempted since the last stop.
    Idle,
    /// Writing the snapshot plus bootstrap files into the sandbox.
    Mounting,
    /// Install step spawned; awaiting its exit.
    Installing,
    /// Server spawned; awaiting the readiness signal.
    Starting,
    /// Server announced a bound address.
    Ready { preview: ServerReady },
    /// A transition aborted; terminal until the next run request.
    Failed { reason: String },
}

impl RunState {
    /// The active preview address, when ready.
    pub fn preview(&self) -> Option<&ServerReady> {
        match self {
            Self::Ready { preview } => Some(preview),
            _ => None,
        }
    }
}

/// Which pipeline step produced an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Install,
    Server,
}

/// Observable controller events.
#[derive(Debug, Clone)]
pub enum RunEvent {
    /// The lifecycle state changed.
    State(RunState),
    /// A process emitted an output line.
    Output { phase: RunPhase, line: String },
}

/// Drives an opaque sandbox runtime through the run lifecycle.
pub struct SandboxController {
    runtime: Arc<dyn SandboxRuntime>,
    config: SandboxConfig,
    /// The one mutable slot. Holding its lock across the pipeline also
    /// serializes concurrent run requests behind the kill-previous rule.
    current: Mutex<Option<Box<dyn SandboxProcess>>>,
    state_tx: watch::Sender<RunState>,
    events_tx: broadcast::Sender<RunEvent>,
    mounted: AtomicBool,
}

impl SandboxController {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, config: SandboxConfig) -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            runtime,
            config,
            current: Mutex::new(None),
            state_tx,
            events_tx,
            mounted: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state_tx.borrow().clone()
    }

    /// Observe lifecycle state transitions.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to lifecycle and output events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<RunEvent> {
        self.events_tx.subscribe()
    }

    /// Execute a full run of `tree`: kill any previous process, mount the
    /// snapshot plus bootstrap files, install, start, await readiness.
    ///
    /// Returns the preview address once the server announces itself.
    pub async fn run(&self, tree: &FileTree) -> Result<ServerReady, SandboxError> {
        let mut slot = self.current.lock().await;

        // Subscribe before spawning anything so a fast server cannot
        // announce readiness into the void.
        let mut ready_rx = self.runtime.subscribe_server_ready();

        if let Some(mut previous) = slot.take() {
            info!("terminating previous sandbox process before new run");
            if let Err(err) = previous.kill().await {
                return Err(self.fail(err));
            }
        }

        self.set_state(RunState::Mounting);
        let snapshot = bootstrap::mount_snapshot(tree, self.config.preview_port);
        if let Err(err) = self.runtime.mount(&snapshot).await {
            return Err(self.fail(err));
        }
        self.mounted.store(true, Ordering::SeqCst);
        debug!("mounted {} file(s) into sandbox", snapshot.len());

        self.set_state(RunState::Installing);
        let install = &self.config.install_command;
        let mut install_proc = match self.runtime.spawn(&install.program, &install.args).await {
            Ok(proc) => proc,
            Err(err) => return Err(self.fail(err)),
        };
        self.forward_output(install_proc.as_mut(), RunPhase::Install);

        match timeout(self.config.install_timeout(), install_proc.wait()).await {
            // Any exit is treated as completion; a non-zero status is
            // logged so failed installs stay observable.
            Ok(Ok(code)) => {
                if code != Some(0) {
                    warn!("install step ({install}) exited with status {code:?}");
                }
            }
            Ok(Err(err)) => return Err(self.fail(err)),
            Err(_) => {
                let _ = install_proc.kill().await;
                return Err(self.fail(SandboxError::InstallTimeout(
                    self.config.install_timeout(),
                )));
            }
        }

        self.set_state(RunState::Starting);
        let start = &self.config.start_command;
        let mut server = match self.runtime.spawn(&start.program, &start.args).await {
            Ok(proc) => proc,
            Err(err) => return Err(self.fail(err)),
        };
        self.forward_output(server.as_mut(), RunPhase::Server);
        *slot = Some(server);

        match timeout(self.config.ready_timeout(), next_ready(&mut ready_rx)).await {
            Ok(Some(preview)) => {
                info!("sandbox server ready at {}", preview.url);
                self.set_state(RunState::Ready {
                    preview: preview.clone(),
                });
                Ok(preview)
            }
            Ok(None) => {
                self.kill_slot(&mut slot).await;
                Err(self.fail(SandboxError::ReadySignalLost))
            }
            Err(_) => {
                self.kill_slot(&mut slot).await;
                Err(self.fail(SandboxError::ReadyTimeout(self.config.ready_timeout())))
            }
        }
    }

    /// Kill the running process, if any, and return to `Idle`.
    pub async fn stop(&self) -> Result<(), SandboxError> {
        let mut slot = self.current.lock().await;
        self.kill_slot(&mut slot).await;
        self.set_state(RunState::Idle);
        Ok(())
    }

    /// Apply a single-file edit to the live sandbox filesystem.
    ///
    /// Independent of the run lifecycle: an already-running preview picks up
    /// the edit without a remount. Fails with [`SandboxError::NotMounted`]
    /// when nothing has been mounted yet.
    pub async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        if !self.mounted.load(Ordering::SeqCst) {
            return Err(SandboxError::NotMounted);
        }
        self.runtime.write_file(path, contents).await
    }

    fn set_state(&self, state: RunState) {
        debug!("sandbox controller -> {state:?}");
        let _ = self.events_tx.send(RunEvent::State(state.clone()));
        self.state_tx.send_replace(state);
    }

    fn fail(&self, err: SandboxError) -> SandboxError {
        warn!("sandbox run aborted: {err}");
        self.set_state(RunState::Failed {
            reason: err.to_string(),
        });
        err
    }

    async fn kill_slot(&self, slot: &mut Option<Box<dyn SandboxProcess>>) {
        if let Some(mut process) = slot.take()
            && let Err(err) = process.kill().await
        {
            warn!("failed to kill sandbox process: {err}");
        }
    }

    /// Drain a process's output lines into the event stream.
    fn forward_output(&self, process: &mut dyn SandboxProcess, phase: RunPhase) {
        let Some(mut lines) = process.take_output() else {
            return;
        };
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(line) = lines.next().await {
                debug!("sandbox {phase:?} output: {line}");
                let _ = events_tx.send(RunEvent::Output { phase, line });
            }
        });
    }
}

/// Next readiness signal, skipping over lagged gaps.
async fn next_ready(rx: &mut broadcast::Receiver<ServerReady>) -> Option<ServerReady> {
    loop {
        match rx.recv().await {
            Ok(ready) => return Some(ready),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("readiness subscription lagged by {skipped} signals");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
