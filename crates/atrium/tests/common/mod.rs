//! Test utilities and common fixtures.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

use atrium::error::{PersistenceError, TransportError};
use atrium::sandbox::{OutputStream, SandboxError, SandboxProcess, SandboxRuntime};
use atrium_protocol::{FileTree, ParticipantRef, Project, ServerReady};

/// Initialize test logging once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug"))
        .is_test(true)
        .try_init();
}

/// Build a tree from literal pairs.
pub fn tree(pairs: &[(&str, &str)]) -> FileTree {
    pairs
        .iter()
        .map(|(p, c)| (p.to_string(), c.to_string()))
        .collect()
}

pub fn participant(id: &str) -> ParticipantRef {
    ParticipantRef::new(id, format!("{id}@localhost"))
}

// ============================================================================
// Fake backend
// ============================================================================

/// In-memory stand-in for the persistence backend. Records every call.
pub struct FakeBackend {
    pub project: Mutex<Project>,
    pub persisted: Mutex<Vec<FileTree>>,
    pub invited: Mutex<Vec<Vec<String>>>,
    pub directory: Vec<ParticipantRef>,
    pub fail_persist: AtomicBool,
}

impl FakeBackend {
    pub fn new(project: Project) -> Self {
        Self {
            project: Mutex::new(project),
            persisted: Mutex::new(Vec::new()),
            invited: Mutex::new(Vec::new()),
            directory: vec![participant("u-1"), participant("u-2"), participant("u-3")],
            fail_persist: AtomicBool::new(false),
        }
    }

    pub fn with_tree(file_tree: FileTree) -> Self {
        Self::new(Project {
            id: "p-1".to_string(),
            name: "demo".to_string(),
            users: vec![participant("u-1")],
            file_tree,
        })
    }

    pub fn persisted_trees(&self) -> Vec<FileTree> {
        self.persisted.lock().unwrap().clone()
    }

    pub fn invites(&self) -> Vec<Vec<String>> {
        self.invited.lock().unwrap().clone()
    }
}

#[async_trait]
impl atrium::backend::ProjectBackend for FakeBackend {
    async fn fetch_project(&self, _project_id: &str) -> Result<Project, TransportError> {
        Ok(self.project.lock().unwrap().clone())
    }

    async fn persist_file_tree(
        &self,
        project_id: &str,
        tree: &FileTree,
    ) -> Result<(), PersistenceError> {
        self.persisted.lock().unwrap().push(tree.clone());
        if self.fail_persist.load(Ordering::SeqCst) {
            return Err(PersistenceError {
                project_id: project_id.to_string(),
                source: TransportError::ChannelClosed,
            });
        }
        Ok(())
    }

    async fn add_collaborators(
        &self,
        _project_id: &str,
        users: &[String],
    ) -> Result<(), TransportError> {
        self.invited.lock().unwrap().push(users.to_vec());
        Ok(())
    }

    async fn fetch_all_participants(&self) -> Result<Vec<ParticipantRef>, TransportError> {
        Ok(self.directory.clone())
    }
}

// ============================================================================
// Scripted sandbox runtime
// ============================================================================

/// One observed call on the scripted sandbox, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum SandboxCall {
    Mount(FileTree),
    Spawn(String),
    Kill(String),
    Write(String, String),
}

/// Scripted stand-in for an opaque sandbox runtime.
///
/// Install-like commands (any command line containing `install`) exit
/// immediately with status 0; everything else runs until killed. Readiness
/// is announced manually via [`announce_ready`].
///
/// [`announce_ready`]: ScriptedSandbox::announce_ready
pub struct ScriptedSandbox {
    calls: Arc<Mutex<Vec<SandboxCall>>>,
    pub hang_install: AtomicBool,
    pub install_exit_code: Mutex<i32>,
    fail_spawn_containing: Mutex<Option<String>>,
    ready_tx: broadcast::Sender<ServerReady>,
}

impl Default for ScriptedSandbox {
    fn default() -> Self {
        let (ready_tx, _) = broadcast::channel(8);
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            hang_install: AtomicBool::new(false),
            install_exit_code: Mutex::new(0),
            fail_spawn_containing: Mutex::new(None),
            ready_tx,
        }
    }
}

impl ScriptedSandbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next spawn whose command line contains `needle` fail.
    pub fn fail_spawn_containing(&self, needle: &str) {
        *self.fail_spawn_containing.lock().unwrap() = Some(needle.to_string());
    }

    /// Emit a readiness signal as the sandbox would.
    pub fn announce_ready(&self, port: u16, url: &str) {
        let _ = self.ready_tx.send(ServerReady::new(port, url));
    }

    pub fn calls(&self) -> Vec<SandboxCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn kill_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, SandboxCall::Kill(_)))
            .count()
    }

    pub fn mounts(&self) -> Vec<FileTree> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SandboxCall::Mount(tree) => Some(tree),
                _ => None,
            })
            .collect()
    }

    pub fn spawned_commands(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SandboxCall::Spawn(cmd) => Some(cmd),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: SandboxCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SandboxRuntime for ScriptedSandbox {
    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError> {
        self.record(SandboxCall::Mount(tree.clone()));
        Ok(())
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        self.record(SandboxCall::Write(path.to_string(), contents.to_string()));
        Ok(())
    }

    async fn spawn(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let command_line = std::iter::once(command.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");

        let should_fail = {
            let mut pending = self.fail_spawn_containing.lock().unwrap();
            if pending
                .as_deref()
                .is_some_and(|needle| command_line.contains(needle))
            {
                pending.take();
                true
            } else {
                false
            }
        };
        if should_fail {
            return Err(SandboxError::Spawn {
                command: command_line,
                message: "scripted spawn failure".to_string(),
            });
        }

        self.record(SandboxCall::Spawn(command_line.clone()));

        let is_install = command_line.contains("install");
        let exits_immediately = is_install && !self.hang_install.load(Ordering::SeqCst);

        let (line_tx, line_rx) = mpsc::channel(8);
        let _ = line_tx
            .send(format!("scripted output of `{command_line}`"))
            .await;

        Ok(Box::new(ScriptedProcess {
            command_line,
            exits_immediately,
            exit_code: *self.install_exit_code.lock().unwrap(),
            killed: false,
            output: Some(Box::pin(ReceiverStream::new(line_rx))),
            calls: Arc::clone(&self.calls),
        }))
    }

    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }
}

struct ScriptedProcess {
    command_line: String,
    exits_immediately: bool,
    exit_code: i32,
    killed: bool,
    output: Option<OutputStream>,
    calls: Arc<Mutex<Vec<SandboxCall>>>,
}

#[async_trait]
impl SandboxProcess for ScriptedProcess {
    fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    async fn wait(&mut self) -> Result<Option<i32>, SandboxError> {
        if self.exits_immediately {
            return Ok(Some(self.exit_code));
        }
        // Runs until killed.
        loop {
            if self.killed {
                return Ok(None);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }

    async fn kill(&mut self) -> Result<(), SandboxError> {
        self.killed = true;
        self.calls
            .lock()
            .unwrap()
            .push(SandboxCall::Kill(self.command_line.clone()));
        Ok(())
    }
}
