//! The per-session workspace orchestrator.
//!
//! One explicit state object per session. Every mutation funnels through the
//! typed operations here; presentation layers observe the session through
//! read-only [`WorkspaceSnapshot`] values and never touch component state
//! directly.

mod transcript;

pub use transcript::{TranscriptBody, TranscriptEntry};

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

use atrium_protocol::{FileTree, MessageBody, ParticipantRef, ProjectMessage, ServerReady};

use crate::backend::{BackendPersist, ProjectBackend};
use crate::channel::{ChannelTransport, ProjectChannel};
use crate::config::WorkspaceConfig;
use crate::filetree::FileTreeStore;
use crate::interpreter::{AgentOutcome, ResponseInterpreter};
use crate::sandbox::{RunState, SandboxController, SandboxError, SandboxRuntime};

/// Read-only view of one workspace session.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSnapshot {
    pub project_id: String,
    pub project_name: String,
    pub participants: Vec<ParticipantRef>,
    pub transcript: Vec<TranscriptEntry>,
    pub file_tree: FileTree,
    pub open_files: Vec<String>,
    pub current_file: Option<String>,
    pub selected_collaborators: Vec<String>,
    pub run_state: RunState,
    pub preview_url: Option<String>,
    pub waiting_for_agent: bool,
}

/// Mutable session bookkeeping behind the snapshot.
#[derive(Debug, Default)]
struct SessionState {
    project_name: String,
    participants: Vec<ParticipantRef>,
    transcript: Vec<TranscriptEntry>,
    open_files: Vec<String>,
    current_file: Option<String>,
    selection: BTreeSet<String>,
    waiting_for_agent: bool,
}

struct Inner {
    project_id: String,
    me: ParticipantRef,
    store: FileTreeStore,
    channel: ProjectChannel,
    controller: SandboxController,
    backend: Arc<dyn ProjectBackend>,
    interpreter: ResponseInterpreter,
    session: RwLock<SessionState>,
    snapshot_tx: watch::Sender<WorkspaceSnapshot>,
}

/// A live workspace session for one participant.
pub struct Workspace {
    inner: Arc<Inner>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Workspace {
    /// Open a session: fetch the project, seed the store, connect the
    /// channel, register the scoped message subscription.
    pub async fn open(
        project_id: &str,
        me: ParticipantRef,
        backend: Arc<dyn ProjectBackend>,
        transport: Arc<dyn ChannelTransport>,
        runtime: Arc<dyn SandboxRuntime>,
        config: WorkspaceConfig,
    ) -> Result<Self> {
        let project = backend
            .fetch_project(project_id)
            .await
            .with_context(|| format!("fetching project {project_id}"))?;

        let store = FileTreeStore::new(
            project_id,
            project.file_tree,
            Arc::new(BackendPersist(Arc::clone(&backend))),
        );
        let channel = ProjectChannel::connect(transport, project_id);
        let controller = SandboxController::new(runtime, config.sandbox);
        let interpreter = ResponseInterpreter::new(store.clone());

        let session = SessionState {
            project_name: project.name,
            participants: project.users,
            ..SessionState::default()
        };

        let (snapshot_tx, _) = watch::channel(WorkspaceSnapshot {
            project_id: project_id.to_string(),
            project_name: session.project_name.clone(),
            participants: session.participants.clone(),
            transcript: Vec::new(),
            file_tree: FileTree::new(),
            open_files: Vec::new(),
            current_file: None,
            selected_collaborators: Vec::new(),
            run_state: RunState::Idle,
            preview_url: None,
            waiting_for_agent: false,
        });

        let inner = Arc::new(Inner {
            project_id: project_id.to_string(),
            me,
            store,
            channel,
            controller,
            backend,
            interpreter,
            session: RwLock::new(session),
            snapshot_tx,
        });
        inner.publish_snapshot().await;

        let workspace = Self {
            inner: Arc::clone(&inner),
            tasks: std::sync::Mutex::new(Vec::new()),
        };
        workspace.spawn_message_pump();
        workspace.spawn_state_forwarder();
        info!("workspace session opened for project {project_id}");
        Ok(workspace)
    }

    /// Current read-only snapshot.
    pub fn snapshot(&self) -> WorkspaceSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    /// Observe snapshot revisions.
    pub fn watch(&self) -> watch::Receiver<WorkspaceSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    /// Send a chat message to the other participants.
    ///
    /// A message addressed to `@ai` flags the session as waiting for the
    /// agent until its reply arrives.
    pub async fn send_chat(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let addressed_to_agent = text.to_lowercase().starts_with("@ai");
        {
            let mut session = self.inner.session.write().await;
            if addressed_to_agent {
                session.waiting_for_agent = true;
            }
            session
                .transcript
                .push(TranscriptEntry::text(self.inner.me.clone(), text));
        }
        self.inner.publish_snapshot().await;

        self.inner
            .channel
            .send(ProjectMessage::text(self.inner.me.clone(), text))
            .await
            .context("sending chat message")
    }

    /// Attach a base64-encoded image to the conversation.
    pub async fn attach_image(&self, image: &str) -> Result<()> {
        // Accept bare base64 or a data URL; validate the encoded bytes.
        let encoded = image
            .split_once(";base64,")
            .map(|(_, data)| data)
            .unwrap_or(image);
        BASE64
            .decode(encoded)
            .context("image attachment is not valid base64")?;

        {
            let mut session = self.inner.session.write().await;
            session
                .transcript
                .push(TranscriptEntry::image(self.inner.me.clone(), image));
        }
        self.inner.publish_snapshot().await;

        self.inner
            .channel
            .send(ProjectMessage::image(self.inner.me.clone(), image))
            .await
            .context("sending image attachment")
    }

    /// Create or update a file.
    ///
    /// The local tree is mutated first and stays authoritative; the edit is
    /// then written through to the backend and, best-effort, to a mounted
    /// sandbox. An error here means "saved locally, not persisted".
    pub async fn edit_file(&self, path: &str, contents: &str) -> Result<()> {
        let persisted = self.inner.store.upsert(path, contents).await;

        match self.inner.controller.write_file(path, contents).await {
            Ok(()) => debug!("edit of {path} written through to sandbox"),
            Err(SandboxError::NotMounted) => {}
            Err(err) => warn!("sandbox write-through for {path} failed: {err}"),
        }

        self.inner.publish_snapshot().await;
        persisted.context("file saved locally but not persisted")
    }

    /// Create a new file seeded with defaults for its extension, open it,
    /// and make it the active file.
    pub async fn create_file(&self, path: &str) -> Result<()> {
        if path.trim().is_empty() {
            bail!("file name is empty");
        }
        let contents = default_contents(path);
        let persisted = self.inner.store.upsert(path, contents).await;

        {
            let mut session = self.inner.session.write().await;
            open_in(&mut session, path);
        }
        self.inner.publish_snapshot().await;
        persisted.context("file saved locally but not persisted")
    }

    /// Open an existing file and make it active.
    pub async fn open_file(&self, path: &str) -> Result<()> {
        if !self.inner.store.get().await.contains(path) {
            bail!("no such file: {path}");
        }
        {
            let mut session = self.inner.session.write().await;
            open_in(&mut session, path);
        }
        self.inner.publish_snapshot().await;
        Ok(())
    }

    /// Close an open file. Closing the active file activates the next open
    /// one, if any.
    pub async fn close_file(&self, path: &str) {
        {
            let mut session = self.inner.session.write().await;
            session.open_files.retain(|open| open != path);
            if session.current_file.as_deref() == Some(path) {
                session.current_file = session.open_files.first().cloned();
            }
        }
        self.inner.publish_snapshot().await;
    }

    /// Toggle a participant in the invite selection.
    pub async fn toggle_collaborator(&self, participant_id: &str) {
        {
            let mut session = self.inner.session.write().await;
            if !session.selection.remove(participant_id) {
                session.selection.insert(participant_id.to_string());
            }
        }
        self.inner.publish_snapshot().await;
    }

    /// Invite the currently-selected participants to the project.
    ///
    /// Returns how many were invited; the selection is cleared on success.
    pub async fn invite_selected(&self) -> Result<usize> {
        let selected: Vec<String> = {
            let session = self.inner.session.read().await;
            session.selection.iter().cloned().collect()
        };
        if selected.is_empty() {
            return Ok(0);
        }

        self.inner
            .backend
            .add_collaborators(&self.inner.project_id, &selected)
            .await
            .context("adding collaborators")?;

        let invited = selected.len();
        {
            let mut session = self.inner.session.write().await;
            session.selection.clear();
        }
        self.inner.publish_snapshot().await;
        info!(
            "invited {invited} collaborator(s) to project {}",
            self.inner.project_id
        );
        Ok(invited)
    }

    /// All known participants, for invitation search.
    pub async fn list_participants(&self) -> Result<Vec<ParticipantRef>> {
        self.inner
            .backend
            .fetch_all_participants()
            .await
            .context("fetching participants")
    }

    /// Run the project: kill any previous sandbox process, mount the
    /// current tree, install, start, and await the preview address.
    pub async fn run(&self) -> Result<ServerReady> {
        let tree = self.inner.store.get().await;
        let ready = self
            .inner
            .controller
            .run(&tree)
            .await
            .context("running project in sandbox")?;
        Ok(ready)
    }

    /// Stop the running preview, if any.
    pub async fn stop(&self) -> Result<()> {
        self.inner
            .controller
            .stop()
            .await
            .context("stopping sandbox process")?;
        Ok(())
    }

    /// Tear the session down: release the channel subscription and stop any
    /// running sandbox process.
    pub async fn close(&self) -> Result<()> {
        self.abort_tasks();
        self.stop().await?;
        info!(
            "workspace session closed for project {}",
            self.inner.project_id
        );
        Ok(())
    }

    fn abort_tasks(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    /// Pump incoming channel messages into the session.
    ///
    /// The task owns the scoped subscription; aborting it releases the
    /// registration, so a re-opened session never sees duplicate handlers.
    fn spawn_message_pump(&self) {
        let inner = Arc::clone(&self.inner);
        let mut subscription = inner.channel.subscribe();
        let task = tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                inner.handle_incoming(message).await;
            }
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }

    /// Mirror sandbox lifecycle transitions into the snapshot.
    fn spawn_state_forwarder(&self) {
        let inner = Arc::clone(&self.inner);
        let mut state_rx = inner.controller.watch_state();
        let task = tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                inner.publish_snapshot().await;
            }
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

impl Inner {
    /// Handle one incoming channel message, in delivery order.
    async fn handle_incoming(&self, message: ProjectMessage) {
        if message.sender.is_agent() {
            self.handle_agent_message(message).await;
        } else {
            let entry = match message.body {
                MessageBody::Text { message: text } => {
                    TranscriptEntry::text(message.sender, text)
                }
                MessageBody::Image { image } => TranscriptEntry::image(message.sender, image),
            };
            let mut session = self.session.write().await;
            session.transcript.push(entry);
            drop(session);
            self.publish_snapshot().await;
        }
    }

    async fn handle_agent_message(&self, message: ProjectMessage) {
        let sender = message.sender.clone();
        let raw = message.as_text().unwrap_or_default().to_string();

        let has_active_file = self.session.read().await.current_file.is_some();
        let outcome = self.interpreter.interpret(&raw, has_active_file).await;

        {
            let mut session = self.session.write().await;
            session.waiting_for_agent = false;
            match outcome {
                AgentOutcome::Commentary(text) => {
                    session.transcript.push(TranscriptEntry::text(sender, text));
                }
                AgentOutcome::Merged {
                    text,
                    file_count,
                    activate,
                } => {
                    if let Some(path) = activate {
                        open_in(&mut session, &path);
                    }
                    let text =
                        text.unwrap_or_else(|| format!("Updated {file_count} file(s)"));
                    session.transcript.push(TranscriptEntry::text(sender, text));
                }
                AgentOutcome::Rejected { reason } => {
                    session
                        .transcript
                        .push(TranscriptEntry::error(sender, reason));
                }
            }
        }
        self.publish_snapshot().await;
    }

    /// Rebuild and publish the read-only snapshot.
    async fn publish_snapshot(&self) {
        let file_tree = self.store.get().await;
        let run_state = self.controller.state();
        let session = self.session.read().await;

        let snapshot = WorkspaceSnapshot {
            project_id: self.project_id.clone(),
            project_name: session.project_name.clone(),
            participants: session.participants.clone(),
            transcript: session.transcript.clone(),
            file_tree,
            open_files: session.open_files.clone(),
            current_file: session.current_file.clone(),
            selected_collaborators: session.selection.iter().cloned().collect(),
            preview_url: run_state.preview().map(|ready| ready.url.clone()),
            run_state,
            waiting_for_agent: session.waiting_for_agent,
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

/// Add `path` to the open set and make it active.
fn open_in(session: &mut SessionState, path: &str) {
    if !session.open_files.iter().any(|open| open == path) {
        session.open_files.push(path.to_string());
    }
    session.current_file = Some(path.to_string());
}

/// Seed contents for a newly-created file, by extension.
fn default_contents(path: &str) -> &'static str {
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("html") => {
            "<!DOCTYPE html>\n<html>\n<head>\n    <title>My Page</title>\n    <link rel=\"stylesheet\" href=\"styles.css\">\n</head>\n<body>\n    <h1>Hello World</h1>\n    <script src=\"script.js\"></script>\n</body>\n</html>"
        }
        Some("css") => {
            "/* Add your styles here */\nbody {\n    margin: 0;\n    padding: 20px;\n    font-family: Arial, sans-serif;\n}"
        }
        Some("js") => "// Add your JavaScript code here\nconsole.log(\"Script loaded!\");",
        _ => "",
    }
}
