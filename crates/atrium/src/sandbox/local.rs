//! Process-backed sandbox runtime.
//!
//! Mounts file trees into a scratch directory and runs commands as native
//! processes. Readiness is detected by matching process output against a
//! port-announcement pattern; the synthesized bootstrap server prints
//! `Server running on port {port}`, which the default pattern matches.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, timeout};
use tokio_stream::wrappers::ReceiverStream;

use atrium_protocol::{FileTree, ServerReady};

use super::error::SandboxError;
use super::runtime::{OutputStream, SandboxProcess, SandboxRuntime};

/// Size of the per-process output line buffer.
const OUTPUT_BUFFER_SIZE: usize = 256;

/// Size of the readiness signal buffer.
const READY_BUFFER_SIZE: usize = 8;

/// Bound on waiting for a killed process to be reaped.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for [`LocalSandbox`].
#[derive(Debug, Clone)]
pub struct LocalSandboxConfig {
    /// Pattern matched against process output to detect readiness. Its
    /// first capture group must be the bound port.
    pub ready_pattern: String,
    /// Host prefix for the preview address; the detected port is appended.
    pub preview_host: String,
}

impl Default for LocalSandboxConfig {
    fn default() -> Self {
        Self {
            ready_pattern: r"(?i)port\s+(\d{1,5})".to_string(),
            preview_host: "http://localhost".to_string(),
        }
    }
}

/// A sandbox backed by a scratch directory and native processes.
///
/// The scratch directory is removed when the sandbox is dropped.
pub struct LocalSandbox {
    root: tempfile::TempDir,
    ready_pattern: Regex,
    preview_host: String,
    ready_tx: broadcast::Sender<ServerReady>,
}

impl LocalSandbox {
    /// Create a sandbox with a fresh scratch directory.
    pub fn new(config: LocalSandboxConfig) -> Result<Self, SandboxError> {
        let root = tempfile::Builder::new()
            .prefix("atrium-sandbox-")
            .tempdir()?;
        let ready_pattern = Regex::new(&config.ready_pattern)
            .map_err(|err| SandboxError::Pattern(err.to_string()))?;
        let (ready_tx, _) = broadcast::channel(READY_BUFFER_SIZE);
        Ok(Self {
            root,
            ready_pattern,
            preview_host: config.preview_host,
            ready_tx,
        })
    }

    /// The sandbox's filesystem root.
    pub fn root_path(&self) -> &Path {
        self.root.path()
    }

    /// Resolve a flat tree path inside the root, rejecting escapes.
    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let rel = Path::new(path);
        let escapes = rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
        if path.is_empty() || escapes {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        Ok(self.root.path().join(rel))
    }
}

#[async_trait]
impl SandboxRuntime for LocalSandbox {
    async fn mount(&self, tree: &FileTree) -> Result<(), SandboxError> {
        for (path, contents) in tree {
            self.write_file(path, contents).await?;
        }
        debug!(
            "mounted {} file(s) under {}",
            tree.len(),
            self.root.path().display()
        );
        Ok(())
    }

    async fn write_file(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, contents).await?;
        Ok(())
    }

    async fn spawn(
        &self,
        command: &str,
        args: &[String],
    ) -> Result<Box<dyn SandboxProcess>, SandboxError> {
        let mut child = Command::new(command)
            .args(args)
            .current_dir(self.root.path())
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| SandboxError::Spawn {
                command: command.to_string(),
                message: err.to_string(),
            })?;

        let (line_tx, line_rx) = mpsc::channel(OUTPUT_BUFFER_SIZE);

        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(
                stdout,
                line_tx.clone(),
                Some((self.ready_pattern.clone(), self.make_announcer())),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            // Some toolchains announce on stderr; watch it too.
            spawn_line_reader(
                stderr,
                line_tx,
                Some((self.ready_pattern.clone(), self.make_announcer())),
            );
        }

        debug!("spawned {command} in sandbox {}", self.root.path().display());
        Ok(Box::new(LocalProcess {
            child,
            output: Some(Box::pin(ReceiverStream::new(line_rx))),
        }))
    }

    fn subscribe_server_ready(&self) -> broadcast::Receiver<ServerReady> {
        self.ready_tx.subscribe()
    }
}

impl LocalSandbox {
    fn make_announcer(&self) -> Announcer {
        Announcer {
            tx: self.ready_tx.clone(),
            preview_host: self.preview_host.clone(),
        }
    }
}

/// Emits a readiness signal for a detected port.
struct Announcer {
    tx: broadcast::Sender<ServerReady>,
    preview_host: String,
}

impl Announcer {
    fn announce(&self, port: u16) {
        let ready = ServerReady::new(port, format!("{}:{}", self.preview_host, port));
        if self.tx.send(ready).is_err() {
            warn!("server ready on port {port} but nobody is listening");
        }
    }
}

/// Read lines from a process pipe, forwarding them to the output channel
/// and scanning for a readiness announcement.
fn spawn_line_reader<R>(
    pipe: R,
    line_tx: mpsc::Sender<String>,
    readiness: Option<(Regex, Announcer)>,
) where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some((pattern, announcer)) = &readiness
                && let Some(captures) = pattern.captures(&line)
                && let Some(port) = captures.get(1).and_then(|m| m.as_str().parse::<u16>().ok())
            {
                announcer.announce(port);
            }
            if line_tx.send(line).await.is_err() {
                // Output receiver gone; keep draining for readiness only.
                continue;
            }
        }
    });
}

/// A native child process inside the sandbox.
struct LocalProcess {
    child: Child,
    output: Option<OutputStream>,
}

#[async_trait]
impl SandboxProcess for LocalProcess {
    fn take_output(&mut self) -> Option<OutputStream> {
        self.output.take()
    }

    async fn wait(&mut self) -> Result<Option<i32>, SandboxError> {
        let status = self.child.wait().await?;
        Ok(status.code())
    }

    async fn kill(&mut self) -> Result<(), SandboxError> {
        if let Err(err) = self.child.kill().await {
            // Process may already be gone; only surface a live failure.
            if matches!(self.child.try_wait(), Ok(None)) {
                return Err(SandboxError::Io(err));
            }
        }

        // Await the reap so no zombie outlives the slot.
        match timeout(KILL_REAP_TIMEOUT, self.child.wait()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => {
                warn!("error waiting for killed sandbox process: {err}");
                Ok(())
            }
            Err(_) => {
                warn!("timeout waiting for killed sandbox process to exit");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn tree(pairs: &[(&str, &str)]) -> FileTree {
        pairs
            .iter()
            .map(|(p, c)| (p.to_string(), c.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_mount_writes_nested_paths() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig::default()).unwrap();
        sandbox
            .mount(&tree(&[
                ("index.html", "<h1>hi</h1>"),
                ("src/app.js", "console.log(1)"),
            ]))
            .await
            .unwrap();

        let on_disk = std::fs::read_to_string(sandbox.root_path().join("src/app.js")).unwrap();
        assert_eq!(on_disk, "console.log(1)");
    }

    #[tokio::test]
    async fn test_rejects_escaping_paths() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig::default()).unwrap();

        let err = sandbox.write_file("../escape.txt", "x").await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPath(_)));

        let err = sandbox.write_file("/etc/escape.txt", "x").await.unwrap_err();
        assert!(matches!(err, SandboxError::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_spawn_streams_output_lines() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig::default()).unwrap();
        let mut process = sandbox
            .spawn("sh", &["-c".to_string(), "echo one; echo two".to_string()])
            .await
            .unwrap();

        let mut lines = process.take_output().unwrap();
        let mut seen = Vec::new();
        while let Some(line) = lines.next().await {
            seen.push(line);
        }
        assert_eq!(seen, vec!["one", "two"]);
        assert_eq!(process.wait().await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn test_detects_readiness_announcement() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig::default()).unwrap();
        let mut ready_rx = sandbox.subscribe_server_ready();

        let mut process = sandbox
            .spawn(
                "sh",
                &[
                    "-c".to_string(),
                    "echo 'Server running on port 3000'".to_string(),
                ],
            )
            .await
            .unwrap();

        let ready = timeout(Duration::from_secs(5), ready_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ready.port, 3000);
        assert_eq!(ready.url, "http://localhost:3000");

        process.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_kill_reaps_long_running_process() {
        let sandbox = LocalSandbox::new(LocalSandboxConfig::default()).unwrap();
        let mut process = sandbox
            .spawn("sleep", &["60".to_string()])
            .await
            .unwrap();

        process.kill().await.unwrap();
    }
}
