//! Extraction Pipeline
//!
//! ```text
//! ExtractionRequest
//!     ↓ validate            (sync error: Validation)
//!     ↓ acquire             (sync error: Fetch)
//!     ↓ spawn engine        (sync error: Spawn)
//! StreamResult returned ──────────────┐
//!     ↓ supervisor task               │ caller reads output
//!   source → engine stdin             │ while the engine runs
//!   engine stdout → pipe ─────────────┘
//!     ↓ engine exits, pipe closed, cleanup runs
//! Completion published once (Engine / Cleanup errors)
//! ```
//!
//! Nothing here is retried. Every failure is reported once, either to the
//! caller of [`Extractor::extract`] or through the [`Completion`](crate::Completion).

use std::fmt;
use std::future::Future;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::engine::EngineCommand;
use crate::error::{CleanupError, EngineError, ExtractError, Result};
use crate::request::ExtractionRequest;
use crate::stream::StreamResult;
use crate::transport::{HttpTransport, SourceReader, Transport};

/// Buffer between the engine's stdout and the reader of the result.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

/// How long to wait for the stderr drain after the engine exited.
const STDERR_GRACE: Duration = Duration::from_secs(1);

/// Where an extraction is in its lifecycle. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Created,
    Validated,
    Acquiring,
    Spawned,
    Streaming,
    Completed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Created => "created",
            Stage::Validated => "validated",
            Stage::Acquiring => "acquiring",
            Stage::Spawned => "spawned",
            Stage::Streaming => "streaming",
            Stage::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Runs extraction requests through the engine.
///
/// Cheap to share behind an `Arc`; every call to [`extract`](Self::extract)
/// spawns its own engine process and supervisor task.
pub struct Extractor {
    engine: EngineCommand,
    default_transport: Arc<dyn Transport>,
    engine_timeout: Option<Duration>,
    pipe_capacity: usize,
}

impl Extractor {
    /// Uses plain network fetch for requests without their own transport.
    pub fn new(engine: EngineCommand) -> Self {
        Self {
            engine,
            default_transport: Arc::new(HttpTransport::new()),
            engine_timeout: None,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    pub fn with_default_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.default_transport = transport;
        self
    }

    /// Kill the engine if it runs longer than `timeout`.
    pub fn with_engine_timeout(mut self, timeout: Duration) -> Self {
        self.engine_timeout = Some(timeout);
        self
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    pub fn engine(&self) -> &EngineCommand {
        &self.engine
    }

    pub fn default_transport(&self) -> &Arc<dyn Transport> {
        &self.default_transport
    }

    /// Start an extraction. Returns as soon as the engine is running.
    pub async fn extract(&self, request: ExtractionRequest) -> Result<StreamResult> {
        self.extract_with_cancel(request, CancellationToken::new()).await
    }

    /// Like [`extract`](Self::extract); cancelling `cancel` aborts a pending
    /// fetch or kills a running engine.
    pub async fn extract_with_cancel(
        &self,
        mut request: ExtractionRequest,
        cancel: CancellationToken,
    ) -> Result<StreamResult> {
        tracing::debug!(stage = %Stage::Created, request = ?request, "extraction requested");

        let validated = request.validate();
        if let Err(e) = validated {
            release_after_failure(request.run_cleanup()).await;
            return Err(e);
        }
        tracing::debug!(stage = %Stage::Validated, "request validated");

        tracing::debug!(stage = %Stage::Acquiring, "acquiring source");
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ExtractError::Cancelled),
            acquired = request.acquire(&self.default_transport) => acquired,
        };
        let source = match acquired {
            Ok(source) => source,
            Err(e) => {
                release_after_failure(request.run_cleanup()).await;
                return Err(e);
            }
        };

        let mut child = match self.engine.to_command().spawn() {
            Ok(child) => child,
            Err(e) => {
                drop(source);
                tracing::error!(engine = %self.engine.describe(), error = %e, "failed to spawn engine");
                release_after_failure(request.run_cleanup()).await;
                return Err(ExtractError::Spawn(e));
            }
        };
        let pid = child.id();
        tracing::info!(stage = %Stage::Spawned, pid, "extraction engine started");

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (reader, writer) = tokio::io::duplex(self.pipe_capacity);
        let (tx, rx) = oneshot::channel();

        // A child token lets the result cancel on drop without touching the
        // caller's token.
        let cancel = cancel.child_token();
        let supervisor = Supervisor {
            child,
            feed: tokio::spawn(feed_stdin(source, stdin)),
            diagnostics: tokio::spawn(drain_stderr(stderr, pid)),
            stdout,
            writer,
            request,
            cancel: cancel.clone(),
            timeout: self.engine_timeout,
            pid,
        };
        tokio::spawn(supervisor.run(tx));

        tracing::debug!(stage = %Stage::Streaming, pid, "streaming engine output");
        Ok(StreamResult::new(reader, rx, cancel))
    }
}

impl fmt::Debug for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extractor")
            .field("engine", &self.engine)
            .field("default_transport", &self.default_transport.name())
            .field("engine_timeout", &self.engine_timeout)
            .field("pipe_capacity", &self.pipe_capacity)
            .finish()
    }
}

/// Synchronous failures still release whatever the request holds; the
/// original error is what the caller sees.
async fn release_after_failure(
    cleanup: impl Future<Output = std::result::Result<(), CleanupError>>,
) {
    if let Err(e) = cleanup.await {
        tracing::warn!(error = %e, "cleanup after failed extraction also failed");
    }
}

/// Owns everything that lives past `extract` returning: the engine process,
/// the write end of the output pipe, and the request (for cleanup).
struct Supervisor {
    child: Child,
    feed: JoinHandle<io::Result<()>>,
    diagnostics: JoinHandle<Option<String>>,
    stdout: Option<ChildStdout>,
    writer: DuplexStream,
    request: ExtractionRequest,
    cancel: CancellationToken,
    timeout: Option<Duration>,
    pid: Option<u32>,
}

enum Waited {
    Exited(std::result::Result<u64, EngineError>),
    Interrupted(EngineError),
}

impl Supervisor {
    async fn run(mut self, tx: oneshot::Sender<Result<()>>) {
        let started = Instant::now();
        let pid = self.pid;
        let timeout = self.timeout;

        let waited = {
            let exited = run_to_exit(
                &mut self.child,
                self.stdout.take(),
                &mut self.writer,
                &mut self.feed,
                &mut self.diagnostics,
            );
            let deadline = async move {
                match timeout {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                outcome = exited => Waited::Exited(outcome),
                _ = self.cancel.cancelled() => Waited::Interrupted(EngineError::Cancelled),
                _ = deadline => Waited::Interrupted(EngineError::TimedOut(timeout.unwrap_or_default())),
            }
        };

        let engine = match waited {
            Waited::Exited(outcome) => outcome,
            Waited::Interrupted(reason) => {
                tracing::warn!(pid, %reason, "stopping extraction engine");
                if let Err(e) = self.child.kill().await {
                    tracing::warn!(pid, error = %e, "failed to kill extraction engine");
                }
                self.feed.abort();
                self.diagnostics.abort();
                Err(reason)
            }
        };

        // Closing the write end is what turns pending reads into end-of-stream.
        let Supervisor { writer, request, .. } = self;
        drop(writer);

        let cleanup = request.run_cleanup();
        let cleanup = cleanup.await;
        let outcome = resolve(engine, cleanup);

        match &outcome {
            Ok(()) => tracing::info!(
                stage = %Stage::Completed,
                pid,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "extraction finished"
            ),
            Err(e) => tracing::warn!(
                stage = %Stage::Completed,
                pid,
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "extraction failed"
            ),
        }

        // The receiver may be gone; nobody is left to tell.
        let _ = tx.send(outcome);
    }
}

/// Pump stdout into the pipe while waiting for exit, then collect the stdin
/// feed and the last stderr line.
async fn run_to_exit(
    child: &mut Child,
    stdout: Option<ChildStdout>,
    writer: &mut DuplexStream,
    feed: &mut JoinHandle<io::Result<()>>,
    diagnostics: &mut JoinHandle<Option<String>>,
) -> std::result::Result<u64, EngineError> {
    let pump = async move {
        match stdout {
            // stdout is dropped when the copy ends, so an engine whose reader
            // went away sees a broken pipe instead of blocking forever.
            Some(mut stdout) => tokio::io::copy(&mut stdout, writer).await,
            None => Ok(0),
        }
    };
    let (copied, status) = tokio::join!(pump, child.wait());

    // The engine no longer reads stdin; a feed still blocked on the source is
    // of no use.
    if !feed.is_finished() {
        feed.abort();
    }
    let fed = match feed.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(io::Error::new(io::ErrorKind::Other, e)),
    };

    let detail = last_stderr_line(diagnostics, STDERR_GRACE).await;

    engine_outcome(status, fed, copied, detail)
}

/// Wait up to `grace` for the stderr drain. A grandchild may keep stderr open
/// after the engine exits; the drain is aborted rather than left behind.
async fn last_stderr_line(
    diagnostics: &mut JoinHandle<Option<String>>,
    grace: Duration,
) -> Option<String> {
    match tokio::time::timeout(grace, &mut *diagnostics).await {
        Ok(joined) => joined.ok().flatten(),
        Err(_) => {
            diagnostics.abort();
            None
        }
    }
}

/// Engine failure precedence: wait error, non-zero exit, stdin feed, stdout pump.
fn engine_outcome(
    status: io::Result<ExitStatus>,
    fed: io::Result<()>,
    copied: io::Result<u64>,
    detail: Option<String>,
) -> std::result::Result<u64, EngineError> {
    let status = status.map_err(EngineError::Wait)?;
    if !status.success() {
        return Err(EngineError::Exit { status, detail });
    }
    fed.map_err(EngineError::Feed)?;
    copied.map_err(EngineError::Output)
}

/// Combine engine and cleanup outcomes. When both failed the engine error is
/// reported and the cleanup error rides along.
fn resolve(
    engine: std::result::Result<u64, EngineError>,
    cleanup: std::result::Result<(), CleanupError>,
) -> Result<()> {
    match (engine, cleanup) {
        (Ok(_), Ok(())) => Ok(()),
        (Err(engine), Ok(())) => Err(ExtractError::Engine(engine)),
        (Ok(_), Err(cleanup)) => Err(ExtractError::Cleanup(cleanup)),
        (Err(engine), Err(cleanup)) => Err(ExtractError::EngineAndCleanup { engine, cleanup }),
    }
}

/// Copy the source into the engine's stdin and close it.
async fn feed_stdin(mut source: SourceReader, stdin: Option<ChildStdin>) -> io::Result<()> {
    let Some(mut stdin) = stdin else {
        return Ok(());
    };

    let result = match tokio::io::copy(&mut source, &mut stdin).await {
        Ok(bytes) => {
            tracing::trace!(bytes, "source fed to engine");
            stdin.shutdown().await
        }
        Err(e) => Err(e),
    };
    drop(stdin);

    match result {
        // The engine stopped reading early; its exit status tells the story.
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

/// Forward engine stderr to the log, keeping the last non-empty line.
async fn drain_stderr(stderr: Option<ChildStderr>, pid: Option<u32>) -> Option<String> {
    let stderr = stderr?;
    let mut lines = BufReader::new(stderr).lines();
    let mut last = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        tracing::debug!(pid, "engine: {}", line);
        last = Some(line.to_string());
    }
    last
}
