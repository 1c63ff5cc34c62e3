//! Event schema and IPC transport.
//!
//! `ipc.jsonl` is the single coordination plane between the orchestrator, the
//! embedded in-process adapters (running inside the wrapped test runner), and
//! this crate's own native-output parsers (for runners that cannot host an
//! adapter). Every participant speaks the same line-delimited JSON protocol:
//! one `{"eventType": ..., "payload": ...}` object per line, appended with
//! `O_APPEND` semantics so concurrent writers never interleave within a line.
//!
//! This module owns the wire format ([`Event`]), a synchronous append-only
//! [`IpcWriter`] (used by the native parsers; embedded adapters are external
//! collaborators and write the same format from their own host language),
//! and an async [`IpcTailer`] that watches the log for new lines and decodes
//! them into [`Event`]s for the group model's event loop.

use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors surfaced by the IPC layer.
///
/// Per the error-handling taxonomy, a write failure here is an
/// `AdapterTransportError`/`ReportWriteError`: callers log and continue
/// rather than aborting the run.
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("failed to open ipc log at {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write ipc event: {0}")]
    Write(#[source] std::io::Error),
    #[error("failed to watch ipc log at {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

pub type IpcResult<T> = Result<T, IpcError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    Pass,
    Fail,
    Skip,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroupResultStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    SetupFailure,
    Assertion,
    Panic,
    Compilation,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    #[serde(default)]
    pub setup_failed: bool,
}

impl Totals {
    pub fn add(&mut self, other: Totals) {
        self.total += other.total;
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.setup_failed = self.setup_failed || other.setup_failed;
    }
}

/// One line of `ipc.jsonl`. Unknown `eventType` values deserialize into
/// [`Event::Unknown`] rather than failing, per the forward-compatibility
/// requirement in the wire-format contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "payload", rename_all = "camelCase")]
pub enum Event {
    CollectionStart {
        #[serde(default)]
        phase: Option<String>,
    },
    CollectionFinish {
        #[serde(default)]
        collected: Option<u32>,
    },
    TestGroupDiscovered {
        group_name: String,
        #[serde(default)]
        parent_names: Vec<String>,
    },
    TestGroupStart {
        group_name: String,
        #[serde(default)]
        parent_names: Vec<String>,
    },
    TestCase {
        test_name: String,
        #[serde(default)]
        parent_names: Vec<String>,
        status: CaseStatus,
        #[serde(default)]
        duration: Option<f64>,
        #[serde(default)]
        error: Option<ErrorInfo>,
    },
    TestGroupResult {
        group_name: String,
        #[serde(default)]
        parent_names: Vec<String>,
        status: GroupResultStatus,
        #[serde(default)]
        duration: Option<f64>,
        #[serde(default)]
        totals: Totals,
    },
    TestGroupError {
        group_name: String,
        #[serde(default)]
        parent_names: Vec<String>,
        error_type: ErrorType,
        error: ErrorInfo,
    },
    GroupStdout {
        group_name: String,
        #[serde(default)]
        parent_names: Vec<String>,
        chunk: String,
    },
    GroupStderr {
        group_name: String,
        #[serde(default)]
        parent_names: Vec<String>,
        chunk: String,
    },
    StdoutChunk {
        file_path: String,
        chunk: String,
    },
    StderrChunk {
        file_path: String,
        chunk: String,
    },
    RunComplete {},
    /// Legacy file-keyed events, still emitted by some third-party adapters.
    /// Normalised to a single-root-segment group path before reaching the
    /// tree (see `group::normalize_legacy`).
    TestFileStart {
        file_path: String,
    },
    TestFileResult {
        file_path: String,
        status: GroupResultStatus,
        #[serde(default)]
        duration: Option<f64>,
        #[serde(default)]
        totals: Totals,
    },
    /// Catch-all for event types this build does not recognise.
    #[serde(other)]
    Unknown,
}

/// Synchronous append-only writer for `ipc.jsonl`.
///
/// Used by this crate's own native-output parsers (`go test -json`, cargo
/// libtest) to translate parsed runner output into the same event stream an
/// embedded adapter would produce, so the report manager has exactly one
/// code path regardless of dispatch mode.
pub struct IpcWriter {
    file: std::fs::File,
}

impl IpcWriter {
    pub fn open(path: &Path) -> IpcResult<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| IpcError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self { file })
    }

    pub fn emit(&mut self, event: &Event) -> IpcResult<()> {
        let mut line = serde_json::to_string(event).expect("Event always serializes");
        line.push('\n');
        self.file.write_all(line.as_bytes()).map_err(IpcError::Write)?;
        self.file.flush().map_err(IpcError::Write)
    }
}

/// Tails `ipc.jsonl`, decoding complete lines into [`Event`]s and forwarding
/// them to the report manager's event loop over a bounded channel.
///
/// Watches the file with a filesystem watcher and falls back to a periodic
/// poll, since watchers are unreliable on some platforms/filesystems (NFS,
/// some container overlay filesystems). Partial final lines are buffered
/// until a terminating newline arrives. Malformed lines are logged and
/// skipped; they never abort the run.
pub struct IpcTailer {
    path: PathBuf,
}

/// Internal notification that new bytes may be available; content-agnostic,
/// the tailer always re-reads from its last known offset.
enum WakeReason {
    FsEvent,
    Poll,
}

impl IpcTailer {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Runs the tail loop until `shutdown` resolves, then performs a final
    /// bounded drain (the IPC tailer's post-exit drain budget, ≈2s idle)
    /// before returning.
    pub async fn run(
        self,
        sender: mpsc::Sender<Event>,
        mut shutdown: tokio::sync::oneshot::Receiver<()>,
    ) {
        let (wake_tx, wake_rx) = std_mpsc::channel::<WakeReason>();
        let wake_rx = std::sync::Mutex::new(wake_rx);

        let watch_path = self.path.clone();
        let watcher_handle = std::thread::spawn(move || {
            use notify::Watcher;
            let tx = wake_tx.clone();
            let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if res.is_ok() {
                    let _ = tx.send(WakeReason::FsEvent);
                }
            }) {
                Ok(w) => w,
                Err(err) => {
                    tracing::debug!("ipc tailer: failed to create watcher: {err}");
                    return;
                }
            };
            if let Some(parent) = watch_path.parent() {
                if let Err(err) = watcher.watch(parent, notify::RecursiveMode::NonRecursive) {
                    tracing::debug!("ipc tailer: failed to watch {}: {err}", parent.display());
                }
            }
            // Keep the watcher alive until the channel's other end is dropped.
            loop {
                std::thread::sleep(Duration::from_secs(3600));
            }
        });
        drop(watcher_handle);

        let mut offset: u64 = 0;
        let mut pending = String::new();

        loop {
            let reason = tokio::select! {
                biased;
                _ = &mut shutdown => break,
                reason = Self::next_wake(&wake_rx) => reason,
            };
            let _ = reason;
            offset = self.drain_new_lines(offset, &mut pending, &sender).await;
        }

        // Bounded post-exit drain: give any last in-flight writes a chance
        // to land before giving up.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            offset = self.drain_new_lines(offset, &mut pending, &sender).await;
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn next_wake(rx: &std::sync::Mutex<std_mpsc::Receiver<WakeReason>>) -> WakeReason {
        loop {
            let result = rx.lock().unwrap().try_recv();
            match result {
                Ok(reason) => return reason,
                Err(std_mpsc::TryRecvError::Empty) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    return WakeReason::Poll;
                }
                Err(std_mpsc::TryRecvError::Disconnected) => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    return WakeReason::Poll;
                }
            }
        }
    }

    /// Reads any bytes appended since `offset`, splits on newlines, decodes
    /// complete lines, and forwards them. Returns the new offset.
    async fn drain_new_lines(
        &self,
        offset: u64,
        pending: &mut String,
        sender: &mpsc::Sender<Event>,
    ) -> u64 {
        let path = self.path.clone();
        let prefix = std::mem::take(pending);
        let (new_offset, lines, leftover) =
            match tokio::task::spawn_blocking(move || read_new_lines(&path, offset, prefix)).await
            {
                Ok(Ok(result)) => result,
                Ok(Err(_)) | Err(_) => return offset,
            };
        *pending = leftover;

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(&line) {
                Ok(event) => {
                    if sender.send(event).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!("ipc: skipping malformed line: {err}");
                }
            }
        }

        new_offset
    }
}

fn read_new_lines(
    path: &Path,
    offset: u64,
    prefix: String,
) -> std::io::Result<(u64, Vec<String>, String)> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    if len < offset {
        // File was truncated/rotated; restart from the beginning.
        return read_new_lines(path, 0, String::new());
    }
    if len == offset {
        return Ok((offset, Vec::new(), prefix));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut reader = BufReader::new(file);
    let mut buf = prefix;
    let mut remainder = Vec::new();
    {
        use std::io::Read;
        reader.read_to_end(&mut remainder)?;
    }
    buf.push_str(&String::from_utf8_lossy(&remainder));

    let mut lines = Vec::new();
    let mut consumed = 0usize;
    let mut last_newline_end = 0usize;
    for (idx, ch) in buf.char_indices() {
        if ch == '\n' {
            lines.push(buf[consumed..idx].to_string());
            consumed = idx + 1;
            last_newline_end = consumed;
        }
    }
    let leftover = buf[last_newline_end..].to_string();

    Ok((len, lines, leftover))
}
