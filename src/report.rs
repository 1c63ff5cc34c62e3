//! The report manager: the single worker that owns the group tree and
//! projects it onto `test-run.md` and the per-group `reports/` tree.
//!
//! All tree mutation happens here, driven by events the orchestrator feeds
//! in from the IPC tailer and the native-output parsers. Nothing else is
//! allowed to touch [`crate::group::Tree`] directly.

pub mod markdown;

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::group::Tree;
use crate::ipc::Event;
use crate::run::{Run, RunStatus};

const TEST_RUN_DEBOUNCE: Duration = Duration::from_millis(100);
const GROUP_OUTPUT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

type ReportResult<T> = Result<T, ReportError>;

/// Full path of the leaf a `testCase` event terminates, if `event` is one
/// and its status is terminal (not `RUNNING`).
fn terminal_case_path(event: &Event) -> Option<Vec<String>> {
    match event {
        Event::TestCase { test_name, parent_names, status, .. }
            if !matches!(status, crate::ipc::CaseStatus::Running) =>
        {
            let mut path = parent_names.clone();
            path.push(test_name.clone());
            Some(path)
        }
        _ => None,
    }
}

struct GroupFile {
    file: File,
    finalised: bool,
}

/// Owns the group tree, the open per-group report files, and the debounce
/// state for `test-run.md`. Constructed once per run; every event the
/// orchestrator observes is fed through [`ReportManager::handle_event`].
pub struct ReportManager {
    run: Run,
    tree: Tree,
    group_files: HashMap<Vec<String>, GroupFile>,
    last_test_run_flush: Option<Instant>,
    output_buffers: HashMap<Vec<String>, (String, Instant)>,
}

impl ReportManager {
    pub fn new(run: Run) -> Self {
        Self {
            run,
            tree: Tree::new(),
            group_files: HashMap::new(),
            last_test_run_flush: None,
            output_buffers: HashMap::new(),
        }
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    /// Applies one decoded event to the tree, mirrors any attributable
    /// output into the group's report file, and flushes `test-run.md` if
    /// its debounce window has elapsed.
    pub fn handle_event(&mut self, event: Event, now: DateTime<Utc>) -> ReportResult<()> {
        self.mirror_output(&event)?;
        let case_path = terminal_case_path(&event);
        self.tree.apply(event, now);
        if let Some(path) = case_path {
            self.record_case_line(&path)?;
        }
        self.sync_group_files()?;
        self.maybe_flush_test_run_md(false)?;
        Ok(())
    }

    /// Appends the one-line test-result entry for a leaf that just
    /// terminated into its parent group's `index.md`.
    fn record_case_line(&mut self, path: &[String]) -> ReportResult<()> {
        let parent = path[..path.len() - 1].to_vec();
        self.ensure_group_file(&parent)?;
        let Some(case) = self.tree.get(path).cloned() else { return Ok(()) };
        if let Some(entry) = self.group_files.get_mut(&parent) {
            entry
                .file
                .write_all(markdown::case_line(&case).as_bytes())
                .map_err(|source| ReportError::Write {
                    path: self.run.paths.reports_dir().join(parent.join("/")),
                    source,
                })?;
        }
        Ok(())
    }

    /// Buffers a stdout/stderr chunk against its group rather than writing it
    /// straight through, and flushes the buffer once `GROUP_OUTPUT_DEBOUNCE`
    /// has elapsed since the last flush — output from a chatty test arrives
    /// one small chunk per line, and a write syscall per line would otherwise
    /// dominate this task's time under a large suite.
    fn mirror_output(&mut self, event: &Event) -> ReportResult<()> {
        let (path, chunk) = match event {
            Event::GroupStdout { group_name, parent_names, chunk }
            | Event::GroupStderr { group_name, parent_names, chunk } => {
                let mut path = parent_names.clone();
                path.push(group_name.clone());
                (path, chunk.clone())
            }
            Event::StdoutChunk { file_path, chunk } | Event::StderrChunk { file_path, chunk } => {
                (vec![file_path.clone()], chunk.clone())
            }
            _ => return Ok(()),
        };

        let now = Instant::now();
        let due = {
            let buffered = self
                .output_buffers
                .entry(path.clone())
                .or_insert_with(|| (String::new(), now));
            buffered.0.push_str(&chunk);
            now.duration_since(buffered.1) >= GROUP_OUTPUT_DEBOUNCE
        };
        if due {
            self.flush_output_buffer(&path)?;
        }
        Ok(())
    }

    /// Writes out and clears one group's buffered output, if any. A no-op
    /// for a group with nothing buffered (e.g. one that never produced
    /// stdout/stderr).
    fn flush_output_buffer(&mut self, path: &[String]) -> ReportResult<()> {
        let Some(pending) = self.output_buffers.get(path).map(|(buf, _)| buf.clone()) else {
            return Ok(());
        };
        if pending.is_empty() {
            return Ok(());
        }
        self.ensure_group_file(path)?;
        if let Some(entry) = self.group_files.get_mut(path) {
            entry.file.write_all(pending.as_bytes()).map_err(|source| ReportError::Write {
                path: self.run.paths.reports_dir().join(path.join("/")),
                source,
            })?;
        }
        if let Some(buffered) = self.output_buffers.get_mut(path) {
            buffered.0.clear();
            buffered.1 = Instant::now();
        }
        Ok(())
    }

    /// Flushes every group's buffered output, regardless of debounce window.
    /// Called once a group reaches a terminal status and once at run
    /// finalization, so no buffered line is ever lost to a debounce window
    /// that never elapses again.
    fn flush_all_output_buffers(&mut self) -> ReportResult<()> {
        let paths: Vec<Vec<String>> = self.output_buffers.keys().cloned().collect();
        for path in paths {
            self.flush_output_buffer(&path)?;
        }
        Ok(())
    }

    fn ensure_group_file(&mut self, path: &[String]) -> ReportResult<()> {
        if self.group_files.contains_key(path) {
            return Ok(());
        }
        let sanitised = self.tree.sanitized_path(path);
        let dir = sanitised
            .iter()
            .fold(self.run.paths.reports_dir(), |acc, seg| acc.join(seg));
        std::fs::create_dir_all(&dir).map_err(|source| ReportError::Write { path: dir.clone(), source })?;

        let file_path = dir.join("index.md");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file_path)
            .map_err(|source| ReportError::Write { path: file_path.clone(), source })?;

        let parent_path = &path[..path.len() - 1];
        file.write_all(markdown::group_frontmatter(path, parent_path).as_bytes())
            .map_err(|source| ReportError::Write { path: file_path.clone(), source })?;

        self.group_files.insert(path.to_vec(), GroupFile { file, finalised: false });
        Ok(())
    }

    /// Writes the trailing "## Result" block for any group that reached a
    /// terminal status since the last check, and closes its handle.
    fn sync_group_files(&mut self) -> ReportResult<()> {
        let terminal_paths: Vec<Vec<String>> = self
            .tree
            .all_groups()
            .filter(|g| !g.is_leaf && g.status.is_terminal())
            .map(|g| g.path.clone())
            .collect();

        for path in terminal_paths {
            if self.group_files.get(&path).is_some_and(|f| f.finalised) {
                continue;
            }
            self.flush_output_buffer(&path)?;
            self.ensure_group_file(&path)?;
            let group = self.tree.get(&path).expect("just ensured").clone();
            if let Some(entry) = self.group_files.get_mut(&path) {
                entry
                    .file
                    .write_all(markdown::group_result_block(&group).as_bytes())
                    .map_err(|source| ReportError::Write {
                        path: self.run.paths.reports_dir().join(path.join("/")),
                        source,
                    })?;
                entry.finalised = true;
            }
        }
        Ok(())
    }

    fn maybe_flush_test_run_md(&mut self, force: bool) -> ReportResult<()> {
        let due = force
            || self
                .last_test_run_flush
                .is_none_or(|t| t.elapsed() >= TEST_RUN_DEBOUNCE);
        if !due {
            return Ok(());
        }
        self.write_test_run_md()?;
        self.last_test_run_flush = Some(Instant::now());
        Ok(())
    }

    /// Write-to-tempfile-then-rename, so a reader never observes a
    /// partially written `test-run.md`.
    fn write_test_run_md(&self) -> ReportResult<()> {
        let contents = markdown::render_test_run_md(&self.run, &self.tree);
        let target = self.run.paths.test_run_md();
        let dir = target.parent().unwrap_or_else(|| std::path::Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| ReportError::Write {
            path: target.clone(),
            source,
        })?;
        tmp.write_all(contents.as_bytes()).map_err(|source| ReportError::Write {
            path: target.clone(),
            source,
        })?;
        tmp.persist(&target).map_err(|e| ReportError::Write {
            path: target.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Finalises the tree, writes a final `test-run.md`, and closes every
    /// open group file. Called once, after the child has exited and the IPC
    /// tailer has finished draining.
    pub fn finalize(&mut self, status: RunStatus, exit_code: i32, end_time: DateTime<Utc>, top_level_error: Option<String>) -> ReportResult<()> {
        self.tree.finalize_unterminated();
        self.flush_all_output_buffers()?;
        self.sync_group_files()?;
        self.run.finish(status, exit_code, end_time);
        self.run.top_level_error = top_level_error;
        self.maybe_flush_test_run_md(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{CaseStatus, Totals};
    use crate::run::{Run, RunPaths};
    use tempfile::TempDir;

    fn new_run(base: &std::path::Path) -> Run {
        Run::new(base, "20260305T000000Z-calm-otter".into(), vec!["jest".into()], "jest".into(), Utc::now())
    }

    #[test]
    fn handling_a_test_case_creates_the_group_file_chain() {
        let dir = TempDir::new().unwrap();
        let run = new_run(dir.path());
        run.paths.create_dirs().unwrap();
        let mut manager = ReportManager::new(run);

        manager
            .handle_event(
                Event::TestCase {
                    test_name: "adds".into(),
                    parent_names: vec!["math.test.js".into()],
                    status: CaseStatus::Pass,
                    duration: Some(0.01),
                    error: None,
                },
                Utc::now(),
            )
            .unwrap();

        let index = manager.run.paths.reports_dir().join("math.test.js").join("index.md");
        assert!(index.exists());
    }

    #[test]
    fn finalize_writes_test_run_md_with_final_status() {
        let dir = TempDir::new().unwrap();
        let run = new_run(dir.path());
        run.paths.create_dirs().unwrap();
        let mut manager = ReportManager::new(run);

        manager
            .handle_event(
                Event::TestGroupResult {
                    group_name: "math.test.js".into(),
                    parent_names: vec![],
                    status: crate::ipc::GroupResultStatus::Pass,
                    duration: Some(1.0),
                    totals: Totals { total: 1, passed: 1, ..Default::default() },
                },
                Utc::now(),
            )
            .unwrap();

        manager.finalize(RunStatus::Completed, 0, Utc::now(), None).unwrap();

        let contents = std::fs::read_to_string(manager.run.paths.test_run_md()).unwrap();
        assert!(contents.contains("status: COMPLETED"));
        assert!(contents.contains("exit_code: 0"));
    }

    #[test]
    fn group_output_is_buffered_until_the_debounce_window_or_finalization() {
        let dir = TempDir::new().unwrap();
        let run = new_run(dir.path());
        run.paths.create_dirs().unwrap();
        let mut manager = ReportManager::new(run);

        manager
            .handle_event(
                Event::StdoutChunk { file_path: "math.test.js".into(), chunk: "line one\n".into() },
                Utc::now(),
            )
            .unwrap();

        let index = manager.run.paths.reports_dir().join("math.test.js").join("index.md");
        assert!(!index.exists(), "first chunk should still be buffered, not flushed to a file yet");

        manager.finalize(RunStatus::Completed, 0, Utc::now(), None).unwrap();
        let contents = std::fs::read_to_string(&index).unwrap();
        assert!(contents.contains("line one"), "finalize must flush any buffered output");
    }
}
