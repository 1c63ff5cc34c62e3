//! Run identity and the on-disk run directory layout.
//!
//! A [`Run`] is a single invocation of `3pio`: a `runID`, the directory that
//! owns every artefact the invocation produces, and the handful of facts
//! (original command, detected runner, timestamps, exit code) rendered into
//! `test-run.md`'s frontmatter.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

const ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "dusty", "eager", "fleet", "gentle", "hazy", "idle", "jolly",
    "keen", "lively", "misty", "nimble", "opal", "proud", "quiet", "rapid", "sunny", "tidy",
];

const NOUNS: &[&str] = &[
    "badger", "comet", "delta", "ember", "falcon", "grove", "heron", "ibis", "jackal", "kite",
    "lynx", "marten", "otter", "pike", "quokka", "raven", "swift", "talon", "urchin", "viper",
];

/// Lifecycle of a [`Run`], mirrored into `test-run.md`'s `status` frontmatter
/// key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Errored,
    Interrupted,
}

/// Generates a `runID` of the form `YYYYMMDDTHHMMSSZ-<memorable-name>`.
pub fn generate_run_id(now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES.choose(&mut rng).unwrap_or(&"swift");
    let noun = NOUNS.choose(&mut rng).unwrap_or(&"otter");
    format!("{}-{}-{}", now.format("%Y%m%dT%H%M%SZ"), adjective, noun)
}

/// Paths that make up one run's durable artefacts under `.3pio/runs/<runID>/`.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
}

impl RunPaths {
    pub fn new(base: &Path, run_id: &str) -> Self {
        Self {
            run_dir: base.join(".3pio").join("runs").join(run_id),
        }
    }

    pub fn test_run_md(&self) -> PathBuf {
        self.run_dir.join("test-run.md")
    }

    pub fn output_log(&self) -> PathBuf {
        self.run_dir.join("output.log")
    }

    pub fn ipc_log(&self) -> PathBuf {
        self.run_dir.join("ipc.jsonl")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.run_dir.join("reports")
    }

    pub fn adapters_dir(&self) -> PathBuf {
        self.run_dir.join("adapters")
    }

    pub fn debug_log(base: &Path) -> PathBuf {
        base.join(".3pio").join("debug.log")
    }

    /// Creates the run directory and its `adapters/` subdirectory. Per the
    /// orchestrator lifecycle, this must not happen until after mode
    /// rejection has already been checked.
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.adapters_dir())?;
        std::fs::create_dir_all(self.reports_dir())?;
        Ok(())
    }
}

/// A single invocation of `3pio`: identity, the command it wraps, and the
/// facts recorded into `test-run.md`'s frontmatter.
#[derive(Debug, Clone)]
pub struct Run {
    pub run_id: String,
    pub paths: RunPaths,
    pub command: Vec<String>,
    pub detected_runner: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub top_level_error: Option<String>,
}

impl Run {
    pub fn new(
        base: &Path,
        run_id: String,
        command: Vec<String>,
        detected_runner: String,
        start_time: DateTime<Utc>,
    ) -> Self {
        let paths = RunPaths::new(base, &run_id);
        Self {
            run_id,
            paths,
            command,
            detected_runner,
            status: RunStatus::Pending,
            start_time,
            end_time: None,
            exit_code: None,
            top_level_error: None,
        }
    }

    pub fn command_display(&self) -> String {
        shell_words::join(&self.command)
    }

    pub fn finish(&mut self, status: RunStatus, exit_code: i32, end_time: DateTime<Utc>) {
        self.status = status;
        self.exit_code = Some(exit_code);
        self.end_time = Some(end_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_expected_shape() {
        let now = DateTime::parse_from_rfc3339("2026-03-05T12:34:56Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = generate_run_id(now);
        let mut parts = id.splitn(2, '-');
        let timestamp = parts.next().unwrap();
        let slug = parts.next().unwrap();

        assert_eq!(timestamp, "20260305T123456Z");
        assert_eq!(slug.split('-').count(), 2);
    }

    #[test]
    fn run_paths_are_rooted_under_dot_3pio() {
        let base = Path::new("/tmp/project");
        let paths = RunPaths::new(base, "20260305T123456Z-calm-otter");
        assert_eq!(
            paths.run_dir,
            PathBuf::from("/tmp/project/.3pio/runs/20260305T123456Z-calm-otter")
        );
        assert_eq!(paths.ipc_log(), paths.run_dir.join("ipc.jsonl"));
    }

    #[test]
    fn command_display_quotes_when_needed() {
        let run = Run::new(
            Path::new("."),
            "id".into(),
            vec!["npx".into(), "jest".into(), "--watch all".into()],
            "jest".into(),
            Utc::now(),
        );
        assert!(run.command_display().contains("npx jest"));
    }
}
