//! Embedded language adapters and their extraction into a run directory.
//!
//! The adapter scripts (a Jest reporter, a Vitest reporter, a Mocha/Cypress
//! reporter, a pytest plugin) are embedded into the `3pio` binary at compile
//! time and extracted fresh into `<runDir>/adapters/` on every run, with the
//! IPC path and log level baked into each file via template-marker
//! substitution. Unlike a shared script cache keyed by content hash, two runs
//! must never share an extracted adapter: each run's adapter points at that
//! run's own `ipc.jsonl`.

use std::fs;
use std::path::Path;

use include_dir::{Dir, include_dir};
use thiserror::Error;

use crate::runner::RunnerKind;

static ADAPTERS_DIR: Dir = include_dir!("$CARGO_MANIFEST_DIR/adapters");

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter '{0}' is not bundled")]
    NotFound(&'static str),
    #[error("failed to write adapter '{name}' to {path}: {source}")]
    Write {
        name: &'static str,
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Identifies one embedded adapter file and how to materialise it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    Jest,
    Vitest,
    MochaCypress,
    Pytest,
}

impl Adapter {
    /// The adapter the given runner loads, or `None` for parser-based
    /// runners with no in-process adapter (Go, Cargo).
    pub fn for_runner(kind: RunnerKind) -> Option<Self> {
        match kind {
            RunnerKind::Jest => Some(Adapter::Jest),
            RunnerKind::Vitest => Some(Adapter::Vitest),
            RunnerKind::Mocha | RunnerKind::Cypress => Some(Adapter::MochaCypress),
            RunnerKind::Pytest => Some(Adapter::Pytest),
            RunnerKind::GoTest | RunnerKind::CargoTest | RunnerKind::CargoNextest => None,
        }
    }

    fn source_name(self) -> &'static str {
        match self {
            Adapter::Jest => "jest.js",
            Adapter::Vitest => "vitest.js",
            Adapter::MochaCypress => "mocha.js",
            Adapter::Pytest => "pytest_adapter.py",
        }
    }

    /// File name written under `<runDir>/adapters/`.
    pub fn target_name(self) -> &'static str {
        self.source_name()
    }

    /// `(ipc_marker, level_marker, quote_char, spaced)` for this adapter's
    /// host language. JS adapters wrap the placeholder in single quotes with
    /// surrounding spaces; the pytest adapter uses double quotes, no spaces.
    fn markers(self) -> (&'static str, &'static str, char, bool) {
        match self {
            Adapter::Pytest => ("#__IPC_PATH__#", "#__LOG_LEVEL__#", '"', false),
            _ => ("/*__IPC_PATH__*/", "/*__LOG_LEVEL__*/", '\'', true),
        }
    }
}

/// Substitutes the `__IPC_PATH__`/`__LOG_LEVEL__` template markers in `source`
/// with `ipc_path` and `log_level`, each re-encoded as a quoted string literal
/// in the adapter's host language.
fn substitute(
    source: &str,
    ipc_marker: &str,
    level_marker: &str,
    quote: char,
    spaced: bool,
    ipc_path: &str,
    log_level: &str,
) -> String {
    let sep = if spaced { " " } else { "" };
    let wrap = |marker: &str, placeholder: &str, value: &str| -> (String, String) {
        (
            format!("{marker}{sep}{quote}{placeholder}{quote}{sep}{marker}"),
            format!("{marker}{sep}{quote}{value}{quote}{sep}{marker}"),
        )
    };

    let (ipc_pattern, ipc_replacement) = wrap(ipc_marker, "placeholder", ipc_path);
    let (level_pattern, level_replacement) = wrap(level_marker, "WARN", log_level);

    source
        .replace(&ipc_pattern, &ipc_replacement)
        .replace(&level_pattern, &level_replacement)
}

/// Writes the one adapter `kind` loads into `dest_dir`, baking in
/// `ipc_path` and `log_level`. `dest_dir` must already exist. `kind` must
/// be a runner with an adapter (i.e. `kind.adapter_file_name()` is
/// `Some`); parser-based runners (Go, Cargo) never call this.
///
/// Only Vitest's adapter gets a `package.json` written next to it (with
/// `"type":"module"`, so its `import`/`export` syntax resolves regardless
/// of the wrapped project's own module type) — `jest.js` and `mocha.js`
/// are plain CommonJS, and a shared `"type":"module"` `package.json`
/// sitting next to them would make Node load them as ESM instead, where
/// `require` doesn't exist.
pub fn extract_all(dest_dir: &Path, kind: RunnerKind, ipc_path: &str, log_level: &str) -> AdapterResult<()> {
    let Some(adapter) = Adapter::for_runner(kind) else {
        return Ok(());
    };
    extract_one(adapter, dest_dir, ipc_path, log_level)?;
    if adapter == Adapter::Vitest {
        write_package_json(dest_dir)?;
    }
    Ok(())
}

fn extract_one(adapter: Adapter, dest_dir: &Path, ipc_path: &str, log_level: &str) -> AdapterResult<()> {
    let name = adapter.source_name();
    let file = ADAPTERS_DIR.get_file(name).ok_or(AdapterError::NotFound(name))?;
    let source = file.contents_utf8().ok_or(AdapterError::NotFound(name))?;

    let (ipc_marker, level_marker, quote, spaced) = adapter.markers();
    let materialised = substitute(source, ipc_marker, level_marker, quote, spaced, ipc_path, log_level);

    let target_path = dest_dir.join(adapter.target_name());
    fs::write(&target_path, materialised).map_err(|source| AdapterError::Write {
        name,
        path: target_path.clone(),
        source,
    })?;

    #[cfg(unix)]
    if adapter == Adapter::Pytest {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(meta) = fs::metadata(&target_path) {
            let mut perms = meta.permissions();
            perms.set_mode(0o755);
            let _ = fs::set_permissions(&target_path, perms);
        }
    }

    Ok(())
}

fn write_package_json(dest_dir: &Path) -> AdapterResult<()> {
    let path = dest_dir.join("package.json");
    fs::write(&path, r#"{"type":"module"}"#).map_err(|source| AdapterError::Write {
        name: "package.json",
        path,
        source,
    })
}
