//! pytest detection and command rewriting.

use std::path::Path;

pub fn matches_explicit(argv: &[String]) -> bool {
    if super::explicit_binary(argv, "pytest") {
        return true;
    }
    // `python -m pytest`, possibly via `python3`/`py`.
    matches!(argv.first().map(String::as_str), Some("python") | Some("python3") | Some("py"))
        && argv.get(1).map(String::as_str) == Some("-m")
        && argv.get(2).map(String::as_str) == Some("pytest")
}

/// `-p <adapterModuleName>` loads our plugin by its importable module name
/// (the file stem, since `PYTHONPATH` points at the directory containing
/// it); the directory is added to `PYTHONPATH` via [`extra_env`], not argv.
pub fn build_command(argv: &[String]) -> Vec<String> {
    let mut out = argv.to_vec();
    out.push("-p".to_string());
    out.push("pytest_adapter".to_string());
    out
}

pub fn extra_env(adapter_dir: &Path) -> Vec<(String, String)> {
    let existing = std::env::var("PYTHONPATH").unwrap_or_default();
    let value = if existing.is_empty() {
        adapter_dir.display().to_string()
    } else {
        format!("{}:{}", adapter_dir.display(), existing)
    };
    vec![("PYTHONPATH".to_string(), value)]
}
