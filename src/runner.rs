//! Test runner detection and command construction.
//!
//! A registry of runner definitions, each exposing detection, mode
//! rejection, and command-rewriting rules (§4.1). Detection and rewriting
//! are pure functions of argv (plus an optional `package.json`); nothing
//! here touches the filesystem beyond reading that one file, and nothing
//! is memoised, so the same inputs always produce the same decision.

pub mod cargo_test;
pub mod go_test;
pub mod jest;
pub mod mocha;
pub mod pytest;
pub mod vitest;

use std::path::Path;

use serde_json::Value;

/// A runner this build knows how to wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerKind {
    Jest,
    Vitest,
    Mocha,
    Cypress,
    Pytest,
    GoTest,
    CargoTest,
    CargoNextest,
}

impl RunnerKind {
    /// The `detected_runner` value written into report frontmatter.
    pub fn label(self) -> &'static str {
        match self {
            RunnerKind::Jest => "jest",
            RunnerKind::Vitest => "vitest",
            RunnerKind::Mocha => "mocha",
            RunnerKind::Cypress => "cypress",
            RunnerKind::Pytest => "pytest",
            RunnerKind::GoTest => "go test",
            RunnerKind::CargoTest => "cargo test",
            RunnerKind::CargoNextest => "cargo nextest",
        }
    }

    /// The embedded adapter filename this runner is rewritten to load, or
    /// `None` for parser-based runners with no in-process adapter.
    pub fn adapter_file_name(self) -> Option<&'static str> {
        match self {
            RunnerKind::Jest => Some("jest.js"),
            RunnerKind::Vitest => Some("vitest.js"),
            RunnerKind::Mocha | RunnerKind::Cypress => Some("mocha.js"),
            RunnerKind::Pytest => Some("pytest_adapter.py"),
            RunnerKind::GoTest | RunnerKind::CargoTest | RunnerKind::CargoNextest => None,
        }
    }

    pub fn stream_format(self) -> Option<StreamFormat> {
        match self {
            RunnerKind::GoTest => Some(StreamFormat::GoTestJson),
            RunnerKind::CargoTest | RunnerKind::CargoNextest => Some(StreamFormat::CargoLibtest),
            _ => None,
        }
    }

    pub fn emits_native_stream(self) -> bool {
        self.stream_format().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    GoTestJson,
    CargoLibtest,
}

/// How a child's exit code maps onto `3pio`'s own exit code (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    TestFailure,
    SetupFailure,
    RunnerError,
}

impl ExitOutcome {
    pub fn exit_code(self, child_code: i32) -> i32 {
        match self {
            ExitOutcome::Success => 0,
            _ => child_code,
        }
    }
}

/// A mode this wrapper refuses to run, and why (§4.1 "Mode rejection").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeRejection {
    pub message: String,
}

impl ModeRejection {
    fn watch(alternative: Option<&str>) -> Self {
        let mut message = "watch mode is not supported by 3pio".to_string();
        if let Some(alt) = alternative {
            message.push_str(&format!(" (use `{alt}` to run once)"));
        }
        Self { message }
    }

    fn coverage() -> Self {
        Self {
            message: "coverage mode is not supported by 3pio".to_string(),
        }
    }
}

const WATCH_TOKENS: &[&str] = &["--watch", "--watchAll", "pytest-watch", "ptw"];
const COVERAGE_TOKENS: &[&str] = &[
    "--coverage",
    "--collectCoverage",
    "--cov",
    "--cov-report",
    "nyc",
    "c8",
    "tarpaulin",
    "llvm-cov",
];

/// Checks argv for a watch/coverage mode this wrapper must reject before
/// creating a run directory. Bare `vitest` (no subcommand) defaults to
/// watch mode and is rejected the same way.
pub fn check_mode(argv: &[String], kind: RunnerKind) -> Option<ModeRejection> {
    if kind == RunnerKind::Vitest && argv.len() == 1 {
        return Some(ModeRejection::watch(Some("vitest run")));
    }

    for token in argv {
        if WATCH_TOKENS.iter().any(|w| token == w) {
            let alt = match kind {
                RunnerKind::Vitest => Some("vitest run"),
                RunnerKind::Pytest => None,
                _ => None,
            };
            return Some(ModeRejection::watch(alt));
        }
        if COVERAGE_TOKENS.iter().any(|c| token.contains(c)) {
            return Some(ModeRejection::coverage());
        }
    }
    None
}

/// Minimal view of `package.json` needed for ambiguous-command resolution.
#[derive(Debug, Default)]
pub struct PackageJson {
    pub test_script: Option<String>,
    pub dependency_names: Vec<String>,
    pub is_esm: bool,
}

impl PackageJson {
    pub fn read(project_dir: &Path) -> Option<Self> {
        let raw = std::fs::read_to_string(project_dir.join("package.json")).ok()?;
        let value: Value = serde_json::from_str(&raw).ok()?;
        let test_script = value
            .get("scripts")
            .and_then(|s| s.get("test"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let mut dependency_names = Vec::new();
        for key in ["dependencies", "devDependencies"] {
            if let Some(deps) = value.get(key).and_then(|v| v.as_object()) {
                dependency_names.extend(deps.keys().cloned());
            }
        }
        let is_esm = value.get("type").and_then(|v| v.as_str()) == Some("module");
        Some(Self { test_script, dependency_names, is_esm })
    }
}

const PACKAGE_MANAGER_PREFIXES: &[&str] = &["npx", "yarn", "pnpm", "bun", "bunx"];

/// True if `argv` names `binary` directly, or via a package-manager runner
/// prefix (`npx jest`, `yarn jest`, ...), as its first or second token.
pub(crate) fn explicit_binary(argv: &[String], binary: &str) -> bool {
    match argv.first().map(String::as_str) {
        Some(first) if first == binary => true,
        Some(first) if PACKAGE_MANAGER_PREFIXES.contains(&first) => {
            argv.get(1).map(String::as_str) == Some(binary)
        }
        _ => false,
    }
}

const GENERIC_TEST_COMMANDS: &[&[&str]] = &[
    &["npm", "test"],
    &["npm", "run", "test"],
    &["npm", "run", "start"],
    &["yarn", "test"],
    &["pnpm", "test"],
    &["bun", "test"],
];

fn is_generic_package_manager_command(argv: &[String]) -> bool {
    GENERIC_TEST_COMMANDS.iter().any(|pattern| {
        argv.len() >= pattern.len() && argv.iter().zip(pattern.iter()).all(|(a, b)| a == b)
    })
}

/// Runner detection, applying the four-rule precedence in §4.1 in order.
pub fn detect(argv: &[String], package_json: Option<&PackageJson>) -> Option<RunnerKind> {
    // Rule 1/2: explicit runner binaries. Evaluated in a fixed order so a
    // single argv can only ever match one runner.
    if jest::matches_explicit(argv) {
        return Some(RunnerKind::Jest);
    }
    if vitest::matches_explicit(argv) {
        return Some(RunnerKind::Vitest);
    }
    if mocha::matches_cypress_explicit(argv) {
        return Some(RunnerKind::Cypress);
    }
    if mocha::matches_explicit(argv) {
        return Some(RunnerKind::Mocha);
    }
    if pytest::matches_explicit(argv) {
        return Some(RunnerKind::Pytest);
    }
    if go_test::matches_explicit(argv) {
        return Some(RunnerKind::GoTest);
    }
    if cargo_test::matches_nextest_explicit(argv) {
        return Some(RunnerKind::CargoNextest);
    }
    if cargo_test::matches_explicit(argv) {
        return Some(RunnerKind::CargoTest);
    }

    // Rule 3: generic package-manager command, resolved via package.json.
    if is_generic_package_manager_command(argv) {
        return resolve_ambiguous(package_json);
    }

    // Rule 4.
    None
}

fn resolve_ambiguous(package_json: Option<&PackageJson>) -> Option<RunnerKind> {
    let pkg = package_json?;
    if let Some(script) = &pkg.test_script {
        for (token, kind) in [
            ("jest", RunnerKind::Jest),
            ("vitest", RunnerKind::Vitest),
            ("cypress", RunnerKind::Cypress),
            ("mocha", RunnerKind::Mocha),
        ] {
            if script.contains(token) {
                return Some(kind);
            }
        }
    }
    for (dep, kind) in [
        ("jest", RunnerKind::Jest),
        ("vitest", RunnerKind::Vitest),
        ("cypress", RunnerKind::Cypress),
        ("mocha", RunnerKind::Mocha),
    ] {
        if pkg.dependency_names.iter().any(|d| d == dep) {
            return Some(kind);
        }
    }
    None
}

/// Rewrites `argv` per the runner's command contract, returning the final
/// argv to spawn. `adapter_path`, when present, is absolute.
pub fn build_command(
    kind: RunnerKind,
    argv: &[String],
    adapter_path: Option<&Path>,
    is_esm: bool,
) -> Vec<String> {
    match kind {
        RunnerKind::Jest => jest::build_command(argv, adapter_path.expect("jest needs an adapter"), is_esm),
        RunnerKind::Vitest => vitest::build_command(argv, adapter_path.expect("vitest needs an adapter")),
        RunnerKind::Mocha => mocha::build_command(argv, adapter_path.expect("mocha needs an adapter")),
        RunnerKind::Cypress => mocha::build_cypress_command(argv, adapter_path.expect("cypress needs an adapter")),
        RunnerKind::Pytest => pytest::build_command(argv),
        RunnerKind::GoTest => go_test::build_command(argv),
        RunnerKind::CargoTest | RunnerKind::CargoNextest => cargo_test::build_command(argv),
    }
}

/// Extra environment variables the child needs beyond `THREEPIO_IPC_PATH`,
/// which the orchestrator always sets.
pub fn extra_env(kind: RunnerKind, adapter_dir: &Path) -> Vec<(String, String)> {
    match kind {
        RunnerKind::Pytest => pytest::extra_env(adapter_dir),
        _ => Vec::new(),
    }
}

pub fn interpret_exit_code(kind: RunnerKind, code: i32) -> ExitOutcome {
    match kind {
        RunnerKind::GoTest => go_test::interpret_exit_code(code),
        RunnerKind::CargoTest | RunnerKind::CargoNextest => cargo_test::interpret_exit_code(code),
        _ => match code {
            0 => ExitOutcome::Success,
            1 => ExitOutcome::TestFailure,
            _ => ExitOutcome::RunnerError,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_jest_wins_over_generic_script() {
        let argv = vec!["npx".into(), "jest".into(), "--ci".into()];
        assert_eq!(detect(&argv, None), Some(RunnerKind::Jest));
    }

    #[test]
    fn bare_vitest_is_rejected_as_watch_mode() {
        let argv = vec!["vitest".to_string()];
        let rejection = check_mode(&argv, RunnerKind::Vitest);
        assert!(rejection.is_some());
        assert!(rejection.unwrap().message.contains("watch"));
    }

    #[test]
    fn coverage_flag_is_rejected() {
        let argv = vec!["jest".into(), "--coverage".into()];
        let rejection = check_mode(&argv, RunnerKind::Jest);
        assert!(rejection.unwrap().message.contains("coverage"));
    }

    #[test]
    fn generic_npm_test_resolves_via_package_json_script() {
        let argv = vec!["npm".into(), "test".into()];
        let pkg = PackageJson {
            test_script: Some("jest --ci".into()),
            dependency_names: vec![],
            is_esm: false,
        };
        assert_eq!(detect(&argv, Some(&pkg)), Some(RunnerKind::Jest));
    }

    #[test]
    fn go_test_binary_is_detected() {
        let argv = vec!["go".into(), "test".into(), "./...".into()];
        assert_eq!(detect(&argv, None), Some(RunnerKind::GoTest));
    }

    #[test]
    fn cargo_nextest_takes_precedence_over_cargo_test() {
        let argv = vec!["cargo".into(), "nextest".into(), "run".into()];
        assert_eq!(detect(&argv, None), Some(RunnerKind::CargoNextest));
    }
}
