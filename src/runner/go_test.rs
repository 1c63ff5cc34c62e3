//! `go test` detection and command rewriting. No in-process adapter exists
//! for Go, so the parent parses `-json` output itself (see
//! [`crate::parser::go_test`]).

use super::ExitOutcome;

pub fn matches_explicit(argv: &[String]) -> bool {
    argv.first().map(String::as_str) == Some("go") && argv.get(1).map(String::as_str) == Some("test")
}

/// Ensures `-json` is present so output is machine-readable; does not
/// disturb any other flag or the package pattern's position.
pub fn build_command(argv: &[String]) -> Vec<String> {
    if argv.iter().any(|a| a == "-json") {
        return argv.to_vec();
    }
    let mut out = argv.to_vec();
    out.insert(2.min(out.len()), "-json".to_string());
    out
}

/// `go test` exits 1 on any test failure and uses other non-zero codes for
/// build/setup errors (e.g. 2 for a usage error); the parser distinguishes
/// "no tests ran, compile failed" from "tests ran, some failed" using the
/// package-level totals, so here we only need the coarse split.
pub fn interpret_exit_code(code: i32) -> ExitOutcome {
    match code {
        0 => ExitOutcome::Success,
        1 => ExitOutcome::TestFailure,
        _ => ExitOutcome::RunnerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_go_test() {
        assert!(matches_explicit(&["go".to_string(), "test".to_string(), "./...".to_string()]));
        assert!(!matches_explicit(&["go".to_string(), "build".to_string()]));
    }

    #[test]
    fn build_command_adds_json_flag_once() {
        let argv = vec!["go".to_string(), "test".to_string(), "./...".to_string()];
        let out = build_command(&argv);
        assert_eq!(out.iter().filter(|a| *a == "-json").count(), 1);

        let already = build_command(&out);
        assert_eq!(already, out);
    }
}
