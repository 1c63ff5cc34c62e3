//! `cargo test`/`cargo nextest` detection. Neither hosts an in-process
//! adapter; the parent parses the child's libtest text output (see
//! [`crate::parser::cargo_test`]).

use super::ExitOutcome;

pub fn matches_explicit(argv: &[String]) -> bool {
    argv.first().map(String::as_str) == Some("cargo")
        && argv.get(1).map(String::as_str) == Some("test")
}

pub fn matches_nextest_explicit(argv: &[String]) -> bool {
    argv.first().map(String::as_str) == Some("cargo")
        && argv.get(1).map(String::as_str) == Some("nextest")
}

/// `cargo test`/`cargo nextest` are never rewritten: libtest's JSON output
/// format is nightly-only (`-Z unstable-options`), which would hard-fail the
/// child process on the stable toolchain most projects build with, and
/// [`crate::parser::cargo_test::CargoTestParser`] only understands the
/// default libtest text format anyway. The wrapped command runs exactly as
/// the caller typed it; `3pio` parses whatever libtest text it prints.
pub fn build_command(argv: &[String]) -> Vec<String> {
    argv.to_vec()
}

pub fn interpret_exit_code(code: i32) -> ExitOutcome {
    match code {
        0 => ExitOutcome::Success,
        101 => ExitOutcome::TestFailure,
        _ => ExitOutcome::RunnerError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinguishes_test_from_nextest() {
        let test = vec!["cargo".to_string(), "test".to_string()];
        let nextest = vec!["cargo".to_string(), "nextest".to_string(), "run".to_string()];
        assert!(matches_explicit(&test));
        assert!(!matches_nextest_explicit(&test));
        assert!(matches_nextest_explicit(&nextest));
        assert!(!matches_explicit(&nextest));
    }

    #[test]
    fn build_command_is_a_passthrough() {
        let argv = vec!["cargo".to_string(), "test".to_string()];
        assert_eq!(build_command(&argv), argv);
    }

    #[test]
    fn existing_separator_is_left_untouched() {
        let argv = vec!["cargo".to_string(), "test".to_string(), "--".to_string(), "--nocapture".to_string()];
        assert_eq!(build_command(&argv), argv);
    }
}
