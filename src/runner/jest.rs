//! Jest detection and command rewriting.

use std::path::Path;

/// True if `argv` explicitly names the `jest` binary, directly or through a
/// package-manager runner (`npx jest`, `yarn jest`, `pnpm jest`, `bun jest`).
pub fn matches_explicit(argv: &[String]) -> bool {
    super::explicit_binary(argv, "jest")
}

/// Inserts `--reporters <adapterAbsPath>`, replacing Jest's default reporter
/// so the wrapped run doesn't print its own summary alongside ours. `jest.js`
/// is plain CommonJS regardless of the wrapped project's own module type, so
/// `is_esm` doesn't change anything about the path Jest is pointed at — it's
/// only a parameter here to keep this signature uniform with the other
/// runners that do need it.
pub fn build_command(argv: &[String], adapter_path: &Path, _is_esm: bool) -> Vec<String> {
    let mut out = argv.to_vec();
    out.push("--reporters".to_string());
    out.push(adapter_path.display().to_string());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_npx_jest() {
        let argv = vec!["npx".into(), "jest".into(), "--ci".into()];
        assert!(matches_explicit(&argv));
    }

    #[test]
    fn does_not_match_vitest() {
        let argv = vec!["vitest".to_string()];
        assert!(!matches_explicit(&argv));
    }

    #[test]
    fn build_command_appends_reporters_flag() {
        let argv = vec!["jest".to_string()];
        let out = build_command(&argv, Path::new("/run/adapters/jest.js"), false);
        assert_eq!(out, vec!["jest", "--reporters", "/run/adapters/jest.js"]);
    }

    #[test]
    fn esm_project_still_gets_the_plain_js_adapter_path() {
        let argv = vec!["jest".to_string()];
        let out = build_command(&argv, Path::new("/run/adapters/jest.js"), true);
        assert_eq!(out, vec!["jest", "--reporters", "/run/adapters/jest.js"]);
    }
}
