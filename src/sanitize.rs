//! Filesystem-safe path segment sanitisation for the report tree.
//!
//! Each group name becomes a directory segment under `reports/`. Names can
//! contain characters that are unsafe (or merely awkward) on disk, and two
//! distinct names can sanitise to the same segment. [`SanitizeScope`] handles
//! both: it sanitises a single segment and keeps a per-parent map from
//! sanitised segment back to the original name so collisions are detected
//! and resolved deterministically.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

const MAX_SEGMENT_LEN: usize = 100;

/// Replaces filesystem-unsafe characters with `_`, collapses runs of `_`,
/// and truncates overlong segments. Does not handle collisions by itself;
/// see [`SanitizeScope`] for that.
pub fn sanitize_segment(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        let unsafe_char = matches!(
            ch,
            '.' | '/' | '\\' | ':' | '?' | '*' | '<' | '>' | '|' | '"'
        ) || ch.is_whitespace();
        out.push(if unsafe_char { '_' } else { ch });
    }

    let collapsed = collapse_underscores(&out);
    let trimmed = collapsed.trim_matches('_');
    let base = if trimmed.is_empty() { "_" } else { trimmed };

    if base.chars().count() <= MAX_SEGMENT_LEN {
        base.to_string()
    } else {
        truncate_with_suffix(base, name)
    }
}

fn collapse_underscores(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_underscore = false;
    for ch in s.chars() {
        if ch == '_' {
            if !prev_underscore {
                out.push('_');
            }
            prev_underscore = true;
        } else {
            out.push(ch);
            prev_underscore = false;
        }
    }
    out
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(3).map(|b| format!("{b:02x}")).collect()
}

fn truncate_with_suffix(base: &str, original: &str) -> String {
    let suffix = short_hash(original);
    let keep = MAX_SEGMENT_LEN.saturating_sub(suffix.len() + 1);
    let truncated: String = base.chars().take(keep).collect();
    format!("{truncated}_{suffix}")
}

/// Per-parent collision resolution: the same unsanitised name always maps to
/// the same sanitised segment within this scope, and two different
/// unsanitised names never share a sanitised segment.
#[derive(Default)]
pub struct SanitizeScope {
    sanitized_to_original: HashMap<String, String>,
}

impl SanitizeScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the sanitised segment for `name`, resolving collisions by
    /// appending a short deterministic suffix derived from `name` itself.
    pub fn resolve(&mut self, name: &str) -> String {
        let candidate = sanitize_segment(name);

        match self.sanitized_to_original.get(&candidate) {
            Some(existing) if existing == name => candidate,
            Some(_) => {
                let suffixed = format!("{candidate}_{}", short_hash(name));
                self.sanitized_to_original
                    .entry(suffixed.clone())
                    .or_insert_with(|| name.to_string());
                suffixed
            }
            None => {
                self.sanitized_to_original
                    .insert(candidate.clone(), name.to_string());
                candidate
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_unsafe_characters() {
        assert_eq!(sanitize_segment("tests/math.test.js"), "tests_math_test_js");
        assert_eq!(sanitize_segment("a: b?"), "a_b");
    }

    #[test]
    fn collapses_runs_of_underscores() {
        assert_eq!(sanitize_segment("a   b///c"), "a_b_c");
    }

    #[test]
    fn sanitising_twice_is_a_no_op() {
        let once = sanitize_segment("weird name!!");
        let twice = sanitize_segment(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn scope_resolves_same_name_to_same_segment() {
        let mut scope = SanitizeScope::new();
        assert_eq!(scope.resolve("a.b"), scope.resolve("a.b"));
    }

    #[test]
    fn scope_disambiguates_colliding_names() {
        let mut scope = SanitizeScope::new();
        let first = scope.resolve("a.b");
        let second = scope.resolve("a_b");
        assert_ne!(first, second);
        assert_eq!(first, "a_b");
    }

    #[test]
    fn long_segment_is_truncated_with_deterministic_suffix() {
        let long_name = "x".repeat(200);
        let sanitized = sanitize_segment(&long_name);
        assert!(sanitized.chars().count() <= MAX_SEGMENT_LEN);
        assert_eq!(sanitize_segment(&long_name), sanitized);
    }
}
