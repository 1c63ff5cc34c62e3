//! Parses `go test -json` output into IPC events.

use std::collections::HashMap;

use serde::Deserialize;

use crate::ipc::{CaseStatus, ErrorInfo, ErrorType, Event, GroupResultStatus, IpcResult, IpcWriter, Totals};

use super::LineParser;

#[derive(Debug, Deserialize)]
struct GoTestLine {
    #[serde(rename = "Action")]
    action: String,
    #[serde(rename = "Package")]
    package: Option<String>,
    #[serde(rename = "Test")]
    test: Option<String>,
    #[serde(rename = "Output")]
    output: Option<String>,
    #[serde(rename = "Elapsed")]
    elapsed: Option<f64>,
}

#[derive(Default)]
struct PackageState {
    totals: Totals,
    output: String,
    test_count: u32,
}

/// Streaming translator from `go test -json` objects to [`Event`]s, one
/// instance per child process.
#[derive(Default)]
pub struct GoTestJsonParser {
    packages: HashMap<String, PackageState>,
    started_groups: std::collections::HashSet<String>,
}

fn looks_like_setup_failure(buffer: &str) -> bool {
    buffer.lines().any(|line| {
        let trimmed = line.trim_start();
        trimmed.starts_with("# ")
            || trimmed.contains("syntax error")
            || trimmed.contains("undefined:")
            || trimmed.contains("No test")
            || is_go_source_location(trimmed)
    })
}

fn is_go_source_location(line: &str) -> bool {
    // crude match for "foo.go:12:34:" without pulling in a regex dependency
    // just for this one heuristic.
    let Some(go_idx) = line.find(".go:") else { return false };
    let rest = &line[go_idx + 4..];
    let mut parts = rest.splitn(3, ':');
    matches!(
        (parts.next().map(|p| p.parse::<u32>().is_ok()), parts.next().map(|p| p.parse::<u32>().is_ok())),
        (Some(true), Some(true))
    )
}

fn split_test_chain(test: &str) -> Vec<String> {
    test.split('/').map(|s| s.to_string()).collect()
}

impl GoTestJsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn start_chain(&mut self, package: &str, chain: &[String], writer: &mut IpcWriter) -> IpcResult<()> {
        let mut path = vec![package.to_string()];
        for segment in chain {
            let parent_names = path.clone();
            path.push(segment.clone());
            let key = path.join("\u{1f}");
            if self.started_groups.insert(key) {
                writer.emit(&Event::TestGroupStart {
                    group_name: segment.clone(),
                    parent_names,
                })?;
            }
        }
        Ok(())
    }
}

impl LineParser for GoTestJsonParser {
    fn feed_line(&mut self, line: &str, writer: &mut IpcWriter) -> IpcResult<()> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        let parsed: GoTestLine = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => return Ok(()), // non-JSON line from a misbehaving build step; ignore
        };
        let Some(package) = parsed.package.clone() else {
            return Ok(());
        };
        let state = self.packages.entry(package.clone()).or_default();

        match parsed.action.as_str() {
            "run" => {
                if let Some(test) = &parsed.test {
                    let chain = split_test_chain(test);
                    self.start_chain(&package, &chain, writer)?;
                }
            }
            "output" => {
                if let Some(text) = &parsed.output {
                    state.output.push_str(text);
                }
            }
            "pass" | "fail" | "skip" => {
                if let Some(test) = &parsed.test {
                    let chain = split_test_chain(test);
                    let (leaf, parents) = chain.split_last().expect("non-empty chain");
                    let mut parent_names = vec![package.clone()];
                    parent_names.extend_from_slice(parents);

                    let status = match parsed.action.as_str() {
                        "pass" => CaseStatus::Pass,
                        "fail" => CaseStatus::Fail,
                        _ => CaseStatus::Skip,
                    };
                    state.test_count += 1;
                    match status {
                        CaseStatus::Pass => state.totals.passed += 1,
                        CaseStatus::Fail => state.totals.failed += 1,
                        CaseStatus::Skip => state.totals.skipped += 1,
                        CaseStatus::Running => {}
                    }
                    state.totals.total += 1;

                    writer.emit(&Event::TestCase {
                        test_name: leaf.clone(),
                        parent_names,
                        status,
                        duration: parsed.elapsed,
                        error: None,
                    })?;
                } else {
                    let status = match parsed.action.as_str() {
                        "pass" => GroupResultStatus::Pass,
                        "fail" => GroupResultStatus::Fail,
                        _ => GroupResultStatus::Skip,
                    };

                    let setup_failure = parsed.action == "fail"
                        && state.test_count == 0
                        && looks_like_setup_failure(&state.output);

                    if setup_failure {
                        state.totals.setup_failed = true;
                        writer.emit(&Event::TestGroupError {
                            group_name: package.clone(),
                            parent_names: vec![],
                            error_type: ErrorType::SetupFailure,
                            error: ErrorInfo {
                                message: state.output.clone(),
                                stack: None,
                                location: None,
                            },
                        })?;
                    } else if !state.output.trim().is_empty() {
                        writer.emit(&Event::GroupStdout {
                            group_name: package.clone(),
                            parent_names: vec![],
                            chunk: state.output.clone(),
                        })?;
                    }

                    writer.emit(&Event::TestGroupResult {
                        group_name: package.clone(),
                        parent_names: vec![],
                        status,
                        duration: parsed.elapsed,
                        totals: state.totals,
                    })?;
                    state.output.clear();
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn finish(&mut self, writer: &mut IpcWriter) -> IpcResult<()> {
        writer.emit(&Event::RunComplete {})
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reader(path: &std::path::Path) -> Vec<Event> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn package_pass_emits_group_result_with_totals() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ipc.jsonl");
        let mut writer = IpcWriter::open(&path).unwrap();
        let mut parser = GoTestJsonParser::new();

        for line in [
            r#"{"Action":"run","Package":"example.com/foo","Test":"TestAdd"}"#,
            r#"{"Action":"pass","Package":"example.com/foo","Test":"TestAdd","Elapsed":0.01}"#,
            r#"{"Action":"pass","Package":"example.com/foo","Elapsed":0.02}"#,
        ] {
            parser.feed_line(line, &mut writer).unwrap();
        }

        let events = reader(&path);
        assert!(matches!(events[0], Event::TestGroupStart { .. }));
        assert!(matches!(events[1], Event::TestCase { .. }));
        match &events[2] {
            Event::TestGroupResult { totals, status, .. } => {
                assert_eq!(totals.total, 1);
                assert_eq!(totals.passed, 1);
                assert!(matches!(status, GroupResultStatus::Pass));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn compile_failure_with_no_tests_becomes_setup_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ipc.jsonl");
        let mut writer = IpcWriter::open(&path).unwrap();
        let mut parser = GoTestJsonParser::new();

        for line in [
            r##"{"Action":"output","Package":"example.com/broken","Output":"# example.com/broken\n"}"##,
            r#"{"Action":"output","Package":"example.com/broken","Output":"./broken.go:10:2: undefined: Foo\n"}"#,
            r#"{"Action":"fail","Package":"example.com/broken"}"#,
        ] {
            parser.feed_line(line, &mut writer).unwrap();
        }

        let events = reader(&path);
        assert!(matches!(events[0], Event::TestGroupError { .. }));
        if let Event::TestGroupError { error_type, .. } = &events[0] {
            assert!(matches!(error_type, ErrorType::SetupFailure));
        }
    }

    #[test]
    fn subtests_split_on_slash_into_nested_groups() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ipc.jsonl");
        let mut writer = IpcWriter::open(&path).unwrap();
        let mut parser = GoTestJsonParser::new();

        parser
            .feed_line(
                r#"{"Action":"run","Package":"pkg","Test":"TestSuite/case_a"}"#,
                &mut writer,
            )
            .unwrap();
        parser
            .feed_line(
                r#"{"Action":"pass","Package":"pkg","Test":"TestSuite/case_a","Elapsed":0.1}"#,
                &mut writer,
            )
            .unwrap();

        let events = reader(&path);
        match &events[1] {
            Event::TestCase { test_name, parent_names, .. } => {
                assert_eq!(test_name, "case_a");
                assert_eq!(parent_names, &vec!["pkg".to_string(), "TestSuite".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
