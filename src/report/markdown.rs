//! Renders the group tree and run metadata into the markdown reports.

use crate::group::{Group, Status, Tree};
use crate::run::{Run, RunStatus};

fn yaml_string(value: &str) -> String {
    format!("{:?}", value)
}

fn run_status_label(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "PENDING",
        RunStatus::Running => "RUNNING",
        RunStatus::Completed => "COMPLETED",
        RunStatus::Errored => "ERRORED",
        RunStatus::Interrupted => "INTERRUPTED",
    }
}

/// Full contents of `test-run.md`, rewritten atomically each call.
pub fn render_test_run_md(run: &Run, tree: &Tree) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("runID: {}\n", yaml_string(&run.run_id)));
    out.push_str(&format!("status: {}\n", run_status_label(run.status)));
    out.push_str(&format!("detected_runner: {}\n", yaml_string(&run.detected_runner)));
    out.push_str(&format!("command: {}\n", yaml_string(&run.command_display())));
    out.push_str(&format!("start_time: {}\n", run.start_time.to_rfc3339()));
    if let Some(end_time) = run.end_time {
        out.push_str(&format!("end_time: {}\n", end_time.to_rfc3339()));
    }
    if let Some(exit_code) = run.exit_code {
        out.push_str(&format!("exit_code: {exit_code}\n"));
    }
    out.push_str("---\n\n");

    if run.status == RunStatus::Errored {
        out.push_str("## Error\n\n");
        out.push_str(run.top_level_error.as_deref().unwrap_or("An unspecified error occurred."));
        out.push('\n');
        return out;
    }

    let totals = aggregate_root_totals(tree);
    out.push_str("## Summary\n\n");
    out.push_str(&format!(
        "Total: {} · Passed: {} · Failed: {} · Skipped: {}\n\n",
        totals.total, totals.passed, totals.failed, totals.skipped
    ));

    out.push_str("## Groups\n\n");
    for group in tree.root_groups() {
        out.push_str(&render_root_line(group));
        out.push('\n');
    }

    out.push_str("\nSee `./output.log` for the raw child process output.\n");
    out
}

fn aggregate_root_totals(tree: &Tree) -> crate::ipc::Totals {
    let mut totals = crate::ipc::Totals::default();
    for group in tree.root_groups() {
        totals.add(group.totals);
    }
    totals
}

fn render_root_line(group: &Group) -> String {
    let duration = group
        .duration()
        .map(|d| format!(" ({}ms)", d.num_milliseconds()))
        .unwrap_or_default();
    format!("{} {}{}", group.status.glyph(), group.name(), duration)
}

/// YAML frontmatter written once, the first time a group's `index.md` is
/// opened. Frontmatter is never rewritten afterwards (the file is
/// append-only); a trailing "## Result" block carries the terminal status.
pub fn group_frontmatter(group_path: &[String], parent_path: &[String]) -> String {
    let mut out = String::new();
    out.push_str("---\n");
    out.push_str(&format!("group_name: {}\n", yaml_string(group_path.last().unwrap_or(&String::new()))));
    out.push_str(&format!("parent_path: {}\n", yaml_string(&parent_path.join("/"))));
    out.push_str("status: RUNNING\n");
    out.push_str("---\n\n");
    out.push_str("## Test results\n\n");
    out
}

/// Appended once a group reaches a terminal status.
pub fn group_result_block(group: &Group) -> String {
    let mut out = String::new();
    out.push_str("\n## Result\n\n");
    out.push_str(&format!("status: {}\n", group.status.as_str()));
    out.push_str(&format!(
        "totals: total={} passed={} failed={} skipped={}\n",
        group.totals.total, group.totals.passed, group.totals.failed, group.totals.skipped
    ));
    if let Some(error) = &group.group_error {
        out.push_str("\n### Error\n\n");
        out.push_str(&error.message);
        out.push('\n');
    }
    out
}

/// One line for a leaf test case, appended as its `testCase` event arrives.
pub fn case_line(group: &Group) -> String {
    let duration = group
        .duration()
        .map(|d| format!(" ({}ms)", d.num_milliseconds()))
        .unwrap_or_default();
    let mut line = format!("- {} {}{}\n", group.status.glyph(), group.name(), duration);
    if matches!(group.status, Status::Fail) {
        if let Some(error) = &group.case_error {
            line.push_str(&format!("  ```\n  {}\n  ```\n", error.message.replace('\n', "\n  ")));
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn frontmatter_includes_expected_keys() {
        let fm = group_frontmatter(&["file.js".into(), "suite".into()], &["file.js".into()]);
        assert!(fm.contains("group_name: \"suite\""));
        assert!(fm.contains("parent_path: \"file.js\""));
    }

    #[test]
    fn errored_run_renders_error_section_not_summary() {
        let run = Run {
            run_id: "id".into(),
            paths: crate::run::RunPaths::new(std::path::Path::new("."), "id"),
            command: vec!["jest".into()],
            detected_runner: "jest".into(),
            status: RunStatus::Errored,
            start_time: Utc::now(),
            end_time: Some(Utc::now()),
            exit_code: Some(1),
            top_level_error: Some("jest config is invalid".into()),
        };
        let tree = Tree::new();
        let rendered = render_test_run_md(&run, &tree);
        assert!(rendered.contains("## Error"));
        assert!(!rendered.contains("## Summary"));
        assert!(rendered.contains("jest config is invalid"));
    }
}
