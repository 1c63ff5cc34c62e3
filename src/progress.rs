//! The live terminal view: a single updating spinner line while the run is
//! in flight, and a compact per-file failure block plus a `Results:`
//! summary line at completion.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::group::{Group, Status, Tree};
use crate::ipc::Totals;

/// Drives the spinner shown while tests are running.
pub struct ProgressView {
    bar: ProgressBar,
}

impl Default for ProgressView {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressView {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { bar }
    }

    /// Redraws the spinner's message from a snapshot of the current totals.
    /// Call on a throttle (≈100ms); this does not throttle itself.
    pub fn render(&mut self, tree: &Tree) {
        let totals = aggregate(tree);
        self.bar.set_message(format!(
            "{} {}  {} {}  {} {}  {} running",
            style("pass").green(),
            totals.passed,
            style("fail").red(),
            totals.failed,
            style("skip").yellow(),
            totals.skipped,
            running_count(tree),
        ));
    }

    /// Stops the spinner and prints the final failure blocks plus the
    /// `Results:` summary. Passing groups produce no line.
    pub fn finish(&mut self, tree: &Tree, reports_root: &std::path::Path) {
        self.bar.finish_and_clear();
        for group in tree.root_groups() {
            if group.status == Status::Fail {
                eprintln!("{}", failure_block(group, reports_root));
            }
        }
        let totals = aggregate(tree);
        eprintln!(
            "Results: {} passed, {} failed, {} skipped ({} total)",
            style(totals.passed).green(),
            style(totals.failed).red(),
            style(totals.skipped).yellow(),
            totals.total,
        );
    }
}

fn aggregate(tree: &Tree) -> Totals {
    let mut totals = Totals::default();
    for group in tree.root_groups() {
        totals.add(group.totals);
    }
    totals
}

fn running_count(tree: &Tree) -> usize {
    tree.all_groups().filter(|g| g.status == Status::Running).count()
}

fn failure_block(group: &Group, reports_root: &std::path::Path) -> String {
    format!(
        "{}(failed {}, passed {}) {}\n  {}",
        style("FAIL").red().bold(),
        group.totals.failed,
        group.totals.passed,
        group.name(),
        reports_root.join(group.name()).join("index.md").display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{CaseStatus, Event};
    use chrono::Utc;

    #[test]
    fn running_count_reflects_in_flight_groups() {
        let mut tree = Tree::new();
        tree.apply(
            Event::TestGroupStart { group_name: "a.js".into(), parent_names: vec![] },
            Utc::now(),
        );
        assert_eq!(running_count(&tree), 1);
    }

    #[test]
    fn aggregate_sums_only_root_groups() {
        let mut tree = Tree::new();
        tree.apply(
            Event::TestCase {
                test_name: "t".into(),
                parent_names: vec!["a.js".into()],
                status: CaseStatus::Pass,
                duration: None,
                error: None,
            },
            Utc::now(),
        );
        assert_eq!(aggregate(&tree).passed, 1);
    }
}
