//! The in-memory group tree: groups, test cases, status derivation, and
//! totals aggregation.
//!
//! This is the single source of truth the report manager ([`crate::report`])
//! projects onto disk. All mutation happens through [`Tree::apply`], called
//! from the report manager's single-threaded event loop; nothing else is
//! allowed to mutate it (readers, e.g. the progress view, take a snapshot
//! instead).

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::ipc::{CaseStatus, ErrorInfo, ErrorType, Event, GroupResultStatus, Totals};
use crate::sanitize::SanitizeScope;

/// Terminal and non-terminal states a group (or test case) can be in.
/// Mirrors §3's invariant: once a group reaches PASS/FAIL/SKIP/ERROR it
/// never transitions back to PENDING/RUNNING.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Running,
    Pass,
    Fail,
    Skip,
    Error,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Pass | Status::Fail | Status::Skip | Status::Error)
    }

    pub fn glyph(self) -> &'static str {
        match self {
            Status::Pass => "\u{2713}",
            Status::Fail => "\u{2715}",
            Status::Skip => "\u{25cb}",
            Status::Error => "\u{2715}",
            Status::Running | Status::Pending => "\u{25cb}",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Running => "RUNNING",
            Status::Pass => "PASS",
            Status::Fail => "FAIL",
            Status::Skip => "SKIP",
            Status::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GroupError {
    pub message: String,
    pub error_type: ErrorType,
    pub stack: Option<String>,
    pub location: Option<String>,
}

/// A node in the report tree: either a non-leaf group (file, suite,
/// package, crate) or a leaf test case.
#[derive(Debug, Clone)]
pub struct Group {
    /// Full hierarchical path of original (unsanitised) names; identity.
    pub path: Vec<String>,
    pub is_leaf: bool,
    pub status: Status,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Only meaningful for non-leaf groups; leaves have no descendants.
    pub totals: Totals,
    /// True once an explicit `testGroupResult` has set `totals` for this
    /// group; the manager trusts the runner's own aggregate from then on.
    pub totals_authoritative: bool,
    pub group_error: Option<GroupError>,
    pub case_error: Option<ErrorInfo>,
    pub children: Vec<Vec<String>>,
    pub stdout: String,
    pub stderr: String,
    /// For leaves only: the runner's own measured duration from a
    /// `testCase` event, in milliseconds. A leaf's `start_time`/`end_time`
    /// are both set to the time the terminal event was observed, so they
    /// never reflect how long the test actually took; this field is the
    /// authoritative source for a leaf's rendered duration.
    pub measured_duration_ms: Option<f64>,
    /// Set once the leaf's terminal status has been counted into ancestor
    /// totals, to avoid double counting on duplicate/out-of-order events.
    counted: bool,
}

impl Group {
    fn new(path: Vec<String>, is_leaf: bool) -> Self {
        Self {
            path,
            is_leaf,
            status: Status::Pending,
            start_time: None,
            end_time: None,
            totals: Totals::default(),
            totals_authoritative: false,
            group_error: None,
            case_error: None,
            children: Vec::new(),
            stdout: String::new(),
            stderr: String::new(),
            measured_duration_ms: None,
            counted: false,
        }
    }

    pub fn name(&self) -> &str {
        self.path.last().map(|s| s.as_str()).unwrap_or("")
    }

    /// A non-leaf group's duration is derived from when it started and
    /// ended; a leaf's own measured duration (if the runner reported one)
    /// takes precedence over its start/end timestamps, which for leaves
    /// both land on the same instant (see `measured_duration_ms`).
    pub fn duration(&self) -> Option<chrono::Duration> {
        if self.is_leaf {
            if let Some(ms) = self.measured_duration_ms {
                return Some(chrono::Duration::milliseconds(ms.round() as i64));
            }
        }
        match (self.start_time, self.end_time) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    }

    /// Recomputes `status` from `totals` per §3's derivation rule. Leaves
    /// are excluded; their status is set directly by [`Tree::record_test_case`].
    fn recompute_status(&mut self) {
        if self.is_leaf {
            return;
        }
        if self.group_error.is_some() || self.totals.failed > 0 {
            self.status = Status::Fail;
            return;
        }
        if self.totals.total == 0 {
            // No descendants yet (or ever): PENDING, unless a result/error
            // already marked this group ERROR/terminal explicitly.
            if !self.status.is_terminal() {
                self.status = Status::Pending;
            }
            return;
        }
        if self.totals.passed > 0 {
            self.status = Status::Pass;
        } else if self.totals.skipped == self.totals.total {
            self.status = Status::Skip;
        } else if !self.status.is_terminal() {
            self.status = Status::Running;
        }
    }
}

/// A single decoded path, normalised from either current (`parentNames` +
/// own name) or legacy (bare `filePath`) event shapes into a full ordered
/// path `[root, ..., leaf]`.
fn full_path(parent_names: &[String], own_name: &str) -> Vec<String> {
    let mut path: Vec<String> = parent_names.to_vec();
    path.push(own_name.to_string());
    path
}

/// Translates a legacy `testFileStart`/`testFileResult` event (keyed by a
/// bare `filePath`) into the current group-path shape: the file becomes a
/// single-segment root path, per the Open Question resolution in the spec.
fn normalize_legacy_path(file_path: &str) -> Vec<String> {
    vec![file_path.to_string()]
}

/// The group tree plus the per-parent sanitisation scopes needed to compute
/// a stable on-disk directory name for every group.
pub struct Tree {
    nodes: HashMap<Vec<String>, Group>,
    /// Root groups, in first-seen order.
    pub roots: Vec<Vec<String>>,
    sanitize_scopes: HashMap<Vec<String>, SanitizeScope>,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            roots: Vec::new(),
            sanitize_scopes: HashMap::new(),
        }
    }

    pub fn get(&self, path: &[String]) -> Option<&Group> {
        self.nodes.get(path)
    }

    /// Sanitised segment for `path`'s own name, stable within its parent.
    pub fn sanitized_segment(&mut self, path: &[String]) -> String {
        let parent: Vec<String> = path[..path.len() - 1].to_vec();
        let name = path.last().cloned().unwrap_or_default();
        self.sanitize_scopes.entry(parent).or_default().resolve(&name)
    }

    /// Full sanitised on-disk path (each ancestor segment sanitised within
    /// its own parent scope), suitable for joining under `reports/`.
    pub fn sanitized_path(&mut self, path: &[String]) -> Vec<String> {
        (1..=path.len())
            .map(|i| self.sanitized_segment(&path[..i]))
            .collect()
    }

    /// Ensures every prefix of `path` (including `path` itself when
    /// `leaf_at_end` is false) exists as a discovered, non-leaf group,
    /// synthesising the missing `testGroupDiscovered` chain from the root
    /// down. Returns the existing or newly created group's path.
    fn ensure_discovered(&mut self, path: &[String], leaf_at_end: bool) {
        for i in 1..=path.len() {
            let prefix = path[..i].to_vec();
            let is_leaf = leaf_at_end && i == path.len();
            if !self.nodes.contains_key(&prefix) {
                if prefix.len() == 1 {
                    self.roots.push(prefix.clone());
                } else {
                    let parent = prefix[..prefix.len() - 1].to_vec();
                    if let Some(parent_group) = self.nodes.get_mut(&parent) {
                        parent_group.children.push(prefix.clone());
                    }
                }
                self.nodes.insert(prefix.clone(), Group::new(prefix, is_leaf));
            }
        }
    }

    /// Adds `delta` to every strict ancestor of `path`'s totals and
    /// re-derives each ancestor's status, bottom-up.
    fn propagate_totals(&mut self, path: &[String], delta: Totals) {
        for i in (1..path.len()).rev() {
            let ancestor = path[..i].to_vec();
            if let Some(group) = self.nodes.get_mut(&ancestor) {
                if !group.totals_authoritative {
                    group.totals.add(delta);
                }
                group.recompute_status();
            }
        }
    }

    /// Applies one decoded [`Event`] to the tree. This is the only mutation
    /// entry point; callers (the report manager's event loop) must serialise
    /// calls to this method.
    pub fn apply(&mut self, event: Event, now: DateTime<Utc>) {
        match event {
            Event::CollectionStart { .. } | Event::CollectionFinish { .. } => {}

            Event::TestGroupDiscovered { group_name, parent_names } => {
                let path = full_path(&parent_names, &group_name);
                self.ensure_discovered(&path, false);
            }

            Event::TestGroupStart { group_name, parent_names } => {
                let path = full_path(&parent_names, &group_name);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    if group.start_time.is_none() {
                        group.start_time = Some(now);
                    }
                    if !group.status.is_terminal() {
                        group.status = Status::Running;
                    }
                }
            }

            Event::TestCase {
                test_name,
                parent_names,
                status,
                duration,
                error,
            } => {
                let path = full_path(&parent_names, &test_name);
                self.ensure_discovered(&path, true);

                let terminal = !matches!(status, CaseStatus::Running);
                let case_status = match status {
                    CaseStatus::Pass => Status::Pass,
                    CaseStatus::Fail => Status::Fail,
                    CaseStatus::Skip => Status::Skip,
                    CaseStatus::Running => Status::Running,
                };

                let mut should_propagate = None;
                if let Some(group) = self.nodes.get_mut(&path) {
                    group.status = case_status;
                    group.case_error = error;
                    if group.start_time.is_none() {
                        group.start_time = Some(now);
                    }
                    if terminal {
                        group.end_time = Some(now);
                        if duration.is_some() {
                            group.measured_duration_ms = duration;
                        }
                        if !group.counted {
                            group.counted = true;
                            should_propagate = Some(match case_status {
                                Status::Pass => Totals { total: 1, passed: 1, ..Default::default() },
                                Status::Fail => Totals { total: 1, failed: 1, ..Default::default() },
                                Status::Skip => Totals { total: 1, skipped: 1, ..Default::default() },
                                _ => Totals::default(),
                            });
                        }
                    }
                }
                if let Some(delta) = should_propagate {
                    self.propagate_totals(&path, delta);
                }
            }

            Event::TestGroupResult {
                group_name,
                parent_names,
                status,
                duration: _,
                totals,
            } => {
                let path = full_path(&parent_names, &group_name);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    group.totals = totals;
                    group.totals_authoritative = true;
                    if group.end_time.is_none() {
                        group.end_time = Some(now);
                    }
                    group.status = match status {
                        GroupResultStatus::Pass => Status::Pass,
                        GroupResultStatus::Fail => Status::Fail,
                        GroupResultStatus::Skip => Status::Skip,
                        GroupResultStatus::Error => Status::Error,
                    };
                }
            }

            Event::TestGroupError {
                group_name,
                parent_names,
                error_type,
                error,
            } => {
                let path = full_path(&parent_names, &group_name);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    group.totals.setup_failed = true;
                    group.group_error = Some(GroupError {
                        message: error.message,
                        error_type,
                        stack: error.stack,
                        location: error.location,
                    });
                    group.status = Status::Fail;
                }
                self.propagate_setup_failed(&path);
            }

            Event::GroupStdout { group_name, parent_names, chunk } => {
                let path = full_path(&parent_names, &group_name);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    group.stdout.push_str(&chunk);
                }
            }
            Event::GroupStderr { group_name, parent_names, chunk } => {
                let path = full_path(&parent_names, &group_name);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    group.stderr.push_str(&chunk);
                }
            }

            Event::StdoutChunk { file_path, chunk } => {
                let path = normalize_legacy_path(&file_path);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    group.stdout.push_str(&chunk);
                }
            }
            Event::StderrChunk { file_path, chunk } => {
                let path = normalize_legacy_path(&file_path);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    group.stderr.push_str(&chunk);
                }
            }

            Event::TestFileStart { file_path } => {
                let path = normalize_legacy_path(&file_path);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    if group.start_time.is_none() {
                        group.start_time = Some(now);
                    }
                    if !group.status.is_terminal() {
                        group.status = Status::Running;
                    }
                }
            }
            Event::TestFileResult {
                file_path,
                status,
                duration: _,
                totals,
            } => {
                let path = normalize_legacy_path(&file_path);
                self.ensure_discovered(&path, false);
                if let Some(group) = self.nodes.get_mut(&path) {
                    group.totals = totals;
                    group.totals_authoritative = true;
                    group.end_time = Some(now);
                    group.status = match status {
                        GroupResultStatus::Pass => Status::Pass,
                        GroupResultStatus::Fail => Status::Fail,
                        GroupResultStatus::Skip => Status::Skip,
                        GroupResultStatus::Error => Status::Error,
                    };
                }
            }

            Event::RunComplete {} => {
                self.finalize_unterminated();
            }

            Event::Unknown => {}
        }
    }

    fn propagate_setup_failed(&mut self, path: &[String]) {
        for i in (1..path.len()).rev() {
            let ancestor = path[..i].to_vec();
            if let Some(group) = self.nodes.get_mut(&ancestor) {
                group.totals.setup_failed = true;
                if !group.totals_authoritative {
                    group.status = Status::Fail;
                }
            }
        }
    }

    /// Derives a best-known terminal status for every group still PENDING
    /// or RUNNING, per the "always finalise" rule: interruption or
    /// `runComplete` must still produce a coherent, fully-terminal report.
    pub fn finalize_unterminated(&mut self) {
        let mut paths: Vec<Vec<String>> = self.nodes.keys().cloned().collect();
        // Deepest first so children finalise before their parents are
        // re-derived from final totals.
        paths.sort_by_key(|p| std::cmp::Reverse(p.len()));

        for path in paths {
            if let Some(group) = self.nodes.get_mut(&path) {
                if group.status.is_terminal() {
                    continue;
                }
                if group.is_leaf {
                    group.status = Status::Skip;
                } else if group.totals.total == 0 {
                    group.status = Status::Skip;
                } else {
                    group.recompute_status();
                    if !group.status.is_terminal() {
                        group.status = Status::Skip;
                    }
                }
            }
        }
    }

    pub fn root_groups(&self) -> impl Iterator<Item = &Group> {
        self.roots.iter().filter_map(move |p| self.nodes.get(p))
    }

    pub fn all_groups(&self) -> impl Iterator<Item = &Group> {
        self.nodes.values()
    }
}
