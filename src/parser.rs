//! Native-output parsers for runners with no in-process adapter.
//!
//! `go test -json` and `cargo test`/`nextest` speak their own structured (or
//! semi-structured) stdout instead of writing to `ipc.jsonl` themselves.
//! These parsers consume that stream line by line and translate it into the
//! same [`crate::ipc::Event`]s an embedded adapter would produce, written
//! through an [`crate::ipc::IpcWriter`] — so the report manager has exactly
//! one code path regardless of how the events were produced.

pub mod go_test;

use crate::ipc::{IpcResult, IpcWriter};

/// Consumes one line of native runner output, updating parser-internal
/// state and emitting zero or more IPC events through `writer`.
pub trait LineParser {
    fn feed_line(&mut self, line: &str, writer: &mut IpcWriter) -> IpcResult<()>;

    /// Called once the child has exited, to flush any buffered state into
    /// terminal events (e.g. a package whose result line never arrived).
    fn finish(&mut self, writer: &mut IpcWriter) -> IpcResult<()>;
}
