//! Typed progress events the core emits over a channel. This crate never
//! renders anything — no indicatif, no comfy-table — it just reports what
//! happened; the CLI crate owns turning these into a progress bar and a
//! summary table.

#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A batch of ids was spooled from the changes feed into the log
    /// file.
    Spooled { batch: u32, docs: usize },
    /// A batch was fetched via `_bulk_get` and its backup line written.
    Written { batch: u32, docs: usize },
    /// A shallow-mode `_all_docs` page was fetched and written.
    ShallowPageWritten { docs: usize },
    /// A batch was uploaded via `_bulk_docs` during restore.
    Restored { batch: u32, docs: usize },
    /// The whole operation finished; `total` is the cumulative doc count.
    Finished { total: u64 },
}

/// Convenience for callers that don't want to thread an `Option` through
/// every call site: a no-op sender that drops everything.
pub fn no_progress() -> Option<async_channel::Sender<ProgressEvent>> {
    None
}
