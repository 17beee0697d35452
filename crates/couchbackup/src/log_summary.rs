//! Read-only pass over a log file that reconstructs which batches are
//! still pending download and whether the changes feed ever finished
//! spooling. Safe to call repeatedly; never mutates the file.

use indexmap::IndexMap;
use tokio::io::AsyncBufRead;

use crate::error::CouchError;
use crate::line_framer::LineFramer;
use crate::log_mapper::LogLineMeta;

#[derive(Debug, Clone, Default)]
pub struct LogState {
    pub changes_complete: bool,
    pub last_seq: Option<String>,
    /// Batch numbers seen as `:t` but not yet matched by a `:d`, in the
    /// order they first appeared — an `IndexMap` because download
    /// ordering should stay stable across resumes even though the set
    /// itself only needs O(1) membership + removal.
    pub pending_batches: IndexMap<u32, ()>,
}

pub async fn summarise_log<R: AsyncBufRead + Unpin>(reader: R) -> Result<LogState, CouchError> {
    let mut framer = LineFramer::new(reader);
    let mut state = LogState::default();
    while let Some(line) = framer
        .next_line()
        .await
        .map_err(|e| CouchError::Other(anyhow::anyhow!(e)))?
    {
        match LogLineMeta::parse(&line) {
            Some(LogLineMeta::BatchStarted { batch }) => {
                state.pending_batches.insert(batch, ());
            }
            Some(LogLineMeta::BatchDone { batch }) => {
                state.pending_batches.shift_remove(&batch);
            }
            Some(LogLineMeta::ChangesComplete { last_seq }) => {
                state.changes_complete = true;
                state.last_seq = Some(last_seq);
            }
            None => {}
        }
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn tracks_pending_batches_in_order() {
        let log = ":t batch0 []\n:t batch1 []\n:d batch0\n:changes_complete 5\n";
        let state = summarise_log(Cursor::new(log.as_bytes())).await.unwrap();
        assert!(state.changes_complete);
        assert_eq!(state.last_seq.as_deref(), Some("5"));
        assert_eq!(state.pending_batches.keys().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn incomplete_feed_reports_not_complete() {
        let log = ":t batch0 []\n:d batch0\n";
        let state = summarise_log(Cursor::new(log.as_bytes())).await.unwrap();
        assert!(!state.changes_complete);
        assert!(state.pending_batches.is_empty());
    }

    #[tokio::test]
    async fn tolerates_garbage_lines() {
        let log = "garbage\n:t batch0 []\nmore garbage\n:changes_complete 1\n";
        let state = summarise_log(Cursor::new(log.as_bytes())).await.unwrap();
        assert!(state.changes_complete);
        assert_eq!(state.pending_batches.len(), 1);
    }
}
