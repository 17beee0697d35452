//! Streams the `:t` batches named in a wanted-set back out of the log
//! file, in the order they appear in the file. Used by the backup
//! orchestrator to re-read a session's worth of batches (at most 50 at a
//! time) without holding the whole log in memory.

use std::collections::BTreeSet;

use tokio::io::AsyncBufRead;

use crate::common::{BackupBatch, DocRef};
use crate::error::CouchError;
use crate::line_framer::LineFramer;
use crate::log_mapper::LogLineFull;

/// Reads the entire log file, returning only the batches whose number is
/// in `wanted`, in file order. A `:t` line not in `wanted` is skipped
/// without being parsed for ids — the summariser already told the caller
/// it isn't needed.
pub async fn read_batches<R: AsyncBufRead + Unpin>(
    reader: R,
    wanted: &BTreeSet<u32>,
) -> Result<Vec<BackupBatch>, CouchError> {
    let mut framer = LineFramer::new(reader);
    let mut out = Vec::with_capacity(wanted.len());
    while let Some(line) = framer
        .next_line()
        .await
        .map_err(|e| CouchError::Other(anyhow::anyhow!(e)))?
    {
        if !line.starts_with(":t") {
            continue;
        }
        if let Some(LogLineFull::BatchStarted { batch, docs }) = LogLineFull::parse(&line) {
            if wanted.contains(&batch) {
                out.push(BackupBatch { batch, docs });
            }
        }
    }
    Ok(out)
}
