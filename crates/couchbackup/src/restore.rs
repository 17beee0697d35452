//! Restore orchestration: reads a backup file line by line, classifies
//! each line, packs document bodies into monotonically numbered batches,
//! and uploads them via a bounded `_bulk_docs` worker pool.
//!
//! 🕵️ Most of this file is `classify_line` arguing with itself about
//! whether a line is corrupt or just old. Old wins the benefit of the
//! doubt; corrupt doesn't.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::io::AsyncBufRead;

use crate::common::RestoreBatch;
use crate::error::CouchError;
use crate::http_client::CouchClient;
use crate::line_framer::NumberedLineFramer;
use crate::progress::ProgressEvent;
use crate::supervisor::run_pool;

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub parallelism: usize,
    pub buffer_size: usize,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            parallelism: 5,
            buffer_size: 500,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RestoreSummary {
    pub docs_restored: u64,
    pub batches_restored: u64,
}

enum LineKind {
    Empty,
    ResumeMarker,
    Header,
    DocArray(Vec<Value>),
    /// A line that failed to parse as JSON but is tolerated anyway: either
    /// it's the one broken line a resume leaves immediately before its
    /// marker, or the file never carried a header/marker at all (a legacy
    /// file predating that format, whose stray parse errors we can't tell
    /// apart from real corruption — see `classify_line`).
    Skip,
}

/// The exact line a fresh resume marker serialises to, used to recognise
/// a resume-broken trailing line by its tail rather than re-parsing it.
fn resume_marker_line() -> String {
    serde_json::to_string(&crate::common::ResumeMarker::new())
        .expect("ResumeMarker always serialises")
}

/// Classifies one line of a backup file. `line_no` is 1-based; `saw_header`
/// is whether line 1 was recognised as a `BackupHeader` or `ResumeMarker` —
/// i.e. whether this file is new enough to carry one at all.
///
/// Per spec §4.9/§6.1: a malformed line 1 is always an error. After that,
/// a malformed line ending in the resume marker is the one-line casualty a
/// resume leaves behind and is tolerated unconditionally. Any other
/// malformed line is tolerated only in a legacy (no-header) file — there's
/// no way to tell old-tool stray output from real corruption in that case.
/// In a header-aware file, any other malformed line is real corruption and
/// fails the restore.
fn classify_line(line: &str, line_no: u64, saw_header: bool) -> Result<LineKind, CouchError> {
    if line.is_empty() {
        return Ok(LineKind::Empty);
    }
    let is_first_line = line_no == 1;
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            if is_first_line {
                return Err(CouchError::BackupFileJsonError {
                    line: 1,
                    detail: e.to_string(),
                });
            }
            if line.ends_with(&resume_marker_line()) {
                return Ok(LineKind::Skip);
            }
            if !saw_header {
                return Ok(LineKind::Skip);
            }
            return Err(CouchError::BackupFileJsonError {
                line: line_no,
                detail: e.to_string(),
            });
        }
    };
    if is_first_line {
        if value.get("marker").and_then(|m| m.as_str())
            == Some(crate::common::ResumeMarker::VALUE)
        {
            return Ok(LineKind::ResumeMarker);
        }
        if value.get("name").is_some() && value.get("mode").is_some() {
            return Ok(LineKind::Header);
        }
    }
    match value {
        Value::Array(docs) => Ok(LineKind::DocArray(docs)),
        _ => Ok(LineKind::Skip),
    }
}

/// Batches are uploaded in sessions of at most this many arrays at a
/// time so the packer never has to hold the whole backup file's document
/// batches in memory at once — mirrors `backup::SESSION_SIZE` on the
/// download side.
const SESSION_SIZE: usize = 50;

/// Reads `source` to completion, uploading every document batch it
/// contains. A malformed line 1 always fails with
/// `CouchError::BackupFileJsonError`. After that: a malformed line is
/// tolerated if it ends in the resume marker (the one broken line a
/// resume leaves behind) or if the file never had a header/marker at all
/// (a legacy file, where stray parse errors can't be told apart from real
/// corruption) — any other malformed line in a header-aware file fails
/// the restore, naming the offending line number.
pub async fn restore<R>(
    source: R,
    client: Arc<dyn CouchClient>,
    options: RestoreOptions,
    progress: Option<async_channel::Sender<ProgressEvent>>,
) -> Result<RestoreSummary, CouchError>
where
    R: AsyncBufRead + Unpin,
{
    let mut framer = NumberedLineFramer::new(source);
    let mut batch_no = 0u32;
    let mut session: Vec<RestoreBatch> = Vec::with_capacity(SESSION_SIZE);
    let docs_restored = Arc::new(AtomicU64::new(0));
    let batches_restored = Arc::new(AtomicU64::new(0));

    let mut saw_header = false;
    loop {
        let next = framer
            .next_line()
            .await
            .map_err(|e| CouchError::Other(anyhow::anyhow!(e)))?;
        let Some((line_no, line)) = next else {
            break;
        };
        match classify_line(&line, line_no, saw_header) {
            Ok(LineKind::Empty) => {}
            Ok(LineKind::Header) | Ok(LineKind::ResumeMarker) => {
                saw_header = true;
            }
            Ok(LineKind::Skip) => {
                tracing::debug!(line_no, "skipping unparsable restore-file line");
            }
            Ok(LineKind::DocArray(docs)) => {
                if !docs.is_empty() {
                    session.push(RestoreBatch {
                        batch: batch_no,
                        docs,
                    });
                    batch_no += 1;
                }
            }
            Err(e) => return Err(e),
        }

        if session.len() >= SESSION_SIZE {
            upload_session(
                std::mem::take(&mut session),
                &client,
                &options,
                &docs_restored,
                &batches_restored,
                &progress,
            )
            .await?;
        }
    }
    if !session.is_empty() {
        upload_session(
            session,
            &client,
            &options,
            &docs_restored,
            &batches_restored,
            &progress,
        )
        .await?;
    }

    let total = docs_restored.load(Ordering::SeqCst);
    if let Some(tx) = &progress {
        let _ = tx.send(ProgressEvent::Finished { total }).await;
    }

    Ok(RestoreSummary {
        docs_restored: total,
        batches_restored: batches_restored.load(Ordering::SeqCst),
    })
}

/// Drives one session's worth of restore batches through the bounded
/// `_bulk_docs` worker pool.
async fn upload_session(
    batches: Vec<RestoreBatch>,
    client: &Arc<dyn CouchClient>,
    options: &RestoreOptions,
    docs_restored: &Arc<AtomicU64>,
    batches_restored: &Arc<AtomicU64>,
    progress: &Option<async_channel::Sender<ProgressEvent>>,
) -> Result<(), CouchError> {
    let client = Arc::clone(client);
    let docs_restored = Arc::clone(docs_restored);
    let batches_restored = Arc::clone(batches_restored);
    let progress = progress.clone();
    run_pool(batches, options.parallelism, move |batch| {
        let client = Arc::clone(&client);
        let docs_restored = Arc::clone(&docs_restored);
        let batches_restored = Arc::clone(&batches_restored);
        let progress = progress.clone();
        async move {
            let new_edits = if batch.needs_new_edits_false() {
                Some(false)
            } else {
                None
            };
            client
                .post_bulk_docs(&batch.docs, new_edits)
                .await
                .map_err(|e| CouchError::RestoreBatchError(e.to_string()))?;
            docs_restored.fetch_add(batch.doc_count() as u64, Ordering::SeqCst);
            batches_restored.fetch_add(1, Ordering::SeqCst);
            if let Some(tx) = &progress {
                let _ = tx
                    .send(ProgressEvent::Restored {
                        batch: batch.batch,
                        docs: batch.doc_count(),
                    })
                    .await;
            }
            Ok(())
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::testutil::FakeCouchClient;
    use std::collections::HashMap;
    use std::io::Cursor;

    fn client() -> Arc<dyn CouchClient> {
        Arc::new(FakeCouchClient {
            changes: crate::http_client::ChangesStream {
                ids: vec![],
                last_seq: String::new(),
            },
            docs_by_id: HashMap::new(),
            bulk_docs_calls: Default::default(),
            all_docs_pages: vec![],
        })
    }

    #[tokio::test]
    async fn restores_doc_arrays_after_header() {
        let body = "{\"name\":\"couchbackup\",\"version\":\"1\",\"mode\":\"full\"}\n\
                     [{\"_id\":\"a\"}]\n\
                     [{\"_id\":\"b\"},{\"_id\":\"c\"}]\n";
        let summary = restore(Cursor::new(body.as_bytes()), client(), RestoreOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(summary.docs_restored, 3);
        assert_eq!(summary.batches_restored, 2);
    }

    #[tokio::test]
    async fn tolerates_one_broken_line_ending_in_the_resume_marker() {
        // Mirrors a real resumed-backup file: a header, some completed
        // batches, then the one line a crash-mid-write-then-resume
        // produces — pre-abort garbage with no trailing newline,
        // immediately followed by the resume marker on the same line —
        // then more completed batches after the resume continued.
        let marker = resume_marker_line();
        let body = format!(
            "{{\"name\":\"couchbackup\",\"version\":\"1\",\"mode\":\"full\"}}\n\
             [{{\"_id\":\"a\"}}]\n\
             [{{\"_id\":\"half-writt{marker}\n\
             [{{\"_id\":\"b\"}}]\n"
        );
        let summary = restore(Cursor::new(body.into_bytes()), client(), RestoreOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(summary.docs_restored, 2);
        assert_eq!(summary.batches_restored, 2);
    }

    #[tokio::test]
    async fn resume_marker_alone_as_first_line_is_tolerated() {
        let body = "{\"marker\":\"@cloudant/couchbackup:resume\"}\n\
                     [{\"_id\":\"a\"}]\n";
        let summary = restore(Cursor::new(body.as_bytes()), client(), RestoreOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(summary.docs_restored, 1);
    }

    #[tokio::test]
    async fn legacy_file_with_no_header_tolerates_stray_lines() {
        let body = "[{\"_id\":\"a\"}]\nnot json at all\n[{\"_id\":\"b\"}]\n";
        let summary = restore(Cursor::new(body.as_bytes()), client(), RestoreOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(summary.docs_restored, 2);
    }

    #[tokio::test]
    async fn header_aware_file_fails_on_real_corruption_past_line_one() {
        let body = "{\"name\":\"couchbackup\",\"version\":\"1\",\"mode\":\"full\"}\n\
                     [{\"_id\":\"a\"}]\n\
                     not json and does not end in a resume marker\n\
                     [{\"_id\":\"b\"}]\n";
        let result = restore(Cursor::new(body.as_bytes()), client(), RestoreOptions::default(), None).await;
        assert!(matches!(result, Err(CouchError::BackupFileJsonError { line: 3, .. })));
    }

    #[tokio::test]
    async fn malformed_first_line_is_an_error() {
        let body = "not json\n[{\"_id\":\"a\"}]\n";
        let result = restore(Cursor::new(body.as_bytes()), client(), RestoreOptions::default(), None).await;
        assert!(matches!(result, Err(CouchError::BackupFileJsonError { line: 1, .. })));
    }

    #[tokio::test]
    async fn restores_across_multiple_sessions() {
        let mut body = String::new();
        body.push_str("{\"name\":\"couchbackup\",\"version\":\"1\",\"mode\":\"full\"}\n");
        for i in 0..(SESSION_SIZE * 2 + 5) {
            body.push_str(&format!("[{{\"_id\":\"doc{i}\"}}]\n"));
        }
        let summary = restore(Cursor::new(body.as_bytes()), client(), RestoreOptions::default(), None)
            .await
            .unwrap();
        assert_eq!(summary.batches_restored as usize, SESSION_SIZE * 2 + 5);
        assert_eq!(summary.docs_restored as usize, SESSION_SIZE * 2 + 5);
    }

    #[tokio::test]
    async fn docs_with_rev_trigger_new_edits_false() {
        let batch = RestoreBatch {
            batch: 0,
            docs: vec![serde_json::json!({"_id": "a", "_rev": "1-x"})],
        };
        assert!(batch.needs_new_edits_false());
    }
}
