//! Drives the CouchDB `_changes` feed into the log file's `:t` lines,
//! finishing with `:changes_complete`. Runs once, at the start of a fresh
//! (non-resumed) backup.

use tokio::io::{AsyncWriteExt, BufWriter};

use crate::common::DocRef;
use crate::error::CouchError;
use crate::http_client::CouchClient;
use crate::log_mapper::{format_batch_started, format_changes_complete};
use crate::progress::ProgressEvent;

const SEQ_INTERVAL: u64 = 10_000;

/// Spools the full changes feed into `log_path`, batching doc ids into
/// `buffer_size`-sized `:t` lines. Truncates the log file first — this is
/// only ever called for a brand-new backup, never a resume.
pub async fn spool_changes<W>(
    client: &dyn CouchClient,
    mut log_writer: W,
    buffer_size: usize,
    progress: Option<&async_channel::Sender<ProgressEvent>>,
) -> Result<(), CouchError>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let changes = client
        .post_changes(SEQ_INTERVAL)
        .await
        .map_err(|e| CouchError::SpoolChangesError(e.to_string()))?;

    let mut writer = BufWriter::new(&mut log_writer);
    let mut batch_no = 0u32;
    for chunk in changes.ids.chunks(buffer_size.max(1)) {
        write_line(&mut writer, &format_batch_started(batch_no, chunk)).await?;
        if let Some(tx) = progress {
            let _ = tx
                .send(ProgressEvent::Spooled {
                    batch: batch_no,
                    docs: chunk.len(),
                })
                .await;
        }
        batch_no += 1;
    }
    write_line(&mut writer, &format_changes_complete(&changes.last_seq)).await?;
    writer
        .flush()
        .await
        .map_err(|e| CouchError::SpoolChangesError(e.to_string()))?;
    Ok(())
}

async fn write_line<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    line: &str,
) -> Result<(), CouchError> {
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| CouchError::SpoolChangesError(e.to_string()))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| CouchError::SpoolChangesError(e.to_string()))
}

/// A no-batching, single-call probe used by the backup orchestrator to
/// confirm `_bulk_get` is available before committing to full-mode
/// backup — an empty id list is a cheap way to surface a 404 without
/// touching real documents.
pub async fn probe_bulk_get(client: &dyn CouchClient) -> Result<(), CouchError> {
    let empty: &[DocRef] = &[];
    client.post_bulk_get(empty, true).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::testutil::FakeCouchClient;
    use std::collections::HashMap;

    fn fake(ids: Vec<DocRef>) -> FakeCouchClient {
        FakeCouchClient {
            changes: crate::http_client::ChangesStream {
                ids,
                last_seq: "99-abc".to_string(),
            },
            docs_by_id: HashMap::new(),
            bulk_docs_calls: Default::default(),
            all_docs_pages: vec![],
        }
    }

    #[tokio::test]
    async fn spools_batches_and_terminates_with_changes_complete() {
        let ids: Vec<DocRef> = (0..5)
            .map(|i| DocRef {
                id: format!("doc{i}"),
                rev: None,
            })
            .collect();
        let client = fake(ids);
        let mut buf = Vec::new();
        spool_changes(&client, &mut buf, 2, None).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4); // 3 batches of <=2 docs + changes_complete
        assert!(lines[0].starts_with(":t batch0"));
        assert!(lines[1].starts_with(":t batch1"));
        assert!(lines[2].starts_with(":t batch2"));
        assert!(lines[3].starts_with(":changes_complete 99-abc"));
    }

    #[tokio::test]
    async fn empty_changes_feed_still_writes_changes_complete() {
        let client = fake(vec![]);
        let mut buf = Vec::new();
        spool_changes(&client, &mut buf, 500, None).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.starts_with(":changes_complete"));
    }
}
