//! Hand-rolled tokeniser for the three log-line kinds the backup log file
//! can contain. No regex — the grammar is simple enough that a prefix
//! match plus `split_once` reads more plainly than a pattern would, and
//! keeps the hot path (this runs once per batch per backup/resume) free
//! of regex-engine overhead.
//!
//! ```text
//! :t batch<N> [{"id":"..."},...]
//! :d batch<N>
//! :changes_complete <last_seq>
//! ```

use crate::common::DocRef;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLineMeta {
    /// A `:t` line — only used by the summariser, which doesn't need the
    /// doc ids, just the batch number.
    BatchStarted { batch: u32 },
    /// A `:d` line — batch fully downloaded and written.
    BatchDone { batch: u32 },
    ChangesComplete { last_seq: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogLineFull {
    BatchStarted { batch: u32, docs: Vec<DocRef> },
    BatchDone { batch: u32 },
    ChangesComplete { last_seq: String },
}

/// Parses a `batch<N>` token, returning `None` if it isn't well-formed.
fn parse_batch_token(tok: &str) -> Option<u32> {
    tok.strip_prefix("batch")?.parse().ok()
}

impl LogLineMeta {
    /// Parses just enough of the line to drive `log_summary`'s pending-set
    /// bookkeeping. Unparseable or unrecognised lines return `None` and
    /// are skipped by the caller rather than treated as corruption —
    /// matches the reference tool's tolerant read of stray lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, ' ');
        match parts.next()? {
            ":t" => {
                let batch = parse_batch_token(parts.next()?)?;
                Some(LogLineMeta::BatchStarted { batch })
            }
            ":d" => {
                let batch = parse_batch_token(parts.next()?)?;
                Some(LogLineMeta::BatchDone { batch })
            }
            ":changes_complete" => {
                let last_seq = parts.next()?.to_string();
                Some(LogLineMeta::ChangesComplete { last_seq })
            }
            _ => None,
        }
    }
}

impl LogLineFull {
    /// Same grammar as `LogLineMeta::parse` but also decodes the `:t`
    /// line's doc-id JSON array, for `batch_reader` which needs the ids
    /// back to drive `_bulk_get`. A `:t` line whose JSON body fails to
    /// parse is treated as unparseable as a whole (`command: None`
    /// equivalent) rather than a hard error — a half-written `:t` line is
    /// exactly what a crash mid-spool looks like, and `log_summary`
    /// already leaves such a batch out of `pending_batches` because it
    /// never reached `parse` successfully either.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.splitn(3, ' ');
        match parts.next()? {
            ":t" => {
                let batch = parse_batch_token(parts.next()?)?;
                let rest = parts.next()?;
                let docs: Vec<DocRef> = serde_json::from_str(rest).ok()?;
                Some(LogLineFull::BatchStarted { batch, docs })
            }
            ":d" => {
                let batch = parse_batch_token(parts.next()?)?;
                Some(LogLineFull::BatchDone { batch })
            }
            ":changes_complete" => {
                let last_seq = parts.next()?.to_string();
                Some(LogLineFull::ChangesComplete { last_seq })
            }
            _ => None,
        }
    }
}

pub fn format_batch_started(batch: u32, docs: &[DocRef]) -> String {
    format!(
        ":t batch{batch} {}",
        serde_json::to_string(docs).unwrap_or_else(|_| "[]".to_string())
    )
}

pub fn format_batch_done(batch: u32) -> String {
    format!(":d batch{batch}")
}

pub fn format_changes_complete(last_seq: &str) -> String {
    format!(":changes_complete {last_seq}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_batch_started_meta() {
        let line = format_batch_started(3, &[DocRef { id: "a".into(), rev: None }]);
        assert_eq!(
            LogLineMeta::parse(&line),
            Some(LogLineMeta::BatchStarted { batch: 3 })
        );
    }

    #[test]
    fn parses_batch_done() {
        assert_eq!(
            LogLineMeta::parse(":d batch7"),
            Some(LogLineMeta::BatchDone { batch: 7 })
        );
    }

    #[test]
    fn parses_changes_complete() {
        assert_eq!(
            LogLineMeta::parse(":changes_complete 12345"),
            Some(LogLineMeta::ChangesComplete {
                last_seq: "12345".to_string()
            })
        );
    }

    #[test]
    fn non_colon_lines_are_none() {
        assert_eq!(LogLineMeta::parse("garbage"), None);
        assert_eq!(LogLineMeta::parse(""), None);
    }

    #[test]
    fn malformed_batch_token_is_none() {
        assert_eq!(LogLineMeta::parse(":t notabatch [{}]"), None);
    }

    #[test]
    fn full_parse_decodes_doc_ids() {
        let line = format_batch_started(
            1,
            &[
                DocRef { id: "a".into(), rev: None },
                DocRef { id: "b".into(), rev: None },
            ],
        );
        match LogLineFull::parse(&line) {
            Some(LogLineFull::BatchStarted { batch, docs }) => {
                assert_eq!(batch, 1);
                assert_eq!(docs.len(), 2);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn full_parse_rejects_broken_json_body() {
        assert_eq!(LogLineFull::parse(":t batch1 not-json"), None);
    }
}
