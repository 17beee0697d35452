//! Shared data model: document references, backup/restore batches, and the
//! wire shapes for the CouchDB bulk APIs.
//!
//! 📬 These structs don't do anything clever. They get a doc from the
//! changes feed to `_bulk_get`, and a doc from `_bulk_get` to a line on
//! disk. Postal workers. Please tip them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document id, optionally pinned to a specific revision — what the
/// changes feed hands us and what `_bulk_get` expects back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocRef {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

/// One line's worth of work in the backup download pipeline: a batch
/// number plus the doc ids the changes feed assigned to it.
#[derive(Debug, Clone)]
pub struct BackupBatch {
    pub batch: u32,
    pub docs: Vec<DocRef>,
}

impl BackupBatch {
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }
}

/// One line's worth of work in the restore upload pipeline: a monotonic
/// batch counter plus the already-parsed JSON document bodies read from a
/// single backup-file line.
#[derive(Debug, Clone)]
pub struct RestoreBatch {
    pub batch: u32,
    pub docs: Vec<Value>,
}

impl RestoreBatch {
    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// `_bulk_docs` needs `new_edits: false` whenever the docs already
    /// carry a `_rev` — otherwise CouchDB treats them as brand new edits
    /// and assigns fresh revisions, breaking replication history.
    pub fn needs_new_edits_false(&self) -> bool {
        self.docs.first().and_then(|d| d.get("_rev")).is_some()
    }
}

/// The header line every fresh backup file starts with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupHeader {
    pub name: String,
    pub version: String,
    pub mode: BackupMode,
    #[serde(default)]
    pub attachments: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupMode {
    Full,
    Shallow,
}

/// The alternate first line a partial backup file carries instead of a
/// `BackupHeader`, signalling to the restore reader that this stream may
/// contain an interrupted, resumed backup run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeMarker {
    pub marker: String,
}

impl ResumeMarker {
    pub const VALUE: &'static str = "@cloudant/couchbackup:resume";

    pub fn new() -> Self {
        Self {
            marker: Self::VALUE.to_string(),
        }
    }
}

impl Default for ResumeMarker {
    fn default() -> Self {
        Self::new()
    }
}

/// Body of a `_bulk_get` request.
#[derive(Debug, Serialize)]
pub struct BulkGetRequest<'a> {
    pub docs: &'a [DocRef],
}

#[derive(Debug, Deserialize)]
pub struct BulkGetResponse {
    pub results: Vec<BulkGetResult>,
}

#[derive(Debug, Deserialize)]
pub struct BulkGetResult {
    pub id: String,
    pub docs: Vec<BulkGetDocOutcome>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum BulkGetDocOutcome {
    Ok { ok: Value },
    Error { error: Value },
}

impl BulkGetResponse {
    /// Flattens the per-id results into just the successfully fetched
    /// document bodies, in the order CouchDB returned them. Per-doc
    /// errors inside a `_bulk_get` response (a doc deleted between the
    /// changes feed read and the fetch, for instance) are dropped rather
    /// than failing the whole batch — that is the reference tool's
    /// documented behaviour.
    pub fn ok_docs(&self) -> Vec<&Value> {
        self.results
            .iter()
            .flat_map(|r| r.docs.iter())
            .filter_map(|d| match d {
                BulkGetDocOutcome::Ok { ok } => Some(ok),
                BulkGetDocOutcome::Error { .. } => None,
            })
            .collect()
    }
}

/// Body of a `_bulk_docs` request.
#[derive(Debug, Serialize)]
pub struct BulkDocsRequest<'a> {
    pub docs: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_edits: Option<bool>,
}

/// One page of `_all_docs` (shallow-mode backup).
#[derive(Debug, Deserialize)]
pub struct AllDocsPage {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct DatabaseInformation {
    pub db_name: String,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(default)]
    pub doc_del_count: u64,
    #[serde(default)]
    pub update_seq: Option<Value>,
}

impl DatabaseInformation {
    /// Per §4.9: a restore target must be empty unless it's a system
    /// database (name starts with `_`), which CouchDB seeds with
    /// validation ddocs even before anything is restored into it.
    pub fn is_restorable(&self) -> bool {
        self.db_name.starts_with('_') || (self.doc_count == 0 && self.doc_del_count == 0)
    }
}
