//! Typed error taxonomy for the backup/restore engine.
//!
//! Every terminal failure the engine can report lands in one of these
//! variants. Transient failures (408, 429, 5xx, connection resets) never
//! reach here — `retry::with_retry` absorbs them before a caller ever
//! sees an `Err`. Anything outside the contract (file I/O, config
//! plumbing) is wrapped through `Other` via `anyhow`'s `#[from]`.
//!
//! 🪦 `Other` is the crate's potter's field — everything that didn't
//! earn a named variant gets buried there, unmarked but not forgotten.

use thiserror::Error;

/// A single HTTP request/response pair, kept around so the CLI can print
/// it without re-deriving the redacted URL or guessing at the method.
#[derive(Debug, Clone)]
pub struct HttpFailure {
    pub method: String,
    /// Already stripped of userinfo by the time it reaches an error.
    pub url: String,
    pub status: u16,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum CouchError {
    #[error("database does not exist or is not reachable: {0}")]
    DatabaseNotFound(String),

    #[error("not authorized: {0}")]
    Unauthorized(HttpFailure),

    #[error("access forbidden: {0}")]
    Forbidden(HttpFailure),

    #[error("fatal HTTP error: {method} {url} -> {status} {reason}", method = .0.method, url = .0.url, status = .0.status, reason = .0.reason)]
    HttpFatal(HttpFailure),

    #[error("_bulk_get is not available on this database (old CouchDB / Cloudant shared-tier instance?)")]
    BulkGetUnavailable,

    #[error("invalid option: {0}")]
    InvalidOption(String),

    #[error("target database {0} is not empty")]
    DatabaseNotEmpty(String),

    #[error("resume requested but no log file path was given")]
    NoLogFileName,

    #[error("log file does not exist: {0}")]
    LogDoesNotExist(String),

    #[error("log file already exists: {0}")]
    LogFileExists(String),

    #[error("resume requested but the log file shows the changes feed never completed")]
    IncompleteChangesInLogFile,

    #[error("backup file contains invalid JSON at line {line}: {detail}")]
    BackupFileJsonError { line: u64, detail: String },

    #[error("spooling the changes feed failed: {0}")]
    SpoolChangesError(String),

    #[error("restore failed: server rejected a bulk_docs batch: {0}")]
    RestoreBatchError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CouchError {
    /// Process exit code this error should surface as, matching the
    /// reference tool's exit-code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            CouchError::InvalidOption(_) => 2,
            CouchError::DatabaseNotFound(_) => 10,
            CouchError::Unauthorized(_) => 11,
            CouchError::Forbidden(_) => 12,
            CouchError::DatabaseNotEmpty(_) => 13,
            CouchError::NoLogFileName => 20,
            CouchError::LogDoesNotExist(_) => 21,
            CouchError::IncompleteChangesInLogFile => 22,
            CouchError::SpoolChangesError(_) => 30,
            CouchError::HttpFatal(_) => 40,
            CouchError::BulkGetUnavailable => 50,
            // Not named in the reference tool's exit-code table; falls
            // back to the generic code like `BackupFileJsonError` does.
            CouchError::LogFileExists(_) => 1,
            CouchError::BackupFileJsonError { .. } => 1,
            CouchError::RestoreBatchError(_) => 1,
            CouchError::Other(_) => 1,
        }
    }

    /// Builds the terminal variant that corresponds to a non-2xx HTTP
    /// response. Transient statuses (429, 5xx) are the retry layer's
    /// concern and should never be passed here.
    pub fn from_status(method: &str, url: &str, status: u16, reason: &str) -> Self {
        let failure = HttpFailure {
            method: method.to_string(),
            url: url.to_string(),
            status,
            reason: reason.to_string(),
        };
        match status {
            404 => CouchError::DatabaseNotFound(url.to_string()),
            401 => CouchError::Unauthorized(failure),
            403 => CouchError::Forbidden(failure),
            _ => CouchError::HttpFatal(failure),
        }
    }

    pub fn is_retryable_status(status: u16) -> bool {
        status == 408 || status == 429 || (500..600).contains(&status)
    }
}

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} -> {} {}",
            self.method, self.url, self.status, self.reason
        )
    }
}
