//! couchbackup — streaming backup and restore for CouchDB and Cloudant
//! databases.
//!
//! Backs a database up to an append-only text stream (one JSON array of
//! document revisions per line, preceded by a log file tracking which
//! batches have been downloaded) and restores that stream into a new,
//! empty database. See `backup::backup_full`/`backup::backup_shallow` and
//! `restore::restore` for the two directions; `http_client::CouchClient`
//! is the trait everything above it talks to.
//!
//! This crate never parses CLI arguments, reads environment variables, or
//! renders progress to a terminal — that's `couchbackup-cli`'s job. It
//! only emits `progress::ProgressEvent`s over an optional channel.

pub mod backup;
pub mod batch_reader;
pub mod common;
pub mod error;
pub mod http_client;
pub mod line_framer;
pub mod log_mapper;
pub mod log_summary;
pub mod progress;
pub mod restore;
pub mod retry;
pub mod spooler;
pub mod supervisor;

pub use backup::{backup_full, backup_shallow, BackupOptions, BackupSummary};
pub use error::CouchError;
pub use http_client::{Auth, CouchClient, HttpCouchClient};
pub use progress::ProgressEvent;
pub use restore::{restore, RestoreOptions, RestoreSummary};
