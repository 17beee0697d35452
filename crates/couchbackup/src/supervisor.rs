//! 🧑‍✈️ A small bounded worker pool: a queue of work items feeding `width`
//! concurrent workers, each driven to completion and joined at the end.
//! The backup and restore orchestrators are both "read work off a queue,
//! call the HTTP client, report progress" pipelines, so they share this
//! one pool shape instead of hand-rolling `tokio::spawn` loops twice.
//!
//! 👀 The workers don't know about each other and don't want to. The one
//! thing they do share is a single `AtomicBool` that means "somebody
//! already ruined it for everybody, stop volunteering for more work."

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::error::CouchError;

/// Runs `handler` against every item in `items` using `width` concurrent
/// workers pulled from a bounded channel, returning the first error
/// encountered (if any). Per spec §4.7: once any worker hits a terminal
/// error, the pool stops accepting new work — a shared `cancelled` flag is
/// set and the channel is closed, so the other workers finish whatever
/// item they're already holding and then stop rather than draining the
/// rest of the queue. Already-completed batches remain valid on disk
/// either way (each batch is independently idempotent), so this only
/// changes how much *unnecessary* work happens after a failure, not
/// correctness.
pub async fn run_pool<T, F, Fut>(items: Vec<T>, width: usize, handler: F) -> Result<(), CouchError>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), CouchError>> + Send + 'static,
{
    let width = width.max(1);
    let (tx, rx) = async_channel::bounded::<T>(items.len().max(1));
    for item in items {
        tx.send(item)
            .await
            .map_err(|e| CouchError::Other(anyhow::anyhow!(e)))?;
    }
    tx.close();

    let handler = Arc::new(handler);
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut handles: Vec<JoinHandle<Result<(), CouchError>>> = Vec::with_capacity(width);
    for _ in 0..width {
        let rx = rx.clone();
        let handler = Arc::clone(&handler);
        let cancelled = Arc::clone(&cancelled);
        handles.push(tokio::spawn(async move {
            while !cancelled.load(Ordering::SeqCst) {
                let item = match rx.recv().await {
                    Ok(item) => item,
                    Err(_) => break,
                };
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = handler(item).await {
                    cancelled.store(true, Ordering::SeqCst);
                    rx.close();
                    return Err(e);
                }
            }
            Ok(())
        }));
    }

    let mut first_err = None;
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Err(join_err) => {
                if first_err.is_none() {
                    first_err = Some(CouchError::Other(anyhow::anyhow!(join_err)));
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
