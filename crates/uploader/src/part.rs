//! Per-part work: read, tree-hash and upload one part with retries.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use icepack_transfer::{FileHandle, FileSource, PartDescriptor, TransferError, read_part};
use icepack_treehash::{TreeHash, checksum};
use icepack_vault::{UploadSession, Vault};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::error::UploadError;
use crate::types::UploadEvent;

/// Parts not yet claimed by a worker, in index order.
pub(crate) struct WorkQueue {
    parts: Mutex<VecDeque<PartDescriptor>>,
}

impl WorkQueue {
    pub(crate) fn new(parts: impl IntoIterator<Item = PartDescriptor>) -> Self {
        Self {
            parts: Mutex::new(parts.into_iter().collect()),
        }
    }

    /// Claims the next part. The lock is released before the caller awaits.
    pub(crate) fn next(&self) -> Option<PartDescriptor> {
        let mut parts = self
            .parts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        parts.pop_front()
    }
}

/// Everything a worker needs, shared across the pool.
#[derive(Clone)]
pub(crate) struct PartContext {
    pub vault: Arc<dyn Vault>,
    pub files: Arc<dyn FileSource>,
    pub file: Arc<FileHandle>,
    pub session: Arc<UploadSession>,
    pub retry: RetryPolicy,
    pub cancel: CancellationToken,
    pub events: mpsc::Sender<UploadEvent>,
}

impl PartContext {
    /// Never blocks; events are dropped when nobody drains the channel.
    pub(crate) fn emit(&self, event: UploadEvent) {
        let _ = self.events.try_send(event);
    }
}

/// A part accepted by the vault.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PartReceipt {
    pub index: usize,
    pub hash: TreeHash,
}

/// Uploads parts from `queue` until it is empty, a part fails or the
/// upload is cancelled.
pub(crate) async fn run_worker(
    worker: usize,
    ctx: PartContext,
    queue: Arc<WorkQueue>,
) -> Result<Vec<PartReceipt>, UploadError> {
    let mut done = Vec::new();
    while let Some(part) = queue.next() {
        if ctx.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        let receipt = upload_part(&ctx, part).await?;
        done.push(receipt);
    }
    debug!(worker, parts = done.len(), "worker finished");
    Ok(done)
}

/// Reads, hashes and uploads a single part.
///
/// Transient vault errors are retried up to `retry.max_attempts` attempts
/// in total; any other error fails the part on the spot.
pub(crate) async fn upload_part(
    ctx: &PartContext,
    part: PartDescriptor,
) -> Result<PartReceipt, UploadError> {
    let (body, hash) = read_and_hash(ctx, part).await?;
    let hex = hash.to_hex();
    let range = part.byte_range();

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(UploadError::Cancelled),
            result = ctx.vault.upload_part(&ctx.session, range, &hex, &body) => result,
        };

        let err = match result {
            Ok(()) => {
                debug!(part = part.index, %range, attempt, "part uploaded");
                ctx.emit(UploadEvent::PartUploaded {
                    part_index: part.index,
                    checksum: hex.clone(),
                });
                return Ok(PartReceipt {
                    index: part.index,
                    hash,
                });
            }
            Err(err) => err,
        };

        if !err.is_transient() || attempt >= ctx.retry.max_attempts {
            return Err(UploadError::PartUploadFailed {
                part_index: part.index,
                attempts: attempt,
                last_error: err,
            });
        }

        let delay = ctx.retry.delay_for_attempt(attempt);
        warn!(
            part = part.index,
            attempt,
            max_attempts = ctx.retry.max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "part upload failed, retrying"
        );
        ctx.emit(UploadEvent::PartRetrying {
            part_index: part.index,
            attempt,
            delay,
            error: err.to_string(),
        });

        if !delay.is_zero() {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(UploadError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Reads the part and computes its tree hash off the async runtime.
async fn read_and_hash(
    ctx: &PartContext,
    part: PartDescriptor,
) -> Result<(Vec<u8>, TreeHash), UploadError> {
    let files = Arc::clone(&ctx.files);
    let file = Arc::clone(&ctx.file);

    tokio::task::spawn_blocking(move || {
        let body = read_part(files.as_ref(), &file, &part)?;
        let hash = checksum(&body);
        Ok::<_, TransferError>((body, hash))
    })
    .await
    .map_err(|e| UploadError::Worker(format!("task join error: {e}")))?
    .map_err(|source| UploadError::PartRead {
        part_index: part.index,
        source,
    })
}
