//! Upload orchestrator.
//!
//! Plans the parts of one file, runs a bounded pool of part workers against
//! an open vault session, and completes or aborts that session.

use std::path::Path;
use std::sync::Arc;

use icepack_transfer::{FileHandle, FileSource, LocalFileSource, UploadPlan, plan_parts};
use icepack_treehash::{TreeHash, tree_hash};
use icepack_vault::{UploadSession, Vault};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::part::{PartContext, WorkQueue, run_worker};
use crate::table::ResultTable;
use crate::types::{UploadEvent, UploadReceipt, UploadState};

/// Uploads files into a [`Vault`] as multipart archives.
pub struct ArchiveUploader {
    vault: Arc<dyn Vault>,
    files: Arc<dyn FileSource>,
    config: UploadConfig,
    events_tx: mpsc::Sender<UploadEvent>,
    events_rx: Option<mpsc::Receiver<UploadEvent>>,
    cancel: CancellationToken,
}

impl ArchiveUploader {
    /// Creates an uploader that reads files from the local filesystem.
    pub fn new(vault: Arc<dyn Vault>, config: UploadConfig) -> Self {
        Self::with_file_source(vault, Arc::new(LocalFileSource), config)
    }

    /// Creates an uploader with a custom file source.
    pub fn with_file_source(
        vault: Arc<dyn Vault>,
        files: Arc<dyn FileSource>,
        config: UploadConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        Self {
            vault,
            files,
            config,
            events_tx,
            events_rx: Some(events_rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<UploadEvent>> {
        self.events_rx.take()
    }

    /// Returns the token that cancels every upload run by this uploader.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Uploads `path` as one archive.
    ///
    /// `description` defaults to the path itself. On success every part has
    /// been accepted and the session completed; on failure after the session
    /// was opened, the session has been aborted exactly once.
    pub async fn upload(
        &self,
        path: &Path,
        description: Option<&str>,
    ) -> Result<UploadReceipt, UploadError> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }
        self.config.validate()?;

        self.set_state(UploadState::Planning);
        let file = self.open_file(path).await?;
        let plan = plan_parts(file.size(), self.config.part_size, &self.config.limits())
            .map_err(UploadError::from_plan)?;
        let description = description
            .map(str::to_owned)
            .unwrap_or_else(|| path.display().to_string());

        info!(
            path = %path.display(),
            vault = self.vault.name(),
            size = plan.total_size,
            part_size = plan.part_size,
            parts = plan.part_count,
            "starting upload"
        );

        let session = self
            .vault
            .initiate_upload(&description, plan.part_size)
            .await
            .map_err(|source| UploadError::RemoteProtocol {
                operation: "initiate",
                source,
            })?;
        let session = Arc::new(session);
        self.set_state(UploadState::SessionOpen);

        if self.cancel.is_cancelled() {
            self.abort(&session).await;
            return Err(UploadError::Cancelled);
        }

        self.set_state(UploadState::PartsInFlight);
        let ctx = PartContext {
            vault: Arc::clone(&self.vault),
            files: Arc::clone(&self.files),
            file: Arc::new(file),
            session: Arc::clone(&session),
            retry: self.config.retry.clone(),
            cancel: self.cancel.child_token(),
            events: self.events_tx.clone(),
        };

        let hashes = match self.upload_parts(ctx, &plan).await {
            Ok(hashes) => hashes,
            Err(err) => {
                error!(
                    upload_id = session.upload_id(),
                    error = %err,
                    "upload failed"
                );
                self.abort(&session).await;
                return Err(err);
            }
        };

        self.set_state(UploadState::Completing);
        let checksum = tree_hash(&hashes).to_hex();
        let archive_id = match self
            .vault
            .complete_upload(&session, plan.total_size, &checksum)
            .await
        {
            Ok(id) => id,
            Err(source) => {
                error!(
                    upload_id = session.upload_id(),
                    error = %source,
                    "complete failed"
                );
                self.abort(&session).await;
                return Err(UploadError::RemoteProtocol {
                    operation: "complete",
                    source,
                });
            }
        };

        self.set_state(UploadState::Done);
        info!(
            upload_id = session.upload_id(),
            archive_id = %archive_id,
            checksum = %checksum,
            "upload completed"
        );

        Ok(UploadReceipt {
            archive_id,
            upload_id: session.upload_id().to_string(),
            description,
            archive_size: plan.total_size,
            part_size: plan.part_size,
            part_count: plan.part_count,
            checksum,
        })
    }

    async fn open_file(&self, path: &Path) -> Result<FileHandle, UploadError> {
        let files = Arc::clone(&self.files);
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || FileHandle::open(files.as_ref(), &path))
            .await
            .map_err(|e| UploadError::Worker(format!("task join error: {e}")))?
            .map_err(UploadError::Source)
    }

    /// Runs the worker pool and returns the part hashes in part order.
    ///
    /// Every worker is joined before this returns, including after a
    /// failure, so no part call is still running when the caller aborts.
    async fn upload_parts(
        &self,
        ctx: PartContext,
        plan: &UploadPlan,
    ) -> Result<Vec<TreeHash>, UploadError> {
        let queue = Arc::new(WorkQueue::new(plan.parts()));
        let workers = self.config.concurrency.clamp(1, plan.part_count.max(1));
        let cancel = ctx.cancel.clone();

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            pool.spawn(run_worker(worker, ctx.clone(), Arc::clone(&queue)));
        }
        drop(ctx);
        debug!(workers, parts = plan.part_count, "worker pool started");

        let mut table = ResultTable::new(plan.part_count);
        let mut failure: Option<UploadError> = None;

        while let Some(joined) = pool.join_next().await {
            let outcome = joined
                .map_err(|e| UploadError::Worker(format!("task join error: {e}")))
                .and_then(|result| result);

            let err = match outcome {
                Ok(receipts) => {
                    match receipts
                        .into_iter()
                        .try_for_each(|r| table.fill(r.index, r.hash))
                    {
                        Ok(()) => continue,
                        Err(err) => err,
                    }
                }
                Err(err) => err,
            };

            // Stop the siblings; their cancellations must not hide the cause.
            cancel.cancel();
            let replace = match &failure {
                None => true,
                Some(UploadError::Cancelled) => !matches!(err, UploadError::Cancelled),
                Some(_) => false,
            };
            if replace {
                failure = Some(err);
            }
        }

        if let Some(err) = failure {
            return Err(err);
        }
        debug!(parts = table.filled(), "all parts uploaded");
        table.into_ordered()
    }

    /// Closes the session after a failure. Errors are logged, never returned,
    /// so the failure that caused the abort reaches the caller.
    async fn abort(&self, session: &UploadSession) {
        self.set_state(UploadState::Aborted);
        match self.vault.abort_upload(session).await {
            Ok(()) => info!(upload_id = session.upload_id(), "upload aborted"),
            Err(e) => warn!(
                upload_id = session.upload_id(),
                error = %e,
                "abort failed"
            ),
        }
    }

    fn set_state(&self, state: UploadState) {
        debug!(%state, "upload state");
        let _ = self.events_tx.try_send(UploadEvent::StateChanged { state });
    }
}
