//! Directory-backed vault.
//!
//! Layout under the vault root:
//! - `staging/<upload-id>.part`: parts of an open upload, written at their offsets
//! - `archives/<archive-id>`: completed archive bytes
//! - `archives/<archive-id>.json`: [`ArchiveMetadata`] sidecar

use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use icepack_transfer::{PlanLimits, is_valid_part_size, tree_hash_file};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{ByteRange, UploadSession, Vault, VaultError, VaultFuture};

/// Metadata written next to every completed archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMetadata {
    pub archive_id: String,
    pub description: String,
    pub size: u64,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StagedUpload {
    description: String,
    part_size: u64,
    staging_path: PathBuf,
    /// Part index -> checksum of the last accepted body.
    parts: BTreeMap<u64, String>,
    /// Held shared by every staging write until the blocking write returns,
    /// even if the caller dropped its future. Complete and abort take it
    /// exclusively before touching the staging file.
    writes: Arc<RwLock<()>>,
}

/// Vault that keeps archives in a local directory.
///
/// Parts are verified against their tree-hash checksum on arrival and the
/// whole archive is re-hashed on completion, the way the remote archive
/// service validates uploads.
pub struct LocalVault {
    root: PathBuf,
    name: String,
    sessions: Mutex<HashMap<String, StagedUpload>>,
}

impl LocalVault {
    /// Opens (creating if needed) a vault rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let root = root.into();
        std::fs::create_dir_all(root.join("staging"))?;
        std::fs::create_dir_all(root.join("archives"))?;
        let name = format!("local:{}", root.display());
        Ok(Self {
            root,
            name,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Vault root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a completed archive's bytes.
    pub fn archive_path(&self, archive_id: &str) -> PathBuf {
        self.root.join("archives").join(archive_id)
    }

    /// Reads the metadata sidecar of a completed archive.
    pub fn metadata(&self, archive_id: &str) -> Result<ArchiveMetadata, VaultError> {
        let content = std::fs::read_to_string(self.metadata_path(archive_id))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Number of uploads that are neither completed nor aborted.
    pub fn open_uploads(&self) -> usize {
        self.sessions().len()
    }

    fn metadata_path(&self, archive_id: &str) -> PathBuf {
        self.root.join("archives").join(format!("{archive_id}.json"))
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, StagedUpload>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn staged(&self, session: &UploadSession) -> Result<StagedUpload, VaultError> {
        self.sessions()
            .get(session.upload_id())
            .cloned()
            .ok_or_else(|| VaultError::SessionNotFound(session.upload_id().to_string()))
    }
}

/// Runs blocking filesystem work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, VaultError>
where
    F: FnOnce() -> Result<T, VaultError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| VaultError::Protocol(format!("task join error: {e}")))?
}

/// Verifies a part body and writes it at its offset in the staging file.
fn write_part(
    staging_path: &Path,
    range: ByteRange,
    expected: &str,
    body: &[u8],
) -> Result<(), VaultError> {
    let actual = icepack_treehash::checksum(body).to_hex();
    if actual != expected {
        return Err(VaultError::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    let mut file = OpenOptions::new()
        .write(true)
        .truncate(false)
        .open(staging_path)?;
    file.seek(SeekFrom::Start(range.offset()))?;
    file.write_all(body)?;
    Ok(())
}

impl Vault for LocalVault {
    fn initiate_upload<'a>(
        &'a self,
        description: &'a str,
        part_size: u64,
    ) -> VaultFuture<'a, UploadSession> {
        Box::pin(async move {
            if !is_valid_part_size(part_size, &PlanLimits::default()) {
                return Err(VaultError::Protocol(format!(
                    "invalid part size: {part_size}"
                )));
            }

            let upload_id = Uuid::new_v4().simple().to_string();
            let staging_path = self.root.join("staging").join(format!("{upload_id}.part"));
            blocking({
                let path = staging_path.clone();
                move || {
                    File::create(&path)?;
                    Ok(())
                }
            })
            .await?;

            self.sessions().insert(
                upload_id.clone(),
                StagedUpload {
                    description: description.to_string(),
                    part_size,
                    staging_path,
                    parts: BTreeMap::new(),
                    writes: Arc::new(RwLock::new(())),
                },
            );

            info!(vault = %self.name, upload_id = %upload_id, part_size, "upload initiated");
            Ok(UploadSession::new(upload_id))
        })
    }

    fn upload_part<'a>(
        &'a self,
        session: &'a UploadSession,
        range: ByteRange,
        checksum: &'a str,
        body: &'a [u8],
    ) -> VaultFuture<'a, ()> {
        Box::pin(async move {
            let staged = self.staged(session)?;

            if range.len() != body.len() as u64 {
                return Err(VaultError::Protocol(format!(
                    "{range} does not match body of {} bytes",
                    body.len()
                )));
            }
            if range.offset() % staged.part_size != 0 || range.len() > staged.part_size {
                return Err(VaultError::Protocol(format!(
                    "{range} is not aligned to part size {}",
                    staged.part_size
                )));
            }

            let write = Arc::clone(&staged.writes).read_owned().await;
            blocking({
                let path = staged.staging_path.clone();
                let expected = checksum.to_string();
                let body = body.to_vec();
                move || {
                    let _write = write;
                    write_part(&path, range, &expected, &body)
                }
            })
            .await?;

            let index = range.offset() / staged.part_size;
            if let Some(s) = self.sessions().get_mut(session.upload_id()) {
                s.parts.insert(index, checksum.to_string());
            }

            debug!(upload_id = %session.upload_id(), part = index, %range, "part stored");
            Ok(())
        })
    }

    fn complete_upload<'a>(
        &'a self,
        session: &'a UploadSession,
        archive_size: u64,
        checksum: &'a str,
    ) -> VaultFuture<'a, String> {
        Box::pin(async move {
            let gate = Arc::clone(&self.staged(session)?.writes);
            let _writes = gate.write_owned().await;
            let staged = self.staged(session)?;

            let expected_parts = archive_size.div_ceil(staged.part_size).max(1);
            if let Some(missing) = (0..expected_parts).find(|i| !staged.parts.contains_key(i)) {
                return Err(VaultError::Protocol(format!(
                    "part {missing} of {expected_parts} was never uploaded"
                )));
            }

            let archive_id = Uuid::new_v4().simple().to_string();
            let metadata = ArchiveMetadata {
                archive_id: archive_id.clone(),
                description: staged.description.clone(),
                size: archive_size,
                checksum: checksum.to_string(),
                created_at: Utc::now(),
            };
            let archive_path = self.archive_path(&archive_id);
            let metadata_path = self.metadata_path(&archive_id);

            blocking({
                let staging_path = staged.staging_path.clone();
                move || {
                    let actual_size = std::fs::metadata(&staging_path)?.len();
                    if actual_size != metadata.size {
                        return Err(VaultError::Protocol(format!(
                            "archive size mismatch: expected {}, stored {actual_size}",
                            metadata.size
                        )));
                    }

                    let actual = tree_hash_file(&staging_path)?.to_hex();
                    if actual != metadata.checksum {
                        return Err(VaultError::ChecksumMismatch {
                            expected: metadata.checksum.clone(),
                            actual,
                        });
                    }

                    std::fs::rename(&staging_path, &archive_path)?;
                    std::fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;
                    Ok(())
                }
            })
            .await?;

            self.sessions().remove(session.upload_id());
            info!(
                vault = %self.name,
                upload_id = %session.upload_id(),
                archive_id = %archive_id,
                archive_size,
                "upload completed"
            );
            Ok(archive_id)
        })
    }

    fn abort_upload<'a>(&'a self, session: &'a UploadSession) -> VaultFuture<'a, ()> {
        Box::pin(async move {
            let staged = self
                .sessions()
                .remove(session.upload_id())
                .ok_or_else(|| VaultError::SessionNotFound(session.upload_id().to_string()))?;

            let _writes = Arc::clone(&staged.writes).write_owned().await;
            blocking(move || match std::fs::remove_file(&staged.staging_path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            })
            .await?;

            info!(vault = %self.name, upload_id = %session.upload_id(), "upload aborted");
            Ok(())
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
