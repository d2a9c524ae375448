//! Data types reported by the uploader.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Lifecycle of one upload call.
///
/// `Planning -> SessionOpen -> PartsInFlight -> Completing -> Done`, or
/// `Aborted` once a session was opened and the upload failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Planning,
    SessionOpen,
    PartsInFlight,
    Completing,
    Done,
    Aborted,
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UploadState::Planning => "planning",
            UploadState::SessionOpen => "session_open",
            UploadState::PartsInFlight => "parts_in_flight",
            UploadState::Completing => "completing",
            UploadState::Done => "done",
            UploadState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Progress and diagnostics emitted while uploading.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// The upload moved to a new state.
    StateChanged { state: UploadState },
    /// A part was accepted by the vault.
    PartUploaded { part_index: usize, checksum: String },
    /// A part attempt failed and will be retried after `delay`.
    PartRetrying {
        part_index: usize,
        attempt: u32,
        delay: Duration,
        error: String,
    },
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadReceipt {
    pub archive_id: String,
    pub upload_id: String,
    pub description: String,
    pub archive_size: u64,
    pub part_size: u64,
    pub part_count: usize,
    /// Lowercase hex tree hash of the whole archive.
    pub checksum: String,
}
