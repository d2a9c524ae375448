use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use icepack_transfer::{FileSource, MIB, TransferError, tree_hash_file};
use icepack_treehash::{TreeHash, checksum};
use icepack_uploader::{
    ArchiveUploader, RetryPolicy, UploadConfig, UploadError, UploadEvent, UploadState,
};
use icepack_vault::{ByteRange, LocalVault, UploadSession, Vault, VaultError, VaultFuture};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Initiate { description: String, part_size: u64 },
    Part { range: String, checksum: String, len: usize },
    Complete { size: u64, checksum: String },
    Abort,
}

/// Failure injection, keyed by part offset.
#[derive(Default)]
struct Faults {
    always_transient: Option<u64>,
    transient_times: HashMap<u64, u32>,
    protocol: Option<u64>,
    fail_initiate: bool,
    fail_complete: bool,
    fail_abort: bool,
    hang_parts: bool,
    part_delay: Duration,
}

#[derive(Default)]
struct MockVault {
    faults: Faults,
    calls: Mutex<Vec<Call>>,
    attempts: Mutex<HashMap<u64, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockVault {
    fn with_faults(faults: Faults) -> Arc<Self> {
        Arc::new(Self {
            faults,
            ..Default::default()
        })
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn attempts_at(&self, offset: u64) -> u32 {
        self.attempts.lock().unwrap().get(&offset).copied().unwrap_or(0)
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn part_calls(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Part {
                    range, checksum, ..
                } => Some((range, checksum)),
                _ => None,
            })
            .collect()
    }

    fn complete_checksum(&self) -> Option<String> {
        self.calls().into_iter().find_map(|c| match c {
            Call::Complete { checksum, .. } => Some(checksum),
            _ => None,
        })
    }
}

impl Vault for MockVault {
    fn initiate_upload<'a>(
        &'a self,
        description: &'a str,
        part_size: u64,
    ) -> VaultFuture<'a, UploadSession> {
        Box::pin(async move {
            self.record(Call::Initiate {
                description: description.to_string(),
                part_size,
            });
            if self.faults.fail_initiate {
                return Err(VaultError::Transient("service unavailable".into()));
            }
            Ok(UploadSession::new("mock-upload"))
        })
    }

    fn upload_part<'a>(
        &'a self,
        _session: &'a UploadSession,
        range: ByteRange,
        checksum: &'a str,
        body: &'a [u8],
    ) -> VaultFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Part {
                range: range.to_string(),
                checksum: checksum.to_string(),
                len: body.len(),
            });
            let attempt = {
                let mut attempts = self.attempts.lock().unwrap();
                let n = attempts.entry(range.offset()).or_insert(0);
                *n += 1;
                *n
            };

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if self.faults.hang_parts {
                std::future::pending::<()>().await;
            }
            if !self.faults.part_delay.is_zero() {
                tokio::time::sleep(self.faults.part_delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let offset = range.offset();
            if self.faults.always_transient == Some(offset) {
                return Err(VaultError::Transient(format!("timeout at {offset}")));
            }
            if self.faults.protocol == Some(offset) {
                return Err(VaultError::Protocol("range rejected".into()));
            }
            if let Some(&times) = self.faults.transient_times.get(&offset) {
                if attempt <= times {
                    return Err(VaultError::Transient("connection reset".into()));
                }
            }
            Ok(())
        })
    }

    fn complete_upload<'a>(
        &'a self,
        _session: &'a UploadSession,
        archive_size: u64,
        checksum: &'a str,
    ) -> VaultFuture<'a, String> {
        Box::pin(async move {
            self.record(Call::Complete {
                size: archive_size,
                checksum: checksum.to_string(),
            });
            if self.faults.fail_complete {
                return Err(VaultError::Protocol("tree hash mismatch".into()));
            }
            Ok("archive-1".to_string())
        })
    }

    fn abort_upload<'a>(&'a self, _session: &'a UploadSession) -> VaultFuture<'a, ()> {
        Box::pin(async move {
            self.record(Call::Abort);
            if self.faults.fail_abort {
                return Err(VaultError::Protocol("abort rejected".into()));
            }
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// File source reporting an arbitrary size without any backing data.
struct SizedSource(u64);

impl FileSource for SizedSource {
    fn size(&self, _path: &Path) -> Result<u64, TransferError> {
        Ok(self.0)
    }

    fn read_range(
        &self,
        _path: &Path,
        _offset: u64,
        _max_len: u64,
    ) -> Result<Vec<u8>, TransferError> {
        Err(TransferError::InvalidRange("no data".into()))
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, data).unwrap();
    path
}

fn config(concurrency: usize) -> UploadConfig {
    UploadConfig {
        concurrency,
        part_size: 4 * MIB,
        retry: RetryPolicy::immediate(8),
        ..Default::default()
    }
}

fn uploader(vault: &Arc<MockVault>, config: UploadConfig) -> ArchiveUploader {
    ArchiveUploader::new(Arc::clone(vault) as Arc<dyn Vault>, config)
}

fn drain(rx: &mut tokio::sync::mpsc::Receiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn states(events: &[UploadEvent]) -> Vec<UploadState> {
    events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn ten_mib_file_uploads_three_parts() {
    let dir = TempDir::new().unwrap();
    let data = pattern(10 * MIB as usize);
    let path = write_file(&dir, "ten.bin", &data);
    let vault = MockVault::with_faults(Faults::default());

    let receipt = uploader(&vault, config(10))
        .upload(&path, Some("ten mib"))
        .await
        .unwrap();

    let mut parts = vault.part_calls();
    parts.sort();
    let ranges: Vec<&str> = parts.iter().map(|(r, _)| r.as_str()).collect();
    assert_eq!(
        ranges,
        vec![
            "bytes 0-4194303/*",
            "bytes 4194304-8388607/*",
            "bytes 8388608-10485759/*",
        ]
    );

    let four = 4 * MIB as usize;
    let expected_parts = [
        checksum(&data[..four]).to_hex(),
        checksum(&data[four..2 * four]).to_hex(),
        checksum(&data[2 * four..]).to_hex(),
    ];
    for ((_, got), want) in parts.iter().zip(expected_parts.iter()) {
        assert_eq!(got, want);
    }

    let whole = tree_hash_file(&path).unwrap().to_hex();
    assert_eq!(vault.complete_checksum().as_deref(), Some(whole.as_str()));
    assert_eq!(receipt.checksum, whole);
    assert_eq!(receipt.archive_id, "archive-1");
    assert_eq!(receipt.upload_id, "mock-upload");
    assert_eq!(receipt.archive_size, 10 * MIB);
    assert_eq!(receipt.part_size, 4 * MIB);
    assert_eq!(receipt.part_count, 3);

    assert_eq!(vault.count(|c| matches!(c, Call::Complete { size, .. } if *size == 10 * MIB)), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 0);
    assert_eq!(
        vault.calls().first(),
        Some(&Call::Initiate {
            description: "ten mib".into(),
            part_size: 4 * MIB,
        })
    );
}

#[tokio::test]
async fn checksum_is_independent_of_concurrency() {
    let dir = TempDir::new().unwrap();
    let data = pattern(9 * MIB as usize + 4321);
    let path = write_file(&dir, "nine.bin", &data);

    let mut checksums = Vec::new();
    for concurrency in [1, 10] {
        let vault = MockVault::with_faults(Faults::default());
        let cfg = UploadConfig {
            part_size: MIB,
            ..config(concurrency)
        };
        let receipt = uploader(&vault, cfg).upload(&path, None).await.unwrap();
        assert_eq!(receipt.part_count, 10);
        checksums.push(receipt.checksum);
    }
    assert_eq!(checksums[0], checksums[1]);
    assert_eq!(checksums[0], checksum(&data).to_hex());
}

#[tokio::test]
async fn pool_bounds_in_flight_parts() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "eight.bin", &pattern(8 * MIB as usize));
    let vault = MockVault::with_faults(Faults {
        part_delay: Duration::from_millis(20),
        ..Default::default()
    });
    let cfg = UploadConfig {
        part_size: MIB,
        ..config(3)
    };

    let receipt = uploader(&vault, cfg).upload(&path, None).await.unwrap();

    assert_eq!(receipt.part_count, 8);
    assert_eq!(vault.part_calls().len(), 8);
    let max = vault.max_in_flight.load(Ordering::SeqCst);
    assert!((1..=3).contains(&max), "max in flight {max}");
}

#[tokio::test]
async fn always_failing_part_aborts_once_after_all_attempts() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "ten.bin", &pattern(10 * MIB as usize));
    let vault = MockVault::with_faults(Faults {
        always_transient: Some(4 * MIB),
        ..Default::default()
    });

    let err = uploader(&vault, config(1))
        .upload(&path, None)
        .await
        .unwrap_err();

    match err {
        UploadError::PartUploadFailed {
            part_index,
            attempts,
            last_error,
        } => {
            assert_eq!(part_index, 1);
            assert_eq!(attempts, 8);
            assert!(matches!(last_error, VaultError::Transient(_)));
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(vault.attempts_at(4 * MIB), 8);
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Complete { .. })), 0);

    let calls = vault.calls();
    let abort_at = calls.iter().position(|c| *c == Call::Abort).unwrap();
    assert_eq!(abort_at, calls.len() - 1, "no call may follow the abort");
}

#[tokio::test]
async fn failure_with_many_workers_still_aborts_once() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "sixteen.bin", &pattern(16 * MIB as usize));
    let vault = MockVault::with_faults(Faults {
        always_transient: Some(2 * MIB),
        part_delay: Duration::from_millis(2),
        ..Default::default()
    });
    let cfg = UploadConfig {
        part_size: MIB,
        ..config(10)
    };

    let err = uploader(&vault, cfg).upload(&path, None).await.unwrap_err();

    assert_eq!(err.part_index(), Some(2));
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Complete { .. })), 0);
    let calls = vault.calls();
    assert_eq!(calls.last(), Some(&Call::Abort));
}

#[tokio::test]
async fn flaky_part_recovers_and_reports_retries() {
    let dir = TempDir::new().unwrap();
    let data = pattern(6 * MIB as usize);
    let path = write_file(&dir, "six.bin", &data);
    let vault = MockVault::with_faults(Faults {
        transient_times: HashMap::from([(0, 2)]),
        ..Default::default()
    });
    let mut uploader = uploader(&vault, config(2));
    let mut events = uploader.take_events().unwrap();
    assert!(uploader.take_events().is_none());

    let receipt = uploader.upload(&path, None).await.unwrap();

    assert_eq!(receipt.checksum, checksum(&data).to_hex());
    assert_eq!(vault.attempts_at(0), 3);
    assert_eq!(vault.attempts_at(4 * MIB), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 0);

    let events = drain(&mut events);
    let retries: Vec<(usize, u32)> = events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::PartRetrying {
                part_index,
                attempt,
                delay,
                ..
            } => {
                assert_eq!(*delay, Duration::ZERO);
                Some((*part_index, *attempt))
            }
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![(0, 1), (0, 2)]);

    let uploaded = events
        .iter()
        .filter(|e| matches!(e, UploadEvent::PartUploaded { .. }))
        .count();
    assert_eq!(uploaded, 2);
}

#[tokio::test]
async fn non_transient_error_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "five.bin", &pattern(5 * MIB as usize));
    let vault = MockVault::with_faults(Faults {
        protocol: Some(0),
        ..Default::default()
    });

    let err = uploader(&vault, config(1))
        .upload(&path, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::PartUploadFailed {
            part_index: 0,
            attempts: 1,
            last_error: VaultError::Protocol(_),
        }
    ));
    assert_eq!(vault.attempts_at(0), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 1);
}

#[tokio::test]
async fn oversize_input_never_opens_a_session() {
    let vault = MockVault::with_faults(Faults::default());
    let cfg = UploadConfig {
        max_parts: 1,
        ..config(4)
    };
    let uploader = ArchiveUploader::with_file_source(
        Arc::clone(&vault) as Arc<dyn Vault>,
        Arc::new(SizedSource(4096 * MIB + 1)),
        cfg,
    );

    let err = uploader
        .upload(Path::new("huge.bin"), None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::Oversize { size, max } if size == 4096 * MIB + 1 && max == 4096 * MIB
    ));
    assert!(vault.calls().is_empty());
}

#[tokio::test]
async fn missing_file_is_a_source_error() {
    let dir = TempDir::new().unwrap();
    let vault = MockVault::with_faults(Faults::default());

    let err = uploader(&vault, config(2))
        .upload(&dir.path().join("nope.bin"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::Source(TransferError::NotFound(_))));
    assert!(vault.calls().is_empty());
}

#[tokio::test]
async fn unreadable_part_aborts_the_session() {
    let vault = MockVault::with_faults(Faults::default());
    let uploader = ArchiveUploader::with_file_source(
        Arc::clone(&vault) as Arc<dyn Vault>,
        Arc::new(SizedSource(3 * MIB)),
        config(2),
    );

    let err = uploader
        .upload(Path::new("ghost.bin"), None)
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::PartRead { part_index: 0, .. }));
    assert_eq!(vault.count(|c| matches!(c, Call::Part { .. })), 0);
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 1);
}

#[tokio::test]
async fn empty_file_uploads_one_empty_part() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "empty.bin", &[]);
    let vault = MockVault::with_faults(Faults::default());

    let receipt = uploader(&vault, config(10))
        .upload(&path, None)
        .await
        .unwrap();

    let empty = TreeHash::of(b"").to_hex();
    assert_eq!(
        empty,
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
    assert_eq!(vault.part_calls(), vec![("bytes 0-0/*".to_string(), empty.clone())]);
    assert_eq!(
        vault.count(|c| matches!(c, Call::Part { len: 0, .. })),
        1
    );
    assert_eq!(receipt.part_count, 1);
    assert_eq!(receipt.archive_size, 0);
    assert_eq!(receipt.checksum, empty);
}

#[tokio::test]
async fn failed_complete_is_surfaced_and_aborted() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "two.bin", &pattern(2 * MIB as usize));
    let vault = MockVault::with_faults(Faults {
        fail_complete: true,
        ..Default::default()
    });

    let err = uploader(&vault, config(2))
        .upload(&path, None)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        UploadError::RemoteProtocol {
            operation: "complete",
            source: VaultError::Protocol(_),
        }
    ));
    assert_eq!(vault.count(|c| matches!(c, Call::Complete { .. })), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 1);
    assert_eq!(vault.calls().last(), Some(&Call::Abort));
}

#[tokio::test]
async fn cancelled_before_start_does_nothing() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "one.bin", &pattern(MIB as usize));
    let vault = MockVault::with_faults(Faults::default());
    let uploader = uploader(&vault, config(2));
    uploader.cancel_token().cancel();

    let err = uploader.upload(&path, None).await.unwrap_err();

    assert!(matches!(err, UploadError::Cancelled));
    assert!(vault.calls().is_empty());
}

#[tokio::test]
async fn cancel_during_upload_aborts_the_session() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "eight.bin", &pattern(8 * MIB as usize));
    let vault = MockVault::with_faults(Faults {
        hang_parts: true,
        ..Default::default()
    });
    let uploader = uploader(&vault, config(2));
    let cancel = uploader.cancel_token();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let err = uploader.upload(&path, None).await.unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, UploadError::Cancelled));
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Complete { .. })), 0);
    assert_eq!(vault.calls().last(), Some(&Call::Abort));
}

#[tokio::test]
async fn description_defaults_to_path() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "named.bin", &pattern(1000));
    let vault = MockVault::with_faults(Faults::default());

    let receipt = uploader(&vault, config(2))
        .upload(&path, None)
        .await
        .unwrap();

    let expected = path.display().to_string();
    assert_eq!(receipt.description, expected);
    assert!(matches!(
        vault.calls().first(),
        Some(Call::Initiate { description, .. }) if *description == expected
    ));
}

#[tokio::test]
async fn state_events_follow_the_lifecycle() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "one.bin", &pattern(MIB as usize));

    let vault = MockVault::with_faults(Faults::default());
    let mut ok = uploader(&vault, config(2));
    let mut events = ok.take_events().unwrap();
    ok.upload(&path, None).await.unwrap();
    assert_eq!(
        states(&drain(&mut events)),
        vec![
            UploadState::Planning,
            UploadState::SessionOpen,
            UploadState::PartsInFlight,
            UploadState::Completing,
            UploadState::Done,
        ]
    );

    let vault = MockVault::with_faults(Faults {
        protocol: Some(0),
        ..Default::default()
    });
    let mut failing = uploader(&vault, config(2));
    let mut events = failing.take_events().unwrap();
    failing.upload(&path, None).await.unwrap_err();
    assert_eq!(
        states(&drain(&mut events)),
        vec![
            UploadState::Planning,
            UploadState::SessionOpen,
            UploadState::PartsInFlight,
            UploadState::Aborted,
        ]
    );
}

#[tokio::test]
async fn invalid_config_is_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "one.bin", &pattern(10));
    let vault = MockVault::with_faults(Faults::default());

    let err = uploader(&vault, config(0))
        .upload(&path, None)
        .await
        .unwrap_err();

    assert!(matches!(err, UploadError::InvalidConfig(_)));
    assert!(vault.calls().is_empty());
}

#[tokio::test]
async fn end_to_end_with_local_vault() {
    let dir = TempDir::new().unwrap();
    let data = pattern(5 * MIB as usize + 123);
    let path = write_file(&dir, "backup.tar", &data);
    let vault = Arc::new(LocalVault::open(dir.path().join("vault")).unwrap());
    let cfg = UploadConfig {
        part_size: MIB,
        ..config(4)
    };
    let uploader = ArchiveUploader::new(Arc::clone(&vault) as Arc<dyn Vault>, cfg);

    let receipt = uploader
        .upload(&path, Some("nightly backup"))
        .await
        .unwrap();

    assert_eq!(receipt.part_count, 6);
    assert_eq!(receipt.checksum, checksum(&data).to_hex());
    assert_eq!(vault.open_uploads(), 0);

    let stored = std::fs::read(vault.archive_path(&receipt.archive_id)).unwrap();
    assert_eq!(stored, data);

    let meta = vault.metadata(&receipt.archive_id).unwrap();
    assert_eq!(meta.description, "nightly backup");
    assert_eq!(meta.size, data.len() as u64);
    assert_eq!(meta.checksum, receipt.checksum);
}

#[tokio::test]
async fn failed_abort_does_not_hide_the_part_failure() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "two.bin", &pattern(2 * MIB as usize));
    let vault = MockVault::with_faults(Faults {
        always_transient: Some(0),
        fail_abort: true,
        ..Default::default()
    });
    let cfg = UploadConfig {
        retry: RetryPolicy::immediate(3),
        ..config(1)
    };

    let err = uploader(&vault, cfg).upload(&path, None).await.unwrap_err();

    assert!(matches!(
        err,
        UploadError::PartUploadFailed {
            part_index: 0,
            attempts: 3,
            last_error: VaultError::Transient(_),
        }
    ));
    assert_eq!(vault.attempts_at(0), 3);
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 1);
    assert_eq!(vault.calls().last(), Some(&Call::Abort));
}

#[tokio::test]
async fn failed_initiate_opens_nothing_to_abort() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "two.bin", &pattern(2 * MIB as usize));
    let vault = MockVault::with_faults(Faults {
        fail_initiate: true,
        ..Default::default()
    });
    let mut uploader = uploader(&vault, config(2));
    let mut events = uploader.take_events().unwrap();

    let err = uploader.upload(&path, None).await.unwrap_err();

    assert!(matches!(
        err,
        UploadError::RemoteProtocol {
            operation: "initiate",
            source: VaultError::Transient(_),
        }
    ));
    assert_eq!(
        vault.calls(),
        vec![Call::Initiate {
            description: path.display().to_string(),
            part_size: 4 * MIB,
        }]
    );
    assert_eq!(states(&drain(&mut events)), vec![UploadState::Planning]);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_retrying() {
    let dir = TempDir::new().unwrap();
    let path = write_file(&dir, "one.bin", &pattern(MIB as usize));
    let vault = MockVault::with_faults(Faults {
        always_transient: Some(0),
        ..Default::default()
    });
    let cfg = UploadConfig {
        retry: RetryPolicy {
            max_attempts: 8,
            initial_delay_ms: 60_000,
            max_delay_ms: 60_000,
            backoff_factor: 2.0,
        },
        ..config(1)
    };
    let mut uploader = uploader(&vault, cfg);
    let mut events = uploader.take_events().unwrap();
    let cancel = uploader.cancel_token();
    let started = tokio::time::Instant::now();

    let cancel_on_first_retry = async move {
        while let Some(event) = events.recv().await {
            if matches!(event, UploadEvent::PartRetrying { .. }) {
                cancel.cancel();
                break;
            }
        }
    };
    let (result, ()) = tokio::join!(uploader.upload(&path, None), cancel_on_first_retry);

    assert!(matches!(result, Err(UploadError::Cancelled)));
    assert_eq!(vault.attempts_at(0), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Abort)), 1);
    assert_eq!(vault.count(|c| matches!(c, Call::Complete { .. })), 0);
    // The 45-75 s backoff was cut short rather than slept through.
    assert!(started.elapsed() < Duration::from_secs(45));
}
