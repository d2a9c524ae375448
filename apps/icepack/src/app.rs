//! Subcommand implementations.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use icepack_transfer::{MIB, UploadPlan, plan_parts, tree_hash_file};
use icepack_uploader::{ArchiveUploader, UploadConfig, UploadEvent};
use icepack_vault::{LocalVault, Vault};
use tracing::{info, warn};

use crate::config::Config;

#[derive(Debug, Args)]
pub struct UploadArgs {
    /// File to upload.
    pub file: PathBuf,

    /// Archive description (defaults to the file path).
    #[arg(long)]
    pub description: Option<String>,

    /// Local vault directory.
    #[arg(long)]
    pub vault_dir: Option<PathBuf>,

    /// Number of parts uploaded at the same time.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Preferred part size in MiB (a power of two).
    #[arg(long)]
    pub part_size_mib: Option<u64>,
}

#[derive(Debug, Args)]
pub struct HashArgs {
    /// File to hash.
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Archive size in bytes.
    pub size_bytes: u64,

    /// Preferred part size in MiB (a power of two).
    #[arg(long)]
    pub part_size_mib: Option<u64>,
}

fn part_size_bytes(mib: u64) -> anyhow::Result<u64> {
    mib.checked_mul(MIB)
        .with_context(|| format!("part size of {mib} MiB is too large"))
}

/// Applies command-line overrides on top of the configuration file.
fn upload_settings(args: &UploadArgs, config: &Config) -> anyhow::Result<(PathBuf, UploadConfig)> {
    let mut upload = config.upload.clone();
    if let Some(concurrency) = args.concurrency {
        upload.concurrency = concurrency;
    }
    if let Some(mib) = args.part_size_mib {
        upload.part_size = part_size_bytes(mib)?;
    }
    let vault_dir = args
        .vault_dir
        .clone()
        .unwrap_or_else(|| config.vault_dir.clone());
    Ok((vault_dir, upload))
}

pub async fn upload(args: UploadArgs, config: Config) -> anyhow::Result<()> {
    let (vault_dir, settings) = upload_settings(&args, &config)?;
    let vault = LocalVault::open(&vault_dir)
        .with_context(|| format!("failed to open vault at {}", vault_dir.display()))?;
    info!(vault = vault.name(), "vault opened");

    let mut uploader = ArchiveUploader::new(Arc::new(vault), settings);
    let mut events = uploader
        .take_events()
        .context("upload events already taken")?;

    let cancel = uploader.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling upload");
            cancel.cancel();
        }
    });

    let progress = tokio::spawn(async move {
        let mut uploaded = 0usize;
        while let Some(event) = events.recv().await {
            match event {
                UploadEvent::PartUploaded { part_index, .. } => {
                    uploaded += 1;
                    info!(part = part_index, uploaded, "part uploaded");
                }
                UploadEvent::StateChanged { state } => info!(%state, "upload state"),
                UploadEvent::PartRetrying { .. } => {}
            }
        }
    });

    let result = uploader
        .upload(&args.file, args.description.as_deref())
        .await;
    // Closes the event channel so the progress task ends.
    drop(uploader);
    let _ = progress.await;

    let receipt = result.with_context(|| format!("upload of {} failed", args.file.display()))?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

pub fn hash(args: HashArgs) -> anyhow::Result<()> {
    let hash = tree_hash_file(&args.file)
        .with_context(|| format!("failed to hash {}", args.file.display()))?;
    println!("{hash}");
    Ok(())
}

pub fn plan(args: PlanArgs, config: &Config) -> anyhow::Result<()> {
    let plan = compute_plan(&args, config)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn compute_plan(args: &PlanArgs, config: &Config) -> anyhow::Result<UploadPlan> {
    let preferred = match args.part_size_mib {
        Some(mib) => part_size_bytes(mib)?,
        None => config.upload.part_size,
    };
    let plan = plan_parts(args.size_bytes, preferred, &config.upload.limits())?;
    Ok(plan)
}
