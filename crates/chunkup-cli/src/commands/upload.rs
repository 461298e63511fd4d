//! Upload command implementation.
//!
//! Uploads every selected file concurrently, one chunk at a time per file.
//! Ctrl+C aborts all uploads and discards their partial data on the server.

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;
use walkdir::WalkDir;

use chunkup_core::client::{HttpTransport, UploadEvent, UploadSnapshot, UploadStatus, Uploader};
use chunkup_core::storage::format_size;

use super::UploadArgs;

/// Run the upload command.
pub async fn run(args: UploadArgs) -> Result<()> {
    let config = super::load_config();
    let server = super::server_url(args.server.clone(), &config);
    let chunk_size = args.chunk_size.unwrap_or(config.client.chunk_size);
    if chunk_size == 0 {
        bail!("Chunk size must be greater than zero");
    }

    let files = collect_files(&args.paths)?;
    if files.is_empty() {
        bail!("No files to upload");
    }

    let transport = HttpTransport::with_timeout(&server, config.client.request_timeout)
        .context("Failed to create HTTP client")?;
    let uploader = Arc::new(
        Uploader::new(transport, chunk_size)
            .with_checksums(config.client.send_checksum && !args.no_checksum),
    );

    let ids = uploader
        .add_files(files)
        .await
        .context("Failed to prepare uploads")?;

    let snapshots = uploader.uploads().await;
    let total_size: u64 = snapshots.iter().map(|s| s.file_size).sum();

    let show_progress = !args.quiet && !args.json;
    if show_progress {
        println!();
        println!("Chunkup v{}", chunkup_core::VERSION);
        println!("{}", "-".repeat(37));
        println!();
        println!("  Server:  {}", server);
        println!(
            "  Files:   {} ({})",
            ids.len(),
            format_size(total_size)
        );
        println!("  Chunks:  {}", format_size(chunk_size));
        println!();
    }

    let names: HashMap<String, String> = snapshots
        .iter()
        .map(|s| (s.id.clone(), s.file_name.clone()))
        .collect();
    let progress_handle =
        show_progress.then(|| tokio::spawn(display_progress(uploader.subscribe(), names)));

    uploader.start_all().await;

    let interrupted = tokio::select! {
        () = uploader.wait_all() => false,
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        if show_progress {
            println!();
            println!("  Interrupted, aborting uploads...");
        }
        let snapshots = uploader.uploads().await;
        uploader.remove_all().await;
        if let Some(handle) = progress_handle {
            handle.abort();
        }
        if args.json {
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
        bail!("Upload interrupted");
    }

    if let Some(handle) = progress_handle {
        handle.abort();
    }

    let snapshots = uploader.uploads().await;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
    } else if !args.quiet {
        print_summary(&snapshots);
    }

    let failed = snapshots
        .iter()
        .filter(|s| s.status != UploadStatus::Completed)
        .count();
    if failed > 0 {
        bail!("{} of {} uploads failed", failed, snapshots.len());
    }
    Ok(())
}

/// Expand directories into the files beneath them.
fn collect_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    for path in paths {
        if !path.exists() {
            bail!("Path not found: {}", path.display());
        }

        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
                let entry = entry.with_context(|| format!("Failed to walk {}", path.display()))?;
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
        } else {
            files.push(path.clone());
        }
    }

    Ok(files)
}

async fn display_progress(
    mut events: broadcast::Receiver<UploadEvent>,
    names: HashMap<String, String>,
) {
    let name_of = |id: &str| names.get(id).map_or(id, String::as_str).to_string();

    loop {
        match events.recv().await {
            Ok(UploadEvent::Progress {
                id,
                progress,
                stats,
            }) => {
                print!(
                    "\r  [{:>3}%] {} - {}/s    ",
                    progress,
                    name_of(&id),
                    format_size(stats.speed_bps as u64)
                );
                let _ = io::stdout().flush();
            }
            Ok(UploadEvent::Completed { id, upload }) => {
                println!(
                    "\r  ✓ {} -> {} ({})",
                    name_of(&id),
                    upload.file_path,
                    format_size(upload.file_size)
                );
            }
            Ok(UploadEvent::Failed { id, error }) => {
                println!("\r  ✗ {}: {}", name_of(&id), error);
            }
            Ok(UploadEvent::StatusChanged { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "Progress display lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_summary(snapshots: &[UploadSnapshot]) {
    let completed = snapshots
        .iter()
        .filter(|s| s.status == UploadStatus::Completed)
        .count();

    println!();
    println!("  {} of {} uploads completed", completed, snapshots.len());
    for snap in snapshots.iter().filter(|s| s.status != UploadStatus::Completed) {
        println!(
            "    {} [{}] {}",
            display_name(&snap.path),
            snap.status,
            snap.error.as_deref().unwrap_or("")
        );
    }
    println!();
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}
