//! List command implementation.

use anyhow::{Context, Result};

use chunkup_core::client::HttpTransport;
use chunkup_core::protocol::UploadResource;

use super::ListArgs;

/// Run the list command.
pub async fn run(args: ListArgs) -> Result<()> {
    let config = super::load_config();
    let server = super::server_url(args.server, &config);

    let transport = HttpTransport::with_timeout(&server, config.client.request_timeout)
        .context("Failed to create HTTP client")?;
    let uploads = transport
        .list_uploads()
        .await
        .context("Failed to list uploads")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&uploads)?);
        return Ok(());
    }

    if uploads.is_empty() {
        println!("No completed uploads on {}.", server);
        return Ok(());
    }

    println!();
    println!("Completed uploads on {}", server);
    println!("{}", "─".repeat(72));
    for upload in &uploads {
        print_row(upload);
    }
    println!();

    Ok(())
}

fn print_row(upload: &UploadResource) {
    println!(
        "  {}  {:>10}  {}",
        upload.created_at.format("%Y-%m-%d %H:%M"),
        upload.file_size_human,
        upload.original_name
    );
    println!("    id: {}  stored as: {}", upload.id, upload.name);
}
