//! Abort command implementation.

use anyhow::{Context, Result};

use chunkup_core::client::{ChunkTransport, HttpTransport};

use super::AbortArgs;

/// Run the abort command.
pub async fn run(args: AbortArgs) -> Result<()> {
    let config = super::load_config();
    let server = super::server_url(args.server, &config);

    let transport = HttpTransport::with_timeout(&server, config.client.request_timeout)
        .context("Failed to create HTTP client")?;
    transport
        .abort_upload(&args.upload_id)
        .await
        .with_context(|| format!("Failed to abort upload '{}'", args.upload_id))?;

    println!("Upload '{}' aborted and cleaned up.", args.upload_id);
    Ok(())
}
