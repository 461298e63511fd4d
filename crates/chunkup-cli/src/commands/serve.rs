//! Serve command implementation.

use anyhow::{Context, Result};

use chunkup_core::storage::format_size;
use chunkup_core::web::{WebServer, WebServerConfig};

use super::ServeArgs;

/// Run the serve command.
pub async fn run(args: ServeArgs) -> Result<()> {
    let config = WebServerConfig::from(&super::load_config());
    let config = apply_args(config, args);

    let server = WebServer::bind(config.clone())
        .await
        .context("Failed to start upload server")?;
    let addr = server.local_addr()?;

    println!();
    println!("Chunkup v{}", chunkup_core::VERSION);
    println!("{}", "-".repeat(37));
    println!();
    println!("  Listening:   http://{}", addr);
    println!("  Storage:     {}", config.storage_root.display());
    println!("  Max chunk:   {}", format_size(config.max_chunk_size));
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
            println!();
            println!("  Shutting down...");
        })
        .await
        .context("Upload server failed")?;

    Ok(())
}

fn apply_args(mut config: WebServerConfig, args: ServeArgs) -> WebServerConfig {
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.localhost_only {
        config.localhost_only = true;
    }
    if let Some(storage) = args.storage {
        config.storage_root = storage;
    }
    if let Some(max) = args.max_chunk_size {
        config.max_chunk_size = max;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = ServeArgs {
            port: Some(9100),
            localhost_only: true,
            storage: Some("/srv/chunkup".into()),
            max_chunk_size: None,
        };

        let config = apply_args(WebServerConfig::default(), args);
        assert_eq!(config.port, 9100);
        assert!(config.localhost_only);
        assert_eq!(config.storage_root, std::path::PathBuf::from("/srv/chunkup"));
        assert_eq!(config.max_chunk_size, chunkup_core::DEFAULT_MAX_CHUNK_SIZE);
    }
}
