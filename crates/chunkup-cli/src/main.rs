//! Chunkup CLI - Resumable chunked file uploads
//!
//! Chunkup sends large files to a server in fixed-size chunks, so a transfer
//! can be paused, resumed or aborted without corrupting what was stored.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run the upload server
//! chunkup serve --port 8080
//!
//! # Upload files (on another machine)
//! chunkup upload ./video.mp4 --server http://host:8080
//! ```

#![allow(clippy::doc_markdown)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

use anyhow::Result;
use clap::Parser;

mod commands;

use commands::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => commands::serve::run(args).await,
        Command::Upload(args) => commands::upload::run(args).await,
        Command::Abort(args) => commands::abort::run(args).await,
        Command::List(args) => commands::list::run(args).await,
        Command::Config(args) => commands::config::run(args).await,
        Command::Completions(args) => commands::completions::run(args.action),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,chunkup=info,chunkup_core=info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}
