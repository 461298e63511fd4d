//! CLI command definitions and handlers.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Load configuration with graceful fallback to defaults.
///
/// This function should be used by all commands to load the user's configuration.
/// If the config file doesn't exist or can't be parsed, it falls back to defaults.
pub fn load_config() -> chunkup_core::config::Config {
    chunkup_core::config::Config::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unusable config file: {}", e);
        chunkup_core::config::Config::default()
    })
}

pub mod abort;
pub mod completions;
pub mod config;
pub mod list;
pub mod serve;
pub mod upload;

/// Chunkup - Resumable chunked file uploads
#[derive(Parser)]
#[command(name = "chunkup")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand)]
pub enum Command {
    /// Run the upload server
    Serve(ServeArgs),

    /// Upload files to a server
    Upload(UploadArgs),

    /// Discard a partial upload on the server
    Abort(AbortArgs),

    /// List completed uploads on a server
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Arguments for the serve command
#[derive(Parser)]
pub struct ServeArgs {
    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind to localhost only
    #[arg(long)]
    pub localhost_only: bool,

    /// Storage root for uploads, sessions and the catalog
    #[arg(short, long)]
    pub storage: Option<PathBuf>,

    /// Largest accepted chunk in bytes
    #[arg(long)]
    pub max_chunk_size: Option<u64>,
}

/// Arguments for the upload command
#[derive(Parser)]
pub struct UploadArgs {
    /// Files and folders to upload
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Server base URL (e.g., http://localhost:8080)
    #[arg(short, long, env = "CHUNKUP_SERVER")]
    pub server: Option<String>,

    /// Chunk size in bytes
    #[arg(short, long)]
    pub chunk_size: Option<u64>,

    /// Do not attach a checksum to each chunk
    #[arg(long)]
    pub no_checksum: bool,

    /// Minimal output
    #[arg(short, long)]
    pub quiet: bool,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the abort command
#[derive(Parser)]
pub struct AbortArgs {
    /// Upload id to abort
    pub upload_id: String,

    /// Server base URL
    #[arg(short, long, env = "CHUNKUP_SERVER")]
    pub server: Option<String>,
}

/// Arguments for the list command
#[derive(Parser)]
pub struct ListArgs {
    /// Server base URL
    #[arg(short, long, env = "CHUNKUP_SERVER")]
    pub server: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the config command
#[derive(Parser)]
pub struct ConfigArgs {
    /// Config subcommand
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Get a config value
    Get {
        /// Config key (e.g., server.port)
        key: String,
    },

    /// Set a config value
    Set {
        /// Config key
        key: String,
        /// New value
        value: String,
    },

    /// Show the whole configuration
    Show,

    /// Reset configuration to defaults
    Reset,
}

/// Arguments for the completions command
#[derive(Parser)]
pub struct CompletionsArgs {
    /// Completions subcommand
    #[command(subcommand)]
    pub action: CompletionsAction,
}

/// Completions subcommands
#[derive(Subcommand, Clone, Copy)]
pub enum CompletionsAction {
    /// Generate completions and print to stdout
    Generate {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: ShellType,
    },
}

/// Supported shell types for completions
#[derive(Clone, Copy, ValueEnum, Debug)]
pub enum ShellType {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    #[value(name = "powershell")]
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Server URL from the flag, falling back to the configured one.
pub fn server_url(flag: Option<String>, config: &chunkup_core::config::Config) -> String {
    flag.unwrap_or_else(|| config.client.server_url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload() {
        let cli = Cli::try_parse_from([
            "chunkup",
            "upload",
            "a.bin",
            "b.bin",
            "--server",
            "http://host:9000",
            "--chunk-size",
            "1024",
        ])
        .unwrap();

        let Command::Upload(args) = cli.command else {
            panic!("expected upload");
        };
        assert_eq!(args.paths.len(), 2);
        assert_eq!(args.server.as_deref(), Some("http://host:9000"));
        assert_eq!(args.chunk_size, Some(1024));
        assert!(!args.no_checksum);
    }

    #[test]
    fn test_server_url_fallback() {
        let config = chunkup_core::config::Config::default();
        assert_eq!(server_url(None, &config), config.client.server_url);
        assert_eq!(
            server_url(Some("http://x:1".into()), &config),
            "http://x:1"
        );
    }
}
