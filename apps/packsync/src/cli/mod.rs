//! # packsync CLI Module
//!
//! This module implements the CLI interface for packsync.
//!
//! ## Available Commands
//!
//! - `sync` - Upload pack definitions into the store
//! - `register` - Create the namespace of a source register
//! - `versions` - List the published versions of a pack

mod commands;

use crate::config::{FileConfig, ProcessEnv, Settings, SyncFlags};
use clap::{Parser, Subcommand};
use packsync_core::PackSyncError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// packsync - versioned pack reconciliation
///
/// Syncs declarative pack definitions into a namespaced graph of CIs and
/// relations, one version per upload.
#[derive(Parser, Debug)]
#[command(name = "packsync")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to the configuration file (default: ./packsync.toml if present)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the store database
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sync packs into the store
    Sync {
        /// Pack names to sync
        packs: Vec<String>,

        /// Sync every pack found on the pack path, continuing past failures
        #[arg(short, long)]
        all: bool,

        #[command(flatten)]
        source: SourceArgs,

        /// Default version for packs that declare none
        #[arg(short = 'v', long = "version")]
        version: Option<String>,

        /// Colon-separated directories to look for pack files in
        #[arg(short = 'o', long)]
        pack_path: Option<String>,

        /// Republish mutable versions even when unchanged
        #[arg(long)]
        reload: bool,

        /// Create a new patch version for each change
        #[arg(long)]
        semver: bool,

        /// Publish every pack under this version
        #[arg(long)]
        force_version: Option<String>,

        /// Append a message to the comments
        #[arg(short, long)]
        msg: Option<String>,
    },

    /// Create the packs namespace of a source register
    Register {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// List published versions of a pack
    Versions {
        /// Pack name
        pack: String,

        #[command(flatten)]
        source: SourceArgs,
    },
}

/// Source register selection shared by every command.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SourceArgs {
    /// Source register name
    #[arg(short, long)]
    pub register: Option<String>,
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
///
/// Returns `Ok(false)` when the command ran but some pack failed.
pub fn execute(cli: Cli) -> Result<bool, PackSyncError> {
    let file = FileConfig::load(cli.config.as_deref())?;
    let env = ProcessEnv::capture();
    let json_mode = cli.json_mode;
    let database = cli.database.as_deref();

    match cli.command {
        Commands::Sync {
            packs,
            all,
            source,
            version,
            pack_path,
            reload,
            semver,
            force_version,
            msg,
        } => {
            let flags = SyncFlags {
                register: source.register,
                version,
                pack_path,
                semver,
                reload,
                force_version,
                msg,
            };
            let settings = Settings::resolve(file, &flags, database, &env)?;
            cmd_sync(&settings, &packs, all, json_mode)
        }
        Commands::Register { source } => {
            let flags = SyncFlags {
                register: source.register,
                ..SyncFlags::default()
            };
            let settings = Settings::resolve(file, &flags, database, &env)?;
            cmd_register(&settings, json_mode).map(|()| true)
        }
        Commands::Versions { pack, source } => {
            let flags = SyncFlags {
                register: source.register,
                ..SyncFlags::default()
            };
            let settings = Settings::resolve(file, &flags, database, &env)?;
            cmd_versions(&settings, &pack, json_mode).map(|()| true)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn sync_arguments_parse() {
        let cli = Cli::try_parse_from([
            "packsync", "--json-mode", "sync", "web", "db", "-r", "oneops", "-v", "2.0", "--semver",
            "-m", "release",
        ])
        .unwrap();
        assert!(cli.json_mode);
        match cli.command {
            Commands::Sync {
                packs,
                all,
                source,
                version,
                semver,
                msg,
                ..
            } => {
                assert_eq!(packs, vec!["web", "db"]);
                assert!(!all);
                assert_eq!(source.register.as_deref(), Some("oneops"));
                assert_eq!(version.as_deref(), Some("2.0"));
                assert!(semver);
                assert_eq!(msg.as_deref(), Some("release"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
