//! # Configuration
//!
//! Settings come from three layers, highest priority first:
//! 1. Command line flags
//! 2. `packsync.toml` (explicit `--config`, else the working directory)
//! 3. Built-in defaults
//!
//! `SEMVER` in the environment turns semver mode on when neither layer does.
//!
//! ```toml
//! nspath = "/public"
//! register = "oneops"
//! version = "1"
//! pack_path = "packs:vendor/packs"
//! database = "packsync.redb"
//!
//! [schema.classes."mgmt.catalog.Tomcat"]
//! port = { default = "8080" }
//! version = {}
//! ```

use packsync_core::primitives::DEFAULT_NSPATH;
use packsync_core::{PackSyncError, SchemaRegistry, SyncConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "packsync.toml";
const DEFAULT_DATABASE: &str = "packsync.redb";
const DEFAULT_PACK_PATH: &str = "packs";
const DEFAULT_VERSION: &str = "1";
const PROGRAM: &str = env!("CARGO_PKG_NAME");

// =============================================================================
// FILE
// =============================================================================

/// Contents of `packsync.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub nspath: Option<String>,
    pub register: Option<String>,
    pub version: Option<String>,
    /// Colon-separated pack search path.
    pub pack_path: Option<String>,
    pub semver: Option<bool>,
    pub database: Option<PathBuf>,
    /// Component class and relation schemas, merged over the built-in ones.
    pub schema: SchemaRegistry,
}

impl FileConfig {
    /// Load `path`, or `packsync.toml` from the working directory when it
    /// exists. An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, PackSyncError> {
        match path {
            Some(path) => Self::read(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::read(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn read(path: &Path) -> Result<Self, PackSyncError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PackSyncError::IoError(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        Self::parse(&text).map_err(|e| match e {
            PackSyncError::Config(msg) => {
                PackSyncError::Config(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn parse(text: &str) -> Result<Self, PackSyncError> {
        toml::from_str(text).map_err(|e| PackSyncError::Config(e.to_string()))
    }
}

// =============================================================================
// PROCESS ENVIRONMENT
// =============================================================================

/// The environment variables configuration reads.
#[derive(Debug, Clone, Default)]
pub struct ProcessEnv {
    pub user: Option<String>,
    pub semver: Option<String>,
}

impl ProcessEnv {
    pub fn capture() -> Self {
        Self {
            user: std::env::var("USER").ok(),
            semver: std::env::var("SEMVER").ok(),
        }
    }

    fn semver(&self) -> bool {
        self.semver.as_deref().is_some_and(|v| !v.trim().is_empty())
    }
}

// =============================================================================
// RESOLVED SETTINGS
// =============================================================================

/// Sync flags given on the command line.
#[derive(Debug, Clone, Default)]
pub struct SyncFlags {
    pub register: Option<String>,
    pub version: Option<String>,
    pub pack_path: Option<String>,
    pub semver: bool,
    pub reload: bool,
    pub force_version: Option<String>,
    pub msg: Option<String>,
}

/// Everything a command needs, fully resolved.
#[derive(Debug, Clone)]
pub struct Settings {
    pub sync: SyncConfig,
    pub pack_path: Vec<PathBuf>,
    pub database: PathBuf,
    pub schema: SchemaRegistry,
}

impl Settings {
    pub fn resolve(
        file: FileConfig,
        flags: &SyncFlags,
        database: Option<&Path>,
        env: &ProcessEnv,
    ) -> Result<Self, PackSyncError> {
        let register = flags
            .register
            .clone()
            .or(file.register)
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| {
                PackSyncError::Config(
                    "no register configured, pass --register or set it in packsync.toml".to_string(),
                )
            })?;
        if register.contains('/') {
            return Err(PackSyncError::Config(format!(
                "register '{register}' must not contain '/'"
            )));
        }
        let version = flags
            .version
            .clone()
            .or(file.version)
            .unwrap_or_else(|| DEFAULT_VERSION.to_string());

        let mut sync = SyncConfig::new(register, version);
        sync.nspath = file.nspath.unwrap_or_else(|| DEFAULT_NSPATH.to_string());
        sync.semver = flags.semver || file.semver.unwrap_or(false) || env.semver();
        sync.reload = flags.reload;
        sync.force_version.clone_from(&flags.force_version);
        sync.comments = comments(env.user.as_deref(), flags.msg.as_deref());

        let pack_path = flags
            .pack_path
            .clone()
            .or(file.pack_path)
            .unwrap_or_else(|| DEFAULT_PACK_PATH.to_string());

        let mut schema = SchemaRegistry::builtin();
        schema.merge(file.schema);

        Ok(Self {
            sync,
            pack_path: crate::loader::search_path(&pack_path),
            database: database
                .map(Path::to_path_buf)
                .or(file.database)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE)),
            schema,
        })
    }
}

/// `<user>:<program>[ <msg>]`
fn comments(user: Option<&str>, msg: Option<&str>) -> String {
    let mut comments = format!("{}:{PROGRAM}", user.unwrap_or_default());
    if let Some(msg) = msg.filter(|m| !m.is_empty()) {
        comments.push(' ');
        comments.push_str(msg);
    }
    comments
}

// =============================================================================
// TESTS
// =============================================================================
