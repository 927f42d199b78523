//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::config::Settings;
use crate::loader;
use packsync_core::{
    PackDefinition, PackOutcome, PackSync, PackSyncError, RedbStore, RunMode, RunReport,
};

fn open(settings: &Settings) -> Result<PackSync<RedbStore>, PackSyncError> {
    let store = RedbStore::open(&settings.database, settings.schema.clone())?;
    Ok(PackSync::new(store, settings.sync.clone()))
}

fn print_json(value: &impl serde::Serialize) -> Result<(), PackSyncError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| PackSyncError::SerializationError(e.to_string()))?;
    println!("{text}");
    Ok(())
}

// =============================================================================
// SYNC COMMAND
// =============================================================================

/// Sync the named packs, or every pack on the pack path with `all`.
///
/// Returns whether every pack succeeded.
pub fn cmd_sync(
    settings: &Settings,
    names: &[String],
    all: bool,
    json_mode: bool,
) -> Result<bool, PackSyncError> {
    if !all && names.is_empty() {
        return Err(PackSyncError::Config(
            "specify pack names or use --all".to_string(),
        ));
    }

    // Collisions are checked across the whole pack path, not only the selection.
    let discovered = loader::discover(&settings.pack_path)?;
    let (selected, mode): (Vec<PackDefinition>, RunMode) = if all {
        (discovered.clone(), RunMode::All)
    } else {
        let packs = names
            .iter()
            .map(|name| loader::find(&settings.pack_path, name))
            .collect::<Result<Vec<_>, _>>()?;
        (packs, RunMode::Selected)
    };

    let mut sync = open(settings)?;
    sync.validate_unique(&discovered)?;
    let report = sync.run(&selected, mode)?;

    if json_mode {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    Ok(report.is_success())
}

fn print_report(report: &RunReport) {
    println!("packsync");
    println!("========");
    for pack in &report.packs {
        match &pack.outcome {
            PackOutcome::Published { version, .. } => {
                println!("{:<24} published {}", pack.pack, version);
            }
            PackOutcome::Skipped { version, reason } => {
                println!("{:<24} skipped   {} ({})", pack.pack, version, reason);
            }
            PackOutcome::Failed { error } => {
                println!("{:<24} FAILED    {}", pack.pack, error);
            }
        }
        let failures = pack.item_failures();
        if failures > 0 {
            println!("{:<24} {} item(s) not saved", "", failures);
        }
    }
    println!();
    println!(
        "Packs: {}  Published: {}  Failed: {}",
        report.packs.len(),
        report.published(),
        report.failed()
    );
}

// =============================================================================
// REGISTER COMMAND
// =============================================================================

/// Create the packs namespace of the configured register.
pub fn cmd_register(settings: &Settings, json_mode: bool) -> Result<(), PackSyncError> {
    let mut sync = open(settings)?;
    let ns = sync.register()?;

    if json_mode {
        return print_json(&serde_json::json!({ "registered": ns }));
    }
    println!("Registered {ns}");
    Ok(())
}

// =============================================================================
// VERSIONS COMMAND
// =============================================================================

/// List the Version CIs of a pack, oldest first.
pub fn cmd_versions(settings: &Settings, pack: &str, json_mode: bool) -> Result<(), PackSyncError> {
    let sync = open(settings)?;
    sync.ensure_root()?;
    let versions = sync.versions(pack)?;

    if json_mode {
        let rows: Vec<serde_json::Value> = versions
            .iter()
            .map(|ci| {
                serde_json::json!({
                    "version": ci.name,
                    "commit": ci.attributes.get("commit").unwrap_or_default(),
                    "enabled": ci.attributes.get("enabled") != Some("false"),
                    "state": ci.state.as_str(),
                })
            })
            .collect();
        return print_json(&serde_json::json!({ "pack": pack, "versions": rows }));
    }

    if versions.is_empty() {
        println!("No versions of {pack}");
        return Ok(());
    }
    println!("{:<12} {:<8} COMMIT", "VERSION", "ENABLED");
    for ci in &versions {
        let commit = ci.attributes.get("commit").unwrap_or_default();
        let enabled = ci.attributes.get("enabled") != Some("false");
        println!("{:<12} {:<8} {}", ci.name, enabled, commit);
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, ProcessEnv, SyncFlags};
    use std::path::Path;

    fn settings(dir: &Path, flags: SyncFlags) -> Settings {
        let packs = dir.join("packs");
        std::fs::create_dir_all(&packs).unwrap();
        let flags = SyncFlags {
            register: Some("oneops".to_string()),
            pack_path: Some(packs.display().to_string()),
            ..flags
        };
        Settings::resolve(
            FileConfig::default(),
            &flags,
            Some(&dir.join("store.redb")),
            &ProcessEnv::default(),
        )
        .unwrap()
    }

    fn write_pack(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join("packs").join(format!("{name}.json")), body).unwrap();
    }

    #[test]
    fn sync_requires_register_first() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), SyncFlags::default());
        write_pack(dir.path(), "base", r#"{"name": "base"}"#);

        let err = cmd_sync(&settings, &["base".to_string()], false, true).unwrap_err();
        assert!(matches!(err, PackSyncError::MissingNamespace(_)));
    }

    #[test]
    fn register_then_sync_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), SyncFlags::default());
        write_pack(dir.path(), "base", r#"{"name": "base", "description": "Base"}"#);
        write_pack(dir.path(), "web", r#"{"name": "web"}"#);

        cmd_register(&settings, true).unwrap();
        assert!(cmd_sync(&settings, &[], true, true).unwrap());
        cmd_versions(&settings, "base", true).unwrap();

        let sync = open(&settings).unwrap();
        assert_eq!(sync.versions("base").unwrap().len(), 1);
        assert_eq!(sync.versions("web").unwrap().len(), 1);
    }

    #[test]
    fn failing_pack_reports_failure_in_batch() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), SyncFlags::default());
        write_pack(dir.path(), "bad", r#"{"name": "bad", "version": "one"}"#);
        write_pack(dir.path(), "good", r#"{"name": "good"}"#);

        cmd_register(&settings, true).unwrap();
        assert!(!cmd_sync(&settings, &[], true, true).unwrap());
        let sync = open(&settings).unwrap();
        assert_eq!(sync.versions("good").unwrap().len(), 1);
    }

    #[test]
    fn collision_on_pack_path_aborts_selected_sync() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), SyncFlags::default());
        write_pack(dir.path(), "web", r#"{"name": "web"}"#);
        write_pack(dir.path(), "web-copy", r#"{"name": "WEB"}"#);
        write_pack(dir.path(), "db", r#"{"name": "db"}"#);

        cmd_register(&settings, true).unwrap();
        let err = cmd_sync(&settings, &["db".to_string()], false, true).unwrap_err();
        assert!(matches!(err, PackSyncError::PackCollision { .. }));
    }

    #[test]
    fn sync_without_selection_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path(), SyncFlags::default());
        assert!(matches!(
            cmd_sync(&settings, &[], false, false),
            Err(PackSyncError::Config(_))
        ));
    }
}
