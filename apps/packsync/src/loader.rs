//! # Pack Discovery
//!
//! Pack definitions are JSON files named `<pack>.json`, looked up along a
//! colon-separated search path. Directories are scanned in path order and
//! files within a directory by name.

use packsync_core::{PackDefinition, PackSyncError};
use std::path::{Path, PathBuf};

const PACK_EXTENSION: &str = "json";

/// Split a `dir:dir` search path, dropping empty segments.
pub fn search_path(spec: &str) -> Vec<PathBuf> {
    spec.split(':')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Load one pack file. The file path is kept as the pack's origin.
pub fn load_file(path: &Path) -> Result<PackDefinition, PackSyncError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PackSyncError::IoError(format!("cannot read pack '{}': {}", path.display(), e))
    })?;
    let mut pack: PackDefinition = serde_json::from_str(&text).map_err(|e| {
        PackSyncError::SerializationError(format!("invalid pack '{}': {}", path.display(), e))
    })?;
    if pack.name.trim().is_empty() {
        pack.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    pack.origin = Some(path.display().to_string());
    Ok(pack)
}

/// Every pack file in every directory of `dirs`.
pub fn discover(dirs: &[PathBuf]) -> Result<Vec<PackDefinition>, PackSyncError> {
    let mut packs = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            tracing::warn!(path = %dir.display(), "pack path entry is not a directory, skipped");
            continue;
        }
        let entries = std::fs::read_dir(dir).map_err(|e| {
            PackSyncError::IoError(format!("cannot list '{}': {}", dir.display(), e))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == PACK_EXTENSION))
            .collect();
        files.sort();
        for file in files {
            packs.push(load_file(&file)?);
        }
    }
    tracing::debug!(count = packs.len(), "discovered packs");
    Ok(packs)
}

/// The first `<name>.json` along `dirs`.
pub fn find(dirs: &[PathBuf], name: &str) -> Result<PackDefinition, PackSyncError> {
    let file_name = format!("{name}.{PACK_EXTENSION}");
    dirs.iter()
        .map(|dir| dir.join(&file_name))
        .find(|path| path.is_file())
        .map(|path| load_file(&path))
        .unwrap_or_else(|| {
            Err(PackSyncError::Config(format!(
                "pack '{name}' not found in pack path"
            )))
        })
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn search_path_skips_empty_segments() {
        assert_eq!(
            search_path("a::b: "),
            vec![PathBuf::from("a"), PathBuf::from("b")]
        );
        assert!(search_path("").is_empty());
    }

    #[test]
    fn discover_scans_directories_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write(first.path(), "web.json", r#"{"name": "web"}"#);
        write(first.path(), "base.json", r#"{"name": "base", "version": "2"}"#);
        write(first.path(), "notes.txt", "ignored");
        write(second.path(), "db.json", r#"{"name": "db"}"#);

        let dirs = vec![
            first.path().to_path_buf(),
            PathBuf::from("/does/not/exist"),
            second.path().to_path_buf(),
        ];
        let packs = discover(&dirs).unwrap();
        let names: Vec<&str> = packs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["base", "web", "db"]);
        assert_eq!(packs[0].version.as_deref(), Some("2"));
        assert!(packs[0].origin.as_deref().unwrap().ends_with("base.json"));
    }

    #[test]
    fn find_uses_first_match_and_file_stem() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write(first.path(), "web.json", r#"{"description": "first"}"#);
        write(second.path(), "web.json", r#"{"description": "second"}"#);
        let dirs = vec![first.path().to_path_buf(), second.path().to_path_buf()];

        let pack = find(&dirs, "web").unwrap();
        assert_eq!(pack.name, "web");
        assert_eq!(pack.description, "first");
        assert!(matches!(find(&dirs, "db"), Err(PackSyncError::Config(_))));
    }

    #[test]
    fn malformed_pack_is_a_serialization_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "bad.json", "{ not json");
        assert!(matches!(
            load_file(&path),
            Err(PackSyncError::SerializationError(_))
        ));
    }
}
