use anyhow::{bail, Result};
use std::{
    fs,
    path::{Component, Path, PathBuf},
};

/// Where the service keeps its ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    /// Process-local database, gone when the last connection closes.
    Memory,
    File(PathBuf),
}

/// Validate a `DB_PATH` value and resolve it to a [`DbLocation`].
pub fn parse_db_path(db_path: &str) -> Result<DbLocation> {
    if db_path == ":memory:" {
        return Ok(DbLocation::Memory);
    }

    if db_path.trim().is_empty() {
        bail!("Empty database path");
    }

    if db_path.contains('\0') || db_path.contains(['\n', '\r', '\t']) {
        bail!("Invalid control characters in database path");
    }

    let path = Path::new(db_path);

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        bail!("Parent directory traversal is not allowed in database path");
    }

    // Require a terminal file name (avoid paths ending with a directory separator)
    if path.file_name().is_none() || db_path.ends_with(['/', '\\']) {
        bail!("Database path must include a file name");
    }

    // An existing entry must be a regular file
    if let Ok(meta) = fs::symlink_metadata(path) {
        if meta.file_type().is_symlink() {
            bail!("Symlink path is not allowed for database path");
        }
        if meta.is_dir() {
            bail!("Database path points to a directory");
        }
    }

    Ok(DbLocation::File(path.to_path_buf()))
}
