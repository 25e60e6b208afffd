//! Crash-safe file writes.
//!
//! Readers of a file written through [`write_atomic`] observe either the previous
//! contents or the new contents, never a truncated mix: bytes go to a temporary
//! sibling, are fsynced, and the sibling is renamed over the target.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

/// Atomically replace `path` with `bytes`, creating parent directories as needed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent_directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent_directory)?;
    let temp_path = build_temp_path(parent_directory, path);

    let result = (|| -> io::Result<()> {
        let mut temp_file = File::create(&temp_path)?;
        temp_file.write_all(bytes)?;
        temp_file.sync_all()?;
        drop(temp_file);
        fs::rename(&temp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result?;
    debug!(path = %path.display(), bytes = bytes.len(), "wrote file atomically");
    Ok(())
}

/// Remove `path`, treating a missing file as success. Returns whether a file was removed.
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(error) => Err(error),
    }
}

fn build_temp_path(parent_directory: &Path, target: &Path) -> PathBuf {
    let process_identifier = std::process::id();
    let timestamp_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or_default();
    let file_name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "rnaflow".to_string());
    parent_directory.join(format!(".{file_name}-{process_identifier}-{timestamp_nanos}.tmp"))
}
