//! Durable state file writes.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the per-location folder holding state files.
pub const STATE_DIR_NAME: &str = "_state";

/// Suffix of files that are still being written.
pub const TEMP_SUFFIX: &str = ".tmp";

/// The `_state` folder under a data location.
pub fn state_dir(data_location: &Path) -> PathBuf {
    data_location.join(STATE_DIR_NAME)
}

/// Write `data` to `<state_dir>/<file_name>` durably.
///
/// The bytes go to a `.tmp` sibling first, are synced, and are then renamed
/// into place, so a reader never sees a partially written file under the
/// final name. The folder is created if missing.
pub fn write_state_file(state_dir: &Path, file_name: &str, data: &[u8]) -> io::Result<PathBuf> {
    fs::create_dir_all(state_dir)?;

    let final_path = state_dir.join(file_name);
    let temp_path = state_dir.join(format!("{}{}", file_name, TEMP_SUFFIX));

    let result = write_and_sync(&temp_path, data)
        .and_then(|_| fs::rename(&temp_path, &final_path));
    if let Err(e) = result {
        // Clean up temp file on failure
        let _ = fs::remove_file(&temp_path);
        return Err(e);
    }

    sync_dir(state_dir);

    Ok(final_path)
}

fn write_and_sync(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    // Ensure data reaches physical storage
    file.sync_all()
}

/// Persist the rename itself. Best-effort.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(path = %dir.display(), error = %e, "Failed to sync state directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Remove orphaned .tmp files from a previous interrupted write.
pub fn remove_temp_files(state_dir: &Path) -> io::Result<usize> {
    if !state_dir.exists() {
        return Ok(0);
    }

    let mut removed = 0;
    for entry in fs::read_dir(state_dir)? {
        let path = entry?.path();
        let is_temp = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.ends_with(TEMP_SUFFIX));

        if is_temp && path.is_file() {
            debug!(path = %path.display(), "Removing orphaned temp file");
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
    }

    Ok(removed)
}
