//! Discovery of state files under a data location.

use crate::checkpoint::format::StateKind;
use crate::checkpoint::writer::state_dir;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::trace;

/// A state file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateFile {
    /// Full path.
    pub path: PathBuf,
    /// Kind of state.
    pub kind: StateKind,
    /// Version parsed from the file name.
    pub version: u64,
}

/// List the files of `kind` under a data location's `_state` folder.
///
/// A location without a `_state` folder yields nothing. File names whose
/// suffix is not a number are skipped.
pub fn list_state_files(data_location: &Path, kind: StateKind) -> io::Result<Vec<StateFile>> {
    let dir = state_dir(data_location);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        trace!(file = name, "[find_latest_state]: processing");

        if !name.starts_with(kind.prefix()) {
            continue;
        }
        match kind.parse_version(name) {
            Some(version) => files.push(StateFile {
                path: path.clone(),
                kind,
                version,
            }),
            None => {
                trace!(file = name, "[find_latest_state]: malformed version, ignoring");
            }
        }
    }

    Ok(files)
}

/// Read a state file fully.
pub fn read_state_file(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_state_dir_is_empty() {
        let dir = tempdir().unwrap();
        assert!(list_state_files(dir.path(), StateKind::Metadata)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_lists_only_matching_kind() {
        let dir = tempdir().unwrap();
        let state = state_dir(dir.path());
        fs::create_dir_all(&state).unwrap();
        for name in [
            "metadata-1",
            "metadata-12",
            "metadata-oops",
            "metadata-13.tmp",
            "shards-4",
            "README",
        ] {
            fs::write(state.join(name), b"x").unwrap();
        }
        fs::create_dir_all(state.join("metadata-99")).unwrap();

        let mut versions: Vec<u64> = list_state_files(dir.path(), StateKind::Metadata)
            .unwrap()
            .into_iter()
            .map(|f| f.version)
            .collect();
        versions.sort_unstable();
        assert_eq!(versions, vec![1, 12]);

        let shards = list_state_files(dir.path(), StateKind::StartedShards).unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].version, 4);
        assert_eq!(shards[0].kind, StateKind::StartedShards);
    }
}
