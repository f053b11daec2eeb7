//! Filesystem enumeration for one or more music roots.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::formats::is_audio_extension;

/// Name of the directory that holds the proprietary database; skipped
/// during scanning like any other internal-bookkeeping directory.
pub const DATABASE_ROOT_MARKER: &str = "_Serato_";

fn is_hidden(name: &OsStr) -> bool {
    name.to_str().map(|s| s.starts_with('.')).unwrap_or(false)
}

/// Recursively enumerate audio files under `root`, skipping hidden entries
/// and the database marker directory, and breaking symlink cycles by
/// tracking canonicalized real paths already visited.
pub fn scan_audio_files(root: &Path) -> Vec<PathBuf> {
    let mut visited = HashSet::new();
    let mut out = Vec::new();

    for entry in walkdir::WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name();
            if is_hidden(name) {
                return false;
            }
            if e.file_type().is_dir() && name == DATABASE_ROOT_MARKER {
                return false;
            }
            true
        })
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(error = %err, "error walking music root, skipping entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match path.canonicalize() {
            Ok(real) => {
                if !visited.insert(real) {
                    continue; // already seen via another symlink path: cycle broken
                }
            }
            Err(_) => continue, // broken symlink or race, skip
        }
        let Some(ext) = path.extension().and_then(OsStr::to_str) else {
            continue;
        };
        if is_audio_extension(ext) {
            out.push(path.to_path_buf());
        }
    }

    out.sort_by(|a, b| {
        natord::compare(&a.to_string_lossy(), &b.to_string_lossy()).then_with(|| a.cmp(b))
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_audio_files_and_skips_others() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.mp3"), b"x").unwrap();
        fs::write(dir.path().join("cover.jpg"), b"x").unwrap();
        let files = scan_audio_files(dir.path());
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("a.mp3"));
    }

    #[test]
    fn skips_hidden_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".hidden.mp3"), b"x").unwrap();
        let sub = dir.path().join(".git");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("b.mp3"), b"x").unwrap();
        assert!(scan_audio_files(dir.path()).is_empty());
    }

    #[test]
    fn skips_database_marker_directory() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join(DATABASE_ROOT_MARKER);
        fs::create_dir(&marker).unwrap();
        fs::write(marker.join("c.mp3"), b"x").unwrap();
        assert!(scan_audio_files(dir.path()).is_empty());
    }

    #[test]
    fn recurses_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("Artist/Album");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join("track.flac"), b"x").unwrap();
        let files = scan_audio_files(dir.path());
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn sorts_naturally() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["track10.mp3", "track2.mp3", "track1.mp3"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let files = scan_audio_files(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["track1.mp3", "track2.mp3", "track10.mp3"]);
    }
}
