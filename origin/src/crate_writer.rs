//! C4 -- binary `.crate` file writer, using the same tag/length framing
//! `db::chunks` reads back.

use std::path::PathBuf;

use byteorder::{BigEndian, WriteBytesExt};
use chrono::Utc;
use thiserror::Error;

use crate::db::utf16;

const VERSION_PAYLOAD: &str = "1.0/Serato ScratchLive Crate";
const DEFAULT_SORT_COLUMN: &str = "bpm";
const DEFAULT_COLUMNS: &[(&str, u16)] = &[
    ("bpm", 0x30),
    ("year", 0x30),
    ("song", 0x30),
    ("playCount", 0x30),
    ("artist", 0xFA),
    ("genre", 0x30),
    ("length", 0x30),
];
const MAX_NAME_LEN: usize = 100;
const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '|', '?', '*'];

#[derive(Debug, Error)]
pub enum CrateWriterError {
    #[error("crate name must be non-empty, at most {MAX_NAME_LEN} characters, and contain none of <>:\"|?*")]
    InvalidName,
    #[error("crate writer is in read-only mode")]
    ReadOnly,
    #[error("crate not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn validate_name(name: &str) -> Result<(), CrateWriterError> {
    if name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name.chars().any(|c| FORBIDDEN_NAME_CHARS.contains(&c))
    {
        return Err(CrateWriterError::InvalidName);
    }
    Ok(())
}

fn chunk(tag: &[u8; 4], payload: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(tag);
    out.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(payload);
}

fn build_bytes(track_paths: &[String]) -> Vec<u8> {
    let mut out = Vec::new();

    chunk(b"vrsn", &utf16::encode(VERSION_PAYLOAD), &mut out);

    let mut sort_payload = Vec::new();
    let mut inner = Vec::new();
    chunk(b"tvcn", &utf16::encode(DEFAULT_SORT_COLUMN), &mut inner);
    sort_payload.extend_from_slice(&inner);
    sort_payload.push(0x01); // brev: reverse
    chunk(b"osrt", &sort_payload, &mut out);

    for (name, width) in DEFAULT_COLUMNS {
        let mut column = Vec::new();
        chunk(b"tvcn", &utf16::encode(name), &mut column);
        let mut width_bytes = Vec::new();
        width_bytes.write_u16::<BigEndian>(*width).unwrap();
        chunk(b"tvcw", &width_bytes, &mut column);
        chunk(b"ovct", &column, &mut out);
    }

    for path in track_paths {
        let mut track = Vec::new();
        chunk(b"ptrk", &utf16::encode(path), &mut track);
        chunk(b"otrk", &track, &mut out);
    }

    out
}

/// Manages the on-disk `.crate` files under `root`.
pub struct CrateWriter {
    root: PathBuf,
    read_only: bool,
}

impl CrateWriter {
    pub fn new(root: impl Into<PathBuf>, read_only: bool) -> Self {
        CrateWriter {
            root: root.into(),
            read_only,
        }
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.crate"))
    }

    fn check_writable(&self) -> Result<(), CrateWriterError> {
        if self.read_only {
            return Err(CrateWriterError::ReadOnly);
        }
        Ok(())
    }

    /// Back up the existing file (if any), write the new bytes to a
    /// `.tmp` sibling, then atomically rename it over the final path.
    async fn commit(&self, name: &str, bytes: Vec<u8>) -> Result<(), CrateWriterError> {
        self.check_writable()?;
        let target = self.path_for(name);

        if tokio::fs::metadata(&target).await.is_ok() {
            let stamp = Utc::now().to_rfc3339().replace(':', "");
            let backup = self.root.join(format!("{name}.crate.backup-{stamp}"));
            tokio::fs::copy(&target, &backup).await?;
        }

        let tmp = self.root.join(format!("{name}.crate.tmp"));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    /// Create a new, empty crate.
    pub async fn create(&self, name: &str) -> Result<(), CrateWriterError> {
        validate_name(name)?;
        self.commit(name, build_bytes(&[])).await
    }

    /// Add tracks (by file path) to an existing crate, de-duplicating by
    /// path equality against what's already there.
    pub async fn add_tracks(
        &self,
        name: &str,
        track_paths: &[String],
    ) -> Result<(), CrateWriterError> {
        validate_name(name)?;
        self.check_writable()?;
        let path = self.path_for(name);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(CrateWriterError::NotFound(name.to_string()));
        }
        let mut existing = crate::db::parse_crate_file(&path);
        for candidate in track_paths {
            if !existing.contains(candidate) {
                existing.push(candidate.clone());
            }
        }
        self.commit(name, build_bytes(&existing)).await
    }

    /// Remove a single track (by path) from a crate.
    pub async fn remove_track(
        &self,
        name: &str,
        track_path: &str,
    ) -> Result<(), CrateWriterError> {
        validate_name(name)?;
        self.check_writable()?;
        let path = self.path_for(name);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(CrateWriterError::NotFound(name.to_string()));
        }
        let existing = crate::db::parse_crate_file(&path);
        let remaining: Vec<String> = existing.into_iter().filter(|p| p != track_path).collect();
        self.commit(name, build_bytes(&remaining)).await
    }

    /// Back up and unlink a crate.
    pub async fn delete(&self, name: &str) -> Result<(), CrateWriterError> {
        validate_name(name)?;
        self.check_writable()?;
        let target = self.path_for(name);
        if tokio::fs::metadata(&target).await.is_err() {
            return Err(CrateWriterError::NotFound(name.to_string()));
        }
        let stamp = Utc::now().to_rfc3339().replace(':', "");
        let backup = self.root.join(format!("{name}.crate.backup-{stamp}"));
        tokio::fs::copy(&target, &backup).await?;
        tokio::fs::remove_file(&target).await?;
        Ok(())
    }
}

pub fn crate_id_from_name(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_was_dash = false;
        } else if !last_was_dash {
            slug.push('-');
            last_was_dash = true;
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_overlong_and_forbidden_names() {
        assert!(validate_name("").is_err());
        assert!(validate_name(&"a".repeat(101)).is_err());
        assert!(validate_name("bad:name").is_err());
        assert!(validate_name("good-name").is_ok());
    }

    #[test]
    fn builds_bytes_roundtrippable_by_the_reader() {
        let bytes = build_bytes(&["/music/a.mp3".to_string(), "/music/b.mp3".to_string()]);
        let chunks: Vec<_> = crate::db::chunks::Chunks::new(&bytes).collect();
        let otrk_count = chunks.iter().filter(|c| c.tag_str() == "otrk").count();
        assert_eq!(otrk_count, 2);
    }

    #[tokio::test]
    async fn create_then_add_then_remove_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CrateWriter::new(dir.path(), false);
        writer.create("My Crate").await.unwrap();
        let path = dir.path().join("My Crate.crate");
        assert!(path.exists());

        writer
            .add_tracks("My Crate", &["/music/a.mp3".to_string()])
            .await
            .unwrap();
        let tracks = crate::db::parse_crate_file(&path);
        assert_eq!(tracks, vec!["/music/a.mp3".to_string()]);

        writer.remove_track("My Crate", "/music/a.mp3").await.unwrap();
        assert!(crate::db::parse_crate_file(&path).is_empty());
    }

    #[tokio::test]
    async fn delete_leaves_a_timestamped_backup() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CrateWriter::new(dir.path(), false);
        writer.create("Gone").await.unwrap();
        writer.delete("Gone").await.unwrap();

        assert!(!dir.path().join("Gone.crate").exists());
        let has_backup = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("Gone.crate.backup-"));
        assert!(has_backup);
    }

    #[tokio::test]
    async fn read_only_rejects_mutations() {
        let dir = tempfile::tempdir().unwrap();
        let writer = CrateWriter::new(dir.path(), true);
        assert!(matches!(
            writer.create("Nope").await,
            Err(CrateWriterError::ReadOnly)
        ));
    }

    #[test]
    fn crate_id_is_a_url_slug() {
        assert_eq!(crate_id_from_name("House & Techno!"), "house-techno");
        assert_eq!(crate_id_from_name("Already-Slug"), "already-slug");
    }
}
