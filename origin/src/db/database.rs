//! Reader for the library database: a flat sequence of tagged chunks at
//! the library root, scanned for top-level `otrk` track chunks.

use std::path::Path;

use super::chunks::{find_chunks, Chunks};
use super::utf16;
use crate::formats::is_audio_extension;

/// A single decoded database entry, before path resolution (C2).
#[derive(Debug, Clone, PartialEq)]
pub struct RawTrackEntry {
    pub path: String,
    pub bpm: Option<f64>,
    pub key: Option<String>,
}

/// Parse the library database at `path`. Never fails: I/O errors or parse
/// failures are logged at `warn!` and an empty list is returned, so the
/// caller (C2) can fall back to directory scanning.
pub fn parse_database(path: &Path) -> Vec<RawTrackEntry> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read library database");
            return Vec::new();
        }
    };
    parse_database_bytes(&bytes)
}

fn parse_database_bytes(bytes: &[u8]) -> Vec<RawTrackEntry> {
    let mut entries = Vec::new();
    for chunk in Chunks::new(bytes) {
        if &chunk.tag != b"otrk" {
            continue;
        }
        if let Some(entry) = decode_track_chunk(chunk.payload) {
            entries.push(entry);
        }
    }
    entries
}

fn decode_track_chunk(payload: &[u8]) -> Option<RawTrackEntry> {
    let mut path = find_chunks(payload, b"pfil")
        .next()
        .map(utf16::decode)
        .unwrap_or_default();
    if path.is_empty() {
        return None;
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }

    let ext = Path::new(&path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if !is_audio_extension(ext) {
        return None;
    }

    let bpm = find_chunks(payload, b"tbpm")
        .next()
        .map(utf16::decode)
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|b| b.is_finite());

    let key = find_chunks(payload, b"tkey")
        .next()
        .map(utf16::decode)
        .filter(|s| !s.is_empty());

    Some(RawTrackEntry { path, bpm, key })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(tag);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn otrk(fields: Vec<u8>) -> Vec<u8> {
        chunk(b"otrk", &fields)
    }

    #[test]
    fn decodes_path_bpm_key() {
        let mut fields = chunk(b"pfil", &utf16::encode("/music/track.mp3"));
        fields.extend(chunk(b"tbpm", &utf16::encode("128.0")));
        fields.extend(chunk(b"tkey", &utf16::encode("Am")));
        let buf = otrk(fields);

        let entries = parse_database_bytes(&buf);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/music/track.mp3");
        assert_eq!(entries[0].bpm, Some(128.0));
        assert_eq!(entries[0].key.as_deref(), Some("Am"));
    }

    #[test]
    fn prefixes_missing_leading_slash() {
        let fields = chunk(b"pfil", &utf16::encode("music/track.flac"));
        let entries = parse_database_bytes(&otrk(fields));
        assert_eq!(entries[0].path, "/music/track.flac");
    }

    #[test]
    fn rejects_non_audio_extensions() {
        let fields = chunk(b"pfil", &utf16::encode("/music/cover.jpg"));
        let entries = parse_database_bytes(&otrk(fields));
        assert!(entries.is_empty());
    }

    #[test]
    fn ignores_non_finite_bpm() {
        let mut fields = chunk(b"pfil", &utf16::encode("/music/track.wav"));
        fields.extend(chunk(b"tbpm", &utf16::encode("nan")));
        let entries = parse_database_bytes(&otrk(fields));
        assert_eq!(entries[0].bpm, None);
    }

    #[test]
    fn ignores_chunks_outside_otrk() {
        let buf = chunk(b"vrsn", b"hello");
        assert!(parse_database_bytes(&buf).is_empty());
    }

    #[test]
    fn missing_file_returns_empty_list_not_panic() {
        let entries = parse_database(Path::new("/nonexistent/path/to/database"));
        assert!(entries.is_empty());
    }

    #[test]
    fn unknown_field_tags_inside_otrk_are_skipped() {
        let mut fields = chunk(b"pfil", &utf16::encode("/music/track.mp3"));
        fields.extend(chunk(b"xxxx", b"future field, unknown to us"));
        let entries = parse_database_bytes(&otrk(fields));
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/music/track.mp3");
    }
}
