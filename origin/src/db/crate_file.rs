//! Reader for `.crate` files: same tag/length framing as the library
//! database, but the payload of interest is the `ptrk` path chunk nested
//! inside each top-level `otrk` wrapper (see `crate_writer` for the
//! writer that produces this exact layout).

use std::path::Path;

use super::chunks::{find_chunks, Chunks};
use super::utf16;

/// Parse a `.crate` file into its ordered list of track paths. Non-fatal:
/// I/O or parse failures are logged and an empty list is returned.
pub fn parse_crate_file(path: &Path) -> Vec<String> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read crate file");
            return Vec::new();
        }
    };
    parse_crate_bytes(&bytes)
}

fn parse_crate_bytes(bytes: &[u8]) -> Vec<String> {
    let mut paths = Vec::new();
    for outer in Chunks::new(bytes) {
        if &outer.tag != b"otrk" {
            continue;
        }
        if let Some(payload) = find_chunks(outer.payload, b"ptrk").next() {
            let decoded = utf16::decode(payload);
            if !decoded.is_empty() {
                paths.push(decoded);
            }
        }
    }
    paths
}

/// Count `ptrk` entries without decoding their UTF-16 payloads -- a
/// cheaper variant for callers that only need a track count (e.g. the
/// crates listing).
pub fn count_tracks(path: &Path) -> usize {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read crate file");
            return 0;
        }
    };
    Chunks::new(&bytes)
        .filter(|c| &c.tag == b"otrk")
        .filter(|c| find_chunks(c.payload, b"ptrk").next().is_some())
        .count()
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

    fn otrk_with_path(path: &str) -> Vec<u8> {
        let ptrk = chunk(b"ptrk", &utf16::encode(path));
        chunk(b"otrk", &ptrk)
    }

    #[test]
    fn extracts_paths_in_order() {
        let mut buf = otrk_with_path("/music/a.mp3");
        buf.extend(otrk_with_path("/music/b.flac"));
        let paths = parse_crate_bytes(&buf);
        assert_eq!(paths, vec!["/music/a.mp3", "/music/b.flac"]);
    }

    #[test]
    fn empty_crate_yields_no_paths() {
        let buf = chunk(b"vrsn", b"1.0/Serato ScratchLive Crate");
        assert!(parse_crate_bytes(&buf).is_empty());
    }

    #[test]
    fn count_matches_parse_len() {
        let mut buf = otrk_with_path("/a.mp3");
        buf.extend(otrk_with_path("/b.mp3"));
        buf.extend(otrk_with_path("/c.mp3"));
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("test.crate");
        std::fs::write(&file, &buf).unwrap();
        let count = count_tracks(&file);
        assert_eq!(count, 3);
        assert_eq!(count, parse_crate_bytes(&buf).len());
    }
}
