//! Tag/length chunk framing shared by the library database and `.crate`
//! files: a 4-byte ASCII tag, a big-endian `u32` length, then that many
//! payload bytes.

use nom::bytes::complete::take;
use nom::number::complete::be_u32;
use nom::sequence::tuple;
use nom::IResult;

/// One decoded chunk: its 4-byte tag and its payload slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub tag: [u8; 4],
    pub payload: &'a [u8],
}

impl<'a> Chunk<'a> {
    pub fn tag_str(&self) -> &str {
        std::str::from_utf8(&self.tag).unwrap_or("????")
    }
}

fn one_chunk(input: &[u8]) -> IResult<&[u8], Chunk<'_>> {
    let (input, (tag, len)) = tuple((take(4usize), be_u32))(input)?;
    let (input, payload) = take(len as usize)(input)?;
    let tag: [u8; 4] = tag.try_into().expect("take(4) yields exactly 4 bytes");
    Ok((input, Chunk { tag, payload }))
}

/// Iterates top-level chunks over a buffer. Stops (without erroring) at the
/// first malformed or truncated chunk header, or a length field that would
/// overrun the remaining buffer -- this is the reader's "non-fatal, stop at
/// the last valid offset" behavior from spec.
pub struct Chunks<'a> {
    remaining: &'a [u8],
    stopped: bool,
}

impl<'a> Chunks<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Chunks {
            remaining: buf,
            stopped: false,
        }
    }
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped || self.remaining.is_empty() {
            return None;
        }
        match one_chunk(self.remaining) {
            Ok((rest, chunk)) => {
                self.remaining = rest;
                Some(chunk)
            }
            Err(_) => {
                self.stopped = true;
                None
            }
        }
    }
}

/// Recursively walk `payload` for nested chunks whose tag matches `want`,
/// used to scan inside an outer chunk (e.g. fields inside an `otrk`).
pub fn find_chunks<'a>(payload: &'a [u8], want: &[u8; 4]) -> impl Iterator<Item = &'a [u8]> {
    Chunks::new(payload).filter_map(move |c| (c.tag == *want).then_some(c.payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(tag);
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn walks_multiple_top_level_chunks() {
        let mut buf = build_chunk(b"vrsn", b"1.0");
        buf.extend(build_chunk(b"otrk", b"inner"));
        let chunks: Vec<_> = Chunks::new(&buf).collect();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].tag_str(), "vrsn");
        assert_eq!(chunks[0].payload, b"1.0");
        assert_eq!(chunks[1].tag_str(), "otrk");
        assert_eq!(chunks[1].payload, b"inner");
    }

    #[test]
    fn stops_on_truncated_header() {
        let mut buf = build_chunk(b"vrsn", b"1.0");
        buf.extend_from_slice(b"ptr"); // 3 bytes, not enough for a tag
        let chunks: Vec<_> = Chunks::new(&buf).collect();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn stops_on_length_overrun() {
        let mut buf = build_chunk(b"vrsn", b"1.0");
        buf.extend_from_slice(b"otrk");
        buf.extend_from_slice(&1000u32.to_be_bytes()); // declares far more than remains
        buf.extend_from_slice(b"short");
        let chunks: Vec<_> = Chunks::new(&buf).collect();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn empty_buffer_yields_no_chunks() {
        assert_eq!(Chunks::new(&[]).count(), 0);
    }

    #[test]
    fn find_chunks_filters_by_tag() {
        let mut inner = build_chunk(b"pfil", b"/a/b.mp3");
        inner.extend(build_chunk(b"tbpm", b"128.0"));
        inner.extend(build_chunk(b"tkey", b"Am"));
        let found: Vec<_> = find_chunks(&inner, b"tbpm").collect();
        assert_eq!(found, vec![b"128.0".as_slice()]);
    }
}
