//! General-purpose audio tag extraction, used to seed `Track` fields that
//! the database doesn't carry (everything but `bpm`/`key`, which the
//! database always wins when present, per the indexing pipeline).

use std::path::Path;

use symphonia::core::formats::FormatReader;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta;
use symphonia::core::meta::MetadataReader as _;
use symphonia::default::formats::{FlacReader, IsoMp4Reader, OggReader};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagData {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<u32>,
    pub track_number: Option<u32>,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContainerKind {
    Flac,
    Ogg,
    Mp4,
    Mp3,
    Wav,
    Aiff,
}

impl ContainerKind {
    fn from_ext(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "flac" => Some(Self::Flac),
            "ogg" => Some(Self::Ogg),
            "m4a" | "aac" => Some(Self::Mp4),
            "mp3" => Some(Self::Mp3),
            "wav" => Some(Self::Wav),
            "aiff" => Some(Self::Aiff),
            _ => None,
        }
    }
}

/// Extract tags for `path`. Returns `TagData::default()` (all `None`) if
/// the file has an unrecognized extension or its tags cannot be parsed --
/// indexing continues with whatever the database or filename can supply.
pub fn read_tags(path: &Path) -> TagData {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let Some(kind) = ContainerKind::from_ext(ext) else {
        return TagData::default();
    };
    match kind {
        ContainerKind::Mp3 => read_id3(path),
        ContainerKind::Flac | ContainerKind::Ogg | ContainerKind::Mp4 => {
            read_symphonia(path, kind).unwrap_or_default()
        }
        // No general metadata container; duration is left to be filled by
        // a future decode-for-duration pass if ever needed -- out of
        // scope for library indexing (not read by the database either).
        ContainerKind::Wav | ContainerKind::Aiff => TagData::default(),
    }
}

fn read_id3(path: &Path) -> TagData {
    let tag = match id3::Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "no id3 tags");
            return TagData::default();
        }
    };
    TagData {
        title: tag.title().map(str::to_string),
        artist: tag.artist().map(str::to_string),
        album: tag.album().map(str::to_string),
        genre: tag.genre().map(str::to_string),
        year: tag.year().map(|y| y as u32).or_else(|| tag.date_recorded().map(|d| d.year as u32)),
        track_number: tag.track(),
        duration_seconds: tag.duration().map(|ms| ms as f64 / 1000.0),
    }
}

/// Extract the first embedded cover image for `path`, if the container
/// carries one. Called on demand from the `/api/artwork/:trackId` handler
/// rather than during indexing -- the database pass only reads path/bpm/
/// key (spec.md §1), and artwork bytes are too large to hold in every
/// `Track` in memory.
pub fn read_artwork(path: &Path) -> Option<(Vec<u8>, String)> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ContainerKind::from_ext(ext)? {
        ContainerKind::Mp3 => id3_artwork(path),
        kind @ (ContainerKind::Flac | ContainerKind::Ogg | ContainerKind::Mp4) => {
            symphonia_artwork(path, kind)
        }
        ContainerKind::Wav | ContainerKind::Aiff => None,
    }
}

fn id3_artwork(path: &Path) -> Option<(Vec<u8>, String)> {
    let tag = id3::Tag::read_from_path(path).ok()?;
    let picture = tag.pictures().next()?;
    Some((picture.data.clone(), picture.mime_type.clone()))
}

fn symphonia_artwork(path: &Path, kind: ContainerKind) -> Option<(Vec<u8>, String)> {
    let src = std::fs::File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());
    let fmt_opts = Default::default();
    let mut reader: Box<dyn FormatReader> = match kind {
        ContainerKind::Flac => Box::new(FlacReader::try_new(mss, &fmt_opts).ok()?),
        ContainerKind::Ogg => Box::new(OggReader::try_new(mss, &fmt_opts).ok()?),
        ContainerKind::Mp4 => Box::new(IsoMp4Reader::try_new(mss, &fmt_opts).ok()?),
        ContainerKind::Mp3 | ContainerKind::Wav | ContainerKind::Aiff => return None,
    };
    // First seems good enough; picking the "best" embedded image among
    // several would need real heuristics (size, `StandardVisualKey::FrontCover`).
    let visual = reader.metadata().current()?.visuals().first()?.clone();
    Some((visual.data.to_vec(), visual.media_type))
}

fn read_symphonia(path: &Path, kind: ContainerKind) -> anyhow::Result<TagData> {
    let src = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());
    let fmt_opts = Default::default();
    let mut reader: Box<dyn FormatReader> = match kind {
        ContainerKind::Flac => Box::new(FlacReader::try_new(mss, &fmt_opts)?),
        ContainerKind::Ogg => Box::new(OggReader::try_new(mss, &fmt_opts)?),
        ContainerKind::Mp4 => Box::new(IsoMp4Reader::try_new(mss, &fmt_opts)?),
        ContainerKind::Mp3 | ContainerKind::Wav | ContainerKind::Aiff => unreachable!(),
    };

    let duration_seconds = reader.tracks().first().and_then(|track| {
        let params = &track.codec_params;
        let n_frames = params.n_frames?;
        let rate = params.sample_rate? as f64;
        if rate > 0.0 {
            Some(n_frames as f64 / rate)
        } else {
            None
        }
    });

    let mut data = TagData {
        duration_seconds,
        ..Default::default()
    };

    if let Some(rev) = reader.metadata().current() {
        apply_tags(rev, &mut data);
    }
    Ok(data)
}

fn apply_tags(rev: &meta::MetadataRevision, data: &mut TagData) {
    use symphonia::core::meta::StandardTagKey::*;
    for tag in rev.tags() {
        let Some(key) = tag.std_key else { continue };
        let text = string_value(tag);
        match key {
            TrackTitle => data.title = text,
            Artist => data.artist = text,
            Album => data.album = text,
            Genre => data.genre = text,
            Date | OriginalDate => data.year = text.as_deref().and_then(parse_year),
            TrackNumber => data.track_number = text.as_deref().and_then(|s| s.parse().ok()),
            _ => (),
        }
    }
}

fn string_value(tag: &meta::Tag) -> Option<String> {
    if let meta::Value::String(ref s) = tag.value {
        Some(s.clone())
    } else {
        None
    }
}

fn parse_year(s: &str) -> Option<u32> {
    s.get(0..4).and_then(|y| y.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_yields_default() {
        let data = read_tags(Path::new("/does/not/exist.xyz"));
        assert_eq!(data, TagData::default());
    }

    #[test]
    fn parse_year_takes_leading_four_digits() {
        assert_eq!(parse_year("2001-01-01"), Some(2001));
        assert_eq!(parse_year("bad"), None);
    }

    #[test]
    fn missing_file_does_not_panic() {
        let data = read_tags(Path::new("/definitely/missing.mp3"));
        assert_eq!(data, TagData::default());
    }

    #[test]
    fn artwork_is_none_for_an_unrecognized_extension() {
        assert_eq!(read_artwork(Path::new("/does/not/exist.txt")), None);
    }

    #[test]
    fn artwork_is_none_for_a_missing_file() {
        assert_eq!(read_artwork(Path::new("/definitely/missing.mp3")), None);
    }

    #[test]
    fn artwork_is_none_without_an_embedded_picture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-art.mp3");
        std::fs::write(&path, b"not really an mp3").unwrap();
        assert_eq!(read_artwork(&path), None);
    }
}
