//! The audio extension / MIME-type table shared by the database reader
//! (which only keeps entries with a known extension) and the streamer
//! (which needs a MIME type to serve).

/// Extensions kept by the database reader, case-insensitively.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "aac", "m4a", "ogg", "aiff"];

pub fn is_audio_extension(ext: &str) -> bool {
    let lower = ext.to_ascii_lowercase();
    AUDIO_EXTENSIONS.contains(&lower.as_str())
}

/// MIME type by extension; unknown extensions fall back to
/// `application/octet-stream`.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "aac" => "audio/aac",
        "m4a" => "audio/mp4",
        "ogg" => "audio/ogg",
        "aiff" => "audio/aiff",
        _ => "application/octet-stream",
    }
}

/// `format` field stored on a `Track` -- the bare lowercase extension.
pub fn format_label(ext: &str) -> String {
    ext.to_ascii_lowercase()
}
