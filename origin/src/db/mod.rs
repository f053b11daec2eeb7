//! C1 -- the proprietary binary database and `.crate` file reader.

pub mod chunks;
pub mod crate_file;
pub mod database;
pub mod utf16;

pub use crate_file::{count_tracks, parse_crate_file};
pub use database::{parse_database, RawTrackEntry};

/// Canonical filename of the library database inside the database root
/// directory (e.g. `~/Music/_Serato_/database V2`).
pub const DATABASE_FILENAME: &str = "database V2";
