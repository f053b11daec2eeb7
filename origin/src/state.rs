//! Shared state handed to every HTTP handler.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::crate_writer::CrateWriter;
use crate::library::LibraryIndex;
use crate::tunnel::TunnelHandle;

#[derive(Clone)]
pub struct AppState {
    pub index: Arc<LibraryIndex>,
    pub crate_writer: Arc<CrateWriter>,
    pub crates_root: PathBuf,
    pub tunnel: Arc<std::sync::Mutex<Option<TunnelHandle>>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: &Config, crates_root: PathBuf) -> Self {
        AppState {
            index: Arc::new(LibraryIndex::new()),
            crate_writer: Arc::new(CrateWriter::new(crates_root.clone(), config.read_only)),
            crates_root,
            tunnel: Arc::new(std::sync::Mutex::new(None)),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
