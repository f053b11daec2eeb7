//! The in-memory library index: orchestrates a scan + database parse +
//! resolution pass and publishes the result for lock-free reads.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwapOption;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use tokio::sync::watch;

use crate::db::{parse_database, RawTrackEntry};
use crate::library::resolver::{
    FileIndex, HistoricalEntry, IndexedFile, ResolverConfig, DEFAULT_CONCURRENCY,
};
use crate::library::scan::scan_audio_files;
use crate::library::tags::read_tags;
use crate::library::track::{track_id, IdentityFields, Track};
use protocol::dto::IndexingPhase;

#[derive(Debug, Clone)]
pub struct IndexConfig {
    pub roots: Vec<PathBuf>,
    pub database_path: Option<PathBuf>,
    pub concurrency: usize,
    /// Require all checkable fields (artist/title/duration) to match during
    /// filename-based path resolution instead of the spec's lenient 2-of-3
    /// fallback. See `resolver::ResolverConfig`.
    pub resolver_strict: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            roots: Vec::new(),
            database_path: None,
            concurrency: DEFAULT_CONCURRENCY,
            resolver_strict: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LibraryStatus {
    pub phase: IndexingPhase,
    pub track_count: usize,
    pub error: Option<String>,
}

/// How often a progress event is emitted while resolving tracks during an
/// index pass (spec.md §4.2: "on every ≈100 resolved tracks").
const PROGRESS_EVENT_INTERVAL: usize = 100;

struct InFlight {
    tx: watch::Sender<IndexingPhase>,
    rx: watch::Receiver<IndexingPhase>,
}

enum Claim {
    Join(watch::Receiver<IndexingPhase>),
    Owner(watch::Sender<IndexingPhase>),
}

pub struct LibraryIndex {
    phase: Mutex<IndexingPhase>,
    error: Mutex<Option<String>>,
    /// Insertion-ordered so `search`/`tracks` preserve the order tracks were
    /// built in (spec.md §4.2: "Search ... returns tracks in insertion
    /// order"), which a `HashMap` cannot offer.
    published: ArcSwapOption<IndexMap<String, Track>>,
    file_index: ArcSwapOption<FileIndex>,
    running: Mutex<Option<InFlight>>,
    /// Tracks resolved so far in the in-progress pass; read by `status()`
    /// while `published` still reflects the previous (or no) index.
    resolved_count: AtomicUsize,
}

impl Default for LibraryIndex {
    fn default() -> Self {
        LibraryIndex {
            phase: Mutex::new(IndexingPhase::Idle),
            error: Mutex::new(None),
            published: ArcSwapOption::from(None),
            file_index: ArcSwapOption::from(None),
            running: Mutex::new(None),
            resolved_count: AtomicUsize::new(0),
        }
    }
}

impl LibraryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> LibraryStatus {
        let phase = *self.phase.lock().unwrap();
        let track_count = match phase {
            IndexingPhase::Scanning => self.resolved_count.load(Ordering::Relaxed),
            _ => self
                .published
                .load()
                .as_ref()
                .map(|t| t.len())
                .unwrap_or(0),
        };
        LibraryStatus {
            phase,
            track_count,
            error: self.error.lock().unwrap().clone(),
        }
    }

    pub fn tracks(&self) -> Option<Arc<IndexMap<String, Track>>> {
        self.published.load_full()
    }

    pub fn get(&self, track_id: &str) -> Option<Track> {
        self.published
            .load()
            .as_ref()
            .and_then(|tracks| tracks.get(track_id).cloned())
    }

    /// Re-run path resolution for a track whose verified path has gone
    /// missing since the last index pass, using the same `FileIndex`
    /// built during that pass.
    pub fn reresolve(&self, track: &Track) -> Option<PathBuf> {
        let file_index = self.file_index.load_full()?;
        let historical = HistoricalEntry {
            path: track.file_path.to_string_lossy().to_string(),
            artist: Some(track.artist.clone()),
            title: Some(track.title.clone()),
            album: Some(track.album.clone()),
            track_number: track.track_number,
            duration_seconds: Some(track.duration_seconds),
        };
        file_index.resolve(&historical)
    }

    /// Case-folded linear substring search over title/artist/album.
    pub fn search(&self, query: &str, limit: usize) -> Vec<Track> {
        let Some(tracks) = self.published.load_full() else {
            return Vec::new();
        };
        let needle = query.to_lowercase();
        tracks
            .values()
            .filter(|t| {
                t.title.to_lowercase().contains(&needle)
                    || t.artist.to_lowercase().contains(&needle)
                    || t.album.to_lowercase().contains(&needle)
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// Run a full index pass. Concurrent callers while a pass is already
    /// running await that same pass's completion instead of starting
    /// their own -- an index rebuild is never duplicated in-flight.
    pub async fn parse_library(&self, config: IndexConfig) {
        let claim = {
            let mut guard = self.running.lock().unwrap();
            let join = guard.as_ref().and_then(|flight| {
                let phase = *flight.rx.borrow();
                if matches!(phase, IndexingPhase::Complete | IndexingPhase::Error) {
                    None
                } else {
                    Some(flight.rx.clone())
                }
            });
            match join {
                Some(rx) => Claim::Join(rx),
                None => {
                    let (tx, rx) = watch::channel(IndexingPhase::ParsingDatabase);
                    *guard = Some(InFlight {
                        tx: tx.clone(),
                        rx,
                    });
                    Claim::Owner(tx)
                }
            }
        };

        match claim {
            Claim::Join(mut rx) => {
                while !matches!(*rx.borrow(), IndexingPhase::Complete | IndexingPhase::Error) {
                    if rx.changed().await.is_err() {
                        break;
                    }
                }
            }
            Claim::Owner(tx) => self.run_owned(config, tx).await,
        }
    }

    async fn run_owned(&self, config: IndexConfig, tx: watch::Sender<IndexingPhase>) {
        self.resolved_count.store(0, Ordering::Relaxed);
        self.set_phase(IndexingPhase::ParsingDatabase, &tx);
        let db_entries: Vec<RawTrackEntry> = match &config.database_path {
            Some(path) => parse_database(path),
            None => Vec::new(),
        };

        self.set_phase(IndexingPhase::Scanning, &tx);
        let mut files = Vec::new();
        for root in &config.roots {
            files.extend(scan_audio_files(root));
        }

        let concurrency = config.concurrency.max(1);
        // `buffer_unordered` completes futures out of submission order, so
        // each one carries its original scan-order index through and the
        // results are sorted back into that order afterwards -- the
        // published index's insertion order (spec.md §4.2's "returns
        // tracks in insertion order") follows the filesystem scan, not
        // whichever file's metadata/tags happened to resolve first.
        let resolved_counter = Arc::new(AtomicUsize::new(0));
        let mut built: Vec<(usize, PathBuf, Track)> = stream::iter(files.into_iter().enumerate())
            .map(|(position, path)| {
                let resolved_counter = resolved_counter.clone();
                async move {
                    let meta = tokio::fs::metadata(&path).await.ok();
                    let path_for_tags = path.clone();
                    let tags = tokio::task::spawn_blocking(move || read_tags(&path_for_tags))
                        .await
                        .unwrap_or_default();
                    let track = build_track(&path, meta.map(|m| m.len()).unwrap_or(0), tags);
                    let resolved = resolved_counter.fetch_add(1, Ordering::Relaxed) + 1;
                    (position, path, track, resolved)
                }
            })
            .buffer_unordered(concurrency)
            .map(|(position, path, track, resolved)| {
                self.resolved_count.store(resolved, Ordering::Relaxed);
                if resolved % PROGRESS_EVENT_INTERVAL == 0 {
                    tracing::debug!(resolved, "indexing progress");
                }
                (position, path, track)
            })
            .collect()
            .await;
        built.sort_by_key(|(position, _, _)| *position);
        let built: Vec<(PathBuf, Track)> = built.into_iter().map(|(_, p, t)| (p, t)).collect();

        let indexed: Vec<IndexedFile> = built
            .iter()
            .map(|(path, track)| IndexedFile {
                path: path.clone(),
                artist: track.artist.clone(),
                title: track.title.clone(),
                album: track.album.clone(),
                track_number: track.track_number,
                duration_seconds: track.duration_seconds,
            })
            .collect();
        let file_index = FileIndex::build_with_config(
            indexed,
            ResolverConfig {
                strict: config.resolver_strict,
            },
        );

        let mut by_path: IndexMap<PathBuf, Track> = built.into_iter().collect();
        let mut tracks: IndexMap<String, Track> = IndexMap::new();

        for entry in &db_entries {
            let historical = HistoricalEntry {
                path: entry.path.clone(),
                ..Default::default()
            };
            let Some(resolved) = file_index.resolve(&historical) else {
                continue;
            };
            if let Some(track) = by_path.get_mut(&resolved) {
                if entry.bpm.is_some() {
                    track.bpm = entry.bpm;
                }
                if entry.key.is_some() {
                    track.key = entry.key.clone();
                }
            }
        }

        for track in by_path.into_values() {
            tracks.insert(track.id.clone(), track);
        }

        self.published.store(Some(Arc::new(tracks)));
        self.file_index.store(Some(Arc::new(file_index)));
        self.set_phase(IndexingPhase::Complete, &tx);
    }

    fn set_phase(&self, phase: IndexingPhase, tx: &watch::Sender<IndexingPhase>) {
        *self.phase.lock().unwrap() = phase;
        let _ = tx.send(phase);
    }
}

fn build_track(path: &Path, file_size: u64, tags: crate::library::tags::TagData) -> Track {
    let title = tags
        .title
        .unwrap_or_else(|| filename_stem(path));
    let artist = tags.artist.unwrap_or_default();
    let album = tags.album.unwrap_or_default();
    let duration_seconds = tags.duration_seconds.unwrap_or(0.0);
    let id = track_id(IdentityFields {
        artist: &artist,
        title: &title,
        album: &album,
        track_number: tags.track_number,
        duration_seconds,
    });
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let format = crate::formats::format_label(ext);

    Track {
        id,
        file_path: path.to_path_buf(),
        title,
        artist,
        album,
        genre: tags.genre.unwrap_or_default(),
        year: tags.year,
        duration_seconds,
        bpm: None,
        key: None,
        file_size,
        format,
        added_at: chrono::Utc::now(),
        track_number: tags.track_number,
    }
}

fn filename_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("Unknown")
        .to_string()
}
