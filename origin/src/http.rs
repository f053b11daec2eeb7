//! Origin's HTTP API (spec.md §6's first table).

use std::path::PathBuf;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;

use protocol::dto::{
    CrateDto, CrateWithTracksDto, IndexingPhase, LibraryPageDto, LibraryStatusDto, TrackDto,
};

use crate::crate_writer::crate_id_from_name;
use crate::error::OriginError;
use crate::library::Track;
use crate::state::AppState;
use crate::streamer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/library", get(library_page))
        .route("/api/library/status", get(library_status))
        .route("/api/library/:trackId", get(library_track))
        .route("/api/crates", get(list_crates).post(create_crate))
        .route(
            "/api/crates/:crateId",
            get(get_crate).delete(delete_crate),
        )
        .route("/api/crates/:crateId/tracks", post(add_tracks))
        .route(
            "/api/crates/:crateId/tracks/:trackId",
            delete(remove_track),
        )
        .route("/api/stream/:trackId", get(stream_track))
        .route("/api/artwork/:trackId", get(artwork))
        .route("/api/search", get(search))
        .with_state(state)
}

fn track_dto(track: &Track) -> TrackDto {
    TrackDto {
        id: track.id.clone(),
        title: track.title.clone(),
        artist: track.artist.clone(),
        album: track.album.clone(),
        genre: track.genre.clone(),
        year: track.year,
        duration_seconds: track.duration_seconds,
        bpm: track.bpm,
        key: track.key.clone(),
        file_size: track.file_size,
        format: track.format.clone(),
        added_at: track.added_at.to_rfc3339(),
    }
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime": state.uptime_seconds(),
    }))
}

#[derive(Debug, Deserialize)]
struct LibraryQuery {
    search: Option<String>,
    #[serde(rename = "sortBy")]
    sort_by: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

async fn library_page(
    State(state): State<AppState>,
    Query(query): Query<LibraryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(100).min(1000);
    let offset = query.offset.unwrap_or(0);

    let mut tracks: Vec<Track> = match &state.index.tracks() {
        Some(all) => match &query.search {
            Some(search) if !search.is_empty() => {
                state.index.search(search, usize::MAX)
            }
            _ => all.values().cloned().collect(),
        },
        None => Vec::new(),
    };

    match query.sort_by.as_deref() {
        Some("artist") => tracks.sort_by(|a, b| a.artist.cmp(&b.artist)),
        Some("album") => tracks.sort_by(|a, b| a.album.cmp(&b.album)),
        Some("duration") => {
            tracks.sort_by(|a, b| a.duration_seconds.partial_cmp(&b.duration_seconds).unwrap())
        }
        Some("addedAt") => tracks.sort_by(|a, b| a.added_at.cmp(&b.added_at)),
        _ => tracks.sort_by(|a, b| a.title.cmp(&b.title)),
    }

    let total = tracks.len();
    let page: Vec<TrackDto> = tracks
        .into_iter()
        .skip(offset)
        .take(limit)
        .map(|t| track_dto(&t))
        .collect();

    Json(LibraryPageDto {
        tracks: page,
        total,
        limit,
        offset,
    })
}

async fn library_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.index.status();
    let message = status.error.clone().or_else(|| {
        (status.phase != IndexingPhase::Complete).then(|| "indexing in progress".to_string())
    });
    Json(LibraryStatusDto {
        phase: status.phase,
        tracks_resolved: status.track_count,
        tracks_total: None,
        message,
    })
}

async fn library_track(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
) -> Result<Json<TrackDto>, OriginError> {
    state
        .index
        .get(&track_id)
        .map(|t| Json(track_dto(&t)))
        .ok_or(OriginError::TrackNotFound)
}

fn crate_files(root: &std::path::Path) -> Vec<(String, PathBuf)> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if ext == "crate" {
            out.push((stem.to_string(), path));
        }
    }
    out
}

fn find_crate(root: &std::path::Path, crate_id: &str) -> Option<(String, PathBuf)> {
    crate_files(root)
        .into_iter()
        .find(|(name, _)| crate_id_from_name(name) == crate_id)
}

async fn list_crates(State(state): State<AppState>) -> impl IntoResponse {
    let crates: Vec<CrateDto> = crate_files(&state.crates_root)
        .into_iter()
        .map(|(name, path)| CrateDto {
            id: crate_id_from_name(&name),
            track_count: crate::db::count_tracks(&path),
            name,
        })
        .collect();
    Json(crates)
}

async fn get_crate(
    State(state): State<AppState>,
    Path(crate_id): Path<String>,
) -> Result<Json<CrateWithTracksDto>, OriginError> {
    let (name, path) = find_crate(&state.crates_root, &crate_id).ok_or(OriginError::CrateNotFound)?;
    let paths = crate::db::parse_crate_file(&path);
    let tracks: Vec<TrackDto> = paths
        .iter()
        .filter_map(|p| {
            state
                .index
                .tracks()?
                .values()
                .find(|t| t.file_path.to_string_lossy() == *p)
                .map(|t| track_dto(t))
        })
        .collect();
    Ok(Json(CrateWithTracksDto {
        id: crate_id,
        name,
        tracks,
    }))
}

#[derive(Debug, Deserialize)]
struct CreateCrateBody {
    name: String,
}

async fn create_crate(
    State(state): State<AppState>,
    Json(body): Json<CreateCrateBody>,
) -> Result<Response, OriginError> {
    if find_crate(&state.crates_root, &crate_id_from_name(&body.name)).is_some() {
        return Err(OriginError::CrateAlreadyExists);
    }
    state.crate_writer.create(&body.name).await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!({"name": body.name}))).into_response())
}

#[derive(Debug, Deserialize)]
struct AddTracksBody {
    #[serde(rename = "trackIds")]
    track_ids: Vec<String>,
}

async fn add_tracks(
    State(state): State<AppState>,
    Path(crate_id): Path<String>,
    Json(body): Json<AddTracksBody>,
) -> Result<StatusCode, OriginError> {
    let (name, _) = find_crate(&state.crates_root, &crate_id).ok_or(OriginError::CrateNotFound)?;
    let tracks = state.index.tracks();
    let paths: Vec<String> = body
        .track_ids
        .iter()
        .filter_map(|id| {
            tracks
                .as_ref()
                .and_then(|t| t.get(id))
                .map(|t| t.file_path.to_string_lossy().to_string())
        })
        .collect();
    state.crate_writer.add_tracks(&name, &paths).await?;
    Ok(StatusCode::OK)
}

async fn remove_track(
    State(state): State<AppState>,
    Path((crate_id, track_id)): Path<(String, String)>,
) -> Result<StatusCode, OriginError> {
    let (name, _) = find_crate(&state.crates_root, &crate_id).ok_or(OriginError::CrateNotFound)?;
    let track_path = state
        .index
        .get(&track_id)
        .map(|t| t.file_path.to_string_lossy().to_string());
    let Some(track_path) = track_path else {
        return Err(OriginError::TrackNotFound);
    };
    state.crate_writer.remove_track(&name, &track_path).await?;
    Ok(StatusCode::OK)
}

async fn delete_crate(
    State(state): State<AppState>,
    Path(crate_id): Path<String>,
) -> Result<StatusCode, OriginError> {
    let (name, _) = find_crate(&state.crates_root, &crate_id).ok_or(OriginError::CrateNotFound)?;
    state.crate_writer.delete(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn header_str<'a>(headers: &'a HeaderMap, name: header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn stream_track(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, OriginError> {
    let response = streamer::stream(
        &state.index,
        &track_id,
        header_str(&headers, header::RANGE),
        header_str(&headers, header::IF_NONE_MATCH),
        header_str(&headers, header::IF_MODIFIED_SINCE),
    )
    .await?;

    match response {
        streamer::StreamResponse::NotModified { etag, last_modified } => Ok(Response::builder()
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, etag)
            .header(header::LAST_MODIFIED, last_modified)
            .body(axum::body::Body::empty())
            .expect("valid response")),
        streamer::StreamResponse::Ok(outcome) => {
            let mut response = Response::builder()
                .status(outcome.status)
                .header(header::CONTENT_TYPE, outcome.mime)
                .header(header::ETAG, &outcome.etag)
                .header(header::LAST_MODIFIED, &outcome.last_modified)
                .header(header::CACHE_CONTROL, "public, max-age=3600");
            if outcome.accept_ranges {
                response = response.header(header::ACCEPT_RANGES, "bytes");
            }
            if let Some(len) = outcome.content_length {
                response = response.header(header::CONTENT_LENGTH, len);
            }
            if let Some(range) = &outcome.content_range {
                response = response.header(header::CONTENT_RANGE, range);
            }
            Ok(response.body(outcome.body).expect("valid response"))
        }
    }
}

/// Extracts the track's first embedded cover image on demand (id3 `APIC`
/// frames for MP3, Symphonia's `visuals()` for everything else Symphonia
/// reads) and serves it directly. Decoding runs in `spawn_blocking` since
/// neither `id3` nor `symphonia` are async, same as `library::tags::read_tags`
/// during indexing.
async fn artwork(
    State(state): State<AppState>,
    Path(track_id): Path<String>,
) -> Result<Response, OriginError> {
    let track = state.index.get(&track_id).ok_or(OriginError::TrackNotFound)?;
    let path = track.file_path.clone();
    let found = tokio::task::spawn_blocking(move || crate::library::read_artwork(&path))
        .await
        .unwrap_or(None);
    let (bytes, mime) = found.ok_or(OriginError::ArtworkNotFound)?;

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime)
        .header(header::CACHE_CONTROL, "public, max-age=3600")
        .body(axum::body::Body::from(bytes))
        .expect("valid response"))
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    q: Option<String>,
    field: Option<String>,
}

async fn search(State(state): State<AppState>, Query(query): Query<SearchQuery>) -> impl IntoResponse {
    let Some(q) = query.q.filter(|q| !q.is_empty()) else {
        return Json(Vec::<TrackDto>::new());
    };
    let field = query.field.as_deref().unwrap_or("all");
    let needle = q.to_lowercase();

    let Some(tracks) = state.index.tracks() else {
        return Json(Vec::new());
    };
    let matches: Vec<TrackDto> = tracks
        .values()
        .filter(|t| match field {
            "title" => t.title.to_lowercase().contains(&needle),
            "artist" => t.artist.to_lowercase().contains(&needle),
            "album" => t.album.to_lowercase().contains(&needle),
            _ => {
                t.title.to_lowercase().contains(&needle)
                    || t.artist.to_lowercase().contains(&needle)
                    || t.album.to_lowercase().contains(&needle)
            }
        })
        .map(track_dto)
        .collect();
    Json(matches)
}
