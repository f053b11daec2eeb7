//! The cloud relay: the relay half of C5, terminating mobile HTTPS and
//! multiplexing requests onto each origin's outbound WebSocket tunnel.

pub mod config;
pub mod error;
pub mod http;
pub mod pending;
pub mod state;
pub mod ws;

use axum::Router;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    http::router(state.clone()).merge(ws::router(state))
}
