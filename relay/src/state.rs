//! Shared relay state: who's connected, and what's in flight for them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::pending::PendingRequests;

/// A connected origin desktop. `outgoing` is the writer-pump channel for
/// its socket; dropping the session's sender closes the socket.
pub struct DeviceSession {
    pub device_id: String,
    pub outgoing: mpsc::Sender<Message>,
    pub protocol: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub connected_since: Instant,
}

#[derive(Clone)]
pub struct DeviceStatus {
    pub connected: bool,
    pub protocol: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct DeviceRegistry {
    inner: Mutex<HashMap<String, DeviceSession>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device, evicting and returning any session it replaces
    /// (at most one session per device id, per spec.md §4.5).
    pub fn register(&self, session: DeviceSession) -> Option<DeviceSession> {
        self.inner
            .lock()
            .unwrap()
            .insert(session.device_id.clone(), session)
    }

    /// Remove a device's session only if it is still the one identified
    /// by `outgoing` -- guards against a stale disconnect handler racing
    /// a fresher registration for the same device id.
    pub fn remove_if_current(&self, device_id: &str, outgoing: &mpsc::Sender<Message>) {
        let mut map = self.inner.lock().unwrap();
        if let Some(existing) = map.get(device_id) {
            if existing.outgoing.same_channel(outgoing) {
                map.remove(device_id);
            }
        }
    }

    pub fn status(&self, device_id: &str) -> DeviceStatus {
        match self.inner.lock().unwrap().get(device_id) {
            Some(session) => DeviceStatus {
                connected: true,
                protocol: session.protocol.clone(),
                connected_at: Some(session.connected_at),
            },
            None => DeviceStatus {
                connected: false,
                protocol: None,
                connected_at: None,
            },
        }
    }

    pub fn outgoing(&self, device_id: &str) -> Option<mpsc::Sender<Message>> {
        self.inner
            .lock()
            .unwrap()
            .get(device_id)
            .map(|s| s.outgoing.clone())
    }

    pub fn connected_count(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub devices: Arc<DeviceRegistry>,
    pub pending: Arc<PendingRequests>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new() -> Self {
        AppState {
            devices: Arc::new(DeviceRegistry::new()),
            pending: Arc::new(PendingRequests::new()),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}
