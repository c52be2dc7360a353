//! Per-endpoint monitoring statistics.
//!
//! Counters are lock-free and every update is mirrored to the `metrics`
//! facade, so a Prometheus recorder installed through `hermes-telemetry`
//! sees the same numbers as [`EndpointStats::snapshot`].

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use hermes_telemetry::metrics as telemetry;
use serde::Serialize;

/// Live counters for one endpoint.
#[derive(Debug)]
pub struct EndpointStats {
    endpoint: String,
    open_sessions: AtomicUsize,
    max_open_sessions: AtomicUsize,
    total_opened: AtomicU64,
    text_received: AtomicU64,
    binary_received: AtomicU64,
    pong_received: AtomicU64,
    ping_received: AtomicU64,
    messages_sent: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    errors: DashMap<&'static str, u64>,
}

/// Point-in-time copy of [`EndpointStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointStatsSnapshot {
    /// Endpoint path template.
    pub endpoint: String,
    /// Sessions open right now.
    pub open_sessions: usize,
    /// Highest number of concurrently open sessions.
    pub max_open_sessions: usize,
    /// Sessions opened since deployment.
    pub total_opened: u64,
    /// Text messages received.
    pub text_received: u64,
    /// Binary messages received.
    pub binary_received: u64,
    /// Pong frames received.
    pub pong_received: u64,
    /// Ping frames received.
    pub ping_received: u64,
    /// Messages sent.
    pub messages_sent: u64,
    /// Payload bytes received.
    pub bytes_received: u64,
    /// Payload bytes sent.
    pub bytes_sent: u64,
    /// Errors by kind.
    pub errors: BTreeMap<String, u64>,
}

impl EndpointStats {
    /// Zeroed counters for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            open_sessions: AtomicUsize::new(0),
            max_open_sessions: AtomicUsize::new(0),
            total_opened: AtomicU64::new(0),
            text_received: AtomicU64::new(0),
            binary_received: AtomicU64::new(0),
            pong_received: AtomicU64::new(0),
            ping_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            errors: DashMap::new(),
        }
    }

    /// Endpoint path template.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Sessions open right now.
    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::Acquire)
    }

    /// Reserve a session slot unless `limit` sessions are already open.
    ///
    /// Returns the new open count, or `None` when the limit is reached.
    pub fn try_session_opened(&self, limit: Option<usize>) -> Option<usize> {
        let previous = self
            .open_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| match limit {
                Some(max) if open >= max => None,
                _ => Some(open + 1),
            })
            .ok()?;
        let open = previous + 1;
        self.max_open_sessions.fetch_max(open, Ordering::AcqRel);
        self.total_opened.fetch_add(1, Ordering::Relaxed);
        telemetry::record_session_opened(&self.endpoint);
        Some(open)
    }

    /// Record a closed session.
    pub fn session_closed(&self, code: u16) {
        let _ = self
            .open_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| open.checked_sub(1));
        telemetry::record_session_closed(&self.endpoint, code);
    }

    /// Record an inbound message or control frame.
    pub fn message_received(&self, kind: &'static str, size: usize) {
        let counter = match kind {
            "text" => &self.text_received,
            "binary" => &self.binary_received,
            "pong" => &self.pong_received,
            "ping" => &self.ping_received,
            _ => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(size as u64, Ordering::Relaxed);
        telemetry::record_message_received(&self.endpoint, kind, size);
    }

    /// Record an outbound message.
    pub fn message_sent(&self, kind: &'static str, size: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(size as u64, Ordering::Relaxed);
        telemetry::record_message_sent(&self.endpoint, kind, size);
    }

    /// Record an error delivered to the endpoint.
    pub fn error(&self, kind: &'static str) {
        *self.errors.entry(kind).or_insert(0) += 1;
        telemetry::record_error(&self.endpoint, kind);
    }

    /// Copy the counters.
    pub fn snapshot(&self) -> EndpointStatsSnapshot {
        EndpointStatsSnapshot {
            endpoint: self.endpoint.clone(),
            open_sessions: self.open_sessions(),
            max_open_sessions: self.max_open_sessions.load(Ordering::Acquire),
            total_opened: self.total_opened.load(Ordering::Relaxed),
            text_received: self.text_received.load(Ordering::Relaxed),
            binary_received: self.binary_received.load(Ordering::Relaxed),
            pong_received: self.pong_received.load(Ordering::Relaxed),
            ping_received: self.ping_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            errors: self
                .errors
                .iter()
                .map(|entry| ((*entry.key()).to_string(), *entry.value()))
                .collect(),
        }
    }
}
