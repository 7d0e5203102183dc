//! Observability and Metrics
//!
//! Counters for the mux transport, the ingress mailbox and the connection registry.
//!
//! Uses atomic counters for thread-safe metrics collection. A single [`Metrics`] is
//! created by the application and shared as `Arc<Metrics>` with every component that
//! records into it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

/// Metrics collector for transport and game-tick operations
#[derive(Debug)]
pub struct Metrics {
    /// Total connections accepted
    pub connections_total: AtomicU64,
    /// Currently open connections
    pub connections_active: AtomicU64,
    /// Mux packets decoded from clients
    pub packets_received: AtomicU64,
    /// Mux packets written to clients
    pub packets_sent: AtomicU64,
    /// Message envelopes received
    pub messages_received: AtomicU64,
    /// Message envelopes sent
    pub messages_sent: AtomicU64,
    /// Total bytes received
    pub bytes_received: AtomicU64,
    /// Total bytes sent
    pub bytes_sent: AtomicU64,
    /// Inputs rejected by validation (connection terminated)
    pub validation_failures: AtomicU64,
    /// Protocol anomalies logged without disconnecting
    pub protocol_anomalies: AtomicU64,
    /// Sessions admitted into a game
    pub sessions_admitted: AtomicU64,
    /// Sessions evicted from a game
    pub sessions_evicted: AtomicU64,
    /// Game ticks processed
    pub ticks: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            connections_total: AtomicU64::new(0),
            connections_active: AtomicU64::new(0),
            packets_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
            messages_sent: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            validation_failures: AtomicU64::new(0),
            protocol_anomalies: AtomicU64::new(0),
            sessions_admitted: AtomicU64::new(0),
            sessions_evicted: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a new connection
    pub fn connection_established(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection closed
    pub fn connection_closed(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an inbound mux packet and the envelopes it carried
    pub fn packet_received(&self, message_count: u64) {
        self.packets_received.fetch_add(1, Ordering::Relaxed);
        self.messages_received
            .fetch_add(message_count, Ordering::Relaxed);
    }

    /// Record an outbound mux packet and the envelopes it carried
    pub fn packet_sent(&self, message_count: u64) {
        self.packets_sent.fetch_add(1, Ordering::Relaxed);
        self.messages_sent.fetch_add(message_count, Ordering::Relaxed);
    }

    pub fn bytes_received(&self, byte_count: u64) {
        self.bytes_received.fetch_add(byte_count, Ordering::Relaxed);
    }

    pub fn bytes_sent(&self, byte_count: u64) {
        self.bytes_sent.fetch_add(byte_count, Ordering::Relaxed);
    }

    /// Record input that failed validation
    pub fn validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a logged, non-fatal protocol anomaly
    pub fn protocol_anomaly(&self) {
        self.protocol_anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_admitted(&self) {
        self.sessions_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn session_evicted(&self) {
        self.sessions_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_total: self.connections_total.load(Ordering::Relaxed),
            connections_active: self.connections_active.load(Ordering::Relaxed),
            packets_received: self.packets_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            protocol_anomalies: self.protocol_anomalies.load(Ordering::Relaxed),
            sessions_admitted: self.sessions_admitted.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    /// Log current metrics
    pub fn log_metrics(&self) {
        let snapshot = self.snapshot();
        info!(
            connections_total = snapshot.connections_total,
            connections_active = snapshot.connections_active,
            packets_received = snapshot.packets_received,
            packets_sent = snapshot.packets_sent,
            messages_received = snapshot.messages_received,
            messages_sent = snapshot.messages_sent,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            validation_failures = snapshot.validation_failures,
            protocol_anomalies = snapshot.protocol_anomalies,
            sessions_admitted = snapshot.sessions_admitted,
            sessions_evicted = snapshot.sessions_evicted,
            ticks = snapshot.ticks,
            uptime_seconds = snapshot.uptime_seconds,
            "Netcore metrics snapshot"
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub connections_total: u64,
    pub connections_active: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    pub messages_received: u64,
    pub messages_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub validation_failures: u64,
    pub protocol_anomalies: u64,
    pub sessions_admitted: u64,
    pub sessions_evicted: u64,
    pub ticks: u64,
    pub uptime_seconds: u64,
}

/// Timer for measuring operation duration
pub struct Timer {
    start: Instant,
    operation: &'static str,
}

impl Timer {
    /// Start timing an operation
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: Instant::now(),
            operation,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        debug!(
            operation = self.operation,
            duration_us = duration.as_micros() as u64,
            "Operation completed"
        );
    }
}
