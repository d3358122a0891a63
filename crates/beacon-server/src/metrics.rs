//! Metrics collection and export for Beacon.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use async_trait::async_trait;
use beacon_protocol::{CloseCode, CloseReason, WireFrame};
use beacon_transport::{FrameSink, FrameSource, TransportError};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Instant;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "beacon_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "beacon_connections_active";
    pub const FRAMES_TOTAL: &str = "beacon_frames_total";
    pub const FRAMES_BYTES: &str = "beacon_frames_bytes";
    pub const HANDSHAKE_REJECTIONS: &str = "beacon_handshake_rejections_total";
    pub const LOGOUTS_TOTAL: &str = "beacon_logouts_total";
    pub const LATENCY_SECONDS: &str = "beacon_frame_latency_seconds";
    pub const ERRORS_TOTAL: &str = "beacon_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of WebSocket connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of open WebSocket connections"
    );
    metrics::describe_counter!(names::FRAMES_TOTAL, "Total number of frames by direction");
    metrics::describe_counter!(names::FRAMES_BYTES, "Total frame bytes by direction");
    metrics::describe_counter!(
        names::HANDSHAKE_REJECTIONS,
        "Rejected handshakes by close code"
    );
    metrics::describe_counter!(names::LOGOUTS_TOTAL, "Explicit logout calls");
    metrics::describe_histogram!(
        names::LATENCY_SECONDS,
        "Inbound frame processing latency in seconds"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a frame.
pub fn record_frame(bytes: usize, direction: &'static str) {
    counter!(names::FRAMES_TOTAL, "direction" => direction).increment(1);
    counter!(names::FRAMES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record frame processing latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::LATENCY_SECONDS).record(seconds);
}

/// Record a rejected handshake.
pub fn record_handshake_rejected(code: CloseCode) {
    counter!(names::HANDSHAKE_REJECTIONS, "code" => code.code().to_string()).increment(1);
}

/// Record an explicit logout.
pub fn record_logout() {
    counter!(names::LOGOUTS_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

/// Frame source that counts inbound frames.
///
/// Latency is the time between handing a frame to the dispatcher and the
/// dispatcher asking for the next one.
pub struct MeteredSource<S> {
    inner: S,
    handed_out: Option<Instant>,
}

impl<S> MeteredSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            handed_out: None,
        }
    }
}

#[async_trait]
impl<S: FrameSource> FrameSource for MeteredSource<S> {
    async fn recv(&mut self) -> Result<Option<WireFrame>, TransportError> {
        if let Some(start) = self.handed_out.take() {
            record_latency(start.elapsed().as_secs_f64());
        }

        let frame = self.inner.recv().await;
        match &frame {
            Ok(Some(frame)) => {
                record_frame(frame.len(), "inbound");
                self.handed_out = Some(Instant::now());
            }
            Ok(None) => {}
            Err(_) => record_error("receive"),
        }
        frame
    }
}

/// Frame sink that counts outbound frames.
pub struct MeteredSink<S> {
    inner: S,
}

impl<S> MeteredSink<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<S: FrameSink> FrameSink for MeteredSink<S> {
    async fn send(&mut self, frame: WireFrame) -> Result<(), TransportError> {
        let len = frame.len();
        let result = self.inner.send(frame).await;
        match &result {
            Ok(()) => record_frame(len, "outbound"),
            Err(_) => record_error("send"),
        }
        result
    }

    async fn close(&mut self, reason: CloseReason) -> Result<(), TransportError> {
        self.inner.close(reason).await
    }
}
