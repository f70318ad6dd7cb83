//! Metrics definitions for the I/O daemon.
//!
//! This module defines all metrics keys the daemon records and provides a helper
//! [`describe_metrics`] to set metadata for each metric using the `metrics` crate.

/// Metrics key for the number of currently open sessions (both `/io` and `/control`).
pub const METRICS_ID_SESSIONS_OPEN: &str = "jstorrentd.sessions.open";
/// Metrics key for the number of open virtual TCP streams, summed across sessions.
pub const METRICS_ID_TCP_STREAMS_OPEN: &str = "jstorrentd.sockets.tcp_streams.open";
/// Metrics key for the number of open TCP listeners, summed across sessions.
pub const METRICS_ID_TCP_LISTENERS_OPEN: &str = "jstorrentd.sockets.tcp_listeners.open";
/// Metrics key for the number of open UDP sockets, summed across sessions.
pub const METRICS_ID_UDP_SOCKETS_OPEN: &str = "jstorrentd.sockets.udp_sockets.open";
/// Metrics key for frames dropped because a session's outbound queue was full.
pub const METRICS_ID_OUTBOUND_FRAMES_DROPPED: &str = "jstorrentd.outbound.frames_dropped";
/// Metrics key for the number of tasks currently waiting on a `ConnectAdmission` permit.
pub const METRICS_ID_ADMISSION_WAITING: &str = "jstorrentd.admission.waiting";
/// Metrics key for the number of pending (in-flight) `TCP_CONNECT` tasks.
pub const METRICS_ID_ADMISSION_PENDING: &str = "jstorrentd.admission.pending";
/// Metrics key for the total number of `TCP_CONNECT` admissions granted.
pub const METRICS_ID_ADMISSION_COMPLETED: &str = "jstorrentd.admission.completed";
/// Metrics key for the duration of a successful outbound TCP connect.
pub const METRICS_ID_CONNECT_DURATION: &str = "jstorrentd.connect.duration";
/// Metrics key for send-pump flushes that took longer than the slow-send threshold.
pub const METRICS_ID_SLOW_SENDS: &str = "jstorrentd.outbound.slow_sends";
/// Metrics key for file endpoint requests, labeled by operation (counter, use with labels).
pub const METRICS_ID_FILE_REQUESTS: &str = "jstorrentd.file.requests";
/// Metrics key for the duration of a file endpoint request.
pub const METRICS_ID_FILE_REQUEST_DURATION: &str = "jstorrentd.file.request.duration";

/// Describe all metrics used by the daemon.
///
/// This calls the `describe_*` functions from the `metrics` crate to set metadata on the
/// different metrics.
pub fn describe_metrics() {
    metrics::describe_gauge!(
        METRICS_ID_SESSIONS_OPEN,
        metrics::Unit::Count,
        "Number of open WebSocket sessions (io + control)"
    );

    metrics::describe_gauge!(
        METRICS_ID_TCP_STREAMS_OPEN,
        metrics::Unit::Count,
        "Number of open virtual TCP streams across all sessions"
    );

    metrics::describe_gauge!(
        METRICS_ID_TCP_LISTENERS_OPEN,
        metrics::Unit::Count,
        "Number of open TCP listeners across all sessions"
    );

    metrics::describe_gauge!(
        METRICS_ID_UDP_SOCKETS_OPEN,
        metrics::Unit::Count,
        "Number of open UDP sockets across all sessions"
    );

    metrics::describe_counter!(
        METRICS_ID_OUTBOUND_FRAMES_DROPPED,
        metrics::Unit::Count,
        "Number of frames dropped because a session outbound queue was full"
    );

    metrics::describe_gauge!(
        METRICS_ID_ADMISSION_WAITING,
        metrics::Unit::Count,
        "Number of TCP_CONNECT tasks currently waiting on an admission permit"
    );

    metrics::describe_gauge!(
        METRICS_ID_ADMISSION_PENDING,
        metrics::Unit::Count,
        "Number of TCP_CONNECT tasks currently in flight (waiting or connecting)"
    );

    metrics::describe_counter!(
        METRICS_ID_ADMISSION_COMPLETED,
        metrics::Unit::Count,
        "Total number of TCP_CONNECT admissions granted"
    );

    metrics::describe_histogram!(
        METRICS_ID_CONNECT_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of successful outbound TCP connects"
    );

    metrics::describe_counter!(
        METRICS_ID_SLOW_SENDS,
        metrics::Unit::Count,
        "Number of outbound WebSocket sends exceeding the slow-send threshold"
    );

    metrics::describe_counter!(
        METRICS_ID_FILE_REQUESTS,
        metrics::Unit::Count,
        "Number of file endpoint requests"
    );

    metrics::describe_histogram!(
        METRICS_ID_FILE_REQUEST_DURATION,
        metrics::Unit::Milliseconds,
        "Duration of file endpoint requests"
    );
}
