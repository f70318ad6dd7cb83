//! Configuration types and CLI/environment parsing for the I/O daemon.
//!
//! Hosting binaries may have a more detailed config and can flatten [`IoDaemonConfig`] into
//! it with `#[clap(flatten)]`, the way `oprf-service-example` flattened `OprfNodeConfig`.

use std::net::IpAddr;
use std::time::Duration;

use clap::Parser;

/// The configuration for the I/O daemon core.
///
/// Every tunable named by the concurrency and resource model is exposed here, configurable
/// via environment variables or command line arguments using `clap`.
#[derive(Parser, Debug, Clone)]
pub struct IoDaemonConfig {
    /// Loopback address to bind the HTTP/WebSocket listener to.
    #[clap(long, env = "JSTORRENTD_BIND_ADDR", default_value = "127.0.0.1")]
    pub bind_addr: IpAddr,

    /// Port to bind to. `0` picks an ephemeral port, advertised afterwards via the pairing
    /// record and `/status`.
    #[clap(long, env = "JSTORRENTD_PORT", default_value = "0")]
    pub port: u16,

    /// Required `Origin` prefix for the HTTP file endpoints.
    #[clap(
        long,
        env = "JSTORRENTD_APPROVED_ORIGIN_PREFIX",
        default_value = "chrome-extension://"
    )]
    pub approved_origin_prefix: String,

    /// Capacity of `ConnectAdmission`'s semaphore: max concurrent active `TCP_CONNECT`s per
    /// session.
    #[clap(long, env = "JSTORRENTD_ADMISSION_CAPACITY", default_value = "30")]
    pub admission_capacity: usize,

    /// Total pending-connect tasks (waiting + active) above which new `TCP_CONNECT`s
    /// fast-fail instead of queueing.
    #[clap(
        long,
        env = "JSTORRENTD_ADMISSION_FAST_FAIL_THRESHOLD",
        default_value = "60"
    )]
    pub admission_fast_fail_threshold: usize,

    /// Deadline for acquiring an admission permit before a `TCP_CONNECT` fails.
    #[clap(
        long,
        env = "JSTORRENTD_ADMISSION_WAIT_TIMEOUT",
        default_value = "5s",
        value_parser = humantime::parse_duration,
    )]
    pub admission_wait_timeout: Duration,

    /// Deadline for the underlying TCP connect once an admission permit is held.
    #[clap(
        long,
        env = "JSTORRENTD_CONNECT_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration,
    )]
    pub connect_timeout: Duration,

    /// Idle read timeout on activated TCP/UDP sockets. Does not terminate the socket — it
    /// only bounds how long a read syscall blocks before the pump loops again.
    #[clap(
        long,
        env = "JSTORRENTD_SOCKET_READ_TIMEOUT",
        default_value = "60s",
        value_parser = humantime::parse_duration,
    )]
    pub socket_read_timeout: Duration,

    /// Capacity of a session's outbound frame queue.
    #[clap(long, env = "JSTORRENTD_OUTBOUND_QUEUE_CAPACITY", default_value = "2000")]
    pub outbound_queue_capacity: usize,

    /// Capacity of a single TCP/UDP socket's send-pump queue.
    #[clap(long, env = "JSTORRENTD_SOCKET_SEND_QUEUE_CAPACITY", default_value = "100")]
    pub socket_send_queue_capacity: usize,

    /// Logging threshold above which an outbound WebSocket write is considered slow.
    #[clap(
        long,
        env = "JSTORRENTD_SLOW_SEND_THRESHOLD",
        default_value = "50ms",
        value_parser = humantime::parse_duration,
    )]
    pub slow_send_threshold: Duration,

    /// Send-pump flush threshold: accumulated unflushed bytes above which the pump flushes
    /// even though the queue is not yet empty.
    #[clap(
        long,
        env = "JSTORRENTD_SEND_FLUSH_BYTES_THRESHOLD",
        default_value = "32768"
    )]
    pub send_flush_bytes_threshold: usize,

    /// Send-pump flush threshold: an item smaller than this is treated as latency-sensitive
    /// and flushed immediately.
    #[clap(
        long,
        env = "JSTORRENTD_SEND_FLUSH_SMALL_ITEM_BYTES",
        default_value = "1024"
    )]
    pub send_flush_small_item_bytes: usize,

    /// Maximum accepted body size for `POST /write/{rootKey}`.
    #[clap(long, env = "JSTORRENTD_MAX_WRITE_BODY_BYTES", default_value = "67108864")]
    pub max_write_body_bytes: usize,
}
