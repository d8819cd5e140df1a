//! Transport readiness gate.
//!
//! Virtual-hardware bring-up is asynchronous with respect to this process:
//! the environment may be starting without being ready to accept protocol
//! traffic yet. The gate decouples the two by probing the transport socket
//! until it accepts a connection, bounded only by wall-clock time.

use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::client::ClientError;
use crate::error::DfuError;

/// Per-probe connect timeout, independent of the overall bound.
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);
/// Backoff between failed probes.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Block until `host:port` accepts a TCP connection or `timeout` elapses.
///
/// Each probe connection is closed immediately on success and no state is
/// retained. There is no maximum retry count; only elapsed time bounds the
/// loop, and expiry fails with [`DfuError::Timeout`] naming the endpoint.
pub fn wait_ready(host: &str, port: u16, timeout: Duration) -> Result<(), DfuError> {
    let endpoint = format!("{host}:{port}");
    let addr: SocketAddr = (host, port)
        .to_socket_addrs()
        .map_err(ClientError::Io)?
        .next()
        .ok_or_else(|| ClientError::Transport(format!("{endpoint} did not resolve")))?;

    info!(
        endpoint = %endpoint,
        timeout_s = timeout.as_secs_f64(),
        "Waiting for transport to open"
    );
    let start = Instant::now();

    loop {
        match TcpStream::connect_timeout(&addr, PROBE_TIMEOUT) {
            Ok(probe) => {
                drop(probe);
                info!(
                    endpoint = %endpoint,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Transport is open"
                );
                return Ok(());
            }
            Err(_) if start.elapsed() >= timeout => {
                return Err(DfuError::Timeout {
                    endpoint,
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
            Err(_) => thread::sleep(POLL_INTERVAL),
        }
    }
}
