//! Error taxonomy for a DFU run.
//!
//! Every fatal condition aborts the run immediately; there is no partial
//! success and no automatic retry. The readiness gate's connection polling
//! is the only bounded-retry behavior in the system.

use thiserror::Error;

use crate::client::ClientError;
use crate::image::ImageError;

#[derive(Error, Debug)]
pub enum DfuError {
    /// Readiness gate or discovery scan exceeded its bound.
    #[error("timeout: {endpoint} not ready after {elapsed_ms}ms")]
    Timeout { endpoint: String, elapsed_ms: u64 },

    /// Discovery returned no candidates within the scan window.
    #[error("no device found during scan")]
    NoDeviceFound,

    /// Discovery returned more than one candidate under the exactly-one policy.
    #[error("scan returned {count} candidates, expected exactly one")]
    AmbiguousDiscovery { count: usize },

    /// A request returned an error-tagged response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A response matched neither the success nor the error tag.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Post-upload slot hash differs from the image's embedded hash.
    #[error("integrity fault: slot hash {actual} does not match image hash {expected}")]
    HashMismatch { expected: String, actual: String },

    /// Post-upload staging entry reports the wrong slot index.
    #[error("integrity fault: staging entry reports slot {actual}, expected {expected}")]
    SlotMismatch { expected: u8, actual: u8 },

    #[error("client error: {0}")]
    Client(#[from] ClientError),

    #[error("image error: {0}")]
    Image(#[from] ImageError),
}

impl DfuError {
    /// True for the integrity-fault variants that must stop the run before
    /// any confirm request is issued.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(
            self,
            DfuError::HashMismatch { .. } | DfuError::SlotMismatch { .. }
        )
    }
}
