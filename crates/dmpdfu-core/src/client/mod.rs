//! Device-management client boundary.
//!
//! Defines the [`DmpClient`] / [`DmpSession`] traits the orchestrator runs
//! against, allowing different implementations (a real transport client,
//! the in-process simulated target, etc.), plus the chunked [`Upload`]
//! driver shared by all of them.

pub mod sim;

use std::time::Duration;

use thiserror::Error;

use crate::error::DfuError;
use crate::protocol::{Command, ProtocolResponse, ResponsePayload, UploadChunk};

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("scan failed: {0}")]
    ScanFailed(String),

    #[error("connect to {address} failed: {message}")]
    ConnectFailed { address: String, message: String },

    #[error("controller identification handshake failed: {0}")]
    Handshake(String),

    #[error("session closed")]
    SessionClosed,

    #[error("transport fault: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A target seen during discovery.
///
/// Valid only for the scope of one connected session. The advertising
/// identity may be transient, so a candidate is discarded and reacquired
/// after every reset rather than reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub address: String,
    pub name: Option<String>,
}

impl DeviceCandidate {
    /// Name if advertised, address otherwise.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

/// Client side of the device-management protocol.
pub trait DmpClient {
    type Session: DmpSession;

    /// Scan for advertising targets, bounded by `timeout`.
    fn scan(&self, timeout: Duration) -> Result<Vec<DeviceCandidate>, ClientError>;

    /// Open a session to a discovered candidate. Dropping the session
    /// releases it on every exit path, success or failure.
    fn connect(&self, candidate: &DeviceCandidate) -> Result<Self::Session, ClientError>;
}

/// One connected session to a target.
pub trait DmpSession {
    /// Issue a command and wait for its tagged response.
    fn request(&mut self, command: Command) -> Result<ProtocolResponse, ClientError>;
}

/// Chunked image upload yielding transmitted byte offsets.
///
/// A lazy, finite sequence of strictly increasing offsets; terminates when
/// the offset reaches the total image length. Fused after the first
/// failure and never restartable: a fresh upload must be reinitiated from
/// offset zero instead.
pub struct Upload<'a, S: DmpSession> {
    session: &'a mut S,
    image: &'a [u8],
    slot: u8,
    upgrade: bool,
    chunk_size: usize,
    offset: u64,
    started: bool,
    failed: bool,
}

impl<'a, S: DmpSession> Upload<'a, S> {
    pub fn new(
        session: &'a mut S,
        image: &'a [u8],
        slot: u8,
        upgrade: bool,
        chunk_size: usize,
    ) -> Self {
        Self {
            session,
            image,
            slot,
            upgrade,
            chunk_size: chunk_size.max(1),
            offset: 0,
            started: false,
            failed: false,
        }
    }

    /// Total image length in bytes.
    pub fn total(&self) -> u64 {
        self.image.len() as u64
    }

    fn send_next(&mut self) -> Result<u64, DfuError> {
        let start = self.offset as usize;
        let end = (start + self.chunk_size).min(self.image.len());
        let chunk = UploadChunk {
            slot: self.slot,
            offset: self.offset,
            total: (!self.started).then(|| self.total()),
            upgrade: self.upgrade && !self.started,
            data: self.image[start..end].to_vec(),
        };
        self.started = true;

        let payload = self
            .session
            .request(Command::ImageUpload(chunk))?
            .into_success()?;
        let acked = match payload {
            ResponsePayload::UploadAck { offset } => offset,
            other => {
                return Err(DfuError::UnexpectedResponse(format!(
                    "upload chunk acknowledged with {other:?}"
                )));
            }
        };
        if acked <= self.offset || acked > self.total() {
            return Err(DfuError::UnexpectedResponse(format!(
                "upload offset {acked} out of order after {}",
                self.offset
            )));
        }
        self.offset = acked;
        Ok(acked)
    }
}

impl<'a, S: DmpSession> Iterator for Upload<'a, S> {
    type Item = Result<u64, DfuError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.total() {
            return None;
        }
        match self.send_next() {
            Ok(offset) => Some(Ok(offset)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
