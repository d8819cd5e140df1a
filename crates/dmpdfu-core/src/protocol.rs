//! DMP command and response model.
//!
//! The wire codec lives behind the client boundary; this module only models
//! the commands the orchestrator issues and the tagged responses it gets
//! back. Classification of a response into success / error / unrecognized
//! is a single reusable contract ([`ProtocolResponse::into_success`]),
//! applied identically to every request in a run.

use std::fmt;

use crate::error::DfuError;

/// Commands issued over an established DMP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read the state of all image slots.
    ImageStatesRead,
    /// Mark the image with the given hash as the one to boot next.
    ImageStatesWrite { hash: Vec<u8> },
    /// Transmit one chunk of a firmware image.
    ImageUpload(UploadChunk),
    /// Reboot the target.
    Reset,
}

impl Command {
    /// Short name used in logs and call-order assertions.
    pub fn name(&self) -> &'static str {
        match self {
            Command::ImageStatesRead => "image-states-read",
            Command::ImageStatesWrite { .. } => "image-states-write",
            Command::ImageUpload(_) => "image-upload",
            Command::Reset => "reset",
        }
    }
}

/// One chunk of an image upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadChunk {
    /// Target slot for the image.
    pub slot: u8,
    /// Byte offset of this chunk within the image.
    pub offset: u64,
    /// Total image length; present only on the first chunk.
    pub total: Option<u64>,
    /// Mark the transmitted image as the upgrade candidate; set on the
    /// first chunk.
    pub upgrade: bool,
    /// Chunk payload.
    pub data: Vec<u8>,
}

/// One firmware slot as reported by the target.
///
/// Never constructed locally except for comparison; snapshots taken before
/// and after upload/reset are compared by hash and slot index only, since
/// all other fields may legitimately change across the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSlot {
    pub slot: u8,
    pub version: String,
    pub active: bool,
    pub bootable: bool,
    pub confirmed: bool,
    pub pending: bool,
    pub hash: Vec<u8>,
}

impl ImageSlot {
    /// Hash as lowercase hex for logs and error messages.
    pub fn hash_hex(&self) -> String {
        hex(&self.hash)
    }
}

/// Lowercase hex rendering of a digest.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Detail carried by an error-tagged response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    /// Protocol-supplied result code.
    pub rc: u32,
    pub message: String,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rc={} {}", self.rc, self.message)
    }
}

/// Payload of a successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponsePayload {
    /// Slot list from an Image-States request.
    ImageStates(Vec<ImageSlot>),
    /// Next expected offset acknowledged for an upload chunk.
    UploadAck { offset: u64 },
    /// Command acknowledged with no payload of interest.
    Done,
}

/// Tagged result of any completed request.
///
/// Exactly one of the three variants holds for every completed request; a
/// response that is none of them is impossible and indicates a transport
/// fault, which surfaces as a [`crate::client::ClientError`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolResponse {
    Success(ResponsePayload),
    Error(ErrorDetail),
    Unrecognized(Vec<u8>),
}

impl ProtocolResponse {
    /// Classify this response: success passes through, an error tag fails
    /// the run with [`DfuError::Protocol`], anything unrecognized fails
    /// with [`DfuError::UnexpectedResponse`].
    pub fn into_success(self) -> Result<ResponsePayload, DfuError> {
        match self {
            ProtocolResponse::Success(payload) => Ok(payload),
            ProtocolResponse::Error(detail) => Err(DfuError::Protocol(detail.to_string())),
            ProtocolResponse::Unrecognized(raw) => Err(DfuError::UnexpectedResponse(format!(
                "unrecognized payload of {} bytes: {}",
                raw.len(),
                hex(&raw[..raw.len().min(16)])
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_passes_through() {
        let resp = ProtocolResponse::Success(ResponsePayload::UploadAck { offset: 512 });
        match resp.into_success().unwrap() {
            ResponsePayload::UploadAck { offset } => assert_eq!(offset, 512),
            other => panic!("wrong payload: {other:?}"),
        }
    }

    #[test]
    fn test_error_tag_becomes_protocol_error() {
        let resp = ProtocolResponse::Error(ErrorDetail {
            rc: 3,
            message: "invalid value".into(),
        });
        let err = resp.into_success().unwrap_err();
        assert!(matches!(err, DfuError::Protocol(_)));
        assert!(err.to_string().contains("rc=3"));
    }

    #[test]
    fn test_unrecognized_becomes_unexpected_response() {
        let resp = ProtocolResponse::Unrecognized(vec![0xde, 0xad, 0xbe, 0xef]);
        let err = resp.into_success().unwrap_err();
        assert!(matches!(err, DfuError::UnexpectedResponse(_)));
        assert!(err.to_string().contains("deadbeef"));
    }

    #[test]
    fn test_command_names() {
        assert_eq!(Command::ImageStatesRead.name(), "image-states-read");
        assert_eq!(Command::Reset.name(), "reset");
    }
}
