//! Simulated dual-slot target for rehearsals and tests.
//!
//! Stands in for real hardware behind the client boundary: advertises one
//! candidate, runs the vendor controller-identification handshake at
//! connect time, accepts chunked uploads into the staging slot, and closes
//! the session on reset so a stale handle cannot be reused.
//!
//! Fault knobs cover the failure paths the orchestrator must handle: an
//! empty or crowded scan, a wrong post-upload hash, and error-tagged or
//! unrecognizable responses for any single command.

use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::debug;

use super::{ClientError, DeviceCandidate, DmpClient, DmpSession};
use crate::handshake::{
    self, CONTROLLER_INFO_LEN, SUPPORTED_COMMANDS_LEN, VendorQuery, VendorResponder,
};
use crate::image::FirmwareImage;
use crate::protocol::{
    Command, ErrorDetail, ImageSlot, ProtocolResponse, ResponsePayload, UploadChunk, hex,
};

/// How an injected fault answers the targeted command.
#[derive(Debug, Clone)]
pub enum FaultMode {
    /// Answer with an error-tagged response.
    ErrorTagged { rc: u32, message: String },
    /// Answer with a payload matching neither the success nor error tag.
    Garbage(Vec<u8>),
}

#[derive(Debug, Clone)]
struct SlotEntry {
    version: String,
    active: bool,
    bootable: bool,
    confirmed: bool,
    pending: bool,
    hash: Vec<u8>,
}

#[derive(Debug, Default)]
struct UploadState {
    data: Vec<u8>,
    total: u64,
}

struct SimState {
    candidates: Vec<DeviceCandidate>,
    slot0: SlotEntry,
    slot1: Option<SlotEntry>,
    upload: Option<UploadState>,
    slot1_hash_override: Option<Vec<u8>>,
    slot1_index_override: Option<u8>,
    fault: Option<(&'static str, FaultMode)>,
    calls: Vec<String>,
}

impl SimState {
    fn report_slots(&self) -> Vec<ImageSlot> {
        let mut slots = vec![to_image_slot(0, &self.slot0)];
        if let Some(entry) = &self.slot1 {
            let mut slot = to_image_slot(self.slot1_index_override.unwrap_or(1), entry);
            if let Some(hash) = &self.slot1_hash_override {
                slot.hash = hash.clone();
            }
            slots.push(slot);
        }
        slots
    }
}

fn to_image_slot(index: u8, entry: &SlotEntry) -> ImageSlot {
    ImageSlot {
        slot: index,
        version: entry.version.clone(),
        active: entry.active,
        bootable: entry.bootable,
        confirmed: entry.confirmed,
        pending: entry.pending,
        hash: entry.hash.clone(),
    }
}

/// In-process simulated target implementing the client boundary.
pub struct SimDevice {
    state: Arc<Mutex<SimState>>,
    responder: Arc<dyn VendorResponder>,
}

impl SimDevice {
    /// Create a target with one advertised candidate, an occupied active
    /// slot 0 and an empty staging slot 1. The responder is the injected
    /// capability answering controller identification at connect time.
    pub fn new(responder: impl VendorResponder + 'static) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                candidates: vec![DeviceCandidate {
                    address: "C0:FF:EE:00:00:01".into(),
                    name: Some("dmp-target".into()),
                }],
                slot0: SlotEntry {
                    version: "1.0.0+0".into(),
                    active: true,
                    bootable: true,
                    confirmed: true,
                    pending: false,
                    hash: vec![0x11; 32],
                },
                slot1: None,
                upload: None,
                slot1_hash_override: None,
                slot1_index_override: None,
                fault: None,
                calls: Vec::new(),
            })),
            responder: Arc::new(responder),
        }
    }

    /// Replace the advertised candidate list (empty or crowded scans).
    pub fn set_candidates(&self, candidates: Vec<DeviceCandidate>) {
        self.state.lock().unwrap().candidates = candidates;
    }

    /// Report this hash for slot 1 instead of the uploaded image's own.
    pub fn override_slot1_hash(&self, hash: Vec<u8>) {
        self.state.lock().unwrap().slot1_hash_override = Some(hash);
    }

    /// Report this slot index for the staging entry instead of 1.
    pub fn override_slot1_index(&self, index: u8) {
        self.state.lock().unwrap().slot1_index_override = Some(index);
    }

    /// Answer every `command` (by [`Command::name`]) with the given fault.
    /// A fault targeting `"scan"` surfaces as [`ClientError::ScanFailed`]
    /// instead, since a scan has no tagged response to corrupt.
    pub fn fail_on(&self, command: &'static str, mode: FaultMode) {
        self.state.lock().unwrap().fault = Some((command, mode));
    }

    /// Ordered log of scan/connect/request calls seen so far.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Run the controller-identification handshake against the injected
    /// responder, checking every field of both fixed-format responses.
    fn identify(&self) -> Result<(), ClientError> {
        let info = self.responder.respond(VendorQuery::ControllerInfo);
        if info.len() != CONTROLLER_INFO_LEN {
            return Err(ClientError::Handshake(format!(
                "controller info is {} bytes, expected {CONTROLLER_INFO_LEN}",
                info.len()
            )));
        }
        if info[0] != handshake::STATUS_SUCCESS {
            return Err(ClientError::Handshake(format!(
                "controller info status 0x{:02X}",
                info[0]
            )));
        }
        let mut cursor = Cursor::new(&info[1..]);
        let platform = cursor.read_u16::<LittleEndian>().map_err(ClientError::Io)?;
        let variant = cursor.read_u16::<LittleEndian>().map_err(ClientError::Io)?;
        if platform != handshake::HARDWARE_PLATFORM || variant != handshake::HARDWARE_VARIANT {
            return Err(ClientError::Handshake(format!(
                "unknown hardware 0x{platform:04X}/0x{variant:04X}"
            )));
        }

        let commands = self.responder.respond(VendorQuery::SupportedCommands);
        if commands.len() != SUPPORTED_COMMANDS_LEN || commands[0] != handshake::STATUS_SUCCESS {
            return Err(ClientError::Handshake(
                "malformed supported-commands response".into(),
            ));
        }
        Ok(())
    }
}

impl DmpClient for SimDevice {
    type Session = SimSession;

    fn scan(&self, timeout: Duration) -> Result<Vec<DeviceCandidate>, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("scan".into());
        if let Some((target, mode)) = &state.fault
            && *target == "scan"
        {
            let message = match mode {
                FaultMode::ErrorTagged { message, .. } => message.clone(),
                FaultMode::Garbage(_) => "garbled scan response".into(),
            };
            return Err(ClientError::ScanFailed(message));
        }
        debug!(timeout_s = timeout.as_secs_f64(), candidates = state.candidates.len(), "Sim scan");
        Ok(state.candidates.clone())
    }

    fn connect(&self, candidate: &DeviceCandidate) -> Result<Self::Session, ClientError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("connect".into());
        if !state.candidates.contains(candidate) {
            return Err(ClientError::ConnectFailed {
                address: candidate.address.clone(),
                message: "candidate no longer advertising".into(),
            });
        }
        drop(state);

        self.identify()?;
        Ok(SimSession {
            state: Arc::clone(&self.state),
            open: true,
        })
    }
}

/// One connected session to the simulated target.
pub struct SimSession {
    state: Arc<Mutex<SimState>>,
    open: bool,
}

impl SimSession {
    fn handle_upload(state: &mut SimState, chunk: UploadChunk) -> ProtocolResponse {
        if chunk.offset == 0 {
            let Some(total) = chunk.total else {
                return error_response(3, "first chunk carries no total length");
            };
            state.upload = Some(UploadState {
                data: Vec::with_capacity(total as usize),
                total,
            });
        }
        let Some(upload) = state.upload.as_mut() else {
            return error_response(3, "upload chunk before any upload started");
        };
        if chunk.offset != upload.data.len() as u64 {
            return error_response(
                3,
                format!(
                    "unexpected offset {} (have {})",
                    chunk.offset,
                    upload.data.len()
                ),
            );
        }

        upload.data.extend_from_slice(&chunk.data);
        let offset = upload.data.len() as u64;
        if offset == upload.total {
            let received = state.upload.take().map(|u| u.data).unwrap_or_default();
            match FirmwareImage::from_bytes(received) {
                Ok(image) => {
                    state.slot1 = Some(SlotEntry {
                        version: image.version().to_string(),
                        active: false,
                        bootable: true,
                        confirmed: false,
                        pending: false,
                        hash: image.expected_hash().to_vec(),
                    });
                }
                Err(e) => return error_response(1, format!("uploaded image rejected: {e}")),
            }
        }
        ProtocolResponse::Success(ResponsePayload::UploadAck { offset })
    }

    fn handle_states_write(state: &mut SimState, hash: Vec<u8>) -> ProtocolResponse {
        let known = state
            .report_slots()
            .iter()
            .any(|slot| slot.hash == hash);
        if !known {
            return error_response(3, format!("unknown image hash {}", hex(&hash)));
        }
        if let Some(slot1) = state.slot1.as_mut() {
            slot1.pending = true;
        }
        ProtocolResponse::Success(ResponsePayload::ImageStates(state.report_slots()))
    }
}

fn error_response(rc: u32, message: impl Into<String>) -> ProtocolResponse {
    ProtocolResponse::Error(ErrorDetail {
        rc,
        message: message.into(),
    })
}

impl DmpSession for SimSession {
    fn request(&mut self, command: Command) -> Result<ProtocolResponse, ClientError> {
        if !self.open {
            return Err(ClientError::SessionClosed);
        }
        let mut state = self.state.lock().unwrap();
        state.calls.push(command.name().into());

        if let Some((target, mode)) = state.fault.clone()
            && target == command.name()
        {
            return Ok(match mode {
                FaultMode::ErrorTagged { rc, message } => error_response(rc, message),
                FaultMode::Garbage(bytes) => ProtocolResponse::Unrecognized(bytes),
            });
        }

        let response = match command {
            Command::ImageStatesRead => {
                ProtocolResponse::Success(ResponsePayload::ImageStates(state.report_slots()))
            }
            Command::ImageUpload(chunk) => Self::handle_upload(&mut state, chunk),
            Command::ImageStatesWrite { hash } => Self::handle_states_write(&mut state, hash),
            Command::Reset => {
                state.upload = None;
                drop(state);
                self.open = false;
                ProtocolResponse::Success(ResponsePayload::Done)
            }
        };
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::FixedVendorResponder;
    use crate::image::{ImageVersion, synthetic_image};

    fn connect(device: &SimDevice) -> SimSession {
        let candidate = device.scan(Duration::from_secs(1)).unwrap().remove(0);
        device.connect(&candidate).unwrap()
    }

    #[test]
    fn test_initial_state_reports_single_active_slot() {
        let device = SimDevice::new(FixedVendorResponder);
        let mut session = connect(&device);

        let response = session.request(Command::ImageStatesRead).unwrap();
        let ProtocolResponse::Success(ResponsePayload::ImageStates(slots)) = response else {
            panic!("expected image states");
        };
        assert_eq!(slots.len(), 1);
        assert!(slots[0].active && slots[0].confirmed);
    }

    #[test]
    fn test_upload_populates_staging_slot_with_image_hash() {
        let device = SimDevice::new(FixedVendorResponder);
        let mut session = connect(&device);

        let raw = synthetic_image(&[0x42; 700], ImageVersion::default());
        let expected = FirmwareImage::from_bytes(raw.clone()).unwrap();
        let offsets: Vec<u64> = crate::client::Upload::new(&mut session, &raw, 1, true, 256)
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(*offsets.last().unwrap(), raw.len() as u64);

        let response = session.request(Command::ImageStatesRead).unwrap();
        let ProtocolResponse::Success(ResponsePayload::ImageStates(slots)) = response else {
            panic!("expected image states");
        };
        assert_eq!(slots[1].slot, 1);
        assert_eq!(slots[1].hash, expected.expected_hash().to_vec());
    }

    #[test]
    fn test_garbage_upload_is_rejected() {
        let device = SimDevice::new(FixedVendorResponder);
        let mut session = connect(&device);

        let raw = vec![0u8; 600]; // no image header
        let last = crate::client::Upload::new(&mut session, &raw, 1, true, 256).last();
        assert!(last.unwrap().is_err());
    }

    #[test]
    fn test_reset_closes_the_session() {
        let device = SimDevice::new(FixedVendorResponder);
        let mut session = connect(&device);

        session.request(Command::Reset).unwrap();
        assert!(matches!(
            session.request(Command::ImageStatesRead),
            Err(ClientError::SessionClosed)
        ));
    }

    #[test]
    fn test_scan_fault_surfaces_as_scan_failed() {
        let device = SimDevice::new(FixedVendorResponder);
        device.fail_on(
            "scan",
            FaultMode::ErrorTagged {
                rc: 1,
                message: "radio busy".into(),
            },
        );

        assert!(matches!(
            device.scan(Duration::from_secs(1)),
            Err(ClientError::ScanFailed(_))
        ));
    }

    #[test]
    fn test_deviant_responder_breaks_connect() {
        struct TruncatedResponder;
        impl VendorResponder for TruncatedResponder {
            fn respond(&self, _query: VendorQuery) -> Vec<u8> {
                vec![0x00]
            }
        }

        let device = SimDevice::new(TruncatedResponder);
        let candidate = device.scan(Duration::from_secs(1)).unwrap().remove(0);
        assert!(matches!(
            device.connect(&candidate),
            Err(ClientError::Handshake(_))
        ));
    }
}
