//! Vendor controller-identification responder.
//!
//! During transport bring-up the host driver issues two vendor-specific
//! identification queries; the simulated controller answers with these
//! fixed-format payloads. The request content is ignored beyond dispatch
//! and the responses must be byte-exact, or controller identification
//! fails and the link never comes up.

use byteorder::{LittleEndian, WriteBytesExt};

pub const STATUS_SUCCESS: u8 = 0x00;
pub const HARDWARE_PLATFORM: u16 = 0x1234;
pub const HARDWARE_VARIANT: u16 = 0x5678;
pub const FIRMWARE_VARIANT: u8 = 0x01;
pub const FIRMWARE_VERSION: u8 = 0x00;
pub const FIRMWARE_REVISION: u16 = 0x0000;
pub const FIRMWARE_BUILD: u32 = 0x0000_0202;

/// Fixed length of the controller-info response.
pub const CONTROLLER_INFO_LEN: usize = 13;
/// Fixed length of the supported-commands response.
pub const SUPPORTED_COMMANDS_LEN: usize = 2;

/// The two identification queries answered during bring-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorQuery {
    ControllerInfo,
    SupportedCommands,
}

/// Responder capability injected into simulated-controller construction.
///
/// Passed explicitly at construction time, never installed as process-wide
/// shared behavior.
pub trait VendorResponder: Send + Sync {
    fn respond(&self, query: VendorQuery) -> Vec<u8>;
}

/// Responder emitting the fixed identification layout above.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedVendorResponder;

impl VendorResponder for FixedVendorResponder {
    fn respond(&self, query: VendorQuery) -> Vec<u8> {
        match query {
            VendorQuery::ControllerInfo => controller_info(),
            VendorQuery::SupportedCommands => supported_commands(),
        }
    }
}

/// Controller info: status, platform/variant ids, firmware identification.
fn controller_info() -> Vec<u8> {
    let mut buf = Vec::with_capacity(CONTROLLER_INFO_LEN);
    buf.push(STATUS_SUCCESS);
    buf.write_u16::<LittleEndian>(HARDWARE_PLATFORM).unwrap();
    buf.write_u16::<LittleEndian>(HARDWARE_VARIANT).unwrap();
    buf.push(FIRMWARE_VARIANT);
    buf.push(FIRMWARE_VERSION);
    buf.write_u16::<LittleEndian>(FIRMWARE_REVISION).unwrap();
    buf.write_u32::<LittleEndian>(FIRMWARE_BUILD).unwrap();
    buf
}

/// Supported-commands: status followed by a single zero byte, advertising
/// no optional commands.
fn supported_commands() -> Vec<u8> {
    vec![STATUS_SUCCESS, 0x00]
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, ReadBytesExt};
    use std::io::Cursor;

    #[test]
    fn test_controller_info_exact_bytes() {
        let resp = FixedVendorResponder.respond(VendorQuery::ControllerInfo);
        assert_eq!(resp.len(), CONTROLLER_INFO_LEN);
        assert_eq!(
            resp,
            vec![
                0x00, // status
                0x34, 0x12, // hardware platform
                0x78, 0x56, // hardware variant
                0x01, // firmware variant
                0x00, // firmware version
                0x00, 0x00, // firmware revision
                0x02, 0x02, 0x00, 0x00, // firmware build
            ]
        );
    }

    #[test]
    fn test_controller_info_decodes_to_constants() {
        let resp = FixedVendorResponder.respond(VendorQuery::ControllerInfo);
        let mut cursor = Cursor::new(&resp[1..]);
        assert_eq!(resp[0], STATUS_SUCCESS);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0x1234);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0x5678);
        assert_eq!(cursor.read_u8().unwrap(), 0x01);
        assert_eq!(cursor.read_u8().unwrap(), 0x00);
        assert_eq!(cursor.read_u16::<LittleEndian>().unwrap(), 0x0000);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0x0000_0202);
    }

    #[test]
    fn test_supported_commands_exact_bytes() {
        let resp = FixedVendorResponder.respond(VendorQuery::SupportedCommands);
        assert_eq!(resp.len(), SUPPORTED_COMMANDS_LEN);
        assert_eq!(resp, vec![STATUS_SUCCESS, 0x00]);
    }
}
