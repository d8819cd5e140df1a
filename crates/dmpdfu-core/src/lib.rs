//! dmpdfu-core: firmware-update rehearsal over a device-management protocol.
//!
//! Drives a full DFU rehearsal against a DMP endpoint on an embedded target,
//! physical or simulated: wait for the transport, read the firmware-slot
//! state, upload a new image in chunks, verify it by hash, mark it for boot,
//! reset, and re-verify.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: commands, slot states, tagged response classification
//! - **Client**: the device-management client boundary (scan/connect/request)
//!   plus the chunked upload driver and an in-process simulated target
//! - **Image**: firmware image loading and embedded-metadata hash extraction
//! - **Gate**: transport readiness polling with bounded timeout
//! - **Handshake**: fixed-format vendor controller-identification responder
//! - **Events**: observer pattern for UI decoupling
//! - **Runner**: the DFU orchestrator state machine
//!
//! # Example
//!
//! ```no_run
//! use dmpdfu_core::client::sim::SimDevice;
//! use dmpdfu_core::handshake::FixedVendorResponder;
//! use dmpdfu_core::image::FirmwareImage;
//! use dmpdfu_core::runner::{DfuRunner, RunConfig};
//!
//! let image = FirmwareImage::from_file("app_update.bin").expect("load image");
//! let device = SimDevice::new(FixedVendorResponder);
//! let runner = DfuRunner::new(RunConfig::default());
//! runner.run(&device, &image).expect("DFU rehearsal failed");
//! ```

pub mod client;
pub mod error;
pub mod events;
pub mod gate;
pub mod handshake;
pub mod image;
pub mod protocol;
pub mod runner;

// Re-exports for convenience
pub use client::{ClientError, DeviceCandidate, DmpClient, DmpSession, Upload};
pub use error::DfuError;
pub use events::{DfuEvent, DfuObserver, DfuPhase, NullObserver, TracingObserver};
pub use gate::wait_ready;
pub use handshake::{FixedVendorResponder, VendorQuery, VendorResponder};
pub use image::{FirmwareImage, ImageError};
pub use protocol::{Command, ImageSlot, ProtocolResponse, ResponsePayload};
pub use runner::{DfuRunner, DiscoveryPolicy, RunConfig, STAGING_SLOT};
