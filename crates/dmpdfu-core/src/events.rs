//! Event system for UI decoupling.
//!
//! Allows a CLI/TUI/GUI to follow a run (phases, upload progress, slot
//! states) without tight coupling to the orchestration logic.

use std::fmt;

use crate::protocol::ImageSlot;

/// Orchestrator phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DfuPhase {
    /// Scanning for a reachable target.
    Discover,
    /// Opening a session to the discovered target.
    Connect,
    /// Reading the initial image-slot state.
    ReadState,
    /// Streaming the image to the staging slot.
    Upload,
    /// Checking the uploaded image hash against the embedded one.
    Verify,
    /// Marking the verified image as the one to boot next.
    Confirm,
    /// Rebooting the target.
    Reset,
    /// Re-discovering and re-reading state after the reboot.
    Reverify,
    /// Run finished.
    Complete,
}

impl fmt::Display for DfuPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DfuPhase::Discover => write!(f, "Discover"),
            DfuPhase::Connect => write!(f, "Connect"),
            DfuPhase::ReadState => write!(f, "Read State"),
            DfuPhase::Upload => write!(f, "Upload"),
            DfuPhase::Verify => write!(f, "Verify"),
            DfuPhase::Confirm => write!(f, "Confirm"),
            DfuPhase::Reset => write!(f, "Reset"),
            DfuPhase::Reverify => write!(f, "Reverify"),
            DfuPhase::Complete => write!(f, "Complete"),
        }
    }
}

/// Events emitted during a run.
#[derive(Debug, Clone)]
pub enum DfuEvent {
    /// A target was selected during discovery.
    DeviceFound {
        address: String,
        name: Option<String>,
    },
    /// Phase changed.
    PhaseChanged { from: DfuPhase, to: DfuPhase },
    /// Upload progress: bytes transmitted so far out of the total.
    Progress { offset: u64, total: u64 },
    /// One slot entry from an image-states read.
    SlotReported { slot: ImageSlot },
    /// Run completed successfully.
    Complete,
}

/// Observer trait for receiving run events.
///
/// Implement this in the UI layer to receive updates.
pub trait DfuObserver: Send + Sync {
    fn on_event(&self, event: &DfuEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl DfuObserver for NullObserver {
    fn on_event(&self, _event: &DfuEvent) {
        // Do nothing
    }
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl DfuObserver for TracingObserver {
    fn on_event(&self, event: &DfuEvent) {
        match event {
            DfuEvent::DeviceFound { address, name } => {
                tracing::info!(address = %address, name = name.as_deref().unwrap_or("-"), "Device found");
            }
            DfuEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            DfuEvent::Progress { offset, total } => {
                let pct = if *total > 0 { offset * 100 / total } else { 0 };
                tracing::debug!(offset = offset, total = total, progress = %format!("{pct}%"), "Upload progress");
            }
            DfuEvent::SlotReported { slot } => {
                tracing::info!(
                    slot = slot.slot,
                    version = %slot.version,
                    active = slot.active,
                    bootable = slot.bootable,
                    confirmed = slot.confirmed,
                    pending = slot.pending,
                    hash = %slot.hash_hex(),
                    "Image slot"
                );
            }
            DfuEvent::Complete => {
                tracing::info!("DFU rehearsal complete");
            }
        }
    }
}
