//! DFU orchestrator: the protocol-sequencing state machine for one
//! firmware-update rehearsal.
//!
//! A strictly linear sequence: discover, connect, read state, upload,
//! verify, confirm, reset, reverify. Each step's failure is terminal for
//! the run; there is no rollback path and partial uploads left on the
//! target are not cleaned up here.

use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::client::{DeviceCandidate, DmpClient, DmpSession, Upload};
use crate::error::DfuError;
use crate::events::{DfuEvent, DfuObserver, DfuPhase, TracingObserver};
use crate::image::FirmwareImage;
use crate::protocol::{Command, ImageSlot, ResponsePayload, hex};

/// Staging slot images are uploaded to and verified against. The target
/// keeps its running image in slot 0; slot 1 is the non-active slot.
pub const STAGING_SLOT: u8 = 1;

/// Selection policy when discovery yields more than one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryPolicy {
    /// Exactly one candidate expected; more than one fails the run.
    ExactlyOne,
    /// Take the first candidate, logging the ones ignored.
    FirstWins,
}

/// Configuration for one rehearsal run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Discovery scan bound in seconds.
    pub scan_timeout_secs: u64,
    /// Settle wait after reset, before reverifying.
    pub settle_secs: u64,
    /// Upload chunk size in bytes.
    pub chunk_size: usize,
    /// Candidate selection policy.
    pub discovery: DiscoveryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scan_timeout_secs: 10,
            settle_secs: 5,
            chunk_size: 512,
            discovery: DiscoveryPolicy::ExactlyOne,
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(std::io::Error::other)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, content)
    }
}

/// DFU orchestrator. Owns the image for the duration of a run and drives
/// the client boundary one operation at a time.
pub struct DfuRunner<O: DfuObserver> {
    config: RunConfig,
    observer: Arc<O>,
}

impl DfuRunner<TracingObserver> {
    /// Create a runner with the default tracing observer.
    pub fn new(config: RunConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: DfuObserver + 'static> DfuRunner<O> {
    /// Create a runner with a custom observer.
    pub fn with_observer(config: RunConfig, observer: Arc<O>) -> Self {
        Self { config, observer }
    }

    /// Run the full rehearsal. Returns the post-reboot slot states from
    /// the final read.
    ///
    /// The first fatal error aborts immediately, leaving the target's
    /// actual firmware state unspecified.
    #[instrument(skip(self, client, image))]
    pub fn run<C: DmpClient>(
        &self,
        client: &C,
        image: &FirmwareImage,
    ) -> Result<Vec<ImageSlot>, DfuError> {
        info!(
            len = image.len(),
            version = %image.version(),
            hash = %hex(image.expected_hash()),
            "Starting DFU rehearsal"
        );
        let mut phase = DfuPhase::Discover;

        // Discover + Connect
        let candidate = self.discover(client)?;
        self.advance(&mut phase, DfuPhase::Connect);
        let mut session = client.connect(&candidate)?;

        // Read initial state
        self.advance(&mut phase, DfuPhase::ReadState);
        self.read_image_states(&mut session)?;

        // Upload
        self.advance(&mut phase, DfuPhase::Upload);
        let total = image.len() as u64;
        let upload_started = Instant::now();
        for offset in Upload::new(
            &mut session,
            image.data(),
            STAGING_SLOT,
            true,
            self.config.chunk_size,
        ) {
            let offset = offset?;
            self.observer.on_event(&DfuEvent::Progress { offset, total });
        }
        info!(
            upload_s = format!("{:.2}", upload_started.elapsed().as_secs_f64()),
            bytes = total,
            "Upload finished"
        );

        // Verify: staging entry must report the staging index and the
        // image's embedded hash before anything is confirmed.
        self.advance(&mut phase, DfuPhase::Verify);
        let states = self.read_image_states(&mut session)?;
        let entry = states.get(1).ok_or_else(|| {
            DfuError::UnexpectedResponse("state report has no staging entry".into())
        })?;
        if entry.slot != STAGING_SLOT {
            return Err(DfuError::SlotMismatch {
                expected: STAGING_SLOT,
                actual: entry.slot,
            });
        }
        if entry.hash.as_slice() != image.expected_hash().as_slice() {
            return Err(DfuError::HashMismatch {
                expected: hex(image.expected_hash()),
                actual: entry.hash_hex(),
            });
        }

        // Confirm
        self.advance(&mut phase, DfuPhase::Confirm);
        session
            .request(Command::ImageStatesWrite {
                hash: entry.hash.clone(),
            })?
            .into_success()?;

        // Reset, then settle unconditionally while the target reboots and
        // starts re-advertising.
        self.advance(&mut phase, DfuPhase::Reset);
        session.request(Command::Reset)?.into_success()?;
        drop(session); // handle is invalid across the reboot
        thread::sleep(Duration::from_secs(self.config.settle_secs));

        // Reverify: reachable and reporting again; no field assertions.
        self.advance(&mut phase, DfuPhase::Reverify);
        let candidate = self.discover(client)?;
        let mut session = client.connect(&candidate)?;
        let final_states = self.read_image_states(&mut session)?;

        self.advance(&mut phase, DfuPhase::Complete);
        self.observer.on_event(&DfuEvent::Complete);
        Ok(final_states)
    }

    /// Locate a target per the configured selection policy.
    fn discover<C: DmpClient>(&self, client: &C) -> Result<DeviceCandidate, DfuError> {
        let timeout = Duration::from_secs(self.config.scan_timeout_secs);
        let mut candidates = client.scan(timeout)?;

        let candidate = match (candidates.len(), self.config.discovery) {
            (0, _) => return Err(DfuError::NoDeviceFound),
            (1, _) => candidates.remove(0),
            (count, DiscoveryPolicy::ExactlyOne) => {
                return Err(DfuError::AmbiguousDiscovery { count });
            }
            (count, DiscoveryPolicy::FirstWins) => {
                warn!(ignored = count - 1, "Multiple candidates, taking the first");
                candidates.remove(0)
            }
        };

        self.observer.on_event(&DfuEvent::DeviceFound {
            address: candidate.address.clone(),
            name: candidate.name.clone(),
        });
        Ok(candidate)
    }

    /// Issue an Image-States-Read, classify it, and report every slot.
    fn read_image_states<S: DmpSession>(&self, session: &mut S) -> Result<Vec<ImageSlot>, DfuError> {
        match session.request(Command::ImageStatesRead)?.into_success()? {
            ResponsePayload::ImageStates(slots) => {
                for slot in &slots {
                    self.observer
                        .on_event(&DfuEvent::SlotReported { slot: slot.clone() });
                }
                Ok(slots)
            }
            other => Err(DfuError::UnexpectedResponse(format!(
                "image-states-read answered with {other:?}"
            ))),
        }
    }

    fn advance(&self, phase: &mut DfuPhase, to: DfuPhase) {
        self.observer
            .on_event(&DfuEvent::PhaseChanged { from: *phase, to });
        *phase = to;
    }
}
