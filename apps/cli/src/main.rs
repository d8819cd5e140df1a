use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use dmpdfu_core::client::sim::SimDevice;
use dmpdfu_core::gate::wait_ready;
use dmpdfu_core::handshake::FixedVendorResponder;
use dmpdfu_core::image::FirmwareImage;
use dmpdfu_core::protocol::hex;
use dmpdfu_core::runner::{DfuRunner, RunConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about = "DMP firmware-update rehearsal tool", long_about = None)]
struct Args {
    /// Firmware image to upload (binary with embedded SHA-256 metadata)
    image: String,

    /// Transport host to probe before starting
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Transport port to probe; the gate is skipped when not given
    #[arg(long)]
    port: Option<u16>,

    /// Readiness-gate timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Seconds to wait after reset before reverifying
    #[arg(long)]
    settle: Option<u64>,

    /// Load run configuration from a TOML file
    #[arg(long)]
    config: Option<String>,

    /// Write the effective run configuration to a TOML file before running
    #[arg(long, value_name = "PATH")]
    save_config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    if let Err(e) = run(&args) {
        error!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    if !Path::new(&args.image).exists() {
        bail!("image file {} does not exist", args.image);
    }
    let image = FirmwareImage::from_file(&args.image)
        .with_context(|| format!("loading image {}", args.image))?;
    info!(
        path = %args.image,
        len = image.len(),
        version = %image.version(),
        hash = %hex(image.expected_hash()),
        "Loaded firmware image"
    );

    let mut config = match &args.config {
        Some(path) => RunConfig::load_from_file(path)
            .with_context(|| format!("loading config {path}"))?,
        None => RunConfig::default(),
    };
    if let Some(settle) = args.settle {
        config.settle_secs = settle;
    }
    if let Some(path) = &args.save_config {
        config
            .save_to_file(path)
            .with_context(|| format!("saving config {path}"))?;
        info!(path = %path, "Saved run configuration");
    }

    // The simulated transport comes up asynchronously; gate on it when a
    // port was given.
    if let Some(port) = args.port {
        wait_ready(&args.host, port, Duration::from_secs(args.timeout))?;
    }

    let device = SimDevice::new(FixedVendorResponder);
    let runner = DfuRunner::new(config);
    runner.run(&device, &image)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_config_flag_parses_alongside_overrides() {
        let args = Args::try_parse_from([
            "dmpdfu",
            "fw.bin",
            "--save-config",
            "run.toml",
            "--port",
            "4321",
        ])
        .unwrap();

        assert_eq!(args.image, "fw.bin");
        assert_eq!(args.save_config.as_deref(), Some("run.toml"));
        assert_eq!(args.port, Some(4321));
        assert_eq!(args.host, "127.0.0.1");
    }
}
