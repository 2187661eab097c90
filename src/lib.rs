pub mod config;
pub mod error;
pub mod session;
pub mod signal;
pub mod source;
pub mod spectral;
mod utils;

use anyhow::{Context, Result};
use std::{env, path::PathBuf};

pub use config::MeasurementConfig;
pub use error::{AnalysisError, ConfigError, FrameError, SourceError};
pub use session::{
    MeasurementController, MeasurementResult, MeasurementSession, SessionHandle, SessionObservers,
    SessionReport,
};
pub use source::{Frame, FrameSource, SharedFrameSource};
pub use spectral::{SpectralAnalyzer, SpectralEstimate};

use source::{ReplayConfig, ReplayFrameSource, SyntheticConfig, SyntheticFrameSource};

const CONFIG_PATH_ENV: &str = "PULSECAM_CONFIG";
const REPLAY_DIR_ENV: &str = "PULSECAM_REPLAY_DIR";
const SYNTH_BPM_ENV: &str = "PULSECAM_SYNTH_BPM";
const DEFAULT_CONFIG_PATH: &str = "pulsecam.json";
const REPLAY_RATE_HZ: f64 = 30.0;

fn frame_source_from_env() -> Result<SharedFrameSource> {
    if let Ok(dir) = env::var(REPLAY_DIR_ENV) {
        log::info!("Replaying frames from {}", dir);
        let source = ReplayFrameSource::new(ReplayConfig {
            dir: PathBuf::from(dir),
            rate_hz: REPLAY_RATE_HZ,
            looping: false,
        });
        return Ok(source::shared(source));
    }

    let mut synthetic = SyntheticConfig::default();
    if let Ok(bpm) = env::var(SYNTH_BPM_ENV) {
        synthetic.bpm = bpm
            .parse()
            .with_context(|| format!("{SYNTH_BPM_ENV} must be a number, got {bpm:?}"))?;
    }
    log::info!("Using synthetic camera at {} BPM", synthetic.bpm);
    Ok(source::shared(SyntheticFrameSource::new(synthetic)))
}

/// Runs a single measurement and prints the report as JSON.
pub fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    log::info!("pulsecam starting up...");

    let config_path =
        PathBuf::from(env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string()));
    let config = MeasurementConfig::load(&config_path)?;
    let source = frame_source_from_env()?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let controller = MeasurementController::new(source, config);
    let report = runtime.block_on(controller.measure())?;

    println!(
        "{}",
        serde_json::to_string_pretty(&report).context("failed to serialize session report")?
    );
    Ok(())
}
