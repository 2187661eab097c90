use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

use crate::{error::ConfigError, spectral::MIN_TRANSFORM_SAMPLES};

/// Finger placement heuristic thresholds. Empirically tuned, not
/// physiological constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PresenceConfig {
    /// Side of the centered square crop, clamped to the frame.
    pub crop_side: usize,
    /// Mean brightness on a 0..1 scale a covered lens must exceed.
    pub brightness_threshold: f64,
    /// `R / (G + B)` a lit fingertip must exceed.
    pub red_ratio_threshold: f64,
    /// Rolling brightness history length.
    pub history_len: usize,
    /// Entries needed before the quality score is computed.
    pub min_history: usize,
    /// Brightness variance at which stability reaches zero.
    pub variance_scale: f64,
    pub stability_weight: f64,
    pub brightness_weight: f64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            crop_side: 150,
            brightness_threshold: 0.25,
            red_ratio_threshold: 0.8,
            history_len: 30,
            min_history: 5,
            variance_scale: 0.01,
            stability_weight: 0.4,
            brightness_weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExtractorConfig {
    pub crop_side: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self { crop_side: 100 }
    }
}

/// Band-limiting applied after detrending.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BandFilter {
    /// Samples reach the window unchanged.
    #[default]
    Passthrough,
    /// Second-order high-pass then low-pass, run forward and backward.
    Butterworth,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpectralConfig {
    /// Samples per analysis (10 s at 30 Hz).
    pub window_len: usize,
    /// Transform minimum; shorter buffers are rejected.
    pub min_samples: usize,
    /// Peak search band, 50-180 BPM.
    pub min_freq_hz: f64,
    pub max_freq_hz: f64,
    pub band_filter: BandFilter,
    pub filter_low_hz: f64,
    pub filter_high_hz: f64,
    /// Parabolic refinement is skipped at or below this curvature.
    pub curvature_epsilon: f64,
    pub min_bpm: u32,
    pub max_bpm: u32,
    /// Peak power at or below this is reported as `LowSignal`.
    pub min_peak_power: f64,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            window_len: 300,
            min_samples: 128,
            min_freq_hz: 0.83,
            max_freq_hz: 3.0,
            band_filter: BandFilter::Passthrough,
            filter_low_hz: 0.5,
            filter_high_hz: 4.0,
            curvature_epsilon: 0.001,
            min_bpm: 50,
            max_bpm: 180,
            min_peak_power: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Quality a present finger must exceed before samples are kept.
    pub accept_quality: f64,
    /// Estimates whose peak-to-band power ratio falls below this are
    /// discarded and accumulation restarts.
    pub min_confidence: f64,
    pub no_finger_timeout_ms: u64,
    pub max_duration_ms: u64,
    pub tick_interval_ms: u64,
    /// Capacity of the capture -> processing channel.
    pub capture_queue_len: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            accept_quality: 0.3,
            min_confidence: 0.0,
            no_finger_timeout_ms: 20_000,
            max_duration_ms: 45_000,
            tick_interval_ms: 1_000,
            capture_queue_len: 64,
        }
    }
}

impl SessionConfig {
    pub fn no_finger_timeout(&self) -> Duration {
        Duration::from_millis(self.no_finger_timeout_ms)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct MeasurementConfig {
    pub presence: PresenceConfig,
    pub extractor: ExtractorConfig,
    pub spectral: SpectralConfig,
    pub session: SessionConfig,
}

impl MeasurementConfig {
    /// Reads a JSON config file. A missing file yields the defaults; a
    /// present but malformed or invalid one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        } else {
            Self::default()
        };

        config
            .validate()
            .with_context(|| format!("Invalid config {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(path, serialized)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.presence;
        unit_interval("presence.brightness_threshold", p.brightness_threshold)?;
        positive("presence.red_ratio_threshold", p.red_ratio_threshold)?;
        positive("presence.variance_scale", p.variance_scale)?;
        unit_interval("presence.stability_weight", p.stability_weight)?;
        unit_interval("presence.brightness_weight", p.brightness_weight)?;
        if p.crop_side == 0 {
            return Err(ConfigError::Invalid("presence.crop_side must be non-zero".into()));
        }
        if p.history_len == 0 || p.min_history == 0 || p.min_history > p.history_len {
            return Err(ConfigError::Invalid(format!(
                "presence.min_history ({}) must be in 1..=history_len ({})",
                p.min_history, p.history_len
            )));
        }

        if self.extractor.crop_side == 0 {
            return Err(ConfigError::Invalid("extractor.crop_side must be non-zero".into()));
        }

        let s = &self.spectral;
        if s.min_samples < MIN_TRANSFORM_SAMPLES {
            return Err(ConfigError::OutOfRange {
                field: "spectral.min_samples",
                range: "[128, inf)",
                value: s.min_samples as f64,
            });
        }
        if s.window_len < s.min_samples {
            return Err(ConfigError::Invalid(format!(
                "spectral.window_len ({}) below spectral.min_samples ({})",
                s.window_len, s.min_samples
            )));
        }
        positive("spectral.min_freq_hz", s.min_freq_hz)?;
        if s.max_freq_hz <= s.min_freq_hz {
            return Err(ConfigError::Invalid(format!(
                "spectral band {}-{} Hz is empty",
                s.min_freq_hz, s.max_freq_hz
            )));
        }
        positive("spectral.filter_low_hz", s.filter_low_hz)?;
        if s.filter_high_hz <= s.filter_low_hz {
            return Err(ConfigError::Invalid(format!(
                "spectral filter band {}-{} Hz is empty",
                s.filter_low_hz, s.filter_high_hz
            )));
        }
        if s.min_bpm == 0 || s.max_bpm < s.min_bpm {
            return Err(ConfigError::Invalid(format!(
                "spectral bpm clamp {}..={} is invalid",
                s.min_bpm, s.max_bpm
            )));
        }

        let q = &self.session;
        unit_interval("session.accept_quality", q.accept_quality)?;
        unit_interval("session.min_confidence", q.min_confidence)?;
        if q.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("session.tick_interval_ms must be non-zero".into()));
        }
        if q.no_finger_timeout_ms == 0 || q.max_duration_ms == 0 {
            return Err(ConfigError::Invalid("session timeouts must be non-zero".into()));
        }
        if q.capture_queue_len == 0 {
            return Err(ConfigError::Invalid("session.capture_queue_len must be non-zero".into()));
        }
        Ok(())
    }
}

fn unit_interval(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            range: "[0, 1]",
            value,
        })
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            range: "(0, inf)",
            value,
        })
    }
}
