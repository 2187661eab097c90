//! Simulated fingertip camera.
//!
//! Produces frames whose red channel carries a sinusoidal pulse while the
//! (scripted) finger covers the lens and the light is on. Signal time is
//! derived from the frame index and the declared rate, so accelerated
//! pacing yields the same samples as real time.

use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::{
    f64::consts::PI,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use super::{streamer::Streamer, FrameBuffer, FrameCallback, FrameSource, PixelFormat};
use crate::error::SourceError;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_info;

/// When the simulated finger covers the lens, in signal time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum FingerScript {
    Always,
    Never,
    /// Covered during each `[from_ms, until_ms)` span.
    Spans(Vec<(u64, u64)>),
}

impl FingerScript {
    fn covered_at(&self, t_ms: u64) -> bool {
        match self {
            FingerScript::Always => true,
            FingerScript::Never => false,
            FingerScript::Spans(spans) => spans.iter().any(|&(from, until)| from <= t_ms && t_ms < until),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum Pacing {
    RealTime,
    /// Deliver frames this many times faster than the declared rate.
    Accelerated(f64),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyntheticConfig {
    pub width: usize,
    pub height: usize,
    pub rate_hz: f64,
    pub bpm: f64,
    /// Peak red deviation of the pulse, 0..255 scale.
    pub pulse_amplitude: f64,
    /// Uniform per-frame red noise, +/- this many levels.
    pub noise: f64,
    pub finger: FingerScript,
    pub pacing: Pacing,
    pub seed: u64,
    /// Simulate a camera that refuses to start.
    pub unavailable: bool,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 192,
            height: 144,
            rate_hz: 30.0,
            bpm: 72.0,
            pulse_amplitude: 4.0,
            noise: 0.5,
            finger: FingerScript::Always,
            pacing: Pacing::RealTime,
            seed: 7,
            unavailable: false,
        }
    }
}

pub struct SyntheticFrameSource {
    config: SyntheticConfig,
    torch: Arc<AtomicBool>,
    streamer: Option<Streamer>,
}

impl SyntheticFrameSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            torch: Arc::new(AtomicBool::new(false)),
            streamer: None,
        }
    }

    pub fn torch_on(&self) -> bool {
        self.torch.load(Ordering::SeqCst)
    }

    pub fn is_streaming(&self) -> bool {
        self.streamer.is_some()
    }
}

/// Color of frame `index` for the given script and light state.
fn render(config: &SyntheticConfig, index: u64, torch_on: bool, rng: &mut StdRng) -> [u8; 3] {
    let t_secs = index as f64 / config.rate_hz;
    let t_ms = (t_secs * 1000.0) as u64;

    let base = match (config.finger.covered_at(t_ms), torch_on) {
        // Backlit fingertip: strongly red, bright.
        (true, true) => [170.0, 45.0, 35.0],
        // Covered lens without light: dark.
        (true, false) => [40.0, 8.0, 6.0],
        // Open room.
        (false, _) => [70.0, 72.0, 75.0],
    };

    let mut red = base[0];
    if config.finger.covered_at(t_ms) && torch_on {
        red += config.pulse_amplitude * (2.0 * PI * config.bpm / 60.0 * t_secs).sin();
    }
    if config.noise > 0.0 {
        red += rng.gen_range(-config.noise..=config.noise);
    }

    [
        red.round().clamp(0.0, 255.0) as u8,
        base[1] as u8,
        base[2] as u8,
    ]
}

impl FrameSource for SyntheticFrameSource {
    fn nominal_rate_hz(&self) -> f64 {
        self.config.rate_hz
    }

    fn start(&mut self, on_frame: FrameCallback) -> Result<(), SourceError> {
        if self.config.unavailable {
            return Err(SourceError::Unavailable("simulated camera offline".into()));
        }
        if self.streamer.is_some() {
            return Err(SourceError::AlreadyStreaming);
        }

        let period = match self.config.pacing {
            Pacing::RealTime => Duration::from_secs_f64(1.0 / self.config.rate_hz),
            Pacing::Accelerated(factor) => {
                Duration::from_secs_f64(1.0 / (self.config.rate_hz * factor.max(1.0)))
            }
        };

        let config = self.config.clone();
        let torch = self.torch.clone();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let produce = move |index: u64| {
            let rgb = render(&config, index, torch.load(Ordering::SeqCst), &mut rng);
            Some(FrameBuffer::filled(config.width, config.height, PixelFormat::Bgra8, rgb))
        };

        self.streamer = Some(Streamer::spawn("synthetic-camera", period, produce, on_frame)?);
        log_info!(
            "synthetic camera streaming at {} Hz ({:?}), pulse {} BPM",
            self.config.rate_hz,
            self.config.pacing,
            self.config.bpm
        );
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut streamer) = self.streamer.take() {
            streamer.stop();
        }
    }

    fn set_torch(&mut self, on: bool) -> Result<(), SourceError> {
        self.torch.store(on, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulse_only_shows_when_covered_and_lit() {
        let config = SyntheticConfig {
            noise: 0.0,
            pulse_amplitude: 10.0,
            finger: FingerScript::Spans(vec![(0, 1000)]),
            ..SyntheticConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        let reds: Vec<u8> = (0..30).map(|i| render(&config, i, true, &mut rng)[0]).collect();
        assert!(reds.iter().max() > reds.iter().min());

        // After the span ends the lens is uncovered.
        assert_eq!(render(&config, 31, true, &mut rng), [70, 72, 75]);
        // Covered but unlit is dark and flat.
        assert_eq!(render(&config, 5, false, &mut rng), [40, 8, 6]);
    }

    #[test]
    fn unavailable_camera_refuses_to_start() {
        let mut source = SyntheticFrameSource::new(SyntheticConfig {
            unavailable: true,
            ..SyntheticConfig::default()
        });
        assert!(matches!(
            source.start(Box::new(|_| {})),
            Err(SourceError::Unavailable(_))
        ));
        assert!(!source.is_streaming());
    }
}
