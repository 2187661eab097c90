use std::collections::VecDeque;

use serde::Serialize;

use crate::{config::PresenceConfig, source::Frame};

/// Per-frame verdict of the finger placement heuristic.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct PresenceReading {
    pub present: bool,
    /// Confidence in [0, 1] that the frames carry a usable pulse signal.
    pub quality: f64,
    pub brightness: f64,
    pub red_ratio: f64,
}

/// Decides whether a lit fingertip covers the lens and how steady it is.
///
/// Runs on the capture thread. Its only state is the rolling brightness
/// history used for the stability term.
pub struct FingerPresenceDetector {
    config: PresenceConfig,
    history: VecDeque<f64>,
}

impl FingerPresenceDetector {
    pub fn new(config: PresenceConfig) -> Self {
        let history = VecDeque::with_capacity(config.history_len);
        Self { config, history }
    }

    pub fn observe(&mut self, frame: &Frame<'_>) -> PresenceReading {
        let mean = frame.center_mean(self.config.crop_side);
        let brightness = (mean.r + mean.g + mean.b) / (3.0 * 255.0);
        let red_ratio = mean.r / (mean.g + mean.b).max(1.0);

        let present = brightness > self.config.brightness_threshold
            && red_ratio > self.config.red_ratio_threshold;

        if self.history.len() == self.config.history_len {
            self.history.pop_front();
        }
        self.history.push_back(brightness);

        PresenceReading {
            present,
            quality: self.quality(brightness),
            brightness,
            red_ratio,
        }
    }

    fn quality(&self, brightness: f64) -> f64 {
        if self.history.len() < self.config.min_history {
            return 0.0;
        }
        let stability = (1.0 - variance(&self.history) / self.config.variance_scale).max(0.0);
        let brightness_quality = (brightness / self.config.brightness_threshold).min(1.0);
        (self.config.stability_weight * stability + self.config.brightness_weight * brightness_quality)
            .clamp(0.0, 1.0)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn reset(&mut self) {
        self.history.clear();
    }
}

/// Population variance.
fn variance(values: &VecDeque<f64>) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}
