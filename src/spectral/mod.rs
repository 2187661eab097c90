//! Spectral pulse-rate estimation.
//!
//! ```text
//! samples ─▶ detrend ─▶ band-limit ─▶ Hamming ─▶ zero-pad ─▶ FFT ─▶ |X|²
//!                                                                    │
//!        bpm ◀─ clamp ◀─ round(f·60) ◀─ parabolic refine ◀─ peak in 0.83-3 Hz
//! ```
//!
//! The buffer is zero-padded to the next power of two, so a 300-sample
//! window at 30 Hz is transformed with 512 points (0.059 Hz per bin before
//! refinement).

pub mod filter;

use rustfft::{num_complex::Complex64, Fft, FftPlanner};
use serde::Serialize;
use std::{fmt, ops::RangeInclusive, sync::Arc};

use crate::{
    config::{BandFilter, SpectralConfig},
    error::AnalysisError,
};

use filter::{hamming, BandPass};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_debug;

/// Smallest buffer the transform accepts, whatever the configuration says.
pub const MIN_TRANSFORM_SAMPLES: usize = 128;

/// A validated pulse-rate estimate.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SpectralEstimate {
    /// Rounded and clamped to the configured BPM range.
    pub bpm: u32,
    pub frequency_hz: f64,
    pub peak_bin: usize,
    pub refined_bin: f64,
    pub peak_power: f64,
    /// Peak power over total power in the search band.
    pub confidence: f64,
}

pub struct SpectralAnalyzer {
    config: SpectralConfig,
    sample_rate_hz: f64,
    sample_count: usize,
    fft_len: usize,
    search: RangeInclusive<usize>,
    window: Vec<f64>,
    band_pass: Option<BandPass>,
    fft: Arc<dyn Fft<f64>>,
    spectrum: Vec<Complex64>,
    scratch: Vec<Complex64>,
}

impl fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("sample_rate_hz", &self.sample_rate_hz)
            .field("sample_count", &self.sample_count)
            .field("fft_len", &self.fft_len)
            .field("search", &self.search)
            .finish()
    }
}

impl SpectralAnalyzer {
    /// Plans the transform for `sample_count` samples. Fails if the count is
    /// below the transform minimum or if no bin lands in the search band.
    pub fn new(
        config: SpectralConfig,
        sample_rate_hz: f64,
        sample_count: usize,
    ) -> Result<Self, AnalysisError> {
        let min = config.min_samples.max(MIN_TRANSFORM_SAMPLES);
        if sample_count < min {
            return Err(AnalysisError::InsufficientSamples {
                len: sample_count,
                min,
            });
        }

        let fft_len = sample_count.next_power_of_two();
        let search = search_bins(&config, sample_rate_hz, fft_len)?;

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_len);
        let scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];

        let band_pass = match config.band_filter {
            BandFilter::Passthrough => None,
            BandFilter::Butterworth => Some(BandPass::new(
                config.filter_low_hz,
                config.filter_high_hz,
                sample_rate_hz,
            )),
        };

        Ok(Self {
            window: hamming(sample_count),
            spectrum: vec![Complex64::new(0.0, 0.0); fft_len],
            config,
            sample_rate_hz,
            sample_count,
            fft_len,
            search,
            band_pass,
            fft,
            scratch,
        })
    }

    pub fn fft_len(&self) -> usize {
        self.fft_len
    }

    pub fn search_bins(&self) -> RangeInclusive<usize> {
        self.search.clone()
    }

    pub fn analyze(&mut self, samples: &[f64]) -> Result<SpectralEstimate, AnalysisError> {
        let min = self.config.min_samples.max(MIN_TRANSFORM_SAMPLES);
        if samples.len() < min {
            return Err(AnalysisError::InsufficientSamples {
                len: samples.len(),
                min,
            });
        }
        if samples.len() != self.sample_count {
            *self = Self::new(self.config.clone(), self.sample_rate_hz, samples.len())?;
        }

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let mut detrended: Vec<f64> = samples.iter().map(|s| s - mean).collect();
        if let Some(band_pass) = &self.band_pass {
            band_pass.apply(&mut detrended);
        }

        for (slot, (value, w)) in self
            .spectrum
            .iter_mut()
            .zip(detrended.iter().zip(&self.window))
        {
            *slot = Complex64::new(value * w, 0.0);
        }
        for slot in &mut self.spectrum[samples.len()..] {
            *slot = Complex64::new(0.0, 0.0);
        }
        self.fft
            .process_with_scratch(&mut self.spectrum, &mut self.scratch);

        let power: Vec<f64> = self.spectrum[..self.fft_len / 2]
            .iter()
            .map(|c| c.norm_sqr())
            .collect();

        let (peak_bin, peak_power) = self
            .search
            .clone()
            .map(|k| (k, power[k]))
            .fold((*self.search.start(), f64::MIN), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });

        if peak_power <= self.config.min_peak_power {
            return Err(AnalysisError::LowSignal { peak_power });
        }

        let band_power: f64 = self.search.clone().map(|k| power[k]).sum();
        let refined_bin = refine_peak(&power, peak_bin, self.config.curvature_epsilon);
        let frequency_hz = refined_bin * self.sample_rate_hz / self.fft_len as f64;
        let bpm = ((frequency_hz * 60.0).round().max(0.0) as u32)
            .clamp(self.config.min_bpm, self.config.max_bpm);

        log_debug!(
            "peak bin {} -> {:.3} ({:.3} Hz, {} BPM), confidence {:.2}",
            peak_bin,
            refined_bin,
            frequency_hz,
            bpm,
            peak_power / band_power
        );

        Ok(SpectralEstimate {
            bpm,
            frequency_hz,
            peak_bin,
            refined_bin,
            peak_power,
            confidence: peak_power / band_power,
        })
    }
}

/// Bins whose center frequency lies inside the configured search band.
fn search_bins(
    config: &SpectralConfig,
    sample_rate_hz: f64,
    fft_len: usize,
) -> Result<RangeInclusive<usize>, AnalysisError> {
    let invalid = || AnalysisError::InvalidBandConfiguration {
        min_hz: config.min_freq_hz,
        max_hz: config.max_freq_hz,
        fft_len,
        sample_rate_hz,
    };
    if !(sample_rate_hz > 0.0) || fft_len < 4 {
        return Err(invalid());
    }

    let bin_hz = sample_rate_hz / fft_len as f64;
    let low = (config.min_freq_hz / bin_hz).ceil().max(1.0) as usize;
    let high = ((config.max_freq_hz / bin_hz).floor() as usize).min(fft_len / 2 - 1);
    if low > high {
        return Err(invalid());
    }
    Ok(low..=high)
}

/// Three-point parabolic interpolation around `k`. Falls back to the integer
/// bin when the curvature is too flat or a neighbour is out of range.
fn refine_peak(power: &[f64], k: usize, curvature_epsilon: f64) -> f64 {
    if k == 0 || k + 1 >= power.len() {
        return k as f64;
    }
    let (y0, y1, y2) = (power[k - 1], power[k], power[k + 1]);
    let curvature = y0 - 2.0 * y1 + y2;
    if curvature.abs() <= curvature_epsilon {
        return k as f64;
    }
    k as f64 + 0.5 * (y0 - y2) / curvature
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f64::consts::PI;

    const FS: f64 = 30.0;

    fn sine(freq_hz: f64, n: usize, offset: f64, amplitude: f64, phase: f64) -> Vec<f64> {
        (0..n)
            .map(|i| offset + amplitude * (2.0 * PI * freq_hz * i as f64 / FS + phase).sin())
            .collect()
    }

    fn analyzer(config: SpectralConfig) -> SpectralAnalyzer {
        SpectralAnalyzer::new(config, FS, 300).unwrap()
    }

    #[test]
    fn plans_power_of_two_transform() {
        let a = analyzer(SpectralConfig::default());
        assert_eq!(a.fft_len(), 512);
        // 0.83 Hz -> bin 14.2, 3.0 Hz -> bin 51.2
        assert_eq!(a.search_bins(), 15..=51);
    }

    #[test]
    fn sine_across_band_within_one_bpm() {
        let mut a = analyzer(SpectralConfig::default());
        for freq in [0.85, 0.9, 1.0, 1.37, 1.5, 2.0, 2.5, 2.9] {
            for phase in [0.0, 1.0] {
                let est = a.analyze(&sine(freq, 300, 0.0, 1.0, phase)).unwrap();
                let expected = (freq * 60.0).round() as i64;
                assert!(
                    (est.bpm as i64 - expected).abs() <= 1,
                    "{freq} Hz: got {} expected {expected}",
                    est.bpm
                );
            }
        }
    }

    #[test]
    fn seventy_two_bpm_reference() {
        let mut a = analyzer(SpectralConfig::default());
        let est = a.analyze(&sine(1.2, 300, 150.0, 3.0, 0.3)).unwrap();
        assert!((70..=74).contains(&est.bpm), "bpm {}", est.bpm);
        assert!((est.frequency_hz - 1.2).abs() < 0.02);
        assert!(est.confidence > 0.2);
    }

    #[test]
    fn butterworth_variant_matches_reference() {
        let config = SpectralConfig {
            band_filter: BandFilter::Butterworth,
            ..SpectralConfig::default()
        };
        let mut a = analyzer(config);
        // Slow baseline drift from pressure changes on top of the pulse.
        let samples: Vec<f64> = sine(1.2, 300, 150.0, 3.0, 0.0)
            .iter()
            .enumerate()
            .map(|(i, v)| v + 0.05 * i as f64)
            .collect();
        let est = a.analyze(&samples).unwrap();
        assert!((70..=74).contains(&est.bpm), "bpm {}", est.bpm);
    }

    #[test]
    fn constant_input_is_low_signal() {
        let mut a = analyzer(SpectralConfig::default());
        let err = a.analyze(&vec![123.456; 300]).unwrap_err();
        assert!(matches!(err, AnalysisError::LowSignal { .. }), "{err:?}");
        // Deterministic on repeat.
        assert!(matches!(
            a.analyze(&vec![123.456; 300]),
            Err(AnalysisError::LowSignal { .. })
        ));
    }

    #[test]
    fn short_buffer_is_rejected_before_transform() {
        let mut a = analyzer(SpectralConfig::default());
        assert_eq!(
            a.analyze(&sine(1.2, 100, 0.0, 1.0, 0.0)),
            Err(AnalysisError::InsufficientSamples { len: 100, min: 128 })
        );
        assert!(matches!(
            SpectralAnalyzer::new(SpectralConfig::default(), FS, 127),
            Err(AnalysisError::InsufficientSamples { len: 127, min: 128 })
        ));
        assert!(SpectralAnalyzer::new(SpectralConfig::default(), FS, 128).is_ok());
    }

    #[test]
    fn configured_minimum_cannot_undercut_transform_floor() {
        let config = SpectralConfig {
            min_samples: 16,
            ..SpectralConfig::default()
        };
        assert_eq!(
            SpectralAnalyzer::new(config.clone(), FS, 64).unwrap_err(),
            AnalysisError::InsufficientSamples { len: 64, min: 128 }
        );
        let mut a = analyzer(config);
        assert_eq!(
            a.analyze(&sine(1.2, 64, 0.0, 1.0, 0.0)),
            Err(AnalysisError::InsufficientSamples { len: 64, min: 128 })
        );
    }

    #[test]
    fn other_lengths_are_replanned() {
        let mut a = analyzer(SpectralConfig::default());
        let est = a.analyze(&sine(1.5, 256, 0.0, 1.0, 0.0)).unwrap();
        assert_eq!(a.fft_len(), 256);
        assert!((89..=91).contains(&est.bpm));
    }

    #[test]
    fn empty_band_fails_at_construction() {
        let config = SpectralConfig {
            min_freq_hz: 1.0,
            max_freq_hz: 1.05,
            ..SpectralConfig::default()
        };
        assert!(matches!(
            SpectralAnalyzer::new(config, FS, 128),
            Err(AnalysisError::InvalidBandConfiguration { fft_len: 128, .. })
        ));

        // Band above Nyquist.
        let config = SpectralConfig {
            min_freq_hz: 20.0,
            max_freq_hz: 25.0,
            ..SpectralConfig::default()
        };
        assert!(matches!(
            SpectralAnalyzer::new(config, FS, 300),
            Err(AnalysisError::InvalidBandConfiguration { .. })
        ));
    }

    #[test]
    fn bpm_is_clamped() {
        let config = SpectralConfig {
            min_bpm: 60,
            max_bpm: 100,
            ..SpectralConfig::default()
        };
        let mut a = analyzer(config);
        assert_eq!(a.analyze(&sine(2.5, 300, 0.0, 1.0, 0.0)).unwrap().bpm, 100);
        assert_eq!(a.analyze(&sine(0.9, 300, 0.0, 1.0, 0.0)).unwrap().bpm, 60);
    }

    #[test]
    fn noise_has_lower_confidence_than_pulse() {
        let mut rng = StdRng::seed_from_u64(42);
        let noise: Vec<f64> = (0..300).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut a = analyzer(SpectralConfig::default());
        let noisy = a.analyze(&noise).unwrap();
        let clean = a.analyze(&sine(1.2, 300, 0.0, 1.0, 0.0)).unwrap();
        assert!(noisy.confidence < clean.confidence);
        assert!((0.0..=1.0).contains(&noisy.confidence));
    }

    #[test]
    fn flat_peak_skips_refinement() {
        let power = [1.0, 2.0, 1.0];
        assert_eq!(refine_peak(&power, 1, 3.0), 1.0);
        assert!((refine_peak(&[1.0, 3.0, 2.0], 1, 0.001) - 1.1666666).abs() < 1e-6);
        assert_eq!(refine_peak(&power, 0, 0.001), 0.0);
    }
}
