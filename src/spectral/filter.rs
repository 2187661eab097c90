//! Band-limiting and windowing applied before the transform.

use std::f64::consts::PI;

/// Second-order IIR section, RBJ cookbook coefficients normalised by `a0`.
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Biquad {
    /// Butterworth-Q low-pass.
    pub fn lowpass(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        let (cos_w0, alpha) = Self::prewarp(cutoff_hz, sample_rate_hz);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos_w0) / 2.0 / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: (1.0 - cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    /// Butterworth-Q high-pass.
    pub fn highpass(cutoff_hz: f64, sample_rate_hz: f64) -> Self {
        let (cos_w0, alpha) = Self::prewarp(cutoff_hz, sample_rate_hz);
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 + cos_w0) / 2.0 / a0,
            b1: -(1.0 + cos_w0) / a0,
            b2: (1.0 + cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
        }
    }

    fn prewarp(cutoff_hz: f64, sample_rate_hz: f64) -> (f64, f64) {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate_hz;
        let q = std::f64::consts::FRAC_1_SQRT_2;
        (w0.cos(), w0.sin() / (2.0 * q))
    }

    /// Filters `signal` in place, starting from rest.
    pub fn apply(&self, signal: &mut [f64]) {
        let (mut x1, mut x2, mut y1, mut y2) = (0.0, 0.0, 0.0, 0.0);
        for sample in signal.iter_mut() {
            let x0 = *sample;
            let y0 = self.b0 * x0 + self.b1 * x1 + self.b2 * x2 - self.a1 * y1 - self.a2 * y2;
            x2 = x1;
            x1 = x0;
            y2 = y1;
            y1 = y0;
            *sample = y0;
        }
    }

    /// Forward then backward pass: squared magnitude response, zero phase.
    pub fn apply_zero_phase(&self, signal: &mut [f64]) {
        self.apply(signal);
        signal.reverse();
        self.apply(signal);
        signal.reverse();
    }
}

/// 0.5-4 Hz band-pass built from a high-pass and a low-pass section.
#[derive(Debug, Clone, Copy)]
pub struct BandPass {
    highpass: Biquad,
    lowpass: Biquad,
}

impl BandPass {
    pub fn new(low_hz: f64, high_hz: f64, sample_rate_hz: f64) -> Self {
        Self {
            highpass: Biquad::highpass(low_hz, sample_rate_hz),
            lowpass: Biquad::lowpass(high_hz, sample_rate_hz),
        }
    }

    pub fn apply(&self, signal: &mut [f64]) {
        self.highpass.apply_zero_phase(signal);
        self.lowpass.apply_zero_phase(signal);
    }
}

/// Symmetric Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    let denom = (n - 1) as f64;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / denom).cos())
        .collect()
}
