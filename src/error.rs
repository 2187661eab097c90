//! Error types for the measurement engine.

use thiserror::Error;

/// Failures of the spectral pipeline.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// Fewer samples than the transform minimum. The buffer capacity is fixed
    /// per session, so this is a contract violation rather than a runtime
    /// condition.
    #[error("insufficient samples: got {len}, need at least {min}")]
    InsufficientSamples { len: usize, min: usize },

    /// No FFT bin falls inside the physiological search band for the
    /// configured transform size and sample rate.
    #[error(
        "empty search band {min_hz:.2}-{max_hz:.2} Hz for fft_len={fft_len} at {sample_rate_hz:.1} Hz"
    )]
    InvalidBandConfiguration {
        min_hz: f64,
        max_hz: f64,
        fft_len: usize,
        sample_rate_hz: f64,
    },

    /// The detrended spectrum carries no usable energy in the search band.
    #[error("low signal: peak power {peak_power:e}")]
    LowSignal { peak_power: f64 },
}

/// Invalid calibration or timing configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be in {range}, got {value}")]
    OutOfRange {
        field: &'static str,
        range: &'static str,
        value: f64,
    },

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

/// Failures reported by a frame source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The camera or light refused to start. Surfaced immediately, never
    /// retried.
    #[error("frame source unavailable: {0}")]
    Unavailable(String),

    #[error("frame source already streaming")]
    AlreadyStreaming,
}

/// A frame whose geometry does not match its pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("stride {stride} smaller than row of {width} px x {bytes_per_pixel} B")]
    StrideTooSmall {
        stride: usize,
        width: usize,
        bytes_per_pixel: usize,
    },

    #[error("pixel buffer holds {actual} bytes, frame needs {expected}")]
    BufferTooSmall { expected: usize, actual: usize },

    #[error("frame has zero area ({width}x{height})")]
    Empty { width: usize, height: usize },
}
