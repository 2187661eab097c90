//! Frame source boundary: the camera and light driver the engine consumes.

pub mod frame;
pub mod replay;
pub mod synthetic;
mod streamer;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::SourceError;

pub use frame::{Frame, FrameBuffer, PixelFormat, RgbMean};
pub use replay::{ReplayConfig, ReplayFrameSource};
pub use synthetic::{FingerScript, Pacing, SyntheticConfig, SyntheticFrameSource};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Invoked on the source's capture thread once per frame.
pub type FrameCallback = Box<dyn FnMut(Frame<'_>) + Send + 'static>;

/// Camera plus light driver.
///
/// Implementations own their capture thread and call the registered
/// callback at roughly `nominal_rate_hz`. `stop` must not return while a
/// callback invocation is still running.
pub trait FrameSource: Send {
    fn nominal_rate_hz(&self) -> f64;

    fn start(&mut self, on_frame: FrameCallback) -> Result<(), SourceError>;

    fn stop(&mut self);

    fn set_torch(&mut self, on: bool) -> Result<(), SourceError>;

    /// Request fixed exposure, focus and white balance for the session.
    fn lock_capture_settings(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

pub type SharedFrameSource = Arc<Mutex<dyn FrameSource>>;

pub fn shared<S: FrameSource + 'static>(source: S) -> SharedFrameSource {
    Arc::new(Mutex::new(source))
}

pub(crate) fn lock(source: &SharedFrameSource) -> MutexGuard<'_, dyn FrameSource + 'static> {
    source.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds the camera stream and the light for the duration of a session.
/// Dropping the guard stops streaming and turns the light off.
pub struct CaptureGuard {
    source: SharedFrameSource,
}

impl CaptureGuard {
    pub fn acquire(source: SharedFrameSource, on_frame: FrameCallback) -> Result<Self, SourceError> {
        {
            let mut guard = lock(&source);
            guard.lock_capture_settings()?;
            guard.set_torch(true)?;
            if let Err(err) = guard.start(on_frame) {
                let _ = guard.set_torch(false);
                return Err(err);
            }
        }
        log_info!("capture acquired: streaming with light on");
        Ok(Self { source })
    }

    pub fn nominal_rate_hz(&self) -> f64 {
        lock(&self.source).nominal_rate_hz()
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        let mut guard = lock(&self.source);
        guard.stop();
        if let Err(err) = guard.set_torch(false) {
            log_warn!("failed to turn light off on release: {err}");
        }
        log_info!("capture released");
    }
}
