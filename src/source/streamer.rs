use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::{FrameBuffer, FrameCallback};
use crate::error::SourceError;

/// Background thread that produces frames on a fixed period and hands them
/// to the registered callback. Shared by the simulated and replay sources.
pub(crate) struct Streamer {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Streamer {
    /// `produce(index)` returns the frame with that index, or `None` when the
    /// stream is exhausted.
    pub(crate) fn spawn<P>(
        name: &str,
        period: Duration,
        mut produce: P,
        mut on_frame: FrameCallback,
    ) -> Result<Self, SourceError>
    where
        P: FnMut(u64) -> Option<FrameBuffer> + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let start = Instant::now();
                let mut index = 0u64;
                while flag.load(Ordering::Acquire) {
                    let Some(buffer) = produce(index) else {
                        break;
                    };
                    if let Ok(frame) = buffer.as_frame() {
                        on_frame(frame);
                    }
                    index += 1;

                    // Pace against the start instant so jitter does not accumulate.
                    let due = start + period.mul_f64(index as f64);
                    let now = Instant::now();
                    if due > now {
                        thread::sleep(due - now);
                    }
                }
            })
            .map_err(|err| SourceError::Unavailable(format!("capture thread: {err}")))?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for the in-flight callback to finish.
    pub(crate) fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        self.stop();
    }
}
