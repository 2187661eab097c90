use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::{JoinError, JoinHandle},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::MeasurementConfig,
    error::AnalysisError,
    signal::{FingerPresenceDetector, SignalExtractor},
    source::{CaptureGuard, FrameCallback, SharedFrameSource},
    spectral::{SpectralAnalyzer, SpectralEstimate},
};

use super::{
    state::{CaptureEvent, MeasurementResult, SessionMachine, Step},
    SessionObservers, SessionReport,
};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

type AnalysisOutcome = Result<SpectralEstimate, AnalysisError>;
type AnalysisJob = JoinHandle<AnalysisOutcome>;

pub(crate) struct Worker {
    pub(crate) report: SessionReport,
    pub(crate) config: MeasurementConfig,
    pub(crate) source: SharedFrameSource,
    pub(crate) analyzer: Arc<Mutex<SpectralAnalyzer>>,
    pub(crate) observers: SessionObservers,
    pub(crate) cancel_token: CancellationToken,
}

/// Builds the per-frame callback run on the capture thread. Only the
/// reduced `CaptureEvent` crosses into the processing task.
fn capture_callback(config: &MeasurementConfig, tx: mpsc::Sender<CaptureEvent>) -> FrameCallback {
    let mut detector = FingerPresenceDetector::new(config.presence.clone());
    let extractor = SignalExtractor::new(&config.extractor);
    let mut dropped = 0u64;

    Box::new(move |frame| {
        let reading = detector.observe(&frame);
        let event = CaptureEvent {
            present: reading.present,
            quality: reading.quality,
            sample: reading.present.then(|| extractor.extract(&frame)),
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                if dropped.is_power_of_two() {
                    log_warn!("processing behind: dropped {dropped} capture events");
                }
            }
            // Session finished; late frames go nowhere.
            Err(TrySendError::Closed(_)) => {}
        }
    })
}

async fn join_pending(job: &mut Option<AnalysisJob>) -> Result<AnalysisOutcome, JoinError> {
    match job {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

impl Worker {
    pub(crate) async fn run(mut self) -> SessionReport {
        let session_id = self.report.session_id;
        let (tx, mut rx) = mpsc::channel(self.config.session.capture_queue_len);
        let mut machine = SessionMachine::new(&self.config.session, self.config.spectral.window_len);

        // Hold the camera and light only while this task runs; the guard's
        // drop releases them on every exit path.
        let guard = match CaptureGuard::acquire(self.source.clone(), capture_callback(&self.config, tx)) {
            Ok(guard) => guard,
            Err(err) => {
                log_error!("session {session_id}: {err}");
                machine.start(Instant::now());
                let result = match machine.fail(err.to_string()) {
                    Step::Finished(result) => result,
                    _ => MeasurementResult::HardwareUnavailable {
                        reason: err.to_string(),
                    },
                };
                return self.finish(&machine, result);
            }
        };

        machine.start(Instant::now());
        log_info!(
            "session {session_id} started: window {} samples at {:.1} Hz",
            self.config.spectral.window_len,
            guard.nominal_rate_hz()
        );

        let mut ticker = tokio::time::interval(self.config.session.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending: Option<AnalysisJob> = None;
        let mut stream_open = true;

        let result = loop {
            let step = tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => machine.cancel(),

                _ = ticker.tick() => machine.on_tick(Instant::now()),

                joined = join_pending(&mut pending), if pending.is_some() => {
                    pending = None;
                    let estimate = match joined {
                        Ok(Ok(estimate)) => {
                            log_info!(
                                "session {session_id}: estimate {} BPM ({:.3} Hz, confidence {:.2})",
                                estimate.bpm, estimate.frequency_hz, estimate.confidence
                            );
                            Some(estimate)
                        }
                        Ok(Err(AnalysisError::LowSignal { peak_power })) => {
                            log_warn!("session {session_id}: low signal (peak {peak_power:e}), collecting a new window");
                            None
                        }
                        Ok(Err(err)) => {
                            log_error!("session {session_id}: analysis contract violated: {err}");
                            None
                        }
                        Err(err) => {
                            log_error!("session {session_id}: analysis task failed: {err}");
                            None
                        }
                    };
                    machine.on_analysis(estimate)
                }

                event = rx.recv(), if stream_open => match event {
                    Some(event) => {
                        self.observers.notify(&event);
                        let step = machine.on_capture(event);
                        self.observers.notify_progress(machine.progress());
                        step
                    }
                    None => {
                        log_warn!("session {session_id}: frame source stopped delivering");
                        stream_open = false;
                        Step::Continue
                    }
                },
            };

            match step {
                Step::Continue => {}
                Step::Analyze(samples) => {
                    log_debug!("session {session_id}: buffer full, analyzing {} samples", samples.len());
                    let analyzer = self.analyzer.clone();
                    pending = Some(tokio::task::spawn_blocking(move || {
                        analyzer
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .analyze(&samples)
                    }));
                }
                Step::Finished(result) => break result,
            }
        };

        // Stop frames and the light before the caller hears about it.
        drop(guard);
        drop(rx);
        self.finish(&machine, result)
    }

    fn finish(mut self, machine: &SessionMachine, result: MeasurementResult) -> SessionReport {
        log_info!(
            "session {} finished: {:?} after {} analyses",
            self.report.session_id,
            result,
            machine.analyses()
        );
        self.report.result = result;
        self.report.finished_at = Utc::now();
        self.report.analyses = machine.analyses();
        self.report.last_estimate = machine.last_estimate().cloned();
        self.report
    }
}
