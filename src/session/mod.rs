//! Measurement sessions.
//!
//! A session runs in three contexts: the frame source's capture thread
//! (presence detection and sample extraction), a processing task that owns
//! the state machine and the analyzer, and a completion task that hands the
//! single result to the caller. They talk only through channels and a
//! cancellation token.

pub mod controller;
pub mod state;
mod worker;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::{runtime::Handle, sync::oneshot, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::MeasurementConfig,
    error::ConfigError,
    source::{self, SharedFrameSource},
    spectral::{SpectralAnalyzer, SpectralEstimate},
};

pub use controller::MeasurementController;
pub use state::{
    CaptureEvent, MeasurementResult, SessionMachine, SessionState, Step, TimeoutKind,
};

use worker::Worker;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Outcome of one session, handed to the completion callback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: Uuid,
    pub result: MeasurementResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub analyses: u32,
    pub last_estimate: Option<SpectralEstimate>,
}

/// Optional informational callbacks, run on the processing task at most once
/// per frame. Neither is needed for a correct measurement.
#[derive(Default)]
pub struct SessionObservers {
    on_presence_changed: Option<Box<dyn FnMut(bool) + Send>>,
    on_quality_changed: Option<Box<dyn FnMut(f64) + Send>>,
    on_progress_changed: Option<Box<dyn FnMut(f64) + Send>>,
    last_presence: Option<bool>,
    last_quality: Option<f64>,
    last_progress: Option<f64>,
}

impl SessionObservers {
    pub fn on_presence_changed(mut self, f: impl FnMut(bool) + Send + 'static) -> Self {
        self.on_presence_changed = Some(Box::new(f));
        self
    }

    pub fn on_quality_changed(mut self, f: impl FnMut(f64) + Send + 'static) -> Self {
        self.on_quality_changed = Some(Box::new(f));
        self
    }

    /// Fraction of the analysis window collected so far, in [0, 1].
    pub fn on_progress_changed(mut self, f: impl FnMut(f64) + Send + 'static) -> Self {
        self.on_progress_changed = Some(Box::new(f));
        self
    }

    fn notify_progress(&mut self, progress: f64) {
        if self.last_progress != Some(progress) {
            self.last_progress = Some(progress);
            if let Some(f) = self.on_progress_changed.as_mut() {
                f(progress);
            }
        }
    }

    fn notify(&mut self, event: &CaptureEvent) {
        if self.last_presence != Some(event.present) {
            self.last_presence = Some(event.present);
            if let Some(f) = self.on_presence_changed.as_mut() {
                f(event.present);
            }
        }
        if self.last_quality != Some(event.quality) {
            self.last_quality = Some(event.quality);
            if let Some(f) = self.on_quality_changed.as_mut() {
                f(event.quality);
            }
        }
    }
}

/// A configured, not yet started measurement. Consumed by `start`; every
/// attempt builds a new session.
pub struct MeasurementSession {
    config: MeasurementConfig,
    source: SharedFrameSource,
    analyzer: SpectralAnalyzer,
    observers: SessionObservers,
    completion: Option<Handle>,
}

impl MeasurementSession {
    /// Validates the configuration and plans the transform for the source's
    /// nominal rate, so configuration errors surface here rather than
    /// mid-session.
    pub fn new(config: MeasurementConfig, source: SharedFrameSource) -> Result<Self, ConfigError> {
        config.validate()?;
        let sample_rate_hz = source::lock(&source).nominal_rate_hz();
        let analyzer =
            SpectralAnalyzer::new(config.spectral.clone(), sample_rate_hz, config.spectral.window_len)?;

        Ok(Self {
            config,
            source,
            analyzer,
            observers: SessionObservers::default(),
            completion: None,
        })
    }

    pub fn with_observers(mut self, observers: SessionObservers) -> Self {
        self.observers = observers;
        self
    }

    /// Run the completion callback on this runtime instead of the current one.
    pub fn with_completion_runtime(mut self, handle: Handle) -> Self {
        self.completion = Some(handle);
        self
    }

    /// Starts capture and processing. `on_result` is called exactly once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(self, on_result: F) -> SessionHandle
    where
        F: FnOnce(SessionReport) + Send + 'static,
    {
        let session_id = Uuid::new_v4();
        let now = Utc::now();
        let cancel_token = CancellationToken::new();

        let worker = Worker {
            report: SessionReport {
                session_id,
                result: MeasurementResult::Cancelled,
                started_at: now,
                finished_at: now,
                analyses: 0,
                last_estimate: None,
            },
            config: self.config,
            source: self.source,
            analyzer: Arc::new(Mutex::new(self.analyzer)),
            observers: self.observers,
            cancel_token: cancel_token.clone(),
        };

        let (result_tx, result_rx) = oneshot::channel();
        tokio::spawn(async move {
            let report = worker.run().await;
            let _ = result_tx.send(report);
        });

        let token = cancel_token.clone();
        let completion = self.completion.unwrap_or_else(Handle::current);
        let delivery = completion.spawn(async move {
            let mut report = match result_rx.await {
                Ok(report) => report,
                Err(_) => {
                    log_warn!("session {session_id}: processing task ended without a report");
                    SessionReport {
                        session_id,
                        result: MeasurementResult::Cancelled,
                        started_at: now,
                        finished_at: Utc::now(),
                        analyses: 0,
                        last_estimate: None,
                    }
                }
            };
            // A cancel that lands before delivery wins over whatever the
            // processing task concluded.
            if token.is_cancelled() {
                report.result = MeasurementResult::Cancelled;
            }
            on_result(report);
        });

        SessionHandle {
            session_id,
            cancel_token,
            delivery,
        }
    }
}

/// Handle to a running session.
pub struct SessionHandle {
    session_id: Uuid,
    cancel_token: CancellationToken,
    delivery: JoinHandle<()>,
}

impl SessionHandle {
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Callable from any thread. Releases the camera and light promptly;
    /// unless the result was already delivered, the callback receives
    /// `Cancelled`.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// True once the result callback has returned.
    pub fn is_finished(&self) -> bool {
        self.delivery.is_finished()
    }

    /// Waits until the result callback has run.
    pub async fn join(self) -> Result<()> {
        self.delivery
            .await
            .context("session completion task failed to join")
    }
}
