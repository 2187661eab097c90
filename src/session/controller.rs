use anyhow::{anyhow, bail, Result};
use log::info;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use uuid::Uuid;

use crate::{config::MeasurementConfig, source::SharedFrameSource};

use super::{MeasurementSession, SessionHandle, SessionObservers, SessionReport};

/// Caller-facing entry point. Owns the frame source and makes sure only one
/// session uses it at a time.
#[derive(Clone)]
pub struct MeasurementController {
    source: SharedFrameSource,
    config: MeasurementConfig,
    active: Arc<Mutex<Option<SessionHandle>>>,
}

impl MeasurementController {
    pub fn new(source: SharedFrameSource, config: MeasurementConfig) -> Self {
        Self {
            source,
            config,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn is_active(&self) -> bool {
        let guard = self.active.lock().await;
        guard.as_ref().map(|handle| !handle.is_finished()).unwrap_or(false)
    }

    pub async fn start_session<F>(&self, on_result: F) -> Result<Uuid>
    where
        F: FnOnce(SessionReport) + Send + 'static,
    {
        self.start_session_with(SessionObservers::default(), on_result)
            .await
    }

    pub async fn start_session_with<F>(&self, observers: SessionObservers, on_result: F) -> Result<Uuid>
    where
        F: FnOnce(SessionReport) + Send + 'static,
    {
        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|handle| !handle.is_finished()) {
            bail!("measurement session already active");
        }

        let session = MeasurementSession::new(self.config.clone(), self.source.clone())?
            .with_observers(observers);
        let handle = session.start(on_result);
        let session_id = handle.session_id();
        info!("Started measurement session {}", session_id);

        *active = Some(handle);
        Ok(session_id)
    }

    /// Cancels the active session, if any, and waits for its callback. The
    /// slot stays locked until the camera is released, so a concurrent
    /// `start_session` cannot race the teardown.
    pub async fn cancel_session(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        let Some(handle) = active.take() else {
            return Ok(());
        };
        info!("Cancelling measurement session {}", handle.session_id());
        handle.cancel();
        handle.join().await
    }

    /// Runs one session to completion and returns its report.
    pub async fn measure(&self) -> Result<SessionReport> {
        self.measure_with(SessionObservers::default()).await
    }

    pub async fn measure_with(&self, observers: SessionObservers) -> Result<SessionReport> {
        let (tx, rx) = oneshot::channel();
        let session_id = self
            .start_session_with(observers, move |report| {
                let _ = tx.send(report);
            })
            .await?;

        let report = rx
            .await
            .map_err(|_| anyhow!("session ended without delivering a result"))?;

        // Only reap our own session; another caller may own the slot by now.
        let mut active = self.active.lock().await;
        if active
            .as_ref()
            .is_some_and(|handle| handle.session_id() == session_id)
        {
            if let Some(handle) = active.take() {
                handle.join().await?;
            }
        }
        Ok(report)
    }
}
