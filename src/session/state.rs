use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

use crate::{config::SessionConfig, signal::SignalBuffer, spectral::SpectralEstimate};

/// The single value a session delivers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum MeasurementResult {
    Success { bpm: u32 },
    /// No finger was ever detected within the no-finger timeout.
    NoFinger,
    /// The overall session limit elapsed.
    Timeout,
    Cancelled,
    HardwareUnavailable { reason: String },
}

impl MeasurementResult {
    pub fn bpm(&self) -> Option<u32> {
        match self {
            MeasurementResult::Success { bpm } => Some(*bpm),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimeoutKind {
    NoFinger,
    Overall,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    Idle,
    AwaitingFinger,
    Accumulating,
    Analyzing,
    Completed { bpm: u32 },
    TimedOut(TimeoutKind),
    Cancelled,
    /// The frame source could not be started.
    Failed,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed { .. }
                | SessionState::TimedOut(_)
                | SessionState::Cancelled
                | SessionState::Failed
        )
    }
}

/// What the capture thread forwards for each frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureEvent {
    pub present: bool,
    pub quality: f64,
    /// Red-channel mean, only extracted for frames with a finger present.
    pub sample: Option<f64>,
}

/// What the processing task must do after feeding the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    /// The buffer filled; analyze these samples and report back.
    Analyze(Vec<f64>),
    Finished(MeasurementResult),
}

/// Measurement state machine. Owned and driven by the processing task only;
/// time is passed in so transitions are deterministic.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    accept_quality: f64,
    min_confidence: f64,
    no_finger_timeout: Duration,
    max_duration: Duration,
    started_at: Option<Instant>,
    finger_seen: bool,
    buffer: SignalBuffer,
    analyses: u32,
    last_estimate: Option<SpectralEstimate>,
}

impl SessionMachine {
    pub fn new(config: &SessionConfig, window_len: usize) -> Self {
        Self {
            state: SessionState::Idle,
            accept_quality: config.accept_quality,
            min_confidence: config.min_confidence,
            no_finger_timeout: config.no_finger_timeout(),
            max_duration: config.max_duration(),
            started_at: None,
            finger_seen: false,
            buffer: SignalBuffer::new(window_len),
            analyses: 0,
            last_estimate: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Share of the current window already collected.
    pub fn progress(&self) -> f64 {
        self.buffer.fill_ratio()
    }

    pub fn analyses(&self) -> u32 {
        self.analyses
    }

    pub fn last_estimate(&self) -> Option<&SpectralEstimate> {
        self.last_estimate.as_ref()
    }

    pub fn start(&mut self, now: Instant) {
        if self.state != SessionState::Idle {
            return;
        }
        self.buffer.clear();
        self.started_at = Some(now);
        self.state = SessionState::AwaitingFinger;
    }

    pub fn on_capture(&mut self, event: CaptureEvent) -> Step {
        if !self.is_running() {
            return Step::Continue;
        }
        if event.present {
            self.finger_seen = true;
        }
        let accepted = event.present && event.quality > self.accept_quality;

        match self.state {
            SessionState::AwaitingFinger if accepted => {
                self.state = SessionState::Accumulating;
                self.accumulate(event.sample)
            }
            SessionState::Accumulating if !accepted => {
                // Collected samples are kept; the next accepted frame resumes the fill.
                self.state = SessionState::AwaitingFinger;
                Step::Continue
            }
            SessionState::Accumulating => self.accumulate(event.sample),
            _ => Step::Continue,
        }
    }

    fn accumulate(&mut self, sample: Option<f64>) -> Step {
        let Some(sample) = sample else {
            return Step::Continue;
        };
        if self.buffer.push(sample) {
            self.state = SessionState::Analyzing;
            return Step::Analyze(self.buffer.snapshot());
        }
        Step::Continue
    }

    /// `None` means the analysis produced nothing usable.
    pub fn on_analysis(&mut self, estimate: Option<SpectralEstimate>) -> Step {
        if self.state != SessionState::Analyzing {
            return Step::Continue;
        }
        self.analyses += 1;

        match estimate {
            Some(estimate) if estimate.confidence >= self.min_confidence => {
                let bpm = estimate.bpm;
                self.last_estimate = Some(estimate);
                self.state = SessionState::Completed { bpm };
                Step::Finished(MeasurementResult::Success { bpm })
            }
            rejected => {
                if rejected.is_some() {
                    self.last_estimate = rejected;
                }
                // Start a fresh window rather than reuse stale samples.
                self.buffer.clear();
                self.state = SessionState::Accumulating;
                Step::Continue
            }
        }
    }

    pub fn on_tick(&mut self, now: Instant) -> Step {
        if !self.is_running() {
            return Step::Continue;
        }
        let Some(started_at) = self.started_at else {
            return Step::Continue;
        };
        let elapsed = now.saturating_duration_since(started_at);

        if !self.finger_seen && elapsed >= self.no_finger_timeout {
            self.state = SessionState::TimedOut(TimeoutKind::NoFinger);
            return Step::Finished(MeasurementResult::NoFinger);
        }
        if elapsed >= self.max_duration {
            self.state = SessionState::TimedOut(TimeoutKind::Overall);
            return Step::Finished(MeasurementResult::Timeout);
        }
        Step::Continue
    }

    pub fn cancel(&mut self) -> Step {
        if self.state.is_terminal() {
            return Step::Continue;
        }
        self.state = SessionState::Cancelled;
        Step::Finished(MeasurementResult::Cancelled)
    }

    pub fn fail(&mut self, reason: String) -> Step {
        if self.state.is_terminal() {
            return Step::Continue;
        }
        self.state = SessionState::Failed;
        Step::Finished(MeasurementResult::HardwareUnavailable { reason })
    }

    fn is_running(&self) -> bool {
        !self.state.is_terminal() && self.state != SessionState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: usize = 8;

    fn machine() -> (SessionMachine, Instant) {
        let config = SessionConfig::default();
        let mut machine = SessionMachine::new(&config, WINDOW);
        let t0 = Instant::now();
        machine.start(t0);
        (machine, t0)
    }

    fn finger(sample: f64) -> CaptureEvent {
        CaptureEvent {
            present: true,
            quality: 0.9,
            sample: Some(sample),
        }
    }

    fn no_finger() -> CaptureEvent {
        CaptureEvent {
            present: false,
            quality: 0.0,
            sample: None,
        }
    }

    fn estimate(bpm: u32, confidence: f64) -> SpectralEstimate {
        SpectralEstimate {
            bpm,
            frequency_hz: bpm as f64 / 60.0,
            peak_bin: 20,
            refined_bin: 20.0,
            peak_power: 100.0,
            confidence,
        }
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn start_awaits_finger() {
        let (machine, _) = machine();
        assert_eq!(machine.state(), SessionState::AwaitingFinger);
    }

    #[test]
    fn low_quality_finger_is_not_accepted() {
        let (mut machine, _) = machine();
        let weak = CaptureEvent {
            quality: 0.3,
            ..finger(1.0)
        };
        assert_eq!(machine.on_capture(weak), Step::Continue);
        assert_eq!(machine.state(), SessionState::AwaitingFinger);
        assert_eq!(machine.buffered(), 0);
    }

    #[test]
    fn full_window_triggers_analysis_once() {
        let (mut machine, _) = machine();
        for i in 0..WINDOW - 1 {
            assert_eq!(machine.on_capture(finger(i as f64)), Step::Continue);
        }
        assert_eq!(machine.state(), SessionState::Accumulating);
        let step = machine.on_capture(finger(99.0));
        assert!(matches!(step, Step::Analyze(ref s) if s.len() == WINDOW && s[WINDOW - 1] == 99.0));
        assert_eq!(machine.state(), SessionState::Analyzing);
        // Frames arriving mid-analysis do not trigger another.
        assert_eq!(machine.on_capture(finger(1.0)), Step::Continue);
    }

    #[test]
    fn presence_toggle_keeps_samples() {
        let (mut machine, _) = machine();
        for _ in 0..3 {
            machine.on_capture(finger(1.0));
        }
        machine.on_capture(no_finger());
        assert_eq!(machine.state(), SessionState::AwaitingFinger);
        assert_eq!(machine.buffered(), 3);

        machine.on_capture(finger(1.0));
        assert_eq!(machine.state(), SessionState::Accumulating);
        assert_eq!(machine.buffered(), 4);
    }

    #[test]
    fn accepted_estimate_completes() {
        let (mut machine, _) = machine();
        for _ in 0..WINDOW {
            machine.on_capture(finger(1.0));
        }
        let step = machine.on_analysis(Some(estimate(72, 0.4)));
        assert_eq!(step, Step::Finished(MeasurementResult::Success { bpm: 72 }));
        assert_eq!(machine.state(), SessionState::Completed { bpm: 72 });
        assert_eq!(machine.analyses(), 1);
    }

    #[test]
    fn rejected_analysis_restarts_accumulation() {
        let (mut machine, _) = machine();
        for _ in 0..WINDOW {
            machine.on_capture(finger(1.0));
        }
        assert_eq!(machine.on_analysis(None), Step::Continue);
        assert_eq!(machine.state(), SessionState::Accumulating);
        assert_eq!(machine.buffered(), 0);

        // A second fill cycle analyzes again.
        let steps: Vec<Step> = (0..WINDOW).map(|_| machine.on_capture(finger(2.0))).collect();
        assert!(matches!(steps.last(), Some(Step::Analyze(_))));
    }

    #[test]
    fn low_confidence_estimate_is_rejected() {
        let config = SessionConfig {
            min_confidence: 0.5,
            ..SessionConfig::default()
        };
        let mut machine = SessionMachine::new(&config, WINDOW);
        machine.start(Instant::now());
        for _ in 0..WINDOW {
            machine.on_capture(finger(1.0));
        }
        assert_eq!(machine.on_analysis(Some(estimate(90, 0.2))), Step::Continue);
        assert_eq!(machine.state(), SessionState::Accumulating);
        assert_eq!(machine.last_estimate().map(|e| e.bpm), Some(90));
    }

    #[test]
    fn no_finger_timeout_fires_on_time() {
        let (mut machine, t0) = machine();
        assert_eq!(machine.on_tick(t0 + secs(19)), Step::Continue);
        assert_eq!(
            machine.on_tick(t0 + secs(20)),
            Step::Finished(MeasurementResult::NoFinger)
        );
        assert_eq!(machine.state(), SessionState::TimedOut(TimeoutKind::NoFinger));
    }

    #[test]
    fn seen_finger_disarms_no_finger_timeout() {
        let (mut machine, t0) = machine();
        // Present but too weak to accept still counts as observed.
        machine.on_capture(CaptureEvent {
            quality: 0.0,
            ..finger(1.0)
        });
        machine.on_capture(no_finger());
        assert_eq!(machine.on_tick(t0 + secs(30)), Step::Continue);
        assert_eq!(machine.on_tick(t0 + secs(44)), Step::Continue);
        assert_eq!(
            machine.on_tick(t0 + secs(45)),
            Step::Finished(MeasurementResult::Timeout)
        );
        assert_eq!(machine.state(), SessionState::TimedOut(TimeoutKind::Overall));
    }

    #[test]
    fn overall_timeout_applies_while_accumulating() {
        let (mut machine, t0) = machine();
        machine.on_capture(finger(1.0));
        assert_eq!(
            machine.on_tick(t0 + secs(45)),
            Step::Finished(MeasurementResult::Timeout)
        );
    }

    #[test]
    fn terminal_state_ignores_further_input() {
        let (mut machine, t0) = machine();
        assert_eq!(machine.cancel(), Step::Finished(MeasurementResult::Cancelled));
        assert_eq!(machine.cancel(), Step::Continue);
        assert_eq!(machine.on_capture(finger(1.0)), Step::Continue);
        assert_eq!(machine.on_tick(t0 + secs(100)), Step::Continue);
        assert_eq!(machine.on_analysis(Some(estimate(72, 1.0))), Step::Continue);
        assert_eq!(machine.fail("late".into()), Step::Continue);
        assert_eq!(machine.state(), SessionState::Cancelled);
    }

    #[test]
    fn idle_machine_ignores_frames_and_ticks() {
        let mut machine = SessionMachine::new(&SessionConfig::default(), WINDOW);
        assert_eq!(machine.on_capture(finger(1.0)), Step::Continue);
        assert_eq!(machine.on_tick(Instant::now()), Step::Continue);
        assert_eq!(machine.state(), SessionState::Idle);
    }

    #[test]
    fn result_serializes_with_kind_tag() {
        let json = serde_json::to_string(&MeasurementResult::Success { bpm: 72 }).unwrap();
        assert_eq!(json, r#"{"kind":"success","bpm":72}"#);
        let json = serde_json::to_string(&MeasurementResult::NoFinger).unwrap();
        assert_eq!(json, r#"{"kind":"noFinger"}"#);
    }
}
