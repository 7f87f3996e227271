use std::collections::VecDeque;

use log::{info, warn};

use crate::config::{AnalyzerConfig, BreathConfig};
use crate::drivers::breath::BreathStateMachine;
use crate::drivers::window::WindowAnalyzer;
use crate::types::{
    BreathEvent, BreathResult, Sample, StepAction, StepEvent, StepResult, WindowResult,
};

/// Undelivered breath events kept by default before the oldest is dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Projection from a sample to the scalar being analyzed.
pub type ValueOf = Box<dyn Fn(&Sample) -> f64 + Send>;

fn sample_value(sample: &Sample) -> f64 {
    sample.value
}

/// Batch-level strategy driven by [`crate::drivers::BatchRunner`].
pub trait Processor {
    type Output: Clone;

    /// Handles one drained batch and tells the runner how to proceed.
    fn on_batch(&mut self, samples: &[Sample]) -> StepResult<Self::Output>;

    /// Best result so far; returned when the runner stops for any reason.
    fn result(&self) -> Self::Output;

    /// Whether the runner's overall timeout applies to this processor.
    fn supports_timeout(&self) -> bool {
        true
    }
}

/// Looks for the first stable window, e.g. to measure clean-air sensor
/// resistance.
pub struct CalibrationProcessor {
    analyzer: WindowAnalyzer,
    value_of: ValueOf,
    last: WindowResult,
}

impl CalibrationProcessor {
    pub fn new(cfg: AnalyzerConfig) -> Self {
        Self {
            analyzer: WindowAnalyzer::new(cfg),
            value_of: Box::new(sample_value),
            last: WindowResult::default(),
        }
    }

    pub fn with_value_of(mut self, value_of: impl Fn(&Sample) -> f64 + Send + 'static) -> Self {
        self.value_of = Box::new(value_of);
        self
    }

    pub fn analyzer(&self) -> &WindowAnalyzer {
        &self.analyzer
    }
}

impl Processor for CalibrationProcessor {
    type Output = WindowResult;

    fn on_batch(&mut self, samples: &[Sample]) -> StepResult<WindowResult> {
        let mut step = StepResult::proceed(self.last);
        let Some(window) = self.analyzer.analyze_batch(samples, &self.value_of) else {
            return step;
        };
        info!(
            "window mean={:.6}V sd={:.6}V drift={:.6}V/s stable={}",
            window.mean, window.stddev, window.drift_per_sec, window.stable
        );
        self.last = window;
        step.result = window;
        step.event = StepEvent::Window;
        if window.stable {
            info!("stable value found, mean={:.6}V", window.mean);
            step.action = StepAction::Done;
        }
        step
    }

    fn result(&self) -> WindowResult {
        self.last
    }
}

/// Continuous breath monitoring: every closed window goes through the breath
/// state machine, and lifecycle events queue up until drained.
///
/// The queue is bounded: once it holds `event_capacity` events the oldest is
/// dropped for each new one, so running without an observer that calls
/// [`RuntimeProcessor::pop_pending_event`] keeps only the most recent events.
pub struct RuntimeProcessor {
    analyzer: WindowAnalyzer,
    machine: BreathStateMachine,
    value_of: ValueOf,
    pending: VecDeque<BreathEvent>,
    event_capacity: usize,
}

impl RuntimeProcessor {
    pub fn new(analyzer_cfg: AnalyzerConfig, breath_cfg: BreathConfig) -> Self {
        Self {
            analyzer: WindowAnalyzer::new(analyzer_cfg),
            machine: BreathStateMachine::new(breath_cfg),
            value_of: Box::new(sample_value),
            pending: VecDeque::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }

    /// Bounds the undelivered event queue; at least one event is kept.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn with_value_of(mut self, value_of: impl Fn(&Sample) -> f64 + Send + 'static) -> Self {
        self.value_of = Box::new(value_of);
        self
    }

    pub fn machine(&self) -> &BreathStateMachine {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut BreathStateMachine {
        &mut self.machine
    }

    /// Oldest undelivered event, if any.
    pub fn pop_pending_event(&mut self) -> Option<BreathEvent> {
        self.pending.pop_front()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl Processor for RuntimeProcessor {
    type Output = BreathResult;

    fn on_batch(&mut self, samples: &[Sample]) -> StepResult<BreathResult> {
        let machine = &mut self.machine;
        let pending = &mut self.pending;
        let capacity = self.event_capacity;
        let mut latest = None;
        for sample in samples {
            let value = (self.value_of)(sample);
            self.analyzer.advance(sample.timestamp_us, value, |window| {
                if let Some(event) = machine.on_window(&window).event {
                    latest = Some(event.state);
                    if pending.len() >= capacity {
                        if let Some(lost) = pending.pop_front() {
                            warn!("event queue full, dropping undelivered {:?}", lost.state);
                        }
                    }
                    pending.push_back(event);
                }
            });
        }
        let mut step = StepResult::proceed(self.machine.result());
        if let Some(phase) = latest {
            step.event = StepEvent::Phase(phase);
        }
        step
    }

    fn result(&self) -> BreathResult {
        self.machine.result()
    }

    fn supports_timeout(&self) -> bool {
        false
    }
}
