// src/types.rs

/// One timestamped reading taken by the sampler.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sample {
    /// Monotonic timestamp in microseconds.
    pub timestamp_us: u64,
    /// Raw converter counts.
    pub raw: i16,
    /// Converted value, volts for the MQ-3 front end.
    pub value: f64,
}

impl Sample {
    pub fn new(timestamp_us: u64, raw: i16, value: f64) -> Self {
        Self {
            timestamp_us,
            raw,
            value,
        }
    }
}

/// Summary of one closed analysis window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindowResult {
    pub stable: bool,
    pub mean: f64,
    pub stddev: f64,
    /// Mean of the previous window that had enough samples, if any.
    pub prior_mean: Option<f64>,
    pub drift_per_sec: f64,
    pub window_start_us: u64,
    pub window_end_us: u64,
    /// Values that fell inside the window; zero across a sampling gap.
    pub sample_count: usize,
}

impl WindowResult {
    pub fn duration_us(&self) -> u64 {
        self.window_end_us.saturating_sub(self.window_start_us)
    }
}

// 呼气状态机的阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BreathPhase {
    #[default]
    Warmup,
    Ready,
    Processing,
    Analyzed,
    Cooldown,
}

/// Why a breath left the `Processing` phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BreathEnd {
    #[default]
    FallingEdge,
    MaxDuration,
}

/// Lifecycle notification emitted by the breath state machine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BreathEvent {
    pub start_us: u64,
    pub end_us: u64,
    pub peak_voltage: f64,
    /// Phase the machine entered when this event was emitted.
    pub state: BreathPhase,
    /// Only meaningful for `Analyzed` and the `Cooldown` that follows it.
    pub ended_by: BreathEnd,
}

impl BreathEvent {
    pub fn phase(state: BreathPhase) -> Self {
        Self {
            state,
            ..Default::default()
        }
    }

    pub fn duration_us(&self) -> u64 {
        self.end_us.saturating_sub(self.start_us)
    }
}

/// Live snapshot owned by the runtime processor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BreathResult {
    pub baseline_mean: f64,
    pub baseline_stddev: f64,
    pub peak_value: f64,
    pub phase: BreathPhase,
    pub last_window: WindowResult,
}

// 处理器告诉运行循环下一步做什么
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StepAction {
    #[default]
    Continue,
    Done,
    Abort,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StepEvent {
    #[default]
    None,
    /// A window closed (calibration progress).
    Window,
    /// The breath state machine entered an observable phase.
    Phase(BreathPhase),
}

impl StepEvent {
    pub fn is_some(&self) -> bool {
        !matches!(self, StepEvent::None)
    }
}

/// Outcome of handing one batch to a processor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepResult<R> {
    pub action: StepAction,
    pub event: StepEvent,
    pub result: R,
}

impl<R> StepResult<R> {
    pub fn proceed(result: R) -> Self {
        Self {
            action: StepAction::Continue,
            event: StepEvent::None,
            result,
        }
    }
}
