//! Settings for one acquisition session.
//!
//! Every section falls back to the values the MQ-3 rig was tuned with, so a
//! settings file only needs to name what it changes. Settings are loaded once
//! before a run and never mutated afterwards.
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::drivers::PipelineError;

/// 128 Hz on the ADS1115, truncated to whole microseconds.
pub const DEFAULT_SAMPLE_PERIOD_US: u64 = 1_000_000 / 128;
pub const DEFAULT_RING_CAPACITY: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub period_us: u64,
}

impl SamplerConfig {
    pub fn period(&self) -> Duration {
        Duration::from_micros(self.period_us)
    }
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            period_us: DEFAULT_SAMPLE_PERIOD_US,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RingConfig {
    /// Must be a power of two.
    pub capacity: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

/// Windowing and stability thresholds for the Welford analyzer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub window_us: u64,
    pub min_window_sample_size: usize,
    /// Volts.
    pub stddev_max: f64,
    /// Volts per second.
    pub drift_per_sec_max: f64,
    pub stable_consecutive_windows_req: usize,
}

impl AnalyzerConfig {
    pub fn window_seconds(&self) -> f64 {
        self.window_us as f64 / 1_000_000.0
    }
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            window_us: 1_000_000,
            min_window_sample_size: 80,
            stddev_max: 0.002,
            drift_per_sec_max: 0.001,
            stable_consecutive_windows_req: 3,
        }
    }
}

/// Hysteresis and timing for the breath state machine.
///
/// Each threshold is `baseline_mean + delta_v + k_sigma * baseline_stddev`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreathConfig {
    pub warmup_stable_windows: u32,
    pub cooldown_stable_windows: u32,
    pub min_blow_time_us: u64,
    pub max_blow_time_us: u64,
    pub start_delta_v: f64,
    pub start_k_sigma: f64,
    pub end_delta_v: f64,
    pub end_k_sigma: f64,
    pub ready_delta_v: f64,
    pub ready_k_sigma: f64,
    /// EWMA weight given to each new stable window.
    pub baseline_alpha: f64,
}

impl Default for BreathConfig {
    fn default() -> Self {
        Self {
            warmup_stable_windows: 25,
            cooldown_stable_windows: 25,
            min_blow_time_us: 400_000,
            max_blow_time_us: 5_000_000,
            start_delta_v: 0.05,
            start_k_sigma: 3.0,
            end_delta_v: 0.02,
            end_k_sigma: 3.0,
            ready_delta_v: 0.01,
            ready_k_sigma: 2.0,
            baseline_alpha: 0.05,
        }
    }
}

/// Consumer loop pacing.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub idle_sleep_ms: u64,
    pub tick_sleep_ms: u64,
    /// Only honoured by processors that opt into timeouts.
    pub timeout_ms: Option<u64>,
    pub max_batch: usize,
}

impl ConsumerConfig {
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn tick_sleep(&self) -> Duration {
        Duration::from_millis(self.tick_sleep_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            idle_sleep_ms: 5,
            tick_sleep_ms: 50,
            timeout_ms: Some(60_000),
            max_batch: 256,
        }
    }
}

/// MQ-3 front-end component values.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub load_resistance_ohms: f64,
    /// Clean-air sensor resistance from a previous calibration.
    pub ro_air_ohms: f64,
    pub supply_volts: f64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            load_resistance_ohms: 20_000.0,
            ro_air_ohms: 685.124026,
            supply_volts: 5.0,
        }
    }
}

/// How long results stay on the LEDs.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub calibration_hold_ms: u64,
    pub bac_hold_ms: u64,
}

impl IndicatorConfig {
    pub fn calibration_hold(&self) -> Duration {
        Duration::from_millis(self.calibration_hold_ms)
    }

    pub fn bac_hold(&self) -> Duration {
        Duration::from_millis(self.bac_hold_ms)
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            calibration_hold_ms: 5_000,
            bac_hold_ms: 10_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub sampler: SamplerConfig,
    pub ring: RingConfig,
    pub analyzer: AnalyzerConfig,
    pub breath: BreathConfig,
    pub consumer: ConsumerConfig,
    pub circuit: CircuitConfig,
    pub indicator: IndicatorConfig,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, PipelineError> {
        let settings: Settings = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.sampler.period_us == 0 {
            return Err(PipelineError::InvalidSamplePeriod);
        }
        let capacity = self.ring.capacity;
        if !capacity.is_power_of_two() {
            return Err(PipelineError::RingCapacity(capacity));
        }
        if self.analyzer.window_us == 0 {
            return Err(PipelineError::InvalidWindow);
        }
        if self.consumer.max_batch == 0 {
            return Err(PipelineError::InvalidBatchSize);
        }
        let alpha = self.breath.baseline_alpha;
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(PipelineError::BaselineAlpha(alpha));
        }
        if self.breath.min_blow_time_us > self.breath.max_blow_time_us {
            return Err(PipelineError::BlowTimeRange {
                min_us: self.breath.min_blow_time_us,
                max_us: self.breath.max_blow_time_us,
            });
        }
        Ok(())
    }
}
