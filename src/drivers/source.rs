use std::collections::VecDeque;
use std::time::Instant;

use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::Sample;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Microseconds on the process-wide monotonic clock.
pub fn monotonic_us() -> u64 {
    EPOCH.elapsed().as_micros() as u64
}

/// ADS1115 full-scale range used by the MQ-3 front end (±4.096 V).
pub const ADC_FULL_SCALE_VOLTS: f64 = 4.096;

/// Counts the ADS1115 reports for `volts` at ±4.096 V full scale.
pub fn volts_to_counts(volts: f64) -> i16 {
    let counts = (volts / ADC_FULL_SCALE_VOLTS * 32768.0).round();
    counts.clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Something the sampler can pull one reading from per tick.
///
/// `None` means no reading this tick; the sampler skips it.
pub trait SampleSource {
    fn sample(&mut self) -> Option<Sample>;
}

impl<F> SampleSource for F
where
    F: FnMut() -> Option<Sample>,
{
    fn sample(&mut self) -> Option<Sample> {
        self()
    }
}

/// In-memory source useful for tests and deterministic playback.
///
/// `None` entries replay as failed ticks; once drained every tick fails.
pub struct ManualSource {
    queue: VecDeque<Option<Sample>>,
}

impl ManualSource {
    pub fn new(ticks: impl IntoIterator<Item = Option<Sample>>) -> Self {
        Self {
            queue: ticks.into_iter().collect(),
        }
    }

    pub fn from_samples(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self::new(samples.into_iter().map(Some))
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }
}

impl SampleSource for ManualSource {
    fn sample(&mut self) -> Option<Sample> {
        self.queue.pop_front().flatten()
    }
}

/// Where a simulated source takes its timestamps from.
#[derive(Clone, Copy, Debug)]
pub enum SimClock {
    /// Real time via [`monotonic_us`].
    Monotonic,
    /// Synthetic time advancing by `step_us` per reading.
    Stepped { next_us: u64, step_us: u64 },
}

/// One simulated exhalation: linear rise to `peak_delta_v`, then
/// exponential decay back towards the baseline.
#[derive(Clone, Copy, Debug)]
pub struct BreathPulse {
    pub start_offset_us: u64,
    pub rise_us: u64,
    pub decay_tau_us: u64,
    pub peak_delta_v: f64,
}

impl BreathPulse {
    fn offset_at(&self, elapsed_us: u64) -> f64 {
        if elapsed_us < self.start_offset_us {
            return 0.0;
        }
        let since = (elapsed_us - self.start_offset_us) as f64;
        let rise = self.rise_us.max(1) as f64;
        if since <= rise {
            self.peak_delta_v * since / rise
        } else {
            let tau = self.decay_tau_us.max(1) as f64;
            self.peak_delta_v * (-(since - rise) / tau).exp()
        }
    }
}

/// Synthetic MQ-3 trace: a flat baseline with uniform noise and optional
/// breath pulses.
pub struct SimulatedSource {
    baseline_v: f64,
    noise_v: f64,
    pulses: Vec<BreathPulse>,
    clock: SimClock,
    started_us: Option<u64>,
    rng: StdRng,
}

impl SimulatedSource {
    pub fn new(baseline_v: f64, noise_v: f64, seed: u64) -> Self {
        Self {
            baseline_v,
            noise_v: noise_v.abs(),
            pulses: Vec::new(),
            clock: SimClock::Monotonic,
            started_us: None,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn with_clock(mut self, clock: SimClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pulse(mut self, pulse: BreathPulse) -> Self {
        self.pulses.push(pulse);
        self
    }

    fn now_us(&mut self) -> u64 {
        match &mut self.clock {
            SimClock::Monotonic => monotonic_us(),
            SimClock::Stepped { next_us, step_us } => {
                let now = *next_us;
                *next_us += *step_us;
                now
            }
        }
    }

    /// Noise-free level at `elapsed_us` after the first reading.
    pub fn level_at(&self, elapsed_us: u64) -> f64 {
        self.baseline_v
            + self
                .pulses
                .iter()
                .map(|p| p.offset_at(elapsed_us))
                .sum::<f64>()
    }
}

impl SampleSource for SimulatedSource {
    fn sample(&mut self) -> Option<Sample> {
        let now = self.now_us();
        let started = *self.started_us.get_or_insert(now);
        let noise = if self.noise_v > 0.0 {
            self.rng.gen_range(-self.noise_v..=self.noise_v)
        } else {
            0.0
        };
        let volts = self.level_at(now - started) + noise;
        Some(Sample::new(now, volts_to_counts(volts), volts))
    }
}
