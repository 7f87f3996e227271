//! Breath detection over closed analysis windows.
//!
//! The machine cycles `Warmup -> Ready -> Processing -> Analyzed -> Cooldown
//! -> Ready` for as long as windows keep arriving. A slowly adapting baseline
//! (EWMA over stable windows) anchors three hysteresis thresholds, each
//! `baseline_mean + delta_v + k_sigma * baseline_stddev`:
//!
//! * start: `Ready` moves to `Processing` when a window mean reaches it.
//! * end: `Processing` finishes when a window mean falls to it, or when the
//!   breath has lasted `max_blow_time_us`.
//! * ready: `Cooldown` returns to `Ready` after enough stable windows at or
//!   below it.
//!
//! The baseline is frozen while a breath is in progress.
use log::{debug, info};

use crate::config::BreathConfig;
use crate::types::{BreathEnd, BreathEvent, BreathPhase, BreathResult, WindowResult};

/// Detection thresholds derived from the current baseline.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Thresholds {
    pub start: f64,
    pub end: f64,
    pub ready: f64,
}

/// What one window did to the machine.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindowOutcome {
    /// The window was folded into the baseline.
    pub baseline_updated: bool,
    pub event: Option<BreathEvent>,
}

impl WindowOutcome {
    fn quiet(baseline_updated: bool) -> Self {
        Self {
            baseline_updated,
            event: None,
        }
    }
}

pub struct BreathStateMachine {
    cfg: BreathConfig,
    phase: BreathPhase,
    baseline_mean: f64,
    baseline_stddev: f64,
    has_baseline: bool,
    warmup_count: u32,
    cooldown_count: u32,
    breath_start_us: u64,
    peak: f64,
    announced: bool,
    detected: Option<BreathEvent>,
    last_window: WindowResult,
}

impl BreathStateMachine {
    pub fn new(cfg: BreathConfig) -> Self {
        Self {
            cfg,
            phase: BreathPhase::Warmup,
            baseline_mean: 0.0,
            baseline_stddev: 0.0,
            has_baseline: false,
            warmup_count: 0,
            cooldown_count: 0,
            breath_start_us: 0,
            peak: 0.0,
            announced: false,
            detected: None,
            last_window: WindowResult::default(),
        }
    }

    /// Starts the baseline from known values instead of the first stable
    /// window. Warmup still has to see its stable windows.
    pub fn seed_baseline(&mut self, mean: f64, stddev: f64) {
        self.baseline_mean = mean;
        self.baseline_stddev = stddev;
        self.has_baseline = true;
    }

    pub fn phase(&self) -> BreathPhase {
        self.phase
    }

    pub fn config(&self) -> &BreathConfig {
        &self.cfg
    }

    pub fn thresholds(&self) -> Thresholds {
        let level = |delta_v: f64, k_sigma: f64| {
            self.baseline_mean + delta_v + k_sigma * self.baseline_stddev
        };
        Thresholds {
            start: level(self.cfg.start_delta_v, self.cfg.start_k_sigma),
            end: level(self.cfg.end_delta_v, self.cfg.end_k_sigma),
            ready: level(self.cfg.ready_delta_v, self.cfg.ready_k_sigma),
        }
    }

    pub fn result(&self) -> BreathResult {
        BreathResult {
            baseline_mean: self.baseline_mean,
            baseline_stddev: self.baseline_stddev,
            peak_value: self.peak,
            phase: self.phase,
            last_window: self.last_window,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.cfg);
    }

    /// Advances the machine by one closed window. Windows without samples
    /// (the source failed for the whole window) leave it untouched.
    pub fn on_window(&mut self, window: &WindowResult) -> WindowOutcome {
        if window.sample_count == 0 {
            debug!(
                "ignoring empty window [{}..{}]",
                window.window_start_us, window.window_end_us
            );
            return WindowOutcome::default();
        }
        self.last_window = *window;
        // Thresholds come from the baseline as it stood before this window.
        let thresholds = self.thresholds();
        match self.phase {
            BreathPhase::Warmup => self.warmup(window),
            BreathPhase::Ready => self.ready(window, thresholds.start),
            BreathPhase::Processing => self.processing(window, thresholds.end),
            BreathPhase::Analyzed => self.analyzed(),
            BreathPhase::Cooldown => self.cooldown(window, thresholds.ready),
        }
    }

    fn absorb(&mut self, window: &WindowResult) -> bool {
        if !window.stable {
            return false;
        }
        if !self.has_baseline {
            self.baseline_mean = window.mean;
            self.baseline_stddev = window.stddev;
            self.has_baseline = true;
            return true;
        }
        let alpha = self.cfg.baseline_alpha;
        self.baseline_mean = (1.0 - alpha) * self.baseline_mean + alpha * window.mean;
        self.baseline_stddev = (1.0 - alpha) * self.baseline_stddev + alpha * window.stddev;
        true
    }

    fn warmup(&mut self, window: &WindowResult) -> WindowOutcome {
        let updated = self.absorb(window);
        if updated {
            self.warmup_count += 1;
        }
        if self.has_baseline && self.warmup_count >= self.cfg.warmup_stable_windows {
            self.phase = BreathPhase::Ready;
            self.warmup_count = 0;
            self.announced = true;
            info!(
                "warmup complete, baseline {:.6}V sd {:.6}V",
                self.baseline_mean, self.baseline_stddev
            );
            return WindowOutcome {
                baseline_updated: updated,
                event: Some(BreathEvent::phase(BreathPhase::Ready)),
            };
        }
        if !self.announced {
            self.announced = true;
            return WindowOutcome {
                baseline_updated: updated,
                event: Some(BreathEvent::phase(BreathPhase::Warmup)),
            };
        }
        WindowOutcome::quiet(updated)
    }

    fn ready(&mut self, window: &WindowResult, start_threshold: f64) -> WindowOutcome {
        let updated = self.absorb(window);
        if window.mean < start_threshold {
            return WindowOutcome::quiet(updated);
        }
        // A zero start means the window carried no start stamp.
        self.breath_start_us = if window.window_start_us != 0 {
            window.window_start_us
        } else {
            window.window_end_us
        };
        self.peak = window.mean;
        self.cooldown_count = 0;
        self.phase = BreathPhase::Processing;
        debug!(
            "breath started at {}us, mean {:.6}V >= {:.6}V",
            self.breath_start_us, window.mean, start_threshold
        );
        WindowOutcome {
            baseline_updated: updated,
            event: Some(BreathEvent {
                start_us: self.breath_start_us,
                peak_voltage: self.peak,
                ..BreathEvent::phase(BreathPhase::Processing)
            }),
        }
    }

    fn processing(&mut self, window: &WindowResult, end_threshold: f64) -> WindowOutcome {
        self.peak = self.peak.max(window.mean);
        let elapsed = window.window_end_us.saturating_sub(self.breath_start_us);
        let falling_edge = window.mean <= end_threshold;
        let timed_out = elapsed >= self.cfg.max_blow_time_us;
        if !falling_edge && !timed_out {
            return WindowOutcome::quiet(false);
        }
        if elapsed < self.cfg.min_blow_time_us {
            debug!("discarding {elapsed}us excursion as noise");
            self.phase = BreathPhase::Cooldown;
            self.cooldown_count = 0;
            return WindowOutcome {
                baseline_updated: false,
                event: Some(BreathEvent::phase(BreathPhase::Cooldown)),
            };
        }
        let event = BreathEvent {
            start_us: self.breath_start_us,
            end_us: window.window_end_us,
            peak_voltage: self.peak,
            state: BreathPhase::Analyzed,
            ended_by: if falling_edge {
                BreathEnd::FallingEdge
            } else {
                BreathEnd::MaxDuration
            },
        };
        info!(
            "breath detected: {}us, peak {:.6}V ({:?})",
            elapsed, self.peak, event.ended_by
        );
        self.detected = Some(event);
        self.phase = BreathPhase::Analyzed;
        WindowOutcome {
            baseline_updated: false,
            event: Some(event),
        }
    }

    fn analyzed(&mut self) -> WindowOutcome {
        self.phase = BreathPhase::Cooldown;
        self.cooldown_count = 0;
        let event = BreathEvent {
            state: BreathPhase::Cooldown,
            peak_voltage: self.peak,
            ..self.detected.take().unwrap_or_default()
        };
        WindowOutcome {
            baseline_updated: false,
            event: Some(event),
        }
    }

    fn cooldown(&mut self, window: &WindowResult, ready_threshold: f64) -> WindowOutcome {
        let updated = self.absorb(window);
        if !(window.stable && window.mean <= ready_threshold) {
            self.cooldown_count = 0;
            return WindowOutcome::quiet(updated);
        }
        self.cooldown_count += 1;
        if self.cooldown_count < self.cfg.cooldown_stable_windows {
            return WindowOutcome::quiet(updated);
        }
        info!("cooldown complete");
        self.phase = BreathPhase::Ready;
        self.cooldown_count = 0;
        self.peak = 0.0;
        WindowOutcome {
            baseline_updated: updated,
            event: Some(BreathEvent::phase(BreathPhase::Ready)),
        }
    }
}
