// src/engine.rs
//! Wires a source, the sampler, a processor and the indicator into one
//! session: either a clean-air calibration or continuous breath monitoring.
use std::time::Duration;

use log::{info, warn};

use crate::config::{CircuitConfig, Settings};
use crate::drivers::chemistry::AlcoholEstimate;
use crate::drivers::{
    BatchRunner, CalibrationProcessor, PipelineError, RuntimeProcessor, SampleSource, Sampler,
    ShutdownSignal,
};
use crate::indicator::{
    Indicator, IndicatorCommand, IndicatorState, IndicatorWorker, LED_ALL, LED_BLUE, LED_GREEN,
};
use crate::types::{BreathEvent, BreathPhase, BreathResult, WindowResult};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalibrationReport {
    pub window: WindowResult,
    /// Sensor resistance at the stable mean; `None` if nothing was stable.
    pub rs_ohms: Option<f64>,
    pub ratio: Option<f64>,
}

/// One completed breath and what it works out to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectedBreath {
    pub event: BreathEvent,
    pub estimate: AlcoholEstimate,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MonitorReport {
    pub result: BreathResult,
    pub breaths: Vec<DetectedBreath>,
}

fn sampler_for<S>(settings: &Settings, source: S) -> Sampler<S>
where
    S: SampleSource + Send + 'static,
{
    Sampler::new(source, settings.sampler.period(), settings.ring.capacity)
}

/// Waits for the first stable window and reports the clean-air resistance.
/// Success shows green on `indicator` for the configured hold before
/// returning.
pub fn run_calibration<S, I>(
    settings: &Settings,
    source: S,
    indicator: I,
    shutdown: &ShutdownSignal,
) -> Result<CalibrationReport, PipelineError>
where
    S: SampleSource + Send + 'static,
    I: Indicator,
{
    settings.validate()?;
    let processor = CalibrationProcessor::new(settings.analyzer);
    let mut runner = BatchRunner::new(sampler_for(settings, source), processor, settings.consumer);
    let worker = IndicatorWorker::spawn(indicator);
    info!("calibrating, waiting for a stable window");
    let window = runner.run_quiet(shutdown);
    if !window.stable {
        warn!("no stable window before the session ended");
        return Ok(CalibrationReport {
            window,
            rs_ohms: None,
            ratio: None,
        });
    }
    let circuit = &settings.circuit;
    let rs = circuit.rs(window.mean);
    let ratio = circuit.ratio(window.mean);
    info!("stable Rs = {:.6} ohms", rs);
    info!("Rs/Ro = {:.6}", ratio);
    worker.send(IndicatorCommand::Hold {
        mask: LED_GREEN,
        hold: settings.indicator.calibration_hold(),
    });
    worker.finish();
    Ok(CalibrationReport {
        window,
        rs_ohms: Some(rs),
        ratio: Some(ratio),
    })
}

/// Monitors breaths until `shutdown` fires, mirroring each lifecycle event
/// on `indicator`.
pub fn run_monitor<S, I>(
    settings: &Settings,
    source: S,
    indicator: I,
    shutdown: &ShutdownSignal,
) -> Result<MonitorReport, PipelineError>
where
    S: SampleSource + Send + 'static,
    I: Indicator,
{
    settings.validate()?;
    let processor = RuntimeProcessor::new(settings.analyzer, settings.breath);
    let mut runner = BatchRunner::new(sampler_for(settings, source), processor, settings.consumer);
    let worker = IndicatorWorker::spawn(indicator);
    let circuit = settings.circuit;
    let bac_hold = settings.indicator.bac_hold();
    let mut breaths = Vec::new();
    let result = runner.run(shutdown, |processor| {
        while let Some(event) = processor.pop_pending_event() {
            if let Some(breath) = on_breath_event(&worker, &circuit, bac_hold, event) {
                breaths.push(breath);
            }
        }
    });
    info!("monitoring stopped after {} breath(s)", breaths.len());
    Ok(MonitorReport { result, breaths })
}

fn blink(mask: u8, count: u32, period_ms: u64) -> IndicatorCommand {
    IndicatorCommand::Blink {
        mask,
        count,
        on: Duration::from_millis(period_ms),
        off: Duration::from_millis(period_ms),
    }
}

fn on_breath_event(
    worker: &IndicatorWorker,
    circuit: &CircuitConfig,
    bac_hold: Duration,
    event: BreathEvent,
) -> Option<DetectedBreath> {
    if let Some(state) = IndicatorState::from_phase(event.state) {
        worker.set_state(state);
    }
    match event.state {
        BreathPhase::Warmup => {
            info!("warming up, finding baseline");
            worker.send(blink(LED_BLUE, 2, 500));
        }
        BreathPhase::Ready => info!("ready for a breath"),
        BreathPhase::Processing => {
            info!("breath in progress");
            worker.send(blink(LED_ALL, 3, 200));
        }
        BreathPhase::Cooldown => {
            info!("cooling down");
            worker.send(blink(LED_BLUE, 2, 500));
        }
        BreathPhase::Analyzed => {
            let estimate = circuit.estimate(event.peak_voltage);
            info!("breath alcohol detected: peak = {:.6}V", event.peak_voltage);
            info!(
                "Rs/Ro {:.6}, {:.6} mg/L, {:.6} ppm, BAC {:.6}",
                estimate.ratio, estimate.concentration_mg_l, estimate.ppm, estimate.bac
            );
            worker.send(IndicatorCommand::DriveBac {
                bac: estimate.bac,
                hold: bac_hold,
            });
            return Some(DetectedBreath { event, estimate });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AnalyzerConfig, BreathConfig, ConsumerConfig, IndicatorConfig, RingConfig, SamplerConfig,
    };
    use crate::drivers::source::{BreathPulse, SimClock, SimulatedSource};
    use crate::indicator::LogIndicator;
    use crate::types::BreathEnd;
    use assert_approx_eq::assert_approx_eq;
    use std::sync::{Arc, Mutex};
    use std::thread;
    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<u8>>>);
    impl Indicator for Recording {
        fn set_mask(&mut self, mask: u8) {
            self.0.lock().unwrap().push(mask);
        }
    }
    impl Recording {
        fn masks(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }
    }
    /// Fast settings for a stepped clock of 10ms per reading.
    fn settings() -> Settings {
        Settings {
            sampler: SamplerConfig { period_us: 200 },
            ring: RingConfig { capacity: 1024 },
            analyzer: AnalyzerConfig {
                window_us: 100_000,
                min_window_sample_size: 5,
                stddev_max: 0.002,
                drift_per_sec_max: 0.01,
                stable_consecutive_windows_req: 2,
            },
            breath: BreathConfig {
                warmup_stable_windows: 3,
                cooldown_stable_windows: 3,
                min_blow_time_us: 200_000,
                max_blow_time_us: 3_000_000,
                ..BreathConfig::default()
            },
            consumer: ConsumerConfig {
                idle_sleep_ms: 1,
                tick_sleep_ms: 1,
                timeout_ms: Some(5_000),
                max_batch: 256,
            },
            circuit: CircuitConfig::default(),
            indicator: IndicatorConfig {
                calibration_hold_ms: 20,
                bac_hold_ms: 20,
            },
        }
    }
    fn stepped(baseline_v: f64, seed: u64) -> SimulatedSource {
        SimulatedSource::new(baseline_v, 0.0002, seed).with_clock(SimClock::Stepped {
            next_us: 0,
            step_us: 10_000,
        })
    }
    fn stop_after(shutdown: &ShutdownSignal, ms: u64) -> thread::JoinHandle<()> {
        let shutdown = shutdown.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(ms));
            shutdown.trigger();
        })
    }
    #[test]
    fn calibration_reports_clean_air_resistance() {
        let settings = settings();
        let leds = Recording::default();
        let started = std::time::Instant::now();
        let report =
            run_calibration(&settings, stepped(1.2, 11), leds.clone(), &ShutdownSignal::new())
                .unwrap();
        // Green stays up for the whole hold before the call returns.
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(leds.masks(), vec![LED_GREEN, 0, 0]);
        assert!(report.window.stable);
        assert_approx_eq!(report.window.mean, 1.2, 0.001);
        let rs = report.rs_ohms.unwrap();
        assert_approx_eq!(rs, settings.circuit.rs(report.window.mean));
        assert_approx_eq!(report.ratio.unwrap(), rs / settings.circuit.ro_air_ohms);
    }
    #[test]
    fn calibration_without_stability_has_no_resistance() {
        let mut settings = settings();
        settings.consumer.timeout_ms = Some(50);
        // Far too noisy to ever settle.
        let source = SimulatedSource::new(1.2, 0.5, 5).with_clock(SimClock::Stepped {
            next_us: 0,
            step_us: 10_000,
        });
        let leds = Recording::default();
        let report =
            run_calibration(&settings, source, leds.clone(), &ShutdownSignal::new()).unwrap();
        assert!(!report.window.stable);
        assert!(!leds.masks().contains(&LED_GREEN));
        assert_eq!(report.rs_ohms, None);
        assert_eq!(report.ratio, None);
    }
    #[test]
    fn invalid_settings_are_rejected_before_sampling() {
        let mut settings = settings();
        settings.ring.capacity = 100;
        let err = run_calibration(
            &settings,
            stepped(1.0, 1),
            LogIndicator::default(),
            &ShutdownSignal::new(),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::RingCapacity(100)));
    }
    #[test]
    fn monitor_detects_one_breath_and_settles() {
        let source = stepped(1.0, 21).with_pulse(BreathPulse {
            start_offset_us: 3_000_000,
            rise_us: 300_000,
            decay_tau_us: 300_000,
            peak_delta_v: 0.8,
        });
        let shutdown = ShutdownSignal::new();
        let timer = stop_after(&shutdown, 1_500);
        let report = run_monitor(&settings(), source, LogIndicator::default(), &shutdown).unwrap();
        timer.join().unwrap();
        assert_eq!(report.breaths.len(), 1);
        let breath = report.breaths[0];
        assert_eq!(breath.event.state, BreathPhase::Analyzed);
        assert_eq!(breath.event.ended_by, BreathEnd::FallingEdge);
        assert!(breath.event.start_us >= 2_900_000);
        assert!(breath.event.peak_voltage > 1.5);
        assert!(breath.estimate.bac > 0.0);
        assert_eq!(report.result.phase, BreathPhase::Ready);
    }
}
