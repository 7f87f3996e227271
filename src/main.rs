// src/main.rs
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use breath_sense::config::Settings;
use breath_sense::drivers::{BreathPulse, ShutdownSignal, SimulatedSource};
use breath_sense::engine::{run_calibration, run_monitor};
use breath_sense::indicator::LogIndicator;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};

/// MQ-3 breath alcohol sampler and detector.
#[derive(Debug, Parser)]
#[clap(author, version, about)]
struct Cli {
    /// JSON settings file; anything it leaves out keeps its default
    #[clap(long, env = "BREATH_SENSE_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of running until Ctrl-C
    #[clap(long)]
    run_for: Option<f64>,

    #[clap(flatten)]
    simulate: SimulateOpts,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Subcommand)]
enum Mode {
    /// Find the clean-air sensor resistance (Ro)
    Calibrate,
    /// Watch for breaths and estimate BAC
    Monitor,
}

/// Built-in simulated sensor.
#[derive(Debug, Args)]
struct SimulateOpts {
    /// Resting sensor voltage
    #[clap(long, default_value = "1.2")]
    baseline_volts: f64,

    /// Peak uniform noise added to every reading
    #[clap(long, default_value = "0.0005")]
    noise_volts: f64,

    /// Seed for the noise generator
    #[clap(long, default_value = "0")]
    seed: u64,

    /// Start of a simulated breath, seconds after sampling begins. Repeatable.
    #[clap(long = "breath-at")]
    breath_at: Vec<f64>,

    /// Voltage rise at the top of each simulated breath
    #[clap(long, default_value = "0.8")]
    breath_peak_volts: f64,

    #[clap(long, default_value = "800")]
    breath_rise_ms: u64,

    #[clap(long, default_value = "1500")]
    breath_decay_ms: u64,
}

impl SimulateOpts {
    fn source(&self) -> anyhow::Result<SimulatedSource> {
        let mut source = SimulatedSource::new(self.baseline_volts, self.noise_volts, self.seed);
        for &at in &self.breath_at {
            if !at.is_finite() || at < 0.0 {
                bail!("--breath-at must be a non-negative number of seconds, got {at}");
            }
            source = source.with_pulse(BreathPulse {
                start_offset_us: (at * 1e6) as u64,
                rise_us: self.breath_rise_ms * 1_000,
                decay_tau_us: self.breath_decay_ms * 1_000,
                peak_delta_v: self.breath_peak_volts,
            });
        }
        Ok(source)
    }
}

/// Triggers `shutdown` on the first Ctrl-C so the session can report and
/// turn the indicator off.
fn stop_on_interrupt(shutdown: ShutdownSignal) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .context("failed to build signal runtime")?;
    thread::Builder::new()
        .name("ctrl-c".into())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        info!("interrupted, stopping");
                        shutdown.trigger();
                    }
                    Err(err) => warn!("cannot listen for Ctrl-C: {err}"),
                }
            })
        })
        .context("failed to spawn Ctrl-C listener")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let source = cli.simulate.source()?;

    let shutdown = ShutdownSignal::new();
    stop_on_interrupt(shutdown.clone())?;
    if let Some(secs) = cli.run_for {
        let limit = Duration::try_from_secs_f64(secs)
            .with_context(|| format!("invalid --run-for value {secs}"))?;
        let timer = shutdown.clone();
        thread::Builder::new()
            .name("run-for".into())
            .spawn(move || {
                thread::sleep(limit);
                info!("run time of {}s reached, stopping", limit.as_secs_f64());
                timer.trigger();
            })
            .context("failed to spawn run-for timer")?;
    }

    match cli.mode {
        Mode::Calibrate => {
            let report = run_calibration(&settings, source, LogIndicator::default(), &shutdown)?;
            let Some(rs) = report.rs_ohms else {
                bail!("sensor never settled; no clean-air resistance measured");
            };
            info!(
                "calibrated at {:.6}V: set circuit.ro_air_ohms to {:.6}",
                report.window.mean, rs
            );
        }
        Mode::Monitor => {
            let report = run_monitor(&settings, source, LogIndicator::default(), &shutdown)?;
            for (n, breath) in report.breaths.iter().enumerate() {
                info!(
                    "breath {}: {:.2}s, peak {:.6}V, BAC {:.6}",
                    n + 1,
                    breath.event.duration_us() as f64 / 1e6,
                    breath.event.peak_voltage,
                    breath.estimate.bac
                );
            }
            info!(
                "final baseline {:.6}V sd {:.6}V",
                report.result.baseline_mean, report.result.baseline_stddev
            );
        }
    }
    Ok(())
}
