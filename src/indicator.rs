// src/indicator.rs
//! LED indicator driven from its own thread so the consumer loop never
//! blocks on blink timing or a held BAC display.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::types::BreathPhase;

pub const LED_BLUE: u8 = 1 << 0;
pub const LED_GREEN: u8 = 1 << 1;
pub const LED_YELLOW: u8 = 1 << 2;
pub const LED_ORANGE: u8 = 1 << 3;
pub const LED_RED: u8 = 1 << 4;
pub const LED_ALL: u8 = LED_BLUE | LED_GREEN | LED_YELLOW | LED_ORANGE | LED_RED;

/// Displayed BAC is clamped to this.
pub const BAC_CEILING: f64 = 0.45;

/// Something that can light a set of LEDs, one bit per LED.
pub trait Indicator: Send + 'static {
    fn set_mask(&mut self, mask: u8);

    fn clear(&mut self) {
        self.set_mask(0);
    }
}

/// Indicator without hardware: logs every mask change.
#[derive(Debug, Default)]
pub struct LogIndicator {
    last: Option<u8>,
}

impl Indicator for LogIndicator {
    fn set_mask(&mut self, mask: u8) {
        if self.last != Some(mask) {
            info!("indicator {}", describe_mask(mask));
            self.last = Some(mask);
        }
    }
}

fn describe_mask(mask: u8) -> String {
    const NAMES: [(u8, &str); 5] = [
        (LED_BLUE, "blue"),
        (LED_GREEN, "green"),
        (LED_YELLOW, "yellow"),
        (LED_ORANGE, "orange"),
        (LED_RED, "red"),
    ];
    let lit: Vec<&str> = NAMES
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if lit.is_empty() {
        "off".to_owned()
    } else {
        lit.join("+")
    }
}

/// Resting display between commands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndicatorState {
    Warmup,
    Ready,
    Processing,
    Cooldown,
    #[default]
    Idle,
}

impl IndicatorState {
    pub fn mask(self) -> u8 {
        match self {
            IndicatorState::Warmup | IndicatorState::Ready => LED_GREEN,
            IndicatorState::Processing => LED_GREEN | LED_YELLOW | LED_ORANGE | LED_RED,
            IndicatorState::Cooldown => LED_BLUE,
            IndicatorState::Idle => 0,
        }
    }

    /// `Analyzed` has no resting display of its own.
    pub fn from_phase(phase: BreathPhase) -> Option<Self> {
        match phase {
            BreathPhase::Warmup => Some(IndicatorState::Warmup),
            BreathPhase::Ready => Some(IndicatorState::Ready),
            BreathPhase::Processing => Some(IndicatorState::Processing),
            BreathPhase::Cooldown => Some(IndicatorState::Cooldown),
            BreathPhase::Analyzed => None,
        }
    }
}

/// Green below 0.02, adding yellow, orange and red at 0.02, 0.05 and 0.08.
pub fn bac_mask(bac: f64) -> u8 {
    let bac = if bac.is_nan() { 0.0 } else { bac.clamp(0.0, BAC_CEILING) };
    if bac < 0.02 {
        LED_GREEN
    } else if bac < 0.05 {
        LED_GREEN | LED_YELLOW
    } else if bac < 0.08 {
        LED_GREEN | LED_YELLOW | LED_ORANGE
    } else {
        LED_GREEN | LED_YELLOW | LED_ORANGE | LED_RED
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IndicatorCommand {
    Clear,
    Mask(u8),
    /// `count` cycles of `mask` on for `on`, then dark for `off`.
    Blink {
        mask: u8,
        count: u32,
        on: Duration,
        off: Duration,
    },
    /// Shows `mask` for `hold` before returning to the state mask.
    Hold { mask: u8, hold: Duration },
    /// Shows the BAC scale and holds it before returning to the state mask.
    DriveBac { bac: f64, hold: Duration },
    State(IndicatorState),
}

/// Owns the indicator on a dedicated thread. Commands run in the order they
/// were sent; after each one the latest state mask is shown again.
pub struct IndicatorWorker {
    tx: Option<Sender<IndicatorCommand>>,
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl IndicatorWorker {
    pub fn spawn<I: Indicator>(mut indicator: I) -> Self {
        let (tx, rx) = mpsc::channel::<IndicatorCommand>();
        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let spawned = thread::Builder::new()
            .name("indicator".into())
            .spawn(move || {
                let mut state = IndicatorState::Idle;
                let mut shown: Option<IndicatorState> = None;
                for command in rx {
                    debug!("indicator command {:?}", command);
                    match command {
                        IndicatorCommand::State(next) => state = next,
                        other => {
                            run_command(&mut indicator, other, &thread_cancel);
                            shown = None;
                        }
                    }
                    if shown != Some(state) {
                        indicator.set_mask(state.mask());
                        shown = Some(state);
                    }
                }
                indicator.clear();
            });
        let handle = match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                warn!("failed to spawn indicator thread: {err}");
                None
            }
        };
        Self {
            tx: Some(tx),
            cancel,
            handle,
        }
    }

    /// Queues a command. Silently dropped if the worker thread is gone.
    pub fn send(&self, command: IndicatorCommand) {
        if let Some(tx) = &self.tx {
            if tx.send(command).is_err() {
                debug!("indicator thread gone, dropping {:?}", command);
            }
        }
    }

    pub fn set_state(&self, state: IndicatorState) {
        self.send(IndicatorCommand::State(state));
    }

    /// Blocks until every queued command, holds included, has run in full,
    /// then stops the thread.
    pub fn finish(mut self) {
        self.join();
    }

    fn join(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("indicator thread panicked");
            }
        }
    }
}

impl Drop for IndicatorWorker {
    fn drop(&mut self) {
        // Cut short any blink or hold in progress; queued commands still
        // run, without their waits, and the thread clears the LEDs on exit.
        self.cancel.store(true, Ordering::Release);
        self.join();
    }
}

fn run_command<I: Indicator>(indicator: &mut I, command: IndicatorCommand, cancel: &AtomicBool) {
    match command {
        IndicatorCommand::Clear => indicator.clear(),
        IndicatorCommand::Mask(mask) => indicator.set_mask(mask),
        IndicatorCommand::Blink {
            mask,
            count,
            on,
            off,
        } => {
            for _ in 0..count {
                indicator.set_mask(mask);
                if !pause(on, cancel) {
                    return;
                }
                indicator.clear();
                if !pause(off, cancel) {
                    return;
                }
            }
        }
        IndicatorCommand::Hold { mask, hold } => {
            indicator.set_mask(mask);
            pause(hold, cancel);
        }
        IndicatorCommand::DriveBac { bac, hold } => {
            indicator.set_mask(bac_mask(bac));
            pause(hold, cancel);
        }
        IndicatorCommand::State(_) => {}
    }
}

/// Sleeps for `duration` in short slices; false if cancelled first.
fn pause(duration: Duration, cancel: &AtomicBool) -> bool {
    const SLICE: Duration = Duration::from_millis(10);
    let until = Instant::now() + duration;
    loop {
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        if now >= until {
            return true;
        }
        thread::sleep((until - now).min(SLICE));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
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
        fn wait_for(&self, len: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.masks().len() < len && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }
    #[test]
    fn bac_scale() {
        assert_eq!(bac_mask(-1.0), LED_GREEN);
        assert_eq!(bac_mask(0.0199), LED_GREEN);
        assert_eq!(bac_mask(0.02), LED_GREEN | LED_YELLOW);
        assert_eq!(bac_mask(0.05), LED_GREEN | LED_YELLOW | LED_ORANGE);
        assert_eq!(bac_mask(0.08), LED_ALL & !LED_BLUE);
        assert_eq!(bac_mask(3.0), LED_ALL & !LED_BLUE);
        assert_eq!(bac_mask(f64::NAN), LED_GREEN);
    }
    #[test]
    fn phase_masks() {
        assert_eq!(IndicatorState::from_phase(BreathPhase::Analyzed), None);
        let warmup = IndicatorState::from_phase(BreathPhase::Warmup).unwrap();
        assert_eq!(warmup.mask(), LED_GREEN);
        assert_eq!(IndicatorState::Cooldown.mask(), LED_BLUE);
        assert_eq!(IndicatorState::Processing.mask(), LED_ALL & !LED_BLUE);
        assert_eq!(IndicatorState::Idle.mask(), 0);
        assert_eq!(describe_mask(LED_GREEN | LED_RED), "green+red");
        assert_eq!(describe_mask(0), "off");
    }
    #[test]
    fn state_is_restored_after_each_command() {
        let rec = Recording::default();
        let worker = IndicatorWorker::spawn(rec.clone());
        worker.set_state(IndicatorState::Ready);
        worker.set_state(IndicatorState::Ready);
        worker.send(IndicatorCommand::Mask(LED_RED | LED_BLUE));
        worker.send(IndicatorCommand::Clear);
        drop(worker);
        assert_eq!(
            rec.masks(),
            vec![LED_GREEN, LED_RED | LED_BLUE, LED_GREEN, 0, LED_GREEN, 0]
        );
    }
    #[test]
    fn blink_then_idle() {
        let rec = Recording::default();
        let worker = IndicatorWorker::spawn(rec.clone());
        worker.send(IndicatorCommand::Blink {
            mask: LED_RED,
            count: 2,
            on: Duration::from_millis(1),
            off: Duration::from_millis(1),
        });
        rec.wait_for(5);
        drop(worker);
        assert_eq!(rec.masks(), vec![LED_RED, 0, LED_RED, 0, 0, 0]);
    }
    #[test]
    fn finish_waits_for_a_hold() {
        let rec = Recording::default();
        let worker = IndicatorWorker::spawn(rec.clone());
        let started = Instant::now();
        worker.send(IndicatorCommand::Hold {
            mask: LED_GREEN,
            hold: Duration::from_millis(40),
        });
        worker.finish();
        assert!(started.elapsed() >= Duration::from_millis(40));
        assert_eq!(rec.masks(), vec![LED_GREEN, 0, 0]);
    }
    #[test]
    fn drop_cuts_a_long_hold_short() {
        let rec = Recording::default();
        let worker = IndicatorWorker::spawn(rec.clone());
        worker.send(IndicatorCommand::DriveBac {
            bac: 0.06,
            hold: Duration::from_secs(30),
        });
        rec.wait_for(1);
        let started = Instant::now();
        drop(worker);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(rec.masks()[0], LED_GREEN | LED_YELLOW | LED_ORANGE);
        assert_eq!(rec.masks().last(), Some(&0));
    }
}
