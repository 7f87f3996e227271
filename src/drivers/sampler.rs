use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{info, warn};

use crate::drivers::ring::SpscRing;
use crate::drivers::source::SampleSource;

/// Fixed-period producer: pulls one reading per tick from its source and
/// pushes it into the ring, evicting the oldest sample when the consumer
/// falls behind.
///
/// Deadlines accumulate as `deadline += period` on the monotonic clock, so a
/// slow tick does not shift the schedule. The source is moved into the
/// sampling thread on [`Sampler::start`] and handed back on [`Sampler::stop`].
pub struct Sampler<S: SampleSource + Send + 'static> {
    source: Option<S>,
    period: Duration,
    ring: Arc<SpscRing>,
    running: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    handle: Option<JoinHandle<S>>,
}

impl<S: SampleSource + Send + 'static> Sampler<S> {
    pub fn new(source: S, period: Duration, ring_capacity: usize) -> Self {
        Self {
            source: Some(source),
            period,
            ring: Arc::new(SpscRing::with_capacity(ring_capacity)),
            running: Arc::new(AtomicBool::new(false)),
            dropped: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Shared handle to the transport, for the consumer side.
    pub fn ring(&self) -> Arc<SpscRing> {
        Arc::clone(&self.ring)
    }

    /// Samples evicted because the ring was full.
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the sampling thread. Does nothing if already running.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }
        let Some(mut source) = self.source.take() else {
            return;
        };
        let period = self.period;
        let ring = Arc::clone(&self.ring);
        let running = Arc::clone(&self.running);
        let dropped = Arc::clone(&self.dropped);
        running.store(true, Ordering::Release);
        info!("sampler started, period {}us", period.as_micros());
        let spawned = thread::Builder::new()
            .name("sampler".into())
            .spawn(move || {
                let mut deadline = Instant::now();
                while running.load(Ordering::Acquire) {
                    deadline += period;
                    if let Some(sample) = source.sample() {
                        if !ring.push_overwrite(sample) {
                            dropped.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    let now = Instant::now();
                    if let Some(wait) = deadline.checked_duration_since(now) {
                        thread::sleep(wait);
                    } else if now.duration_since(deadline) > period {
                        warn!(
                            "sampler overran its deadline by {}us",
                            now.duration_since(deadline).as_micros()
                        );
                    }
                }
                source
            });
        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => {
                // The closure (and the source with it) is gone; nothing will sample.
                self.running.store(false, Ordering::Release);
                warn!("failed to spawn sampler thread: {err}");
            }
        }
    }

    /// Stops sampling and joins the thread. Safe to call repeatedly or
    /// without a prior [`Sampler::start`]; no sample is pushed after it
    /// returns.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return;
        };
        match handle.join() {
            Ok(source) => self.source = Some(source),
            Err(_) => warn!("sampler thread panicked"),
        }
        let dropped = self.dropped_count();
        if dropped > 0 {
            warn!("sampler stopped after evicting {dropped} unread samples");
        } else {
            info!("sampler stopped");
        }
    }

    /// The source, while the sampler is stopped.
    pub fn source(&self) -> Option<&S> {
        self.source.as_ref()
    }
}

impl<S: SampleSource + Send + 'static> Drop for Sampler<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
