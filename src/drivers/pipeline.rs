use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use log::{debug, info};

use crate::config::ConsumerConfig;
use crate::drivers::processor::Processor;
use crate::drivers::sampler::Sampler;
use crate::drivers::source::SampleSource;
use crate::types::{Sample, StepAction};

/// Cloneable stop request shared between a runner and whoever controls it.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Consumer side of the pipeline: owns the sampler, drains its ring in
/// batches and hands each batch to a processor.
pub struct BatchRunner<S, P>
where
    S: SampleSource + Send + 'static,
    P: Processor,
{
    sampler: Sampler<S>,
    processor: P,
    cfg: ConsumerConfig,
    batch: Vec<Sample>,
}

impl<S, P> BatchRunner<S, P>
where
    S: SampleSource + Send + 'static,
    P: Processor,
{
    pub fn new(sampler: Sampler<S>, processor: P, cfg: ConsumerConfig) -> Self {
        let batch = Vec::with_capacity(cfg.max_batch);
        Self {
            sampler,
            processor,
            cfg,
            batch,
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    pub fn sampler(&self) -> &Sampler<S> {
        &self.sampler
    }

    /// Runs without an observer.
    pub fn run_quiet(&mut self, shutdown: &ShutdownSignal) -> P::Output {
        self.run(shutdown, |_| {})
    }

    /// Starts the sampler, consumes until the processor finishes, the
    /// timeout elapses (if the processor honours it) or `shutdown` fires,
    /// then stops the sampler and returns the processor's result.
    ///
    /// `on_event` runs on this thread after every batch that signalled an
    /// event; keep it short.
    pub fn run<F>(&mut self, shutdown: &ShutdownSignal, on_event: F) -> P::Output
    where
        F: FnMut(&mut P),
    {
        self.sampler.start();
        let output = self.consume(shutdown, on_event);
        self.sampler.stop();
        output
    }

    fn consume<F>(&mut self, shutdown: &ShutdownSignal, mut on_event: F) -> P::Output
    where
        F: FnMut(&mut P),
    {
        let ring = self.sampler.ring();
        let timeout = self
            .cfg
            .timeout()
            .filter(|_| self.processor.supports_timeout());
        let started = Instant::now();
        let timed_out = || timeout.is_some_and(|limit| started.elapsed() >= limit);
        let max_batch = self.cfg.max_batch.max(1);
        while !shutdown.is_triggered() {
            self.batch.clear();
            if ring.pop_into(&mut self.batch, max_batch) == 0 {
                thread::sleep(self.cfg.idle_sleep());
                if timed_out() {
                    info!("consumer timed out while idle");
                    return self.processor.result();
                }
                continue;
            }
            let step = self.processor.on_batch(&self.batch);
            if step.event.is_some() {
                on_event(&mut self.processor);
            }
            match step.action {
                StepAction::Continue => {}
                StepAction::Done | StepAction::Abort => {
                    debug!("processor finished with {:?}", step.action);
                    return step.result;
                }
            }
            thread::sleep(self.cfg.tick_sleep());
            if timed_out() {
                info!("consumer timed out");
                return self.processor.result();
            }
        }
        info!("consumer stopped by shutdown signal");
        self.processor.result()
    }
}
