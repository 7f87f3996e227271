// src/drivers/mod.rs
// 采集到判定的核心模块
pub mod breath;
pub mod chemistry;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod ring;
pub mod sampler;
pub mod source;
pub mod stats;
pub mod window;
// 公开导出常用类型，方便外部调用
pub use breath::{BreathStateMachine, Thresholds, WindowOutcome};
pub use chemistry::AlcoholEstimate;
pub use error::PipelineError;
pub use pipeline::{BatchRunner, ShutdownSignal};
pub use processor::{CalibrationProcessor, Processor, RuntimeProcessor, ValueOf};
pub use ring::SpscRing;
pub use sampler::Sampler;
pub use source::{
    monotonic_us, BreathPulse, ManualSource, SampleSource, SimClock, SimulatedSource,
};
pub use stats::WelfordStats;
pub use window::WindowAnalyzer;
