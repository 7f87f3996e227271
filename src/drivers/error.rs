use thiserror::Error;
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("ring capacity must be a non-zero power of two, got {0}")]
    RingCapacity(usize),
    #[error("sample period must be greater than zero")]
    InvalidSamplePeriod,
    #[error("window duration must be greater than zero")]
    InvalidWindow,
    #[error("consumer batch size must be greater than zero")]
    InvalidBatchSize,
    #[error("baseline alpha must be in (0, 1], got {0}")]
    BaselineAlpha(f64),
    #[error("minimum blow time {min_us}us exceeds maximum blow time {max_us}us")]
    BlowTimeRange { min_us: u64, max_us: u64 },
    #[error("failed to read settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Json(#[from] serde_json::Error),
}
