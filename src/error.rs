use thiserror::Error;

/// Errors raised while loading the network, configuring or running training.
#[derive(Error, Debug)]
pub enum DeepWalkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to read network file: {0}")]
    Csv(#[from] csv::Error),

    #[error("malformed edge on line {line}: {message}")]
    Parse { line: u64, message: String },

    #[error("network file {0} contains no edges")]
    EmptyGraph(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid batch: {0}")]
    Batch(String),

    #[error("tensor data error: {0}")]
    TensorData(String),

    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("no {0} backend compiled in")]
    BackendUnavailable(&'static str),

    #[error("training worker {0} panicked")]
    WorkerPanicked(usize),
}

pub type Result<T> = std::result::Result<T, DeepWalkError>;
