pub mod batch;
pub mod config;
pub mod dataset;
pub mod error;
pub mod graph;
pub mod model;
pub mod reader;
pub mod shared;
pub mod train;

pub use config::{Args, OptimizerKind, TrainingConfig, TrainingDevice};
pub use error::{DeepWalkError, Result};
pub use train::{ComputeBackend, DeepWalkTrainer};
