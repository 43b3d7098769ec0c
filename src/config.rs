use clap::{ArgAction, Parser};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::dataset::DatasetConfig;
use crate::error::{DeepWalkError, Result};
use crate::model::SkipGramConfig;

/// Command line arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "deepwalk", about = "DeepWalk node embeddings with Skip-Gram and negative sampling")]
pub struct Args {
    /// Path of the txt network file
    #[arg(long)]
    pub net_file: PathBuf,

    /// Path of the txt embedding file
    #[arg(long, default_value = "emb.txt")]
    pub emb_file: PathBuf,

    /// Embedding dimensions
    #[arg(long, default_value_t = 128)]
    pub dim: usize,

    /// Context window size
    #[arg(long, default_value_t = 5)]
    pub window_size: usize,

    /// Number of walks for each node
    #[arg(long, default_value_t = 10)]
    pub num_walks: usize,

    /// Negative samples for each positive node pair
    #[arg(long, default_value_t = 5)]
    pub negative: usize,

    /// Number of passes over the walks
    #[arg(long, default_value_t = 1)]
    pub iterations: usize,

    /// Number of node sequences in each batch
    #[arg(long, default_value_t = 10)]
    pub batch_size: usize,

    /// Number of batches between throughput logs
    #[arg(long, default_value_t = 1000)]
    pub print_interval: usize,

    /// Number of nodes in a sequence
    #[arg(long, default_value_t = 80)]
    pub walk_length: usize,

    /// Initial learning rate
    #[arg(long, default_value_t = 0.2)]
    pub lr: f32,

    /// Weight of the negative pair terms
    #[arg(long, default_value_t = 1.0)]
    pub neg_weight: f32,

    /// Weight of the laplacian regularisation, 0 disables it
    #[arg(long, default_value_t = 0.01)]
    pub lap_norm: f32,

    /// Mixed training: parameters in host memory, gradients on the GPU
    #[arg(long)]
    pub mix: bool,

    /// Train on the CPU only
    #[arg(long)]
    pub only_cpu: bool,

    /// Train on a single GPU only
    #[arg(long)]
    pub only_gpu: bool,

    /// Sample negatives inside the batch instead of from the degree table
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub fast_neg: bool,

    /// Use the adaptive (adam) update
    #[arg(long)]
    pub adam: bool,

    /// Use plain SGD updates
    #[arg(long)]
    pub sgd: bool,

    /// Use SGD with position averaged gradients
    #[arg(long)]
    pub avg_sgd: bool,

    /// Number of threads for walk generation and CPU kernels
    #[arg(long, default_value_t = 8)]
    pub num_threads: usize,

    /// Number of training workers (one per GPU in mixed mode)
    #[arg(long, default_value_t = 1)]
    pub num_procs: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Field delimiter of the network file
    #[arg(long, default_value_t = ' ')]
    pub delimiter: char,

    /// Target size of the negative sampling table
    #[arg(long, default_value_t = 10_000_000)]
    pub neg_table_size: usize,

    /// Write the resolved model config as JSON to this path
    #[arg(long)]
    pub save_config: Option<PathBuf>,
}

/// Where parameters live and where gradients are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingDevice {
    /// Parameters and gradients on the CPU
    Cpu,
    /// Parameters and gradients on one GPU
    Gpu,
    /// Parameters in shared host memory, gradients on one GPU per worker
    Mixed,
}

impl TrainingDevice {
    pub fn from_flags(only_cpu: bool, only_gpu: bool, mix: bool) -> Result<Self> {
        match (only_cpu, only_gpu, mix) {
            (true, false, false) => Ok(Self::Cpu),
            (false, true, false) => Ok(Self::Gpu),
            (false, false, true) => Ok(Self::Mixed),
            _ => Err(DeepWalkError::Config(
                "must choose exactly one training mode in [only_cpu, only_gpu, mix]".into(),
            )),
        }
    }
}

/// Update rule applied to the accumulated gradients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Sgd,
    /// Momentum free adaptive step on the per node mean squared gradient
    Adam,
    /// SGD with per position averaging weights
    AveragedSgd,
}

impl OptimizerKind {
    pub fn from_flags(sgd: bool, adam: bool, avg_sgd: bool) -> Result<Self> {
        match (sgd, adam, avg_sgd) {
            (true, false, false) => Ok(Self::Sgd),
            (false, true, false) => Ok(Self::Adam),
            (false, false, true) => Ok(Self::AveragedSgd),
            _ => Err(DeepWalkError::Config(
                "must choose exactly one gradient descent strategy in [sgd, avg_sgd, adam]".into(),
            )),
        }
    }
}

/// Validated run configuration
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    pub net_file: PathBuf,
    pub emb_file: PathBuf,
    pub dim: usize,
    pub window_size: usize,
    pub num_walks: usize,
    pub negative: usize,
    pub iterations: usize,
    pub batch_size: usize,
    pub print_interval: usize,
    pub walk_length: usize,
    pub lr: f32,
    pub neg_weight: f32,
    pub lap_norm: f32,
    pub device: TrainingDevice,
    pub optimizer: OptimizerKind,
    pub fast_neg: bool,
    pub num_threads: usize,
    pub num_procs: usize,
    pub seed: u64,
    pub delimiter: u8,
    pub neg_table_size: usize,
    pub save_config: Option<PathBuf>,
}

impl TrainingConfig {
    /// Resolves the mutually exclusive flags and validates the result
    pub fn from_args(args: &Args) -> Result<Self> {
        let device = TrainingDevice::from_flags(args.only_cpu, args.only_gpu, args.mix)?;
        let optimizer = OptimizerKind::from_flags(args.sgd, args.adam, args.avg_sgd)?;
        let delimiter = u8::try_from(args.delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                DeepWalkError::Config(format!("delimiter {:?} is not ASCII", args.delimiter))
            })?;

        let config = Self {
            net_file: args.net_file.clone(),
            emb_file: args.emb_file.clone(),
            dim: args.dim,
            window_size: args.window_size,
            num_walks: args.num_walks,
            negative: args.negative,
            iterations: args.iterations,
            batch_size: args.batch_size,
            print_interval: args.print_interval,
            walk_length: args.walk_length,
            lr: args.lr,
            neg_weight: args.neg_weight,
            lap_norm: args.lap_norm,
            device,
            optimizer,
            fast_neg: args.fast_neg,
            num_threads: args.num_threads,
            num_procs: args.num_procs,
            seed: args.seed,
            delimiter,
            neg_table_size: args.neg_table_size,
            save_config: args.save_config.clone(),
        };
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("num_procs", self.num_procs),
            ("dim", self.dim),
            ("window_size", self.window_size),
            ("num_walks", self.num_walks),
            ("iterations", self.iterations),
            ("batch_size", self.batch_size),
            ("print_interval", self.print_interval),
            ("num_threads", self.num_threads),
            ("neg_table_size", self.neg_table_size),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value < 1) {
            return Err(DeepWalkError::Config(format!("{name} must be at least 1")));
        }
        if self.walk_length < 2 {
            return Err(DeepWalkError::Config("walk_length must be at least 2".into()));
        }
        if !(self.lr > 0.0 && self.lr.is_finite()) {
            return Err(DeepWalkError::Config(format!("lr must be positive, got {}", self.lr)));
        }
        Ok(())
    }

    pub fn dataset_config(&self) -> DatasetConfig {
        DatasetConfig {
            net_file: self.net_file.clone(),
            delimiter: self.delimiter,
            walk_length: self.walk_length,
            num_walks: self.num_walks,
            neg_table_size: self.neg_table_size,
            seed: self.seed,
        }
    }

    pub fn model_config(&self, num_nodes: usize) -> SkipGramConfig {
        SkipGramConfig::new(
            num_nodes,
            self.dim,
            self.walk_length,
            self.window_size,
            self.batch_size,
            self.optimizer,
        )
        .with_negative(self.negative)
        .with_neg_weight(self.neg_weight)
        .with_lap_norm(self.lap_norm)
        .with_fast_neg(self.fast_neg)
        .with_seed(self.seed)
    }
}
