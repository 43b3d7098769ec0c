use burn::config::Config;
use burn::tensor::backend::Backend;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::ops::Range;
use std::thread;
use std::time::Instant;
use tracing::{debug, info};

use crate::batch::PairLayout;
use crate::config::{TrainingConfig, TrainingDevice};
use crate::dataset::*;
use crate::error::{DeepWalkError, Result};
use crate::model::*;

/// Backends the trainer can place workers on
pub trait ComputeBackend: Backend {
    /// Device used by worker `worker`
    fn worker_device(worker: usize) -> Self::Device;
}

#[cfg(feature = "ndarray")]
impl ComputeBackend for burn::backend::NdArray {
    fn worker_device(_worker: usize) -> Self::Device {
        burn::backend::ndarray::NdArrayDevice::Cpu
    }
}

#[cfg(feature = "wgpu")]
impl ComputeBackend for burn::backend::Wgpu {
    fn worker_device(worker: usize) -> Self::Device {
        burn::backend::wgpu::WgpuDevice::DiscreteGpu(worker)
    }
}

/// Linear decay from the initial learning rate, floored at `FLOOR`
#[derive(Debug, Clone, Copy)]
pub struct LearningRateSchedule {
    initial: f32,
    max_steps: usize,
}

impl LearningRateSchedule {
    pub const FLOOR: f32 = 1e-5;

    pub fn new(initial: f32, max_steps: usize) -> Self {
        Self {
            initial,
            max_steps: max_steps.max(1),
        }
    }

    /// `initial * (max_steps - step) / max_steps`, at least `FLOOR`
    pub fn at(&self, step: usize) -> f32 {
        let remaining = self.max_steps.saturating_sub(step) as f32;
        (self.initial * remaining / self.max_steps as f32).max(Self::FLOOR)
    }
}

/// Contiguous shard bounds: shard `i` is `i * len / parts .. (i + 1) * len / parts`
pub fn shard_bounds(len: usize, parts: usize) -> Vec<Range<usize>> {
    (0..parts)
        .map(|i| (i * len / parts)..((i + 1) * len / parts))
        .collect()
}

/// Thread pool for CPU kernels and walk generation
pub fn worker_pool(num_threads: usize) -> Result<ThreadPool> {
    Ok(ThreadPoolBuilder::new().num_threads(num_threads).build()?)
}

/// Number of table negatives drawn for a batch of `batch_len` walks
pub fn negatives_per_batch(
    batch_len: usize,
    walk_length: usize,
    window_size: usize,
    negative: usize,
) -> usize {
    batch_len * PairLayout::pairs_per_walk(walk_length, window_size) * negative
}

/// Trains on `walks` in order, one batch of `batch_size` walks per step.
///
/// ### Params
///
/// * `step` - Schedule position of the first batch
///
/// ### Returns
///
/// Schedule position after the last batch
#[allow(clippy::too_many_arguments)]
fn learn_pass<B: Backend>(
    model: &SkipGramModel<B>,
    walks: &[Vec<u32>],
    neg_table: &NegativeTable,
    config: &TrainingConfig,
    schedule: &LearningRateSchedule,
    mut step: usize,
    rng: &mut StdRng,
    worker: usize,
) -> Result<usize> {
    let mut start = Instant::now();

    for batch in walks.chunks(config.batch_size) {
        let lr = schedule.at(step);

        if config.fast_neg {
            model.fast_learn(batch, lr, None, rng)?;
        } else {
            let count = negatives_per_batch(
                batch.len(),
                config.walk_length,
                config.window_size,
                config.negative,
            );
            let neg_nodes = neg_table.sample(count, rng);
            model.fast_learn(batch, lr, Some(&neg_nodes), rng)?;
        }

        step += 1;
        if step % config.print_interval == 0 {
            info!(
                worker,
                batch = step,
                lr,
                elapsed = ?start.elapsed(),
                "training progress"
            );
            start = Instant::now();
        }
    }

    Ok(step)
}

/// Runs `iterations` epochs over all walks, reshuffling before every epoch.
///
/// Returns the number of batches trained.
fn train_epochs<B: Backend>(
    model: &SkipGramModel<B>,
    walks: &mut [Vec<u32>],
    neg_table: &NegativeTable,
    config: &TrainingConfig,
    rng: &mut StdRng,
) -> Result<usize> {
    let num_batches = walks.len().div_ceil(config.batch_size);
    let schedule = LearningRateSchedule::new(config.lr, config.iterations * num_batches);
    let mut step = 0;

    for iteration in 0..config.iterations {
        debug!(iteration = iteration + 1, "starting iteration");
        shuffle_walks(walks, rng);
        step = learn_pass(model, walks, neg_table, config, &schedule, step, rng, 0)?;
    }

    Ok(step)
}

/// One training worker: a single pass over its shard in the given order.
///
/// The learning rate decays over `iterations * num_batches` batches, so with
/// more than one iteration it stops short of the floor.
///
/// ### Returns
///
/// The number of batches trained
fn fast_train_sp<B: Backend>(
    model: &SkipGramModel<B>,
    walks: &[Vec<u32>],
    worker: usize,
    neg_table: &NegativeTable,
    config: &TrainingConfig,
    seed: u64,
) -> Result<usize> {
    let num_batches = walks.len().div_ceil(config.batch_size);
    info!(worker, num_batches, "batches in worker");
    if num_batches == 0 {
        return Ok(0);
    }

    let pool = worker_pool(config.num_threads)?;
    let schedule = LearningRateSchedule::new(config.lr, config.iterations * num_batches);
    let mut rng = StdRng::seed_from_u64(seed);
    let start = Instant::now();

    let steps = pool.install(|| {
        learn_pass(model, walks, neg_table, config, &schedule, 0, &mut rng, worker)
    })?;
    debug!(worker, elapsed = ?start.elapsed(), "worker done");

    Ok(steps)
}

/// Trainer for DeepWalk embeddings
///
/// ### Fields
///
/// * `config` - The validated run configuration
/// * `dataset` - Walks and negative table, built once
/// * `model` - The model, created by `init_device_emb`
/// * `pool` - Thread pool for walk generation and single worker kernels
/// * `rng` - Random number generator for shuffling and sampling
pub struct DeepWalkTrainer<B: ComputeBackend> {
    config: TrainingConfig,
    dataset: DeepWalkDataset,
    model: Option<SkipGramModel<B>>,
    pool: ThreadPool,
    rng: StdRng,
}

impl<B: ComputeBackend> DeepWalkTrainer<B> {
    /// Validates the config and builds the dataset
    pub fn new(config: TrainingConfig) -> Result<Self> {
        config.validate()?;
        let pool = worker_pool(config.num_threads)?;
        let dataset = pool.install(|| DeepWalkDataset::new(&config.dataset_config()))?;
        info!(
            nodes = dataset.num_nodes(),
            walks = dataset.walks.len(),
            "dataset ready"
        );

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            dataset,
            model: None,
            pool,
        })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn dataset(&self) -> &DeepWalkDataset {
        &self.dataset
    }

    pub fn model(&self) -> Option<&SkipGramModel<B>> {
        self.model.as_ref()
    }

    /// Creates the model and places it according to the training mode
    pub fn init_device_emb(&mut self) -> Result<()> {
        let model_config = self.config.model_config(self.dataset.num_nodes());
        let mut model = model_config.init::<B>(&B::worker_device(0))?;

        match self.config.device {
            TrainingDevice::Gpu => {
                info!(processes = self.config.num_procs, "run in 1 GPU");
                model.all_to_device(B::worker_device(0))?;
            }
            TrainingDevice::Mixed => {
                info!(gpus = self.config.num_procs, "mix CPU with GPU");
                if self.config.num_procs == 1 {
                    model.set_device(B::worker_device(0));
                }
            }
            TrainingDevice::Cpu => {
                info!(processes = self.config.num_procs, "run in CPU");
            }
        }

        if let Some(path) = &self.config.save_config {
            model_config.save(path)?;
        }

        self.model = Some(model);
        Ok(())
    }

    /// Trains the embedding and saves it to `emb_file`
    pub fn train(&mut self) -> Result<()> {
        if self.config.num_procs > 1 {
            self.fast_train_mp()
        } else {
            self.fast_train()
        }
    }

    /// Several workers on contiguous shards of the shuffled walks, all
    /// writing the same parameters without locks
    pub fn fast_train_mp(&mut self) -> Result<()> {
        self.init_device_emb()?;
        let model = self.model.as_ref().ok_or_else(uninitialised)?;

        shuffle_walks(&mut self.dataset.walks, &mut self.rng);
        let num_procs = self.config.num_procs;
        let seeds: Vec<u64> = (0..num_procs).map(|_| self.rng.random()).collect();
        let bounds = shard_bounds(self.dataset.walks.len(), num_procs);

        let config = &self.config;
        let neg_table = &self.dataset.neg_table;
        let walks = &self.dataset.walks;

        let start_all = Instant::now();
        // each worker runs its kernels on its own pool of `num_threads`
        let results: Vec<Result<usize>> = thread::scope(|s| {
            let handles: Vec<_> = bounds
                .into_iter()
                .zip(seeds)
                .enumerate()
                .map(|(worker, (range, seed))| {
                    let mut worker_model = model.clone();
                    if config.device == TrainingDevice::Mixed {
                        worker_model.set_device(B::worker_device(worker));
                    }
                    let shard = &walks[range];
                    s.spawn(move || {
                        fast_train_sp(&worker_model, shard, worker, neg_table, config, seed)
                    })
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(worker, handle)| {
                    handle
                        .join()
                        .unwrap_or(Err(DeepWalkError::WorkerPanicked(worker)))
                })
                .collect()
        });
        let batches: usize = results.into_iter().sum::<Result<usize>>()?;

        info!(
            batches,
            elapsed = ?start_all.elapsed(),
            "used time"
        );
        model.save_embedding(&self.dataset, &self.config.emb_file)
    }

    /// Single worker over all walks
    pub fn fast_train(&mut self) -> Result<()> {
        let num_batches = self.dataset.walks.len().div_ceil(self.config.batch_size);
        info!(num_batches, "num batches");

        self.init_device_emb()?;
        let model = self.model.as_ref().ok_or_else(uninitialised)?;

        let start_all = Instant::now();
        let config = &self.config;
        let neg_table = &self.dataset.neg_table;
        let walks = &mut self.dataset.walks;
        let rng = &mut self.rng;
        let batches = self
            .pool
            .install(|| train_epochs(model, walks, neg_table, config, rng))?;

        info!(
            batches,
            elapsed = ?start_all.elapsed(),
            "training used time"
        );
        model.save_embedding(&self.dataset, &self.config.emb_file)
    }
}

fn uninitialised() -> DeepWalkError {
    DeepWalkError::Config("model used before init_device_emb".into())
}
