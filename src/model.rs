use burn::config::Config;
use burn::tensor::activation;
use burn::tensor::{Int, Tensor, TensorData, backend::Backend};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::batch::PairLayout;
use crate::config::OptimizerKind;
use crate::dataset::DeepWalkDataset;
use crate::error::{self, DeepWalkError};
use crate::shared::SharedEmbedding;

/// Dot products are clamped to this range before the sigmoid
const MAX_SCORE: f32 = 6.0;

/// Added to the adaptive step denominator
const ADAM_EPS: f32 = 1e-10;

/////////////
// Helpers //
/////////////

fn index_tensor<B: Backend>(indices: &[i64], device: &B::Device) -> Tensor<B, 1, Int> {
    let data = TensorData::new(indices.to_vec(), [indices.len()]).convert::<B::IntElem>();
    Tensor::from_data(data, device)
}

fn node_tensor<B: Backend>(nodes: &[u32], device: &B::Device) -> Tensor<B, 1, Int> {
    let indices: Vec<i64> = nodes.iter().map(|&n| n as i64).collect();
    index_tensor(&indices, device)
}

fn float_tensor<B: Backend>(
    values: Vec<f32>,
    shape: [usize; 2],
    device: &B::Device,
) -> Tensor<B, 2> {
    Tensor::from_data(TensorData::new(values, shape).convert::<B::FloatElem>(), device)
}

fn tensor_to_vec<B: Backend>(tensor: Tensor<B, 2>) -> error::Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| DeepWalkError::TensorData(format!("{err:?}")))
}

/////////////////////
// Parameter store //
/////////////////////

/// One embedding matrix, either in shared host memory or resident on a
/// compute device.
///
/// Clones are handles to the same parameters.
pub enum EmbeddingTable<B: Backend> {
    Host(SharedEmbedding),
    Device(Arc<Mutex<Tensor<B, 2>>>),
}

impl<B: Backend> Clone for EmbeddingTable<B> {
    fn clone(&self) -> Self {
        match self {
            Self::Host(table) => Self::Host(table.clone()),
            Self::Device(table) => Self::Device(Arc::clone(table)),
        }
    }
}

fn lock<B: Backend>(table: &Mutex<Tensor<B, 2>>) -> MutexGuard<'_, Tensor<B, 2>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<B: Backend> EmbeddingTable<B> {
    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host(_))
    }

    /// Rows `nodes`, in order, as a `[nodes.len(), dim]` tensor on `device`
    pub fn gather(&self, nodes: &[u32], device: &B::Device) -> Tensor<B, 2> {
        match self {
            Self::Host(table) => {
                float_tensor(table.gather(nodes), [nodes.len(), table.dim()], device)
            }
            Self::Device(table) => {
                let table = lock(table).clone();
                let indices = node_tensor::<B>(nodes, &table.device());
                table.select(0, indices).to_device(device)
            }
        }
    }

    /// Adds row `k` of `delta` to row `nodes[k]`; repeated nodes accumulate
    pub fn index_add(&self, nodes: &[u32], delta: Tensor<B, 2>) -> error::Result<()> {
        match self {
            Self::Host(table) => {
                table.index_add(nodes, &tensor_to_vec(delta)?);
            }
            Self::Device(table) => {
                let mut table = lock(table);
                let device = table.device();
                let indices = node_tensor::<B>(nodes, &device);
                *table = table
                    .clone()
                    .select_assign(0, indices, delta.to_device(&device));
            }
        }
        Ok(())
    }

    /// Moves the parameters onto `device`
    pub fn to_device(&self, device: &B::Device) -> error::Result<Self> {
        let tensor = match self {
            Self::Host(table) => float_tensor(table.to_vec(), [table.rows(), table.dim()], device),
            Self::Device(table) => lock(table).clone().to_device(device),
        };
        Ok(Self::Device(Arc::new(Mutex::new(tensor))))
    }

    /// Row major copy of the parameters
    pub fn to_vec(&self) -> error::Result<Vec<f32>> {
        match self {
            Self::Host(table) => Ok(table.to_vec()),
            Self::Device(table) => tensor_to_vec(lock(table).clone()),
        }
    }
}

////////////
// Config //
////////////

/// Config for the SkipGram model
///
/// ### Fields
///
/// * `num_nodes` - Number of nodes, i.e. rows of each embedding table
/// * `embedding_dim` - Size of the embedding
/// * `walk_length` - Number of nodes per walk
/// * `window_size` - Context positions on each side of a center node
/// * `batch_size` - Number of walks per full batch
/// * `optimizer` - Update rule
/// * `negative` - Negative pairs per positive pair
/// * `neg_weight` - Weight of the negative terms
/// * `lap_norm` - Weight of the laplacian regularisation, 0 disables it
/// * `fast_neg` - Sample negatives inside the batch
/// * `seed` - Seed for the parameter initialisation
#[derive(Config, Debug)]
pub struct SkipGramConfig {
    pub num_nodes: usize,
    pub embedding_dim: usize,
    pub walk_length: usize,
    pub window_size: usize,
    pub batch_size: usize,
    pub optimizer: OptimizerKind,
    #[config(default = 5)]
    pub negative: usize,
    #[config(default = 1.0)]
    pub neg_weight: f32,
    #[config(default = 0.0)]
    pub lap_norm: f32,
    #[config(default = true)]
    pub fast_neg: bool,
    #[config(default = 42)]
    pub seed: u64,
}

impl SkipGramConfig {
    /// Initialise the model
    ///
    /// Input embeddings are uniform in `[-1/dim, 1/dim)`, output embeddings
    /// start at zero. Parameters live in shared host memory; use
    /// `all_to_device` to move them.
    ///
    /// ### Params
    ///
    /// * `device` - The device gradients are computed on
    ///
    /// ### Returns
    ///
    /// Initialised model
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<SkipGramModel<B>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let bound = 1.0 / self.embedding_dim as f32;

        let u = SharedEmbedding::uniform(self.num_nodes, self.embedding_dim, bound, &mut rng)?;
        let v = SharedEmbedding::zeros(self.num_nodes, self.embedding_dim)?;
        let adam_state = if self.optimizer == OptimizerKind::Adam {
            Some((
                EmbeddingTable::Host(SharedEmbedding::zeros(self.num_nodes, 1)?),
                EmbeddingTable::Host(SharedEmbedding::zeros(self.num_nodes, 1)?),
            ))
        } else {
            None
        };

        Ok(SkipGramModel {
            u: EmbeddingTable::Host(u),
            v: EmbeddingTable::Host(v),
            adam_state,
            layout: Arc::new(PairLayout::new(
                self.walk_length,
                self.window_size,
                self.negative,
                self.batch_size,
            )),
            config: self.clone(),
            device: device.clone(),
        })
    }
}

///////////
// Model //
///////////

/// SkipGram model with negative sampling over node walks.
///
/// Gradients are derived by hand and applied in place, no autodiff graph is
/// built. Clones share parameter memory, so one clone per worker gives
/// lock-free parallel training.
///
/// ### Fields
///
/// * `u` - Input (center) embeddings, the ones saved at the end
/// * `v` - Output (context) embeddings
/// * `adam_state` - Per node running sum of mean squared gradients of `u`
///   and `v`, only for the adam update
/// * `layout` - Pair layout of a full batch
/// * `device` - Device the gradients are computed on
pub struct SkipGramModel<B: Backend> {
    u: EmbeddingTable<B>,
    v: EmbeddingTable<B>,
    adam_state: Option<(EmbeddingTable<B>, EmbeddingTable<B>)>,
    layout: Arc<PairLayout>,
    config: SkipGramConfig,
    device: B::Device,
}

impl<B: Backend> Clone for SkipGramModel<B> {
    fn clone(&self) -> Self {
        Self {
            u: self.u.clone(),
            v: self.v.clone(),
            adam_state: self.adam_state.clone(),
            layout: Arc::clone(&self.layout),
            config: self.config.clone(),
            device: self.device.clone(),
        }
    }
}

impl<B: Backend> SkipGramModel<B> {
    pub fn config(&self) -> &SkipGramConfig {
        &self.config
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    /// Whether the parameters live in shared host memory
    pub fn is_host_resident(&self) -> bool {
        self.u.is_host()
    }

    /// Computes gradients on `device`; parameters stay where they are
    pub fn set_device(&mut self, device: B::Device) {
        self.device = device;
    }

    /// Moves parameters and optimizer state onto `device` and computes
    /// gradients there. Afterwards clones no longer share host memory but
    /// the device resident tensors.
    pub fn all_to_device(&mut self, device: B::Device) -> error::Result<()> {
        self.u = self.u.to_device(&device)?;
        self.v = self.v.to_device(&device)?;
        if let Some((state_u, state_v)) = &self.adam_state {
            self.adam_state = Some((state_u.to_device(&device)?, state_v.to_device(&device)?));
        }
        self.device = device;
        Ok(())
    }

    /// Fused forward, backward and update step for a batch of walks.
    ///
    /// ### Params
    ///
    /// * `walks` - Walks of exactly `walk_length` nodes, at most
    ///   `batch_size` of them
    /// * `lr` - Learning rate for this step
    /// * `neg_nodes` - Negatives drawn from the degree table, `negative`
    ///   per positive pair in pair order. `None` samples negatives among
    ///   the positions of the batch.
    /// * `rng` - Random number generator for in-batch negatives
    pub fn fast_learn<R: Rng + ?Sized>(
        &self,
        walks: &[Vec<u32>],
        lr: f32,
        neg_nodes: Option<&[u32]>,
        rng: &mut R,
    ) -> error::Result<()> {
        let config = &self.config;
        let bs = walks.len();
        if bs == 0 {
            return Ok(());
        }
        if let Some(walk) = walks.iter().find(|w| w.len() != config.walk_length) {
            return Err(DeepWalkError::Batch(format!(
                "walk of length {} in a model for walks of length {}",
                walk.len(),
                config.walk_length
            )));
        }

        let layout = if bs == self.layout.batch_size {
            Cow::Borrowed(self.layout.as_ref())
        } else {
            Cow::Owned(PairLayout::new(
                config.walk_length,
                config.window_size,
                config.negative,
                bs,
            ))
        };
        if let Some(nodes) = neg_nodes {
            if nodes.len() != layout.num_negative() {
                return Err(DeepWalkError::Batch(format!(
                    "expected {} negative nodes, got {}",
                    layout.num_negative(),
                    nodes.len()
                )));
            }
        }

        let device = &self.device;
        let dim = config.embedding_dim;
        let nodes: Vec<u32> = walks.iter().flatten().copied().collect();
        let positions = nodes.len();

        // [bs * walk_length, dim]
        let emb_u = self.u.gather(&nodes, device);
        let emb_v = self.v.gather(&nodes, device);

        // Positive pairs
        let pos_u = index_tensor::<B>(&layout.pos_u, device);
        let pos_v = index_tensor::<B>(&layout.pos_v, device);
        let emb_pos_u = emb_u.clone().select(0, pos_u.clone());
        let emb_pos_v = emb_v.clone().select(0, pos_v.clone());

        // [num_pos, 1]
        let pos_score = (emb_pos_u.clone() * emb_pos_v.clone())
            .sum_dim(1)
            .clamp(-MAX_SCORE, MAX_SCORE);
        let pos_coef = activation::sigmoid(pos_score).neg().add_scalar(1.0);

        let mut grad_u_pos = pos_coef.clone() * emb_pos_v.clone();
        let mut grad_v_pos = pos_coef * emb_pos_u.clone();
        if config.lap_norm > 0.0 {
            let lap = (emb_pos_v - emb_pos_u).mul_scalar(config.lap_norm);
            grad_u_pos = grad_u_pos + lap.clone();
            grad_v_pos = grad_v_pos - lap;
        }

        let mut grad_u =
            Tensor::<B, 2>::zeros([positions, dim], device).select_assign(0, pos_u, grad_u_pos);
        let mut grad_v =
            Tensor::<B, 2>::zeros([positions, dim], device).select_assign(0, pos_v, grad_v_pos);

        // Negative pairs
        let mut table_grad_v = None;
        if layout.num_negative() > 0 {
            let neg_u = index_tensor::<B>(&layout.neg_u, device);
            let emb_neg_u = emb_u.select(0, neg_u.clone());

            let (emb_neg_v, batch_neg_v) = match neg_nodes {
                Some(neg_nodes) => (self.v.gather(neg_nodes, device), None),
                None => {
                    let idx = index_tensor::<B>(&layout.sample_negative_positions(rng), device);
                    (emb_v.select(0, idx.clone()), Some(idx))
                }
            };

            // [num_pos * negative, 1]
            let neg_score = (emb_neg_u.clone() * emb_neg_v.clone())
                .sum_dim(1)
                .clamp(-MAX_SCORE, MAX_SCORE);
            let neg_coef = activation::sigmoid(neg_score).mul_scalar(-config.neg_weight);

            let grad_u_neg = neg_coef.clone() * emb_neg_v;
            let grad_v_neg = neg_coef * emb_neg_u;

            grad_u = grad_u.select_assign(0, neg_u, grad_u_neg);
            match batch_neg_v {
                Some(idx) => grad_v = grad_v.select_assign(0, idx, grad_v_neg),
                None => table_grad_v = Some(grad_v_neg),
            }
        }

        // Update
        let (step_u, step_v) = match config.optimizer {
            OptimizerKind::Sgd => (grad_u.mul_scalar(lr), grad_v.mul_scalar(lr)),
            OptimizerKind::AveragedSgd => {
                let weights = float_tensor::<B>(layout.grad_avg.clone(), [positions, 1], device);
                (
                    (grad_u * weights.clone()).mul_scalar(lr),
                    (grad_v * weights).mul_scalar(lr),
                )
            }
            OptimizerKind::Adam => {
                let (state_u, state_v) = self.adam_state.as_ref().ok_or_else(|| {
                    DeepWalkError::Config("adam update without optimizer state".into())
                })?;
                (
                    adaptive_step(grad_u, &nodes, state_u, lr, device)?,
                    adaptive_step(grad_v, &nodes, state_v, lr, device)?,
                )
            }
        };

        self.u.index_add(&nodes, step_u)?;
        self.v.index_add(&nodes, step_v)?;
        if let (Some(grad), Some(neg_nodes)) = (table_grad_v, neg_nodes) {
            self.v.index_add(neg_nodes, grad.mul_scalar(lr))?;
        }

        Ok(())
    }

    /// Returns the input embeddings, one vector per node index
    pub fn embeddings_to_vec(&self) -> error::Result<Vec<Vec<f32>>> {
        Ok(rows(self.u.to_vec()?, self.config.embedding_dim))
    }

    /// Returns the output (context) embeddings, one vector per node index
    pub fn context_embeddings_to_vec(&self) -> error::Result<Vec<Vec<f32>>> {
        Ok(rows(self.v.to_vec()?, self.config.embedding_dim))
    }

    /// Writes the input embeddings as text
    ///
    /// The first line holds the node count and the dimension, followed by
    /// one line of space separated values per node, ordered by ascending
    /// node label.
    ///
    /// ### Params
    ///
    /// * `dataset` - The dataset the model was trained on
    /// * `path` - Output file
    pub fn save_embedding(&self, dataset: &DeepWalkDataset, path: &Path) -> error::Result<()> {
        let dim = self.config.embedding_dim;
        let values = self.u.to_vec()?;
        let num_nodes = dataset.num_nodes();
        if values.len() != num_nodes * dim {
            return Err(DeepWalkError::TensorData(format!(
                "embedding holds {} values, expected {num_nodes} x {dim}",
                values.len()
            )));
        }

        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{num_nodes} {dim}")?;
        for row in values.chunks_exact(dim) {
            let line: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            writeln!(writer, "{}", line.join(" "))?;
        }
        writer.flush()?;

        Ok(())
    }
}

fn rows(values: Vec<f32>, dim: usize) -> Vec<Vec<f32>> {
    values.chunks_exact(dim).map(<[f32]>::to_vec).collect()
}

/// Momentum free adaptive step: the state accumulates the mean squared
/// gradient per node and the step is `lr * g / (sqrt(state) + eps)`.
fn adaptive_step<B: Backend>(
    grad: Tensor<B, 2>,
    nodes: &[u32],
    state: &EmbeddingTable<B>,
    lr: f32,
    device: &B::Device,
) -> error::Result<Tensor<B, 2>> {
    // [positions, 1]
    let grad_sq = (grad.clone() * grad.clone()).mean_dim(1);
    state.index_add(nodes, grad_sq)?;
    let std = state.gather(nodes, device).sqrt().add_scalar(ADAM_EPS);

    Ok(grad.mul_scalar(lr) / std)
}
