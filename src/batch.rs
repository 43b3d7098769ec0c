use rand::Rng;

/// Index layout of the positive and negative pairs of a batch.
///
/// A batch of `batch_size` walks of `walk_length` nodes is flattened into
/// `batch_size * walk_length` positions; position `b * walk_length + i` is
/// node `i` of walk `b`. All indices below refer to these positions.
///
/// ### Fields
///
/// * `pos_u` - Center position of every positive pair
/// * `pos_v` - Context position of every positive pair
/// * `neg_u` - Center position of every negative pair, `negative` entries per
///   positive pair
/// * `grad_avg` - Averaging weight of every position for averaged SGD
#[derive(Debug, Clone)]
pub struct PairLayout {
    pub walk_length: usize,
    pub window_size: usize,
    pub negative: usize,
    pub batch_size: usize,
    pub pos_u: Vec<i64>,
    pub pos_v: Vec<i64>,
    pub neg_u: Vec<i64>,
    pub grad_avg: Vec<f32>,
}

impl PairLayout {
    pub fn new(walk_length: usize, window_size: usize, negative: usize, batch_size: usize) -> Self {
        let mut pos_u = Vec::new();
        let mut pos_v = Vec::new();
        let mut neg_u = Vec::new();
        let mut grad_avg = Vec::with_capacity(batch_size * walk_length);

        for b in 0..batch_size {
            let offset = (b * walk_length) as i64;
            for center_idx in 0..walk_length {
                let start = center_idx.saturating_sub(window_size);
                let end = (center_idx + window_size + 1).min(walk_length);

                for context_idx in start..end {
                    if context_idx != center_idx {
                        pos_u.push(offset + center_idx as i64);
                        pos_v.push(offset + context_idx as i64);
                        neg_u.extend(std::iter::repeat_n(offset + center_idx as i64, negative));
                    }
                }

                grad_avg.push(average_weight(center_idx, walk_length, window_size));
            }
        }

        Self {
            walk_length,
            window_size,
            negative,
            batch_size,
            pos_u,
            pos_v,
            neg_u,
            grad_avg,
        }
    }

    /// Number of (center, context) pairs in one walk
    pub fn pairs_per_walk(walk_length: usize, window_size: usize) -> usize {
        (0..walk_length)
            .map(|i| {
                let start = i.saturating_sub(window_size);
                let end = (i + window_size + 1).min(walk_length);
                end - start - 1
            })
            .sum()
    }

    pub fn num_positions(&self) -> usize {
        self.batch_size * self.walk_length
    }

    pub fn num_positive(&self) -> usize {
        self.pos_u.len()
    }

    pub fn num_negative(&self) -> usize {
        self.neg_u.len()
    }

    /// Context positions for in-batch negative sampling, one per entry of
    /// `neg_u`, drawn uniformly from all positions of the batch.
    pub fn sample_negative_positions<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<i64> {
        let positions = self.num_positions() as i64;
        (0..self.neg_u.len())
            .map(|_| rng.random_range(0..positions))
            .collect()
    }
}

/// Positions near the walk ends take part in fewer pairs, so their summed
/// gradient is scaled up relative to interior positions.
fn average_weight(position: usize, walk_length: usize, window_size: usize) -> f32 {
    if position < window_size {
        1.0 / (position + window_size) as f32
    } else if position >= walk_length.saturating_sub(window_size) {
        1.0 / (walk_length - position - 1 + window_size) as f32
    } else {
        0.5 / window_size as f32
    }
}
