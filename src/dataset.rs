use rand::Rng;
use rand::seq::SliceRandom;
use std::path::PathBuf;
use tracing::debug;

use crate::error::{DeepWalkError, Result};
use crate::graph::DeepWalkGraph;
use crate::reader::read_graph;

/// Exponent applied to node degrees when building the negative table
pub const NEG_TABLE_POWER: f64 = 0.75;

/// Parameters needed to build the walk corpus
///
/// ### Fields
///
/// * `net_file` - Path to the edge list
/// * `delimiter` - Field delimiter of the edge list
/// * `walk_length` - Number of nodes per walk
/// * `num_walks` - Number of walks started at every node
/// * `neg_table_size` - Target number of entries in the negative table
/// * `seed` - Seed for walk generation
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub net_file: PathBuf,
    pub delimiter: u8,
    pub walk_length: usize,
    pub num_walks: usize,
    pub neg_table_size: usize,
    pub seed: u64,
}

/// Degree based table negatives are drawn from.
///
/// Node `i` appears `floor(deg(i)^0.75 / sum_j deg(j)^0.75 * size)` times.
#[derive(Debug, Clone)]
pub struct NegativeTable {
    table: Vec<u32>,
}

impl NegativeTable {
    pub fn from_degrees(degrees: &[usize], table_size: usize) -> Result<Self> {
        let weights: Vec<f64> = degrees
            .iter()
            .map(|&d| (d as f64).powf(NEG_TABLE_POWER))
            .collect();
        let total: f64 = weights.iter().sum();

        let mut table = Vec::with_capacity(table_size);
        if total > 0.0 {
            for (node, weight) in weights.iter().enumerate() {
                let count = (weight / total * table_size as f64) as usize;
                table.extend(std::iter::repeat_n(node as u32, count));
            }
        }

        if table.is_empty() {
            return Err(DeepWalkError::Config(format!(
                "negative table of size {table_size} is empty for {} nodes",
                degrees.len()
            )));
        }

        Ok(Self { table })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.table
    }

    /// Draws `count` node indices uniformly with replacement
    pub fn sample<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<u32> {
        (0..count)
            .map(|_| self.table[rng.random_range(0..self.table.len())])
            .collect()
    }
}

/// The walk corpus DeepWalk trains on
///
/// ### Fields
///
/// * `graph` - The graph the walks were sampled from
/// * `walks` - All walks, `num_walks` per node
/// * `neg_table` - Degree based negative sampling table
pub struct DeepWalkDataset {
    pub graph: DeepWalkGraph,
    pub walks: Vec<Vec<u32>>,
    pub neg_table: NegativeTable,
}

impl DeepWalkDataset {
    /// Reads the network, samples the walks and builds the negative table.
    ///
    /// Walk generation runs on the current rayon pool.
    pub fn new(config: &DatasetConfig) -> Result<Self> {
        let graph = read_graph(&config.net_file, config.delimiter)?;
        Self::from_graph(graph, config)
    }

    pub fn from_graph(graph: DeepWalkGraph, config: &DatasetConfig) -> Result<Self> {
        let walks = graph.generate_walks(config.num_walks, config.walk_length, config.seed);

        let degrees: Vec<usize> = (0..graph.num_nodes()).map(|n| graph.degree(n)).collect();
        let neg_table = NegativeTable::from_degrees(&degrees, config.neg_table_size)?;

        debug!(
            nodes = graph.num_nodes(),
            walks = walks.len(),
            neg_table = neg_table.len(),
            "built walk corpus"
        );

        Ok(Self {
            graph,
            walks,
            neg_table,
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.num_nodes()
    }

    /// Draws `count` negatives from the degree table
    pub fn sample_negatives<R: Rng + ?Sized>(&self, count: usize, rng: &mut R) -> Vec<u32> {
        self.neg_table.sample(count, rng)
    }
}

/// Shuffles walks in place
pub fn shuffle_walks<R: Rng + ?Sized>(walks: &mut [Vec<u32>], rng: &mut R) {
    walks.shuffle(rng);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn star(leaves: u32) -> DeepWalkGraph {
        let mut adjacency = vec![Vec::new(); leaves as usize + 1];
        for leaf in 1..=leaves {
            adjacency[0].push((leaf, 1.0));
            adjacency[leaf as usize].push((0, 1.0));
        }
        DeepWalkGraph {
            labels: (0..=leaves).collect(),
            adjacency,
        }
    }

    fn config(neg_table_size: usize) -> DatasetConfig {
        DatasetConfig {
            net_file: PathBuf::new(),
            delimiter: b' ',
            walk_length: 5,
            num_walks: 3,
            neg_table_size,
            seed: 42,
        }
    }

    #[test]
    fn test_dataset_from_graph() {
        let dataset = DeepWalkDataset::from_graph(star(4), &config(1000)).unwrap();

        assert_eq!(dataset.num_nodes(), 5);
        assert_eq!(dataset.walks.len(), 15);
        assert!(dataset.walks.iter().all(|w| w.len() == 5));
    }

    #[test]
    fn test_negative_table_follows_degree_power() {
        let table = NegativeTable::from_degrees(&[4, 1, 1, 1, 1], 1000).unwrap();
        let hub = table.as_slice().iter().filter(|&&n| n == 0).count();
        let leaf = table.as_slice().iter().filter(|&&n| n == 1).count();

        // 4^0.75 / (4^0.75 + 4) * 1000 = 414
        assert_eq!(hub, 414);
        assert_eq!(leaf, 146);
        assert!(table.len() <= 1000);
    }

    #[test]
    fn test_empty_negative_table_is_an_error() {
        assert!(NegativeTable::from_degrees(&[1, 1, 1], 2).is_err());
    }

    #[test]
    fn test_sample_negatives_count() {
        let dataset = DeepWalkDataset::from_graph(star(3), &config(100)).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let negatives = dataset.sample_negatives(37, &mut rng);

        assert_eq!(negatives.len(), 37);
        assert!(negatives.iter().all(|&n| (n as usize) < dataset.num_nodes()));
    }

    #[test]
    fn test_shuffle_keeps_all_walks() {
        let mut walks: Vec<Vec<u32>> = (0..20).map(|i| vec![i, i + 1]).collect();
        let before = walks.clone();
        shuffle_walks(&mut walks, &mut StdRng::seed_from_u64(3));

        assert_ne!(walks, before);
        let mut sorted = walks.clone();
        sorted.sort();
        assert_eq!(sorted, before);
    }
}
