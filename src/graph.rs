use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

/////////////////////
// Graph structure //
/////////////////////

/// Structure to store the DeepWalk graph
///
/// ### Fields
///
/// * `labels` - Original node label of every node index, sorted ascending.
/// * `adjacency` - Weighted neighbour lists indexed by node index. Undirected
///   edges appear in both lists.
#[derive(Debug, Clone)]
pub struct DeepWalkGraph {
    pub labels: Vec<u32>,
    pub adjacency: Vec<Vec<(u32, f32)>>,
}

impl DeepWalkGraph {
    /// Number of nodes in the graph
    pub fn num_nodes(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of adjacency entries of a node (self loops count twice)
    pub fn degree(&self, node: usize) -> usize {
        self.adjacency[node].len()
    }

    /// Generates random walks from the graph
    ///
    /// ### Params
    /// * `walks_per_node` - Number of walks to generate starting from each node
    /// * `walk_length` - Length of each walk
    /// * `seed` - Random seed for reproducibility
    ///
    /// ### Returns
    ///
    /// Vector of walks ordered by start node, where each walk is a sequence
    /// of node indices of exactly `walk_length` entries.
    pub fn generate_walks(
        &self,
        walks_per_node: usize,
        walk_length: usize,
        seed: u64,
    ) -> Vec<Vec<u32>> {
        (0..self.num_nodes() as u32)
            .into_par_iter()
            .flat_map_iter(|start_node| {
                (0..walks_per_node).map(move |walk_idx| {
                    // one stream per (start node, walk)
                    let stream = ((start_node as u64) << 32) | walk_idx as u64;
                    let walk_seed = seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15);
                    let mut rng = StdRng::seed_from_u64(walk_seed);
                    self.single_walk(start_node, walk_length, &mut rng)
                })
            })
            .collect()
    }

    /// Performs a single random walk
    ///
    /// ### Params
    ///
    /// * `start_node` - Node to start the walk from
    /// * `walk_length` - Length of the walk
    /// * `rng` - Random number generator
    ///
    /// ### Returns
    ///
    /// The vector of node indices for this walk. Nodes without neighbours
    /// end the walk early, which cannot happen for graphs built by
    /// `read_graph`.
    fn single_walk(&self, start_node: u32, walk_length: usize, rng: &mut StdRng) -> Vec<u32> {
        let mut walk: Vec<u32> = Vec::with_capacity(walk_length);
        walk.push(start_node);

        let mut curr = start_node;
        for _ in 1..walk_length {
            let neighbours = &self.adjacency[curr as usize];
            if neighbours.is_empty() {
                break;
            }
            curr = self.sample_neighbor(neighbours, rng);
            walk.push(curr);
        }

        walk
    }

    /// Samples a neighbour based on edge weights
    ///
    /// ### Params
    ///
    /// * `neighbours` - Slice of (node, weight) tuples
    /// * `rng` - Random number generator
    ///
    /// ### Returns
    ///
    /// Node index based on the neighbours
    fn sample_neighbor(&self, neighbours: &[(u32, f32)], rng: &mut impl Rng) -> u32 {
        let total: f32 = neighbours.iter().map(|(_, w)| w).sum();
        let mut rand_val = rng.random::<f32>() * total;

        for (node, weight) in neighbours {
            rand_val -= weight;
            if rand_val <= 0.0 {
                return *node;
            }
        }

        neighbours[neighbours.len() - 1].0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Ring of `n` nodes with unit weights.
    fn ring(n: u32) -> DeepWalkGraph {
        let adjacency = (0..n)
            .map(|i| vec![((i + 1) % n, 1.0), ((i + n - 1) % n, 1.0)])
            .collect();
        DeepWalkGraph {
            labels: (0..n).collect(),
            adjacency,
        }
    }

    #[test]
    fn test_walk_count_and_length() {
        let graph = ring(10);
        let walks = graph.generate_walks(3, 7, 42);

        assert_eq!(walks.len(), 30);
        assert!(walks.iter().all(|w| w.len() == 7));
    }

    #[test]
    fn test_walks_follow_edges() {
        let graph = ring(8);
        let walks = graph.generate_walks(4, 12, 1);

        for walk in &walks {
            for pair in walk.windows(2) {
                let neighbours = &graph.adjacency[pair[0] as usize];
                assert!(neighbours.iter().any(|(n, _)| *n == pair[1]));
            }
        }
    }

    #[test]
    fn test_walks_start_at_every_node() {
        let graph = ring(5);
        let walks = graph.generate_walks(2, 3, 7);

        for node in 0..5 {
            assert_eq!(walks.iter().filter(|w| w[0] == node).count(), 2);
        }
    }

    #[test]
    fn test_walks_are_deterministic() {
        let graph = ring(6);
        assert_eq!(graph.generate_walks(2, 5, 9), graph.generate_walks(2, 5, 9));
    }

    #[test]
    fn test_weighted_sampling_prefers_heavy_edge() {
        let graph = DeepWalkGraph {
            labels: vec![0, 1, 2],
            adjacency: vec![vec![(1, 100.0), (2, 0.01)], vec![(0, 100.0)], vec![(0, 0.01)]],
        };
        let walks = graph.generate_walks(50, 2, 3);
        let to_one = walks.iter().filter(|w| w[0] == 0 && w[1] == 1).count();

        assert!(to_one >= 45);
    }
}
