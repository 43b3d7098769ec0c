use clap::Parser;
use deepwalk_rs::dataset::{DatasetConfig, DeepWalkDataset};
use deepwalk_rs::reader::read_graph;
use deepwalk_rs::{Args, DeepWalkError, TrainingConfig};
use std::path::{Path, PathBuf};

const KARATE_TSV: &str = "tests/data/karate.tsv";
const TOY_TXT: &str = "tests/data/toy.txt";

fn karate_dataset(num_walks: usize, walk_length: usize) -> DeepWalkDataset {
    DeepWalkDataset::new(&DatasetConfig {
        net_file: PathBuf::from(KARATE_TSV),
        delimiter: b'\t',
        walk_length,
        num_walks,
        neg_table_size: 100_000,
        seed: 42,
    })
    .expect("Failed to build karate dataset")
}

/// Training config on `net_file` writing to a temp embedding file
#[allow(dead_code)]
fn training_config(net_file: &str, name: &str, extra: &[&str]) -> (TrainingConfig, PathBuf) {
    let emb_file = std::env::temp_dir().join(format!("deepwalk_it_{name}.txt"));
    let mut argv: Vec<String> = [
        "deepwalk",
        "--net-file",
        net_file,
        "--emb-file",
        emb_file.to_str().unwrap(),
        "--neg-table-size",
        "10000",
        "--num-threads",
        "2",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    argv.extend(extra.iter().map(|s| s.to_string()));

    let config = TrainingConfig::from_args(&Args::parse_from(argv)).unwrap();
    (config, emb_file)
}

/// Parses a saved embedding file into (header, rows)
#[allow(dead_code)]
fn read_embedding(path: &Path) -> ((usize, usize), Vec<Vec<f32>>) {
    let contents = std::fs::read_to_string(path).unwrap();
    let mut lines = contents.lines();
    let header: Vec<usize> = lines
        .next()
        .unwrap()
        .split_whitespace()
        .map(|x| x.parse().unwrap())
        .collect();
    let rows = lines
        .map(|l| l.split_whitespace().map(|x| x.parse().unwrap()).collect())
        .collect();
    ((header[0], header[1]), rows)
}

#[test]
fn test_karate_graph_loads() {
    let graph = read_graph(Path::new(KARATE_TSV), b'\t').expect("Failed to load karate club graph");

    // Karate club has 34 nodes and 78 undirected edges
    assert_eq!(graph.num_nodes(), 34);
    assert_eq!(graph.adjacency.iter().map(|n| n.len()).sum::<usize>(), 156);
    assert_eq!(graph.labels.first(), Some(&1));
    assert_eq!(graph.labels.last(), Some(&34));

    // Instructor and administrator are the hubs
    assert_eq!(graph.degree(0), 16);
    assert_eq!(graph.degree(33), 17);
}

#[test]
fn test_karate_walks_generation() {
    let dataset = karate_dataset(10, 20);

    assert_eq!(dataset.walks.len(), 34 * 10);
    for walk in &dataset.walks {
        assert_eq!(walk.len(), 20);
        assert!(walk.iter().all(|&node| node < 34));
    }
}

#[test]
fn test_karate_negative_table_favours_hubs() {
    let dataset = karate_dataset(1, 5);
    let table = dataset.neg_table.as_slice();
    let count = |node: u32| table.iter().filter(|&&n| n == node).count();

    // label 12 has a single edge
    assert!(count(33) > count(11));
    assert!(count(0) > count(11));
}

#[test]
fn test_malformed_network_fails_before_training() {
    let path = std::env::temp_dir().join("deepwalk_it_malformed.txt");
    std::fs::write(&path, "0 1\n1 two\n").unwrap();

    let err = DeepWalkDataset::new(&DatasetConfig {
        net_file: path,
        delimiter: b' ',
        walk_length: 4,
        num_walks: 1,
        neg_table_size: 100,
        seed: 1,
    });

    assert!(matches!(err, Err(DeepWalkError::Parse { line: 2, .. })));
}

#[cfg(feature = "ndarray")]
mod ndarray_backend {
    use super::*;
    use burn::backend::NdArray;
    use burn::config::Config;
    use deepwalk_rs::model::SkipGramConfig;
    use deepwalk_rs::{DeepWalkTrainer, OptimizerKind, TrainingDevice};

    type Trainer = DeepWalkTrainer<NdArray>;

    fn assert_embedding_file(path: &Path, nodes: usize, dim: usize) {
        let (header, rows) = read_embedding(path);

        assert_eq!(header, (nodes, dim));
        assert_eq!(rows.len(), nodes);
        for row in &rows {
            assert_eq!(row.len(), dim);
            assert!(row.iter().all(|x| x.is_finite()));
        }
    }

    #[test]
    fn test_toy_end_to_end_training() {
        let (config, emb_file) = training_config(
            TOY_TXT,
            "toy",
            &[
                "--walk-length", "4", "--window-size", "1", "--num-walks", "2",
                "--batch-size", "5", "--iterations", "1", "--only-cpu", "--sgd",
            ],
        );
        let mut trainer = Trainer::new(config).unwrap();

        assert_eq!(trainer.dataset().walks.len(), 20);

        trainer.train().unwrap();
        assert_embedding_file(&emb_file, 10, 128);

        let (_, rows) = read_embedding(&emb_file);
        let model = trainer.model().unwrap();
        assert_eq!(rows, model.embeddings_to_vec().unwrap());
    }

    #[test]
    fn test_karate_multi_worker_training() {
        let (config, emb_file) = training_config(
            KARATE_TSV,
            "karate_mp",
            &[
                "--delimiter", "\t", "--dim", "16", "--walk-length", "10", "--num-walks", "5",
                "--window-size", "3", "--batch-size", "8", "--iterations", "2",
                "--num-procs", "3", "--only-cpu", "--avg-sgd", "--fast-neg", "false",
            ],
        );
        let mut trainer = Trainer::new(config).unwrap();
        trainer.train().unwrap();

        assert_embedding_file(&emb_file, 34, 16);
        let model = trainer.model().unwrap();
        assert!(model.is_host_resident());
        assert!(
            model
                .context_embeddings_to_vec()
                .unwrap()
                .iter()
                .flatten()
                .any(|x| *x != 0.0)
        );
    }

    #[test]
    fn test_more_workers_than_walks() {
        let (config, emb_file) = training_config(
            TOY_TXT,
            "toy_many_workers",
            &[
                "--dim", "8", "--walk-length", "4", "--num-walks", "1", "--window-size", "2",
                "--batch-size", "4", "--num-procs", "12", "--only-cpu", "--sgd",
            ],
        );
        let mut trainer = Trainer::new(config).unwrap();
        trainer.train().unwrap();

        assert_embedding_file(&emb_file, 10, 8);
    }

    #[test]
    fn test_adam_with_table_negatives() {
        let (config, emb_file) = training_config(
            KARATE_TSV,
            "karate_adam",
            &[
                "--delimiter", "\t", "--dim", "12", "--walk-length", "8", "--num-walks", "3",
                "--window-size", "2", "--batch-size", "7", "--only-cpu", "--adam",
                "--fast-neg", "false", "--print-interval", "3",
            ],
        );
        assert_eq!(config.optimizer, OptimizerKind::Adam);

        let mut trainer = Trainer::new(config).unwrap();
        trainer.train().unwrap();

        assert_embedding_file(&emb_file, 34, 12);
    }

    #[test]
    fn test_device_resident_mode() {
        let (config, emb_file) = training_config(
            TOY_TXT,
            "toy_device",
            &[
                "--dim", "8", "--walk-length", "5", "--num-walks", "4", "--window-size", "2",
                "--batch-size", "3", "--iterations", "3", "--only-gpu", "--sgd",
            ],
        );
        assert_eq!(config.device, TrainingDevice::Gpu);

        let mut trainer = Trainer::new(config).unwrap();
        trainer.train().unwrap();

        assert!(!trainer.model().unwrap().is_host_resident());
        assert_embedding_file(&emb_file, 10, 8);
    }

    #[test]
    fn test_device_resident_workers_share_parameters() {
        let (config, emb_file) = training_config(
            TOY_TXT,
            "toy_device_mp",
            &[
                "--dim", "8", "--walk-length", "5", "--num-walks", "4", "--window-size", "2",
                "--batch-size", "3", "--num-procs", "3", "--only-gpu", "--avg-sgd",
            ],
        );
        assert_eq!(config.device, TrainingDevice::Gpu);

        let mut trainer = Trainer::new(config).unwrap();
        trainer.train().unwrap();

        let model = trainer.model().unwrap();
        assert!(!model.is_host_resident());
        assert!(
            model
                .context_embeddings_to_vec()
                .unwrap()
                .iter()
                .flatten()
                .any(|x| *x != 0.0)
        );
        assert_embedding_file(&emb_file, 10, 8);
    }

    #[test]
    fn test_mixed_mode_workers() {
        let (config, emb_file) = training_config(
            TOY_TXT,
            "toy_mixed",
            &[
                "--dim", "8", "--walk-length", "6", "--num-walks", "3", "--window-size", "2",
                "--batch-size", "4", "--num-procs", "2", "--mix", "--sgd", "--lap-norm", "0",
            ],
        );
        let mut trainer = Trainer::new(config).unwrap();
        trainer.train().unwrap();

        assert!(trainer.model().unwrap().is_host_resident());
        assert_embedding_file(&emb_file, 10, 8);
    }

    #[test]
    fn test_save_config_round_trips() {
        let config_file = std::env::temp_dir().join("deepwalk_it_model_config.json");
        let config_arg = config_file.to_str().unwrap().to_string();
        let (config, _) = training_config(
            TOY_TXT,
            "toy_config",
            &[
                "--dim", "8", "--walk-length", "4", "--num-walks", "1", "--window-size", "1",
                "--negative", "3", "--only-cpu", "--avg-sgd", "--save-config", &config_arg,
            ],
        );
        let mut trainer = Trainer::new(config).unwrap();
        trainer.init_device_emb().unwrap();

        let loaded = SkipGramConfig::load(&config_file).unwrap();
        assert_eq!(loaded.num_nodes, 10);
        assert_eq!(loaded.embedding_dim, 8);
        assert_eq!(loaded.negative, 3);
        assert_eq!(loaded.optimizer, OptimizerKind::AveragedSgd);
    }
}
