use csv::{ReaderBuilder, Trim};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::path::Path;

use crate::error::{DeepWalkError, Result};
use crate::graph::DeepWalkGraph;

/// Helper function to read in an undirected graph from an edge list
///
/// ### Params
///
/// * `path` - Path to the edge list. One edge per line as `src dst [weight]`,
///   lines starting with `#` are skipped.
/// * `delimiter` - Field delimiter. Repeated delimiters are collapsed, so
///   space aligned files parse as expected.
///
/// ### Returns
///
/// The `DeepWalkGraph` with node labels remapped to contiguous indices in
/// ascending label order. Every edge is stored in both directions.
pub fn read_graph(path: &Path, delimiter: u8) -> Result<DeepWalkGraph> {
    let file = File::open(path)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_reader(file);

    let mut edges: Vec<(u32, u32, f32)> = Vec::new();

    for result in rdr.records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let fields: Vec<&str> = record.iter().filter(|f| !f.is_empty()).collect();

        if fields.is_empty() {
            continue;
        }
        if fields.len() < 2 {
            return Err(DeepWalkError::Parse {
                line,
                message: format!("expected `src dst [weight]`, got {:?}", fields),
            });
        }

        let from = parse_node(fields[0], line)?;
        let to = parse_node(fields[1], line)?;
        let weight = match fields.get(2) {
            Some(raw) => parse_weight(raw, line)?,
            None => 1.0,
        };

        edges.push((from, to, weight));
    }

    if edges.is_empty() {
        return Err(DeepWalkError::EmptyGraph(path.display().to_string()));
    }

    let mut labels: Vec<u32> = edges.iter().flat_map(|&(a, b, _)| [a, b]).collect();
    labels.sort_unstable();
    labels.dedup();

    let index: FxHashMap<u32, u32> = labels
        .iter()
        .enumerate()
        .map(|(idx, &label)| (label, idx as u32))
        .collect();

    let mut adjacency: Vec<Vec<(u32, f32)>> = vec![Vec::new(); labels.len()];
    for (from, to, weight) in edges {
        let (from, to) = (index[&from], index[&to]);
        adjacency[from as usize].push((to, weight));
        adjacency[to as usize].push((from, weight));
    }

    Ok(DeepWalkGraph { labels, adjacency })
}

fn parse_node(raw: &str, line: u64) -> Result<u32> {
    raw.parse().map_err(|_| DeepWalkError::Parse {
        line,
        message: format!("cannot cast node label to u32: {raw}"),
    })
}

fn parse_weight(raw: &str, line: u64) -> Result<f32> {
    match raw.parse::<f32>() {
        Ok(w) if w.is_finite() && w > 0.0 => Ok(w),
        _ => Err(DeepWalkError::Parse {
            line,
            message: format!("edge weight must be a positive number: {raw}"),
        }),
    }
}
