//! Road-Graph Matrix Builder (spec.md §4.2).
//!
//! Builds the `(N+1)x(N+1)` travel-time and distance matrices from a
//! directed road graph and a set of geographic points (depot + visits).

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use rayon::prelude::*;

use crate::config::SolverConfig;
use crate::domain::Coord;
use crate::error::{Error, Result};
use crate::haversine;

/// Sentinel for an unreachable pair — "conceptually +∞" (spec.md §3),
/// represented as a very large finite value so the solver can reject it
/// with ordinary integer comparisons instead of special-casing infinity.
pub const INFEASIBLE: i64 = i64::MAX / 4;

/// How an edge's `max_speed_kph` was supplied, matching the shapes the
/// intake collaborator's road-graph records may carry (spec.md §6: "float>0
/// | list<float> | missing").
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeedSpec {
    Known(f64),
    Missing,
    ListValued,
    NonNumeric,
}

impl SpeedSpec {
    /// Resolves to a usable kph value, falling back to `default_speed_kph`
    /// for anything missing, list-valued, non-numeric, or non-positive
    /// (spec.md §4.2 step 4).
    pub fn resolve(&self, default_speed_kph: f64) -> f64 {
        match *self {
            SpeedSpec::Known(v) if v > 0.0 => v,
            _ => default_speed_kph,
        }
    }
}

#[derive(Debug, Clone)]
struct Edge {
    to: u64,
    length_m: f64,
    speed: SpeedSpec,
}

/// A directed weighted graph over geographic nodes.
#[derive(Debug, Clone, Default)]
pub struct RoadGraph {
    nodes: HashMap<u64, Coord>,
    adjacency: HashMap<u64, Vec<Edge>>,
}

impl RoadGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: u64, coord: Coord) {
        self.nodes.insert(id, coord);
        self.adjacency.entry(id).or_default();
    }

    /// Adds a directed edge. `length_m` must be positive; negative weights
    /// are disallowed by construction (spec.md §4.2 step 2).
    pub fn add_edge(&mut self, from: u64, to: u64, length_m: f64, speed: SpeedSpec) -> Result<()> {
        if !(length_m > 0.0) {
            return Err(Error::InvalidInput(format!(
                "edge length_m must be positive, got {length_m}"
            )));
        }
        if !self.nodes.contains_key(&from) || !self.nodes.contains_key(&to) {
            return Err(Error::InvalidInput(
                "edge references a node that was never added".into(),
            ));
        }
        self.adjacency
            .entry(from)
            .or_default()
            .push(Edge { to, length_m, speed });
        Ok(())
    }

    /// Nearest graph node to `coord` by great-circle distance, tie-broken
    /// by smaller node id (spec.md §4.2 step 1).
    pub fn nearest_node(&self, coord: Coord) -> Option<u64> {
        self.nodes
            .iter()
            .map(|(&id, &node_coord)| (id, haversine::distance_km(coord, node_coord)))
            .min_by(|(id_a, dist_a), (id_b, dist_b)| {
                dist_a
                    .partial_cmp(dist_b)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| id_a.cmp(id_b))
            })
            .map(|(id, _)| id)
    }

    /// Dijkstra from `source` over edge `length_m`, also accumulating the
    /// raw (pre-multiplier, pre-overhead) travel time along the same
    /// shortest-by-length path, node by node.
    fn shortest_paths_from(&self, source: u64, default_speed_kph: f64) -> HashMap<u64, (f64, f64)> {
        #[derive(Copy, Clone, PartialEq)]
        struct Frontier {
            length_m: f64,
            node: u64,
        }
        impl Eq for Frontier {}
        impl Ord for Frontier {
            fn cmp(&self, other: &Self) -> Ordering {
                // Reversed so BinaryHeap (a max-heap) pops the smallest length first.
                other
                    .length_m
                    .partial_cmp(&self.length_m)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| self.node.cmp(&other.node))
            }
        }
        impl PartialOrd for Frontier {
            fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
                Some(self.cmp(other))
            }
        }

        let mut best_length: HashMap<u64, f64> = HashMap::new();
        let mut best_time: HashMap<u64, f64> = HashMap::new();
        let mut heap = BinaryHeap::new();

        best_length.insert(source, 0.0);
        best_time.insert(source, 0.0);
        heap.push(Frontier { length_m: 0.0, node: source });

        while let Some(Frontier { length_m, node }) = heap.pop() {
            if length_m > *best_length.get(&node).unwrap_or(&f64::INFINITY) {
                continue;
            }
            let Some(edges) = self.adjacency.get(&node) else {
                continue;
            };
            let time_here = best_time[&node];
            for edge in edges {
                let candidate_length = length_m + edge.length_m;
                if candidate_length < *best_length.get(&edge.to).unwrap_or(&f64::INFINITY) {
                    let speed_kph = edge.speed.resolve(default_speed_kph);
                    let speed_mps = speed_kph * 1000.0 / 3600.0;
                    let edge_time_s = edge.length_m / speed_mps;

                    best_length.insert(edge.to, candidate_length);
                    best_time.insert(edge.to, time_here + edge_time_s);
                    heap.push(Frontier { length_m: candidate_length, node: edge.to });
                }
            }
        }

        best_length
            .into_iter()
            .map(|(node, length_m)| (node, (length_m, best_time[&node])))
            .collect()
    }
}

/// `T`/`D` matrices plus the graph node nearest each input coordinate.
/// `node_ids[0]` is the depot's nearest node, `node_ids[k]` is visit
/// `k-1`'s nearest node.
#[derive(Debug, Clone)]
pub struct Matrices {
    pub t: Vec<Vec<i64>>,
    pub d: Vec<Vec<i64>>,
    pub node_ids: Vec<u64>,
}

impl Matrices {
    pub fn len(&self) -> usize {
        self.node_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.node_ids.is_empty()
    }

    pub fn is_feasible(&self, i: usize, j: usize) -> bool {
        self.t[i][j] < INFEASIBLE
    }
}

/// Builds `(T, D, node_ids)` for a depot coordinate and an ordered list of
/// visit coordinates (spec.md §4.2).
///
/// The `N^2` shortest-path computations are independent and the graph is
/// read-only, so they're fanned out across worker threads (spec.md §5).
pub fn build_matrices(graph: &RoadGraph, depot: Coord, visits: &[Coord], config: &SolverConfig) -> Result<Matrices> {
    let mut coords = Vec::with_capacity(visits.len() + 1);
    coords.push(depot);
    coords.extend_from_slice(visits);

    let node_ids: Vec<u64> = coords
        .iter()
        .map(|&coord| {
            graph
                .nearest_node(coord)
                .ok_or_else(|| Error::InvalidInput("road graph has no nodes".into()))
        })
        .collect::<Result<_>>()?;

    tracing::info!(points = node_ids.len(), "building travel-time/distance matrices");

    let per_source: Vec<HashMap<u64, (f64, f64)>> = node_ids
        .par_iter()
        .map(|&source| graph.shortest_paths_from(source, config.default_speed_kph))
        .collect();

    let n = node_ids.len();
    let mut t = vec![vec![0i64; n]; n];
    let mut d = vec![vec![0i64; n]; n];

    for i in 0..n {
        for j in 0..n {
            if i == j {
                continue;
            }
            match per_source[i].get(&node_ids[j]) {
                Some(&(distance_m, raw_time_s)) => {
                    let time_s = raw_time_s * config.travel_time_multiplier + config.per_hop_overhead_s as f64;
                    t[i][j] = time_s.round() as i64;
                    d[i][j] = distance_m.round() as i64;
                }
                None => {
                    tracing::warn!(from = node_ids[i], to = node_ids[j], "no path between nodes");
                    t[i][j] = INFEASIBLE;
                    d[i][j] = INFEASIBLE;
                }
            }
        }
    }

    tracing::info!(points = n, "matrices built");
    Ok(Matrices { t, d, node_ids })
}
