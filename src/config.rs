//! `SolverConfig` — the closed set of recognised options (spec.md §6).

use crate::tokens::PenaltyTable;

/// Immutable configuration handed to every call into the core. There is no
/// mutable global state (spec.md §5): a caller builds one `SolverConfig`
/// per scenario and passes it by reference.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Fallback edge speed (kph) when a road graph edge's speed is missing,
    /// list-valued, or non-numeric.
    pub default_speed_kph: f64,
    /// Global multiplier applied to summed travel time to approximate urban
    /// slowdown.
    pub travel_time_multiplier: f64,
    /// Constant overhead (seconds) added to every off-diagonal `T[i][j]`.
    pub per_hop_overhead_s: i64,
    /// Per-worker stop cap, unless overridden on the individual `Worker`.
    pub max_stops_per_worker: u32,
    /// Per-route cumulative slack cap.
    pub max_route_wait_s: i64,
    /// Objective term charged once per active worker.
    pub vehicle_fixed_cost: i64,
    /// Wall-clock budget for the improvement phase.
    pub solver_time_budget_s: u64,
    /// Per-token drop penalties.
    pub penalty_table: PenaltyTable,
    /// RNG seed for deterministic tie-breaking among equal-cost moves.
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            default_speed_kph: 50.0,
            travel_time_multiplier: 1.20,
            per_hop_overhead_s: 120,
            max_stops_per_worker: 20,
            max_route_wait_s: 3600,
            vehicle_fixed_cost: 10_000,
            solver_time_budget_s: 120,
            penalty_table: PenaltyTable::default(),
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = SolverConfig::default();
        assert_eq!(cfg.default_speed_kph, 50.0);
        assert_eq!(cfg.travel_time_multiplier, 1.20);
        assert_eq!(cfg.per_hop_overhead_s, 120);
        assert_eq!(cfg.max_stops_per_worker, 20);
        assert_eq!(cfg.max_route_wait_s, 3600);
        assert_eq!(cfg.vehicle_fixed_cost, 10_000);
        assert_eq!(cfg.solver_time_budget_s, 120);
        assert_eq!(cfg.seed, 0);
    }
}
