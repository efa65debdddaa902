//! Routing Engine (spec.md §4.4): a constrained VRP-with-time-windows
//! metaheuristic. Construction by cheapest insertion, improvement by
//! 2-opt/relocate/cross-exchange/pending-reinsertion under a wall-clock
//! budget, finalisation that forces placement of any still-pending but
//! compatible visit.
//!
//! This generalises the teacher's `solve()` (construction + local search
//! over `Visit`/`Visitor` traits) to this crate's concrete domain types,
//! dropping the teacher's pinning machinery (no counterpart in this spec)
//! and adding hard time windows, stop caps, route-span caps, oracle-gated
//! compatibility, and double-staffing group synchronisation.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::config::SolverConfig;
use crate::domain::{DropReason, DroppedVisit, Route, ScheduledStop, Shift, Solution, Visit, Worker};
use crate::error::{Error, Result};
use crate::graph::Matrices;
use crate::oracle;
use crate::tokens::Token;

/// Progression of one `solve()` call (spec.md §4.4 state machine).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverState {
    /// Ran to natural convergence (no further improving move found).
    Finalised,
    /// The improvement loop hit its wall-clock budget before converging;
    /// the returned solution is the best found so far.
    BudgetExhausted,
    /// Cancellation was observed before the finalisation phase ran.
    CancelledBeforeFinalise,
    /// Construction could not seat any visit at all, even though at least
    /// one visit was compatible with some worker.
    Infeasible,
}

/// The four lexicographic-by-weight objective terms (spec.md §4.4).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Objective {
    pub fixed_cost: i64,
    pub travel_time: i64,
    pub drop_penalty: i64,
    pub early_arrival_penalty: i64,
}

impl Objective {
    pub fn total(&self) -> i64 {
        self.fixed_cost + self.travel_time + self.drop_penalty + self.early_arrival_penalty
    }
}

/// The output of one `solve()` invocation.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub solution: Solution,
    pub objective: Objective,
    pub state: SolverState,
}

/// Solves the scenario with no cancellation signal.
pub fn solve(visits: &[Visit], workers: &[Worker], shift: Shift, matrices: &Matrices, config: &SolverConfig) -> Result<SolveResult> {
    solve_cancellable(visits, workers, shift, matrices, config, &|| false)
}

/// Solves the scenario, checking `cancel` at move granularity during the
/// improvement loop (spec.md §5).
pub fn solve_cancellable(
    visits: &[Visit],
    workers: &[Worker],
    shift: Shift,
    matrices: &Matrices,
    config: &SolverConfig,
    cancel: &dyn Fn() -> bool,
) -> Result<SolveResult> {
    crate::domain::validate_scenario(visits, workers)?;
    if matrices.len() != visits.len() + 1 {
        return Err(Error::InvalidInput(format!(
            "matrices sized for {} points but {} visits were given",
            matrices.len(),
            visits.len() + 1
        )));
    }

    let mut service = Vec::with_capacity(visits.len() + 1);
    service.push(0i64);
    service.extend(visits.iter().map(|v| v.service_seconds()));

    let instance = Instance {
        visits,
        workers,
        shift,
        t: &matrices.t,
        d: &matrices.d,
        service,
        config,
    };

    tracing::debug!(visits = visits.len(), workers = workers.len(), "solver: constructing");
    let mut rng = Rng::new(config.seed);
    let mut state = construct(&instance, &mut rng);

    tracing::debug!(
        pending = state.pending.len(),
        dropped = state.dropped.len(),
        "solver: constructed, improving"
    );

    let deadline = Instant::now() + Duration::from_secs(config.solver_time_budget_s);
    let (budget_exhausted, cancelled) = improve(&instance, &mut state, &mut rng, deadline, cancel);

    if cancelled {
        let (solution, objective) = assemble(&instance, &state);
        return Ok(SolveResult {
            solution,
            objective,
            state: SolverState::CancelledBeforeFinalise,
        });
    }

    tracing::debug!(pending = state.pending.len(), "solver: finalising");
    finalise(&instance, &mut state, &mut rng);

    let (solution, objective) = assemble(&instance, &state);

    let no_one_seated = solution.active_worker_count() == 0
        && visits
            .iter()
            .enumerate()
            .any(|(idx, _)| !compatible_workers(&instance, idx).is_empty());

    let final_state = if no_one_seated {
        SolverState::Infeasible
    } else if budget_exhausted {
        SolverState::BudgetExhausted
    } else {
        SolverState::Finalised
    };

    tracing::debug!(state = ?final_state, total = objective.total(), "solver: done");

    Ok(SolveResult {
        solution,
        objective,
        state: final_state,
    })
}

/// Runs `restarts` independent solves with disjoint seeds in parallel and
/// keeps the minimum-objective result (spec.md §5).
pub fn solve_multi_restart(
    visits: &[Visit],
    workers: &[Worker],
    shift: Shift,
    matrices: &Matrices,
    config: &SolverConfig,
    restarts: u32,
) -> Result<SolveResult> {
    use rayon::prelude::*;

    let results: Vec<Result<SolveResult>> = (0..restarts.max(1))
        .into_par_iter()
        .map(|i| {
            let mut cfg = config.clone();
            cfg.seed = config.seed.wrapping_add(i as u64);
            solve(visits, workers, shift, matrices, &cfg)
        })
        .collect();

    let mut best: Option<SolveResult> = None;
    for result in results {
        let result = result?;
        if best.as_ref().is_none_or(|b| result.objective.total() < b.objective.total()) {
            best = Some(result);
        }
    }
    Ok(best.expect("restarts.max(1) guarantees at least one result"))
}

// ============================================================================
// Internal instance/state
// ============================================================================

struct Instance<'a> {
    visits: &'a [Visit],
    workers: &'a [Worker],
    shift: Shift,
    t: &'a [Vec<i64>],
    d: &'a [Vec<i64>],
    /// service_seconds indexed by matrix index (0 = depot).
    service: Vec<i64>,
    config: &'a SolverConfig,
}

impl Instance<'_> {
    fn matrix_index(&self, visit_idx: usize) -> usize {
        visit_idx + 1
    }

    fn is_locked(&self, visit_idx: usize) -> bool {
        self.visits[visit_idx].group_id().is_some()
    }
}

#[derive(Default)]
struct SolveState {
    /// One route per worker, by worker index, in visit-index order.
    routes: Vec<Vec<usize>>,
    dropped: Vec<DroppedVisit>,
    /// Visit indices that are compatible with some worker but not yet placed.
    pending: Vec<usize>,
    /// Exact required service-start for double-staffed (group) visits.
    forced_starts: HashMap<usize, i64>,
}

#[derive(Debug, Clone)]
struct StopTiming {
    arrival: i64,
    service_start: i64,
    service_end: i64,
    leg_distance_m: i64,
}

#[derive(Debug, Clone)]
struct RouteSchedule {
    stops: Vec<StopTiming>,
    t_sum: i64,
    service_time_total: i64,
    wait_time_total: i64,
    return_distance_m: i64,
    return_travel_s: i64,
}

impl RouteSchedule {
    fn objective_travel(&self) -> i64 {
        self.t_sum + self.service_time_total
    }
}

/// Simple xorshift64* PRNG, used only to break exact-cost ties during
/// construction deterministically for a given seed (P8).
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed ^ 0x9E37_79B9_7F4A_7C15)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    fn gen_range(&mut self, n: usize) -> usize {
        if n == 0 {
            0
        } else {
            (self.next_u64() % n as u64) as usize
        }
    }
}

// ============================================================================
// Schedule evaluation
// ============================================================================

/// Evaluates a candidate visit order for `worker`, returning `None` if any
/// hard constraint is violated: unreachable arc, stop cap, window (P3), or
/// per-route wait/span caps. `forced` pins a visit's exact service start
/// (used for double-staffing synchronisation): arrival must not exceed the
/// forced value.
fn evaluate_route(
    instance: &Instance,
    worker: &Worker,
    visit_order: &[usize],
    forced: &HashMap<usize, i64>,
) -> Option<RouteSchedule> {
    if visit_order.len() as u32 > worker.max_stops() {
        return None;
    }
    if visit_order.is_empty() {
        return Some(RouteSchedule {
            stops: Vec::new(),
            t_sum: 0,
            service_time_total: 0,
            wait_time_total: 0,
            return_distance_m: 0,
            return_travel_s: 0,
        });
    }

    let depot_idx = 0usize;
    let route_start = worker.available_window().start_s();
    let mut time = route_start;
    let mut prev_matrix_idx = depot_idx;

    let mut t_sum = 0i64;
    let mut service_time_total = 0i64;
    let mut wait_time_total = 0i64;
    let mut stops = Vec::with_capacity(visit_order.len());

    for &visit_idx in visit_order {
        let visit = &instance.visits[visit_idx];
        let matrix_idx = instance.matrix_index(visit_idx);

        let travel = instance.t[prev_matrix_idx][matrix_idx];
        if travel >= crate::graph::INFEASIBLE {
            return None;
        }
        let arrival = time + travel;
        let window = visit.window();

        let service_start = match forced.get(&visit_idx) {
            Some(&exact) => {
                if arrival > exact {
                    return None;
                }
                exact
            }
            None => arrival.max(window.start_s()),
        };
        if service_start + visit.service_seconds() > window.end_s() {
            return None;
        }

        let service_end = service_start + visit.service_seconds();
        wait_time_total += service_start - arrival;
        service_time_total += visit.service_seconds();
        t_sum += travel;

        stops.push(StopTiming {
            arrival,
            service_start,
            service_end,
            leg_distance_m: instance.d[prev_matrix_idx][matrix_idx],
        });

        time = service_end;
        prev_matrix_idx = matrix_idx;
    }

    let return_travel = instance.t[prev_matrix_idx][depot_idx];
    if return_travel >= crate::graph::INFEASIBLE {
        return None;
    }
    t_sum += return_travel;
    let return_distance_m = instance.d[prev_matrix_idx][depot_idx];

    let span = (time + return_travel) - route_start;
    if span > instance.shift.max_route_seconds() {
        return None;
    }
    if wait_time_total > instance.shift.max_wait_seconds() {
        return None;
    }

    Some(RouteSchedule {
        stops,
        t_sum,
        service_time_total,
        wait_time_total,
        return_distance_m,
        return_travel_s: return_travel,
    })
}

/// Full route cost (fixed cost + travel + wait), or `Some(0)` for an empty
/// route. `None` means infeasible.
fn route_cost(instance: &Instance, worker: &Worker, visit_order: &[usize], forced: &HashMap<usize, i64>) -> Option<i64> {
    if visit_order.is_empty() {
        return Some(0);
    }
    let schedule = evaluate_route(instance, worker, visit_order, forced)?;
    Some(instance.config.vehicle_fixed_cost + schedule.objective_travel() + schedule.wait_time_total)
}

// ============================================================================
// Compatibility
// ============================================================================

fn compatible_workers(instance: &Instance, visit_idx: usize) -> Vec<usize> {
    let visit = &instance.visits[visit_idx];
    instance
        .workers
        .iter()
        .enumerate()
        .filter(|(_, worker)| oracle::covers(worker, visit))
        .map(|(idx, _)| idx)
        .collect()
}

/// True iff the depot cannot reach, or cannot return from, `visit_idx`'s
/// road node at all — a connectivity gap in the graph, distinct from a
/// visit that is merely unschedulable under the time/capacity caps.
fn is_unroutable(instance: &Instance, visit_idx: usize) -> bool {
    let matrix_idx = instance.matrix_index(visit_idx);
    instance.t[0][matrix_idx] >= crate::graph::INFEASIBLE || instance.t[matrix_idx][0] >= crate::graph::INFEASIBLE
}

fn incompatible_drop(instance: &Instance, visit_idx: usize) -> DroppedVisit {
    let visit = &instance.visits[visit_idx];
    let mut best: Option<(i64, BTreeSet<Token>)> = None;
    for worker in instance.workers {
        let unc = oracle::uncovered(worker, visit);
        let pen = oracle::penalty(&instance.config.penalty_table, &unc);
        if best.as_ref().is_none_or(|(best_pen, _)| pen < *best_pen) {
            best = Some((pen, unc));
        }
    }
    let (penalty, uncovered) = best.unwrap_or_else(|| {
        let all: BTreeSet<Token> = visit.constraints().clone();
        let pen = oracle::penalty(&instance.config.penalty_table, &all);
        (pen, all)
    });
    tracing::warn!(visit = visit.id(), penalty, "dropping visit: no worker covers its constraints");
    DroppedVisit {
        visit_id: visit.id().to_string(),
        penalty,
        uncovered: uncovered.into_iter().collect(),
        reason: DropReason::Incompatible,
    }
}

/// Builds a zero-penalty `DroppedVisit` for a visit that was compatible
/// with some worker but could not be feasibly scheduled, logging why.
fn unscheduled_drop(instance: &Instance, visit_idx: usize) -> DroppedVisit {
    let visit = &instance.visits[visit_idx];
    let reason = if is_unroutable(instance, visit_idx) {
        DropReason::Unroutable
    } else {
        DropReason::Capacity
    };
    tracing::warn!(visit = visit.id(), ?reason, "dropping visit: no feasible slot found");
    DroppedVisit {
        visit_id: visit.id().to_string(),
        penalty: 0,
        uncovered: Vec::new(),
        reason,
    }
}

// ============================================================================
// Construction
// ============================================================================

fn partition_visits(visits: &[Visit]) -> (std::collections::BTreeMap<String, Vec<usize>>, Vec<usize>) {
    let mut groups: std::collections::BTreeMap<String, Vec<usize>> = std::collections::BTreeMap::new();
    let mut singles = Vec::new();
    for (idx, visit) in visits.iter().enumerate() {
        match visit.group_id() {
            Some(group) => groups.entry(group.to_string()).or_default().push(idx),
            None => singles.push(idx),
        }
    }
    (groups, singles)
}

/// Finds the cheapest feasible position to insert `visit_idx` into any of
/// `candidate_workers`'s routes, breaking exact-cost ties via `rng`.
fn best_insertion(
    instance: &Instance,
    routes: &[Vec<usize>],
    candidate_workers: &[usize],
    visit_idx: usize,
    forced: &HashMap<usize, i64>,
    rng: &mut Rng,
) -> Option<(usize, Vec<usize>)> {
    let mut best_cost = i64::MAX;
    let mut ties: Vec<(usize, Vec<usize>)> = Vec::new();

    for &w_idx in candidate_workers {
        let worker = &instance.workers[w_idx];
        let base = &routes[w_idx];
        for pos in 0..=base.len() {
            let mut candidate = base.clone();
            candidate.insert(pos, visit_idx);
            if let Some(cost) = route_cost(instance, worker, &candidate, forced) {
                if cost < best_cost {
                    best_cost = cost;
                    ties.clear();
                    ties.push((w_idx, candidate));
                } else if cost == best_cost {
                    ties.push((w_idx, candidate));
                }
            }
        }
    }

    if ties.is_empty() {
        return None;
    }
    let choice = rng.gen_range(ties.len());
    Some(ties.into_iter().nth(choice).unwrap())
}

fn assign_group(instance: &Instance, state: &mut SolveState, members: &[usize], rng: &mut Rng) {
    let compat_per_member: Vec<Vec<usize>> = members.iter().map(|&idx| compatible_workers(instance, idx)).collect();
    if compat_per_member.iter().any(Vec::is_empty) {
        for &idx in members {
            state.dropped.push(incompatible_drop(instance, idx));
        }
        return;
    }

    let mut used_workers: Vec<usize> = Vec::new();
    let mut placements: Vec<(usize, Vec<usize>)> = Vec::new();

    for (i, &idx) in members.iter().enumerate() {
        let avail: Vec<usize> = compat_per_member[i]
            .iter()
            .copied()
            .filter(|w| !used_workers.contains(w))
            .collect();
        if avail.is_empty() {
            placements.clear();
            break;
        }
        match best_insertion(instance, &state.routes, &avail, idx, &state.forced_starts, rng) {
            Some((w_idx, new_order)) => {
                used_workers.push(w_idx);
                placements.push((w_idx, new_order));
            }
            None => {
                placements.clear();
                break;
            }
        }
    }

    if placements.len() != members.len() {
        for &idx in members {
            state.dropped.push(unscheduled_drop(instance, idx));
        }
        return;
    }

    for &(w_idx, ref new_order) in &placements {
        state.routes[w_idx] = new_order.clone();
    }

    let mut starts = Vec::with_capacity(members.len());
    for (i, &(w_idx, _)) in placements.iter().enumerate() {
        let schedule = evaluate_route(instance, &instance.workers[w_idx], &state.routes[w_idx], &state.forced_starts)
            .expect("just inserted feasibly");
        let pos = state.routes[w_idx].iter().position(|&v| v == members[i]).unwrap();
        starts.push(schedule.stops[pos].service_start);
    }
    let sync_start = *starts.iter().max().unwrap();

    let mut trial_forced = state.forced_starts.clone();
    for &idx in members {
        trial_forced.insert(idx, sync_start);
    }

    let synced = placements
        .iter()
        .all(|&(w_idx, _)| evaluate_route(instance, &instance.workers[w_idx], &state.routes[w_idx], &trial_forced).is_some());

    if synced {
        state.forced_starts = trial_forced;
    } else {
        for (i, &(w_idx, _)) in placements.iter().enumerate() {
            state.routes[w_idx].retain(|&v| v != members[i]);
        }
        for &idx in members {
            state.dropped.push(unscheduled_drop(instance, idx));
        }
    }
}

fn construct(instance: &Instance, rng: &mut Rng) -> SolveState {
    let mut state = SolveState {
        routes: vec![Vec::new(); instance.workers.len()],
        dropped: Vec::new(),
        pending: Vec::new(),
        forced_starts: HashMap::new(),
    };

    let (groups, singles) = partition_visits(instance.visits);
    for (_, members) in &groups {
        assign_group(instance, &mut state, members, rng);
    }

    let mut order = singles;
    order.sort_by(|&a, &b| {
        instance.visits[a]
            .window()
            .start_s()
            .cmp(&instance.visits[b].window().start_s())
            .then_with(|| instance.visits[a].id().cmp(instance.visits[b].id()))
    });

    for visit_idx in order {
        let compatible = compatible_workers(instance, visit_idx);
        if compatible.is_empty() {
            state.dropped.push(incompatible_drop(instance, visit_idx));
            continue;
        }
        match best_insertion(instance, &state.routes, &compatible, visit_idx, &state.forced_starts, rng) {
            Some((w_idx, new_order)) => state.routes[w_idx] = new_order,
            None => state.pending.push(visit_idx),
        }
    }

    state
}

// ============================================================================
// Local search
// ============================================================================

struct TabuList {
    recent: VecDeque<(usize, usize, usize)>,
    capacity: usize,
}

impl TabuList {
    fn new(capacity: usize) -> Self {
        Self {
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn contains(&self, mv: (usize, usize, usize)) -> bool {
        self.recent.contains(&mv)
    }

    fn push(&mut self, mv: (usize, usize, usize)) {
        if self.recent.len() >= self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(mv);
    }
}

fn segment_has_locked(instance: &Instance, route: &[usize], from: usize, to: usize) -> bool {
    route[from..=to].iter().any(|&idx| instance.is_locked(idx))
}

/// 2-opt: reverse a segment within a single route if it reduces cost.
fn two_opt_pass(instance: &Instance, state: &mut SolveState) -> bool {
    for w_idx in 0..state.routes.len() {
        let route = state.routes[w_idx].clone();
        if route.len() < 3 {
            continue;
        }
        let worker = &instance.workers[w_idx];
        let Some(current) = route_cost(instance, worker, &route, &state.forced_starts) else {
            continue;
        };
        for i in 0..route.len() - 1 {
            for j in i + 2..route.len() {
                if segment_has_locked(instance, &route, i + 1, j) {
                    continue;
                }
                let mut candidate = route.clone();
                candidate[i + 1..=j].reverse();
                if let Some(cost) = route_cost(instance, worker, &candidate, &state.forced_starts) {
                    if cost < current {
                        state.routes[w_idx] = candidate;
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Relocate: move one (unlocked) visit to a different position, possibly in
/// a different worker's route.
fn relocate_pass(instance: &Instance, state: &mut SolveState, tabu: &mut TabuList) -> bool {
    let n_routes = state.routes.len();
    for from in 0..n_routes {
        let from_len = state.routes[from].len();
        for visit_pos in 0..from_len {
            let visit_idx = state.routes[from][visit_pos];
            if instance.is_locked(visit_idx) {
                continue;
            }
            if !oracle::covers(&instance.workers[from], &instance.visits[visit_idx]) {
                continue;
            }

            for to in 0..n_routes {
                if tabu.contains((visit_idx, to, from)) {
                    continue;
                }
                if to != from && !oracle::covers(&instance.workers[to], &instance.visits[visit_idx]) {
                    continue;
                }

                let mut from_candidate = state.routes[from].clone();
                from_candidate.remove(visit_pos);

                let insert_positions = if to == from { from_candidate.len() + 1 } else { state.routes[to].len() + 1 };

                for insert_pos in 0..insert_positions {
                    if to == from && insert_pos == visit_pos {
                        continue;
                    }

                    let (new_from, new_to, to_idx) = if to == from {
                        let mut r = from_candidate.clone();
                        r.insert(insert_pos, visit_idx);
                        (r, None, from)
                    } else {
                        let mut r = state.routes[to].clone();
                        r.insert(insert_pos, visit_idx);
                        (from_candidate.clone(), Some(r), to)
                    };

                    let Some(from_cost) = route_cost(instance, &instance.workers[from], &new_from, &state.forced_starts) else {
                        continue;
                    };

                    let (to_cost, to_route) = match &new_to {
                        Some(r) => match route_cost(instance, &instance.workers[to_idx], r, &state.forced_starts) {
                            Some(c) => (c, Some(r.clone())),
                            None => continue,
                        },
                        None => (0, None),
                    };

                    let old_from_cost = route_cost(instance, &instance.workers[from], &state.routes[from], &state.forced_starts).unwrap_or(i64::MAX);
                    let old_to_cost = if to == from {
                        0
                    } else {
                        route_cost(instance, &instance.workers[to], &state.routes[to], &state.forced_starts).unwrap_or(i64::MAX)
                    };

                    let improves = if to == from {
                        from_cost < old_from_cost
                    } else {
                        from_cost + to_cost < old_from_cost + old_to_cost
                    };

                    if improves {
                        state.routes[from] = new_from;
                        if let Some(r) = to_route {
                            state.routes[to] = r;
                        }
                        tabu.push((visit_idx, from, to));
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Cross-exchange: swap one (unlocked) visit between two routes.
fn cross_exchange_pass(instance: &Instance, state: &mut SolveState, tabu: &mut TabuList) -> bool {
    let n_routes = state.routes.len();
    for a in 0..n_routes {
        for b in (a + 1)..n_routes {
            for pa in 0..state.routes[a].len() {
                let visit_a = state.routes[a][pa];
                if instance.is_locked(visit_a) {
                    continue;
                }
                for pb in 0..state.routes[b].len() {
                    let visit_b = state.routes[b][pb];
                    if instance.is_locked(visit_b) {
                        continue;
                    }
                    if tabu.contains((visit_a, a, b)) {
                        continue;
                    }
                    if !oracle::covers(&instance.workers[a], &instance.visits[visit_b])
                        || !oracle::covers(&instance.workers[b], &instance.visits[visit_a])
                    {
                        continue;
                    }

                    let mut new_a = state.routes[a].clone();
                    let mut new_b = state.routes[b].clone();
                    new_a[pa] = visit_b;
                    new_b[pb] = visit_a;

                    let (Some(cost_a), Some(cost_b)) = (
                        route_cost(instance, &instance.workers[a], &new_a, &state.forced_starts),
                        route_cost(instance, &instance.workers[b], &new_b, &state.forced_starts),
                    ) else {
                        continue;
                    };

                    let old_a = route_cost(instance, &instance.workers[a], &state.routes[a], &state.forced_starts).unwrap_or(i64::MAX);
                    let old_b = route_cost(instance, &instance.workers[b], &state.routes[b], &state.forced_starts).unwrap_or(i64::MAX);

                    if cost_a + cost_b < old_a + old_b {
                        state.routes[a] = new_a;
                        state.routes[b] = new_b;
                        tabu.push((visit_a, a, b));
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Attempts to seat every pending visit; returns true if at least one was
/// placed.
fn pending_reinsertion_pass(instance: &Instance, state: &mut SolveState, rng: &mut Rng) -> bool {
    let mut still_pending = Vec::new();
    let mut placed_any = false;
    for visit_idx in std::mem::take(&mut state.pending) {
        let compatible = compatible_workers(instance, visit_idx);
        match best_insertion(instance, &state.routes, &compatible, visit_idx, &state.forced_starts, rng) {
            Some((w_idx, new_order)) => {
                state.routes[w_idx] = new_order;
                placed_any = true;
            }
            None => still_pending.push(visit_idx),
        }
    }
    state.pending = still_pending;
    placed_any
}

/// Runs local search until convergence, cancellation, or the deadline.
/// Returns `(budget_exhausted, cancelled)`.
fn improve(instance: &Instance, state: &mut SolveState, rng: &mut Rng, deadline: Instant, cancel: &dyn Fn() -> bool) -> (bool, bool) {
    let mut tabu = TabuList::new(50);
    loop {
        if cancel() {
            return (false, true);
        }
        if Instant::now() >= deadline {
            return (true, false);
        }

        let mut improved = pending_reinsertion_pass(instance, state, rng);

        if cancel() {
            return (false, true);
        }
        if two_opt_pass(instance, state) {
            improved = true;
        }

        if cancel() {
            return (false, true);
        }
        if relocate_pass(instance, state, &mut tabu) {
            improved = true;
        }

        if cancel() {
            return (false, true);
        }
        if cross_exchange_pass(instance, state, &mut tabu) {
            improved = true;
        }

        if !improved {
            return (false, false);
        }
    }
}

// ============================================================================
// Finalisation & assembly
// ============================================================================

fn finalise(instance: &Instance, state: &mut SolveState, rng: &mut Rng) {
    let pending = std::mem::take(&mut state.pending);
    for visit_idx in pending {
        let compatible = compatible_workers(instance, visit_idx);
        match best_insertion(instance, &state.routes, &compatible, visit_idx, &state.forced_starts, rng) {
            Some((w_idx, new_order)) => state.routes[w_idx] = new_order,
            None => state.dropped.push(unscheduled_drop(instance, visit_idx)),
        }
    }
}

fn assemble(instance: &Instance, state: &SolveState) -> (Solution, Objective) {
    let mut routes = Vec::with_capacity(instance.workers.len());
    let mut objective = Objective::default();

    for (w_idx, worker) in instance.workers.iter().enumerate() {
        let visit_order = &state.routes[w_idx];
        if visit_order.is_empty() {
            routes.push(Route {
                worker_id: worker.id().to_string(),
                route_start_s: worker.available_window().start_s(),
                stops: Vec::new(),
                return_distance_m: 0,
                return_travel_s: 0,
            });
            continue;
        }

        let schedule = evaluate_route(instance, worker, visit_order, &state.forced_starts).expect("assembled route must be feasible");

        objective.fixed_cost += instance.config.vehicle_fixed_cost;
        objective.travel_time += schedule.objective_travel();
        objective.early_arrival_penalty += schedule.wait_time_total;

        let stops = visit_order
            .iter()
            .zip(schedule.stops.iter())
            .map(|(&visit_idx, timing)| ScheduledStop {
                visit_id: instance.visits[visit_idx].id().to_string(),
                arrival_s: timing.arrival,
                service_start_s: timing.service_start,
                service_end_s: timing.service_end,
                departure_s: timing.service_end,
                leg_distance_m: timing.leg_distance_m,
            })
            .collect();

        routes.push(Route {
            worker_id: worker.id().to_string(),
            route_start_s: worker.available_window().start_s(),
            stops,
            return_distance_m: schedule.return_distance_m,
            return_travel_s: schedule.return_travel_s,
        });
    }

    objective.drop_penalty = state.dropped.iter().map(|d| d.penalty).sum();

    (
        Solution {
            routes,
            dropped: state.dropped.clone(),
        },
        objective,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coord, Window};
    use crate::graph::{Matrices, INFEASIBLE};

    fn window(a: i64, b: i64) -> Window {
        Window::new(a, b).unwrap()
    }

    /// Manhattan-ish matrix: `T[i][j] = 60 * |i - j|` seconds, symmetric.
    fn manhattan_matrices(n: usize) -> Matrices {
        let mut t = vec![vec![0i64; n]; n];
        let mut d = vec![vec![0i64; n]; n];
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    t[i][j] = 60 * (i as i64 - j as i64).abs();
                    d[i][j] = 1000 * (i as i64 - j as i64).abs();
                }
            }
        }
        Matrices {
            t,
            d,
            node_ids: (0..n as u64).collect(),
        }
    }

    #[test]
    fn trivial_scenario_services_the_visit() {
        // spec.md §8 scenario 1
        let visits = vec![Visit::new("v1", Coord::new(0.0, 0.0), 600, window(0, 3600), ["license"], None).unwrap()];
        let workers = vec![Worker::new("w1", ["license"], None, window(0, 3600 * 15)).unwrap()];
        let shift = Shift::new(0, 15, None).unwrap();
        let mut matrices = manhattan_matrices(2);
        matrices.t[0][1] = 180;
        matrices.t[1][0] = 180;

        let config = SolverConfig::default();
        let result = solve(&visits, &workers, shift, &matrices, &config).unwrap();

        assert!(result.solution.dropped.is_empty());
        let route = &result.solution.routes[0];
        assert_eq!(route.stops.len(), 1);
        assert_eq!(route.stops[0].arrival_s, 180);
        assert_eq!(route.stops[0].departure_s, 780);
    }

    #[test]
    fn incompatible_visit_is_dropped_with_penalty() {
        // spec.md §8 scenario 2
        let visits = vec![Visit::new("v1", Coord::new(0.0, 0.0), 600, window(0, 3600), ["license", "insulin"], None).unwrap()];
        let workers = vec![Worker::new("w1", ["license"], None, window(0, 3600 * 15)).unwrap()];
        let shift = Shift::new(0, 15, None).unwrap();
        let matrices = manhattan_matrices(2);
        let config = SolverConfig::default();

        let result = solve(&visits, &workers, shift, &matrices, &config).unwrap();
        assert_eq!(result.solution.dropped.len(), 1);
        assert_eq!(result.solution.dropped[0].penalty, 4000);
        assert_eq!(result.solution.dropped[0].reason, crate::domain::DropReason::Incompatible);
        assert_eq!(result.solution.active_worker_count(), 0);
        assert_eq!(result.objective.drop_penalty, 4000);
    }

    #[test]
    fn tight_window_drops_one_compatible_visit_with_zero_penalty() {
        // spec.md §8 scenario 3
        let visits = vec![
            Visit::new("v1", Coord::new(0.0, 0.0), 1200, window(0, 1800), Vec::<&str>::new(), None).unwrap(),
            Visit::new("v2", Coord::new(0.0, 0.0), 1200, window(0, 1800), Vec::<&str>::new(), None).unwrap(),
        ];
        let workers = vec![Worker::new("w1", Vec::<&str>::new(), None, window(0, 3600 * 15)).unwrap()];
        let shift = Shift::new(0, 15, None).unwrap();
        let matrices = manhattan_matrices(3);
        let config = SolverConfig::default();

        let result = solve(&visits, &workers, shift, &matrices, &config).unwrap();
        assert_eq!(result.solution.dropped.len(), 1);
        assert_eq!(result.solution.dropped[0].penalty, 0);
        assert_eq!(result.solution.dropped[0].reason, crate::domain::DropReason::Capacity);
    }

    #[test]
    fn double_staffed_visit_gets_two_distinct_overlapping_workers() {
        // spec.md §8 scenario 4
        let visits = vec![
            Visit::new("v1a", Coord::new(0.0, 0.0), 1800, window(0, 3600 * 8), ["double_staffing", "shower"], Some("g1".into())).unwrap(),
            Visit::new("v1b", Coord::new(0.0, 0.0), 1800, window(0, 3600 * 8), ["double_staffing", "shower"], Some("g1".into())).unwrap(),
        ];
        let workers = vec![
            Worker::new("w1", ["shower", "double_staffing"], None, window(0, 3600 * 15)).unwrap(),
            Worker::new("w2", ["shower", "double_staffing"], None, window(0, 3600 * 15)).unwrap(),
        ];
        let shift = Shift::new(0, 15, None).unwrap();
        let matrices = manhattan_matrices(3);
        let config = SolverConfig::default();

        let result = solve(&visits, &workers, shift, &matrices, &config).unwrap();
        assert!(result.solution.dropped.is_empty());
        assert_eq!(result.solution.active_worker_count(), 2);
        for route in &result.solution.routes {
            assert_eq!(route.stops.len(), 1);
        }
        let start_a = result.solution.routes[0].stops[0].service_start_s;
        let start_b = result.solution.routes[1].stops[0].service_start_s;
        assert_eq!(start_a, start_b, "double-staffed visits must have overlapping service intervals");
    }

    #[test]
    fn fleet_minimisation_uses_one_worker_for_trivially_compatible_visits() {
        // spec.md §8 scenario 5 (shrunk to 5 workers for test speed)
        let visits = (0..3)
            .map(|i| Visit::new(format!("v{i}"), Coord::new(0.0, 0.0), 300, window(0, 3600 * 10), Vec::<&str>::new(), None).unwrap())
            .collect::<Vec<_>>();
        let workers = (0..5)
            .map(|i| Worker::new(format!("w{i}"), Vec::<&str>::new(), None, window(0, 3600 * 15)).unwrap())
            .collect::<Vec<_>>();
        let shift = Shift::new(0, 15, None).unwrap();
        let matrices = manhattan_matrices(4);
        let config = SolverConfig::default();

        let result = solve(&visits, &workers, shift, &matrices, &config).unwrap();
        assert_eq!(result.solution.active_worker_count(), 1);
    }

    #[test]
    fn unreachable_visit_is_dropped_as_unroutable() {
        // spec.md §8 scenario 6
        let visits = vec![Visit::new("v1", Coord::new(0.0, 0.0), 300, window(0, 3600), Vec::<&str>::new(), None).unwrap()];
        let workers = vec![Worker::new("w1", Vec::<&str>::new(), None, window(0, 3600 * 15)).unwrap()];
        let shift = Shift::new(0, 15, None).unwrap();
        let mut matrices = manhattan_matrices(2);
        matrices.t[0][1] = INFEASIBLE;
        matrices.t[1][0] = INFEASIBLE;
        let config = SolverConfig::default();

        let result = solve(&visits, &workers, shift, &matrices, &config).unwrap();
        assert_eq!(result.solution.dropped.len(), 1);
        assert_eq!(result.solution.dropped[0].penalty, 0);
        assert_eq!(result.solution.dropped[0].reason, crate::domain::DropReason::Unroutable);
    }

    #[test]
    fn rejects_mismatched_matrix_size() {
        let visits = vec![Visit::new("v1", Coord::new(0.0, 0.0), 300, window(0, 3600), Vec::<&str>::new(), None).unwrap()];
        let workers = vec![Worker::new("w1", Vec::<&str>::new(), None, window(0, 3600 * 15)).unwrap()];
        let shift = Shift::new(0, 15, None).unwrap();
        let matrices = manhattan_matrices(5);
        let config = SolverConfig::default();
        assert!(solve(&visits, &workers, shift, &matrices, &config).is_err());
    }

    #[test]
    fn same_seed_is_deterministic() {
        let visits = (0..4)
            .map(|i| Visit::new(format!("v{i}"), Coord::new(0.0, 0.0), 300, window(0, 3600 * 10), Vec::<&str>::new(), None).unwrap())
            .collect::<Vec<_>>();
        let workers = (0..2)
            .map(|i| Worker::new(format!("w{i}"), Vec::<&str>::new(), None, window(0, 3600 * 15)).unwrap())
            .collect::<Vec<_>>();
        let shift = Shift::new(0, 15, None).unwrap();
        let matrices = manhattan_matrices(5);
        let config = SolverConfig::default();

        let r1 = solve(&visits, &workers, shift, &matrices, &config).unwrap();
        let r2 = solve(&visits, &workers, shift, &matrices, &config).unwrap();
        assert_eq!(r1.objective.total(), r2.objective.total());
        for (a, b) in r1.solution.routes.iter().zip(r2.solution.routes.iter()) {
            assert_eq!(a.stops.len(), b.stops.len());
        }
    }

    #[test]
    fn cancellation_before_finalise_is_reported() {
        let visits = vec![Visit::new("v1", Coord::new(0.0, 0.0), 300, window(0, 3600), Vec::<&str>::new(), None).unwrap()];
        let workers = vec![Worker::new("w1", Vec::<&str>::new(), None, window(0, 3600 * 15)).unwrap()];
        let shift = Shift::new(0, 15, None).unwrap();
        let matrices = manhattan_matrices(2);
        let config = SolverConfig::default();

        let result = solve_cancellable(&visits, &workers, shift, &matrices, &config, &|| true).unwrap();
        assert_eq!(result.state, SolverState::CancelledBeforeFinalise);
    }
}
