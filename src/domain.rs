//! Domain Model (spec.md §3, §4.1): immutable records for Visit, Worker,
//! Shift, and Solution, plus the validators that enforce the data-model
//! invariants at construction time rather than downstream.

use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::tokens::Token;

/// A geographic point (latitude, longitude).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// A time window in seconds since shift start (or since midnight, for
/// wall-clock availability windows — the unit is always seconds, callers
/// keep the reference point consistent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Window {
    start_s: i64,
    end_s: i64,
}

impl Window {
    pub fn new(start_s: i64, end_s: i64) -> Result<Self> {
        if start_s > end_s {
            return Err(Error::InvalidInput(format!(
                "window start {start_s} is after window end {end_s}"
            )));
        }
        Ok(Self { start_s, end_s })
    }

    pub fn start_s(&self) -> i64 {
        self.start_s
    }

    pub fn end_s(&self) -> i64 {
        self.end_s
    }

    pub fn contains(&self, instant_s: i64) -> bool {
        instant_s >= self.start_s && instant_s <= self.end_s
    }
}

/// A single scheduled service event at a recipient's location.
#[derive(Debug, Clone, PartialEq)]
pub struct Visit {
    visit_id: String,
    coord: Coord,
    service_seconds: i64,
    window: Window,
    constraints: BTreeSet<Token>,
    group_id: Option<String>,
}

impl Visit {
    /// Constructs a visit, parsing raw constraint strings against the
    /// closed vocabulary V (I6) and rejecting negative durations.
    pub fn new(
        visit_id: impl Into<String>,
        coord: Coord,
        service_seconds: i64,
        window: Window,
        constraints: impl IntoIterator<Item = impl AsRef<str>>,
        group_id: Option<String>,
    ) -> Result<Self> {
        if service_seconds < 0 {
            return Err(Error::InvalidInput(format!(
                "service_seconds must be non-negative, got {service_seconds}"
            )));
        }
        let mut parsed = BTreeSet::new();
        for raw in constraints {
            parsed.insert(Token::parse(raw.as_ref())?);
        }
        Ok(Self {
            visit_id: visit_id.into(),
            coord,
            service_seconds,
            window,
            constraints: parsed,
            group_id,
        })
    }

    pub fn id(&self) -> &str {
        &self.visit_id
    }

    pub fn coord(&self) -> Coord {
        self.coord
    }

    pub fn service_seconds(&self) -> i64 {
        self.service_seconds
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn constraints(&self) -> &BTreeSet<Token> {
        &self.constraints
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }
}

/// A field carer, the routing analogue of a "vehicle".
#[derive(Debug, Clone, PartialEq)]
pub struct Worker {
    worker_id: String,
    capabilities: BTreeSet<Token>,
    max_stops: u32,
    available_window: Window,
}

/// Default per-worker stop cap when none is specified (spec.md §3).
pub const DEFAULT_MAX_STOPS: u32 = 20;

impl Worker {
    pub fn new(
        worker_id: impl Into<String>,
        capabilities: impl IntoIterator<Item = impl AsRef<str>>,
        max_stops: Option<u32>,
        available_window: Window,
    ) -> Result<Self> {
        let max_stops = max_stops.unwrap_or(DEFAULT_MAX_STOPS);
        if max_stops == 0 {
            return Err(Error::InvalidInput(
                "max_stops must be a positive integer".into(),
            ));
        }
        let mut parsed = BTreeSet::new();
        for raw in capabilities {
            parsed.insert(Token::parse(raw.as_ref())?);
        }
        Ok(Self {
            worker_id: worker_id.into(),
            capabilities: parsed,
            max_stops,
            available_window,
        })
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn capabilities(&self) -> &BTreeSet<Token> {
        &self.capabilities
    }

    pub fn max_stops(&self) -> u32 {
        self.max_stops
    }

    pub fn available_window(&self) -> Window {
        self.available_window
    }
}

/// The wall-clock interval within which all routes must execute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Shift {
    start_hour: u32,
    end_hour: u32,
    max_wait_seconds: i64,
}

/// Default per-route cumulative slack cap when none is specified.
pub const DEFAULT_MAX_ROUTE_WAIT_S: i64 = 3600;

impl Shift {
    pub fn new(start_hour: u32, end_hour: u32, max_wait_seconds: Option<i64>) -> Result<Self> {
        if start_hour >= end_hour {
            return Err(Error::InvalidInput(format!(
                "shift start_hour {start_hour} must be before end_hour {end_hour}"
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
            max_wait_seconds: max_wait_seconds.unwrap_or(DEFAULT_MAX_ROUTE_WAIT_S),
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    pub fn max_route_seconds(&self) -> i64 {
        (self.end_hour as i64 - self.start_hour as i64) * 3600
    }

    pub fn max_wait_seconds(&self) -> i64 {
        self.max_wait_seconds
    }
}

/// One stop on a worker's route, with its computed timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledStop {
    pub visit_id: String,
    pub arrival_s: i64,
    pub service_start_s: i64,
    pub service_end_s: i64,
    pub departure_s: i64,
    /// Road distance (metres) travelled from the previous stop (or the
    /// depot, for the first stop) to reach this one.
    pub leg_distance_m: i64,
}

/// A worker's ordered tour: `depot -> stops[0] -> ... -> stops[n-1] -> depot`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Route {
    pub worker_id: String,
    /// The worker's shift start, in the same time base as every
    /// `ScheduledStop` timestamp — the baseline the first stop's travel
    /// leg is measured from.
    pub route_start_s: i64,
    pub stops: Vec<ScheduledStop>,
    /// Road distance (metres) for the final leg back to the depot.
    pub return_distance_m: i64,
    /// Travel time (seconds) for the final leg back to the depot.
    pub return_travel_s: i64,
}

impl Route {
    /// A worker is "active" iff its route contains at least one visit.
    pub fn is_active(&self) -> bool {
        !self.stops.is_empty()
    }
}

/// Why a visit was not serviced (spec.md §7: "every dropped visit carries
/// its reason").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No worker's capabilities cover the visit's constraints.
    Incompatible,
    /// The visit is compatible with some worker, but no feasible slot was
    /// found under the time-window/stop-count/route-span/wait caps.
    Capacity,
    /// The depot cannot reach (or return from) the visit's nearest road
    /// node at all; a road-graph connectivity gap, not a scheduling one.
    Unroutable,
}

/// A visit the solver could not feasibly place.
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedVisit {
    pub visit_id: String,
    pub penalty: i64,
    pub uncovered: Vec<Token>,
    pub reason: DropReason,
}

/// The output of one routing-engine invocation.
#[derive(Debug, Clone, Default)]
pub struct Solution {
    pub routes: Vec<Route>,
    pub dropped: Vec<DroppedVisit>,
}

impl Solution {
    pub fn active_worker_count(&self) -> usize {
        self.routes.iter().filter(|r| r.is_active()).count()
    }
}

/// Validates the scenario-level preconditions of spec.md §4.1: a non-empty
/// worker set and at least one visit.
pub fn validate_scenario(visits: &[Visit], workers: &[Worker]) -> Result<()> {
    if visits.is_empty() {
        return Err(Error::InvalidInput("at least one visit is required".into()));
    }
    if workers.is_empty() {
        return Err(Error::InvalidInput(
            "at least one worker is required".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(a: i64, b: i64) -> Window {
        Window::new(a, b).unwrap()
    }

    #[test]
    fn rejects_inverted_window() {
        assert!(Window::new(100, 50).is_err());
    }

    #[test]
    fn rejects_negative_service_time() {
        let err = Visit::new("v1", Coord::new(0.0, 0.0), -1, window(0, 100), Vec::<&str>::new(), None);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_unknown_constraint_token() {
        let err = Visit::new(
            "v1",
            Coord::new(0.0, 0.0),
            600,
            window(0, 3600),
            ["wheelchair"],
            None,
        );
        assert!(matches!(err, Err(Error::InvalidInput(_))));
    }

    #[test]
    fn accepts_valid_visit() {
        let visit = Visit::new(
            "v1",
            Coord::new(59.3, 18.0),
            600,
            window(0, 3600),
            ["license", "dog"],
            None,
        )
        .unwrap();
        assert_eq!(visit.constraints().len(), 2);
    }

    #[test]
    fn worker_defaults_max_stops() {
        let worker = Worker::new("w1", Vec::<&str>::new(), None, window(0, 8 * 3600)).unwrap();
        assert_eq!(worker.max_stops(), DEFAULT_MAX_STOPS);
    }

    #[test]
    fn worker_rejects_zero_max_stops() {
        let err = Worker::new("w1", Vec::<&str>::new(), Some(0), window(0, 100));
        assert!(err.is_err());
    }

    #[test]
    fn shift_computes_max_route_seconds() {
        let shift = Shift::new(8, 17, None).unwrap();
        assert_eq!(shift.max_route_seconds(), 9 * 3600);
        assert_eq!(shift.max_wait_seconds(), DEFAULT_MAX_ROUTE_WAIT_S);
    }

    #[test]
    fn shift_rejects_non_increasing_hours() {
        assert!(Shift::new(17, 8, None).is_err());
    }

    #[test]
    fn validate_scenario_requires_both_nonempty() {
        let visit = Visit::new("v1", Coord::new(0.0, 0.0), 0, window(0, 10), Vec::<&str>::new(), None).unwrap();
        let worker = Worker::new("w1", Vec::<&str>::new(), None, window(0, 10)).unwrap();
        assert!(validate_scenario(&[], &[worker.clone()]).is_err());
        assert!(validate_scenario(&[visit.clone()], &[]).is_err());
        assert!(validate_scenario(&[visit], &[worker]).is_ok());
    }
}
