//! carefleet-router: a constrained vehicle-routing-with-time-windows core
//! for home-care field-worker scheduling.
//!
//! The pipeline is five stages, one module apiece: [`domain`] (the data
//! model), [`graph`] (road-network travel-time/distance matrices),
//! [`oracle`] (visit/worker compatibility), [`solver`] (the routing
//! engine), and [`report`] (plain-text rendering of a solved [`domain::Solution`]).

pub mod config;
pub mod domain;
pub mod error;
pub mod graph;
pub mod haversine;
pub mod oracle;
pub mod report;
pub mod solver;
pub mod tokens;

pub use config::SolverConfig;
pub use domain::{Coord, DropReason, DroppedVisit, Route, ScheduledStop, Shift, Solution, Visit, Window, Worker};
pub use error::{Error, Result};
pub use graph::{build_matrices, Matrices, RoadGraph, SpeedSpec};
pub use solver::{solve, solve_cancellable, solve_multi_restart, Objective, SolveResult, SolverState};
