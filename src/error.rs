//! Error taxonomy (spec.md §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors the core can raise. Infeasible scenarios, unroutable visits, and
/// mid-solve cancellation are not exceptions — they are reported as
/// [`crate::solver::SolverState`]/[`crate::domain::DroppedVisit`] values on
/// an `Ok` result, since a partial solution must still be inspectable by the
/// caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed visit/worker/graph records, or a token outside the closed
    /// vocabulary. Caller's fault; no partial work is returned.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}
