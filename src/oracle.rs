//! Compatibility Oracle (spec.md §4.3): pure functions relating a visit's
//! constraint set to a worker's capability set.

use std::collections::BTreeSet;

use crate::domain::{Visit, Worker};
use crate::tokens::{PenaltyTable, Token};

/// The one normalisation rule in the core (spec.md §9: "not a string hack
/// in the oracle's caller"): a `dog`/`cat` constraint is satisfied by the
/// `dog_friendly`/`cat_friendly` capability, nothing else is rewritten.
fn required_capability(constraint: Token) -> Token {
    match constraint {
        Token::Dog => Token::DogFriendly,
        Token::Cat => Token::CatFriendly,
        other => other,
    }
}

/// True iff every (normalised) constraint token of `visit` is present in
/// `worker`'s capability set.
pub fn covers(worker: &Worker, visit: &Visit) -> bool {
    visit
        .constraints()
        .iter()
        .all(|&tok| worker.capabilities().contains(&required_capability(tok)))
}

/// The exact complement: the visit's own constraint tokens that are not
/// covered by the worker's capabilities.
pub fn uncovered(worker: &Worker, visit: &Visit) -> BTreeSet<Token> {
    visit
        .constraints()
        .iter()
        .copied()
        .filter(|&tok| !worker.capabilities().contains(&required_capability(tok)))
        .collect()
}

/// Sum of per-token drop penalties for a set of uncovered tokens.
pub fn penalty(table: &PenaltyTable, tokens: &BTreeSet<Token>) -> i64 {
    table.penalty(tokens.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coord, Window};

    fn visit(constraints: &[&str]) -> Visit {
        Visit::new(
            "v1",
            Coord::new(0.0, 0.0),
            600,
            Window::new(0, 3600).unwrap(),
            constraints.to_vec(),
            None,
        )
        .unwrap()
    }

    fn worker(capabilities: &[&str]) -> Worker {
        Worker::new("w1", capabilities.to_vec(), None, Window::new(0, 8 * 3600).unwrap()).unwrap()
    }

    #[test]
    fn dog_constraint_satisfied_by_dog_friendly_capability() {
        let w = worker(&["dog_friendly"]);
        let v = visit(&["dog"]);
        assert!(covers(&w, &v));
    }

    #[test]
    fn dog_constraint_not_satisfied_by_literal_dog_capability() {
        // "dog" as a capability makes no sense (it's a visit-side token for
        // "a dog lives here"), but the oracle must not accidentally treat
        // it as satisfying the requirement.
        let w = worker(&["dog"]);
        let v = visit(&["dog"]);
        assert!(!covers(&w, &v));
    }

    #[test]
    fn gender_constraint_requires_exact_match() {
        let w = worker(&["woman"]);
        let v = visit(&["man"]);
        assert!(!covers(&w, &v));
        let v2 = visit(&["woman"]);
        assert!(covers(&w, &v2));
    }

    #[test]
    fn uncovered_is_exact_complement() {
        let w = worker(&["license"]);
        let v = visit(&["license", "insulin", "dog"]);
        let missing = uncovered(&w, &v);
        assert_eq!(missing, [Token::Insulin, Token::Dog].into_iter().collect());
    }

    #[test]
    fn full_coverage_has_no_uncovered_tokens() {
        let w = worker(&["license", "dog_friendly"]);
        let v = visit(&["license", "dog"]);
        assert!(uncovered(&w, &v).is_empty());
        assert!(covers(&w, &v));
    }

    #[test]
    fn penalty_matches_table_ordering() {
        let table = PenaltyTable::default();
        let w = worker(&[]);
        let v = visit(&["insulin", "license"]);
        let missing = uncovered(&w, &v);
        assert_eq!(penalty(&table, &missing), 4000 + 500);
    }
}
