//! The closed constraint/capability vocabulary and its penalty table.

use std::collections::HashMap;
use std::fmt;

use crate::error::{Error, Result};

/// A single token from the closed vocabulary V.
///
/// Visits carry a set of these as constraints; workers carry a set as
/// capabilities. The vocabulary is closed by construction: `Token::parse`
/// is the only way to obtain one from external input, and it rejects
/// anything outside this set (I6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Token {
    License,
    Smoker,
    Dog,
    Cat,
    Adult,
    Man,
    Woman,
    Medication,
    Insulin,
    Stoma,
    DoubleStaffing,
    Shower,
    Activation,
    DogFriendly,
    CatFriendly,
}

impl Token {
    /// All tokens in the closed vocabulary, in a stable order.
    pub const ALL: [Token; 15] = [
        Token::License,
        Token::Smoker,
        Token::Dog,
        Token::Cat,
        Token::Adult,
        Token::Man,
        Token::Woman,
        Token::Medication,
        Token::Insulin,
        Token::Stoma,
        Token::DoubleStaffing,
        Token::Shower,
        Token::Activation,
        Token::DogFriendly,
        Token::CatFriendly,
    ];

    /// Canonical string form, matching the vocabulary names in the Glossary.
    pub fn as_str(self) -> &'static str {
        match self {
            Token::License => "license",
            Token::Smoker => "smoker",
            Token::Dog => "dog",
            Token::Cat => "cat",
            Token::Adult => ">18",
            Token::Man => "man",
            Token::Woman => "woman",
            Token::Medication => "medication",
            Token::Insulin => "insulin",
            Token::Stoma => "stoma",
            Token::DoubleStaffing => "double_staffing",
            Token::Shower => "shower",
            Token::Activation => "activation",
            Token::DogFriendly => "dog_friendly",
            Token::CatFriendly => "cat_friendly",
        }
    }

    /// Parse a normalised-intake token string against the closed vocabulary.
    ///
    /// Returns `Error::InvalidInput` for anything outside V (I6).
    pub fn parse(raw: &str) -> Result<Token> {
        Token::ALL
            .iter()
            .copied()
            .find(|tok| tok.as_str() == raw)
            .ok_or_else(|| Error::InvalidInput(format!("unknown constraint token: {raw:?}")))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-token drop penalty, keyed by the closed vocabulary.
///
/// Only tokens that can appear as an *unmet visit constraint* carry a
/// penalty; `dog_friendly`/`cat_friendly` are capability-only tokens and are
/// never themselves "uncovered" (see [`crate::oracle`]'s normalisation).
#[derive(Debug, Clone)]
pub struct PenaltyTable {
    values: HashMap<Token, i64>,
}

impl Default for PenaltyTable {
    fn default() -> Self {
        use Token::*;
        let values = [
            (Medication, 4000),
            (Insulin, 4000),
            (Man, 3500),
            (Woman, 3500),
            (Adult, 2500),
            (License, 500),
            (DoubleStaffing, 450),
            (Stoma, 400),
            (Shower, 300),
            (Activation, 200),
            (Dog, 100),
            (Cat, 100),
            (Smoker, 50),
        ]
        .into_iter()
        .collect();
        Self { values }
    }
}

impl PenaltyTable {
    pub fn new(values: HashMap<Token, i64>) -> Self {
        Self { values }
    }

    /// Penalty for a single token; zero for tokens with no entry (e.g. the
    /// capability-only friendliness tokens).
    pub fn penalty_of(&self, token: Token) -> i64 {
        self.values.get(&token).copied().unwrap_or(0)
    }

    /// Sum of penalties across a set of uncovered tokens.
    pub fn penalty(&self, tokens: impl IntoIterator<Item = Token>) -> i64 {
        tokens.into_iter().map(|t| self.penalty_of(t)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_glossary_token() {
        for tok in Token::ALL {
            assert_eq!(Token::parse(tok.as_str()).unwrap(), tok);
        }
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(Token::parse("wheelchair").is_err());
    }

    #[test]
    fn default_penalty_ordering_is_medical_gt_gender_gt_age_gt_licence_gt_staffing_gt_hygiene_gt_animal_gt_smoker() {
        let table = PenaltyTable::default();
        assert!(table.penalty_of(Token::Medication) > table.penalty_of(Token::Man));
        assert!(table.penalty_of(Token::Man) > table.penalty_of(Token::Adult));
        assert!(table.penalty_of(Token::Adult) > table.penalty_of(Token::License));
        assert!(table.penalty_of(Token::License) > table.penalty_of(Token::DoubleStaffing));
        assert!(table.penalty_of(Token::DoubleStaffing) > table.penalty_of(Token::Stoma));
        assert!(table.penalty_of(Token::Stoma) > table.penalty_of(Token::Shower));
        assert!(table.penalty_of(Token::Shower) > table.penalty_of(Token::Activation));
        assert!(table.penalty_of(Token::Activation) > table.penalty_of(Token::Dog));
        assert!(table.penalty_of(Token::Dog) > table.penalty_of(Token::Smoker));
    }

    #[test]
    fn friendliness_tokens_carry_no_penalty() {
        let table = PenaltyTable::default();
        assert_eq!(table.penalty_of(Token::DogFriendly), 0);
        assert_eq!(table.penalty_of(Token::CatFriendly), 0);
    }

    #[test]
    fn penalty_sums_across_tokens() {
        let table = PenaltyTable::default();
        let sum = table.penalty([Token::Insulin, Token::License]);
        assert_eq!(sum, 4000 + 500);
    }
}
