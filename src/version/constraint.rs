//! Version constraints declared through the `versions` checker option

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::version::value::VersionValue;

/// Comparison operator accepted as a key of the `versions` mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl Operator {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Operator::Less => ordering == Ordering::Less,
            Operator::Greater => ordering == Ordering::Greater,
            Operator::LessOrEqual => ordering != Ordering::Greater,
            Operator::GreaterOrEqual => ordering != Ordering::Less,
            Operator::Equal => ordering == Ordering::Equal,
            Operator::NotEqual => ordering != Ordering::Equal,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::LessOrEqual => "<=",
            Operator::GreaterOrEqual => ">=",
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conjunction of `operator -> operand` predicates
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct ConstraintSet {
    predicates: IndexMap<Operator, String>,
}

impl ConstraintSet {
    pub fn new(predicates: impl IntoIterator<Item = (Operator, String)>) -> Self {
        Self {
            predicates: predicates.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// Returns true when `version` satisfies every predicate.
    ///
    /// Operands are parsed under the scheme of `version`. An operand that does
    /// not parse makes its predicate fail.
    pub fn matches(&self, version: &VersionValue) -> bool {
        self.predicates.iter().all(|(op, operand)| {
            VersionValue::parse(operand, version.scheme())
                .and_then(|operand| version.compare(&operand))
                .map(|ordering| op.holds(ordering))
                .unwrap_or(false)
        })
    }
}
