//! Cardinality constraints on match and transform results.

use serde::{Deserialize, Serialize};

/// How many records a step may legitimately produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cardinality {
    /// Exactly one record.
    ExactlyOne,
    /// At least one record.
    OneOrMore,
    /// No record or a single one.
    ZeroOrOne,
    /// Any number of records.
    #[default]
    ZeroOrMore,
}

impl Cardinality {
    /// Final check, once every page has been consumed.
    pub fn is_satisfied_by(self, count: usize) -> bool {
        match self {
            Cardinality::ExactlyOne => count == 1,
            Cardinality::OneOrMore => count >= 1,
            Cardinality::ZeroOrOne => count <= 1,
            Cardinality::ZeroOrMore => true,
        }
    }

    /// Early check while pages are still being read.
    ///
    /// Monotonic: once it fails for a count it fails for every larger count.
    pub fn is_satisfied_in_progress(self, count: usize) -> bool {
        match self {
            Cardinality::ExactlyOne | Cardinality::ZeroOrOne => count <= 1,
            Cardinality::OneOrMore | Cardinality::ZeroOrMore => true,
        }
    }

    /// Whether at most one record is allowed.
    pub fn is_single_valued(self) -> bool {
        matches!(self, Cardinality::ExactlyOne | Cardinality::ZeroOrOne)
    }

    /// Whether missing data alone violates the constraint.
    pub fn fails_on_missing(self) -> bool {
        matches!(self, Cardinality::ExactlyOne | Cardinality::OneOrMore)
    }
}

impl std::fmt::Display for Cardinality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cardinality::ExactlyOne => write!(f, "EXACTLY_ONE"),
            Cardinality::OneOrMore => write!(f, "ONE_OR_MORE"),
            Cardinality::ZeroOrOne => write!(f, "ZERO_OR_ONE"),
            Cardinality::ZeroOrMore => write!(f, "ZERO_OR_MORE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_check() {
        assert!(!Cardinality::ExactlyOne.is_satisfied_by(0));
        assert!(Cardinality::ExactlyOne.is_satisfied_by(1));
        assert!(!Cardinality::ExactlyOne.is_satisfied_by(2));

        assert!(!Cardinality::OneOrMore.is_satisfied_by(0));
        assert!(Cardinality::OneOrMore.is_satisfied_by(5));

        assert!(Cardinality::ZeroOrOne.is_satisfied_by(0));
        assert!(!Cardinality::ZeroOrOne.is_satisfied_by(2));

        assert!(Cardinality::ZeroOrMore.is_satisfied_by(0));
        assert!(Cardinality::ZeroOrMore.is_satisfied_by(1000));
    }

    #[test]
    fn test_in_progress_check_is_monotonic() {
        for cardinality in [
            Cardinality::ExactlyOne,
            Cardinality::OneOrMore,
            Cardinality::ZeroOrOne,
            Cardinality::ZeroOrMore,
        ] {
            let mut violated = false;
            for count in 0..10 {
                let ok = cardinality.is_satisfied_in_progress(count);
                assert!(!(violated && ok), "{} recovered at {}", cardinality, count);
                violated |= !ok;
            }
        }

        assert!(Cardinality::ExactlyOne.is_satisfied_in_progress(0));
        assert!(!Cardinality::ExactlyOne.is_satisfied_in_progress(2));
        assert!(Cardinality::OneOrMore.is_satisfied_in_progress(0));
    }

    #[test]
    fn test_names() {
        assert_eq!(Cardinality::ExactlyOne.to_string(), "EXACTLY_ONE");
        assert_eq!(
            serde_json::to_string(&Cardinality::ZeroOrOne).unwrap(),
            r#""ZERO_OR_ONE""#
        );
        assert_eq!(Cardinality::default(), Cardinality::ZeroOrMore);
    }
}
