//! Dense position identifiers.
//!
//! An [`Identifier`] is a path through a tree of fan-out [`BASE`]. Each step
//! of the path is a [`Position`]: a digit plus the site that chose it.
//! Identifiers compare lexicographically (a strict prefix sorts first), so a
//! fresh identifier can always be generated between two distinct ones.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Fan-out of the identifier tree. Digits live in `[0, BASE)`.
pub const BASE: u32 = 256;

/// Maximum distance from the left digit when picking a fresh one.
pub const BOUNDARY: u32 = BASE / 4;

/// Stable identity of a replica for the lifetime of its document.
///
/// The empty site sorts below every generated one and is used as the
/// tiebreak of the left document edge.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(String);

impl SiteId {
    pub fn new(id: impl Into<String>) -> Self {
        SiteId(id.into())
    }

    /// Generate a new, globally unique site id.
    pub fn generate() -> Self {
        SiteId(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SiteId {
    fn from(s: &str) -> Self {
        SiteId(s.to_string())
    }
}

/// One level of an identifier path.
///
/// Ordered by digit, then by tiebreak site.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub digit: u32,
    pub tiebreak: SiteId,
}

impl Position {
    pub fn new(digit: u32, tiebreak: impl Into<SiteId>) -> Self {
        Position {
            digit,
            tiebreak: tiebreak.into(),
        }
    }

    /// Position used in place of an exhausted left identifier.
    fn floor() -> Self {
        Position {
            digit: 0,
            tiebreak: SiteId::default(),
        }
    }
}

/// Raised when the inputs to [`Identifier::between`] are not strictly ordered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("identifiers out of order at depth {depth}: {reason}")]
pub struct OrderingError {
    pub depth: usize,
    pub reason: &'static str,
}

impl OrderingError {
    fn at(depth: usize, reason: &'static str) -> Self {
        OrderingError { depth, reason }
    }
}

/// A dense, totally ordered position in a sequence.
///
/// The empty identifier doubles as both document edges: as the left bound
/// of [`between`](Identifier::between) it means "start", as the right bound
/// it means "end".
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(Vec<Position>);

impl Identifier {
    pub fn new(positions: Vec<Position>) -> Self {
        Identifier(positions)
    }

    pub fn positions(&self) -> &[Position] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Generate an identifier strictly between `prev` and `next`.
    ///
    /// `prev` may be empty (document start) and `next` may be empty
    /// (document end). New digits are tagged with `site`. The result is
    /// random within a window of [`BOUNDARY`] digits to the right of
    /// `prev`, which keeps identifiers short under left-to-right typing.
    pub fn between<R: Rng + ?Sized>(
        prev: &Identifier,
        next: &Identifier,
        site: &SiteId,
        rng: &mut R,
    ) -> Result<Identifier, OrderingError> {
        let left = prev.positions();
        let right = next.positions();
        let mut i = 0;
        let mut j = 0;
        // Once we descend below a digit gap of one, next no longer constrains us.
        let mut bounded = !right.is_empty();
        let mut path = Vec::with_capacity(left.len() + 1);

        loop {
            let depth = path.len();
            let lo = left.get(i).cloned().unwrap_or_else(Position::floor);
            let hi = if bounded { right.get(j) } else { None };
            let hi_digit = hi.map_or(BASE, |p| p.digit);

            // Remote identifiers may carry any u32 digit.
            let floor = lo.digit.saturating_add(1);
            if hi_digit > floor {
                let ceiling = hi_digit.min(lo.digit.saturating_add(BOUNDARY));
                let digit = rng.gen_range(floor..ceiling);
                path.push(Position::new(digit, site.clone()));
                return Ok(Identifier(path));
            }
            if hi_digit < lo.digit {
                return Err(OrderingError::at(depth, "left digit exceeds right digit"));
            }

            let same_digit = hi_digit == lo.digit;
            let hi_tiebreak = hi.map(|p| &p.tiebreak);
            if !same_digit || hi_tiebreak.is_some_and(|t| lo.tiebreak < *t) {
                path.push(lo);
                i += 1;
                bounded = false;
                continue;
            }
            if hi_tiebreak != Some(&lo.tiebreak) {
                return Err(OrderingError::at(depth, "left tiebreak exceeds right tiebreak"));
            }

            path.push(lo);
            i += 1;
            j += 1;
            if right.get(j).is_none() {
                // next is a prefix of prev, or equal to it
                return Err(OrderingError::at(depth + 1, "right identifier exhausted"));
            }
        }
    }
}

impl From<Vec<Position>> for Identifier {
    fn from(positions: Vec<Position>) -> Self {
        Identifier(positions)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (n, p) in self.0.iter().enumerate() {
            if n > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}:{}", p.digit, p.tiebreak)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn id(parts: &[(u32, &str)]) -> Identifier {
        Identifier::new(parts.iter().map(|&(d, s)| Position::new(d, s)).collect())
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_compare_by_digit() {
        assert!(id(&[(1, "a")]) < id(&[(2, "a")]));
        assert!(id(&[(1, "b"), (9, "b")]) < id(&[(2, "a")]));
    }

    #[test]
    fn test_compare_by_tiebreak() {
        assert!(id(&[(1, "a")]) < id(&[(1, "b")]));
        assert!(id(&[(1, "a"), (200, "z")]) < id(&[(1, "b")]));
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert!(id(&[(1, "a")]) < id(&[(1, "a"), (0, "a")]));
        assert!(Identifier::default() < id(&[(0, "")]));
    }

    #[test]
    fn test_between_document_edges() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let first = Identifier::between(&Identifier::default(), &Identifier::default(), &site, &mut rng).unwrap();
        assert_eq!(first.depth(), 1);
        let digit = first.positions()[0].digit;
        assert!((1..BOUNDARY).contains(&digit));
        assert_eq!(first.positions()[0].tiebreak, site);
    }

    #[test]
    fn test_between_wide_gap() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let prev = id(&[(10, "a")]);
        let next = id(&[(20, "a")]);
        let mid = Identifier::between(&prev, &next, &site, &mut rng).unwrap();
        assert!(prev < mid && mid < next);
        assert_eq!(mid.depth(), 1);
    }

    #[test]
    fn test_between_adjacent_digits_descends() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let prev = id(&[(10, "a")]);
        let next = id(&[(11, "a")]);
        let mid = Identifier::between(&prev, &next, &site, &mut rng).unwrap();
        assert!(prev < mid && mid < next);
        assert_eq!(mid.depth(), 2);
        assert_eq!(mid.positions()[0], Position::new(10, "a"));
    }

    #[test]
    fn test_between_same_digit_lower_tiebreak_descends() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let prev = id(&[(10, "a"), (255, "a")]);
        let next = id(&[(10, "b")]);
        let mid = Identifier::between(&prev, &next, &site, &mut rng).unwrap();
        assert!(prev < mid && mid < next);
        assert_eq!(mid.depth(), 3);
    }

    #[test]
    fn test_between_shared_prefix() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let prev = id(&[(5, "a"), (3, "a")]);
        let next = id(&[(5, "a"), (200, "a")]);
        let mid = Identifier::between(&prev, &next, &site, &mut rng).unwrap();
        assert!(prev < mid && mid < next);
        assert_eq!(mid.positions()[0], Position::new(5, "a"));
    }

    #[test]
    fn test_between_before_deep_first_identifier() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let next = id(&[(0, ""), (1, "a")]);
        let mid = Identifier::between(&Identifier::default(), &next, &site, &mut rng).unwrap();
        assert!(Identifier::default() < mid && mid < next);
    }

    #[test]
    fn test_between_rejects_reversed() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let prev = id(&[(20, "a")]);
        let next = id(&[(10, "a")]);
        assert!(Identifier::between(&prev, &next, &site, &mut rng).is_err());
    }

    #[test]
    fn test_between_huge_left_digit_is_an_error() {
        let site = SiteId::new("s");
        let mut rng = rng();
        for digit in [u32::MAX, u32::MAX - 1, BASE] {
            let prev = id(&[(digit, "a")]);
            assert!(Identifier::between(&prev, &Identifier::default(), &site, &mut rng).is_err());
        }
        let next = id(&[(u32::MAX, "b")]);
        let mid = Identifier::between(&id(&[(u32::MAX - 1, "a")]), &next, &site, &mut rng).unwrap();
        assert!(id(&[(u32::MAX - 1, "a")]) < mid && mid < next);
    }

    #[test]
    fn test_between_rejects_equal() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let same = id(&[(3, "a"), (4, "b")]);
        let err = Identifier::between(&same, &same, &site, &mut rng).unwrap_err();
        assert_eq!(err.depth, 2);
    }

    #[test]
    fn test_between_rejects_right_prefix() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let prev = id(&[(3, "a"), (4, "b")]);
        let next = id(&[(3, "a")]);
        assert!(Identifier::between(&prev, &next, &site, &mut rng).is_err());
    }

    #[test]
    fn test_between_rejects_higher_left_tiebreak() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let prev = id(&[(3, "b")]);
        let next = id(&[(3, "a")]);
        assert!(Identifier::between(&prev, &next, &site, &mut rng).is_err());
    }

    #[test]
    fn test_repeated_append_stays_ordered() {
        let site = SiteId::new("s");
        let mut rng = rng();
        let mut prev = Identifier::default();
        for _ in 0..500 {
            let next = Identifier::between(&prev, &Identifier::default(), &site, &mut rng).unwrap();
            assert!(prev < next);
            prev = next;
        }
    }

    #[test]
    fn test_serialization_shape() {
        let ident = id(&[(7, "site")]);
        let json = serde_json::to_string(&ident).unwrap();
        assert_eq!(json, r#"[{"digit":7,"tiebreak":"site"}]"#);
        let back: Identifier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ident);
    }
}
