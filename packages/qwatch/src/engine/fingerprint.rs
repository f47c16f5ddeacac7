//! Canonical identifiers for WHERE clauses.
//!
//! The condition tree is expanded into OR-of-AND term lists, terms are
//! deduplicated and sorted at both levels, and the rendered string is hashed.
//! Reordered AND/OR operands and redundant parentheses therefore collapse to the
//! same fingerprint. Other boolean equivalences (De Morgan, absorption, ...) are
//! not recognized, so such queries get separate caches.

use crate::engine::query::{Condition, Operand, Operator};
use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};
use smol_str::{format_smolstr, SmolStr};
use std::collections::BTreeSet;
use xxhash_rust::xxh64::xxh64;

const AND_SEPARATOR: &str = " AND ";
const OR_SEPARATOR: &str = " OR ";

type AndTerms = SmallVec<[SmolStr; 4]>;

/// Terms joined by OR, each an AND of comparisons.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expression(Vec<AndTerms>);

impl Expression {
    pub fn from_condition(cond: &Condition) -> Self {
        match cond {
            Condition::Comparison { .. } => Expression(vec![smallvec![SmolStr::from(cond.to_string())]]),
            Condition::And(l, r) => Self::from_condition(l).combine_and(&Self::from_condition(r)),
            Condition::Or(l, r) => Self::from_condition(l).combine_or(&Self::from_condition(r)),
        }
    }

    fn combine_and(&self, other: &Expression) -> Expression {
        let mut result = Vec::with_capacity(self.0.len() * other.0.len());
        for a in &self.0 {
            for b in &other.0 {
                let mut combined: AndTerms = a.iter().chain(b.iter()).cloned().collect();
                combined.sort_unstable();
                combined.dedup();
                result.push(combined);
            }
        }
        Expression(result)
    }

    fn combine_or(&self, other: &Expression) -> Expression {
        let mut result = Vec::with_capacity(self.0.len() + other.0.len());
        let mut seen: FxHashSet<String> = FxHashSet::default();
        for terms in self.0.iter().chain(other.0.iter()) {
            let mut terms = terms.clone();
            terms.sort_unstable();
            if seen.insert(terms.join(",")) {
                result.push(terms);
            }
        }
        Expression(result)
    }

    pub fn render(&self) -> String {
        let mut or_terms: Vec<String> = self
            .0
            .iter()
            .map(|and_terms| {
                let mut sorted = and_terms.clone();
                sorted.sort_unstable();
                sorted.join(AND_SEPARATOR)
            })
            .collect();
        or_terms.sort_unstable();
        or_terms.join(OR_SEPARATOR)
    }
}

/// Fingerprint of an optional WHERE clause. `None` hashes the empty expression.
pub fn generate(cond: Option<&Condition>) -> SmolStr {
    let rendered = cond
        .map(|c| Expression::from_condition(c).render())
        .unwrap_or_default();
    format_smolstr!("f_{}", xxh64(rendered.as_bytes(), 0))
}

/// Key glob every matching row must satisfy.
///
/// A `$key LIKE '<glob>'` comparison qualifies only when it appears in every
/// OR branch, so the pattern is a function of the canonical expression and is
/// identical for all queries sharing a fingerprint. Falls back to `*`.
pub fn key_pattern(cond: Option<&Condition>) -> SmolStr {
    cond.and_then(|c| required_patterns(c).into_iter().next())
        .unwrap_or_else(|| SmolStr::new_static("*"))
}

fn required_patterns(cond: &Condition) -> BTreeSet<SmolStr> {
    match cond {
        Condition::Comparison {
            left: Operand::Key,
            op: Operator::Like,
            right: Operand::Str(pattern),
        } => BTreeSet::from([pattern.clone()]),
        Condition::Comparison { .. } => BTreeSet::new(),
        Condition::And(l, r) => {
            let mut patterns = required_patterns(l);
            patterns.extend(required_patterns(r));
            patterns
        }
        Condition::Or(l, r) => {
            let right = required_patterns(r);
            required_patterns(l)
                .into_iter()
                .filter(|p| right.contains(p))
                .collect()
        }
    }
}

#[cfg(test)]
mod fingerprint_tests {
    use super::*;
    use crate::engine::compiler::compile;

    fn fp(where_clause: &str) -> SmolStr {
        compile(&format!("SELECT $key WHERE {}", where_clause))
            .unwrap()
            .fingerprint
    }

    #[test]
    fn test_or_operands_commute() {
        assert_eq!(fp("$value > 10 OR $value < 5"), fp("$value < 5 OR $value > 10"));
    }

    #[test]
    fn test_and_operands_commute() {
        assert_eq!(
            fp("$key LIKE 'k*' AND $value = 'x'"),
            fp("$value = 'x' AND $key LIKE 'k*'")
        );
    }

    #[test]
    fn test_redundant_parentheses() {
        assert_eq!(fp("$value > 10 OR $value < 5"), fp("(($value > 10) OR ($value < 5))"));
        assert_eq!(
            fp("$value > 1 AND $value < 9 AND $key = 'a'"),
            fp("$value > 1 AND ($value < 9 AND $key = 'a')")
        );
    }

    #[test]
    fn test_distribution_over_or() {
        assert_eq!(
            fp("$key LIKE 'k*' AND ($value = 1 OR $value = 2)"),
            fp("($value = 2 AND $key LIKE 'k*') OR ($key LIKE 'k*' AND $value = 1)")
        );
    }

    #[test]
    fn test_duplicate_terms_collapse() {
        assert_eq!(fp("$value = 1 AND $value = 1"), fp("$value = 1"));
        assert_eq!(fp("$value = 1 OR $value = 1"), fp("$value = 1"));
    }

    #[test]
    fn test_different_conditions_differ() {
        assert_ne!(fp("$value > 10"), fp("$value >= 10"));
        assert_ne!(fp("$value > 10 AND $value < 5"), fp("$value > 10 OR $value < 5"));
    }

    #[test]
    fn test_de_morgan_not_recognized() {
        // NOT LIKE vs its expanded form are logically related but not canonicalized
        assert_ne!(fp("$key NOT LIKE 'a*'"), fp("$key LIKE 'a*'"));
    }

    #[test]
    fn test_empty_condition() {
        let q = compile("SELECT $key").unwrap();
        assert_eq!(q.fingerprint, generate(None));
        assert_eq!(q.fingerprint, format!("f_{}", xxh64(b"", 0)));
    }

    #[test]
    fn test_expression_render() {
        let q = compile("SELECT $key WHERE $value = 2 AND ($key = 'b' OR $key = 'a')").unwrap();
        let expr = Expression::from_condition(q.condition.as_ref().unwrap());
        assert_eq!(expr.render(), "$key = 'a' AND $value = 2 OR $key = 'b' AND $value = 2");
    }

    #[test]
    fn test_key_pattern_requires_every_branch() {
        let pattern = |w: &str| compile(&format!("SELECT $key WHERE {}", w)).unwrap().key_pattern;
        assert_eq!(pattern("$key LIKE 'k*' AND $value > 1"), "k*");
        assert_eq!(pattern("$key LIKE 'k*' OR $value > 1"), "*");
        assert_eq!(pattern("($key LIKE 'k*' AND $value = 1) OR ($key LIKE 'k*' AND $value = 2)"), "k*");
        // Order independent, so equal fingerprints hydrate the same key range
        assert_eq!(
            pattern("$key LIKE 'b*' AND $key LIKE 'a*'"),
            pattern("$key LIKE 'a*' AND $key LIKE 'b*'")
        );
        assert_eq!(pattern("$key NOT LIKE 'k*'"), "*");
    }
}
