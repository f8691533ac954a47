//! Rule-id hashing for Timekeeper
//!
//! Rule ids are derived from the match key (normally a domain) with a
//! base-31 polynomial rolling hash over UTF-16 code units, truncated to a
//! signed 32-bit integer. The absolute value is folded into
//! `[RULE_ID_MIN, RULE_ID_MAX)`.
//!
//! # Collisions
//!
//! The folded space holds 29000 ids, so two distinct domains can land on the
//! same id. This is accepted: the rule table keeps one rule per id and the
//! last writer wins. `tk_compiler::collisions` reports such pairs so they can
//! at least be logged. The strict-rule ids (`RULE_ID_FOCUS`, `RULE_ID_PRAYER`)
//! also live inside the range.

use crate::types::{RuleId, RULE_ID_MAX, RULE_ID_MIN};

const ID_SPAN: i64 = (RULE_ID_MAX - RULE_ID_MIN) as i64;

/// Base-31 rolling hash, wrapping at 32 bits.
///
/// Iterates UTF-16 code units so ids stay identical to the ones the
/// extension's earlier script builds installed.
#[inline]
pub fn rolling_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(unit as i32))
}

/// Deterministic rule id for a match key, in `[1000, 30000)`.
#[inline]
pub fn rule_id(key: &str) -> RuleId {
    // i64 so that |i32::MIN| does not overflow
    let folded = (rolling_hash(key) as i64).abs() % ID_SPAN;
    (folded + RULE_ID_MIN as i64) as RuleId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_id_consistent() {
        assert_eq!(rule_id("example.com"), rule_id("example.com"));
    }

    #[test]
    fn test_rule_id_known_values() {
        // Pinned so ids survive upgrades of existing installs.
        assert_eq!(rule_id("youtube.com"), 24866);
        assert_eq!(rule_id("facebook.com"), 7023);
        assert_eq!(rule_id("x.com"), 4595);
        assert_eq!(rule_id("www.youtube.com"), 15945);
    }

    #[test]
    fn test_rule_id_in_range() {
        let samples = [
            "",
            "a",
            "example.com",
            "very-long-domain-name.with.many.labels.example.co.uk",
            "例え.jp",
        ];
        for s in samples {
            let id = rule_id(s);
            assert!((RULE_ID_MIN..RULE_ID_MAX).contains(&id), "{s:?} -> {id}");
        }
    }

    #[test]
    fn test_rule_id_empty_is_floor() {
        assert_eq!(rule_id(""), RULE_ID_MIN);
    }

    #[test]
    fn test_rolling_hash_wraps() {
        assert_eq!(rolling_hash("a"), 97);
        assert_eq!(rolling_hash("youtube.com"), -78033866);
    }

    #[test]
    fn test_rule_id_case_sensitive() {
        // Callers normalize first; the hash itself does not.
        assert_ne!(rule_id("Example.com"), rule_id("example.com"));
    }
}
