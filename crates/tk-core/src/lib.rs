//! Timekeeper Core Library
//!
//! This crate provides the rule model shared by every other Timekeeper crate:
//! the declarative block/allow rules installed into the browser's rule table,
//! the deterministic rule-id hash, and an in-process matcher that decides a
//! navigation the same way the host's packet filter does.
//!
//! # Modules
//!
//! - `hash`: rolling string hash used to derive stable rule ids
//! - `types`: `Rule`, `RuleAction`, `ResourceType` and the match result types
//! - `filter`: compiler and evaluator for `urlFilter` expressions
//! - `url`: host extraction, domain normalization and subdomain checks
//! - `matcher`: priority-based rule evaluation for a single request

pub mod filter;
pub mod hash;
pub mod matcher;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use hash::{rolling_hash, rule_id};
pub use matcher::Matcher;
pub use types::{
    MatchDecision, MatchResult, RequestContext, ResourceType, Rule, RuleAction, RuleCondition,
    RuleError, RuleId,
};
