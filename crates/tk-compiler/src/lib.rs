//! Timekeeper Rule Compiler
//!
//! This crate turns user block lists into the declarative rules installed in
//! the browser's rule table.

pub mod compiler;
pub mod optimizer;
pub mod parser;

pub use compiler::{RuleCompiler, DEFAULT_INTERSTITIAL_PATH};
pub use optimizer::{dedupe_by_id, Collision, DedupeStats};
pub use parser::{normalize_entry, parse_block_list, EntryError};
