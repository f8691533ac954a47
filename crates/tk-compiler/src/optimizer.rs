use std::collections::HashMap;

use tk_core::types::{Rule, RuleId};

/// Two rules that hashed to the same id; the later one is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collision {
    pub id: RuleId,
    pub kept: String,
    pub dropped: String,
}

pub struct DedupeStats {
    pub before: usize,
    pub after: usize,
    pub duplicates: usize,
    pub collisions: Vec<Collision>,
}

/// Collapse rules sharing an id so a batch can be installed in one update.
///
/// The host refuses a batch with repeated ids. Last writer wins, matching what
/// sequential upserts would leave behind; identical repeats are counted as
/// duplicates, differing ones are reported as collisions. The position of
/// each surviving rule is that of its first occurrence.
pub fn dedupe_by_id(rules: &mut Vec<Rule>) -> DedupeStats {
    let before = rules.len();
    let mut slot_of: HashMap<RuleId, usize> = HashMap::new();
    let mut kept: Vec<Rule> = Vec::with_capacity(rules.len());
    let mut duplicates = 0usize;
    let mut collisions = Vec::new();

    for rule in rules.drain(..) {
        match slot_of.get(&rule.id) {
            Some(&slot) => {
                if kept[slot] == rule {
                    duplicates += 1;
                } else {
                    let dropped = std::mem::replace(&mut kept[slot], rule);
                    log::warn!(
                        "Rule id {} collision: '{}' replaces '{}'",
                        dropped.id,
                        kept[slot].condition.url_filter,
                        dropped.condition.url_filter
                    );
                    collisions.push(Collision {
                        id: dropped.id,
                        kept: kept[slot].condition.url_filter.clone(),
                        dropped: dropped.condition.url_filter,
                    });
                }
            }
            None => {
                slot_of.insert(rule.id, kept.len());
                kept.push(rule);
            }
        }
    }

    *rules = kept;

    DedupeStats {
        before,
        after: rules.len(),
        duplicates,
        collisions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;

    #[test]
    fn drops_exact_duplicates() {
        let compiler = RuleCompiler::default();
        let mut rules = compiler.compile_block_list(&["youtube.com", "x.com", "youtube.com"]);
        let stats = dedupe_by_id(&mut rules);

        assert_eq!(stats.before, 3);
        assert_eq!(stats.after, 2);
        assert_eq!(stats.duplicates, 1);
        assert!(stats.collisions.is_empty());
    }

    #[test]
    fn last_writer_wins_on_collision() {
        let compiler = RuleCompiler::default();
        let block = compiler.compile_block_rule("example.com");
        let mut impostor = compiler.compile_block_rule("other.net");
        impostor.id = block.id;

        let mut rules = vec![block, compiler.compile_block_rule("x.com"), impostor];
        let stats = dedupe_by_id(&mut rules);

        assert_eq!(stats.after, 2);
        assert_eq!(rules[0].condition.url_filter, "||other.net^");
        assert_eq!(rules[1].condition.url_filter, "||x.com^");
        assert_eq!(
            stats.collisions,
            vec![Collision {
                id: rules[0].id,
                kept: "||other.net^".to_string(),
                dropped: "||example.com^".to_string(),
            }]
        );
    }
}
