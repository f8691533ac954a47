//! Rule Store
//!
//! The only writer to the host rule table. Keeps a mirror of the rules it
//! wants installed; a write the host refuses is logged, its ids are marked
//! pending, and [`RuleStore::resync`] replays them on the next tick along
//! with any rule the host lost or gained behind the store's back.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};

use tk_compiler::{dedupe_by_id, RuleCompiler};
use tk_core::types::{Rule, RuleId};

use crate::error::EngineError;
use crate::host::{RuleTable, RuleUpdate};

pub struct RuleStore {
    table: Box<dyn RuleTable>,
    compiler: RuleCompiler,
    desired: BTreeMap<RuleId, Rule>,
    /// Ids whose last write was refused
    pending: BTreeSet<RuleId>,
    /// Whether `desired` was seeded from the host
    loaded: bool,
}

impl RuleStore {
    pub fn new(table: Box<dyn RuleTable>, compiler: RuleCompiler) -> Self {
        Self {
            table,
            compiler,
            desired: BTreeMap::new(),
            pending: BTreeSet::new(),
            loaded: false,
        }
    }

    /// Seed the mirror from the rules already installed.
    pub fn load(&mut self) {
        match self.table.get_rules() {
            Ok(rules) => {
                debug!("Loaded {} installed rules", rules.len());
                self.desired = rules.into_iter().map(|r| (r.id, r)).collect();
                self.loaded = true;
            }
            Err(e) => warn!("Could not read installed rules: {}", e),
        }
    }

    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.desired.get(&id)
    }

    pub fn has(&self, id: RuleId) -> bool {
        self.desired.contains_key(&id)
    }

    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.desired.values()
    }

    pub fn len(&self) -> usize {
        self.desired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }

    /// Some write is waiting to be replayed.
    pub fn is_dirty(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Install `rule`, replacing whatever holds its id. No-op when the
    /// identical rule is already installed.
    pub fn upsert(&mut self, rule: Rule) {
        let id = rule.id;
        if let Some(existing) = self.desired.get(&id) {
            if *existing == rule && !self.pending.contains(&id) {
                return;
            }
            if existing.condition.url_filter != rule.condition.url_filter {
                warn!(
                    "Rule id {} collision: '{}' replaces '{}'",
                    id, rule.condition.url_filter, existing.condition.url_filter
                );
            }
        }

        self.desired.insert(id, rule.clone());
        self.write(RuleUpdate {
            remove_rule_ids: vec![id],
            add_rules: vec![rule],
        });
    }

    /// Remove the rule with `id`. No-op when it is not installed.
    pub fn remove(&mut self, id: RuleId) {
        let known = self.desired.remove(&id).is_some() || self.pending.contains(&id);
        if !known && self.loaded {
            return;
        }

        self.write(RuleUpdate {
            remove_rule_ids: vec![id],
            add_rules: Vec::new(),
        });
    }

    /// Replace every installed rule with one block rule per domain.
    ///
    /// Idempotent. Runs on install and upgrade; strict rules and live grants
    /// are restored afterwards by their policies.
    pub fn reconcile_defaults(&mut self, domains: &[String]) {
        let mut stale: BTreeSet<RuleId> = match self.table.get_rules() {
            Ok(rules) => rules.into_iter().map(|r| r.id).collect(),
            Err(e) => {
                warn!("Could not read installed rules: {}", e);
                BTreeSet::new()
            }
        };
        stale.extend(self.desired.keys().copied());

        let mut rules = self.compiler.compile_block_list(domains);
        let stats = dedupe_by_id(&mut rules);
        info!(
            "Installing {} block rules ({} duplicates, {} collisions)",
            stats.after,
            stats.duplicates,
            stats.collisions.len()
        );

        self.desired = rules.iter().map(|r| (r.id, r.clone())).collect();
        self.loaded = true;
        self.pending.clear();
        self.write(RuleUpdate {
            remove_rule_ids: stale.into_iter().collect(),
            add_rules: rules,
        });
    }

    /// Make sure each domain has its block rule, leaving ids held by a live
    /// allow rule alone.
    pub fn sync_block_list(&mut self, domains: &[String]) {
        for domain in domains {
            let rule = self.compiler.compile_block_rule(domain);
            if self.desired.get(&rule.id).map_or(false, |r| r.action.is_allow()) {
                continue;
            }
            self.upsert(rule);
        }
    }

    /// Mark ids whose write the host rejected after acknowledging it.
    pub fn mark_pending(&mut self, ids: &[RuleId]) {
        self.pending.extend(ids.iter().copied());
    }

    /// Replay writes the host refused earlier and repair drift between the
    /// mirror and what the host actually has installed.
    pub fn resync(&mut self) {
        let mut ids = self.pending.clone();
        if self.loaded {
            ids.extend(self.drift());
        }
        if ids.is_empty() {
            return;
        }

        let ids: Vec<RuleId> = ids.into_iter().collect();
        let add_rules = ids
            .iter()
            .filter_map(|id| self.desired.get(id).cloned())
            .collect();
        info!("Resyncing {} rules", ids.len());
        self.write(RuleUpdate {
            remove_rule_ids: ids,
            add_rules,
        });
    }

    /// Ids installed differently from the mirror, missing, or unknown to it.
    fn drift(&self) -> BTreeSet<RuleId> {
        let installed: BTreeMap<RuleId, Rule> = match self.table.get_rules() {
            Ok(rules) => rules.into_iter().map(|r| (r.id, r)).collect(),
            Err(e) => {
                warn!("Could not read installed rules: {}", e);
                return BTreeSet::new();
            }
        };

        let mut drifted: BTreeSet<RuleId> = installed
            .keys()
            .filter(|id| !self.desired.contains_key(*id))
            .copied()
            .collect();
        drifted.extend(
            self.desired
                .iter()
                .filter(|(id, rule)| installed.get(*id) != Some(*rule))
                .map(|(id, _)| *id),
        );
        if !drifted.is_empty() {
            debug!("Rule table drifted on {} ids", drifted.len());
        }
        drifted
    }

    pub fn compiler(&self) -> &RuleCompiler {
        &self.compiler
    }

    fn write(&mut self, update: RuleUpdate) {
        let ids: BTreeSet<RuleId> = update
            .remove_rule_ids
            .iter()
            .copied()
            .chain(update.add_rules.iter().map(|r| r.id))
            .collect();
        match self.table.update_rules(update) {
            Ok(()) => {
                for id in &ids {
                    self.pending.remove(id);
                }
            }
            Err(e) => {
                warn!("{}", EngineError::RuleTableWrite(e));
                self.pending.extend(ids);
            }
        }
    }
}
