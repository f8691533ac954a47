//! Temporary access grants
//!
//! A grant installs an allow rule for the target's host and an alarm named
//! `grant|<domain>`. A grant for a block-listed domain shares that domain's
//! rule id, so the allow rule stands in for the block rule until expiry,
//! when the block rule is put back and matching tabs are reloaded.

use log::{info, warn};
use serde::Serialize;
use ts_rs::TS;
use url::Url;

use tk_compiler::RuleCompiler;
use tk_core::hash::rule_id;
use tk_core::url::{domain_match_patterns, host_matches_domain};

use crate::error::EngineError;
use crate::host::{TabHost, Timestamp};
use crate::rule_store::RuleStore;
use crate::scheduler::{alarm_name, ExpiryScheduler};

pub const GRANT_ALARM_KIND: &str = "grant";
/// Kind used by earlier releases; alarms armed by them still expire.
pub const LEGACY_GRANT_ALARM_KIND: &str = "block";

const MINUTE_MS: i64 = 60_000;

/// A live grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AccessGrant {
    pub domain: String,
    #[ts(type = "number")]
    pub expires_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted(AccessGrant),
    /// Non-positive duration; nothing changed
    Ignored,
}

/// Host of `url`, lowercased.
pub fn target_domain(url: &str) -> Result<String, EngineError> {
    let parsed = Url::parse(url.trim()).map_err(|_| EngineError::InvalidUrl(url.to_string()))?;
    parsed
        .host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
        .ok_or_else(|| EngineError::InvalidUrl(url.to_string()))
}

#[derive(Debug, Clone)]
pub struct AccessGrantPolicy {
    compiler: RuleCompiler,
    max_minutes: u32,
}

impl AccessGrantPolicy {
    pub fn new(compiler: RuleCompiler, max_minutes: u32) -> Self {
        Self {
            compiler,
            max_minutes,
        }
    }

    /// Allow the host of `url` for `minutes`. Granting again before expiry
    /// resets the expiry.
    pub fn grant(
        &self,
        url: &str,
        minutes: i64,
        now: Timestamp,
        rules: &mut RuleStore,
        scheduler: &mut ExpiryScheduler,
    ) -> Result<GrantOutcome, EngineError> {
        let domain = target_domain(url)?;
        if minutes <= 0 {
            info!("Ignoring {}-minute grant for {}", minutes, domain);
            return Ok(GrantOutcome::Ignored);
        }
        if minutes > self.max_minutes as i64 {
            return Err(EngineError::InvalidDuration {
                minutes,
                max: self.max_minutes,
            });
        }

        // Without an expiry alarm the allow rule would outlive the grant.
        let expires_at = now + minutes * MINUTE_MS;
        scheduler.schedule_at(&alarm_name(GRANT_ALARM_KIND, &domain), expires_at)?;
        rules.upsert(self.compiler.compile_allow_rule(&domain));

        info!("Granted {} for {} minutes", domain, minutes);
        Ok(GrantOutcome::Granted(AccessGrant { domain, expires_at }))
    }

    /// Revoke the grant for `domain`: drop its allow rule, restore any block
    /// rule sharing the id, and reload tabs on the domain. Idempotent.
    pub fn on_expire(
        &self,
        domain: &str,
        block_list: &[String],
        rules: &mut RuleStore,
        tabs: &mut dyn TabHost,
    ) -> usize {
        let id = rule_id(domain);
        if rules.get(id).map_or(false, |r| r.action.is_allow()) {
            rules.remove(id);
        }
        for site in block_list.iter().filter(|s| rule_id(s) == id) {
            rules.upsert(self.compiler.compile_block_rule(site));
        }

        match tabs.reload_matching(&domain_match_patterns(domain)) {
            Ok(count) => {
                info!("Grant for {} expired, reloaded {} tabs", domain, count);
                count
            }
            Err(e) => {
                warn!("Grant for {} expired, reload failed: {}", domain, e);
                0
            }
        }
    }

    /// Whether the host of `url` falls under the block list.
    pub fn is_listed(&self, url: &str, block_list: &[String]) -> Result<bool, EngineError> {
        let domain = target_domain(url)?;
        Ok(block_list.iter().any(|site| host_matches_domain(&domain, site)))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{FixedOffset, TimeZone};

    use super::*;
    use crate::host::Clock;
    use crate::memory::{ManualClock, MemoryAlarms, MemoryRuleTable, MemoryTabs};

    struct Fixture {
        policy: AccessGrantPolicy,
        rules: RuleStore,
        scheduler: ExpiryScheduler,
        clock: ManualClock,
        alarms: MemoryAlarms,
        table: MemoryRuleTable,
        tabs: MemoryTabs,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2026, 3, 14, 9, 0, 0)
                .unwrap(),
        );
        let table = MemoryRuleTable::new();
        let alarms = MemoryAlarms::new(clock.clone());
        let mut rules = RuleStore::new(Box::new(table.clone()), RuleCompiler::default());
        rules.reconcile_defaults(&["youtube.com".to_string(), "x.com".to_string()]);
        Fixture {
            policy: AccessGrantPolicy::new(RuleCompiler::default(), 1440),
            rules,
            scheduler: ExpiryScheduler::new(Box::new(alarms.clone())),
            clock,
            alarms,
            table,
            tabs: MemoryTabs::new(),
        }
    }

    fn list() -> Vec<String> {
        vec!["youtube.com".to_string(), "x.com".to_string()]
    }

    #[test]
    fn extracts_target_domain() {
        assert_eq!(target_domain("https://YouTube.com/watch?v=x").unwrap(), "youtube.com");
        assert_eq!(target_domain("http://m.youtube.com:8080/").unwrap(), "m.youtube.com");
        assert!(matches!(target_domain("not a url"), Err(EngineError::InvalidUrl(_))));
        assert!(matches!(target_domain("data:text/plain,hi"), Err(EngineError::InvalidUrl(_))));
    }

    #[test]
    fn grant_replaces_block_rule_until_expiry() {
        let mut f = fixture();
        let now = f.clock.now_ms();
        let outcome = f
            .policy
            .grant("https://youtube.com/watch?v=x", 10, now, &mut f.rules, &mut f.scheduler)
            .unwrap();

        assert_eq!(
            outcome,
            GrantOutcome::Granted(AccessGrant {
                domain: "youtube.com".to_string(),
                expires_at: now + 600_000,
            })
        );
        assert!(!f.table.is_blocked("https://youtube.com/watch?v=x"));
        assert!(f.table.is_blocked("https://x.com/"));
        assert_eq!(f.alarms.next_fire("grant|youtube.com"), Some(now + 600_000));

        f.tabs.open(1, "https://www.youtube.com/feed");
        f.tabs.open(2, "https://example.com/");
        let reloaded = f.policy.on_expire("youtube.com", &list(), &mut f.rules, &mut f.tabs);

        assert_eq!(reloaded, 1);
        assert_eq!(f.tabs.reloaded(), vec![1]);
        assert!(f.table.is_blocked("https://youtube.com/watch?v=x"));
    }

    #[test]
    fn regrant_resets_expiry() {
        let mut f = fixture();
        let now = f.clock.now_ms();
        f.policy
            .grant("https://youtube.com/", 10, now, &mut f.rules, &mut f.scheduler)
            .unwrap();
        f.policy
            .grant("https://youtube.com/", 30, now + 60_000, &mut f.rules, &mut f.scheduler)
            .unwrap();

        assert_eq!(
            f.alarms.next_fire("grant|youtube.com"),
            Some(now + 60_000 + 30 * 60_000)
        );
        assert_eq!(f.alarms.scheduled(), vec!["grant|youtube.com".to_string()]);
    }

    #[test]
    fn non_positive_duration_is_ignored() {
        let mut f = fixture();
        let outcome = f
            .policy
            .grant("https://youtube.com/", 0, 0, &mut f.rules, &mut f.scheduler)
            .unwrap();
        assert_eq!(outcome, GrantOutcome::Ignored);
        assert!(f.table.is_blocked("https://youtube.com/"));
        assert!(f.alarms.scheduled().is_empty());
    }

    #[test]
    fn over_long_duration_is_rejected() {
        let mut f = fixture();
        assert!(matches!(
            f.policy.grant("https://youtube.com/", 1441, 0, &mut f.rules, &mut f.scheduler),
            Err(EngineError::InvalidDuration { minutes: 1441, max: 1440 })
        ));
    }

    #[test]
    fn grant_without_alarm_changes_nothing() {
        let mut f = fixture();
        f.alarms.set_failing(true);
        assert!(matches!(
            f.policy.grant("https://youtube.com/", 10, 0, &mut f.rules, &mut f.scheduler),
            Err(EngineError::Scheduler(_))
        ));
        assert!(f.table.is_blocked("https://youtube.com/"));
    }

    #[test]
    fn subdomain_grant_leaves_parent_block() {
        let mut f = fixture();
        f.policy
            .grant("https://music.youtube.com/", 10, 0, &mut f.rules, &mut f.scheduler)
            .unwrap();
        assert!(!f.table.is_blocked("https://music.youtube.com/"));
        assert!(f.table.is_blocked("https://www.youtube.com/"));

        f.policy
            .on_expire("music.youtube.com", &list(), &mut f.rules, &mut f.tabs);
        assert!(f.table.is_blocked("https://music.youtube.com/"));
    }

    #[test]
    fn expiry_twice_is_harmless() {
        let mut f = fixture();
        f.policy
            .grant("https://youtube.com/", 10, 0, &mut f.rules, &mut f.scheduler)
            .unwrap();
        f.policy.on_expire("youtube.com", &list(), &mut f.rules, &mut f.tabs);
        let before = f.table.rules();
        f.policy.on_expire("youtube.com", &list(), &mut f.rules, &mut f.tabs);
        assert_eq!(f.table.rules(), before);
    }

    #[test]
    fn listed_targets() {
        let f = fixture();
        assert!(f.policy.is_listed("https://m.youtube.com/", &list()).unwrap());
        assert!(!f.policy.is_listed("https://notyoutube.com/", &list()).unwrap());
    }
}
