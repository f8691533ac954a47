//! Focus sessions
//!
//! A focus session installs the strict focus rule until its end time. The
//! end is enforced twice: by the `focusEnd` alarm and by every status read,
//! which stops a session found past its end even if the alarm never fired.

use log::{info, warn};
use serde::Serialize;
use ts_rs::TS;

use tk_core::types::Rule;

use crate::error::EngineError;
use crate::host::Timestamp;
use crate::rule_store::RuleStore;
use crate::scheduler::ExpiryScheduler;
use crate::settings::{FocusState, Settings};

pub const FOCUS_ALARM: &str = "focusEnd";

const MINUTE_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct FocusStatus {
    pub active: bool,
    #[ts(type = "number")]
    pub seconds_remaining: i64,
}

impl FocusStatus {
    pub fn inactive() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone)]
pub struct FocusSessionPolicy {
    strict_rule: Rule,
    max_minutes: u32,
}

impl FocusSessionPolicy {
    pub fn new(strict_rule: Rule, max_minutes: u32) -> Self {
        Self {
            strict_rule,
            max_minutes,
        }
    }

    pub fn strict_rule(&self) -> &Rule {
        &self.strict_rule
    }

    /// Start (or restart) a session of `minutes`.
    pub fn start(
        &self,
        minutes: i64,
        now: Timestamp,
        settings: &mut Settings,
        rules: &mut RuleStore,
        scheduler: &mut ExpiryScheduler,
    ) -> Result<FocusStatus, EngineError> {
        if minutes <= 0 || minutes > self.max_minutes as i64 {
            return Err(EngineError::InvalidDuration {
                minutes,
                max: self.max_minutes,
            });
        }

        let end_time = now + minutes * MINUTE_MS;
        settings.set_focus_state(FocusState {
            active: true,
            end_time: Some(end_time),
        })?;
        rules.upsert(self.strict_rule.clone());
        if let Err(e) = scheduler.schedule_at(FOCUS_ALARM, end_time) {
            warn!("{}; session ends on the next status check instead", e);
        }

        info!("Focus session started for {} minutes", minutes);
        Ok(FocusStatus {
            active: true,
            seconds_remaining: seconds_until(end_time, now),
        })
    }

    /// End the session. Idempotent.
    pub fn stop(&self, settings: &mut Settings, rules: &mut RuleStore, scheduler: &mut ExpiryScheduler) {
        if let Err(e) = settings.set_focus_state(FocusState::default()) {
            warn!("Could not persist focus stop: {}", e);
        }
        if rules.has(self.strict_rule.id) {
            rules.remove(self.strict_rule.id);
        }
        if let Err(e) = scheduler.cancel(FOCUS_ALARM) {
            warn!("{}", e);
        }
        info!("Focus session stopped");
    }

    /// Current status. A session found past its end is stopped here.
    pub fn status(
        &self,
        now: Timestamp,
        settings: &mut Settings,
        rules: &mut RuleStore,
        scheduler: &mut ExpiryScheduler,
    ) -> FocusStatus {
        let state = settings.focus_state();
        if !state.active {
            return FocusStatus::inactive();
        }

        match state.end_time {
            Some(end_time) if end_time > now => FocusStatus {
                active: true,
                seconds_remaining: seconds_until(end_time, now),
            },
            _ => {
                self.stop(settings, rules, scheduler);
                FocusStatus::inactive()
            }
        }
    }

    /// Converge the focus rule with the persisted state.
    pub fn reconcile(
        &self,
        now: Timestamp,
        settings: &mut Settings,
        rules: &mut RuleStore,
        scheduler: &mut ExpiryScheduler,
    ) -> FocusStatus {
        let status = self.status(now, settings, rules, scheduler);
        if status.active {
            rules.upsert(self.strict_rule.clone());
        } else if rules.has(self.strict_rule.id) {
            rules.remove(self.strict_rule.id);
        }
        status
    }

    /// Reconcile after a restart and re-arm the end alarm.
    pub fn rehydrate(
        &self,
        now: Timestamp,
        settings: &mut Settings,
        rules: &mut RuleStore,
        scheduler: &mut ExpiryScheduler,
    ) {
        let status = self.reconcile(now, settings, rules, scheduler);
        if !status.active {
            return;
        }
        if let Some(end_time) = settings.focus_state().end_time {
            if let Err(e) = scheduler.schedule_at(FOCUS_ALARM, end_time) {
                warn!("{}", e);
            }
        }
    }
}

fn seconds_until(end_time: Timestamp, now: Timestamp) -> i64 {
    let remaining = (end_time - now).max(0);
    (remaining + 999) / 1000
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, FixedOffset, TimeZone};

    use tk_compiler::RuleCompiler;
    use tk_core::types::{priority, RULE_ID_FOCUS};

    use super::*;
    use crate::host::Clock;
    use crate::memory::{ManualClock, MemoryAlarms, MemoryRuleTable, MemoryStore};

    struct Fixture {
        policy: FocusSessionPolicy,
        settings: Settings,
        rules: RuleStore,
        scheduler: ExpiryScheduler,
        clock: ManualClock,
        alarms: MemoryAlarms,
        table: MemoryRuleTable,
    }

    fn fixture() -> Fixture {
        let clock = ManualClock::new(
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2026, 3, 14, 9, 0, 0)
                .unwrap(),
        );
        let compiler = RuleCompiler::default();
        let table = MemoryRuleTable::new();
        let alarms = MemoryAlarms::new(clock.clone());
        Fixture {
            policy: FocusSessionPolicy::new(
                compiler.compile_strict_rule(RULE_ID_FOCUS, priority::STRICT_BLOCK, ["api.aladhan.com"]),
                1440,
            ),
            settings: Settings::new(Box::new(MemoryStore::new())),
            rules: RuleStore::new(Box::new(table.clone()), compiler),
            scheduler: ExpiryScheduler::new(Box::new(alarms.clone())),
            clock,
            alarms,
            table,
        }
    }

    #[test]
    fn start_reports_full_duration() {
        let mut f = fixture();
        let now = f.clock.now_ms();
        let status = f
            .policy
            .start(25, now, &mut f.settings, &mut f.rules, &mut f.scheduler)
            .unwrap();

        assert!(status.active);
        assert!(status.seconds_remaining > 1499 && status.seconds_remaining <= 1500);
        assert!(f.table.is_blocked("https://example.com/"));
        assert_eq!(f.alarms.next_fire(FOCUS_ALARM), Some(now + 25 * 60_000));
    }

    #[test]
    fn rejects_out_of_range_durations() {
        let mut f = fixture();
        for minutes in [0, -5, 1441] {
            assert!(matches!(
                f.policy.start(minutes, 0, &mut f.settings, &mut f.rules, &mut f.scheduler),
                Err(EngineError::InvalidDuration { .. })
            ));
        }
        assert!(f.table.rules().is_empty());
    }

    #[test]
    fn status_rounds_remaining_seconds_up() {
        let mut f = fixture();
        let now = f.clock.now_ms();
        f.policy
            .start(1, now, &mut f.settings, &mut f.rules, &mut f.scheduler)
            .unwrap();

        let status = f
            .policy
            .status(now + 59_001, &mut f.settings, &mut f.rules, &mut f.scheduler);
        assert_eq!(status.seconds_remaining, 1);
    }

    #[test]
    fn expired_session_self_heals_on_status() {
        let mut f = fixture();
        let now = f.clock.now_ms();
        f.policy
            .start(25, now, &mut f.settings, &mut f.rules, &mut f.scheduler)
            .unwrap();

        // The alarm is lost, e.g. while the process was suspended.
        f.alarms.set_failing(true);
        f.clock.advance(Duration::minutes(26));
        let later = f.clock.now_ms();

        let status = f
            .policy
            .status(later, &mut f.settings, &mut f.rules, &mut f.scheduler);
        assert_eq!(status, FocusStatus::inactive());
        assert!(!f.settings.focus_state().active);
        assert!(!f.table.is_blocked("https://example.com/"));
    }

    #[test]
    fn stop_is_idempotent() {
        let mut f = fixture();
        f.policy.stop(&mut f.settings, &mut f.rules, &mut f.scheduler);
        f.policy.stop(&mut f.settings, &mut f.rules, &mut f.scheduler);
        assert!(f.table.rules().is_empty());
        assert_eq!(f.settings.focus_state(), FocusState::default());
    }

    #[test]
    fn rehydrate_restores_rule_and_alarm() {
        let mut f = fixture();
        let now = f.clock.now_ms();
        f.settings
            .set_focus_state(FocusState {
                active: true,
                end_time: Some(now + 10 * 60_000),
            })
            .unwrap();

        f.policy
            .rehydrate(now, &mut f.settings, &mut f.rules, &mut f.scheduler);
        assert!(f.table.is_blocked("https://example.com/"));
        assert_eq!(f.alarms.next_fire(FOCUS_ALARM), Some(now + 10 * 60_000));
    }
}
