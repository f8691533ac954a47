//! In-memory host
//!
//! Implementations of every host trait backed by shared in-process state.
//! Each handle is cheap to clone; clones see the same state, so a test or
//! the simulator keeps one copy for inspection and hands another to the
//! engine.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use chrono::{DateTime, Duration, FixedOffset, NaiveDate};
use serde_json::{Map, Value};

use tk_core::types::{MatchResult, Rule, RuleId};
use tk_core::url::matches_url_pattern;
use tk_core::{Matcher, RequestContext};

use crate::config::EngineConfig;
use crate::engine::{Engine, Host};
use crate::host::{
    AlarmHost, AlarmSpec, Clock, HostError, KeyValueStore, Notifier, PrayerTimeSource, RuleTable,
    RuleUpdate, TabHost, TabId, Timestamp,
};
use crate::prayer::{CalculationMethod, Location};

// =============================================================================
// Storage
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Rc<RefCell<Map<String, Value>>>,
    failing: Rc<Cell<bool>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.data.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: &str, value: Value) {
        self.data.borrow_mut().insert(key.to_string(), value);
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.borrow().clone()
    }

    /// Refuse writes while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, keys: &[&str]) -> Result<Map<String, Value>, HostError> {
        let data = self.data.borrow();
        Ok(keys
            .iter()
            .filter_map(|k| data.get(*k).map(|v| (k.to_string(), v.clone())))
            .collect())
    }

    fn set(&mut self, items: Map<String, Value>) -> Result<(), HostError> {
        if self.failing.get() {
            return Err(HostError::new("storage.set", "quota exceeded"));
        }
        self.data.borrow_mut().extend(items);
        Ok(())
    }

    fn remove(&mut self, keys: &[&str]) -> Result<(), HostError> {
        if self.failing.get() {
            return Err(HostError::new("storage.remove", "quota exceeded"));
        }
        let mut data = self.data.borrow_mut();
        for key in keys {
            data.remove(*key);
        }
        Ok(())
    }
}

// =============================================================================
// Rule table
// =============================================================================

/// Rule table that validates updates the way the host does: all or nothing,
/// unique ids, compilable filters.
#[derive(Debug, Clone, Default)]
pub struct MemoryRuleTable {
    rules: Rc<RefCell<BTreeMap<RuleId, Rule>>>,
    failing: Rc<Cell<bool>>,
    writes: Rc<Cell<usize>>,
}

impl MemoryRuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed rules, by id.
    pub fn rules(&self) -> Vec<Rule> {
        self.rules.borrow().values().cloned().collect()
    }

    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.rules.borrow().get(&id).cloned()
    }

    /// Install a rule directly, bypassing the engine.
    pub fn install(&self, rule: Rule) {
        self.rules.borrow_mut().insert(rule.id, rule);
    }

    /// Replace the table contents, bypassing the engine.
    pub fn set_rules(&self, rules: Vec<Rule>) {
        *self.rules.borrow_mut() = rules.into_iter().map(|r| (r.id, r)).collect();
    }

    /// Accepted updates so far.
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    /// How a top-level navigation to `url` would be handled.
    pub fn match_navigation(&self, url: &str) -> MatchResult {
        let rules = self.rules();
        let matcher = Matcher::new(&rules);
        matcher.match_request(&RequestContext::navigation(url, 0))
    }

    pub fn is_blocked(&self, url: &str) -> bool {
        let rules = self.rules();
        Matcher::new(&rules).is_blocked(url)
    }
}

impl RuleTable for MemoryRuleTable {
    fn get_rules(&self) -> Result<Vec<Rule>, HostError> {
        Ok(self.rules())
    }

    fn update_rules(&mut self, update: RuleUpdate) -> Result<(), HostError> {
        if self.failing.get() {
            return Err(HostError::new("updateDynamicRules", "rule table unavailable"));
        }

        let mut next = self.rules.borrow().clone();
        for id in &update.remove_rule_ids {
            next.remove(id);
        }

        let mut added = HashSet::new();
        for rule in update.add_rules {
            rule.validate()
                .map_err(|e| HostError::new("updateDynamicRules", e.to_string()))?;
            if !added.insert(rule.id) || next.contains_key(&rule.id) {
                return Err(HostError::new(
                    "updateDynamicRules",
                    format!("Rule with id {} already exists", rule.id),
                ));
            }
            next.insert(rule.id, rule);
        }

        *self.rules.borrow_mut() = next;
        self.writes.set(self.writes.get() + 1);
        Ok(())
    }
}

// =============================================================================
// Clock and alarms
// =============================================================================

#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<DateTime<FixedOffset>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        Self {
            now: Rc::new(Cell::new(start)),
        }
    }

    pub fn set(&self, at: DateTime<FixedOffset>) {
        self.now.set(at);
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.now.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScheduledAlarm {
    next: Timestamp,
    period_ms: Option<i64>,
}

/// Alarms driven by a [`ManualClock`]. Nothing fires on its own; call
/// [`MemoryAlarms::take_due`] (or use [`Simulation`]).
#[derive(Debug, Clone)]
pub struct MemoryAlarms {
    alarms: Rc<RefCell<BTreeMap<String, ScheduledAlarm>>>,
    clock: ManualClock,
    failing: Rc<Cell<bool>>,
}

impl MemoryAlarms {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            alarms: Rc::new(RefCell::new(BTreeMap::new())),
            clock,
            failing: Rc::new(Cell::new(false)),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.set(failing);
    }

    /// Registered alarm names, sorted.
    pub fn scheduled(&self) -> Vec<String> {
        self.alarms.borrow().keys().cloned().collect()
    }

    pub fn next_fire(&self, name: &str) -> Option<Timestamp> {
        self.alarms.borrow().get(name).map(|a| a.next)
    }

    /// Earliest pending fire time.
    pub fn earliest(&self) -> Option<Timestamp> {
        self.alarms.borrow().values().map(|a| a.next).min()
    }

    /// Names due at the current time, earliest first. One-shot alarms are
    /// removed; periodic ones move past now, firing once however late.
    pub fn take_due(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut alarms = self.alarms.borrow_mut();

        let mut due: Vec<(Timestamp, String)> = alarms
            .iter()
            .filter(|(_, a)| a.next <= now)
            .map(|(name, a)| (a.next, name.clone()))
            .collect();
        due.sort();

        for (_, name) in &due {
            let period = alarms.get(name).and_then(|a| a.period_ms).filter(|&p| p > 0);
            match period {
                Some(period) => {
                    if let Some(alarm) = alarms.get_mut(name) {
                        while alarm.next <= now {
                            alarm.next += period;
                        }
                    }
                }
                None => {
                    alarms.remove(name);
                }
            }
        }

        due.into_iter().map(|(_, name)| name).collect()
    }
}

impl AlarmHost for MemoryAlarms {
    fn create(&mut self, name: &str, spec: AlarmSpec) -> Result<(), HostError> {
        if self.failing.get() {
            return Err(HostError::new("alarms.create", "alarm service unavailable"));
        }
        let alarm = match spec {
            AlarmSpec::At { when } => ScheduledAlarm {
                next: when,
                period_ms: None,
            },
            AlarmSpec::Every { period_minutes } => {
                let period = (period_minutes * 60_000.0) as i64;
                ScheduledAlarm {
                    next: self.clock.now_ms() + period,
                    period_ms: Some(period),
                }
            }
        };
        self.alarms.borrow_mut().insert(name.to_string(), alarm);
        Ok(())
    }

    fn clear(&mut self, name: &str) -> Result<(), HostError> {
        if self.failing.get() {
            return Err(HostError::new("alarms.clear", "alarm service unavailable"));
        }
        self.alarms.borrow_mut().remove(name);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>, HostError> {
        Ok(self.scheduled())
    }
}

// =============================================================================
// Tabs, notifications, prayer times
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemoryTabs {
    open: Rc<RefCell<BTreeMap<TabId, String>>>,
    reloaded: Rc<RefCell<Vec<TabId>>>,
    closed: Rc<RefCell<Vec<TabId>>>,
}

impl MemoryTabs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, tab: TabId, url: &str) {
        self.open.borrow_mut().insert(tab, url.to_string());
    }

    pub fn reloaded(&self) -> Vec<TabId> {
        self.reloaded.borrow().clone()
    }

    pub fn closed(&self) -> Vec<TabId> {
        self.closed.borrow().clone()
    }
}

impl TabHost for MemoryTabs {
    fn reload_matching(&mut self, patterns: &[String]) -> Result<usize, HostError> {
        let hits: Vec<TabId> = self
            .open
            .borrow()
            .iter()
            .filter(|(_, url)| patterns.iter().any(|p| matches_url_pattern(p, url)))
            .map(|(&tab, _)| tab)
            .collect();
        self.reloaded.borrow_mut().extend(&hits);
        Ok(hits.len())
    }

    fn close(&mut self, tab: TabId) -> Result<(), HostError> {
        if self.open.borrow_mut().remove(&tab).is_none() {
            return Err(HostError::new("tabs.remove", format!("No tab with id: {tab}")));
        }
        self.closed.borrow_mut().push(tab);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    sent: Rc<RefCell<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.borrow().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&mut self, id: &str, title: &str, message: &str) -> Result<(), HostError> {
        self.sent.borrow_mut().push(Notification {
            id: id.to_string(),
            title: title.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }
}

/// Returns the same configured times for every day, or fails when unset.
#[derive(Debug, Clone, Default)]
pub struct FixedTimeSource {
    times: Rc<RefCell<Option<BTreeMap<String, String>>>>,
    calls: Rc<Cell<usize>>,
}

impl FixedTimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_times(&self, times: &[(&str, &str)]) {
        *self.times.borrow_mut() = Some(
            times
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }

    pub fn clear(&self) {
        *self.times.borrow_mut() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl PrayerTimeSource for FixedTimeSource {
    fn compute_daily_times(
        &self,
        _location: &Location,
        _method: CalculationMethod,
        _date: NaiveDate,
    ) -> Result<BTreeMap<String, String>, HostError> {
        self.calls.set(self.calls.get() + 1);
        self.times
            .borrow()
            .clone()
            .ok_or_else(|| HostError::new("prayer times", "service unreachable"))
    }
}

// =============================================================================
// Simulation
// =============================================================================

/// Handles onto every in-memory host facility.
#[derive(Debug, Clone)]
pub struct MemoryHost {
    pub store: MemoryStore,
    pub rule_table: MemoryRuleTable,
    pub alarms: MemoryAlarms,
    pub tabs: MemoryTabs,
    pub notifier: RecordingNotifier,
    pub time_source: FixedTimeSource,
    pub clock: ManualClock,
}

impl MemoryHost {
    pub fn new(start: DateTime<FixedOffset>) -> Self {
        let clock = ManualClock::new(start);
        Self {
            store: MemoryStore::new(),
            rule_table: MemoryRuleTable::new(),
            alarms: MemoryAlarms::new(clock.clone()),
            tabs: MemoryTabs::new(),
            notifier: RecordingNotifier::new(),
            time_source: FixedTimeSource::new(),
            clock,
        }
    }

    /// Boxed clones for [`Engine::new`].
    pub fn host(&self) -> Host {
        Host {
            store: Box::new(self.store.clone()),
            rule_table: Box::new(self.rule_table.clone()),
            alarms: Box::new(self.alarms.clone()),
            tabs: Box::new(self.tabs.clone()),
            notifier: Box::new(self.notifier.clone()),
            time_source: Box::new(self.time_source.clone()),
            clock: Box::new(self.clock.clone()),
        }
    }
}

/// An engine on an in-memory host with a manual clock.
pub struct Simulation {
    pub host: MemoryHost,
    pub engine: Engine,
}

impl Simulation {
    pub fn new(config: EngineConfig, start: DateTime<FixedOffset>) -> Self {
        let host = MemoryHost::new(start);
        let engine = Engine::new(config, host.host());
        Self { host, engine }
    }

    /// Fire every alarm due now. Returns the names fired.
    pub fn fire_due(&mut self) -> Vec<String> {
        let due = self.host.alarms.take_due();
        for name in &due {
            self.engine.on_alarm(name);
        }
        due
    }

    /// Move the clock forward, stopping at each alarm on the way.
    pub fn advance(&mut self, by: Duration) -> Vec<String> {
        let target = self.host.clock.now() + by;
        let target_ms = target.timestamp_millis();
        let mut fired = self.fire_due();

        while let Some(next) = self.host.alarms.earliest().filter(|&t| t <= target_ms) {
            let now = self.host.clock.now();
            let step = next - now.timestamp_millis();
            self.host.clock.set(now + Duration::milliseconds(step.max(0)));
            fired.extend(self.fire_due());
        }

        self.host.clock.set(target);
        fired
    }
}
