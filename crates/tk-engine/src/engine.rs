//! Engine
//!
//! Composition root. Owns the host handles, the rule store, the scheduler,
//! the process context and the three policies, and exposes one entry point
//! per host event: install, startup, alarm, navigation, tab close, message.

use log::{debug, info, warn};

use tk_compiler::{normalize_entry, RuleCompiler};
use tk_core::hash::rule_id;
use tk_core::types::{priority, RuleId, RULE_ID_FOCUS, RULE_ID_PRAYER};

use crate::command::{Command, Reply, Response, StatusReport};
use crate::config::EngineConfig;
use crate::context::ProcessContext;
use crate::error::EngineError;
use crate::focus::{FocusSessionPolicy, FocusStatus, FOCUS_ALARM};
use crate::grant::{
    AccessGrantPolicy, GrantOutcome, GRANT_ALARM_KIND, LEGACY_GRANT_ALARM_KIND,
};
use crate::host::{
    AlarmHost, Clock, KeyValueStore, Notifier, PrayerTimeSource, RuleTable, TabHost, TabId,
};
use crate::prayer::{PrayerWindowPolicy, PRAYER_REFRESH_ALARM, PRAYER_TICK_ALARM};
use crate::rule_store::RuleStore;
use crate::scheduler::{AlarmRoute, ExpiryScheduler, Fired};
use crate::settings::Settings;

/// The host facilities the engine runs on.
pub struct Host {
    pub store: Box<dyn KeyValueStore>,
    pub rule_table: Box<dyn RuleTable>,
    pub alarms: Box<dyn AlarmHost>,
    pub tabs: Box<dyn TabHost>,
    pub notifier: Box<dyn Notifier>,
    pub time_source: Box<dyn PrayerTimeSource>,
    pub clock: Box<dyn Clock>,
}

pub struct Engine {
    config: EngineConfig,
    settings: Settings,
    rules: RuleStore,
    scheduler: ExpiryScheduler,
    tabs: Box<dyn TabHost>,
    notifier: Box<dyn Notifier>,
    time_source: Box<dyn PrayerTimeSource>,
    clock: Box<dyn Clock>,
    context: ProcessContext,
    focus: FocusSessionPolicy,
    prayer: PrayerWindowPolicy,
    grants: AccessGrantPolicy,
}

impl Engine {
    pub fn new(config: EngineConfig, host: Host) -> Self {
        let compiler = RuleCompiler::new(&config.interstitial_path);
        let exclusions = config.strict_exclusions();

        let focus = FocusSessionPolicy::new(
            compiler.compile_strict_rule(RULE_ID_FOCUS, priority::STRICT_BLOCK, &exclusions),
            config.max_duration_minutes,
        );
        let prayer = PrayerWindowPolicy::new(
            compiler.compile_strict_rule(RULE_ID_PRAYER, priority::STRICT_BLOCK, &exclusions),
            config.notify_lookahead_low,
            config.notify_lookahead_high,
        );
        let grants = AccessGrantPolicy::new(compiler.clone(), config.max_duration_minutes);

        let mut scheduler = ExpiryScheduler::new(host.alarms);
        scheduler.on_fire(FOCUS_ALARM, AlarmRoute::FocusEnd);
        scheduler.on_fire(PRAYER_TICK_ALARM, AlarmRoute::PrayerTick);
        scheduler.on_fire(PRAYER_REFRESH_ALARM, AlarmRoute::PrayerRefresh);
        scheduler.on_fire(GRANT_ALARM_KIND, AlarmRoute::GrantExpiry);
        scheduler.on_fire(LEGACY_GRANT_ALARM_KIND, AlarmRoute::GrantExpiry);

        Self {
            context: ProcessContext::new(config.interstitial_marker()),
            settings: Settings::new(host.store),
            rules: RuleStore::new(host.rule_table, compiler),
            scheduler,
            tabs: host.tabs,
            notifier: host.notifier,
            time_source: host.time_source,
            clock: host.clock,
            focus,
            prayer,
            grants,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rules(&self) -> &RuleStore {
        &self.rules
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The persisted block list, or the configured defaults before install.
    pub fn block_list(&self) -> Vec<String> {
        self.settings
            .blocked_sites()
            .unwrap_or_else(|| self.config.default_sites.clone())
    }

    // =========================================================================
    // Host events
    // =========================================================================

    /// First install or upgrade: persist the block list if there is none,
    /// rebuild the rule table from it, then start up.
    pub fn on_installed(&mut self) {
        let sites = match self.settings.blocked_sites() {
            Some(sites) => sites,
            None => {
                let defaults: Vec<String> = self
                    .config
                    .default_sites
                    .iter()
                    .filter_map(|s| normalize_entry(s).ok())
                    .collect();
                if let Err(e) = self.settings.set_blocked_sites(&defaults) {
                    warn!("Could not persist default block list: {}", e);
                }
                defaults
            }
        };

        info!("Installed with {} blocked sites", sites.len());
        self.rules.reconcile_defaults(&sites);
        self.on_startup();
    }

    /// Process (re)start: rebuild in-memory state from storage and the rule
    /// table, re-arm periodic alarms, and converge once.
    pub fn on_startup(&mut self) {
        self.rules.load();
        self.prayer.rehydrate(&mut self.context, &self.settings);

        for (name, period) in [
            (PRAYER_TICK_ALARM, self.config.tick_period_minutes),
            (PRAYER_REFRESH_ALARM, self.config.refresh_period_minutes),
        ] {
            if let Err(e) = self.scheduler.ensure_every(name, period) {
                warn!("{}", e);
            }
        }

        let now = self.clock.now_ms();
        self.focus
            .rehydrate(now, &mut self.settings, &mut self.rules, &mut self.scheduler);
        self.tick();
    }

    pub fn on_alarm(&mut self, name: &str) {
        let Some(Fired { route, payload }) = self.scheduler.dispatch(name) else {
            debug!("Ignoring alarm '{}'", name);
            return;
        };
        debug!("Alarm '{}' fired", name);

        match route {
            AlarmRoute::FocusEnd => {
                // A stale alarm from an earlier session must not end a restarted one.
                let now = self.clock.now_ms();
                self.focus
                    .rehydrate(now, &mut self.settings, &mut self.rules, &mut self.scheduler);
            }
            AlarmRoute::PrayerTick => self.tick(),
            AlarmRoute::PrayerRefresh => {
                if let Err(e) = self.refresh_prayer_times() {
                    warn!("{}", e);
                }
                self.tick();
            }
            AlarmRoute::GrantExpiry => match payload {
                Some(domain) => {
                    let block_list = self.block_list();
                    self.grants
                        .on_expire(&domain, &block_list, &mut self.rules, self.tabs.as_mut());
                }
                None => warn!("Grant alarm '{}' names no domain", name),
            },
        }
    }

    /// Top-level navigation started. Sub-frames are ignored.
    pub fn on_before_navigate(&mut self, tab: TabId, frame_id: i32, url: &str) {
        if frame_id != 0 {
            return;
        }
        self.context.intents.record(tab, url);
    }

    pub fn on_session_closed(&mut self, tab: TabId) {
        self.context.intents.forget(tab);
    }

    /// The host rejected a rule update after accepting the call; the ids are
    /// rewritten on the next tick.
    pub fn on_rule_write_rejected(&mut self, ids: &[RuleId]) {
        warn!("Host rejected rule update for {:?}", ids);
        self.rules.mark_pending(ids);
    }

    /// Periodic convergence: prayer times, prayer window, notifications,
    /// focus expiry, block list, and replay of refused rule writes.
    pub fn tick(&mut self) {
        let now = self.clock.now();
        let local = now.naive_local();

        self.prayer.ensure_fresh(
            &mut self.context,
            &mut self.settings,
            self.time_source.as_ref(),
            local.date(),
        );
        self.prayer
            .tick(&mut self.context, &self.settings, &mut self.rules, local);
        self.prayer.check_notify(
            &mut self.context,
            &mut self.settings,
            self.notifier.as_mut(),
            local,
        );
        self.focus.reconcile(
            now.timestamp_millis(),
            &mut self.settings,
            &mut self.rules,
            &mut self.scheduler,
        );

        let block_list = self.block_list();
        self.rules.sync_block_list(&block_list);
        self.rules.resync();
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Decode, dispatch and encode one message. Never fails.
    pub fn handle_message(&mut self, json: &str) -> Response {
        match Command::parse(json).and_then(|cmd| self.dispatch(cmd)) {
            Ok(reply) => Response::success(reply),
            Err(e) => {
                warn!("Command failed: {}", e);
                Response::failure(&e)
            }
        }
    }

    pub fn dispatch(&mut self, command: Command) -> Result<Reply, EngineError> {
        debug!("Dispatching {}", command.kind().action());
        let now = self.clock.now_ms();

        match command {
            Command::StartFocus { duration } => self
                .focus
                .start(
                    duration,
                    now,
                    &mut self.settings,
                    &mut self.rules,
                    &mut self.scheduler,
                )
                .map(Reply::Focus),
            Command::StopFocus => {
                self.focus
                    .stop(&mut self.settings, &mut self.rules, &mut self.scheduler);
                Ok(Reply::Focus(FocusStatus::inactive()))
            }
            Command::GrantAccess { url, duration } => self.grant(&url, duration),
            Command::CheckStatus => Ok(Reply::Status(self.status())),
            Command::GetIntent { session_id } => Ok(Reply::Intent {
                url: self.context.intents.get(session_id).map(str::to_string),
            }),
            Command::RefreshPrayerTimes => {
                self.refresh_prayer_times()?;
                self.tick();
                Ok(self.prayer_times_reply())
            }
            Command::CloseSession { session_id } => {
                self.context.intents.forget(session_id);
                if let Err(e) = self.tabs.close(session_id) {
                    warn!("{}", e);
                }
                Ok(Reply::Ack)
            }
            Command::AddSite { site } => self.add_site(&site).map(|sites| Reply::Sites { sites }),
            Command::RemoveSite { site } => {
                self.remove_site(&site).map(|sites| Reply::Sites { sites })
            }
            Command::ListSites => Ok(Reply::Sites {
                sites: self.block_list(),
            }),
            Command::SetPrayerBlocking { enabled } => {
                self.settings.set_prayer_blocking(enabled)?;
                info!("Prayer blocking {}", if enabled { "enabled" } else { "disabled" });
                self.tick();
                Ok(Reply::Ack)
            }
            Command::SetPrayerDuration { minutes } => {
                let stored = self.settings.set_prayer_window_minutes(minutes)?;
                info!("Prayer window set to {} minutes", stored);
                self.tick();
                Ok(Reply::Ack)
            }
            Command::SetLocation { location } => {
                self.settings.set_location(&location)?;
                self.refresh_prayer_times()?;
                self.tick();
                Ok(self.prayer_times_reply())
            }
            Command::NextPrayer => {
                let local = self.clock.now().naive_local();
                Ok(Reply::NextPrayer {
                    next: self.prayer.next_prayer(&self.context, &self.settings, local),
                })
            }
            Command::BypassTarget { url } => {
                if self.grants.is_listed(&url, &self.block_list())? {
                    return Ok(Reply::Bypass {
                        questionnaire: true,
                        grant: None,
                    });
                }
                let minutes = self.config.bypass_grant_minutes as i64;
                let grant = match self.grant(&url, minutes)? {
                    Reply::Grant { grant, .. } => Some(grant),
                    _ => None,
                };
                Ok(Reply::Bypass {
                    questionnaire: false,
                    grant,
                })
            }
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    fn grant(&mut self, url: &str, minutes: i64) -> Result<Reply, EngineError> {
        let now = self.clock.now_ms();
        match self
            .grants
            .grant(url, minutes, now, &mut self.rules, &mut self.scheduler)?
        {
            GrantOutcome::Granted(grant) => Ok(Reply::Grant {
                grant,
                redirect_delay_ms: self.config.redirect_delay_ms,
            }),
            GrantOutcome::Ignored => Ok(Reply::Ack),
        }
    }

    /// Focus and prayer status. Stops a focus session found past its end.
    pub fn status(&mut self) -> StatusReport {
        let now = self.clock.now_ms();
        let focus = self
            .focus
            .status(now, &mut self.settings, &mut self.rules, &mut self.scheduler);
        let window = self.context.prayer_window;
        let prayer_blocking = self.settings.prayer_blocking();

        StatusReport {
            focus_active: focus.active,
            seconds_remaining: focus.seconds_remaining,
            prayer_blocking,
            prayer_window_active: prayer_blocking && window.is_some(),
            prayer_name: window,
        }
    }

    /// Recompute today's prayer times.
    pub fn refresh_prayer_times(&mut self) -> Result<(), EngineError> {
        let today = self.clock.now().date_naive();
        self.prayer.refresh(
            &mut self.context,
            &mut self.settings,
            self.time_source.as_ref(),
            today,
        )
    }

    fn prayer_times_reply(&self) -> Reply {
        match &self.context.prayer_table {
            Some(table) => Reply::PrayerTimes {
                date: table.date().format("%Y-%m-%d").to_string(),
                times: table.to_raw(),
            },
            None => Reply::Ack,
        }
    }

    /// Add a site to the block list and block it. Returns the new list.
    pub fn add_site(&mut self, site: &str) -> Result<Vec<String>, EngineError> {
        let domain = normalize_entry(site)?;
        let mut sites = self.block_list();
        if sites.contains(&domain) {
            return Ok(sites);
        }

        sites.push(domain.clone());
        self.settings.set_blocked_sites(&sites)?;
        self.rules.sync_block_list(std::slice::from_ref(&domain));
        info!("Blocked {}", domain);
        Ok(sites)
    }

    /// Remove a site from the block list and drop its rule. Returns the new
    /// list.
    pub fn remove_site(&mut self, site: &str) -> Result<Vec<String>, EngineError> {
        let domain = normalize_entry(site)?;
        let mut sites = self.block_list();
        let before = sites.len();
        sites.retain(|s| *s != domain);
        if sites.len() == before {
            return Ok(sites);
        }

        self.settings.set_blocked_sites(&sites)?;
        let id = rule_id(&domain);
        if self.rules.get(id).map_or(false, |r| !r.action.is_allow()) {
            self.rules.remove(id);
        }
        // Another listed domain may share the id.
        self.rules.sync_block_list(&sites);
        info!("Unblocked {}", domain);
        Ok(sites)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, FixedOffset, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::memory::Simulation;
    use crate::settings::keys;

    fn sim() -> Simulation {
        let start = FixedOffset::east_opt(3 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 14, 9, 0, 0)
            .unwrap();
        let mut sim = Simulation::new(EngineConfig::default(), start);
        sim.engine.on_installed();
        sim
    }

    #[test]
    fn install_blocks_default_sites() {
        let sim = sim();
        assert_eq!(sim.host.rule_table.rules().len(), 5);
        assert!(sim.host.rule_table.is_blocked("https://www.youtube.com/"));
        assert_eq!(
            sim.host.store.value(keys::BLOCKED_SITES),
            Some(json!(["youtube.com", "facebook.com", "instagram.com", "twitter.com", "x.com"]))
        );
        assert_eq!(
            sim.host.alarms.scheduled(),
            vec![PRAYER_REFRESH_ALARM.to_string(), PRAYER_TICK_ALARM.to_string()]
        );
    }

    #[test]
    fn reinstall_keeps_user_list() {
        let mut sim = sim();
        sim.engine.remove_site("youtube.com").unwrap();
        sim.engine.on_installed();
        assert!(!sim.host.rule_table.is_blocked("https://youtube.com/"));
        assert_eq!(sim.host.rule_table.rules().len(), 4);
    }

    #[test]
    fn records_only_top_level_intents() {
        let mut sim = sim();
        sim.engine.on_before_navigate(4, 0, "https://youtube.com/watch?v=x");
        sim.engine.on_before_navigate(4, 2, "https://ads.example/frame");

        let response = sim
            .engine
            .handle_message(r#"{"action":"getIntent","sessionId":4}"#);
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "ok": true, "data": { "url": "https://youtube.com/watch?v=x" } })
        );

        sim.engine.on_session_closed(4);
        assert_eq!(sim.engine.context().intents.get(4), None);
    }

    #[test]
    fn unknown_alarm_is_ignored() {
        let mut sim = sim();
        let before = sim.host.rule_table.rules();
        sim.engine.on_alarm("somethingElse");
        sim.engine.on_alarm("grant");
        assert_eq!(sim.host.rule_table.rules(), before);
    }

    #[test]
    fn bypass_grants_day_for_unlisted_target() {
        let mut sim = sim();
        let reply = sim
            .engine
            .dispatch(Command::BypassTarget {
                url: "https://docs.rs/".to_string(),
            })
            .unwrap();
        let grant = match reply {
            Reply::Bypass {
                questionnaire: false,
                grant: Some(grant),
            } => grant,
            other => panic!("unexpected reply {other:?}"),
        };
        assert_eq!(grant.domain, "docs.rs");
        assert_eq!(
            grant.expires_at,
            sim.host.clock.now_ms() + Duration::minutes(1440).num_milliseconds()
        );

        let reply = sim
            .engine
            .dispatch(Command::BypassTarget {
                url: "https://m.youtube.com/".to_string(),
            })
            .unwrap();
        assert_eq!(
            reply,
            Reply::Bypass {
                questionnaire: true,
                grant: None
            }
        );
    }

    #[test]
    fn close_tab_command() {
        let mut sim = sim();
        sim.host.tabs.open(9, "chrome-extension://abc/intention.html");
        let response = sim.engine.handle_message(r#"{"action":"closeTab","sessionId":9}"#);
        assert!(response.ok);
        assert_eq!(sim.host.tabs.closed(), vec![9]);
    }
}
