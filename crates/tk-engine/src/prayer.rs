//! Prayer-time windows
//!
//! A day's five prayer times come from the host's time source, are cached in
//! the process context and in storage, and drive two things on every tick:
//! the strict prayer rule while a window is open, and a one-off notification
//! a few minutes before each prayer.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use tk_core::types::Rule;

use crate::context::ProcessContext;
use crate::error::EngineError;
use crate::host::{Notifier, PrayerTimeSource};
use crate::rule_store::RuleStore;
use crate::settings::Settings;

/// Periodic alarm driving window activation and notifications.
pub const PRAYER_TICK_ALARM: &str = "prayerTick";
/// Periodic alarm forcing a prayer-time recomputation.
pub const PRAYER_REFRESH_ALARM: &str = "fetchPrayerTimes";

pub const DEFAULT_WINDOW_MINUTES: u32 = 20;
pub const MIN_WINDOW_MINUTES: u32 = 1;
pub const MAX_WINDOW_MINUTES: u32 = 60;

/// Clamp a requested window length into the supported range.
pub fn clamp_window(minutes: i64) -> u32 {
    minutes.clamp(MIN_WINDOW_MINUTES as i64, MAX_WINDOW_MINUTES as i64) as u32
}

// =============================================================================
// Prayer
// =============================================================================

/// The five daily prayers, in day order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS,
)]
#[ts(export)]
pub enum Prayer {
    Fajr,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl Prayer {
    pub const ALL: [Prayer; 5] = [
        Prayer::Fajr,
        Prayer::Dhuhr,
        Prayer::Asr,
        Prayer::Maghrib,
        Prayer::Isha,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Prayer::Fajr => "Fajr",
            Prayer::Dhuhr => "Dhuhr",
            Prayer::Asr => "Asr",
            Prayer::Maghrib => "Maghrib",
            Prayer::Isha => "Isha",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Prayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Location and method
// =============================================================================

/// Where prayer times are computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "kind", rename_all = "camelCase")]
#[ts(export)]
pub enum Location {
    Coordinates { latitude: f64, longitude: f64 },
    City { city: String, country: String },
}

/// Calculation method identifier understood by the time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalculationMethod(pub u8);

impl CalculationMethod {
    pub const KARACHI: Self = Self(1);
    pub const ISNA: Self = Self(2);
    pub const MWL: Self = Self(3);
    pub const UMM_AL_QURA: Self = Self(4);
    pub const EGYPT: Self = Self(5);
}

impl Default for CalculationMethod {
    fn default() -> Self {
        Self::ISNA
    }
}

// =============================================================================
// Time table
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("missing time for {0}")]
    Missing(Prayer),
    #[error("unreadable time for {prayer}: '{value}'")]
    BadTime { prayer: Prayer, value: String },
}

/// Parse the leading `HH:MM` of a time-source value such as `"05:12 (EET)"`.
pub fn parse_time(value: &str) -> Option<NaiveTime> {
    let token = value.split_whitespace().next()?;
    NaiveTime::parse_from_str(token, "%H:%M").ok()
}

/// The five prayer times of one day. Always complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrayerTimeTable {
    date: NaiveDate,
    times: [NaiveTime; 5],
}

impl PrayerTimeTable {
    pub fn new(date: NaiveDate, times: [NaiveTime; 5]) -> Self {
        Self { date, times }
    }

    /// Build from the time source's `{name -> "HH:MM"}` map. Extra entries
    /// (sunrise, midnight, ...) are ignored.
    pub fn from_raw(date: NaiveDate, raw: &BTreeMap<String, String>) -> Result<Self, TableError> {
        let mut times = [NaiveTime::MIN; 5];
        for prayer in Prayer::ALL {
            let value = raw.get(prayer.name()).ok_or(TableError::Missing(prayer))?;
            times[prayer.index()] = parse_time(value).ok_or_else(|| TableError::BadTime {
                prayer,
                value: value.clone(),
            })?;
        }
        Ok(Self { date, times })
    }

    pub fn to_raw(&self) -> BTreeMap<String, String> {
        self.entries()
            .map(|(p, t)| (p.name().to_string(), t.format("%H:%M").to_string()))
            .collect()
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn is_for(&self, date: NaiveDate) -> bool {
        self.date == date
    }

    pub fn time_of(&self, prayer: Prayer) -> NaiveTime {
        self.times[prayer.index()]
    }

    pub fn entries(&self) -> impl Iterator<Item = (Prayer, NaiveTime)> + '_ {
        Prayer::ALL.into_iter().map(|p| (p, self.time_of(p)))
    }

    /// The first prayer, in day order, whose window `[start, start + window]`
    /// contains `now`.
    pub fn active_window(&self, now: NaiveTime, window_minutes: u32) -> Option<Prayer> {
        let window = Duration::minutes(window_minutes as i64);
        Prayer::ALL.into_iter().find(|&p| {
            let elapsed = now.signed_duration_since(self.time_of(p));
            elapsed >= Duration::zero() && elapsed <= window
        })
    }

    /// The prayer starting within `(low, high]` minutes of `now`.
    pub fn starting_within(&self, now: NaiveTime, low: u32, high: u32) -> Option<Prayer> {
        let low = Duration::minutes(low as i64);
        let high = Duration::minutes(high as i64);
        Prayer::ALL.into_iter().find(|&p| {
            let until = self.time_of(p).signed_duration_since(now);
            until > low && until <= high
        })
    }

    /// Current or upcoming prayer with progress, for the popup.
    ///
    /// Inside a window this reports the current prayer (yesterday's Isha
    /// counts shortly after midnight); otherwise the next prayer, tomorrow's
    /// Fajr after Isha, with progress measured from the previous one.
    pub fn next_prayer(&self, now: NaiveDateTime, window_minutes: u32) -> NextPrayer {
        let today = now.date();
        let window = Duration::minutes(window_minutes as i64);
        let at = |day: NaiveDate, p: Prayer| day.and_time(self.time_of(p));

        let mut starts: Vec<(Prayer, NaiveDateTime)> = Vec::with_capacity(7);
        if let Some(yesterday) = today.pred_opt() {
            starts.push((Prayer::Isha, at(yesterday, Prayer::Isha)));
        }
        starts.extend(Prayer::ALL.into_iter().map(|p| (p, at(today, p))));
        if let Some(tomorrow) = today.succ_opt() {
            starts.push((Prayer::Fajr, at(tomorrow, Prayer::Fajr)));
        }

        let current = starts.iter().find(|(_, start)| {
            let elapsed = now - *start;
            elapsed >= Duration::zero() && elapsed <= window
        });
        if let Some(&(prayer, start)) = current {
            let elapsed = now - start;
            return NextPrayer {
                prayer,
                current: true,
                seconds_remaining: (window - elapsed).num_seconds(),
                progress_percent: percent(elapsed, window),
            };
        }

        let next = starts.iter().position(|(_, start)| *start > now);
        match next {
            Some(i) => {
                let (prayer, start) = starts[i];
                let span = match i.checked_sub(1) {
                    Some(prev) => start - starts[prev].1,
                    None => Duration::days(1),
                };
                let remaining = start - now;
                NextPrayer {
                    prayer,
                    current: false,
                    seconds_remaining: remaining.num_seconds(),
                    progress_percent: percent(span - remaining, span),
                }
            }
            // Past tomorrow's Fajr; only reachable with a table two days stale.
            None => NextPrayer {
                prayer: Prayer::Fajr,
                current: false,
                seconds_remaining: 0,
                progress_percent: 100.0,
            },
        }
    }
}

fn percent(part: Duration, whole: Duration) -> f64 {
    if whole <= Duration::zero() {
        return 100.0;
    }
    let ratio = part.num_seconds() as f64 / whole.num_seconds() as f64;
    (ratio * 100.0).clamp(0.0, 100.0)
}

/// Popup view of the current or next prayer.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct NextPrayer {
    pub prayer: Prayer,
    /// Inside the prayer's window rather than waiting for it
    pub current: bool,
    #[ts(type = "number")]
    pub seconds_remaining: i64,
    pub progress_percent: f64,
}

// =============================================================================
// Policy
// =============================================================================

/// Installs the strict prayer rule while a window is open and announces
/// upcoming prayers.
#[derive(Debug, Clone)]
pub struct PrayerWindowPolicy {
    strict_rule: Rule,
    notify_low: u32,
    notify_high: u32,
}

impl PrayerWindowPolicy {
    pub fn new(strict_rule: Rule, notify_low: u32, notify_high: u32) -> Self {
        Self {
            strict_rule,
            notify_low,
            notify_high,
        }
    }

    pub fn strict_rule(&self) -> &Rule {
        &self.strict_rule
    }

    /// Restore the cached table and notification marker after a restart.
    pub fn rehydrate(&self, ctx: &mut ProcessContext, settings: &Settings) {
        if ctx.prayer_table.is_none() {
            ctx.prayer_table = settings.cached_prayer_table();
        }
        if ctx.last_notification.is_none() {
            ctx.last_notification = settings.last_notification();
        }
    }

    /// Recompute today's table from the time source.
    ///
    /// On failure the previous table, if any, stays in place.
    pub fn refresh(
        &self,
        ctx: &mut ProcessContext,
        settings: &mut Settings,
        source: &dyn PrayerTimeSource,
        today: NaiveDate,
    ) -> Result<(), EngineError> {
        let location = settings.location().ok_or(EngineError::NoLocation)?;
        let method = settings.calculation_method();

        let raw = source
            .compute_daily_times(&location, method, today)
            .map_err(|e| EngineError::TimeSource(e.to_string()))?;
        let table = PrayerTimeTable::from_raw(today, &raw)
            .map_err(|e| EngineError::TimeSource(e.to_string()))?;

        info!(
            "Prayer times for {}: {}",
            today,
            table
                .entries()
                .map(|(p, t)| format!("{} {}", p, t.format("%H:%M")))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if let Err(e) = settings.set_cached_prayer_table(&table) {
            warn!("Could not cache prayer times: {}", e);
        }
        ctx.prayer_table = Some(table);
        Ok(())
    }

    /// Make sure the context holds today's table, recomputing a stale one.
    pub fn ensure_fresh(
        &self,
        ctx: &mut ProcessContext,
        settings: &mut Settings,
        source: &dyn PrayerTimeSource,
        today: NaiveDate,
    ) {
        if ctx.prayer_table.as_ref().map_or(false, |t| t.is_for(today)) {
            return;
        }

        if let Some(cached) = settings.cached_prayer_table().filter(|t| t.is_for(today)) {
            ctx.prayer_table = Some(cached);
            return;
        }

        match self.refresh(ctx, settings, source, today) {
            Ok(()) => {}
            Err(EngineError::NoLocation) => debug!("No location set, prayer times unavailable"),
            Err(e) => match &ctx.prayer_table {
                Some(stale) => warn!("{}; keeping times from {}", e, stale.date()),
                None => warn!("{}; prayer blocking inactive until times are known", e),
            },
        }
    }

    /// Evaluate the window at `now` and converge the strict prayer rule.
    pub fn tick(
        &self,
        ctx: &mut ProcessContext,
        settings: &Settings,
        rules: &mut RuleStore,
        now: NaiveDateTime,
    ) -> Option<Prayer> {
        let window = settings.prayer_window_minutes();
        let active = ctx
            .prayer_table
            .as_ref()
            .and_then(|t| t.active_window(now.time(), window));

        if active != ctx.prayer_window {
            match (ctx.prayer_window, active) {
                (_, Some(p)) => info!("{} window open for {} minutes", p, window),
                (Some(p), None) => info!("{} window closed", p),
                (None, None) => {}
            }
            ctx.prayer_window = active;
        }

        if active.is_some() && settings.prayer_blocking() {
            rules.upsert(self.strict_rule.clone());
        } else if rules.has(self.strict_rule.id) {
            rules.remove(self.strict_rule.id);
        }

        active
    }

    /// Notify once per prayer per day when it is a few minutes away.
    pub fn check_notify(
        &self,
        ctx: &mut ProcessContext,
        settings: &mut Settings,
        notifier: &mut dyn Notifier,
        now: NaiveDateTime,
    ) -> Option<Prayer> {
        let table = ctx.prayer_table.as_ref()?;
        let prayer = table.starting_within(now.time(), self.notify_low, self.notify_high)?;

        let key = format!("{}|{}", prayer, now.date().format("%Y-%m-%d"));
        if ctx.last_notification.as_deref() == Some(key.as_str()) {
            return None;
        }

        let minutes = (table.time_of(prayer) - now.time()).num_minutes().max(1);
        let message = if settings.prayer_blocking() {
            format!(
                "{} begins in {} minutes. Sites will be blocked for {} minutes.",
                prayer,
                minutes,
                settings.prayer_window_minutes()
            )
        } else {
            format!("{} begins in {} minutes.", prayer, minutes)
        };

        let id = format!("prayer-{}", prayer.name().to_ascii_lowercase());
        if let Err(e) = notifier.notify(&id, "Prayer time approaching", &message) {
            warn!("Prayer notification failed: {}", e);
            return None;
        }

        if let Err(e) = settings.set_last_notification(&key) {
            warn!("Could not persist notification marker: {}", e);
        }
        ctx.last_notification = Some(key);
        Some(prayer)
    }

    /// Current or next prayer, if any table is known.
    pub fn next_prayer(
        &self,
        ctx: &ProcessContext,
        settings: &Settings,
        now: NaiveDateTime,
    ) -> Option<NextPrayer> {
        let table = ctx.prayer_table.as_ref()?;
        Some(table.next_prayer(now, settings.prayer_window_minutes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn table() -> PrayerTimeTable {
        PrayerTimeTable::new(
            day(),
            [hm(5, 0), hm(12, 0), hm(15, 30), hm(18, 10), hm(19, 40)],
        )
    }

    #[test]
    fn parses_time_with_suffix() {
        assert_eq!(parse_time("05:12 (EET)"), Some(hm(5, 12)));
        assert_eq!(parse_time("23:59"), Some(hm(23, 59)));
        assert_eq!(parse_time("noon"), None);
        assert_eq!(parse_time(""), None);
    }

    #[test]
    fn raw_table_requires_all_five() {
        let mut raw: BTreeMap<String, String> = table().to_raw();
        raw.insert("Sunrise".to_string(), "06:20".to_string());
        assert_eq!(PrayerTimeTable::from_raw(day(), &raw), Ok(table()));

        raw.remove("Asr");
        assert_eq!(
            PrayerTimeTable::from_raw(day(), &raw),
            Err(TableError::Missing(Prayer::Asr))
        );

        raw.insert("Asr".to_string(), "late".to_string());
        assert!(matches!(
            PrayerTimeTable::from_raw(day(), &raw),
            Err(TableError::BadTime { prayer: Prayer::Asr, .. })
        ));
    }

    #[test]
    fn window_is_inclusive_on_both_ends() {
        let t = table();
        assert_eq!(t.active_window(hm(12, 10), 20), Some(Prayer::Dhuhr));
        assert_eq!(t.active_window(hm(12, 0), 20), Some(Prayer::Dhuhr));
        assert_eq!(t.active_window(hm(12, 20), 20), Some(Prayer::Dhuhr));
        assert_eq!(t.active_window(hm(12, 25), 20), None);
        assert_eq!(t.active_window(hm(11, 59), 20), None);
    }

    #[test]
    fn overlapping_windows_prefer_day_order() {
        let tight = PrayerTimeTable::new(
            day(),
            [hm(5, 0), hm(12, 0), hm(12, 30), hm(18, 10), hm(19, 40)],
        );
        assert_eq!(tight.active_window(hm(12, 40), 60), Some(Prayer::Dhuhr));
        assert_eq!(tight.active_window(hm(13, 10), 60), Some(Prayer::Asr));
    }

    #[test]
    fn lookahead_is_open_low_closed_high() {
        let t = table();
        assert_eq!(t.starting_within(hm(11, 54), 4, 6), Some(Prayer::Dhuhr));
        assert_eq!(t.starting_within(hm(11, 55), 4, 6), Some(Prayer::Dhuhr));
        assert_eq!(t.starting_within(hm(11, 56), 4, 6), None);
        assert_eq!(t.starting_within(hm(11, 53), 4, 6), None);
    }

    #[test]
    fn next_prayer_inside_window() {
        let now = day().and_time(hm(12, 5));
        let next = table().next_prayer(now, 20);
        assert_eq!(next.prayer, Prayer::Dhuhr);
        assert!(next.current);
        assert_eq!(next.seconds_remaining, 15 * 60);
        assert_eq!(next.progress_percent, 25.0);
    }

    #[test]
    fn next_prayer_between_prayers() {
        let now = day().and_time(hm(13, 45));
        let next = table().next_prayer(now, 20);
        assert_eq!(next.prayer, Prayer::Asr);
        assert!(!next.current);
        assert_eq!(next.seconds_remaining, 105 * 60);
        assert_eq!(next.progress_percent, 50.0);
    }

    #[test]
    fn next_prayer_wraps_around_midnight() {
        let after_isha = day().and_time(hm(23, 0));
        let next = table().next_prayer(after_isha, 20);
        assert_eq!(next.prayer, Prayer::Fajr);
        assert_eq!(next.seconds_remaining, 6 * 3600);

        let before_fajr = day().and_time(hm(2, 0));
        let next = table().next_prayer(before_fajr, 20);
        assert_eq!(next.prayer, Prayer::Fajr);
        assert!(!next.current);
        assert_eq!(next.seconds_remaining, 3 * 3600);

        let late_isha = PrayerTimeTable::new(
            day(),
            [hm(5, 0), hm(12, 0), hm(15, 30), hm(18, 10), hm(23, 50)],
        );
        let next = late_isha.next_prayer(day().and_time(hm(0, 5)), 20);
        assert_eq!(next.prayer, Prayer::Isha);
        assert!(next.current);
        assert_eq!(next.seconds_remaining, 5 * 60);
    }

    #[test]
    fn window_clamps() {
        assert_eq!(clamp_window(0), 1);
        assert_eq!(clamp_window(-5), 1);
        assert_eq!(clamp_window(20), 20);
        assert_eq!(clamp_window(600), 60);
    }

    #[test]
    fn location_json_shape() {
        let loc: Location =
            serde_json::from_str(r#"{"kind":"city","city":"Cairo","country":"Egypt"}"#).unwrap();
        assert_eq!(
            loc,
            Location::City {
                city: "Cairo".to_string(),
                country: "Egypt".to_string()
            }
        );
        assert_eq!(Prayer::from_name("Maghrib"), Some(Prayer::Maghrib));
        assert_eq!(Prayer::from_name("maghrib"), None);
    }
}
