//! Run the engine over simulated wall-clock time on the in-memory host.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, FixedOffset};

use tk_core::types::{MatchDecision, RULE_ID_FOCUS, RULE_ID_PRAYER};
use tk_engine::memory::Simulation;
use tk_engine::prayer::PRAYER_TICK_ALARM;
use tk_engine::{Clock, Command, EngineConfig, Location, Reply};

pub struct SimulateOptions {
    pub config: EngineConfig,
    pub start: DateTime<FixedOffset>,
    pub hours: i64,
    pub step_minutes: i64,
    pub times: BTreeMap<String, String>,
    pub location: Location,
    pub window_minutes: Option<i64>,
    pub focus_minutes: Option<i64>,
    pub grant: Option<(String, i64)>,
    pub probes: Vec<String>,
}

fn send(sim: &mut Simulation, command: Command) -> Result<Reply, String> {
    let kind = command.kind();
    sim.engine
        .dispatch(command)
        .map_err(|e| format!("{}: {}", kind.action(), e))
}

/// One line of state; a new line is printed whenever it changes.
fn describe(sim: &mut Simulation, probes: &[String]) -> String {
    let status = sim.engine.status();
    let mut parts = Vec::new();

    if status.focus_active {
        parts.push(format!("focus {}s", status.seconds_remaining));
    }
    if let Some(prayer) = status.prayer_name {
        parts.push(format!("prayer window {}", prayer));
    }
    for url in probes {
        let result = sim.host.rule_table.match_navigation(url);
        let verdict = match (result.decision, result.rule_id) {
            (MatchDecision::Allow, -1) => "open",
            (MatchDecision::Allow, _) => "granted",
            (MatchDecision::Redirect, RULE_ID_FOCUS) => "blocked (focus)",
            (MatchDecision::Redirect, RULE_ID_PRAYER) => "blocked (prayer)",
            (MatchDecision::Redirect, _) => "blocked",
        };
        parts.push(format!("{} {}", url, verdict));
    }

    if parts.is_empty() {
        "idle".to_string()
    } else {
        parts.join(", ")
    }
}

pub fn run(opts: SimulateOptions) -> Result<(), String> {
    if opts.step_minutes <= 0 {
        return Err("Step must be at least one minute".to_string());
    }

    let mut sim = Simulation::new(opts.config, opts.start);
    let times: Vec<(&str, &str)> = opts
        .times
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    sim.host.time_source.set_times(&times);

    sim.engine.on_installed();
    send(&mut sim, Command::SetLocation { location: opts.location })?;
    if let Some(minutes) = opts.window_minutes {
        send(&mut sim, Command::SetPrayerDuration { minutes })?;
    }
    if let Some(duration) = opts.focus_minutes {
        send(&mut sim, Command::StartFocus { duration })?;
    }
    if let Some((url, duration)) = opts.grant {
        send(&mut sim, Command::GrantAccess { url, duration })?;
    }

    let end = opts.start + Duration::hours(opts.hours);
    let step = Duration::minutes(opts.step_minutes);
    let mut last = String::new();
    let mut notified = 0usize;

    println!("Simulating {} to {}", opts.start.format("%Y-%m-%d %H:%M"), end.format("%Y-%m-%d %H:%M"));

    while sim.host.clock.now() < end {
        let fired: Vec<String> = sim
            .advance(step)
            .into_iter()
            .filter(|name| name != PRAYER_TICK_ALARM)
            .collect();
        let now = sim.host.clock.now();

        for note in sim.host.notifier.sent().iter().skip(notified) {
            println!("{}  notify: {}", now.format("%H:%M"), note.message);
            notified += 1;
        }

        let state = describe(&mut sim, &opts.probes);
        if state != last || !fired.is_empty() {
            let alarms = if fired.is_empty() {
                String::new()
            } else {
                format!("  [{}]", fired.join(", "))
            };
            println!("{}  {}{}", now.format("%H:%M"), state, alarms);
            last = state;
        }
    }

    println!();
    println!("Rules installed: {}", sim.host.rule_table.rules().len());
    println!("Tabs reloaded:   {}", sim.host.tabs.reloaded().len());
    Ok(())
}
