//! Timekeeper CLI
//!
//! Tools for inspecting what the engine installs: rule ids, compiled block
//! lists, prayer windows, upstream prayer times, and whole simulated days.

mod aladhan;
mod simulate;

use std::collections::BTreeMap;
use std::fs;
use std::time::Instant;

use chrono::{DateTime, Local, NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};

use tk_compiler::{dedupe_by_id, parse_block_list, RuleCompiler};
use tk_core::rule_id;
use tk_engine::prayer::clamp_window;
use tk_engine::{CalculationMethod, EngineConfig, Location, PrayerTimeTable};

use crate::aladhan::AladhanSource;
use crate::simulate::SimulateOptions;

const SAMPLE_TIMES: [(&str, &str); 5] = [
    ("Fajr", "05:00"),
    ("Dhuhr", "12:00"),
    ("Asr", "15:30"),
    ("Maghrib", "18:10"),
    ("Isha", "19:40"),
];

#[derive(Parser)]
#[command(name = "tk-cli")]
#[command(about = "Timekeeper rule compiler and engine tools")]
struct Cli {
    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the rule id each domain hashes to
    Hash {
        /// Domains to hash
        #[arg(required = true)]
        domains: Vec<String>,
    },

    /// Compile a block list into rule table JSON
    Compile {
        /// Block list file, one site per line
        #[arg(short, long)]
        input: String,

        /// Output rules file
        #[arg(short, long, default_value = "rules.json")]
        output: String,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show the prayer window state at a time of day
    Window {
        /// Local time, HH:MM
        #[arg(long)]
        at: String,

        /// Window length in minutes
        #[arg(long, default_value_t = 20)]
        minutes: i64,

        /// Prayer times file (JSON object of name -> "HH:MM")
        #[arg(long)]
        times: Option<String>,
    },

    /// Fetch a day's prayer times from the upstream API
    Times {
        #[command(flatten)]
        location: LocationArgs,

        /// Day to fetch, YYYY-MM-DD (default today)
        #[arg(long)]
        date: Option<String>,

        /// Calculation method id
        #[arg(long, default_value_t = 2)]
        method: u8,
    },

    /// Run the engine over a simulated stretch of time
    Simulate {
        /// Start time, RFC 3339 (default now)
        #[arg(long)]
        start: Option<String>,

        /// Hours to simulate
        #[arg(long, default_value_t = 24)]
        hours: i64,

        /// Minutes between samples
        #[arg(long, default_value_t = 1)]
        step: i64,

        /// Prayer times file (JSON object of name -> "HH:MM")
        #[arg(long, conflicts_with = "live")]
        times: Option<String>,

        /// Fetch the start day's times from the upstream API
        #[arg(long)]
        live: bool,

        #[command(flatten)]
        location: LocationArgs,

        /// Prayer window length in minutes
        #[arg(long)]
        window: Option<i64>,

        /// Start a focus session of this many minutes
        #[arg(long)]
        focus: Option<i64>,

        /// Grant access to a URL at the start, as URL=MINUTES
        #[arg(long)]
        grant: Option<String>,

        /// URLs to report blocked or open at each change
        #[arg(long = "probe")]
        probes: Vec<String>,
    },
}

#[derive(clap::Args)]
struct LocationArgs {
    #[arg(long, requires = "longitude")]
    latitude: Option<f64>,

    #[arg(long, requires = "latitude")]
    longitude: Option<f64>,

    #[arg(long, requires = "country", conflicts_with = "latitude")]
    city: Option<String>,

    #[arg(long, requires = "city")]
    country: Option<String>,
}

impl LocationArgs {
    fn location(&self) -> Option<Location> {
        match (self.latitude, self.longitude, &self.city, &self.country) {
            (Some(latitude), Some(longitude), _, _) => Some(Location::Coordinates {
                latitude,
                longitude,
            }),
            (_, _, Some(city), Some(country)) => Some(Location::City {
                city: city.clone(),
                country: country.clone(),
            }),
            _ => None,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Hash { domains } => cmd_hash(&domains),
        Commands::Compile {
            input,
            output,
            verbose,
        } => cmd_compile(&config, &input, &output, verbose),
        Commands::Window { at, minutes, times } => {
            cmd_window(&config, &at, minutes, times.as_deref())
        }
        Commands::Times {
            location,
            date,
            method,
        } => cmd_times(&config, &location, date.as_deref(), method),
        Commands::Simulate {
            start,
            hours,
            step,
            times,
            live,
            location,
            window,
            focus,
            grant,
            probes,
        } => {
            let start = match start {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .map_err(|e| format!("Invalid start '{}': {}", s, e))?,
                None => Local::now().fixed_offset(),
            };
            let location = location.location();
            let times = if live {
                let location = location
                    .as_ref()
                    .ok_or("--live needs --latitude/--longitude or --city/--country")?;
                AladhanSource::new(&config.time_service_domain)?.fetch(
                    location,
                    CalculationMethod::default(),
                    start.date_naive(),
                )?
            } else {
                read_times(times.as_deref())?
            };
            let grant = grant.map(|g| parse_grant(&g)).transpose()?;

            simulate::run(SimulateOptions {
                config,
                start,
                hours,
                step_minutes: step,
                times,
                location: location.unwrap_or(Location::Coordinates {
                    latitude: 0.0,
                    longitude: 0.0,
                }),
                window_minutes: window,
                focus_minutes: focus,
                grant,
                probes,
            })
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn load_config(path: Option<&str>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    toml::from_str(&content).map_err(|e| format!("Invalid config '{}': {}", path, e))
}

fn read_times(path: Option<&str>) -> Result<BTreeMap<String, String>, String> {
    let Some(path) = path else {
        return Ok(SAMPLE_TIMES
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect());
    };
    let content =
        fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
    serde_json::from_str(&content).map_err(|e| format!("Invalid times '{}': {}", path, e))
}

fn parse_grant(arg: &str) -> Result<(String, i64), String> {
    let (url, minutes) = arg
        .rsplit_once('=')
        .ok_or_else(|| format!("Grant '{}' is not URL=MINUTES", arg))?;
    let minutes = minutes
        .parse()
        .map_err(|_| format!("Grant minutes '{}' is not a number", minutes))?;
    Ok((url.to_string(), minutes))
}

fn cmd_hash(domains: &[String]) -> Result<(), String> {
    for domain in domains {
        println!("{:<40} {}", domain, rule_id(domain));
    }
    Ok(())
}

fn cmd_compile(config: &EngineConfig, input: &str, output: &str, verbose: bool) -> Result<(), String> {
    let start = Instant::now();
    let content =
        fs::read_to_string(input).map_err(|e| format!("Failed to read '{}': {}", input, e))?;

    let domains = parse_block_list(&content);
    let compiler = RuleCompiler::new(&config.interstitial_path);
    let mut rules = compiler.compile_block_list(&domains);
    let stats = dedupe_by_id(&mut rules);

    if verbose {
        for rule in &rules {
            println!("  [{}] {}", rule.id, rule.condition.url_filter);
        }
    }
    for collision in &stats.collisions {
        println!(
            "  collision on {}: '{}' replaces '{}'",
            collision.id, collision.kept, collision.dropped
        );
    }

    let json = serde_json::to_string_pretty(&rules)
        .map_err(|e| format!("Failed to serialize rules: {}", e))?;
    fs::write(output, json).map_err(|e| format!("Failed to write '{}': {}", output, e))?;

    println!("Compiled '{}' to '{}'", input, output);
    println!("  Lines:      {}", content.lines().count());
    println!("  Domains:    {}", domains.len());
    println!(
        "  Rules:      {} -> {} ({} duplicates, {} collisions)",
        stats.before,
        stats.after,
        stats.duplicates,
        stats.collisions.len()
    );
    println!("  Time:       {:.1}ms", start.elapsed().as_secs_f64() * 1000.0);

    Ok(())
}

fn cmd_window(
    config: &EngineConfig,
    at: &str,
    minutes: i64,
    times: Option<&str>,
) -> Result<(), String> {
    let now = NaiveTime::parse_from_str(at, "%H:%M")
        .map_err(|e| format!("Invalid time '{}': {}", at, e))?;
    let window = clamp_window(minutes);
    let raw = read_times(times)?;
    let today = Local::now().date_naive();
    let table =
        PrayerTimeTable::from_raw(today, &raw).map_err(|e| format!("Invalid times: {}", e))?;

    for (prayer, time) in table.entries() {
        println!("  {:<8} {}", prayer.name(), time.format("%H:%M"));
    }
    println!();

    match table.active_window(now, window) {
        Some(prayer) => println!("{} window open at {} ({} min)", prayer, at, window),
        None => println!("No prayer window open at {} ({} min)", at, window),
    }
    if let Some(prayer) =
        table.starting_within(now, config.notify_lookahead_low, config.notify_lookahead_high)
    {
        println!("{} notification due", prayer);
    }

    let next = table.next_prayer(today.and_time(now), window);
    let label = if next.current { "Current" } else { "Next" };
    println!(
        "{}: {} ({}s remaining, {:.0}%)",
        label, next.prayer, next.seconds_remaining, next.progress_percent
    );
    Ok(())
}

fn cmd_times(
    config: &EngineConfig,
    location: &LocationArgs,
    date: Option<&str>,
    method: u8,
) -> Result<(), String> {
    let location = location
        .location()
        .ok_or("Give --latitude/--longitude or --city/--country")?;
    let date = match date {
        Some(d) => NaiveDate::parse_from_str(d, "%Y-%m-%d")
            .map_err(|e| format!("Invalid date '{}': {}", d, e))?,
        None => Local::now().date_naive(),
    };

    let source = AladhanSource::new(&config.time_service_domain)?;
    let raw = source.fetch(&location, CalculationMethod(method), date)?;
    let table = PrayerTimeTable::from_raw(date, &raw)
        .map_err(|e| format!("Incomplete times from API: {}", e))?;

    println!("Prayer times for {}", date.format("%Y-%m-%d"));
    for (prayer, time) in table.entries() {
        println!("  {:<8} {}", prayer.name(), time.format("%H:%M"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_argument_splits_on_last_equals() {
        assert_eq!(
            parse_grant("https://example.com/?q=1=15").unwrap(),
            ("https://example.com/?q=1".to_string(), 15)
        );
        assert!(parse_grant("https://example.com/").is_err());
        assert!(parse_grant("https://example.com/=soon").is_err());
    }

    #[test]
    fn sample_times_form_a_table() {
        let raw = read_times(None).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        assert!(PrayerTimeTable::from_raw(day, &raw).is_ok());
    }

    #[test]
    fn config_reads_partial_toml() {
        let config: EngineConfig =
            toml::from_str("toolOrigin = \"abcdef\"\nmaxDurationMinutes = 120\n").unwrap();
        assert_eq!(config.tool_origin, "abcdef");
        assert_eq!(config.max_duration_minutes, 120);
        assert_eq!(config.tick_period_minutes, 1);
    }
}
