use serde::{Deserialize, Serialize};

use tk_compiler::DEFAULT_INTERSTITIAL_PATH;

use crate::error::EngineError;

/// Sites blocked on first install.
pub const DEFAULT_SITES: [&str; 5] = [
    "youtube.com",
    "facebook.com",
    "instagram.com",
    "twitter.com",
    "x.com",
];

/// Engine configuration.
///
/// Every field has a default, so a partial TOML or JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Block list installed on first run
    pub default_sites: Vec<String>,
    /// Extension page that redirected navigations land on
    pub interstitial_path: String,
    /// The extension's own origin host, excluded from strict blocking
    pub tool_origin: String,
    /// Prayer-time service host, excluded from strict blocking
    pub time_service_domain: String,
    pub tick_period_minutes: u32,
    pub refresh_period_minutes: u32,
    /// A prayer is announced when it starts within (low, high] minutes
    pub notify_lookahead_low: u32,
    pub notify_lookahead_high: u32,
    /// Upper bound for focus sessions and access grants
    pub max_duration_minutes: u32,
    /// Full-day grant issued when bypassing a non-blocked target
    pub bypass_grant_minutes: u32,
    /// Delay the interstitial waits before following a grant
    pub redirect_delay_ms: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_sites: DEFAULT_SITES.iter().map(|s| s.to_string()).collect(),
            interstitial_path: DEFAULT_INTERSTITIAL_PATH.to_string(),
            tool_origin: String::new(),
            time_service_domain: "api.aladhan.com".to_string(),
            tick_period_minutes: 1,
            refresh_period_minutes: 720,
            notify_lookahead_low: 4,
            notify_lookahead_high: 6,
            max_duration_minutes: 1440,
            bypass_grant_minutes: 1440,
            redirect_delay_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Domains every strict rule leaves reachable.
    pub fn strict_exclusions(&self) -> Vec<String> {
        [&self.tool_origin, &self.time_service_domain]
            .into_iter()
            .filter(|d| !d.is_empty())
            .cloned()
            .collect()
    }

    /// A browser host must name its own origin before strict rules are built.
    pub fn require_tool_origin(&self) -> Result<(), EngineError> {
        if self.tool_origin.trim().is_empty() {
            return Err(EngineError::MissingToolOrigin);
        }
        Ok(())
    }

    /// Substring identifying the interstitial page in a URL.
    pub fn interstitial_marker(&self) -> &str {
        self.interstitial_path.trim_start_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_document_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{ "toolOrigin": "abcdefghijklmnop", "maxDurationMinutes": 120 }"#)
                .unwrap();
        assert_eq!(config.tool_origin, "abcdefghijklmnop");
        assert_eq!(config.max_duration_minutes, 120);
        assert_eq!(config.default_sites.len(), 5);
        assert_eq!(config.interstitial_path, "/intention.html");
    }

    #[test]
    fn exclusions_skip_unset_origin() {
        let config = EngineConfig::default();
        assert_eq!(config.strict_exclusions(), vec!["api.aladhan.com".to_string()]);
        assert_eq!(config.interstitial_marker(), "intention.html");
    }

    #[test]
    fn browser_config_requires_an_origin() {
        assert!(matches!(
            EngineConfig::default().require_tool_origin(),
            Err(EngineError::MissingToolOrigin)
        ));

        let config = EngineConfig {
            tool_origin: "abcdefghijklmnop".to_string(),
            ..EngineConfig::default()
        };
        assert!(config.require_tool_origin().is_ok());
        assert_eq!(
            config.strict_exclusions(),
            vec!["abcdefghijklmnop".to_string(), "api.aladhan.com".to_string()]
        );
    }
}
