//! Rule Matching Engine
//!
//! Evaluates a rule table against one request the way the host's packet
//! filter does. The browser runs the real thing without any of our code on
//! the path; this copy exists so the in-memory host, the simulator and the
//! tests can observe what a navigation would do.
//!
//! Precedence: the highest priority wins. At equal priority an allow rule
//! beats a redirect.

use log::warn;

use crate::filter::UrlFilter;
use crate::types::{MatchDecision, MatchResult, RequestContext, Rule, RuleAction};
use crate::url::host_matches_domain;

// =============================================================================
// Matcher
// =============================================================================

struct CompiledRule<'a> {
    rule: &'a Rule,
    filter: UrlFilter,
}

/// The rule matching engine.
pub struct Matcher<'a> {
    rules: Vec<CompiledRule<'a>>,
}

impl<'a> Matcher<'a> {
    /// Compile every rule of a table. Rules whose filter does not compile
    /// are skipped, as the host would have refused them.
    pub fn new(rules: &'a [Rule]) -> Self {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            match UrlFilter::parse(&rule.condition.url_filter) {
                Ok(filter) => compiled.push(CompiledRule { rule, filter }),
                Err(e) => warn!("Skipping rule {}: {}", rule.id, e),
            }
        }
        Self { rules: compiled }
    }

    /// Number of rules that compiled.
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Match a request and return the decision.
    pub fn match_request(&self, ctx: &RequestContext<'_>) -> MatchResult {
        let url = ctx.url.to_ascii_lowercase();
        let mut best: Option<&Rule> = None;

        for candidate in &self.rules {
            let rule = candidate.rule;
            if !rule.condition.resource_types.intersects(ctx.request_type) {
                continue;
            }
            if rule
                .condition
                .excluded_request_domains
                .iter()
                .any(|domain| host_matches_domain(ctx.host, domain))
            {
                continue;
            }
            if !candidate.filter.matches_lowercased(&url) {
                continue;
            }
            if best.map_or(true, |b| outranks(rule, b)) {
                best = Some(rule);
            }
        }

        match best {
            None => MatchResult::default(),
            Some(rule) => match &rule.action {
                RuleAction::Allow => MatchResult {
                    decision: MatchDecision::Allow,
                    rule_id: rule.id,
                    redirect_path: None,
                },
                RuleAction::Redirect { redirect } => MatchResult {
                    decision: MatchDecision::Redirect,
                    rule_id: rule.id,
                    redirect_path: Some(redirect.extension_path.clone()),
                },
            },
        }
    }

    /// Shorthand: would a top-level navigation to `url` be redirected?
    pub fn is_blocked(&self, url: &str) -> bool {
        self.match_request(&RequestContext::navigation(url, -1)).decision
            == MatchDecision::Redirect
    }
}

fn outranks(candidate: &Rule, current: &Rule) -> bool {
    (candidate.priority, candidate.action.precedence())
        > (current.priority, current.action.precedence())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::hash::rule_id;
    use crate::types::{priority, ResourceType, RuleCondition, RULE_ID_FOCUS};

    fn block(domain: &str) -> Rule {
        Rule {
            id: rule_id(domain),
            priority: priority::SITE_BLOCK,
            action: RuleAction::redirect_to("/intention.html"),
            condition: RuleCondition {
                url_filter: format!("||{domain}^"),
                resource_types: ResourceType::MAIN_FRAME,
                excluded_request_domains: BTreeSet::new(),
            },
        }
    }

    fn allow(domain: &str) -> Rule {
        Rule {
            id: rule_id(domain) + 1,
            priority: priority::ALLOW,
            action: RuleAction::Allow,
            condition: RuleCondition {
                url_filter: format!("||{domain}^"),
                resource_types: ResourceType::GRANT_SCOPE,
                excluded_request_domains: BTreeSet::new(),
            },
        }
    }

    fn strict() -> Rule {
        Rule {
            id: RULE_ID_FOCUS,
            priority: priority::STRICT_BLOCK,
            action: RuleAction::redirect_to("/intention.html"),
            condition: RuleCondition {
                url_filter: "*".to_string(),
                resource_types: ResourceType::MAIN_FRAME,
                excluded_request_domains: ["api.aladhan.com".to_string()].into_iter().collect(),
            },
        }
    }

    #[test]
    fn test_no_rules_allows() {
        let rules: Vec<Rule> = Vec::new();
        let matcher = Matcher::new(&rules);
        assert_eq!(
            matcher.match_request(&RequestContext::navigation("https://a.com/", 1)),
            MatchResult::default()
        );
    }

    #[test]
    fn test_block_rule_redirects_navigation_only() {
        let rules = vec![block("youtube.com")];
        let matcher = Matcher::new(&rules);

        let result = matcher.match_request(&RequestContext::navigation("https://www.youtube.com/", 1));
        assert_eq!(result.decision, MatchDecision::Redirect);
        assert_eq!(result.rule_id, rule_id("youtube.com"));
        assert_eq!(result.redirect_path.as_deref(), Some("/intention.html"));

        let script = RequestContext::new("https://www.youtube.com/app.js", ResourceType::SCRIPT, 1);
        assert_eq!(matcher.match_request(&script).decision, MatchDecision::Allow);
    }

    #[test]
    fn test_allow_beats_strict_and_block() {
        let rules = vec![block("youtube.com"), strict(), allow("youtube.com")];
        let matcher = Matcher::new(&rules);
        let result = matcher.match_request(&RequestContext::navigation("https://youtube.com/", 1));
        assert_eq!(result.decision, MatchDecision::Allow);
        assert_eq!(result.rule_id, rule_id("youtube.com") + 1);
        assert!(matcher.is_blocked("https://example.com/"));
    }

    #[test]
    fn test_strict_rule_exclusions() {
        let rules = vec![strict()];
        let matcher = Matcher::new(&rules);
        assert!(matcher.is_blocked("https://example.com/"));
        assert!(!matcher.is_blocked("https://api.aladhan.com/v1/timings"));
    }

    #[test]
    fn test_invalid_rule_is_skipped() {
        let mut bad = block("youtube.com");
        bad.condition.url_filter = "||^".to_string();
        let rules = vec![bad];
        let matcher = Matcher::new(&rules);
        assert_eq!(matcher.rule_count(), 0);
        assert!(!matcher.is_blocked("https://youtube.com/"));
    }
}
