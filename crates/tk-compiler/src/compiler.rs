//! Rule Compiler
//!
//! Pure functions from a domain (or a strict-rule slot) to the declarative
//! rule the host installs. No state besides the interstitial path.

use std::collections::BTreeSet;

use tk_core::hash::rule_id;
use tk_core::types::{priority, ResourceType, Rule, RuleAction, RuleCondition, RuleId};

/// Default interstitial page inside the extension package.
pub const DEFAULT_INTERSTITIAL_PATH: &str = "/intention.html";

/// Builds block, strict and allow rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCompiler {
    interstitial_path: String,
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_INTERSTITIAL_PATH)
    }
}

impl RuleCompiler {
    pub fn new(interstitial_path: &str) -> Self {
        Self {
            interstitial_path: interstitial_path.to_string(),
        }
    }

    pub fn interstitial_path(&self) -> &str {
        &self.interstitial_path
    }

    /// Redirect top-level navigations to `domain` and its subdomains.
    pub fn compile_block_rule(&self, domain: &str) -> Rule {
        Rule {
            id: rule_id(domain),
            priority: priority::SITE_BLOCK,
            action: RuleAction::redirect_to(&self.interstitial_path),
            condition: RuleCondition {
                url_filter: host_filter(domain),
                resource_types: ResourceType::MAIN_FRAME,
                excluded_request_domains: BTreeSet::new(),
            },
        }
    }

    /// Redirect every top-level navigation except the excluded domains.
    pub fn compile_strict_rule<I, S>(&self, id: RuleId, priority: u32, exclusions: I) -> Rule
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let excluded_request_domains = exclusions
            .into_iter()
            .map(|domain| domain.as_ref().to_ascii_lowercase())
            .filter(|domain| !domain.is_empty())
            .collect();

        Rule {
            id,
            priority,
            action: RuleAction::redirect_to(&self.interstitial_path),
            condition: RuleCondition {
                url_filter: "*".to_string(),
                resource_types: ResourceType::MAIN_FRAME,
                excluded_request_domains,
            },
        }
    }

    /// Allow `domain` across every resource kind a page loads.
    pub fn compile_allow_rule(&self, domain: &str) -> Rule {
        Rule {
            id: rule_id(domain),
            priority: priority::ALLOW,
            action: RuleAction::Allow,
            condition: RuleCondition {
                url_filter: host_filter(domain),
                resource_types: ResourceType::GRANT_SCOPE,
                excluded_request_domains: BTreeSet::new(),
            },
        }
    }

    /// One block rule per domain, in list order.
    pub fn compile_block_list<S: AsRef<str>>(&self, domains: &[S]) -> Vec<Rule> {
        domains
            .iter()
            .map(|domain| self.compile_block_rule(domain.as_ref()))
            .collect()
    }
}

fn host_filter(domain: &str) -> String {
    format!("||{domain}^")
}
