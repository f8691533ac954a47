//! Core type definitions for Timekeeper
//!
//! These types map directly to the browser's dynamic rule table: a `Rule`
//! serializes to exactly the object the host's `updateDynamicRules` call
//! accepts, and deserializes from what `getDynamicRules` returns.

use std::collections::BTreeSet;
use std::fmt;

use serde::de::{Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};

use crate::url::extract_host;

/// Rule identifier in the host rule table.
pub type RuleId = i32;

/// Lowest id produced by the domain hash (inclusive).
pub const RULE_ID_MIN: RuleId = 1000;
/// Upper bound of the domain hash (exclusive).
pub const RULE_ID_MAX: RuleId = 30000;

/// Fixed id of the focus-session strict rule.
pub const RULE_ID_FOCUS: RuleId = 29999;
/// Fixed id of the prayer-window strict rule.
pub const RULE_ID_PRAYER: RuleId = 29998;

// =============================================================================
// Priorities
// =============================================================================

/// Rule priorities. Overlapping matches resolve to the highest priority.
pub mod priority {
    /// Per-site block rule.
    pub const SITE_BLOCK: u32 = 1;
    /// Focus session / prayer window block-everything rule.
    pub const STRICT_BLOCK: u32 = 50;
    /// Temporary access grant.
    pub const ALLOW: u32 = 100;
}

// =============================================================================
// Rule Actions
// =============================================================================

/// Where a redirect rule sends the navigation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectTarget {
    /// Path inside the extension package, e.g. `/intention.html`.
    pub extension_path: String,
}

/// Action to take for a matched rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    /// Let the request through, overriding lower-priority redirects
    Allow,
    /// Send the navigation to the interstitial page
    Redirect { redirect: RedirectTarget },
}

impl RuleAction {
    /// Redirect to a page inside the extension.
    pub fn redirect_to(extension_path: &str) -> Self {
        Self::Redirect {
            redirect: RedirectTarget {
                extension_path: extension_path.to_string(),
            },
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Tie-break rank at equal priority; higher wins.
    pub(crate) fn precedence(&self) -> u8 {
        match self {
            Self::Allow => 1,
            Self::Redirect { .. } => 0,
        }
    }
}

// =============================================================================
// Resource Types (bit mask for type filtering)
// =============================================================================

bitflags::bitflags! {
    /// Resource type bit mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceType: u32 {
        const MAIN_FRAME = 1 << 0;   // top-level document
        const SUB_FRAME = 1 << 1;    // iframe/frame
        const STYLESHEET = 1 << 2;
        const SCRIPT = 1 << 3;
        const IMAGE = 1 << 4;
        const FONT = 1 << 5;
        const OBJECT = 1 << 6;
        const XMLHTTPREQUEST = 1 << 7;
        const PING = 1 << 8;
        const CSP_REPORT = 1 << 9;
        const MEDIA = 1 << 10;
        const WEBSOCKET = 1 << 11;
        const OTHER = 1 << 12;
    }
}

/// Host names of each resource type, in the order they are serialized.
const RESOURCE_TYPE_NAMES: [(ResourceType, &str); 13] = [
    (ResourceType::MAIN_FRAME, "main_frame"),
    (ResourceType::SUB_FRAME, "sub_frame"),
    (ResourceType::STYLESHEET, "stylesheet"),
    (ResourceType::SCRIPT, "script"),
    (ResourceType::IMAGE, "image"),
    (ResourceType::FONT, "font"),
    (ResourceType::OBJECT, "object"),
    (ResourceType::XMLHTTPREQUEST, "xmlhttprequest"),
    (ResourceType::PING, "ping"),
    (ResourceType::CSP_REPORT, "csp_report"),
    (ResourceType::MEDIA, "media"),
    (ResourceType::WEBSOCKET, "websocket"),
    (ResourceType::OTHER, "other"),
];

impl ResourceType {
    /// Scope of an access grant: everything a page needs to work.
    pub const GRANT_SCOPE: Self = Self::MAIN_FRAME
        .union(Self::SUB_FRAME)
        .union(Self::XMLHTTPREQUEST)
        .union(Self::SCRIPT)
        .union(Self::IMAGE)
        .union(Self::STYLESHEET)
        .union(Self::MEDIA)
        .union(Self::WEBSOCKET)
        .union(Self::OTHER);

    /// Parse from browser resource type string.
    pub fn from_host_name(s: &str) -> Self {
        RESOURCE_TYPE_NAMES
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(flag, _)| *flag)
            .unwrap_or(Self::OTHER)
    }

    /// Host names of the contained types.
    pub fn names(&self) -> Vec<&'static str> {
        RESOURCE_TYPE_NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let names = self.names();
        let mut seq = serializer.serialize_seq(Some(names.len()))?;
        for name in names {
            seq.serialize_element(name)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for ResourceType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NamesVisitor;

        impl<'de> Visitor<'de> for NamesVisitor {
            type Value = ResourceType;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a list of resource type names")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut mask = ResourceType::empty();
                while let Some(name) = seq.next_element::<String>()? {
                    mask |= ResourceType::from_host_name(&name);
                }
                Ok(mask)
            }
        }

        deserializer.deserialize_seq(NamesVisitor)
    }
}

// =============================================================================
// Rules
// =============================================================================

/// Match condition of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    /// `urlFilter` expression (`||domain^`, `*`, plain substring)
    pub url_filter: String,
    /// Resource kinds the rule applies to
    pub resource_types: ResourceType,
    /// Request domains (and their subdomains) the rule never matches
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub excluded_request_domains: BTreeSet<String>,
}

/// A declarative rule in the host rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: RuleId,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

/// Reasons the host refuses a rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("Rule id {0} must be positive")]
    IdOutOfRange(RuleId),
    #[error("Rule {0} has an empty url filter")]
    EmptyFilter(RuleId),
    #[error("Rule {0} applies to no resource types")]
    NoResourceTypes(RuleId),
    #[error("Rule {id} has an invalid url filter: {reason}")]
    InvalidFilter { id: RuleId, reason: String },
}

impl Rule {
    /// Check the rule the way the host does before accepting it.
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.id < 1 {
            return Err(RuleError::IdOutOfRange(self.id));
        }
        if self.condition.url_filter.is_empty() {
            return Err(RuleError::EmptyFilter(self.id));
        }
        if self.condition.resource_types.is_empty() {
            return Err(RuleError::NoResourceTypes(self.id));
        }
        crate::filter::UrlFilter::parse(&self.condition.url_filter).map_err(|reason| {
            RuleError::InvalidFilter {
                id: self.id,
                reason: reason.to_string(),
            }
        })?;
        Ok(())
    }
}

// =============================================================================
// Request Context
// =============================================================================

/// Context for a request being matched.
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    /// Full request URL
    pub url: &'a str,
    /// Request hostname (extracted from URL)
    pub host: &'a str,
    /// Request type
    pub request_type: ResourceType,
    /// Tab ID
    pub tab_id: i32,
}

impl<'a> RequestContext<'a> {
    /// Top-level navigation of `url` in `tab_id`.
    pub fn navigation(url: &'a str, tab_id: i32) -> Self {
        Self::new(url, ResourceType::MAIN_FRAME, tab_id)
    }

    pub fn new(url: &'a str, request_type: ResourceType, tab_id: i32) -> Self {
        Self {
            url,
            host: extract_host(url).unwrap_or(""),
            request_type,
            tab_id,
        }
    }
}

// =============================================================================
// Match Result
// =============================================================================

/// Final decision for a matched request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchDecision {
    /// Request proceeds (no rule matched, or an allow rule won)
    Allow,
    /// Request is redirected to the interstitial
    Redirect,
}

/// Result of matching a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    /// The final decision for this request
    pub decision: MatchDecision,
    /// Rule ID that determined the decision, -1 when no rule matched
    pub rule_id: RuleId,
    /// Extension path if decision is Redirect
    pub redirect_path: Option<String>,
}

impl Default for MatchResult {
    fn default() -> Self {
        Self {
            decision: MatchDecision::Allow,
            rule_id: -1,
            redirect_path: None,
        }
    }
}
