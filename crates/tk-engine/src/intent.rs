use std::collections::HashMap;

use crate::host::TabId;

/// Last top-level navigation per tab, so the interstitial can tell the user
/// where they were headed.
#[derive(Debug, Clone, Default)]
pub struct NavigationIntentTracker {
    /// Navigations whose URL contains this are the interstitial itself
    marker: String,
    intents: HashMap<TabId, String>,
}

impl NavigationIntentTracker {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            intents: HashMap::new(),
        }
    }

    /// Remember `url` for `tab` unless it is the interstitial page.
    pub fn record(&mut self, tab: TabId, url: &str) -> bool {
        if !self.marker.is_empty() && url.contains(self.marker.as_str()) {
            return false;
        }
        self.intents.insert(tab, url.to_string());
        true
    }

    pub fn get(&self, tab: TabId) -> Option<&str> {
        self.intents.get(&tab).map(String::as_str)
    }

    pub fn forget(&mut self, tab: TabId) -> Option<String> {
        self.intents.remove(&tab)
    }

    pub fn len(&self) -> usize {
        self.intents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}
