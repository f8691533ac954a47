use crate::intent::NavigationIntentTracker;
use crate::prayer::{Prayer, PrayerTimeTable};

/// State that lives for one run of the background process.
///
/// Lost on suspension; [`crate::Engine::on_startup`] rebuilds what it can
/// from storage. The policies borrow it explicitly instead of sharing
/// module-level globals.
#[derive(Debug, Clone, Default)]
pub struct ProcessContext {
    pub intents: NavigationIntentTracker,
    /// Last known table, possibly from an earlier day
    pub prayer_table: Option<PrayerTimeTable>,
    /// Window open at the last tick
    pub prayer_window: Option<Prayer>,
    /// `<Prayer>|<YYYY-MM-DD>` of the last notification sent
    pub last_notification: Option<String>,
}

impl ProcessContext {
    pub fn new(interstitial_marker: &str) -> Self {
        Self {
            intents: NavigationIntentTracker::new(interstitial_marker),
            ..Self::default()
        }
    }
}
