//! Recents preferences: config.toml supplies the defaults, stored overrides
//! in `user_preferences` win. Writes go to the database only.
use std::collections::HashMap;
use std::str::FromStr;

use anyhow::Result;

use crate::config::Config;
use crate::download::ShowDownloads;
use crate::feed::ViewMode;
use crate::storage::Database;

// ============================================================================
// Typed Snapshot
// ============================================================================

/// Preferences the feed engine reads, captured once per aggregation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentsPreferences {
    pub view_mode: ViewMode,
    pub group_chapters_history: bool,
    pub collapse_grouped_updates: bool,
    pub show_read_everywhere: bool,
    pub sort_by_fetched_time: bool,
    pub remove_bookmarked_on_delete: bool,
    pub show_downloads: ShowDownloads,
}

impl Default for RecentsPreferences {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RecentsPreferences {
    fn from(config: &Config) -> Self {
        Self {
            view_mode: config.view_mode,
            group_chapters_history: config.group_chapters_history,
            collapse_grouped_updates: config.collapse_grouped_updates,
            show_read_everywhere: config.show_read_everywhere,
            sort_by_fetched_time: config.sort_by_fetched_time,
            remove_bookmarked_on_delete: config.remove_bookmarked_on_delete,
            show_downloads: config.show_downloads,
        }
    }
}

impl RecentsPreferences {
    /// Whether switching from `self` to `other` invalidates the cursor.
    pub fn resets_pagination(&self, other: &RecentsPreferences) -> bool {
        self.view_mode != other.view_mode
            || self.group_chapters_history != other.group_chapters_history
            || self.collapse_grouped_updates != other.collapse_grouped_updates
            || self.show_read_everywhere != other.show_read_everywhere
            || self.sort_by_fetched_time != other.sort_by_fetched_time
    }
}

// ============================================================================
// PreferenceManager
// ============================================================================

const PREFIX: &str = "recents.";

pub const VIEW_MODE: &str = "recents.view_mode";
pub const GROUP_CHAPTERS_HISTORY: &str = "recents.group_chapters_history";
pub const COLLAPSE_GROUPED_UPDATES: &str = "recents.collapse_grouped_updates";
pub const SHOW_READ_EVERYWHERE: &str = "recents.show_read_everywhere";
pub const SORT_BY_FETCHED_TIME: &str = "recents.sort_by_fetched_time";
pub const REMOVE_BOOKMARKED_ON_DELETE: &str = "recents.remove_bookmarked_on_delete";
pub const SHOW_DOWNLOADS: &str = "recents.show_downloads";

/// Config defaults with stored overrides layered on top. Reads are served
/// from memory; writes persist first and then update the map.
pub struct PreferenceManager {
    prefs: HashMap<String, String>,
    defaults: RecentsPreferences,
}

impl PreferenceManager {
    /// Load preferences by merging config defaults with DB overrides.
    pub async fn load(config: &Config, db: &Database) -> Result<Self> {
        let mut manager = Self::from_config(config);

        // DB wins over config
        for (key, value) in db.preferences_under(PREFIX).await? {
            manager.prefs.insert(key, value);
        }

        Ok(manager)
    }

    /// Create from config only (no DB). Fallback for when DB load fails.
    pub fn from_config(config: &Config) -> Self {
        let defaults = RecentsPreferences::from(config);
        Self {
            prefs: Self::entries(&defaults)
                .into_iter()
                .map(|(key, value)| (key.to_string(), value))
                .collect(),
            defaults,
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.prefs.get(key).map(String::as_str)
    }

    /// Set a preference: writes to DB and updates in-memory map.
    pub async fn set(&mut self, db: &Database, key: &str, value: &str) -> Result<()> {
        db.save_preference(key, value).await?;
        self.prefs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Persist a whole snapshot, e.g. after a settings screen is closed.
    pub async fn save_recents(&mut self, db: &Database, prefs: &RecentsPreferences) -> Result<()> {
        let entries = Self::entries(prefs);
        let borrowed: Vec<(&str, &str)> = entries.iter().map(|(k, v)| (*k, v.as_str())).collect();
        db.save_preferences(&borrowed).await?;
        for (key, value) in entries {
            self.prefs.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Forget every stored override and fall back to the config values.
    pub async fn reset(&mut self, db: &Database) -> Result<u64> {
        let removed = db.clear_preferences(PREFIX).await?;
        self.prefs = Self::entries(&self.defaults)
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        tracing::debug!(removed, "Recents preferences reset to config defaults");
        Ok(removed)
    }

    pub async fn set_view_mode(&mut self, db: &Database, mode: ViewMode) -> Result<()> {
        self.set(db, VIEW_MODE, mode.as_str()).await
    }

    // ========================================================================
    // Type-safe Accessors
    // ========================================================================

    pub fn view_mode(&self) -> ViewMode {
        self.parsed(VIEW_MODE).unwrap_or(self.defaults.view_mode)
    }

    pub fn show_downloads(&self) -> ShowDownloads {
        self.parsed(SHOW_DOWNLOADS).unwrap_or(self.defaults.show_downloads)
    }

    /// Typed snapshot of every recents preference.
    pub fn recents(&self) -> RecentsPreferences {
        let d = &self.defaults;
        RecentsPreferences {
            view_mode: self.view_mode(),
            group_chapters_history: self.flag(GROUP_CHAPTERS_HISTORY, d.group_chapters_history),
            collapse_grouped_updates: self.flag(COLLAPSE_GROUPED_UPDATES, d.collapse_grouped_updates),
            show_read_everywhere: self.flag(SHOW_READ_EVERYWHERE, d.show_read_everywhere),
            sort_by_fetched_time: self.flag(SORT_BY_FETCHED_TIME, d.sort_by_fetched_time),
            remove_bookmarked_on_delete: self.flag(REMOVE_BOOKMARKED_ON_DELETE, d.remove_bookmarked_on_delete),
            show_downloads: self.show_downloads(),
        }
    }

    // ========================================================================
    // Internal Helpers
    // ========================================================================

    fn flag(&self, key: &str, default: bool) -> bool {
        self.parsed(key).unwrap_or(default)
    }

    fn parsed<T: FromStr>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = raw, "Ignoring unparseable preference");
                None
            }
        }
    }

    /// Dotted key-value pairs for a snapshot.
    fn entries(prefs: &RecentsPreferences) -> Vec<(&'static str, String)> {
        vec![
            (VIEW_MODE, prefs.view_mode.to_string()),
            (GROUP_CHAPTERS_HISTORY, prefs.group_chapters_history.to_string()),
            (COLLAPSE_GROUPED_UPDATES, prefs.collapse_grouped_updates.to_string()),
            (SHOW_READ_EVERYWHERE, prefs.show_read_everywhere.to_string()),
            (SORT_BY_FETCHED_TIME, prefs.sort_by_fetched_time.to_string()),
            (REMOVE_BOOKMARKED_ON_DELETE, prefs.remove_bookmarked_on_delete.to_string()),
            (SHOW_DOWNLOADS, prefs.show_downloads.to_string()),
        ]
    }
}

// ============================================================================
// Tests
// ============================================================================
