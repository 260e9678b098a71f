//! Configuration file parser for ~/.config/recents/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as warnings, since they are
//! usually typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::download::ShowDownloads;
use crate::feed::{PagePolicy, SectionLimits, ViewMode};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database file; the CLI `--db` flag takes precedence.
    pub database_path: Option<String>,

    /// View mode used when none is stored in the database.
    pub view_mode: ViewMode,

    /// Collapse same-day history rows of one manga into one item.
    pub group_chapters_history: bool,

    /// Collapse same-day updates of one manga into one item.
    pub collapse_grouped_updates: bool,

    /// Keep read chapters in the mixed views.
    pub show_read_everywhere: bool,

    /// Order updates by fetch time instead of upload time.
    pub sort_by_fetched_time: bool,

    /// Allow deleting bookmarked chapters.
    pub remove_bookmarked_on_delete: bool,

    pub show_downloads: ShowDownloads,

    pub pagination: PaginationConfig,

    pub sections: SectionLimits,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            view_mode: ViewMode::GroupAll,
            group_chapters_history: true,
            collapse_grouped_updates: true,
            show_read_everywhere: false,
            sort_by_fetched_time: false,
            remove_bookmarked_on_delete: false,
            show_downloads: ShowDownloads::All,
            pagination: PaginationConfig::default(),
            sections: SectionLimits::default(),
        }
    }
}

/// `[pagination]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    pub page_size: usize,
    pub endless_limit: usize,
    pub max_retries: u32,
    pub same_update_window_hours: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        let policy = PagePolicy::default();
        Self {
            page_size: policy.page_size,
            endless_limit: policy.endless_limit,
            max_retries: policy.max_retries,
            same_update_window_hours: 12,
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 10] = [
        "database_path",
        "view_mode",
        "group_chapters_history",
        "collapse_grouped_updates",
        "show_read_everywhere",
        "sort_by_fetched_time",
        "remove_bookmarked_on_delete",
        "show_downloads",
        "pagination",
        "sections",
    ];

    const PAGINATION_KEYS: [&'static str; 4] =
        ["page_size", "endless_limit", "max_retries", "same_update_window_hours"];

    const SECTION_KEYS: [&'static str; 3] = ["new_chapters", "continue_reading_total", "new_additions"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw, &Self::KNOWN_KEYS, "");
            if let Some(toml::Value::Table(table)) = raw.get("pagination") {
                warn_unknown_keys(table, &Self::PAGINATION_KEYS, "pagination.");
            }
            if let Some(toml::Value::Table(table)) = raw.get("sections") {
                warn_unknown_keys(table, &Self::SECTION_KEYS, "sections.");
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), view_mode = %config.view_mode, "Loaded configuration");
        Ok(config)
    }

    /// Pagination limits with the configured overrides applied.
    pub fn page_policy(&self) -> PagePolicy {
        PagePolicy {
            page_size: self.pagination.page_size.max(1),
            endless_limit: self.pagination.endless_limit.max(1),
            max_retries: self.pagination.max_retries,
            same_update_window_ms: i64::from(self.pagination.same_update_window_hours) * 60 * 60 * 1000,
            sections: self.sections,
        }
    }
}

fn warn_unknown_keys(table: &toml::Table, known: &[&str], prefix: &str) {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(key = %format!("{}{}", prefix, key), "Unknown key in config file, ignoring");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("recents_config_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn cleanup(path: &Path) {
        if let Some(dir) = path.parent() {
            std::fs::remove_dir_all(dir).ok();
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.view_mode, ViewMode::GroupAll);
        assert!(config.group_chapters_history);
        assert!(config.collapse_grouped_updates);
        assert!(!config.show_read_everywhere);
        assert_eq!(config.show_downloads, ShowDownloads::All);
        assert_eq!(config.page_policy(), PagePolicy::default());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/recents_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.view_mode, ViewMode::GroupAll);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let path = write_config("whitespace", "   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert!(config.group_chapters_history);
        cleanup(&path);
    }

    #[test]
    fn test_full_config() {
        let path = write_config(
            "full",
            r#"
view_mode = "only_updates"
group_chapters_history = false
show_read_everywhere = true
sort_by_fetched_time = true
show_downloads = "only_unread"

[pagination]
page_size = 10
max_retries = 2
same_update_window_hours = 6

[sections]
new_chapters = 2
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.view_mode, ViewMode::OnlyUpdates);
        assert!(!config.group_chapters_history);
        assert!(config.show_read_everywhere);
        assert!(config.sort_by_fetched_time);
        assert_eq!(config.show_downloads, ShowDownloads::OnlyUnread);

        let policy = config.page_policy();
        assert_eq!(policy.page_size, 10);
        assert_eq!(policy.endless_limit, 50);
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.same_update_window_ms, 6 * 60 * 60 * 1000);
        assert_eq!(policy.sections.new_chapters, 2);
        assert_eq!(policy.sections.continue_reading_total, 9);

        cleanup(&path);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let path = write_config("invalid", "this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_view_mode_rejected() {
        let path = write_config("bad_mode", "view_mode = \"sideways\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
        cleanup(&path);
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let path = write_config(
            "unknown",
            "totally_fake_key = 1\n[pagination]\npage_sise = 3\n",
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.page_policy().page_size, 25);
        cleanup(&path);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let path = write_config("too_large", &"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
        cleanup(&path);
    }

    #[test]
    fn test_zero_page_size_clamped() {
        let path = write_config("zero_page", "[pagination]\npage_size = 0\nendless_limit = 0\n");
        let policy = Config::load(&path).unwrap().page_policy();
        assert_eq!(policy.page_size, 1);
        assert_eq!(policy.endless_limit, 1);
        cleanup(&path);
    }
}
