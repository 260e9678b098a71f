use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;

use recents::app::{App, AppEvent, Collaborators, FeedConsumer};
use recents::config::Config;
use recents::download::{DisplayStatus, DownloadQueue, DownloadStatus, QueueEntry};
use recents::events::handle_app_event;
use recents::feed::{DayKey, FeedItem, GroupTag, ViewMode, WarmCache};
use recents::preferences::PreferenceManager;
use recents::storage::{Database, DatabaseError, LibraryDump};
use recents::util::fit_to_width;

/// Get the config directory path (~/.config/recents/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("recents"))
}

#[derive(Parser, Debug)]
#[command(name = "recents", about = "Reading history, new chapters and new additions in one feed")]
struct Args {
    /// Database file (default: ~/.config/recents/recents.db)
    #[arg(long, value_name = "FILE")]
    db: Option<PathBuf>,

    /// Config file (default: ~/.config/recents/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// View mode: group_all, ungroup_all, only_history, only_updates (remembered)
    #[arg(long)]
    view: Option<ViewMode>,

    /// Only show manga whose title contains this text
    #[arg(long, default_value = "")]
    query: String,

    /// Number of pages to load
    #[arg(long, default_value_t = 1)]
    pages: usize,

    /// Print the feed as JSON
    #[arg(long)]
    json: bool,

    /// Import a JSON library dump before showing the feed
    #[arg(long, value_name = "FILE")]
    import: Option<PathBuf>,

    /// Forget stored view preferences and use the config file again
    #[arg(long)]
    reset_preferences: bool,

    /// Reset database (delete and recreate)
    #[arg(long)]
    reset_db: bool,
}

/// Logs what a display would show; the CLI prints the final feed itself.
struct LogConsumer;

impl FeedConsumer for LogConsumer {
    fn show_feed(&mut self, items: Arc<Vec<FeedItem>>, has_new_items: bool, scroll_to_top: bool) {
        tracing::debug!(items = items.len(), has_new_items, scroll_to_top, "Feed updated");
    }

    fn update_single_chapter_download(&mut self, entry: &QueueEntry) {
        tracing::debug!(chapter_id = entry.chapter_id, status = ?entry.status, "Download updated");
    }

    fn set_refreshing(&mut self, refreshing: bool) {
        tracing::debug!(refreshing, "Library refresh state changed");
    }

    fn update_download_status(&mut self, running: bool) {
        tracing::debug!(running, "Download worker state changed");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    let config_path = args.config.clone().unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match (&args.db, &config.database_path) {
        (Some(path), _) => path.clone(),
        (None, Some(path)) => PathBuf::from(path),
        (None, None) => {
            if !config_dir.exists() {
                std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
            }
            config_dir.join("recents.db")
        }
    };

    if args.reset_db && db_path.exists() {
        std::fs::remove_file(&db_path).context("Failed to delete database")?;
        eprintln!("Database reset.");
    }

    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::InstanceLocked) => {
            eprintln!("Error: Another instance of recents appears to be running. Please close it and try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    if let Some(import_file) = &args.import {
        import_library(&db, import_file).await?;
    }

    let mut preferences = match PreferenceManager::load(&config, &db).await {
        Ok(manager) => manager,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load stored preferences, using config only");
            PreferenceManager::from_config(&config)
        }
    };
    if args.reset_preferences {
        let removed = preferences
            .reset(&db)
            .await
            .context("Failed to reset preferences")?;
        eprintln!("Cleared {} stored preference(s).", removed);
    }
    if let Some(view) = args.view {
        preferences
            .set_view_mode(&db, view)
            .await
            .context("Failed to save view mode")?;
    }

    let db = Arc::new(db);
    let collaborators = Collaborators {
        source: db.clone(),
        downloads: Arc::new(DownloadQueue::new()),
        store: db,
        warm_cache: WarmCache::new(),
    };
    let (event_tx, mut event_rx) = mpsc::channel::<AppEvent>(32);
    let mut app = App::new(
        collaborators,
        Box::new(LogConsumer),
        preferences.recents(),
        config.page_policy(),
        event_tx,
    );

    app.start();
    if !args.query.trim().is_empty() {
        app.set_query(&args.query);
    }

    let mut pages = 1;
    while let Some(event) = event_rx.recv().await {
        handle_app_event(&mut app, event);
        if app.is_loading() {
            continue;
        }
        if pages < args.pages && app.request_next_page() {
            pages += 1;
            continue;
        }
        break;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&**app.feed().items())?);
    } else {
        print_feed(&app);
    }
    Ok(())
}

async fn import_library(db: &Database, path: &Path) -> Result<()> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    if !metadata.is_file() {
        anyhow::bail!("Import path must be a regular file");
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read import file: {}", path.display()))?;
    let dump: LibraryDump = serde_json::from_str(&content).context("File is not a valid library dump")?;
    let (manga, chapters) = db.import_library(&dump).await.context("Failed to import library")?;
    eprintln!("Imported {} manga and {} chapters.", manga, chapters);
    Ok(())
}

// ============================================================================
// Plain Text Output
// ============================================================================

const TITLE_WIDTH: usize = 32;
const CHAPTER_WIDTH: usize = 28;

fn print_feed(app: &App) {
    let items = app.feed().items();
    if items.is_empty() {
        println!("Nothing here yet ({}).", app.view_mode());
        return;
    }

    let mut current: Option<GroupTag> = None;
    for item in items.iter() {
        if item.group != GroupTag::Ungrouped && current != Some(item.group) {
            println!();
            println!("== {} ==", section_title(item.group));
        }
        current = Some(item.group);

        let chapter = if item.chapter.is_placeholder() {
            "(no chapters yet)".to_string()
        } else {
            item.chapter.name.to_string()
        };
        let extras = if item.extras.is_empty() {
            String::new()
        } else {
            format!(" +{}", item.extras.len())
        };
        println!(
            "{} {} {:>10} {}{}",
            fit_to_width(&item.manga.title, TITLE_WIDTH),
            fit_to_width(&chapter, CHAPTER_WIDTH),
            format_timestamp(item.history.last_read),
            status_label(app.display_status(&item.manga, &item.chapter, &item.download)),
            extras
        );
    }
}

fn section_title(tag: GroupTag) -> String {
    match tag {
        GroupTag::NewAdditions => "New additions".to_string(),
        GroupTag::NewChapters => "New chapters".to_string(),
        GroupTag::ContinueReading => "Continue reading".to_string(),
        GroupTag::Day(DayKey::Day(day)) => day.format("%A, %B %-d, %Y").to_string(),
        GroupTag::Day(DayKey::Unknown) => "Unknown date".to_string(),
        GroupTag::Ungrouped => String::new(),
    }
}

fn format_timestamp(millis: i64) -> String {
    if millis <= 0 {
        return "-".to_string();
    }
    Local
        .timestamp_millis_opt(millis)
        .earliest()
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Hidden slots print nothing, following the `show_downloads` policy.
fn status_label(status: Option<DisplayStatus>) -> &'static str {
    match status {
        None | Some(DisplayStatus::Status(DownloadStatus::NotDownloaded)) => "",
        Some(DisplayStatus::Checked) => "[x]",
        Some(DisplayStatus::Status(DownloadStatus::Queued)) => "[queued]",
        Some(DisplayStatus::Status(DownloadStatus::Downloading)) => "[downloading]",
        Some(DisplayStatus::Status(DownloadStatus::Downloaded)) => "[downloaded]",
    }
}
