//! feedsync CLI
//!
//! Triggers syncs and local edits against the configured backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use feedsync_core::{
    build_backend, AlwaysOnline, AppConfig, Backend, BackendConfig, InitialSyncOutcome, Store,
    SyncArgs, SyncEngine,
};

/// Keeps a local feed cache in sync with a feed-reader backend.
#[derive(Parser)]
#[command(name = "feedsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Local store file (defaults to the user data directory)
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable debug logging
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the initial sync if it never completed
    Init,

    /// Run a follow-up sync (all phases when no phase is selected)
    Sync {
        #[arg(long)]
        feeds: bool,
        #[arg(long)]
        flags: bool,
        #[arg(long)]
        entries: bool,
    },

    /// Push pending read and bookmark flags only
    Flags,

    /// Subscribe to a feed or a page that links to one
    Add { url: String },

    /// Rename a feed
    Rename { id: String, title: String },

    /// Unsubscribe from a feed and drop its entries
    Delete { id: String },

    /// List subscribed feeds
    Feeds,

    /// Change the local settings of a feed
    Feed {
        id: String,
        /// Hide entries whose title contains this word
        #[arg(long = "block")]
        block: Vec<String>,
        /// Stop hiding entries for this word
        #[arg(long = "unblock")]
        unblock: Vec<String>,
        /// Open entries in the browser instead of the built-in reader
        #[arg(long)]
        open_in_browser: Option<bool>,
        /// Show preview images for this feed
        #[arg(long)]
        preview_images: Option<bool>,
    },

    /// List cached entries, newest first
    Entries {
        /// Only entries of this feed
        #[arg(long)]
        feed: Option<String>,
        /// Only unread entries
        #[arg(long)]
        unread: bool,
    },

    /// Mark an entry as read
    Read {
        id: String,
        /// Mark as unread instead
        #[arg(long)]
        unread: bool,
    },

    /// Bookmark an entry
    Bookmark {
        id: String,
        /// Remove the bookmark instead
        #[arg(long)]
        remove: bool,
    },

    /// Switch to another backend, dropping all local data
    Backend {
        #[arg(value_enum)]
        kind: BackendChoice,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },

    /// Show backend, cursor and pending flag counts
    Status,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendChoice {
    Standalone,
    Miniflux,
    Nextcloud,
}

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load(),
    };
    let store_path = match &cli.store {
        Some(path) => path.clone(),
        None => AppConfig::store_file_path()?,
    };
    let store = Store::load_from(&store_path).await;
    let client = config.http.build_client()?;
    let backend = build_backend(&config.backend, &config.sync, client.clone(), store.clone());
    let engine = SyncEngine::new(store.clone(), backend, Arc::new(AlwaysOnline))
        .with_include_read_on_initial_sync(config.sync.include_read_on_initial_sync);

    match cli.command {
        Commands::Init => match engine.perform_initial_sync_if_needed().await? {
            InitialSyncOutcome::Skipped => println!("Initial sync already completed"),
            InitialSyncOutcome::Completed { feeds, entries } => {
                println!("Initial sync completed: {feeds} feeds, {entries} entries")
            }
        },
        Commands::Sync {
            feeds,
            flags,
            entries,
        } => {
            engine.perform_initial_sync_if_needed().await?;
            let args = if feeds || flags || entries {
                SyncArgs {
                    feeds,
                    flags,
                    entries,
                }
            } else {
                SyncArgs::all()
            };
            let report = engine.sync(args).await?;
            if let Some(flags) = report.flags {
                println!(
                    "Flags: {} read, {} bookmarks pushed",
                    flags.read_pushed, flags.bookmarks_pushed
                );
            }
            if let Some(changes) = report.feeds {
                println!(
                    "Feeds: {} added, {} updated, {} removed",
                    changes.added, changes.updated, changes.removed
                );
            }
            if let Some(count) = report.entries {
                println!("Entries: {count} new or updated");
            }
        }
        Commands::Flags => {
            let report = engine.sync_flags_only().await?;
            println!(
                "Flags: {} read, {} bookmarks pushed",
                report.read_pushed, report.bookmarks_pushed
            );
        }
        Commands::Add { url } => {
            let feed = engine.add_feed(&url).await?;
            println!("{}\t{}", feed.id, feed.title);
        }
        Commands::Rename { id, title } => engine.rename_feed(&id, &title).await?,
        Commands::Delete { id } => {
            let removed = engine.delete_feed(&id).await?;
            println!("Deleted feed {id} and {removed} entries");
        }
        Commands::Feeds => {
            for feed in store.feeds().await {
                let link = feed.alternate_link().or(feed.self_link()).unwrap_or("");
                println!("{}\t{}\t{}", feed.id, feed.title, link);
            }
        }
        Commands::Feed {
            id,
            block,
            unblock,
            open_in_browser,
            preview_images,
        } => {
            let mut feed = store
                .feed(&id)
                .await
                .ok_or_else(|| format!("no such feed: {id}"))?;
            feed.blocked_words.retain(|word| !unblock.contains(word));
            for word in block {
                if !feed.blocked_words.contains(&word) {
                    feed.blocked_words.push(word);
                }
            }
            if open_in_browser.is_some() {
                feed.open_entries_in_browser = open_in_browser;
            }
            if preview_images.is_some() {
                feed.show_preview_images = preview_images;
            }
            store.update_feed(feed.clone()).await?;
            println!(
                "{}\tblocked: [{}]\topen in browser: {:?}\tpreview images: {:?}",
                feed.id,
                feed.blocked_words.join(", "),
                feed.open_entries_in_browser,
                feed.show_preview_images
            );
        }
        Commands::Entries { feed, unread } => list_entries(&store, feed.as_deref(), unread).await,
        Commands::Read { id, unread } => engine.set_read(&id, !unread).await?,
        Commands::Bookmark { id, remove } => engine.set_bookmarked(&id, !remove).await?,
        Commands::Backend {
            kind,
            url,
            username,
            password,
        } => {
            let backend_config = backend_config(kind, url, username, password)?;
            let backend = build_backend(&backend_config, &config.sync, client, store.clone());
            let mut config = config;
            change_backend(&engine, &mut config, cli.config.as_deref(), backend_config, backend)
                .await?;
            println!("Switched backend; run `feedsync init` to fetch everything again");
        }
        Commands::Status => {
            let conf = store.conf().await;
            let backend = engine.backend().await;
            println!("Backend: {:?}", backend.kind());
            println!("Initial sync completed: {}", conf.initial_sync_completed);
            match conf.last_entries_sync {
                Some(at) => println!("Last entry sync: {}", at.to_rfc3339()),
                None => println!("Last entry sync: never"),
            }
            println!("Feeds: {}", store.feeds().await.len());
            println!("Entries: {}", store.entry_count().await);
            println!(
                "Pending flags: {} read, {} bookmark",
                store.dirty_read().await.len(),
                store.dirty_bookmarked().await.len()
            );
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Saves the new backend to the config, then swaps it into the engine and
/// wipes the local store. A failed save leaves both untouched.
async fn change_backend(
    engine: &SyncEngine,
    config: &mut AppConfig,
    config_path: Option<&Path>,
    backend_config: BackendConfig,
    backend: Arc<dyn Backend>,
) -> CliResult<()> {
    let mut next = config.clone();
    next.backend = backend_config;
    match config_path {
        Some(path) => next.save_to(path)?,
        None => next.save()?,
    }
    *config = next;
    info!("backend configuration saved");

    engine.switch_backend(backend).await.map_err(|err| {
        format!("config now names the new backend, but local data could not be reset: {err}")
    })?;
    Ok(())
}

fn backend_config(
    kind: BackendChoice,
    url: Option<String>,
    username: Option<String>,
    password: Option<String>,
) -> CliResult<BackendConfig> {
    if let BackendChoice::Standalone = kind {
        return Ok(BackendConfig::Standalone);
    }
    let url = url.ok_or("--url is required for this backend")?;
    let username = username.ok_or("--username is required for this backend")?;
    let password = password.ok_or("--password is required for this backend")?;
    Ok(match kind {
        BackendChoice::Miniflux => BackendConfig::Miniflux {
            url,
            username,
            password,
        },
        _ => BackendConfig::Nextcloud {
            url,
            username,
            password,
        },
    })
}

async fn list_entries(store: &Store, feed: Option<&str>, unread_only: bool) {
    let feeds = store.feeds().await;
    let mut entries = match feed {
        Some(id) => store.entries_by_feed(id).await,
        None => store.entries().await,
    };
    entries.sort_by(|a, b| b.content.published.cmp(&a.content.published));

    for entry in entries {
        if unread_only && entry.read {
            continue;
        }
        let blocked = feeds
            .iter()
            .find(|feed| feed.id == entry.feed_id())
            .is_some_and(|feed| feed.is_blocked(&entry));
        if blocked {
            continue;
        }
        let marker = match (entry.read, entry.bookmarked) {
            (_, true) => '*',
            (false, false) => 'N',
            (true, false) => ' ',
        };
        println!(
            "{marker} {}\t{}\t{}",
            entry.id(),
            entry.content.title,
            entry.content.link.as_deref().unwrap_or("")
        );
    }
}
