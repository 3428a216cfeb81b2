use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use feedline::{
    FeedItem, FeedlineConfig, FetchOutcome, Footer, ListDriver, ListView, PaginatedQuery,
    QueryCache, SkipReason,
};
use feedline_rest::{ApiClient, AuthSession, FileAuthStore, Resource, ResourceFetcher};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, PartialEq)]
struct Args {
    config_path: Option<PathBuf>,
    resource: Resource,
    max_pages: Option<u32>,
}

impl Args {
    /// `[--config <path>] [--pages <n>] [resource]`
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut args = args.into_iter();
        let mut config_path = None;
        let mut resource = Resource::Feed;
        let mut max_pages = None;

        while let Some(arg) = args.next() {
            if arg == "--config" || arg == "-c" {
                let path = args.next().context("--config needs a path")?;
                config_path = Some(PathBuf::from(path));
            } else if arg == "--pages" || arg == "-n" {
                let count = args.next().context("--pages needs a number")?;
                max_pages = Some(
                    count
                        .parse()
                        .with_context(|| format!("Invalid page count '{}'", count))?,
                );
            } else if !arg.starts_with('-') {
                // Positional argument is the resource, e.g. user-posts:7
                resource = arg.parse()?;
            } else {
                anyhow::bail!("Unknown option '{}'", arg);
            }
        }

        // Check environment variable if not provided via CLI
        if config_path.is_none() {
            config_path = std::env::var_os("FEEDLINE_CONFIG").map(PathBuf::from);
        }

        // Default to ~/.config/feedline/feedline.yaml if it exists
        if config_path.is_none() {
            if let Some(home) = std::env::var_os("HOME") {
                let default_path = PathBuf::from(home)
                    .join(".config")
                    .join("feedline")
                    .join("feedline.yaml");
                if default_path.exists() {
                    config_path = Some(default_path);
                }
            }
        }

        Ok(Self {
            config_path,
            resource,
            max_pages,
        })
    }
}

fn init_logging() {
    // Default to INFO level, can be overridden with RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// One line per item: id and whichever text field the resource has.
fn summarize(item: &Value) -> String {
    let id = item
        .item_id()
        .map_or_else(|| "-".to_string(), |id| id.to_string());
    let text = ["body", "title", "message", "name"]
        .iter()
        .find_map(|field| item.get(*field).and_then(Value::as_str))
        .unwrap_or("");
    match item.like_count() {
        Some(likes) => format!("[{}] {} ({} likes)", id, text, likes),
        None => format!("[{}] {}", id, text),
    }
}

/// Print the list page by page until it ends or `max_pages` are loaded.
///
/// Returns how many items were shown. A failed page after items are on
/// screen ends the walk; only a failed first load is an error.
async fn walk<T: FeedItem>(
    driver: &ListDriver<T>,
    max_pages: Option<u32>,
    mut show: impl FnMut(&T),
) -> Result<usize> {
    let key = driver.query().key().clone();
    let mut printed = 0;
    loop {
        match driver.view() {
            ListView::InitialLoading => {}
            ListView::ErrorWithRetry { error } => {
                anyhow::bail!("Failed to load {}: {}", key, error);
            }
            ListView::Empty => {
                println!("No items in {}", key);
                break;
            }
            ListView::Populated { items, footer } => {
                for (index, item) in items.iter().enumerate().skip(printed) {
                    show(item);
                    driver.item_rendered(index);
                }
                printed = items.len();

                let pages = driver.query().state().page_count as u32;
                if footer == Footer::EndOfList || max_pages.is_some_and(|max| pages >= max) {
                    break;
                }
                match driver.end_reached().await {
                    Ok(FetchOutcome::Skipped(SkipReason::InFlight)) => {}
                    Ok(FetchOutcome::Skipped(reason)) => {
                        info!(?reason, "Nothing more to load");
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        warn!(%key, error = %e, items = printed, "Stopping after a failed page");
                        break;
                    }
                }
            }
        }
        // A prefetch is running; wait for it to land
        let mut state_rx = driver.query().subscribe();
        state_rx.wait_for(|s| !s.is_fetching()).await?;
    }
    Ok(printed)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let args = Args::parse(std::env::args().skip(1))?;
    let config = match &args.config_path {
        Some(path) => FeedlineConfig::load_from_file(path)?,
        None => FeedlineConfig::default(),
    };

    let client = Arc::new(ApiClient::from_config(&config)?);
    if let Some(store_path) = &config.auth.store_path {
        let session = AuthSession::restore(client.clone(), Arc::new(FileAuthStore::new(store_path)));
        if !session.status().is_signed_in() {
            warn!("Not signed in, requests are anonymous");
        }
    }

    let cache: QueryCache<Value> = QueryCache::new();
    let _gc = cache.spawn_garbage_collector(Duration::from_secs(60));

    let key = args.resource.query_key();
    info!(%key, base_url = client.base_url(), "Loading");
    let fetcher = Arc::new(ResourceFetcher::<Value>::new(
        client.clone(),
        args.resource.clone(),
    ));
    let query = PaginatedQuery::initialize(&cache, key.clone(), fetcher, config.query_options()).await;
    let driver = ListDriver::new(query, config.prefetch_policy());

    let printed = walk(&driver, args.max_pages, |item| println!("{}", summarize(item))).await?;
    info!(%key, items = printed, "Done");
    Ok(())
}
