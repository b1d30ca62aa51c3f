//! KSL Notify CLI
//!
//! Command line utility to watch KSL Classifieds searches and notify of
//! new listings.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use ksl_notify::{
    error::{AppError, Result},
    models::{Config, SearchQuery},
    notify::build_notifier,
    pipeline,
    utils::http,
};

/// ksl-notify - KSL Classifieds search notifier
#[derive(Parser, Debug)]
#[command(
    name = "ksl-notify",
    version,
    about = "Watch KSL Classifieds searches and notify of new listings"
)]
struct Cli {
    /// Path to state directory holding config.toml and seen stores
    #[arg(long, default_value = "state")]
    state_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll the classifieds and notify of listings not seen before
    Watch {
        #[command(flatten)]
        search: SearchArgs,

        /// Number of minutes to wait between searches (overrides config)
        #[arg(short = 't', long)]
        time: Option<u64>,

        /// Run a single cycle per query and exit
        #[arg(long)]
        once: bool,
    },

    /// Search once and print the matches; no state is touched
    Search {
        #[command(flatten)]
        search: SearchArgs,
    },

    /// Validate configuration and verify the notification channel
    Validate,

    /// Show per-query seen-store contents
    Info,
}

/// Search terms and filters shared by `watch` and `search`.
#[derive(Args, Debug)]
struct SearchArgs {
    /// Terms to search on KSL classifieds; use quotes for multiword searches
    query: Vec<String>,

    /// Category to apply to search results
    #[arg(short, long)]
    category: Option<String>,

    /// Subcategory to apply to search results
    #[arg(short = 'u', long)]
    subcategory: Option<String>,

    /// Minimum dollar amount to include in search results
    #[arg(short = 'm', long, default_value_t = 0)]
    min_price: i64,

    /// Maximum dollar amount to include in search results
    #[arg(short = 'M', long, default_value_t = 0)]
    max_price: i64,

    /// ZIP code around which to center search results
    #[arg(short, long)]
    zip: Option<String>,

    /// City around which to center search results
    #[arg(long)]
    city: Option<String>,

    /// State (abbr, like UT) around which to center search results
    #[arg(long)]
    state: Option<String>,

    /// Maximum distance in miles from the ZIP code center
    #[arg(short = 'd', long)]
    miles: Option<u32>,

    /// Number of results per page
    #[arg(short = 'n', long)]
    per_page: Option<u32>,

    /// Sort oldest to newest instead of newest to oldest
    #[arg(short = 'r', long)]
    reverse: bool,

    /// Include sold items alongside active items
    #[arg(short = 's', long)]
    sold: bool,
}

impl SearchArgs {
    /// Build one query per search term, all sharing the filter flags.
    ///
    /// `KSL_QUERY*` environment variables replace the positional terms
    /// entirely when any are set, so a service unit can configure queries
    /// without editing its command line. Repeated terms collapse to a
    /// single query.
    fn build_queries(&self) -> Result<Vec<SearchQuery>> {
        let mut env_terms: Vec<(String, String)> = std::env::vars()
            .filter(|(key, _)| key.starts_with("KSL_QUERY"))
            .collect();
        env_terms.sort();

        let terms: Vec<String> = if env_terms.is_empty() {
            self.query.clone()
        } else {
            env_terms.into_iter().map(|(_, term)| term).collect()
        };
        if terms.is_empty() {
            return Err(AppError::config(
                "no search queries given (arguments or KSL_QUERY* variables)",
            ));
        }
        Ok(SearchQuery::dedupe(
            terms.into_iter().map(|term| self.query_for(term)).collect(),
        ))
    }

    fn query_for(&self, keyword: String) -> SearchQuery {
        let mut query = SearchQuery::new(keyword);
        query.category = self.category.clone();
        query.subcategory = self.subcategory.clone();
        query.min_price = self.min_price;
        query.max_price = self.max_price;
        query.zip = self.zip.clone();
        query.city = self.city.clone();
        query.state = self.state.clone();
        query.miles = self.miles;
        query.per_page = self.per_page;
        query.oldest_first = self.reverse;
        query.include_sold = self.sold;
        query.normalized()
    }
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    log::info!("KSL Notify starting...");

    let config_path = cli.state_dir.join("config.toml");
    let mut config = Config::load_or_default(&config_path);
    config.apply_env();

    match cli.command {
        Command::Watch { search, time, once } => {
            if let Some(minutes) = time {
                config.poller.interval_mins = minutes;
            }
            config.validate()?;
            let queries = search.build_queries()?;
            pipeline::run_watch(&config, &cli.state_dir, queries, once).await?;
        }

        Command::Search { search } => {
            config.validate()?;
            let queries = search.build_queries()?;
            pipeline::run_search(&config, &queries).await?;
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if config_path.exists() {
                // strict parse: a corrupt file must fail here, not fall
                // back to defaults
                config = Config::load(&config_path)?;
                config.apply_env();
            }
            config.validate()?;
            log::info!("✓ Config OK ({})", config_path.display());

            let client = http::create_client(&config.client)?;
            let notifier = build_notifier(&config.notifier, client)?;
            notifier.verify().await?;
            log::info!("✓ Notification channel OK ({})", notifier.channel());

            log::info!("All validations passed!");
        }

        Command::Info => {
            log::info!("State directory: {}", cli.state_dir.display());

            let seen_dir = cli.state_dir.join("seen");
            if !seen_dir.exists() {
                log::info!("No seen stores yet.");
                return Ok(());
            }

            let mut stores: Vec<PathBuf> = std::fs::read_dir(&seen_dir)?
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path())
                .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
                .collect();
            stores.sort();

            if stores.is_empty() {
                log::info!("No seen stores yet.");
            }
            for path in stores {
                let content = std::fs::read_to_string(&path)?;
                match serde_json::from_str::<serde_json::Value>(&content) {
                    Ok(store) => {
                        let count = store
                            .get("seen")
                            .and_then(|seen| seen.as_object())
                            .map_or(0, |seen| seen.len());
                        let updated = store
                            .get("updated_at")
                            .and_then(|at| at.as_str())
                            .unwrap_or("unknown");
                        log::info!("{}: {count} seen, last updated {updated}", path.display());
                    }
                    Err(e) => log::warn!("{} is not readable: {e}", path.display()),
                }
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
