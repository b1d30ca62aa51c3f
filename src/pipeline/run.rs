// src/pipeline/run.rs

//! Pipeline entry points.
//!
//! `run_watch` is the daemon: one watcher task per query, all sharing one
//! HTTP client, one notifier, and one shutdown flag. `run_search` is the
//! one-shot variant that prints a report and touches no state.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use futures::future;
use tokio::sync::watch;

use crate::error::{AppError, Result};
use crate::models::{Config, SearchQuery};
use crate::notify::{build_notifier, render_report};
use crate::pipeline::watch::Watcher;
use crate::services::SearchClient;
use crate::storage::{JsonSeenStore, SeenStore};
use crate::utils::http;

/// Run one watcher per query until shutdown or, with `once`, for exactly
/// one cycle each.
///
/// The notification channel is verified before any watcher starts so bad
/// credentials surface immediately instead of on the first match. Each
/// query opens its own seen store under `{state_dir}/seen/`; queries that
/// resolve to an already claimed store file are skipped, keeping every
/// store behind a single writer. Watchers run as independent tasks; one
/// watcher halting on a permanent error does not stop the others, but its
/// error becomes the exit status once every watcher has drained.
pub async fn run_watch(
    config: &Config,
    state_dir: &Path,
    queries: Vec<SearchQuery>,
    once: bool,
) -> Result<()> {
    if queries.is_empty() {
        return Err(AppError::config(
            "no search queries given (arguments or KSL_QUERY* variables)",
        ));
    }

    let client = http::create_client(&config.client)?;
    let notifier = build_notifier(&config.notifier, client.clone())?;
    notifier.verify().await?;
    log::info!("Notification channel ready: {}", notifier.channel());

    let search = Arc::new(SearchClient::new(&config.client, client)?);

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("Shutdown signal received");
            let _ = cancel_tx.send(true);
        }
    });

    let seen_dir = state_dir.join("seen");
    let mut claimed = HashSet::new();
    let mut handles = Vec::with_capacity(queries.len());
    for query in queries {
        let store_path = seen_dir.join(query.store_file());
        if !claimed.insert(store_path.clone()) {
            log::warn!(
                "[{}] duplicate query, {} already has a watcher; skipping",
                query.keyword,
                store_path.display()
            );
            continue;
        }
        let store = JsonSeenStore::open(store_path).await?;
        log::info!(
            "[{}] watching; {} listing(s) already seen ({})",
            query.keyword,
            store.count().await,
            store.path().display()
        );

        let watcher = Watcher::new(
            query,
            Arc::clone(&search),
            Arc::new(store),
            Arc::clone(&notifier),
            config.poller.clone(),
            cancel_rx.clone(),
        );
        handles.push(tokio::spawn(async move {
            if once {
                watcher.run_once().await
            } else {
                watcher.run().await
            }
        }));
    }

    let mut first_error: Option<AppError> = None;
    for result in future::join_all(handles).await {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Watcher task did not finish: {e}");
                Err(AppError::Task(e.to_string()))
            }
        };
        if let Err(error) = outcome {
            if first_error.is_none() {
                first_error = Some(error);
            }
        }
    }
    if let Some(error) = first_error {
        return Err(error);
    }

    log::info!("All watchers stopped");
    Ok(())
}

/// Fetch each query once and print the matches to stdout.
///
/// No store is read or written, so repeated runs report the same listings.
pub async fn run_search(config: &Config, queries: &[SearchQuery]) -> Result<()> {
    if queries.is_empty() {
        return Err(AppError::config("no search queries given"));
    }

    let client = http::create_client(&config.client)?;
    let search = SearchClient::new(&config.client, client)?;

    for query in queries {
        let listings = search.fetch(query).await?;
        if listings.is_empty() {
            log::info!("[{}] no matches", query.keyword);
            continue;
        }
        if queries.len() > 1 {
            println!("** Search for {} **", query.keyword);
        }
        print!("{}", render_report(&listings));
    }
    Ok(())
}
