//! Poll loop controller.
//!
//! One [`Watcher`] owns one query, one seen store, and one notification
//! channel, and loops through an explicit state machine:
//!
//! ```text
//! Fetching -> Diffing -> Notifying -> Committing -> Idle -> Fetching ...
//! ```
//!
//! Transient failures (source down, store unreachable, delivery timeouts)
//! detour through `Backoff` with exponentially growing, capped delays and
//! never terminate the loop. Permanent failures (rejected query, malformed
//! response) and cancellation end in `Stopped`. The states are a public
//! enum and [`Watcher::step`] is the single transition function, so delay
//! bounds and cancellation behavior are testable without running a loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{AppError, Result};
use crate::models::{Listing, PollerConfig, SearchQuery};
use crate::notify::{Alert, Notify};
use crate::pipeline::diff::new_listings;
use crate::services::SearchClient;
use crate::storage::{SeenRecord, SeenStore};

/// States of the poll loop.
#[derive(Debug)]
pub enum WatchState {
    /// Waiting for the next tick
    Idle,
    /// Requesting the search page
    Fetching,
    /// Separating new listings from seen ones
    Diffing(Vec<Listing>),
    /// Delivering one alert per new listing
    Notifying { fetched: usize, items: Vec<Listing> },
    /// Persisting the cycle's outcome
    Committing(CycleOutcome),
    /// Sleeping off a transient failure
    Backoff(AppError),
    /// Loop has ended
    Stopped(StopReason),
}

/// Why a watcher stopped.
#[derive(Debug)]
pub enum StopReason {
    /// External shutdown signal
    Cancelled,
    /// Permanent error; retrying would be useless
    Fatal(AppError),
}

/// Accounting for one cycle, carried into the commit.
#[derive(Debug, Default)]
pub struct CycleOutcome {
    /// Listings in the fetched snapshot
    pub fetched: usize,
    /// Listings not yet in the store
    pub fresh: usize,
    /// Ids to commit: delivered ones plus permanently rejected ones
    pub records: Vec<SeenRecord>,
    /// Alerts that went out
    pub delivered: usize,
    /// Alerts the channel permanently refused
    pub rejected: usize,
    /// Alerts that failed transiently after all attempts; retried next
    /// cycle because their ids are not committed
    pub undelivered: usize,
}

/// Exponential backoff schedule.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            next: base.min(cap),
        }
    }

    /// Current delay; doubles for next time, up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(self.cap);
        delay
    }

    /// Back to the base delay, after a successful cycle.
    pub fn reset(&mut self) {
        self.next = self.base.min(self.cap);
    }
}

/// Outcome of delivering one alert, after retries.
enum Delivery {
    Delivered,
    Rejected(AppError),
    Undelivered(AppError),
}

/// Poll loop controller for a single query.
pub struct Watcher {
    query: SearchQuery,
    client: Arc<SearchClient>,
    store: Arc<dyn SeenStore>,
    notifier: Arc<dyn Notify>,
    poller: PollerConfig,
    backoff: Backoff,
    failure_streak: u32,
    cancel: watch::Receiver<bool>,
}

impl Watcher {
    pub fn new(
        query: SearchQuery,
        client: Arc<SearchClient>,
        store: Arc<dyn SeenStore>,
        notifier: Arc<dyn Notify>,
        poller: PollerConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let backoff = Backoff::new(
            Duration::from_secs(poller.backoff_base_secs),
            Duration::from_secs(poller.backoff_cap_secs),
        );
        Self {
            query,
            client,
            store,
            notifier,
            poller,
            backoff,
            failure_streak: 0,
            cancel,
        }
    }

    /// Run until cancelled or a permanent error halts the loop.
    ///
    /// The first fetch fires immediately; `Idle` paces every later cycle.
    pub async fn run(mut self) -> Result<()> {
        let mut state = WatchState::Fetching;
        loop {
            state = match self.step(state).await {
                WatchState::Stopped(StopReason::Cancelled) => {
                    log::info!("[{}] watcher stopped", self.query.keyword);
                    return Ok(());
                }
                WatchState::Stopped(StopReason::Fatal(error)) => {
                    log::error!("[{}] watcher halted: {error}", self.query.keyword);
                    return Err(error);
                }
                next => next,
            };
        }
    }

    /// Run exactly one cycle and return, for `--once` and cron use.
    ///
    /// Errors the loop would have slept off are returned instead.
    pub async fn run_once(mut self) -> Result<()> {
        let mut state = WatchState::Fetching;
        loop {
            state = match self.step(state).await {
                WatchState::Idle | WatchState::Stopped(StopReason::Cancelled) => return Ok(()),
                WatchState::Backoff(error) | WatchState::Stopped(StopReason::Fatal(error)) => {
                    return Err(error);
                }
                next => next,
            };
        }
    }

    /// Advance the state machine by one transition.
    pub async fn step(&mut self, state: WatchState) -> WatchState {
        match state {
            WatchState::Idle => self.idle().await,
            WatchState::Fetching => self.fetch().await,
            WatchState::Diffing(fetched) => self.diff(fetched).await,
            WatchState::Notifying { fetched, items } => self.notify(fetched, items).await,
            WatchState::Committing(outcome) => self.commit(outcome).await,
            WatchState::Backoff(error) => self.back_off(error).await,
            WatchState::Stopped(reason) => WatchState::Stopped(reason),
        }
    }

    /// A completed cycle clears the failure streak and resets backoff,
    /// then the loop sleeps one interval.
    async fn idle(&mut self) -> WatchState {
        self.backoff.reset();
        self.failure_streak = 0;
        let interval = Duration::from_secs(self.poller.interval_mins.saturating_mul(60));
        tokio::select! {
            _ = cancel_signal(&mut self.cancel) => WatchState::Stopped(StopReason::Cancelled),
            _ = tokio::time::sleep(interval) => WatchState::Fetching,
        }
    }

    async fn fetch(&mut self) -> WatchState {
        if self.is_cancelled() {
            return WatchState::Stopped(StopReason::Cancelled);
        }
        log::debug!("[{}] fetching search page", self.query.keyword);
        match self.client.fetch(&self.query).await {
            Ok(listings) => WatchState::Diffing(listings),
            Err(e) if e.is_transient() => WatchState::Backoff(e),
            Err(e) => WatchState::Stopped(StopReason::Fatal(e)),
        }
    }

    async fn diff(&mut self, fetched: Vec<Listing>) -> WatchState {
        match new_listings(&fetched, self.store.as_ref()).await {
            Ok(items) => WatchState::Notifying {
                fetched: fetched.len(),
                items,
            },
            Err(e) if e.is_transient() => WatchState::Backoff(e),
            Err(e) => WatchState::Stopped(StopReason::Fatal(e)),
        }
    }

    /// Deliver one alert per new listing.
    ///
    /// Delivered and permanently rejected ids both go into the outcome's
    /// records; transiently undelivered ids stay out so the next cycle
    /// picks them up again. Cancellation is honored before the first
    /// delivery; once delivery starts, the cycle runs through the commit.
    async fn notify(&mut self, fetched: usize, items: Vec<Listing>) -> WatchState {
        if self.is_cancelled() {
            return WatchState::Stopped(StopReason::Cancelled);
        }
        let mut outcome = CycleOutcome {
            fetched,
            fresh: items.len(),
            ..CycleOutcome::default()
        };
        if !items.is_empty() {
            log::info!("[{}] {} new listing(s)", self.query.keyword, items.len());
        }

        for listing in items {
            let alert = Alert::for_listing(&self.query.keyword, &listing);
            match self.deliver(&alert).await {
                Delivery::Delivered => {
                    outcome.delivered += 1;
                    outcome
                        .records
                        .push(SeenRecord::new(listing.id, listing.fetched_at));
                }
                Delivery::Rejected(error) => {
                    log::warn!(
                        "[{}] {} rejected permanently, will not retry: {error}",
                        self.query.keyword,
                        listing.id
                    );
                    outcome.rejected += 1;
                    outcome
                        .records
                        .push(SeenRecord::new(listing.id, listing.fetched_at));
                }
                Delivery::Undelivered(error) => {
                    log::warn!(
                        "[{}] {} undelivered, retrying next cycle: {error}",
                        self.query.keyword,
                        listing.id
                    );
                    outcome.undelivered += 1;
                }
            }
        }
        WatchState::Committing(outcome)
    }

    /// The only state that writes durable state: one batch insert.
    async fn commit(&mut self, outcome: CycleOutcome) -> WatchState {
        if let Err(error) = self.store.record_all(&outcome.records).await {
            return WatchState::Backoff(error);
        }
        log::info!(
            "[{}] cycle complete: fetched={} new={} delivered={} rejected={} undelivered={}",
            self.query.keyword,
            outcome.fetched,
            outcome.fresh,
            outcome.delivered,
            outcome.rejected,
            outcome.undelivered
        );
        WatchState::Idle
    }

    async fn back_off(&mut self, error: AppError) -> WatchState {
        self.failure_streak += 1;
        let delay = self.backoff.next_delay();
        log::warn!(
            "[{}] cycle failed: {error}; retrying in {}s (streak {})",
            self.query.keyword,
            delay.as_secs(),
            self.failure_streak
        );
        if self.failure_streak == self.poller.failure_alert_threshold {
            self.alert_operator(&error).await;
        }
        tokio::select! {
            _ = cancel_signal(&mut self.cancel) => WatchState::Stopped(StopReason::Cancelled),
            _ = tokio::time::sleep(delay) => WatchState::Fetching,
        }
    }

    /// Send one alert with bounded retries on transient failure.
    async fn deliver(&self, alert: &Alert) -> Delivery {
        let attempts = self.poller.delivery_attempts.max(1);
        let retry_delay = Duration::from_secs(self.poller.delivery_retry_secs);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.notifier.send(alert).await {
                Ok(()) => return Delivery::Delivered,
                Err(error @ AppError::DeliveryRejected { .. }) => {
                    return Delivery::Rejected(error);
                }
                Err(error) => {
                    log::warn!(
                        "[{}] delivery attempt {attempt}/{attempts} failed: {error}",
                        self.query.keyword
                    );
                    last_error = Some(error);
                    if attempt < attempts {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }
        Delivery::Undelivered(last_error.unwrap_or_else(|| {
            AppError::delivery_failed(self.notifier.channel(), "no delivery attempts made")
        }))
    }

    /// Best-effort operator alert after a failure streak; never fails the
    /// loop.
    async fn alert_operator(&self, error: &AppError) {
        log::warn!(
            "[{}] {} consecutive failed cycles, alerting operator",
            self.query.keyword,
            self.failure_streak
        );
        let alert = Alert::for_failure_streak(&self.query.keyword, self.failure_streak, error);
        if let Err(e) = self.notifier.send(&alert).await {
            log::warn!(
                "[{}] failure alert could not be delivered: {e}",
                self.query.keyword
            );
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}

/// Resolves when the stop flag flips (or its sender goes away).
async fn cancel_signal(cancel: &mut watch::Receiver<bool>) {
    while !*cancel.borrow_and_update() {
        if cancel.changed().await.is_err() {
            break;
        }
    }
}
