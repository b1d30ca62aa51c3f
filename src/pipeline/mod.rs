//! Pipeline entry points for notifier operations.
//!
//! - `run_watch`: Poll the classifieds and notify on new listings
//! - `run_search`: One-shot search printed to stdout
//! - `new_listings`: Diff a fetched snapshot against the seen store
//! - `Watcher`: The per-query poll loop state machine

pub mod diff;
pub mod run;
pub mod watch;

pub use diff::new_listings;
pub use run::{run_search, run_watch};
pub use watch::{Backoff, StopReason, WatchState, Watcher};
