//! End-to-end poll cycles against a mock search endpoint.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ksl_notify::error::{AppError, Result};
use ksl_notify::models::{
    ClientConfig, Config, NotifyChannel, PollerConfig, SearchQuery, WebhookConfig,
};
use ksl_notify::notify::{Alert, Notify};
use ksl_notify::pipeline::{run_watch, WatchState, Watcher};
use ksl_notify::services::SearchClient;
use ksl_notify::storage::{JsonSeenStore, SeenStore};
use ksl_notify::utils::http;

fn listing_json(id: u64, title: &str) -> String {
    format!(
        r#"{{"id": {id}, "title": "{title}", "price": 100,
            "city": "Provo", "state": "UT", "description": "works fine",
            "displayTime": "2024-03-01T08:00:00Z", "listingType": "standard"}}"#
    )
}

/// A search page the way the site serves it: listings JSON embedded in a
/// script, surrounded by non-JSON properties.
fn search_page(listings: &[String]) -> String {
    format!(
        r#"<html><head><script src="/app.js"></script></head><body>
        <script>
            window.renderSearchSection({{
                listings: [{}],
                displayType: 'grid',
                userData: {{"contactBehindLogin":true}}
            }})
        </script>
        </body></html>"#,
        listings.join(",")
    )
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    fn count(&self) -> usize {
        self.alerts.lock().unwrap().len()
    }

    fn bodies(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|alert| alert.body.clone())
            .collect()
    }
}

#[async_trait]
impl Notify for RecordingNotifier {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, alert: &Alert) -> Result<()> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

fn fast_poller() -> PollerConfig {
    PollerConfig {
        interval_mins: 1,
        backoff_base_secs: 0,
        backoff_cap_secs: 1,
        delivery_attempts: 2,
        delivery_retry_secs: 0,
        failure_alert_threshold: 5,
    }
}

/// Build a watcher pointed at the mock server. The returned sender must be
/// kept alive; dropping it reads as a shutdown signal.
fn watcher(
    server: &MockServer,
    store: Arc<dyn SeenStore>,
    notifier: Arc<RecordingNotifier>,
) -> (Watcher, watch::Sender<bool>) {
    let config = ClientConfig {
        search_url: format!("{}/classifieds/search", server.uri()),
        timeout_secs: 5,
        ..ClientConfig::default()
    };
    let client = http::create_client(&config).unwrap();
    let search = Arc::new(SearchClient::new(&config, client).unwrap());
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let watcher = Watcher::new(
        SearchQuery::new("canon ae-1"),
        search,
        store,
        notifier,
        fast_poller(),
        cancel_rx,
    );
    (watcher, cancel_tx)
}

/// Drive one cycle from Fetching to its settling state, skipping the Idle
/// sleep.
async fn run_cycle(watcher: &mut Watcher) -> WatchState {
    let mut state = WatchState::Fetching;
    for _ in 0..16 {
        state = watcher.step(state).await;
        if matches!(
            state,
            WatchState::Idle | WatchState::Backoff(_) | WatchState::Stopped(_)
        ) {
            return state;
        }
    }
    panic!("cycle did not settle, last state {state:?}");
}

#[tokio::test]
async fn second_cycle_notifies_only_the_new_listing() {
    let server = MockServer::start().await;
    let first_page = search_page(&[listing_json(1, "Item A"), listing_json(2, "Item B")]);
    let second_page = search_page(&[
        listing_json(1, "Item A"),
        listing_json(2, "Item B"),
        listing_json(3, "Item C"),
    ]);

    Mock::given(method("GET"))
        .and(path("/classifieds/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(first_page))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/classifieds/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(second_page))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        JsonSeenStore::open(tmp.path().join("seen.json"))
            .await
            .unwrap(),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let (mut watcher, _cancel) = watcher(&server, store.clone(), notifier.clone());

    let state = run_cycle(&mut watcher).await;
    assert!(matches!(state, WatchState::Idle), "got {state:?}");
    assert_eq!(notifier.count(), 2);
    assert!(store.has("1").await.unwrap());
    assert!(store.has("2").await.unwrap());

    let state = run_cycle(&mut watcher).await;
    assert!(matches!(state, WatchState::Idle), "got {state:?}");
    assert_eq!(notifier.count(), 3, "only the new listing is delivered");
    let bodies = notifier.bodies();
    assert!(bodies[2].contains("/listing/3"), "got {}", bodies[2]);
    assert!(bodies[2].contains("Item C"));
    assert_eq!(store.count().await, 3);
}

#[tokio::test]
async fn crash_before_commit_is_replayed_after_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/classifieds/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(search_page(&[listing_json(1, "Item A")])),
        )
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let store_path = tmp.path().join("seen").join("canon-ae-1.json");

    // first run delivers, then goes down before the commit lands
    {
        let store = Arc::new(JsonSeenStore::open(&store_path).await.unwrap());
        let notifier = Arc::new(RecordingNotifier::default());
        let (mut watcher, _cancel) = watcher(&server, store, notifier.clone());

        let mut state = WatchState::Fetching;
        let mut reached_commit = false;
        for _ in 0..8 {
            state = watcher.step(state).await;
            if matches!(state, WatchState::Committing(_)) {
                reached_commit = true;
                break;
            }
        }
        assert!(reached_commit, "last state {state:?}");
        assert_eq!(notifier.count(), 1);
    }
    assert!(!store_path.exists(), "nothing was committed");

    // restart on the same store file
    let store = Arc::new(JsonSeenStore::open(&store_path).await.unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let (mut watcher, _cancel) = watcher(&server, store.clone(), notifier.clone());

    let state = run_cycle(&mut watcher).await;
    assert!(matches!(state, WatchState::Idle), "got {state:?}");
    assert_eq!(notifier.count(), 1, "listing is delivered again");
    assert_eq!(store.count().await, 1, "exactly one record after replay");
}

#[tokio::test]
async fn transient_source_failures_back_off_and_recover() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/classifieds/search"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/classifieds/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(search_page(&[listing_json(1, "Item A")])),
        )
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        JsonSeenStore::open(tmp.path().join("seen.json"))
            .await
            .unwrap(),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let (mut watcher, _cancel) = watcher(&server, store.clone(), notifier.clone());

    let mut state = WatchState::Fetching;
    let mut backoffs = 0;
    for _ in 0..32 {
        state = watcher.step(state).await;
        match &state {
            WatchState::Backoff(error) => {
                assert!(error.is_transient());
                backoffs += 1;
            }
            WatchState::Idle => break,
            WatchState::Stopped(reason) => panic!("loop stopped: {reason:?}"),
            _ => {}
        }
    }

    assert!(matches!(state, WatchState::Idle), "got {state:?}");
    assert_eq!(backoffs, 2);
    assert_eq!(notifier.count(), 1);
    assert!(store.has("1").await.unwrap());
}

#[tokio::test]
async fn run_once_skips_seen_listings_across_restarts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/classifieds/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(search_page(&[
            listing_json(1, "Item A"),
            listing_json(2, "Item B"),
        ])))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let store_path = tmp.path().join("seen.json");

    let store = Arc::new(JsonSeenStore::open(&store_path).await.unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let (first, _cancel) = watcher(&server, store, notifier.clone());
    first.run_once().await.unwrap();
    assert_eq!(notifier.count(), 2);

    // fresh process over the same file sees nothing new
    let store = Arc::new(JsonSeenStore::open(&store_path).await.unwrap());
    let notifier = Arc::new(RecordingNotifier::default());
    let (second, _cancel) = watcher(&server, store.clone(), notifier.clone());
    second.run_once().await.unwrap();
    assert_eq!(notifier.count(), 0);
    assert_eq!(store.count().await, 2);
}

#[tokio::test]
async fn duplicate_query_terms_collapse_to_one_watcher() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/classifieds/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(search_page(&[listing_json(1, "Item A")])),
        )
        .mount(&server)
        .await;
    // one listing, one alert; a second watcher over the same store would
    // deliver it twice
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.client.search_url = format!("{}/classifieds/search", server.uri());
    config.client.timeout_secs = 5;
    config.poller = fast_poller();
    config.notifier.channel = NotifyChannel::Webhook;
    config.notifier.webhook = Some(WebhookConfig {
        url: format!("{}/hook", server.uri()),
    });

    let queries = vec![SearchQuery::new("bike"), SearchQuery::new("bike")];
    run_watch(&config, tmp.path(), queries, true).await.unwrap();

    let stores: Vec<_> = std::fs::read_dir(tmp.path().join("seen"))
        .unwrap()
        .collect();
    assert_eq!(stores.len(), 1, "one store file for the duplicated term");
}

#[tokio::test]
async fn rejected_query_halts_instead_of_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/classifieds/search"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let tmp = TempDir::new().unwrap();
    let store = Arc::new(
        JsonSeenStore::open(tmp.path().join("seen.json"))
            .await
            .unwrap(),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let (watcher, _cancel) = watcher(&server, store, notifier.clone());

    let result = watcher.run_once().await;
    assert!(matches!(result, Err(AppError::SourceRejected(_))));
    assert_eq!(notifier.count(), 0);
}
