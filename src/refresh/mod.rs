//! # Refresher
//! Background loop that keeps the [`TopicStore`] current.
//!
//! - Fetches once immediately, then every `interval`.
//! - A failed fetch leaves the store untouched and schedules a retry after
//!   `min(interval, backoff)`.
//! - Fetches are strictly sequential: `refresh_once` takes `&mut self` and the
//!   loop awaits it before scheduling anything else, so two fetches can never
//!   overlap. Manual refresh requests received mid-fetch collapse into a
//!   single follow-up fetch.
//! - A manual request never starts a fetch before [`Refresher::manual_gap`] has
//!   passed since the previous attempt; while failing that is the full backoff.
//! - Status is published on a `watch` channel; the refresher holds the only sender.

pub mod backoff;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::provider::{ProviderError, TopicProvider};
use crate::store::TopicStore;
use crate::topic::Snapshot;

pub use backoff::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSettings {
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(15),
            backoff_base: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl RefreshSettings {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.backoff_base, self.max_backoff)
    }
}

/// Diagnostics view of the refresh loop. Not part of the data contract.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct RefreshStatus {
    pub last_generation: u64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Backoff delay in effect: the base value until a failure grows it.
    pub current_backoff_ms: u64,
    pub consecutive_failures: u32,
    pub total_attempts: u64,
    pub total_failures: u64,
    pub in_flight: bool,
}

/// Result of a single refresh attempt.
#[derive(Debug)]
pub enum RefreshOutcome {
    Published { generation: u64, topics: usize },
    /// Fetch succeeded but a newer snapshot was already installed.
    Stale { generation: u64 },
    Failed(ProviderError),
}

impl RefreshOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, RefreshOutcome::Failed(_))
    }
}

/// Wakes the refresh loop ahead of schedule.
#[derive(Debug, Clone, Default)]
pub struct RefreshTrigger(Arc<Notify>);

impl RefreshTrigger {
    /// Ask for a refresh. Repeated requests before the loop gets to them count once.
    pub fn request(&self) {
        self.0.notify_one();
    }
}

/// Read-only handle given to the HTTP layer.
#[derive(Debug, Clone)]
pub struct RefreshMonitor {
    status: watch::Receiver<RefreshStatus>,
    trigger: RefreshTrigger,
}

impl RefreshMonitor {
    pub fn status(&self) -> RefreshStatus {
        self.status.borrow().clone()
    }

    pub fn request_refresh(&self) {
        self.trigger.request();
    }

    /// Receiver for callers that want to await status changes.
    pub fn subscribe(&self) -> watch::Receiver<RefreshStatus> {
        self.status.clone()
    }
}

pub struct Refresher {
    provider: Arc<dyn TopicProvider>,
    store: Arc<TopicStore>,
    settings: RefreshSettings,
    backoff: Backoff,
    status: watch::Sender<RefreshStatus>,
    trigger: RefreshTrigger,
}

impl Refresher {
    pub fn new(
        provider: Arc<dyn TopicProvider>,
        store: Arc<TopicStore>,
        settings: RefreshSettings,
    ) -> Self {
        let (status, _) = watch::channel(RefreshStatus {
            last_generation: store.generation(),
            current_backoff_ms: millis(settings.backoff_base),
            ..RefreshStatus::default()
        });
        Self {
            provider,
            store,
            backoff: settings.backoff(),
            settings,
            status,
            trigger: RefreshTrigger::default(),
        }
    }

    pub fn monitor(&self) -> RefreshMonitor {
        RefreshMonitor {
            status: self.status.subscribe(),
            trigger: self.trigger.clone(),
        }
    }

    pub fn settings(&self) -> &RefreshSettings {
        &self.settings
    }

    pub fn status(&self) -> RefreshStatus {
        self.status.borrow().clone()
    }

    /// Wait before the next scheduled attempt, given the current failure streak.
    pub fn next_wait(&self) -> Duration {
        let failures = self.status.borrow().consecutive_failures;
        self.backoff.next_wait(self.settings.interval, failures)
    }

    /// Shortest spacing between the end of one attempt and a manually requested one.
    /// While failing this is the whole scheduled wait, so requests cannot skip backoff.
    pub fn manual_gap(&self) -> Duration {
        if self.status.borrow().consecutive_failures > 0 {
            self.next_wait()
        } else {
            self.settings.backoff_base.min(self.settings.interval)
        }
    }

    /// Perform one fetch-and-publish attempt.
    pub async fn refresh_once(&mut self) -> RefreshOutcome {
        let attempt_at = Utc::now();
        self.status.send_modify(|s| {
            s.in_flight = true;
            s.last_attempt_at = Some(attempt_at);
            s.total_attempts += 1;
        });
        counter!("topics_refresh_attempts_total").increment(1);

        let t0 = Instant::now();
        let fetched = match tokio::time::timeout(self.settings.fetch_timeout, self.provider.fetch_all())
            .await
        {
            Ok(Ok(topics)) if topics.is_empty() => Err(ProviderError::Empty),
            Ok(res) => res,
            Err(_) => Err(ProviderError::Timeout(self.settings.fetch_timeout)),
        };
        histogram!("topics_refresh_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let outcome = match fetched {
            Ok(topics) => self.publish(topics),
            Err(e) => self.record_failure(e),
        };
        self.status.send_modify(|s| s.in_flight = false);
        outcome
    }

    fn publish(&mut self, topics: Vec<crate::topic::Topic>) -> RefreshOutcome {
        let generation = self.store.generation() + 1;
        let snapshot = Snapshot::new(generation, Utc::now(), topics);
        let size = snapshot.len();
        let installed = self.store.publish(snapshot);
        let current = self.store.generation();
        let base_ms = millis(self.settings.backoff_base);

        self.status.send_modify(|s| {
            s.last_generation = current;
            s.last_success_at = Some(Utc::now());
            s.last_error = None;
            s.consecutive_failures = 0;
            s.current_backoff_ms = base_ms;
        });
        gauge!("topics_refresh_consecutive_failures").set(0.0);

        if installed {
            gauge!("topics_snapshot_generation").set(generation as f64);
            gauge!("topics_snapshot_size").set(size as f64);
            info!(
                target: "refresh",
                provider = self.provider.name(),
                generation,
                topics = size,
                "snapshot published"
            );
            RefreshOutcome::Published {
                generation,
                topics: size,
            }
        } else {
            warn!(target: "refresh", generation = current, "fetched snapshot was stale");
            RefreshOutcome::Stale {
                generation: current,
            }
        }
    }

    fn record_failure(&mut self, err: ProviderError) -> RefreshOutcome {
        let mut failures = 0;
        let mut backoff = Duration::ZERO;
        let last_error = err.to_string();
        let policy = self.backoff;
        self.status.send_modify(|s| {
            s.consecutive_failures = s.consecutive_failures.saturating_add(1);
            s.total_failures += 1;
            s.last_error = Some(last_error);
            failures = s.consecutive_failures;
            backoff = policy.delay(failures);
            s.current_backoff_ms = millis(backoff);
        });
        counter!("topics_refresh_failures_total").increment(1);
        gauge!("topics_refresh_consecutive_failures").set(f64::from(failures));

        warn!(
            target: "refresh",
            provider = self.provider.name(),
            error = %err,
            consecutive_failures = failures,
            retry_in_ms = backoff.min(self.settings.interval).as_millis() as u64,
            "refresh failed; serving previous snapshot"
        );
        RefreshOutcome::Failed(err)
    }

    /// Run until `shutdown` is cancelled. An in-flight fetch is abandoned on shutdown.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            target: "refresh",
            provider = self.provider.name(),
            interval_secs = self.settings.interval.as_secs(),
            timeout_secs = self.settings.fetch_timeout.as_secs(),
            "refresher started"
        );
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                outcome = self.refresh_once() => {
                    debug!(target: "refresh", ?outcome, "refresh attempt finished");
                }
            }

            if !self.wait_for_next(&shutdown).await {
                break;
            }
        }

        self.status.send_modify(|s| s.in_flight = false);
        info!(target: "refresh", "refresher stopped");
    }

    /// Sleep until the next attempt is due. Returns `false` on shutdown.
    async fn wait_for_next(&self, shutdown: &CancellationToken) -> bool {
        let finished = tokio::time::Instant::now();
        let deadline = finished + self.next_wait();
        let earliest = finished + self.manual_gap();

        tokio::select! {
            biased;
            () = shutdown.cancelled() => return false,
            () = tokio::time::sleep_until(deadline) => return true,
            () = self.trigger.0.notified() => {}
        }

        if tokio::time::Instant::now() < earliest {
            debug!(
                target: "refresh",
                consecutive_failures = self.status.borrow().consecutive_failures,
                "manual refresh deferred until retry gap elapses"
            );
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return false,
                () = tokio::time::sleep_until(earliest) => {}
            }
        } else {
            debug!(target: "refresh", "manual refresh requested");
        }
        true
    }

    /// Spawn the loop as a supervised task.
    pub fn spawn(self) -> RefresherHandle {
        let shutdown = CancellationToken::new();
        let stopped = CancellationToken::new();
        let token = shutdown.clone();
        let guard = stopped.clone().drop_guard();
        let task = tokio::spawn(async move {
            // cancels `stopped` on return and on unwind
            let _guard = guard;
            self.run(token).await;
        });
        RefresherHandle {
            shutdown,
            stopped,
            task,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Owner's handle on a spawned refresher.
pub struct RefresherHandle {
    shutdown: CancellationToken,
    stopped: CancellationToken,
    task: JoinHandle<()>,
}

impl RefresherHandle {
    /// Token that fires once the loop has exited, for any reason.
    pub fn stopped(&self) -> CancellationToken {
        self.stopped.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the loop to stop and wait for it. A panic inside the loop is reported here.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        match self.task.await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                error!(target: "refresh", error = %e, "refresher task panicked");
            }
            Err(e) => {
                warn!(target: "refresh", error = %e, "refresher task was cancelled");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topic::Topic;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a fixed script of responses, then fails.
    struct Scripted {
        script: Mutex<VecDeque<Result<Vec<Topic>, ProviderError>>>,
        delay: Duration,
    }

    impl Scripted {
        fn new(script: Vec<Result<Vec<Topic>, ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl TopicProvider for Scripted {
        async fn fetch_all(&self) -> Result<Vec<Topic>, ProviderError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or(Err(ProviderError::Transport("script exhausted".into())))
        }
        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn refresher(provider: Scripted, settings: RefreshSettings) -> (Refresher, Arc<TopicStore>) {
        let store = Arc::new(TopicStore::new());
        (
            Refresher::new(Arc::new(provider), Arc::clone(&store), settings),
            store,
        )
    }

    #[tokio::test]
    async fn empty_collection_counts_as_failure() {
        let (mut r, store) = refresher(Scripted::new(vec![Ok(vec![])]), RefreshSettings::default());
        let out = r.refresh_once().await;
        assert!(matches!(out, RefreshOutcome::Failed(ProviderError::Empty)));
        assert_eq!(store.generation(), 0);
        assert_eq!(r.status().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_provider_is_abandoned_after_timeout() {
        let mut provider = Scripted::new(vec![Ok(vec![Topic::new("a", "A", 1)])]);
        provider.delay = Duration::from_secs(3600);
        let settings = RefreshSettings {
            fetch_timeout: Duration::from_secs(5),
            ..RefreshSettings::default()
        };
        let (mut r, store) = refresher(provider, settings);

        let out = r.refresh_once().await;
        assert!(matches!(out, RefreshOutcome::Failed(ProviderError::Timeout(_))));
        assert_eq!(store.generation(), 0);
        assert!(!r.status().in_flight);
    }

    #[tokio::test]
    async fn failure_streak_drives_next_wait_and_resets_on_success() {
        let settings = RefreshSettings {
            interval: Duration::from_secs(60),
            backoff_base: Duration::from_secs(2),
            max_backoff: Duration::from_secs(120),
            ..RefreshSettings::default()
        };
        let script = vec![
            Err(ProviderError::Status(502)),
            Err(ProviderError::Status(502)),
            Err(ProviderError::Malformed("bad json".into())),
            Ok(vec![Topic::new("a", "A", 1)]),
        ];
        let (mut r, store) = refresher(Scripted::new(script), settings);

        assert_eq!(r.status().current_backoff_ms, 2_000);
        assert_eq!(r.manual_gap(), Duration::from_secs(2));

        r.refresh_once().await;
        assert_eq!(r.next_wait(), Duration::from_secs(2));
        r.refresh_once().await;
        assert_eq!(r.next_wait(), Duration::from_secs(4));
        assert_eq!(r.manual_gap(), Duration::from_secs(4));
        r.refresh_once().await;
        let st = r.status();
        assert_eq!(st.consecutive_failures, 3);
        assert_eq!(st.current_backoff_ms, 8_000);
        assert_eq!(st.last_error.as_deref(), Some("malformed payload: bad json"));

        let out = r.refresh_once().await;
        assert!(matches!(out, RefreshOutcome::Published { generation: 1, topics: 1 }));
        let st = r.status();
        assert_eq!(st.consecutive_failures, 0);
        assert_eq!(st.total_failures, 3);
        assert_eq!(st.total_attempts, 4);
        assert!(st.last_error.is_none());
        assert_eq!(st.current_backoff_ms, 2_000);
        assert_eq!(r.next_wait(), Duration::from_secs(60));
        assert_eq!(r.manual_gap(), Duration::from_secs(2));
        assert_eq!(store.generation(), 1);
    }

    #[tokio::test]
    async fn failed_fetch_leaves_published_snapshot_untouched() {
        let script = vec![
            Ok(vec![Topic::new("a", "A", 1), Topic::new("b", "B", 2)]),
            Err(ProviderError::Transport("connection reset".into())),
        ];
        let (mut r, store) = refresher(Scripted::new(script), RefreshSettings::default());

        r.refresh_once().await;
        let before = store.current();
        let out = r.refresh_once().await;
        assert!(out.is_failure());
        let after = store.current();

        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.generation, 1);
        assert_eq!(r.status().last_generation, 1);
    }

    #[tokio::test]
    async fn shutdown_stops_loop_and_fires_stopped_token() {
        let (r, _store) = refresher(
            Scripted::new(vec![Ok(vec![Topic::new("a", "A", 1)])]),
            RefreshSettings::default(),
        );
        let handle = r.spawn();
        let stopped = handle.stopped();
        assert!(!stopped.is_cancelled());
        handle.shutdown().await;
        assert!(stopped.is_cancelled());
    }
}
