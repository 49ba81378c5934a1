//! In-process revalidation transport.
//!
//! # Responsibilities
//! - Collapse messages sharing a dedupe key inside the window
//! - Run at most one job per group key at a time
//! - Bound total concurrency with a worker permit pool
//! - Retry failed revalidations with backoff
//!
//! # Design Decisions
//! - Bounded channel: a full queue rejects instead of blocking the request path
//! - A rejected message releases its dedupe slot so a later read can retry
//! - Each busy group keeps a FIFO backlog; only a group's head job waits for a
//!   permit, so a hot group never holds more than one

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, Semaphore};

use crate::config::schema::QueueConfig;
use crate::observability::metrics;
use crate::queue::{QueueError, QueueMessage, RevalidationQueue, Revalidator};
use crate::resilience::{retry, RetryPolicy};

#[derive(Debug)]
pub struct MemoryQueue {
    tx: mpsc::Sender<QueueMessage>,
    seen: Arc<DashMap<String, Instant>>,
    window: Duration,
    capacity: usize,
}

impl MemoryQueue {
    /// Create the queue and spawn its worker. The worker stops on `shutdown`.
    pub fn start(
        config: &QueueConfig,
        policy: RetryPolicy,
        revalidator: Arc<dyn Revalidator>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let capacity = config.capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let worker = Worker {
            rx,
            done_tx,
            done_rx,
            revalidator,
            policy,
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            backlogs: HashMap::new(),
        };
        tokio::spawn(worker.run(shutdown));

        tracing::info!(
            workers = config.workers,
            capacity,
            dedupe_window_secs = config.dedupe_window_secs,
            "Revalidation queue started"
        );

        Self {
            tx,
            seen: Arc::new(DashMap::new()),
            window: Duration::from_secs(config.dedupe_window_secs),
            capacity,
        }
    }

    /// Claim the dedupe slot for `key`. False when it was claimed inside the window.
    fn admit(&self, key: &str) -> bool {
        let now = Instant::now();
        if self.seen.len() > self.capacity * 4 {
            self.seen.retain(|_, at| now.duration_since(*at) < self.window);
        }
        match self.seen.entry(key.to_string()) {
            Entry::Occupied(mut slot) => {
                if now.duration_since(*slot.get()) < self.window {
                    false
                } else {
                    slot.insert(now);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }
}

#[async_trait]
impl RevalidationQueue for MemoryQueue {
    async fn send(&self, message: QueueMessage) -> Result<(), QueueError> {
        if !self.admit(&message.dedupe_key) {
            metrics::record_revalidation("deduplicated");
            tracing::debug!(dedupe_key = %message.dedupe_key, "Duplicate revalidation dropped");
            return Ok(());
        }

        match self.tx.try_send(message) {
            Ok(()) => {
                metrics::record_revalidation("enqueued");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(message)) => {
                self.seen.remove(&message.dedupe_key);
                Err(QueueError::Rejected("queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(message)) => {
                self.seen.remove(&message.dedupe_key);
                Err(QueueError::Transport("revalidation worker stopped".to_string()))
            }
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct Worker {
    rx: mpsc::Receiver<QueueMessage>,
    done_tx: mpsc::UnboundedSender<String>,
    done_rx: mpsc::UnboundedReceiver<String>,
    revalidator: Arc<dyn Revalidator>,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,

    /// Groups with a job running, and the messages queued behind it.
    backlogs: HashMap<String, VecDeque<QueueMessage>>,
}

impl Worker {
    async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Revalidation worker stopping");
                    break;
                }
                message = self.rx.recv() => {
                    let Some(message) = message else { break };
                    match self.backlogs.get_mut(&message.group_key) {
                        Some(backlog) => backlog.push_back(message),
                        None => {
                            self.backlogs.insert(message.group_key.clone(), VecDeque::new());
                            self.spawn_job(message);
                        }
                    }
                }
                Some(group) = self.done_rx.recv() => {
                    let next = self.backlogs.get_mut(&group).and_then(VecDeque::pop_front);
                    match next {
                        Some(message) => self.spawn_job(message),
                        None => {
                            self.backlogs.remove(&group);
                        }
                    }
                }
            }
        }
    }

    /// Run `message` once a permit is free, then report its group as done.
    fn spawn_job(&self, message: QueueMessage) {
        let permits = Arc::clone(&self.permits);
        let revalidator = Arc::clone(&self.revalidator);
        let done = self.done_tx.clone();
        let policy = self.policy;

        tokio::spawn(async move {
            if let Ok(_permit) = permits.acquire_owned().await {
                process(revalidator.as_ref(), policy, &message).await;
            }
            let _ = done.send(message.group_key);
        });
    }
}

async fn process(revalidator: &dyn Revalidator, policy: RetryPolicy, message: &QueueMessage) {
    match retry(policy, "revalidate", |_| revalidator.revalidate(message)).await {
        Ok(()) => {
            metrics::record_revalidation("succeeded");
            tracing::debug!(url = %message.target.url, "Revalidation complete");
        }
        Err(e) => {
            metrics::record_revalidation("failed");
            tracing::warn!(url = %message.target.url, error = %e, "Revalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingRevalidator {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        failures_left: AtomicUsize,
        delay_ms: u64,
    }

    #[async_trait]
    impl Revalidator for CountingRevalidator {
        async fn revalidate(&self, _message: &QueueMessage) -> Result<(), QueueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            let failed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(QueueError::Revalidation("boom".into()))
            } else {
                Ok(())
            }
        }
    }

    fn config() -> QueueConfig {
        QueueConfig {
            dedupe_window_secs: 60,
            workers: 4,
            capacity: 16,
            ..QueueConfig::default()
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            max_delay_ms: 2,
        }
    }

    async fn wait_for(counter: &AtomicUsize, expected: usize) {
        for _ in 0..200 {
            if counter.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn message(dedupe: &str, group: &str) -> QueueMessage {
        QueueMessage {
            target: crate::queue::RevalidationTarget {
                host: "site.test".into(),
                url: format!("/{}", group),
            },
            dedupe_key: dedupe.into(),
            group_key: group.into(),
        }
    }

    #[tokio::test]
    async fn test_same_dedupe_key_renders_once() {
        let shutdown = Shutdown::new();
        let revalidator = Arc::new(CountingRevalidator::default());
        let queue = MemoryQueue::start(&config(), fast_policy(), revalidator.clone(), shutdown.subscribe());

        queue.send(message("/a:1", "/a")).await.unwrap();
        queue.send(message("/a:1", "/a")).await.unwrap();

        wait_for(&revalidator.calls, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(revalidator.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_group_runs_one_at_a_time() {
        let shutdown = Shutdown::new();
        let revalidator = Arc::new(CountingRevalidator {
            delay_ms: 20,
            ..Default::default()
        });
        let queue = MemoryQueue::start(&config(), fast_policy(), revalidator.clone(), shutdown.subscribe());

        for i in 0..3 {
            queue.send(message(&format!("/g:{}", i), "/g")).await.unwrap();
        }

        wait_for(&revalidator.calls, 3).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(revalidator.calls.load(Ordering::SeqCst), 3);
        assert_eq!(revalidator.max_in_flight.load(Ordering::SeqCst), 1);
    }

    /// Records completion order; `/slow` jobs take longer than the rest.
    #[derive(Debug, Default)]
    struct OrderRevalidator {
        finished: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Revalidator for OrderRevalidator {
        async fn revalidate(&self, message: &QueueMessage) -> Result<(), QueueError> {
            let delay = if message.group_key == "/slow" { 30 } else { 1 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            self.finished.lock().unwrap().push(message.group_key.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_busy_group_does_not_starve_others() {
        let shutdown = Shutdown::new();
        let revalidator = Arc::new(OrderRevalidator::default());
        let config = QueueConfig {
            workers: 2,
            ..config()
        };
        let queue = MemoryQueue::start(&config, fast_policy(), revalidator.clone(), shutdown.subscribe());

        for i in 0..4 {
            queue.send(message(&format!("/slow:{}", i), "/slow")).await.unwrap();
        }
        queue.send(message("/fast:1", "/fast")).await.unwrap();

        for _ in 0..200 {
            if revalidator.finished.lock().unwrap().len() == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let finished = revalidator.finished.lock().unwrap().clone();
        assert_eq!(finished.len(), 5);
        let fast_at = finished.iter().position(|g| g == "/fast").unwrap();
        assert!(fast_at <= 1, "fast group finished at {} in {:?}", fast_at, finished);
    }

    #[tokio::test]
    async fn test_failures_are_retried() {
        let shutdown = Shutdown::new();
        let revalidator = Arc::new(CountingRevalidator {
            failures_left: AtomicUsize::new(2),
            ..Default::default()
        });
        let queue = MemoryQueue::start(&config(), fast_policy(), revalidator.clone(), shutdown.subscribe());

        queue.send(message("/r:1", "/r")).await.unwrap();
        wait_for(&revalidator.calls, 3).await;
        assert_eq!(revalidator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dedupe_window_expires() {
        let shutdown = Shutdown::new();
        let revalidator = Arc::new(CountingRevalidator::default());
        let config = QueueConfig {
            dedupe_window_secs: 0,
            ..config()
        };
        let queue = MemoryQueue::start(&config, fast_policy(), revalidator.clone(), shutdown.subscribe());

        queue.send(message("/w:1", "/w")).await.unwrap();
        queue.send(message("/w:1", "/w")).await.unwrap();
        wait_for(&revalidator.calls, 2).await;
        assert_eq!(revalidator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stopped_worker_rejects() {
        let shutdown = Shutdown::new();
        let revalidator = Arc::new(CountingRevalidator::default());
        let queue = MemoryQueue::start(&config(), fast_policy(), revalidator, shutdown.subscribe());

        shutdown.trigger();
        let mut result = Ok(());
        for i in 0..100 {
            result = queue.send(message(&format!("/s:{}", i), "/s")).await;
            if result.is_err() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(matches!(result, Err(QueueError::Transport(_))));
    }
}
