//! Batched ingestion client
//!
//! The [`IngestionClient`] queues events in memory and sends them in bulk when:
//! - Batch size threshold is reached
//! - The flush interval timer fires
//! - [`IngestionClient::flush`] or [`IngestionClient::shutdown`] is called
//!
//! `enqueue` never blocks on the network and never fails. Failed batches are
//! requeued at the head of the queue as long as the backlog cap allows it and
//! dropped otherwise. The queue is not durable.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::types::Event;

use super::client::{CollectorClient, EventSink};
use super::events::EventRecord;

/// Queue limits for an [`IngestionClient`]
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Events per bulk request; reaching it schedules a flush
    pub batch_size: usize,
    /// Timer period for flushing partial batches
    pub flush_interval: Duration,
    /// Queue length a failed batch may be requeued into
    pub max_backlog: usize,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.ingest.batch_size,
            flush_interval: Duration::from_secs(config.ingest.flush_interval_secs),
            max_backlog: config.ingest.max_backlog,
        }
    }
}

/// Publishing statistics
#[derive(Debug, Default, Clone)]
pub struct PublishStats {
    /// Total events the backend appended
    pub events_sent: usize,
    /// Total events the backend quarantined
    pub events_rejected: usize,
    /// Events discarded after a failed send
    pub events_dropped: usize,
    /// Failed batches put back on the queue
    pub batches_requeued: usize,
    /// Number of API calls made
    pub api_calls: usize,
    /// Number of failed API calls
    pub api_failures: usize,
}

/// What a single flush did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued
    Empty,
    /// Batch of this many events delivered
    Sent(usize),
    /// Send failed; the batch is back at the head of the queue
    Requeued(usize),
    /// Send failed; the batch was discarded
    Dropped(usize),
}

struct Inner {
    sink: Arc<dyn EventSink>,
    options: IngestOptions,
    queue: Mutex<VecDeque<Event>>,
    flush_scheduled: AtomicBool,
    stats: Mutex<PublishStats>,
}

/// Lock ignoring poisoning; the guarded data stays consistent across panics
/// because every critical section is a plain push, drain or counter bump.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Inner {
    fn take_batch(&self) -> Vec<Event> {
        let mut queue = lock(&self.queue);
        self.flush_scheduled.store(false, Ordering::SeqCst);
        let n = queue.len().min(self.options.batch_size);
        queue.drain(..n).collect()
    }

    async fn flush_once(&self) -> FlushOutcome {
        let batch = self.take_batch();
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }

        let count = batch.len();
        let records: Vec<EventRecord> = batch.iter().map(EventRecord::from_event).collect();

        lock(&self.stats).api_calls += 1;

        match self.sink.send(&records).await {
            Ok(response) => {
                let mut stats = lock(&self.stats);
                stats.events_sent += response.successful_rows;
                stats.events_rejected += response.quarantined_rows;
                tracing::debug!(
                    events = count,
                    accepted = response.successful_rows,
                    quarantined = response.quarantined_rows,
                    "Published event batch"
                );
                FlushOutcome::Sent(count)
            }
            Err(e) => {
                lock(&self.stats).api_failures += 1;

                if !e.is_transient() {
                    lock(&self.stats).events_dropped += count;
                    tracing::warn!(
                        events = count,
                        error = %e,
                        "Backend rejected event batch, dropping"
                    );
                    return FlushOutcome::Dropped(count);
                }

                let mut queue = lock(&self.queue);
                if queue.len() + count <= self.options.max_backlog {
                    for event in batch.into_iter().rev() {
                        queue.push_front(event);
                    }
                    drop(queue);
                    lock(&self.stats).batches_requeued += 1;
                    tracing::warn!(
                        events = count,
                        error = %e,
                        "Failed to publish event batch, requeued"
                    );
                    FlushOutcome::Requeued(count)
                } else {
                    let backlog = queue.len();
                    drop(queue);
                    lock(&self.stats).events_dropped += count;
                    tracing::warn!(
                        events = count,
                        backlog,
                        max_backlog = self.options.max_backlog,
                        error = %e,
                        "Failed to publish event batch, backlog full, dropping"
                    );
                    FlushOutcome::Dropped(count)
                }
            }
        }
    }

    /// Flush batch after batch until the queue is empty or a send fails.
    ///
    /// Returns the number of events delivered. Permanently rejected batches
    /// do not stop the drain; a requeue does, since the backend is down.
    async fn drain(&self) -> usize {
        let mut delivered = 0;
        loop {
            match self.flush_once().await {
                FlushOutcome::Sent(n) => delivered += n,
                FlushOutcome::Dropped(_) => continue,
                FlushOutcome::Empty | FlushOutcome::Requeued(_) => return delivered,
            }
        }
    }
}

/// In-process event queue with size- and time-based flushing
pub struct IngestionClient {
    inner: Arc<Inner>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl IngestionClient {
    /// Create an ingestion client from configuration
    ///
    /// Returns None (with a warning) if writes are not configured or the
    /// batch settings are invalid. Telemetry is optional; the host keeps running.
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.backend.can_write() {
            tracing::warn!("Event ingestion disabled: backend.base_url or write_token not set");
            return None;
        }
        if let Err(e) = config.ingest.validate() {
            tracing::warn!(error = %e, "Event ingestion disabled");
            return None;
        }

        match CollectorClient::new(&config.backend) {
            Ok(client) => Some(Self::with_sink(
                Arc::new(client),
                IngestOptions::from_config(config),
            )),
            Err(e) => {
                tracing::warn!(error = %e, "Event ingestion disabled");
                None
            }
        }
    }

    /// Create an ingestion client over any sink
    pub fn with_sink(sink: Arc<dyn EventSink>, options: IngestOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                sink,
                options,
                queue: Mutex::new(VecDeque::new()),
                flush_scheduled: AtomicBool::new(false),
                stats: Mutex::new(PublishStats::default()),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Start the background flush timer
    ///
    /// Must be called from within a Tokio runtime. Calling it twice is a no-op.
    pub fn start(&self) {
        let mut timer = lock(&self.timer);
        if timer.is_some() {
            return;
        }

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!("No async runtime; ingestion timer not started");
                return;
            }
        };

        let period = self.inner.options.flush_interval;
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);

        *timer = Some(handle.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let delivered = inner.drain().await;
                if delivered > 0 {
                    tracing::debug!(delivered, "Timer flush drained queue");
                }
            }
        }));
    }

    /// Queue an event for publishing
    ///
    /// Never blocks and never fails. Reaching the batch size schedules a
    /// flush on the runtime; the caller does not wait for it.
    pub fn enqueue(&self, event: Event) {
        let len = {
            let mut queue = lock(&self.inner.queue);
            queue.push_back(event);
            queue.len()
        };

        if len < self.inner.options.batch_size {
            return;
        }
        if self.inner.flush_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    inner.flush_once().await;
                });
            }
            Err(_) => {
                self.inner.flush_scheduled.store(false, Ordering::SeqCst);
                tracing::debug!("No async runtime; batch left for the next flush");
            }
        }
    }

    /// Send up to one batch from the head of the queue
    pub async fn flush(&self) -> FlushOutcome {
        self.inner.flush_once().await
    }

    /// Stop the timer and drain the queue, best effort
    ///
    /// Returns the number of events delivered. Stops early if a batch had to
    /// be requeued, since the backend is evidently unavailable.
    pub async fn shutdown(&self) -> usize {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }

        let delivered = self.inner.drain().await;
        if self.has_pending() {
            tracing::warn!(
                pending = self.pending_count(),
                "Shutdown flush failed; pending events lost"
            );
        }
        delivered
    }

    /// Get current publishing statistics
    pub fn stats(&self) -> PublishStats {
        lock(&self.inner.stats).clone()
    }

    /// Get number of queued events
    pub fn pending_count(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Check if there are any queued events
    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    pub fn options(&self) -> &IngestOptions {
        &self.inner.options
    }
}

impl Drop for IngestionClient {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::events::EventsResponse;
    use crate::error::{Error, Result};
    use crate::types::EventKind;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Records every batch; fails while `failing` is set.
    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<EventRecord>>>,
        failing: AtomicBool,
        permanent: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl RecordingSink {
        fn failing() -> Self {
            let sink = Self::default();
            sink.failing.store(true, Ordering::SeqCst);
            sink
        }

        fn batch_sizes(&self) -> Vec<usize> {
            lock(&self.batches).iter().map(Vec::len).collect()
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send(&self, records: &[EventRecord]) -> Result<EventsResponse> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            lock(&self.batches).push(records.to_vec());
            if self.permanent.load(Ordering::SeqCst) {
                return Err(Error::Upstream {
                    status: 400,
                    message: "bad row".to_string(),
                });
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Upstream {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
            Ok(EventsResponse {
                successful_rows: records.len(),
                quarantined_rows: 0,
            })
        }
    }

    fn options(batch_size: usize, max_backlog: usize) -> IngestOptions {
        IngestOptions {
            batch_size,
            flush_interval: Duration::from_secs(5),
            max_backlog,
        }
    }

    fn event(n: usize) -> Event {
        Event::builder(EventKind::SearchQuery)
            .query(format!("query {}", n))
            .build()
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_below_batch_size_does_not_flush() {
        let sink = Arc::new(RecordingSink::default());
        let client = IngestionClient::with_sink(sink.clone(), options(5, 100));

        for i in 0..4 {
            client.enqueue(event(i));
        }
        settle().await;

        assert_eq!(client.pending_count(), 4);
        assert!(sink.batch_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_batch_size_triggers_exactly_one_flush() {
        let sink = Arc::new(RecordingSink::default());
        let client = IngestionClient::with_sink(sink.clone(), options(5, 100));

        for i in 0..7 {
            client.enqueue(event(i));
        }
        settle().await;

        assert_eq!(sink.batch_sizes(), vec![5]);
        assert_eq!(client.pending_count(), 2);

        let sent = lock(&sink.batches)[0].clone();
        let queries: Vec<&str> = sent.iter().filter_map(|r| r.query.as_deref()).collect();
        assert_eq!(queries, vec!["query 0", "query 1", "query 2", "query 3", "query 4"]);
        assert_eq!(client.stats().events_sent, 5);
    }

    #[tokio::test]
    async fn test_failed_flush_requeues_under_cap() {
        let sink = Arc::new(RecordingSink::failing());
        let client = IngestionClient::with_sink(sink.clone(), options(10, 20));

        for i in 0..4 {
            client.enqueue(event(i));
        }
        let outcome = client.flush().await;

        assert_eq!(outcome, FlushOutcome::Requeued(4));
        assert_eq!(client.pending_count(), 4);
        assert_eq!(client.stats().batches_requeued, 1);

        // Order survives the requeue
        sink.failing.store(false, Ordering::SeqCst);
        assert_eq!(client.flush().await, FlushOutcome::Sent(4));
        let retried = lock(&sink.batches)[1].clone();
        assert_eq!(retried[0].query.as_deref(), Some("query 0"));
        assert_eq!(retried[3].query.as_deref(), Some("query 3"));
    }

    #[tokio::test]
    async fn test_failed_flush_drops_over_cap() {
        let gate = Arc::new(Notify::new());
        let sink = Arc::new(RecordingSink {
            gate: Some(gate.clone()),
            ..RecordingSink::failing()
        });
        let client = Arc::new(IngestionClient::with_sink(sink.clone(), options(10, 4)));

        client.enqueue(event(0));
        client.enqueue(event(1));

        let flushing = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.flush().await })
        };
        settle().await;
        assert_eq!(client.pending_count(), 0);

        // New traffic arrives while the batch is in flight
        for i in 2..5 {
            client.enqueue(event(i));
        }
        gate.notify_one();

        assert_eq!(flushing.await.unwrap(), FlushOutcome::Dropped(2));
        assert_eq!(client.pending_count(), 3);
        assert!(client.pending_count() <= 4);
        assert_eq!(client.stats().events_dropped, 2);
    }

    #[tokio::test]
    async fn test_permanent_rejection_is_not_requeued() {
        let sink = Arc::new(RecordingSink::default());
        sink.permanent.store(true, Ordering::SeqCst);
        let client = IngestionClient::with_sink(sink.clone(), options(10, 100));

        client.enqueue(event(0));
        assert_eq!(client.flush().await, FlushOutcome::Dropped(1));
        assert!(!client.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_partial_batch() {
        let sink = Arc::new(RecordingSink::default());
        let client = IngestionClient::with_sink(sink.clone(), options(50, 100));
        client.start();

        client.enqueue(event(0));
        client.enqueue(event(1));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(sink.batch_sizes().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(sink.batch_sizes(), vec![2]);
        assert!(!client.has_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_drains_backlog_after_recovery() {
        let sink = Arc::new(RecordingSink::failing());
        let client = IngestionClient::with_sink(sink.clone(), options(5, 100));
        client.start();

        for i in 0..20 {
            client.enqueue(event(i));
        }
        settle().await;
        assert_eq!(client.pending_count(), 20);
        assert_eq!(client.stats().batches_requeued, 1);

        sink.failing.store(false, Ordering::SeqCst);
        lock(&sink.batches).clear();

        tokio::time::sleep(Duration::from_secs(6)).await;
        settle().await;

        assert_eq!(sink.batch_sizes(), vec![5, 5, 5, 5]);
        assert!(!client.has_pending());
        assert_eq!(client.stats().events_sent, 20);

        let first = lock(&sink.batches)[0][0].query.clone();
        assert_eq!(first.as_deref(), Some("query 0"));
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let sink = Arc::new(RecordingSink::default());
        let client = IngestionClient::with_sink(sink.clone(), options(3, 100));
        client.start();

        for i in 0..2 {
            client.enqueue(event(i));
        }

        let delivered = client.shutdown().await;
        assert_eq!(delivered, 2);
        assert!(!client.has_pending());
    }

    #[tokio::test]
    async fn test_shutdown_stops_on_failure() {
        let sink = Arc::new(RecordingSink::failing());
        let client = IngestionClient::with_sink(sink.clone(), options(3, 100));

        client.enqueue(event(0));
        assert_eq!(client.shutdown().await, 0);
        assert_eq!(client.pending_count(), 1);
        assert_eq!(sink.batch_sizes(), vec![1]);
    }

    #[test]
    fn test_enqueue_without_runtime_never_panics() {
        let sink = Arc::new(RecordingSink::default());
        let client = IngestionClient::with_sink(sink, options(1, 10));

        client.enqueue(event(0));
        client.enqueue(event(1));
        assert_eq!(client.pending_count(), 2);
    }

    #[test]
    fn test_disabled_config() {
        assert!(IngestionClient::from_config(&Config::default()).is_none());

        let mut config = Config::default();
        config.backend.base_url = Some("https://api.example.com".to_string());
        config.backend.write_token = Some("w".to_string());
        config.ingest.batch_size = 0;
        assert!(IngestionClient::from_config(&config).is_none());

        config.ingest.batch_size = 10;
        assert!(IngestionClient::from_config(&config).is_some());
    }

    #[test]
    fn test_publish_stats_default() {
        let stats = PublishStats::default();
        assert_eq!(stats.events_sent, 0);
        assert_eq!(stats.api_calls, 0);
    }
}
