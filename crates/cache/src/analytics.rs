//! Fire-and-forget cache analytics.
//!
//! Producers hand events to `log_event` and never wait. A single owner
//! thread buffers them and flushes when enough are queued or a timer
//! elapses; closing drains the buffer with one final flush. Sink failures
//! are swallowed.

use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::CacheSource;

/// Flush as soon as this many events are buffered.
const BATCH_SIZE: usize = 10;
/// Otherwise flush on this cadence.
const FLUSH_INTERVAL: Duration = Duration::from_millis(500);
/// Bound on the producer queue; overflow drops events rather than blocking
/// a build on telemetry.
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheEventStatus {
    Hit,
    Miss,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEvent {
    pub session_id: String,
    pub source: CacheSource,
    pub event: CacheEventStatus,
    pub hash: String,
    pub duration: u64,
}

/// Where flushed batches go. The engine only batches; posting is someone
/// else's job.
pub trait AnalyticsSink: Send + 'static {
    fn record_events(&self, events: Vec<CacheEvent>) -> Result<(), String>;
}

/// A sink that only traces, for when no telemetry endpoint is configured.
pub struct NullSink;

impl AnalyticsSink for NullSink {
    fn record_events(&self, events: Vec<CacheEvent>) -> Result<(), String> {
        debug!(count = events.len(), "dropping analytics batch (no sink configured)");
        Ok(())
    }
}

pub struct AnalyticsClient {
    session_id: String,
    sender: Mutex<Option<SyncSender<CacheEvent>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl AnalyticsClient {
    pub fn new(sink: impl AnalyticsSink) -> Self {
        Self::with_config(sink, BATCH_SIZE, FLUSH_INTERVAL)
    }

    /// Construction with explicit batching knobs, used by tests.
    pub fn with_config(
        sink: impl AnalyticsSink,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::sync_channel::<CacheEvent>(QUEUE_DEPTH);
        let worker = std::thread::spawn(move || {
            let mut buffer: Vec<CacheEvent> = Vec::new();
            let mut deadline = Instant::now() + flush_interval;
            loop {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(timeout) {
                    Ok(event) => {
                        buffer.push(event);
                        if buffer.len() >= batch_size {
                            flush(&sink, &mut buffer);
                            deadline = Instant::now() + flush_interval;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        flush(&sink, &mut buffer);
                        deadline = Instant::now() + flush_interval;
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        flush(&sink, &mut buffer);
                        break;
                    }
                }
            }
        });

        Self {
            session_id: Uuid::new_v4().to_string(),
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue one event. Never blocks the caller; a full or closed queue
    /// drops the event.
    pub fn log_event(
        &self,
        source: CacheSource,
        event: CacheEventStatus,
        hash: &str,
        duration: u64,
    ) {
        let Some(sender) = self.sender.lock().clone() else {
            return;
        };
        let _ = sender.try_send(CacheEvent {
            session_id: self.session_id.clone(),
            source,
            event,
            hash: hash.to_string(),
            duration,
        });
    }

    /// Drain buffered events with one final flush and stop the worker.
    pub fn close(&self) {
        self.sender.lock().take();
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AnalyticsClient {
    fn drop(&mut self) {
        self.close();
    }
}

fn flush(sink: &impl AnalyticsSink, buffer: &mut Vec<CacheEvent>) {
    if buffer.is_empty() {
        return;
    }
    let batch = std::mem::take(buffer);
    if let Err(err) = sink.record_events(batch) {
        // Telemetry must never fail a build.
        debug!("analytics flush failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::Sender;

    use super::*;

    struct RecordingSink {
        batches: Sender<Vec<CacheEvent>>,
    }

    impl AnalyticsSink for RecordingSink {
        fn record_events(&self, events: Vec<CacheEvent>) -> Result<(), String> {
            let _ = self.batches.send(events);
            Ok(())
        }
    }

    fn client_with_channel(
        batch_size: usize,
        interval: Duration,
    ) -> (AnalyticsClient, std::sync::mpsc::Receiver<Vec<CacheEvent>>) {
        let (tx, rx) = mpsc::channel();
        let client =
            AnalyticsClient::with_config(RecordingSink { batches: tx }, batch_size, interval);
        (client, rx)
    }

    #[test]
    fn small_batches_wait_for_the_flush_timeout() {
        let (client, rx) = client_with_channel(10, Duration::from_millis(100));
        for _ in 0..2 {
            client.log_event(CacheSource::Local, CacheEventStatus::Hit, "abc", 1);
        }
        // Nothing before the timeout elapses.
        assert!(rx.recv_timeout(Duration::from_millis(40)).is_err());
        let batch = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn a_full_batch_flushes_immediately() {
        let (client, rx) = client_with_channel(10, Duration::from_secs(60));
        for i in 0..12 {
            client.log_event(
                CacheSource::Local,
                CacheEventStatus::Miss,
                &format!("hash-{i}"),
                0,
            );
        }
        let batch = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(batch.len(), 10);
    }

    #[test]
    fn close_drains_buffered_events() {
        let (client, rx) = client_with_channel(10, Duration::from_secs(60));
        client.log_event(CacheSource::Remote, CacheEventStatus::Hit, "tail", 9);
        client.close();
        let batch = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].hash, "tail");
    }

    #[test]
    fn sink_failures_are_swallowed() {
        struct FailingSink(Sender<()>);
        impl AnalyticsSink for FailingSink {
            fn record_events(&self, _events: Vec<CacheEvent>) -> Result<(), String> {
                let _ = self.0.send(());
                Err("boom".to_string())
            }
        }
        let (tx, rx) = mpsc::channel();
        let client =
            AnalyticsClient::with_config(FailingSink(tx), 1, Duration::from_secs(60));
        client.log_event(CacheSource::Local, CacheEventStatus::Hit, "x", 0);
        rx.recv_timeout(Duration::from_millis(500)).unwrap();
        client.close();
    }
}
