use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use common::{AdminError, StreamStats, StreamStatusSnapshot};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5000);

/// Anything that can report the current stats of a named stream
#[async_trait]
pub trait StreamStatsSource: Send + Sync {
    async fn stream_stats(&self, name: &str) -> Result<StreamStats, AdminError>;
}

struct PollingTask {
    stream: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// 流状态轮询器
///
/// Idle until [`StatusPoller::start`]; then fetches stats once immediately
/// and once per interval, publishing a fresh [`StreamStatusSnapshot`] each
/// time. A failed fetch publishes [`StreamStatusSnapshot::offline`].
pub struct StatusPoller {
    interval: Duration,
    status: Arc<watch::Sender<StreamStatusSnapshot>>,
    task: Mutex<Option<PollingTask>>,
}

impl StatusPoller {
    pub fn new(interval: Duration) -> Self {
        let interval = if interval.is_zero() {
            warn!("Poll interval must be positive, using {:?}", DEFAULT_POLL_INTERVAL);
            DEFAULT_POLL_INTERVAL
        } else {
            interval
        };

        let (status, _) = watch::channel(StreamStatusSnapshot::default());

        Self {
            interval,
            status: Arc::new(status),
            task: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamStatusSnapshot> {
        self.status.subscribe()
    }

    pub fn current(&self) -> StreamStatusSnapshot {
        *self.status.borrow()
    }

    pub async fn is_polling(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Name of the stream being polled, if any
    pub async fn polled_stream(&self) -> Option<String> {
        self.task.lock().await.as_ref().map(|task| task.stream.clone())
    }

    /// Begin polling `stream`. Returns false if polling was already active.
    pub async fn start(&self, source: Arc<dyn StreamStatsSource>, stream: impl Into<String>) -> bool {
        let mut task = self.task.lock().await;
        if let Some(active) = task.as_ref() {
            debug!(stream = %active.stream, "Status polling already active");
            return false;
        }

        let stream = stream.into();
        let cancel = CancellationToken::new();

        info!(stream = %stream, "Starting status polling every {:?}", self.interval);

        let handle = {
            let period = self.interval;
            let status = Arc::clone(&self.status);
            let cancel = cancel.clone();
            let stream = stream.clone();

            tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    let snapshot = Self::poll_once(source.as_ref(), &stream).await;

                    // stop() cancels while holding the channel lock
                    let published = status.send_if_modified(|current| {
                        if cancel.is_cancelled() {
                            return false;
                        }
                        *current = snapshot;
                        true
                    });
                    if !published {
                        debug!(stream = %stream, "Discarding poll result after stop");
                        break;
                    }
                }
            })
        };

        *task = Some(PollingTask { stream, cancel, handle });
        true
    }

    /// Stop polling. An in-flight fetch finishes but its result is dropped,
    /// and nothing is published once this returns.
    pub async fn stop(&self) -> bool {
        match self.task.lock().await.take() {
            Some(task) => {
                Self::cancel_locked(&self.status, &task.cancel);
                drop(task.handle);
                info!(stream = %task.stream, "Status polling stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel under the status lock so no poll result lands after it returns
    fn cancel_locked(status: &watch::Sender<StreamStatusSnapshot>, cancel: &CancellationToken) {
        status.send_if_modified(|_| {
            cancel.cancel();
            false
        });
    }

    /// Run a single poll cycle without touching any poller state
    pub async fn poll_once(source: &dyn StreamStatsSource, stream: &str) -> StreamStatusSnapshot {
        match source.stream_stats(stream).await {
            Ok(stats) => StreamStatusSnapshot::from_stats(&stats),
            Err(e) => {
                warn!(stream, "Error fetching stream status: {}", e);
                StreamStatusSnapshot::offline()
            }
        }
    }
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            Self::cancel_locked(&self.status, &task.cancel);
        }
    }
}
