//! Host-fed position source
//!
//! Fixes are pushed in by the host (the console reader, or whatever
//! platform glue owns the receiver) and fanned out to every live
//! subscription. Each subscription runs as its own task.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::source::{
    now_ms, PositionError, PositionSample, PositionSource, SampleSink, SubscriptionHandle,
    SubscriptionId, WatchOptions,
};
use crate::geofence::ControllerInput;

/// One event of the raw feed
pub type Fix = Result<PositionSample, PositionError>;

/// Cloneable handle used by the host to push fixes
#[derive(Debug, Clone)]
pub struct PositionFeed {
    tx: broadcast::Sender<Fix>,
}

impl PositionFeed {
    /// Push a fix to all subscribers. Returns how many received it.
    pub fn push(&self, fix: Fix) -> usize {
        self.tx.send(fix).unwrap_or(0)
    }

    /// Wait for the next fix, used for initial centering
    pub async fn get_once(&self, timeout: Duration) -> Result<PositionSample, PositionError> {
        let mut rx = self.tx.subscribe();
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(fix) => return fix,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(PositionError::PositionUnavailable(
                            "position feed closed".to_string(),
                        ))
                    }
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .unwrap_or(Err(PositionError::Timeout))
    }
}

/// Position stream backed by a [`PositionFeed`]
pub struct FeedSource {
    tx: broadcast::Sender<Fix>,
    next_id: u64,
}

impl FeedSource {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, next_id: 1 }
    }

    /// Handle for pushing fixes into this source
    pub fn feed(&self) -> PositionFeed {
        PositionFeed {
            tx: self.tx.clone(),
        }
    }
}

impl PositionSource for FeedSource {
    fn subscribe(
        &mut self,
        options: WatchOptions,
        queue: mpsc::Sender<ControllerInput>,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;

        let token = CancellationToken::new();
        let rx = self.tx.subscribe();
        let sink = SampleSink::new(id, queue);

        info!(
            subscription = %id,
            high_accuracy = options.high_accuracy,
            max_staleness_ms = options.max_staleness.as_millis() as u64,
            timeout_ms = options.timeout.as_millis() as u64,
            "position subscription started"
        );

        tokio::spawn(forward(rx, sink, options, token.clone()));

        SubscriptionHandle { id, token }
    }
}

/// Forward fixes into the sink until cancelled
async fn forward(
    mut rx: broadcast::Receiver<Fix>,
    sink: SampleSink,
    options: WatchOptions,
    token: CancellationToken,
) {
    loop {
        let fix = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            received = tokio::time::timeout(options.timeout, rx.recv()) => received,
        };

        let delivered = match fix {
            Ok(Ok(Ok(sample))) => {
                let now = now_ms();
                if !sample.is_current(now, options.max_staleness) {
                    debug!(
                        subscription = %sink.id(),
                        age_ms = sample.age(now).as_millis() as u64,
                        lead_ms = sample.lead(now).as_millis() as u64,
                        "dropping cached or future-stamped fix"
                    );
                    continue;
                }
                sink.deliver(Ok(sample))
            }
            Ok(Ok(Err(error))) => sink.deliver(Err(error)),
            Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                warn!(subscription = %sink.id(), skipped = n, "position feed lagged");
                continue;
            }
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                debug!(subscription = %sink.id(), "position feed closed");
                break;
            }
            // Keep waiting after a timeout; the next fix may still come
            Err(_) => sink.deliver(Err(PositionError::Timeout)),
        };

        if !delivered {
            break;
        }
    }

    debug!(subscription = %sink.id(), "position subscription ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;

    fn fresh_sample(lat: f64) -> PositionSample {
        PositionSample {
            coordinate: Coordinate::new(lat, 0.0),
            accuracy_m: 8.0,
            timestamp_ms: now_ms(),
        }
    }

    #[tokio::test]
    async fn test_subscription_forwards_fixes() {
        let mut source = FeedSource::new(16);
        let feed = source.feed();
        let (tx, mut rx) = mpsc::channel(16);

        let handle = source.subscribe(WatchOptions::default(), tx);
        assert_eq!(feed.push(Ok(fresh_sample(1.0))), 1);

        match rx.recv().await.unwrap() {
            ControllerInput::Sample {
                subscription,
                sample,
            } => {
                assert_eq!(subscription, handle.id);
                assert_eq!(sample.coordinate.latitude, 1.0);
            }
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cached_fix_is_dropped() {
        let mut source = FeedSource::new(16);
        let feed = source.feed();
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = source.subscribe(WatchOptions::default(), tx);

        let mut stale = fresh_sample(1.0);
        stale.timestamp_ms -= 10_000;
        feed.push(Ok(stale));
        feed.push(Ok(fresh_sample(2.0)));

        match rx.recv().await.unwrap() {
            ControllerInput::Sample { sample, .. } => {
                assert_eq!(sample.coordinate.latitude, 2.0);
            }
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_future_stamped_fix_is_dropped() {
        let mut source = FeedSource::new(16);
        let feed = source.feed();
        let (tx, mut rx) = mpsc::channel(16);
        let _handle = source.subscribe(WatchOptions::default(), tx);

        let mut skewed = fresh_sample(1.0);
        skewed.timestamp_ms += 3_600_000;
        feed.push(Ok(skewed));
        feed.push(Ok(fresh_sample(2.0)));

        match rx.recv().await.unwrap() {
            ControllerInput::Sample { sample, .. } => {
                assert_eq!(sample.coordinate.latitude, 2.0);
            }
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_reported_and_watch_continues() {
        let mut source = FeedSource::new(16);
        let feed = source.feed();
        let (tx, mut rx) = mpsc::channel(16);
        let options = WatchOptions {
            timeout: Duration::from_secs(5),
            ..WatchOptions::default()
        };
        let _handle = source.subscribe(options, tx);

        match rx.recv().await.unwrap() {
            ControllerInput::SampleError { error, .. } => {
                assert_eq!(error, PositionError::Timeout);
            }
            other => panic!("unexpected input {other:?}"),
        }

        feed.push(Ok(fresh_sample(3.0)));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ControllerInput::Sample { .. }
        ));
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let mut source = FeedSource::new(16);
        let feed = source.feed();
        let (tx, mut rx) = mpsc::channel(16);

        let handle = source.subscribe(WatchOptions::default(), tx);
        source.unsubscribe(handle);
        tokio::task::yield_now().await;

        feed.push(Ok(fresh_sample(1.0)));
        // The task exits and drops its sender, closing the queue
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_once() {
        let source = FeedSource::new(16);
        let feed = source.feed();

        let waiter = {
            let feed = feed.clone();
            tokio::spawn(async move { feed.get_once(Duration::from_secs(8)).await })
        };
        tokio::task::yield_now().await;
        feed.push(Err(PositionError::PermissionDenied));
        assert_eq!(waiter.await.unwrap(), Err(PositionError::PermissionDenied));

        assert_eq!(
            feed.get_once(Duration::from_secs(8)).await,
            Err(PositionError::Timeout)
        );
    }
}
