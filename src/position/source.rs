//! Position stream capability
//!
//! The controller only sees this trait. Concrete sources deliver samples
//! into a [`SampleSink`] until the subscription is cancelled.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::geo::Coordinate;
use crate::geofence::ControllerInput;

/// How far ahead of the local clock a fix may be stamped before it is rejected
pub const MAX_CLOCK_SKEW: Duration = Duration::from_millis(1000);

/// A single position fix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionSample {
    pub coordinate: Coordinate,
    /// Horizontal accuracy radius in meters
    pub accuracy_m: f64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
}

impl PositionSample {
    /// Age of the sample relative to `now_ms`; future timestamps count as fresh
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.timestamp_ms))
    }

    /// How far the timestamp lies ahead of `now_ms`
    pub fn lead(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.timestamp_ms.saturating_sub(now_ms))
    }

    /// Usable for arming decisions: neither stale nor stamped in the future
    pub fn is_current(&self, now_ms: u64, max_staleness: Duration) -> bool {
        self.age(now_ms) <= max_staleness && self.lead(now_ms) <= MAX_CLOCK_SKEW
    }
}

/// Errors reported by the position stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {0}")]
    PositionUnavailable(String),

    #[error("timed out waiting for a position fix")]
    Timeout,
}

/// Options passed to [`PositionSource::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    pub high_accuracy: bool,
    /// Cached fixes older than this are rejected
    pub max_staleness: Duration,
    /// Per-fix timeout
    pub timeout: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            max_staleness: Duration::from_millis(2000),
            timeout: Duration::from_millis(15000),
        }
    }
}

/// Identifies one subscription for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription; cancelling the token ends delivery
#[derive(Debug)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub token: CancellationToken,
}

/// Where a subscription posts its samples: the controller's event queue
#[derive(Debug, Clone)]
pub struct SampleSink {
    id: SubscriptionId,
    tx: mpsc::Sender<ControllerInput>,
}

impl SampleSink {
    pub fn new(id: SubscriptionId, tx: mpsc::Sender<ControllerInput>) -> Self {
        Self { id, tx }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Post a fix or an error without blocking. Returns false once the
    /// controller has gone away.
    pub fn deliver(&self, result: Result<PositionSample, PositionError>) -> bool {
        let input = match result {
            Ok(sample) => ControllerInput::Sample {
                subscription: self.id,
                sample,
            },
            Err(error) => ControllerInput::SampleError {
                subscription: self.id,
                error,
            },
        };

        match self.tx.try_send(input) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(subscription = %self.id, "controller queue full, dropping position event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// The position stream capability
pub trait PositionSource: Send {
    /// Start delivering samples into `queue` until unsubscribed
    fn subscribe(
        &mut self,
        options: WatchOptions,
        queue: mpsc::Sender<ControllerInput>,
    ) -> SubscriptionHandle;

    /// Stop a subscription. Unknown or already cancelled handles are ignored.
    fn unsubscribe(&mut self, handle: SubscriptionHandle) {
        handle.token.cancel();
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_age() {
        let sample = PositionSample {
            coordinate: Coordinate::new(0.0, 0.0),
            accuracy_m: 5.0,
            timestamp_ms: 10_000,
        };
        assert_eq!(sample.age(12_500), Duration::from_millis(2500));
        assert_eq!(sample.age(9_000), Duration::ZERO);
    }

    #[test]
    fn test_sink_tags_events_with_subscription() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = SampleSink::new(SubscriptionId(7), tx);

        assert!(sink.deliver(Err(PositionError::Timeout)));
        match rx.try_recv().unwrap() {
            ControllerInput::SampleError {
                subscription,
                error,
            } => {
                assert_eq!(subscription, SubscriptionId(7));
                assert_eq!(error, PositionError::Timeout);
            }
            other => panic!("unexpected input {other:?}"),
        }

        drop(rx);
        assert!(!sink.deliver(Err(PositionError::PermissionDenied)));
    }
}
