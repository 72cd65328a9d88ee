//! Position stream module
//!
//! Defines the capability the geofence controller subscribes to, and a
//! feed-backed implementation driven by the host.

mod feed;
mod source;

pub use feed::{FeedSource, Fix, PositionFeed};
pub use source::{
    now_ms, PositionError, PositionSample, PositionSource, SubscriptionHandle, SubscriptionId,
    WatchOptions, MAX_CLOCK_SKEW,
};
