//! Self-expiring channel messages.
//!
//! Tracks every unreacted message in one channel, deletes it once it has
//! lived longer than the configured TTL, and keeps the working set across
//! restarts by reconciling a JSON snapshot against the remote history.
//!
//! Gateway access goes through the [`Gateway`] trait; `mog-discord`
//! provides the production implementation.

pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod reconcile;
pub mod runtime;
pub mod store;
pub mod types;

pub use config::{BoomConfig, RetryPolicy, PAGE_LIMIT, SNAPSHOT_FILE};
pub use error::{BoomError, GatewayError};
pub use gateway::{Gateway, GatewayEvent, Subscription, SubscriptionId};
pub use metrics::{BoomMetrics, Counter};
pub use reconcile::{load_prior, reconcile};
pub use runtime::{Boom, BoomHandle};
pub use store::{Entries, Repository, SnapshotStore};
pub use types::{Birth, ChannelId, Clock, MessageId, RemoteMessage, SystemClock, TokioClock};
