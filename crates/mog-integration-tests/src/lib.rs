//! Helpers for end-to-end tests of the boom store against `MockGateway`.
//!
//! Tests run with tokio's clock paused; [`clock`] reads wall time from the
//! same virtual clock so births and sleeps agree.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use mog_boom::gateway::mock::MockGateway;
use mog_boom::{Birth, Boom, BoomConfig, BoomError, BoomHandle, GatewayEvent, TokioClock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const CHANNEL: &str = "general";

/// Wall time at virtual t=0.
pub fn epoch() -> Birth {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn clock() -> Arc<TokioClock> {
    Arc::new(TokioClock::starting_at(epoch()))
}

pub fn config(dir: &Path, ttl: Duration, save_after: Duration) -> BoomConfig {
    BoomConfig::new(CHANNEL, ttl, dir.to_path_buf()).save_after(save_after)
}

/// Opt-in test logs via `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A store running on a spawned task.
pub struct Running {
    pub handle: BoomHandle,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), BoomError>>,
}

impl Running {
    /// Cancel and wait for the shutdown result.
    pub async fn stop(self) -> Result<(), BoomError> {
        self.cancel.cancel();
        self.task.await.expect("boom task panicked")
    }
}

pub async fn spawn(
    config: BoomConfig,
    gateway: &MockGateway,
    clock: Arc<TokioClock>,
) -> Result<Running, BoomError> {
    init_tracing();
    let boom = Boom::start_with_clock(config, Arc::new(gateway.clone()), clock).await?;
    let handle = boom.handle();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(boom.run(cancel.clone()));
    Ok(Running {
        handle,
        cancel,
        task,
    })
}

/// Let spawned tasks drain their queues without moving the clock.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

pub fn millis(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ── Events in the tracked channel ───────────────────────────────────

pub fn created(id: &str) -> GatewayEvent {
    GatewayEvent::MessageCreated {
        channel_id: CHANNEL.into(),
        message_id: id.into(),
    }
}

pub fn deleted(id: &str) -> GatewayEvent {
    GatewayEvent::MessageDeleted {
        channel_id: CHANNEL.into(),
        message_id: id.into(),
    }
}

pub fn reaction_added(id: &str) -> GatewayEvent {
    GatewayEvent::ReactionAdded {
        channel_id: CHANNEL.into(),
        message_id: id.into(),
    }
}

pub fn reaction_removed(id: &str) -> GatewayEvent {
    GatewayEvent::ReactionRemoved {
        channel_id: CHANNEL.into(),
        message_id: id.into(),
    }
}
