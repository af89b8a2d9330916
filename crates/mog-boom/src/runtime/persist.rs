/// Debounced persistence. Copies the repository to disk every `save_after`
/// when it changed since the last successful write.
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::BoomError;
use crate::store::{Entries, SnapshotStore};

use super::Shared;

pub(crate) struct Persister {
    shared: Arc<Shared>,
    snapshot: SnapshotStore,
    /// Contents of the last successful write.
    last: Option<Entries>,
}

impl Persister {
    /// `written` is what is already on disk, if known.
    pub fn new(shared: Arc<Shared>, snapshot: SnapshotStore, written: Option<Entries>) -> Self {
        Self {
            shared,
            snapshot,
            last: written,
        }
    }

    /// Write a snapshot if the repository changed. Returns whether it wrote.
    pub async fn tick(&mut self) -> Result<bool, BoomError> {
        let current = self.shared.repository.snapshot_copy();
        if self.last.as_ref() == Some(&current) {
            self.shared.metrics.snapshot_skips.inc();
            return Ok(false);
        }
        self.write(current).await?;
        Ok(true)
    }

    /// Unconditional write used at shutdown.
    pub async fn flush(&mut self) -> Result<(), BoomError> {
        let current = self.shared.repository.snapshot_copy();
        self.write(current).await
    }

    async fn write(&mut self, current: Entries) -> Result<(), BoomError> {
        match self.snapshot.write(&current).await {
            Ok(()) => {
                self.shared.metrics.snapshot_writes.inc();
                tracing::debug!(
                    entries = current.len(),
                    path = %self.snapshot.path().display(),
                    "snapshot written"
                );
                self.last = Some(current);
                Ok(())
            }
            Err(e) => {
                self.shared.metrics.snapshot_failures.inc();
                Err(e)
            }
        }
    }
}

/// Ticks until cancelled, then performs the final flush.
pub(crate) async fn run(mut persister: Persister, cancel: CancellationToken) -> Result<(), BoomError> {
    let period = persister.shared.config.save_after;
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // first tick is immediate

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                // The next tick retries with whatever the repository holds then.
                if let Err(e) = persister.tick().await {
                    tracing::warn!("snapshot write failed: {e}");
                }
            }
        }
    }

    let result = persister.flush().await;
    match &result {
        Ok(()) => tracing::info!(
            entries = persister.last.as_ref().map_or(0, |e| e.len()),
            "final snapshot written"
        ),
        Err(e) => tracing::error!("final snapshot failed: {e}"),
    }
    result
}
