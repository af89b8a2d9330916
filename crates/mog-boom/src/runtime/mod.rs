/// Boom runtime. Reconciles on startup, then runs the expiry, ingestion and persistence loops.
///
/// `Boom::start` rebuilds the working set from the snapshot and the remote
/// history. `Boom::run` drives expiry, event ingestion and persistence until
/// the cancellation token fires (or any loop stops), then unsubscribes from
/// the gateway and reports every error it collected along the way.
mod expiry;
mod ingest;
mod persist;

use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::BoomConfig;
use crate::error::BoomError;
use crate::gateway::{Gateway, GatewayEvent, Subscription};
use crate::metrics::BoomMetrics;
use crate::reconcile::{load_prior, reconcile};
use crate::store::{Repository, SnapshotStore};
use crate::types::{Birth, Clock, SystemClock};

/// State shared by the loops.
pub(crate) struct Shared {
    pub config: BoomConfig,
    pub repository: Repository,
    pub metrics: BoomMetrics,
    pub clock: Arc<dyn Clock>,
    pub gateway: Arc<dyn Gateway>,
}

impl Shared {
    pub fn new(config: BoomConfig, gateway: Arc<dyn Gateway>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            repository: Repository::new(),
            metrics: BoomMetrics::default(),
            clock,
            gateway,
        }
    }
}

// ── BoomHandle ────────────────────────────────────────────────────────

/// Read access to a running store. Cheap to clone.
#[derive(Clone)]
pub struct BoomHandle {
    shared: Arc<Shared>,
}

impl BoomHandle {
    pub fn repository(&self) -> &Repository {
        &self.shared.repository
    }

    pub fn metrics(&self) -> &BoomMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &BoomConfig {
        &self.shared.config
    }
}

// ── Boom ──────────────────────────────────────────────────────────────

/// A reconciled boom store, ready to run.
pub struct Boom {
    shared: Arc<Shared>,
    snapshot: SnapshotStore,
    subscription: Subscription,
    /// Notifications received during reconciliation, with arrival times.
    backlog: Vec<(Birth, GatewayEvent)>,
}

impl Boom {
    /// Reconcile against the gateway using the system clock.
    pub async fn start(config: BoomConfig, gateway: Arc<dyn Gateway>) -> Result<Self, BoomError> {
        Self::start_with_clock(config, gateway, Arc::new(SystemClock)).await
    }

    /// Reconcile against the gateway, reading births from `clock`.
    ///
    /// Subscribes before listing the history so no notification falls in
    /// between. Notifications for the tracked channel that arrive while the
    /// history is paged are drained into a backlog, so a slow listing cannot
    /// overflow the subscription; `run` applies the backlog first.
    pub async fn start_with_clock(
        config: BoomConfig,
        gateway: Arc<dyn Gateway>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, BoomError> {
        config.validate()?;
        let snapshot = SnapshotStore::open(config.snapshot_path())?;
        let prior = load_prior(&snapshot).await?;

        let mut subscription = gateway.subscribe();
        let mut backlog = Vec::new();
        let mut ignored = 0;
        let reconciled = {
            let listing = reconcile(gateway.as_ref(), &config.channel_id, &prior, clock.now());
            tokio::pin!(listing);
            loop {
                tokio::select! {
                    result = &mut listing => break result,
                    Some(event) = subscription.events.recv() => {
                        if event.channel_id() == &config.channel_id {
                            backlog.push((clock.now(), event));
                        } else {
                            ignored += 1;
                        }
                    }
                }
            }
        };
        let entries = match reconciled {
            Ok(entries) => entries,
            Err(e) => {
                if let Err(unsub) = gateway.unsubscribe(subscription.id) {
                    tracing::warn!("unsubscribe after failed reconcile: {unsub}");
                }
                return Err(e);
            }
        };

        let shared = Arc::new(Shared::new(config, gateway, clock));
        shared.repository.replace(entries);
        shared.metrics.events_ignored.add(ignored);
        tracing::info!(
            channel = %shared.config.channel_id,
            tracked = shared.repository.len(),
            buffered = backlog.len(),
            snapshot = %snapshot.path().display(),
            "boom store ready"
        );

        Ok(Self {
            shared,
            snapshot,
            subscription,
            backlog,
        })
    }

    pub fn handle(&self) -> BoomHandle {
        BoomHandle {
            shared: self.shared.clone(),
        }
    }

    /// Run until `cancel` fires or a loop stops.
    ///
    /// Returns every error hit during shutdown: a failed final snapshot, a
    /// panicked loop, a failed unsubscribe.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), BoomError> {
        let Boom {
            shared,
            snapshot,
            subscription,
            backlog,
        } = self;
        let token = cancel.child_token();
        let subscription_id = subscription.id;

        let mut tasks: JoinSet<Result<(), BoomError>> = JoinSet::new();
        {
            let (shared, token) = (shared.clone(), token.clone());
            tasks.spawn(async move {
                expiry::run(shared, token).await;
                Ok(())
            });
        }
        {
            let (shared, token) = (shared.clone(), token.clone());
            tasks.spawn(async move {
                ingest::run(shared, backlog, subscription.events, token).await;
                Ok(())
            });
        }
        {
            let persister = persist::Persister::new(shared.clone(), snapshot, None);
            tasks.spawn(persist::run(persister, token.clone()));
        }

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            // Loops only end on cancellation; one ending means stop them all.
            token.cancel();
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(BoomError::Task(format!("boom loop: {e}"))),
            }
        }

        if let Err(e) = shared.gateway.unsubscribe(subscription_id) {
            errors.push(BoomError::Gateway(e));
        }

        let m = &shared.metrics;
        tracing::info!(
            tracked = shared.repository.len(),
            expired = m.expired.get(),
            delete_failures = m.delete_failures.get(),
            abandoned = m.abandoned.get(),
            snapshot_writes = m.snapshot_writes.get(),
            snapshot_skips = m.snapshot_skips.get(),
            events_ignored = m.events_ignored.get(),
            "boom store stopped"
        );

        BoomError::join(errors)
    }
}
