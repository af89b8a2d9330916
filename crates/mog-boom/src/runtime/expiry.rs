/// Expiry loop. Sleeps until the oldest message is due, then deletes it.
///
/// The minimum is recomputed on every wake with a full scan; at one
/// channel's worth of live messages that is cheaper than keeping a heap
/// consistent with concurrent removals.
use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::RetryPolicy;
use crate::error::GatewayError;
use crate::types::{deadline, until, Birth, MessageId};

use super::Shared;

/// The message the loop is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub id: MessageId,
    /// Birth at the time the target was chosen.
    pub birth: Birth,
    pub due: Birth,
}

/// Consecutive delete failures for one message at one birth.
#[derive(Debug, Clone, Copy)]
struct Failure {
    birth: Birth,
    attempts: u32,
    retry_at: Birth,
}

/// Delete failures folded into the scheduling order.
#[derive(Debug)]
pub(crate) struct Retries {
    policy: RetryPolicy,
    failures: HashMap<MessageId, Failure>,
}

impl Retries {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            failures: HashMap::new(),
        }
    }

    /// When `id` should be attempted: its TTL deadline, or later if backing off.
    pub fn due(&self, id: &MessageId, birth: Birth, ttl: std::time::Duration) -> Birth {
        let expires = deadline(birth, ttl);
        match self.failures.get(id) {
            Some(f) if f.birth == birth => expires.max(f.retry_at),
            _ => expires,
        }
    }

    /// Count a failure and return the consecutive attempts so far.
    pub fn record_failure(&mut self, id: &MessageId, birth: Birth, now: Birth) -> u32 {
        let failure = self.failures.entry(id.clone()).or_insert(Failure {
            birth,
            attempts: 0,
            retry_at: now,
        });
        if failure.birth != birth {
            // Countdown was restarted since the last failure.
            failure.birth = birth;
            failure.attempts = 0;
        }
        failure.attempts += 1;
        failure.retry_at = deadline(now, self.policy.backoff(failure.attempts));
        failure.attempts
    }

    pub fn clear(&mut self, id: &MessageId) {
        self.failures.remove(id);
    }

    /// Forget failures whose message is gone or was reset.
    pub fn retain_live(&mut self, shared: &Shared) {
        self.failures
            .retain(|id, f| shared.repository.birth_of(id) == Some(f.birth));
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

/// Pick the next message to expire.
pub(crate) fn next_target(shared: &Shared, retries: &Retries) -> Option<Target> {
    let ttl = shared.config.dead_after;
    let (id, birth) = shared
        .repository
        .earliest_by(|id, birth| retries.due(id, birth, ttl))?;
    let due = retries.due(&id, birth, ttl);
    Some(Target { id, birth, due })
}

pub(crate) async fn run(shared: Arc<Shared>, cancel: CancellationToken) {
    let mut retries = Retries::new(shared.config.delete_retry);
    tracing::info!(ttl = ?shared.config.dead_after, "expiry loop started");

    loop {
        retries.retain_live(&shared);
        let target = next_target(&shared, &retries);

        // Re-scan at least once per TTL: nothing inserted meanwhile can be
        // due sooner than that.
        let ttl = shared.config.dead_after;
        let wait = match &target {
            Some(t) => until(t.due, shared.clock.now()).min(ttl),
            None => ttl,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let Some(target) = target.filter(|t| t.due <= shared.clock.now()) else {
            continue;
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = detonate(&shared, &mut retries, target) => {}
        }
    }

    tracing::debug!("expiry loop stopped");
}

/// Delete one due message remotely, then locally.
pub(crate) async fn detonate(shared: &Shared, retries: &mut Retries, target: Target) {
    // Exempted or reset while we slept.
    if shared.repository.birth_of(&target.id) != Some(target.birth) {
        tracing::debug!(message = %target.id, "expiry target changed, rescheduling");
        retries.clear(&target.id);
        return;
    }

    let channel = &shared.config.channel_id;
    match shared.gateway.delete_message(channel, &target.id).await {
        Ok(()) => {
            shared.repository.remove(&target.id);
            retries.clear(&target.id);
            shared.metrics.expired.inc();
            tracing::info!(message = %target.id, "message expired and deleted");
        }
        Err(GatewayError::NotFound(_)) => {
            shared.repository.remove(&target.id);
            retries.clear(&target.id);
            tracing::debug!(message = %target.id, "message already gone remotely");
        }
        Err(e) => {
            shared.metrics.delete_failures.inc();
            let attempts = retries.record_failure(&target.id, target.birth, shared.clock.now());
            if retries.policy().exhausted(attempts) {
                retries.clear(&target.id);
                if shared.repository.remove_if_birth(&target.id, target.birth) {
                    shared.metrics.abandoned.inc();
                }
                tracing::warn!(
                    message = %target.id,
                    attempts,
                    "delete failed, giving up: {e}"
                );
            } else {
                tracing::warn!(
                    message = %target.id,
                    attempts,
                    retry_in = ?retries.policy().backoff(attempts),
                    "delete failed: {e}"
                );
            }
        }
    }
}
