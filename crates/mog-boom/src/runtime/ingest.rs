/// Event ingestion: applies gateway notifications to the repository.
///
/// Cheap mutations happen inline. Reaction removals need the message's
/// remaining reaction count, which is a remote call; those lookups run as
/// tracked tasks so the notification stream is never held up. Their answers
/// are applied back on the ingestion task, and only if no later notification
/// for the same message arrived while they were in flight.
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::gateway::GatewayEvent;
use crate::types::{Birth, ChannelId, MessageId};

use super::Shared;

/// A reaction removal whose effect depends on what is left on the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingLookup {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    /// Time of the removal; becomes the new birth if nothing is left.
    pub at: Birth,
    pub ticket: u64,
}

/// Answer to a [`PendingLookup`].
#[derive(Debug)]
pub(crate) struct Resolved {
    pub lookup: PendingLookup,
    /// No reactions left on the message.
    pub bare: bool,
}

/// Reaction lookups in flight, by message.
///
/// Only the newest ticket per message is live. Any later notification for
/// the message retires it, so a stale answer cannot undo that notification.
#[derive(Debug, Default)]
pub(crate) struct Lookups {
    next_ticket: u64,
    live: HashMap<MessageId, u64>,
}

impl Lookups {
    fn begin(&mut self, message_id: &MessageId) -> u64 {
        self.next_ticket += 1;
        self.live.insert(message_id.clone(), self.next_ticket);
        self.next_ticket
    }

    fn retire(&mut self, message_id: &MessageId) {
        self.live.remove(message_id);
    }

    /// Whether `ticket` is still live; releases it either way.
    fn finish(&mut self, message_id: &MessageId, ticket: u64) -> bool {
        if self.live.get(message_id) == Some(&ticket) {
            self.live.remove(message_id);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }
}

/// Apply one notification received at `at`. Returns a lookup to run when
/// the outcome depends on the remote reaction count.
pub(crate) fn handle_event(
    shared: &Shared,
    lookups: &mut Lookups,
    event: GatewayEvent,
    at: Birth,
) -> Option<PendingLookup> {
    if event.channel_id() != &shared.config.channel_id {
        shared.metrics.events_ignored.inc();
        tracing::trace!(channel = %event.channel_id(), "ignoring event from untracked channel");
        return None;
    }

    for message_id in event.message_ids() {
        lookups.retire(message_id);
    }

    let repo = &shared.repository;
    match event {
        GatewayEvent::MessageCreated { message_id, .. } => {
            tracing::debug!(message = %message_id, "tracking new message");
            repo.upsert(message_id, at);
            None
        }
        GatewayEvent::MessageDeleted { message_id, .. } => {
            repo.remove(&message_id);
            None
        }
        GatewayEvent::MessagesDeletedBulk { message_ids, .. } => {
            let removed = message_ids.iter().filter(|id| repo.remove(id)).count();
            tracing::debug!(count = message_ids.len(), removed, "bulk delete");
            None
        }
        GatewayEvent::ReactionAdded { message_id, .. } => {
            if repo.remove(&message_id) {
                tracing::debug!(message = %message_id, "reaction added, message exempt");
            }
            None
        }
        GatewayEvent::AllReactionsRemoved { message_id, .. } => {
            tracing::debug!(message = %message_id, "all reactions removed, countdown restarted");
            repo.upsert(message_id, at);
            None
        }
        GatewayEvent::ReactionRemoved {
            channel_id,
            message_id,
        }
        | GatewayEvent::EmojiReactionsRemoved {
            channel_id,
            message_id,
        } => {
            let ticket = lookups.begin(&message_id);
            Some(PendingLookup {
                channel_id,
                message_id,
                at,
                ticket,
            })
        }
    }
}

/// Ask the gateway what is left on the message. A failed lookup counts as
/// "something is left" and changes nothing.
pub(crate) async fn resolve(shared: &Shared, lookup: PendingLookup) -> Resolved {
    let bare = match shared
        .gateway
        .reaction_count(&lookup.channel_id, &lookup.message_id)
        .await
    {
        Ok(count) => count == 0,
        Err(e) => {
            tracing::warn!(message = %lookup.message_id, "reaction count lookup failed: {e}");
            false
        }
    };
    Resolved { lookup, bare }
}

/// Restart the countdown if the message has no reactions left and the
/// lookup was not superseded.
pub(crate) fn apply(shared: &Shared, lookups: &mut Lookups, resolved: Resolved) {
    let PendingLookup {
        message_id,
        at,
        ticket,
        ..
    } = resolved.lookup;

    if !lookups.finish(&message_id, ticket) {
        tracing::debug!(message = %message_id, "reaction lookup superseded");
        return;
    }
    if resolved.bare {
        tracing::debug!(message = %message_id, "last reaction removed, countdown restarted");
        shared.repository.upsert(message_id, at);
    }
}

fn dispatch(
    shared: &Arc<Shared>,
    lookups: &mut Lookups,
    tasks: &mut JoinSet<Resolved>,
    event: GatewayEvent,
    at: Birth,
) {
    if let Some(lookup) = handle_event(shared, lookups, event, at) {
        let shared = shared.clone();
        tasks.spawn(async move { resolve(&shared, lookup).await });
    }
}

/// Apply `backlog` (notifications buffered during startup, with their
/// arrival times), then the live stream until cancelled.
pub(crate) async fn run(
    shared: Arc<Shared>,
    backlog: Vec<(Birth, GatewayEvent)>,
    mut events: mpsc::Receiver<GatewayEvent>,
    cancel: CancellationToken,
) {
    let mut lookups = Lookups::default();
    let mut tasks = JoinSet::new();

    if !backlog.is_empty() {
        tracing::debug!(count = backlog.len(), "replaying notifications received during startup");
    }
    for (at, event) in backlog {
        dispatch(&shared, &mut lookups, &mut tasks, event, at);
    }

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => match joined {
                Ok(resolved) => apply(&shared, &mut lookups, resolved),
                Err(e) => tracing::warn!("reaction lookup task failed: {e}"),
            },
            event = events.recv() => {
                let Some(event) = event else {
                    // Stream ended; the gateway is gone but the other loops
                    // keep running until shutdown.
                    tracing::warn!("gateway notification stream closed");
                    cancel.cancelled().await;
                    break;
                };
                let at = shared.clock.now();
                dispatch(&shared, &mut lookups, &mut tasks, event, at);
            }
        }
    }

    tasks.shutdown().await;
    tracing::debug!(pending_lookups = lookups.len(), "event ingestion stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::BoomConfig;
    use crate::gateway::mock::MockGateway;
    use crate::gateway::Gateway;
    use crate::types::TokioClock;

    fn shared(gw: &MockGateway) -> Arc<Shared> {
        let config = BoomConfig::new("tracked", Duration::from_secs(60), "/unused".into());
        Arc::new(Shared::new(
            config,
            Arc::new(gw.clone()),
            Arc::new(TokioClock::new()),
        ))
    }

    fn id(s: &str) -> MessageId {
        MessageId::new(s)
    }

    fn tracked() -> ChannelId {
        ChannelId::new("tracked")
    }

    fn handle_now(
        shared: &Shared,
        lookups: &mut Lookups,
        event: GatewayEvent,
    ) -> Option<PendingLookup> {
        handle_event(shared, lookups, event, shared.clock.now())
    }

    fn reaction_removed(key: &str) -> GatewayEvent {
        GatewayEvent::ReactionRemoved {
            channel_id: tracked(),
            message_id: id(key),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn created_then_reaction_added() {
        let shared = shared(&MockGateway::new());
        let mut lookups = Lookups::default();
        handle_now(
            &shared,
            &mut lookups,
            GatewayEvent::MessageCreated {
                channel_id: tracked(),
                message_id: id("m"),
            },
        );
        assert!(shared.repository.contains(&id("m")));

        handle_now(
            &shared,
            &mut lookups,
            GatewayEvent::ReactionAdded {
                channel_id: tracked(),
                message_id: id("m"),
            },
        );
        assert!(!shared.repository.contains(&id("m")));
    }

    #[tokio::test(start_paused = true)]
    async fn other_channel_is_ignored() {
        let shared = shared(&MockGateway::new());
        let mut lookups = Lookups::default();
        let lookup = handle_now(
            &shared,
            &mut lookups,
            GatewayEvent::MessageCreated {
                channel_id: ChannelId::new("elsewhere"),
                message_id: id("m"),
            },
        );
        assert!(lookup.is_none());
        assert!(shared.repository.is_empty());
        assert_eq!(shared.metrics.events_ignored.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bulk_delete_removes_each() {
        let shared = shared(&MockGateway::new());
        for key in ["a", "b", "c"] {
            shared.repository.upsert(id(key), shared.clock.now());
        }
        handle_now(
            &shared,
            &mut Lookups::default(),
            GatewayEvent::MessagesDeletedBulk {
                channel_id: tracked(),
                message_ids: vec![id("a"), id("c"), id("never-seen")],
            },
        );
        assert!(shared.repository.contains(&id("b")));
        assert_eq!(shared.repository.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn all_reactions_removed_keys_by_message() {
        let shared = shared(&MockGateway::new());
        tokio::time::advance(Duration::from_secs(7)).await;
        handle_now(
            &shared,
            &mut Lookups::default(),
            GatewayEvent::AllReactionsRemoved {
                channel_id: tracked(),
                message_id: id("m"),
            },
        );
        assert!(shared.repository.contains(&id("m")));
        assert!(!shared.repository.contains(&id("tracked")));
    }

    #[tokio::test(start_paused = true)]
    async fn birth_is_arrival_time() {
        let shared = shared(&MockGateway::new());
        let arrived = shared.clock.now();
        tokio::time::advance(Duration::from_secs(4)).await;
        handle_event(
            &shared,
            &mut Lookups::default(),
            GatewayEvent::MessageCreated {
                channel_id: tracked(),
                message_id: id("m"),
            },
            arrived,
        );
        assert_eq!(shared.repository.birth_of(&id("m")), Some(arrived));
    }

    #[tokio::test(start_paused = true)]
    async fn reaction_removed_restarts_only_when_none_left() {
        let gw = MockGateway::new();
        let shared = shared(&gw);
        let mut lookups = Lookups::default();
        gw.set_reaction_count("still-liked", 1);
        gw.set_reaction_count("bare", 0);

        for key in ["still-liked", "bare"] {
            let lookup = handle_now(&shared, &mut lookups, reaction_removed(key)).unwrap();
            let resolved = resolve(&shared, lookup).await;
            apply(&shared, &mut lookups, resolved);
        }

        assert!(!shared.repository.contains(&id("still-liked")));
        assert!(shared.repository.contains(&id("bare")));
        assert_eq!(lookups.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn birth_is_time_of_removal() {
        let gw = MockGateway::new();
        gw.set_reaction_count("m", 0);
        let shared = shared(&gw);
        let mut lookups = Lookups::default();
        let removed_at = shared.clock.now();

        let lookup = handle_now(
            &shared,
            &mut lookups,
            GatewayEvent::EmojiReactionsRemoved {
                channel_id: tracked(),
                message_id: id("m"),
            },
        )
        .unwrap();
        tokio::time::advance(Duration::from_secs(3)).await;
        let resolved = resolve(&shared, lookup).await;
        apply(&shared, &mut lookups, resolved);

        assert_eq!(shared.repository.birth_of(&id("m")), Some(removed_at));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_lookup_leaves_state() {
        let shared = shared(&MockGateway::new());
        let mut lookups = Lookups::default();
        let lookup = handle_now(&shared, &mut lookups, reaction_removed("unknown")).unwrap();
        let resolved = resolve(&shared, lookup).await;
        assert!(!resolved.bare);
        apply(&shared, &mut lookups, resolved);
        assert!(shared.repository.is_empty());
        assert_eq!(lookups.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn later_notification_supersedes_lookup() {
        let gw = MockGateway::new();
        gw.set_reaction_count("m", 0);
        let shared = shared(&gw);
        let mut lookups = Lookups::default();

        let first = handle_now(&shared, &mut lookups, reaction_removed("m")).unwrap();
        let second = handle_now(&shared, &mut lookups, reaction_removed("m")).unwrap();
        assert_ne!(first.ticket, second.ticket);

        // The older answer is discarded, the newer one still applies.
        let resolved = resolve(&shared, first).await;
        apply(&shared, &mut lookups, resolved);
        assert!(shared.repository.is_empty());
        let resolved = resolve(&shared, second).await;
        apply(&shared, &mut lookups, resolved);
        assert!(shared.repository.contains(&id("m")));
    }

    #[tokio::test(start_paused = true)]
    async fn loop_applies_stream_until_cancelled() {
        let gw = MockGateway::new();
        gw.set_reaction_count("r", 0);
        let shared = shared(&gw);
        let sub = gw.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(shared.clone(), Vec::new(), sub.events, cancel.clone()));

        gw.emit(GatewayEvent::MessageCreated {
            channel_id: tracked(),
            message_id: id("c"),
        })
        .await;
        gw.emit(reaction_removed("r")).await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(shared.repository.contains(&id("c")));
        assert!(shared.repository.contains(&id("r")));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn reaction_added_during_slow_lookup_keeps_exemption() {
        let gw = MockGateway::new();
        // The remote count was taken before the new reaction landed.
        gw.set_reaction_count("m", 0);
        gw.set_lookup_delay(Duration::from_millis(200));
        let shared = shared(&gw);
        let sub = gw.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(shared.clone(), Vec::new(), sub.events, cancel.clone()));

        gw.emit(reaction_removed("m")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        gw.emit(GatewayEvent::ReactionAdded {
            channel_id: tracked(),
            message_id: id("m"),
        })
        .await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(!shared.repository.contains(&id("m")));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_does_not_rewind_newer_birth() {
        let gw = MockGateway::new();
        gw.set_reaction_count("m", 0);
        gw.set_lookup_delay(Duration::from_millis(200));
        let shared = shared(&gw);
        let sub = gw.subscribe();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(shared.clone(), Vec::new(), sub.events, cancel.clone()));

        gw.emit(reaction_removed("m")).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        gw.emit(GatewayEvent::AllReactionsRemoved {
            channel_id: tracked(),
            message_id: id("m"),
        })
        .await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let reset_birth = shared.repository.birth_of(&id("m")).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(shared.repository.birth_of(&id("m")), Some(reset_birth));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_is_applied_before_stream() {
        let gw = MockGateway::new();
        let shared = shared(&gw);
        let sub = gw.subscribe();
        let buffered_at = shared.clock.now();
        tokio::time::advance(Duration::from_secs(2)).await;

        let backlog = vec![
            (
                buffered_at,
                GatewayEvent::MessageCreated {
                    channel_id: tracked(),
                    message_id: id("early"),
                },
            ),
            (
                buffered_at,
                GatewayEvent::MessageCreated {
                    channel_id: tracked(),
                    message_id: id("gone"),
                },
            ),
        ];
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(shared.clone(), backlog, sub.events, cancel.clone()));

        gw.emit(GatewayEvent::MessageDeleted {
            channel_id: tracked(),
            message_id: id("gone"),
        })
        .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(shared.repository.birth_of(&id("early")), Some(buffered_at));
        assert!(!shared.repository.contains(&id("gone")));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn closed_stream_waits_for_cancel() {
        let shared = shared(&MockGateway::new());
        let (tx, rx) = mpsc::channel(1);
        drop(tx);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(shared, Vec::new(), rx, cancel.clone()));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        task.await.unwrap();
    }
}
