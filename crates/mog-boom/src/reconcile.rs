/// Startup reconciliation.
///
/// The process may have missed notifications while stopped, so the working
/// set is rebuilt from the remote channel history: every unreacted message is
/// tracked, keeping the birth recorded in the last snapshot when there is one
/// and starting a fresh countdown otherwise.
use crate::config::PAGE_LIMIT;
use crate::error::BoomError;
use crate::gateway::Gateway;
use crate::store::{Entries, SnapshotStore};
use crate::types::{Birth, ChannelId, MessageId};

/// Prior snapshot, or an empty set when none was ever written.
pub async fn load_prior(snapshot: &SnapshotStore) -> Result<Entries, BoomError> {
    match snapshot.read().await {
        Ok(entries) => Ok(entries),
        Err(e) if e.is_not_found() => {
            tracing::info!("no snapshot at {}, starting empty", snapshot.path().display());
            Ok(Entries::new())
        }
        Err(e) => Err(e),
    }
}

/// Merge the channel history with `prior` into the initial working set.
pub async fn reconcile<G: Gateway + ?Sized>(
    gateway: &G,
    channel_id: &ChannelId,
    prior: &Entries,
    now: Birth,
) -> Result<Entries, BoomError> {
    let mut next = Entries::new();
    let mut before: Option<MessageId> = None;
    let mut seen = 0usize;
    let mut exempt = 0usize;

    loop {
        let page = gateway
            .channel_messages(channel_id, before.as_ref(), PAGE_LIMIT)
            .await
            .map_err(|source| BoomError::Reconcile {
                channel: channel_id.to_string(),
                source,
            })?;
        let Some(last) = page.last() else {
            break;
        };
        before = Some(last.id.clone());

        for msg in page {
            seen += 1;
            if msg.is_exempt() {
                exempt += 1;
                continue;
            }
            let birth = prior.get(&msg.id).copied().unwrap_or(now);
            next.insert(msg.id, birth);
        }
    }

    let carried = next.keys().filter(|id| prior.contains_key(*id)).count();
    tracing::info!(
        channel = %channel_id,
        seen,
        exempt,
        tracked = next.len(),
        carried,
        "reconciled channel history"
    );
    Ok(next)
}
