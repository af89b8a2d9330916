use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Moment from which a message's time-to-live is measured.
pub type Birth = DateTime<Utc>;

/// Opaque message identifier assigned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

/// Opaque channel identifier assigned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

macro_rules! string_id {
    ($ty:ident) => {
        impl $ty {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $ty {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(MessageId);
string_id!(ChannelId);

/// One message as reported by a remote channel listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMessage {
    pub id: MessageId,
    /// Total reactions currently on the message.
    pub reaction_count: usize,
}

impl RemoteMessage {
    pub fn new(id: impl Into<MessageId>, reaction_count: usize) -> Self {
        Self {
            id: id.into(),
            reaction_count,
        }
    }

    /// Messages carrying any reaction never expire.
    pub fn is_exempt(&self) -> bool {
        self.reaction_count > 0
    }
}

// ── Clock ─────────────────────────────────────────────────────────────

/// Source of wall-clock time for births and expiry deadlines.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Birth;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Birth {
        Utc::now()
    }
}

/// Wall clock anchored to tokio's monotonic clock.
///
/// Follows `tokio::time::pause` / `advance`, so schedules driven by
/// `tokio::time::sleep` and births read from this clock stay in step.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    anchor_wall: Birth,
    anchor: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Clock whose current reading is `wall`.
    pub fn starting_at(wall: Birth) -> Self {
        Self {
            anchor_wall: wall,
            anchor: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Birth {
        let elapsed = chrono::Duration::from_std(self.anchor.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor_wall + elapsed
    }
}

/// Time left until `deadline`, zero if it already passed.
pub fn until(deadline: Birth, now: Birth) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// `birth + ttl`, saturating on overflow.
pub fn deadline(birth: Birth, ttl: Duration) -> Birth {
    chrono::Duration::from_std(ttl)
        .ok()
        .and_then(|ttl| birth.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
