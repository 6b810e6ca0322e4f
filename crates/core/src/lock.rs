//! Advisory edit lock.
//!
//! The lock is a timestamp and a location in [`ArticleMeta::editing`]. It
//! stops one side from silently overwriting fresh edits made on the other,
//! and provides no mutual exclusion between processes.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::models::{ArticleMeta, EditLocation};

/// Outcome of a lock check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockDecision {
    /// Write permitted.
    Allow,
    /// The lock is held by the other side; write permitted only because the
    /// caller forced it.
    AllowForced(LockWarning),
    /// The lock is held by the other side and has not expired.
    Refuse(LockWarning),
}

impl LockDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Refuse(_))
    }
}

/// Details of a lock held by the other side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockWarning {
    pub held_by: EditLocation,
    pub locked_by: Option<String>,
    pub minutes_ago: i64,
    pub minutes_remaining: i64,
}

/// Decides whether a side may write, given a lock TTL.
#[derive(Debug, Clone, Copy)]
pub struct LockManager {
    ttl: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(Duration::minutes(10))
    }
}

impl LockManager {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Check whether `requested_by` may write the article at `now`.
    ///
    /// Allowed when no side holds the lock, the requester already holds it,
    /// no timestamp was recorded, or the lock is older than the TTL.
    pub fn check(
        &self,
        meta: &ArticleMeta,
        requested_by: EditLocation,
        now: DateTime<Utc>,
        force: bool,
    ) -> LockDecision {
        let holder = meta.editing.location;
        if holder == EditLocation::None || holder == requested_by {
            return LockDecision::Allow;
        }
        let Some(locked_at) = meta.editing.locked_at else {
            return LockDecision::Allow;
        };

        let age = now - locked_at;
        if age > self.ttl {
            debug!(
                slug = %meta.slug,
                held_by = %holder,
                age_minutes = age.num_minutes(),
                "lock expired"
            );
            return LockDecision::Allow;
        }

        let remaining = self.ttl - age;
        let warning = LockWarning {
            held_by: holder,
            locked_by: meta.editing.locked_by.clone(),
            minutes_ago: age.num_minutes().max(0),
            // Round up so a lock with seconds left never reports 0.
            minutes_remaining: (remaining.num_seconds() + 59) / 60,
        };

        if force {
            warn!(
                slug = %meta.slug,
                held_by = %holder,
                minutes_ago = warning.minutes_ago,
                "overriding edit lock"
            );
            LockDecision::AllowForced(warning)
        } else {
            LockDecision::Refuse(warning)
        }
    }
}
