//! Last-write-wins conflict resolution.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::DEFAULT_CONFLICT_WINDOW_MS;

/// Which side of a linked pair carries the authoritative state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// `None` when both timestamps are identical; nothing is written then.
    pub winner: Option<Side>,
    /// Both sides changed within the conflict window of each other.
    pub is_conflict: bool,
}

/// Picks the strictly later side and flags near-simultaneous edits.
#[derive(Debug, Clone, Copy)]
pub struct ConflictResolver {
    window: Duration,
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(Duration::milliseconds(DEFAULT_CONFLICT_WINDOW_MS))
    }
}

impl ConflictResolver {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn resolve(
        &self,
        local_updated_at: DateTime<Utc>,
        external_updated_at: DateTime<Utc>,
    ) -> Resolution {
        let winner = match local_updated_at.cmp(&external_updated_at) {
            std::cmp::Ordering::Greater => Some(Side::Local),
            std::cmp::Ordering::Less => Some(Side::External),
            std::cmp::Ordering::Equal => None,
        };
        let gap = (local_updated_at - external_updated_at).abs();
        Resolution {
            winner,
            is_conflict: gap < self.window,
        }
    }
}
