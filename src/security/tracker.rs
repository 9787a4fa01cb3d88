//! Sliding-window observation tracker
//!
//! Keeps, per (guild, subject, detector), a time-ordered queue of
//! observations and answers "how many fell inside the last N seconds".
//! Queues are pruned lazily on every `record` and in bulk by a background
//! sweep. Nothing here is persisted.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::{GuildId, UserId};

use super::events::MutationKind;

/// How long observations are retained, in seconds. Detector windows are
/// validated against this bound.
pub const RETENTION_HORIZON_SECS: u64 = 600;

/// Default interval of the background sweep, in seconds
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Which detector an observation belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetectorKind {
    Raid,
    /// Joiners an anti-raid detection already acted on
    RaidTargeted,
    Spam,
    Nuke,
    Repeat,
}

/// Whom a window is kept for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    /// One window for the whole guild (join tracking)
    Guild,
    /// A messaging user or a guild-mutating actor
    User(UserId),
}

/// Key of one observation window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackerKey {
    pub guild_id: GuildId,
    pub subject: Subject,
    pub kind: DetectorKind,
}

impl TrackerKey {
    #[must_use]
    pub fn guild(guild_id: GuildId, kind: DetectorKind) -> Self {
        Self {
            guild_id,
            subject: Subject::Guild,
            kind,
        }
    }

    #[must_use]
    pub fn user(guild_id: GuildId, user_id: UserId, kind: DetectorKind) -> Self {
        Self {
            guild_id,
            subject: Subject::User(user_id),
            kind,
        }
    }
}

/// Data carried alongside a timestamp
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    None,
    /// The member who joined
    Member(UserId),
    /// Normalised message content
    Content(String),
    /// A guild mutation attributed through the audit log
    Mutation { kind: MutationKind, entry_id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub at: DateTime<Utc>,
    pub payload: Payload,
}

/// Result of one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Windows dropped because nothing in them was still retained
    pub removed_windows: usize,
    /// Windows still tracked after the sweep
    pub remaining_windows: usize,
}

/// In-memory store of observation windows
#[derive(Debug)]
pub struct WindowTracker {
    windows: DashMap<TrackerKey, VecDeque<Observation>>,
    horizon_secs: u64,
}

impl Default for WindowTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl WindowTracker {
    /// Create a tracker with the default retention horizon
    #[must_use]
    pub fn new() -> Self {
        Self::with_horizon(RETENTION_HORIZON_SECS)
    }

    /// Create a tracker with a custom retention horizon, in seconds
    #[must_use]
    pub fn with_horizon(horizon_secs: u64) -> Self {
        Self {
            windows: DashMap::new(),
            horizon_secs,
        }
    }

    /// Append an observation and evict expired entries from the front
    pub fn record(&self, key: TrackerKey, at: DateTime<Utc>, payload: Payload) {
        let mut queue = self.windows.entry(key).or_default();
        queue.push_back(Observation { at, payload });
        if let Some(cutoff) = window_start(at, self.horizon_secs) {
            while queue.front().is_some_and(|first| first.at < cutoff) {
                queue.pop_front();
            }
        }
    }

    /// Number of observations with `at >= now - window_secs`
    ///
    /// Queues may hold entries older than `window_secs` and may be out of
    /// order, so every retained entry is checked. A window reaching past the
    /// representable time range counts everything retained.
    #[must_use]
    pub fn count_within(&self, key: &TrackerKey, window_secs: u64, now: DateTime<Utc>) -> usize {
        let start = window_start(now, window_secs);
        self.windows
            .get(key)
            .map_or(0, |queue| queue.iter().filter(|o| inside(o, start)).count())
    }

    /// Observations inside the window, most recent first, at most `limit`
    #[must_use]
    pub fn recent(
        &self,
        key: &TrackerKey,
        window_secs: u64,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Vec<Observation> {
        let start = window_start(now, window_secs);
        let mut observations: Vec<Observation> = self
            .windows
            .get(key)
            .map(|queue| queue.iter().filter(|o| inside(o, start)).cloned().collect())
            .unwrap_or_default();
        // Stable sort keeps insertion order between equal timestamps; reverse
        // afterwards so the later insert wins ties.
        observations.sort_by_key(|o| o.at);
        observations.reverse();
        observations.truncate(limit);
        observations
    }

    /// Whether any retained observation under `key` matches
    pub fn contains(&self, key: &TrackerKey, predicate: impl Fn(&Observation) -> bool) -> bool {
        self.windows
            .get(key)
            .is_some_and(|queue| queue.iter().any(predicate))
    }

    /// Drop expired observations and every window left empty
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = window_start(now, self.horizon_secs);
        let before = self.windows.len();
        self.windows.retain(|_, queue| {
            queue.retain(|o| inside(o, cutoff));
            !queue.is_empty()
        });
        let remaining = self.windows.len();
        SweepReport {
            removed_windows: before.saturating_sub(remaining),
            remaining_windows: remaining,
        }
    }

    /// Number of tracked windows
    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

/// `now - secs`, or `None` when that instant is not representable
fn window_start(now: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .and_then(|span| now.checked_sub_signed(span))
}

fn inside(observation: &Observation, start: Option<DateTime<Utc>>) -> bool {
    start.is_none_or(|start| observation.at >= start)
}
