//! Auto-moderation content filters
//!
//! Checks run in a fixed order and stop at the first hit: banned words, then
//! excessive capitals, then repeated messages. The repeat filter is the only
//! one that keeps state, in the shared [`WindowTracker`].
//!
//! The `warn` action escalates: a member who already holds
//! [`MAX_WARNINGS`] warnings is timed out instead. Their count is reset only
//! once that timeout lands, see [`settle_escalations`]. Counts expire
//! [`WARNING_RESET_HOURS`] after the first warning.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use derive_more::Display;
use poise::serenity_prelude::{GuildId, UserId};

use super::action::{
    AUTOMOD_TIMEOUT_SECS, AutoModAction, PolicyAction, RemediationAction, RemediationKind, RemediationTarget,
};
use super::detection::{Detection, DetectionReport};
use super::events::IncomingMessage;
use super::policy::{AutoModConfig, Feature};
use super::tracker::{DetectorKind, Payload, RETENTION_HORIZON_SECS, TrackerKey, WindowTracker};

/// Warnings a member may hold before the next one mutes them
pub const MAX_WARNINGS: u32 = 2;

/// Hours after the first warning at which a member's count is cleared
pub const WARNING_RESET_HOURS: i64 = 24;

/// How long auto-mod notices stay in the channel
pub const NOTICE_TTL: Duration = Duration::from_secs(10);

/// Which filter a message tripped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Violation {
    #[display("banned word detected")]
    BannedWord,
    #[display("excessive caps detected")]
    Caps,
    #[display("repeated messages detected")]
    Repetition,
}

/// Percentage of alphabetic characters that are uppercase, `None` without letters
#[must_use]
pub fn caps_ratio(content: &str) -> Option<f64> {
    let (letters, upper) = content
        .chars()
        .filter(|c| c.is_alphabetic())
        .fold((0u32, 0u32), |(letters, upper), c| {
            (letters + 1, upper + u32::from(c.is_uppercase()))
        });
    (letters > 0).then(|| f64::from(upper) / f64::from(letters) * 100.0)
}

/// Run the filters against a message, recording it for the repeat check
/// only when the earlier filters pass
pub fn check(tracker: &WindowTracker, config: &AutoModConfig, guild_id: GuildId, message: &IncomingMessage) -> Option<Violation> {
    let content = message.content.to_lowercase();

    if config
        .banned_words
        .iter()
        .any(|word| !word.is_empty() && content.contains(word.as_str()))
    {
        return Some(Violation::BannedWord);
    }

    if caps_ratio(&message.content).is_some_and(|ratio| ratio > f64::from(config.caps_threshold)) {
        return Some(Violation::Caps);
    }

    let key = TrackerKey::user(guild_id, message.author_id, DetectorKind::Repeat);
    tracker.record(key, message.at, Payload::Content(content));

    let threshold = config.repeat_threshold as usize;
    let recent = tracker.recent(&key, RETENTION_HORIZON_SECS, message.at, threshold);
    let repeated = recent.len() >= threshold
        && recent
            .windows(2)
            .all(|pair| pair[0].payload == pair[1].payload);
    repeated.then_some(Violation::Repetition)
}

/// Result of adding a warning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarnOutcome {
    /// The member now holds this many warnings
    Warned(u32),
    /// The member was already at the limit and should be muted
    Escalate,
}

#[derive(Debug, Clone, Copy)]
struct WarnRecord {
    count: u32,
    first_at: DateTime<Utc>,
}

/// Per-member warning counts
#[derive(Debug, Default)]
pub struct WarnLedger {
    records: DashMap<(GuildId, UserId), WarnRecord>,
}

impl WarnLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a warning, or report that the member must be escalated
    pub fn warn(&self, guild_id: GuildId, user_id: UserId, now: DateTime<Utc>) -> WarnOutcome {
        let mut record = self.records.entry((guild_id, user_id)).or_insert(WarnRecord {
            count: 0,
            first_at: now,
        });
        if now - record.first_at >= chrono::Duration::hours(WARNING_RESET_HOURS) {
            *record = WarnRecord {
                count: 0,
                first_at: now,
            };
        }

        if record.count >= MAX_WARNINGS {
            return WarnOutcome::Escalate;
        }
        record.count += 1;
        WarnOutcome::Warned(record.count)
    }

    /// Current warning count
    #[must_use]
    pub fn count(&self, guild_id: GuildId, user_id: UserId) -> u32 {
        self.records.get(&(guild_id, user_id)).map_or(0, |record| record.count)
    }

    /// Forget a member's warnings
    pub fn clear(&self, guild_id: GuildId, user_id: UserId) {
        self.records.remove(&(guild_id, user_id));
    }

    /// Drop counts whose reset time has passed
    pub fn expire(&self, now: DateTime<Utc>) {
        self.records
            .retain(|_, record| now - record.first_at < chrono::Duration::hours(WARNING_RESET_HOURS));
    }
}

/// Clear the warnings of every member an auto-mod timeout was applied to
///
/// A failed mute leaves the count in place so the next warning escalates again.
pub fn settle_escalations(ledger: &WarnLedger, report: &DetectionReport) {
    let detection = &report.detection;
    if detection.feature != Feature::AutoMod || detection.action.get_type() != RemediationKind::Timeout {
        return;
    }
    for outcome in report.outcomes.iter().filter(|outcome| outcome.result.is_ok()) {
        ledger.clear(detection.guild_id, outcome.user_id);
    }
}

/// Evaluate the filters and resolve the configured action
pub fn evaluate(
    tracker: &WindowTracker,
    ledger: &WarnLedger,
    config: &AutoModConfig,
    message: &IncomingMessage,
) -> Option<Detection> {
    if !config.enabled {
        return None;
    }
    let guild_id = message.guild_id?;
    let violation = check(tracker, config, guild_id, message)?;

    let reason = format!("Auto-Mod: {violation}");
    let mention = format!("<@{}>", message.author_id);
    let target = RemediationTarget::message(
        guild_id,
        message.author_id,
        message.channel_id,
        message.message_id,
        reason.clone(),
    );
    let timeout = RemediationAction::Timeout {
        seconds: AUTOMOD_TIMEOUT_SECS,
    };

    let (action, target) = match config.action {
        AutoModAction::Delete | AutoModAction::Mute => (config.action.remediation(), target),
        AutoModAction::Warn => match ledger.warn(guild_id, message.author_id, message.at) {
            WarnOutcome::Warned(count) => (
                RemediationAction::Warn,
                target.with_notice(
                    format!("{mention}, warning ({count}/{MAX_WARNINGS}): {violation}!"),
                    Some(NOTICE_TTL),
                ),
            ),
            WarnOutcome::Escalate => (
                timeout,
                RemediationTarget {
                    reason: format!("{reason} (too many warnings)"),
                    ..target
                }
                .with_notice(
                    format!("{mention}, you have been muted for 1 hour after too many warnings!"),
                    Some(NOTICE_TTL),
                ),
            ),
        },
    };

    Some(Detection::new(Feature::AutoMod, guild_id, reason, action, vec![target]))
}
