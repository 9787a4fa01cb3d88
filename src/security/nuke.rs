//! Anti-nuke: destructive guild changes attributed through the audit log
//!
//! The actor behind a channel deletion or member removal is the author of the
//! newest matching audit-log entry. Entries older than [`AUDIT_LOOKBACK_SECS`]
//! relative to the event are ignored, and an entry already counted for an
//! actor is never counted again.

use chrono::Duration;
use poise::serenity_prelude::UserId;
use tracing::{debug, info, warn};

use super::action::{PolicyAction, RemediationTarget};
use super::detection::Detection;
use super::error::RemediationError;
use super::events::{AuditEntry, GuildMutation};
use super::moderator::Moderator;
use super::policy::{AntiNukeConfig, Feature};
use super::tracker::{DetectorKind, Payload, TrackerKey, WindowTracker};

pub const NUKE_REASON: &str = "Anti-Nuke: mass guild changes detected";

/// Maximum age of an audit-log entry, relative to the event, to be attributed
pub const AUDIT_LOOKBACK_SECS: i64 = 15;

/// Resolve the actor of a mutation, or `None` when it cannot be attributed
async fn resolve_actor(moderator: &dyn Moderator, mutation: &GuildMutation) -> Option<AuditEntry> {
    let entry = match moderator.latest_audit_entry(mutation.guild_id, mutation.kind).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            info!(guild_id = %mutation.guild_id, kind = %mutation.kind, "No audit-log entry found");
            return None;
        }
        Err(RemediationError::PermissionDenied) => {
            warn!(guild_id = %mutation.guild_id, "Missing permission to read audit logs");
            return None;
        }
        Err(e) => {
            warn!(guild_id = %mutation.guild_id, "Audit-log lookup failed: {e}");
            return None;
        }
    };

    if entry.created_at < mutation.at - Duration::seconds(AUDIT_LOOKBACK_SECS) {
        debug!(entry_id = entry.entry_id, "Audit-log entry too old to attribute");
        return None;
    }
    if entry.target_id.is_some_and(|target| target != mutation.target_id) {
        debug!(entry_id = entry.entry_id, "Audit-log entry is for another target");
        return None;
    }
    Some(entry)
}

/// Attribute a mutation and flag the actor once their change rate reaches the
/// threshold. Changes made by `ignored_actor` (the bot itself) are not counted.
pub async fn evaluate(
    tracker: &WindowTracker,
    moderator: &dyn Moderator,
    config: &AntiNukeConfig,
    mutation: &GuildMutation,
    ignored_actor: Option<UserId>,
) -> Option<Detection> {
    if !config.enabled {
        return None;
    }

    let entry = resolve_actor(moderator, mutation).await?;
    if Some(entry.actor_id) == ignored_actor {
        return None;
    }

    let key = TrackerKey::user(mutation.guild_id, entry.actor_id, DetectorKind::Nuke);
    let already_counted = tracker.contains(&key, |observation| {
        matches!(observation.payload, Payload::Mutation { entry_id, .. } if entry_id == entry.entry_id)
    });
    if already_counted {
        debug!(entry_id = entry.entry_id, "Audit-log entry already counted");
        return None;
    }

    tracker.record(
        key,
        mutation.at,
        Payload::Mutation {
            kind: mutation.kind,
            entry_id: entry.entry_id,
        },
    );

    let changes = tracker.count_within(&key, config.time_window_s, mutation.at);
    info!(
        guild_id = %mutation.guild_id,
        actor_id = %entry.actor_id,
        kind = %mutation.kind,
        changes,
        "Guild change attributed"
    );
    if changes < config.change_threshold as usize {
        return None;
    }

    Some(Detection::new(
        Feature::AntiNuke,
        mutation.guild_id,
        NUKE_REASON,
        config.action.remediation(),
        vec![RemediationTarget::member(mutation.guild_id, entry.actor_id, NUKE_REASON)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::action::{NukeAction, RemediationAction};
    use crate::security::events::MutationKind;
    use crate::security::moderator::MockModerator;
    use chrono::{DateTime, Utc};
    use poise::serenity_prelude::GuildId;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
    }

    fn deletion(channel: u64, secs: i64) -> GuildMutation {
        GuildMutation {
            guild_id: GuildId::new(1),
            kind: MutationKind::ChannelDelete,
            target_id: channel,
            at: at(secs),
        }
    }

    fn enabled() -> AntiNukeConfig {
        AntiNukeConfig {
            enabled: true,
            change_threshold: 3,
            time_window_s: 60,
            action: NukeAction::Ban,
        }
    }

    fn entry(entry_id: u64, actor: u64, target: u64, secs: i64) -> AuditEntry {
        AuditEntry {
            entry_id,
            actor_id: UserId::new(actor),
            target_id: Some(target),
            created_at: at(secs),
        }
    }

    #[tokio::test]
    async fn test_third_deletion_bans_actor() {
        let tracker = WindowTracker::new();
        let mut moderator = MockModerator::new();
        let mut seq = mockall::Sequence::new();
        for (id, secs) in [(10, 0), (11, 5), (12, 10)] {
            moderator
                .expect_latest_audit_entry()
                .times(1)
                .in_sequence(&mut seq)
                .returning(move |_, _| Ok(Some(entry(id, 9, id, secs))));
        }

        assert!(evaluate(&tracker, &moderator, &enabled(), &deletion(10, 0), None).await.is_none());
        assert!(evaluate(&tracker, &moderator, &enabled(), &deletion(11, 5), None).await.is_none());
        let detection = evaluate(&tracker, &moderator, &enabled(), &deletion(12, 10), None)
            .await
            .expect("nuke detected");

        assert_eq!(detection.action, RemediationAction::Ban);
        assert_eq!(detection.target_users(), vec![UserId::new(9)]);
    }

    #[tokio::test]
    async fn test_same_entry_is_counted_once() {
        let tracker = WindowTracker::new();
        let mut moderator = MockModerator::new();
        moderator
            .expect_latest_audit_entry()
            .returning(|_, _| Ok(Some(entry(10, 9, 10, 0))));

        for _ in 0..5 {
            assert!(
                evaluate(&tracker, &moderator, &enabled(), &deletion(10, 1), None)
                    .await
                    .is_none()
            );
        }
        let key = TrackerKey::user(GuildId::new(1), UserId::new(9), DetectorKind::Nuke);
        assert_eq!(tracker.count_within(&key, 60, at(1)), 1);
    }

    #[tokio::test]
    async fn test_stale_or_mismatched_entries_are_skipped() {
        let tracker = WindowTracker::new();
        let mut moderator = MockModerator::new();
        let mut seq = mockall::Sequence::new();
        moderator
            .expect_latest_audit_entry()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(entry(10, 9, 10, 0))));
        moderator
            .expect_latest_audit_entry()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(Some(entry(11, 9, 99, 30))));

        // Entry created 30s before the deletion
        assert!(evaluate(&tracker, &moderator, &enabled(), &deletion(10, 30), None).await.is_none());
        // Entry is about another channel
        assert!(evaluate(&tracker, &moderator, &enabled(), &deletion(11, 30), None).await.is_none());
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_forbidden_audit_log_is_skipped() {
        let tracker = WindowTracker::new();
        let mut moderator = MockModerator::new();
        moderator
            .expect_latest_audit_entry()
            .returning(|_, _| Err(RemediationError::PermissionDenied));

        assert!(evaluate(&tracker, &moderator, &enabled(), &deletion(10, 0), None).await.is_none());
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_missing_entry_and_own_actions_are_skipped() {
        let tracker = WindowTracker::new();
        let mut moderator = MockModerator::new();
        moderator.expect_latest_audit_entry().returning(|_, _| Ok(None));
        assert!(evaluate(&tracker, &moderator, &enabled(), &deletion(10, 0), None).await.is_none());

        let mut moderator = MockModerator::new();
        moderator
            .expect_latest_audit_entry()
            .returning(|_, _| Ok(Some(entry(10, 9, 10, 0))));
        assert!(
            evaluate(&tracker, &moderator, &enabled(), &deletion(10, 0), Some(UserId::new(9)))
                .await
                .is_none()
        );
        assert!(tracker.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_skips_audit_lookup() {
        let tracker = WindowTracker::new();
        let mut moderator = MockModerator::new();
        moderator.expect_latest_audit_entry().never();

        let config = AntiNukeConfig::default();
        assert!(evaluate(&tracker, &moderator, &config, &deletion(10, 0), None).await.is_none());
    }
}
