//! Anti-raid: guild-wide join rate
//!
//! Once a raid is detected, every later join re-triggers while the rate stays
//! above the threshold. Joiners already acted on since their latest join are
//! left out of later detections.

use std::collections::HashSet;

use poise::serenity_prelude::UserId;
use tracing::debug;

use super::action::{PolicyAction, RemediationTarget};
use super::detection::Detection;
use super::events::MemberJoin;
use super::policy::{AntiRaidConfig, Feature};
use super::tracker::{DetectorKind, Payload, TrackerKey, WindowTracker};

pub const RAID_REASON: &str = "Anti-Raid: mass join detected";

/// Record a join and, once the join rate reaches the threshold, target the
/// most recent distinct joiners inside the window that no earlier detection
/// has targeted since they joined
pub fn evaluate(tracker: &WindowTracker, config: &AntiRaidConfig, join: &MemberJoin) -> Option<Detection> {
    if !config.enabled {
        return None;
    }

    let key = TrackerKey::guild(join.guild_id, DetectorKind::Raid);
    tracker.record(key, join.at, Payload::Member(join.user_id));

    let threshold = config.join_threshold as usize;
    let joins = tracker.count_within(&key, config.time_window_s, join.at);
    debug!(guild_id = %join.guild_id, joins, threshold, "Join recorded");
    if joins < threshold {
        return None;
    }

    let targeted_key = TrackerKey::guild(join.guild_id, DetectorKind::RaidTargeted);
    let mut seen = HashSet::new();
    let joiners: Vec<UserId> = tracker
        .recent(&key, config.time_window_s, join.at, usize::MAX)
        .into_iter()
        .filter_map(|observation| match observation.payload {
            Payload::Member(user_id) => Some((user_id, observation.at)),
            _ => None,
        })
        .filter(|(user_id, _)| seen.insert(*user_id))
        .take(threshold)
        .filter(|(user_id, joined_at)| {
            !tracker.contains(&targeted_key, |o| {
                o.payload == Payload::Member(*user_id) && o.at >= *joined_at
            })
        })
        .map(|(user_id, _)| user_id)
        .collect();

    if joiners.is_empty() {
        debug!(guild_id = %join.guild_id, "Raid joiners already handled");
        return None;
    }
    for user_id in &joiners {
        tracker.record(targeted_key, join.at, Payload::Member(*user_id));
    }

    let targets = joiners
        .into_iter()
        .map(|user_id| RemediationTarget::member(join.guild_id, user_id, RAID_REASON))
        .collect();

    Some(Detection::new(
        Feature::AntiRaid,
        join.guild_id,
        RAID_REASON,
        config.action.remediation(),
        targets,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::action::{RaidAction, RemediationAction};
    use chrono::{DateTime, Utc};
    use poise::serenity_prelude::GuildId;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
    }

    fn join(user: u64, secs: i64) -> MemberJoin {
        MemberJoin {
            guild_id: GuildId::new(1),
            user_id: UserId::new(user),
            at: at(secs),
        }
    }

    fn enabled(threshold: u32, window: u64) -> AntiRaidConfig {
        AntiRaidConfig {
            enabled: true,
            join_threshold: threshold,
            time_window_s: window,
            action: RaidAction::Kick,
        }
    }

    #[test]
    fn test_triggers_on_threshold_join() {
        let tracker = WindowTracker::new();
        let config = enabled(3, 60);

        assert!(evaluate(&tracker, &config, &join(1, 0)).is_none());
        assert!(evaluate(&tracker, &config, &join(2, 5)).is_none());
        let detection = evaluate(&tracker, &config, &join(3, 10)).expect("raid detected");

        assert_eq!(detection.action, RemediationAction::Kick);
        assert_eq!(
            detection.target_users(),
            vec![UserId::new(3), UserId::new(2), UserId::new(1)]
        );
    }

    #[test]
    fn test_targets_exactly_threshold_most_recent() {
        let tracker = WindowTracker::new();
        let config = enabled(5, 60);
        for user in 1..=9 {
            evaluate(&tracker, &enabled(100, 60), &join(user, i64::try_from(user).unwrap_or(0)));
        }
        let detection = evaluate(&tracker, &config, &join(10, 10)).expect("raid detected");

        assert_eq!(
            detection.target_users(),
            (6..=10).rev().map(UserId::new).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_rejoins_are_targeted_once() {
        let tracker = WindowTracker::new();
        let config = enabled(3, 60);
        evaluate(&tracker, &config, &join(1, 0));
        evaluate(&tracker, &config, &join(2, 1));
        let detection = evaluate(&tracker, &config, &join(2, 2)).expect("raid detected");

        assert_eq!(detection.target_users(), vec![UserId::new(2), UserId::new(1)]);
    }

    #[test]
    fn test_joiners_are_targeted_once_per_join() {
        let tracker = WindowTracker::new();
        let config = enabled(3, 60);
        for user in 1..=2 {
            evaluate(&tracker, &config, &join(user, 0));
        }
        let first = evaluate(&tracker, &config, &join(3, 1)).expect("raid detected");
        assert_eq!(first.target_users().len(), 3);

        let next = evaluate(&tracker, &config, &join(4, 2)).expect("raid continues");
        assert_eq!(next.target_users(), vec![UserId::new(4)]);

        let rejoin = evaluate(&tracker, &config, &join(1, 3)).expect("raid continues");
        assert_eq!(rejoin.target_users(), vec![UserId::new(1)]);
    }

    #[test]
    fn test_slow_joins_do_not_trigger() {
        let tracker = WindowTracker::new();
        let config = enabled(3, 10);
        for (user, secs) in [(1, 0), (2, 20), (3, 40), (4, 60)] {
            assert!(evaluate(&tracker, &config, &join(user, secs)).is_none());
        }
    }

    #[test]
    fn test_disabled_records_nothing() {
        let tracker = WindowTracker::new();
        let config = AntiRaidConfig::default();
        for user in 1..=10 {
            assert!(evaluate(&tracker, &config, &join(user, 0)).is_none());
        }
        assert!(tracker.is_empty());
    }
}
