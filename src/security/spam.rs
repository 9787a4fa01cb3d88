//! Anti-spam: per-author message rate

use tracing::debug;

use super::action::{PolicyAction, RemediationTarget};
use super::detection::Detection;
use super::events::IncomingMessage;
use super::policy::{AntiSpamConfig, Feature};
use super::tracker::{DetectorKind, Payload, TrackerKey, WindowTracker};

pub const SPAM_REASON: &str = "Anti-Spam: message flood detected";

/// Record a message and flag its author once the rate reaches the threshold
pub fn evaluate(tracker: &WindowTracker, config: &AntiSpamConfig, message: &IncomingMessage) -> Option<Detection> {
    if !config.enabled {
        return None;
    }
    let guild_id = message.guild_id?;

    let key = TrackerKey::user(guild_id, message.author_id, DetectorKind::Spam);
    tracker.record(key, message.at, Payload::None);

    let count = tracker.count_within(&key, config.time_window_s, message.at);
    if count < config.message_threshold as usize {
        return None;
    }
    debug!(%guild_id, user_id = %message.author_id, count, "Message rate over threshold");

    let target = RemediationTarget::message(
        guild_id,
        message.author_id,
        message.channel_id,
        message.message_id,
        SPAM_REASON,
    );
    Some(Detection::new(
        Feature::AntiSpam,
        guild_id,
        SPAM_REASON,
        config.action.remediation(),
        vec![target],
    ))
}
