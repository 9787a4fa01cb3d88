//! Remediation action types
//!
//! Each detector accepts a restricted set of actions in its policy. Those are
//! resolved into a [`RemediationAction`] at evaluation time and executed by
//! the handler registry.

use std::time::Duration;

use derive_more::Display;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, UserId};
use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Name of the role applied by the role-based mute
pub const MUTED_ROLE_NAME: &str = "Muted";

/// Length of the auto-mod timeout, in seconds (one hour)
pub const AUTOMOD_TIMEOUT_SECS: u32 = 3600;

/// Kind of remediation, used to look up the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum RemediationKind {
    #[display("Ban")]
    Ban,
    #[display("Kick")]
    Kick,
    #[display("Mute (role)")]
    MuteRole,
    #[display("Timeout")]
    Timeout,
    #[display("Delete Message")]
    DeleteMessage,
    #[display("Warn")]
    Warn,
}

/// A concrete action applied against the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemediationAction {
    /// Ban the member from the guild
    Ban,
    /// Kick the member from the guild
    Kick,
    /// Add the "Muted" role; a missing role is a skip
    MuteRole,
    /// Platform timeout, falling back to the "Muted" role when forbidden
    Timeout { seconds: u32 },
    /// Delete the triggering message, posting the target's notice if any
    DeleteMessage,
    /// Post the target's notice in the channel
    Warn,
}

impl RemediationAction {
    /// Get the kind of this action
    #[must_use]
    pub fn get_type(&self) -> RemediationKind {
        match self {
            Self::Ban => RemediationKind::Ban,
            Self::Kick => RemediationKind::Kick,
            Self::MuteRole => RemediationKind::MuteRole,
            Self::Timeout { .. } => RemediationKind::Timeout,
            Self::DeleteMessage => RemediationKind::DeleteMessage,
            Self::Warn => RemediationKind::Warn,
        }
    }
}

/// Channel message posted alongside a remediation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub text: String,
    pub delete_after: Option<Duration>,
}

/// Who and what a remediation is applied to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemediationTarget {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Channel and message of the triggering message, if any
    pub message: Option<(ChannelId, MessageId)>,
    /// Audit-log reason
    pub reason: String,
    pub notice: Option<Notice>,
}

impl RemediationTarget {
    /// Target a member without a message
    pub fn member(guild_id: GuildId, user_id: UserId, reason: impl Into<String>) -> Self {
        Self {
            guild_id,
            user_id,
            message: None,
            reason: reason.into(),
            notice: None,
        }
    }

    /// Target the author of a message
    pub fn message(
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
        message_id: MessageId,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            guild_id,
            user_id,
            message: Some((channel_id, message_id)),
            reason: reason.into(),
            notice: None,
        }
    }

    /// Attach a channel notice
    #[must_use]
    pub fn with_notice(mut self, text: impl Into<String>, delete_after: Option<Duration>) -> Self {
        self.notice = Some(Notice {
            text: text.into(),
            delete_after,
        });
        self
    }

    /// Channel of the triggering message
    #[must_use]
    pub fn channel_id(&self) -> Option<ChannelId> {
        self.message.map(|(channel_id, _)| channel_id)
    }
}

/// An action name an administrator can choose for a feature
pub trait PolicyAction: Sized + Copy {
    /// Feature name used in validation messages
    const FEATURE: &'static str;
    /// Accepted names, comma separated
    const EXPECTED: &'static str;

    fn from_name(name: &str) -> Option<Self>;

    /// Resolve to the action executed against the platform
    fn remediation(self) -> RemediationAction;

    /// Parse an administrator-supplied action name
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidAction` for names outside `EXPECTED`.
    fn parse(value: &str) -> Result<Self, ConfigError> {
        Self::from_name(&value.trim().to_lowercase()).ok_or_else(|| ConfigError::InvalidAction {
            feature: Self::FEATURE,
            value: value.to_string(),
            expected: Self::EXPECTED,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum RaidAction {
    #[default]
    #[display("ban")]
    Ban,
    #[display("kick")]
    Kick,
    #[display("mute")]
    Mute,
}

impl PolicyAction for RaidAction {
    const FEATURE: &'static str = "anti-raid";
    const EXPECTED: &'static str = "ban, kick, mute";

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ban" => Some(Self::Ban),
            "kick" => Some(Self::Kick),
            "mute" => Some(Self::Mute),
            _ => None,
        }
    }

    fn remediation(self) -> RemediationAction {
        match self {
            Self::Ban => RemediationAction::Ban,
            Self::Kick => RemediationAction::Kick,
            Self::Mute => RemediationAction::MuteRole,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum LinkAction {
    #[default]
    #[display("delete")]
    Delete,
    #[display("warn")]
    Warn,
}

impl PolicyAction for LinkAction {
    const FEATURE: &'static str = "anti-links";
    const EXPECTED: &'static str = "delete, warn";

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "delete" => Some(Self::Delete),
            "warn" => Some(Self::Warn),
            _ => None,
        }
    }

    fn remediation(self) -> RemediationAction {
        match self {
            Self::Delete => RemediationAction::DeleteMessage,
            Self::Warn => RemediationAction::Warn,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum SpamAction {
    #[default]
    #[display("mute")]
    Mute,
    #[display("delete")]
    Delete,
}

impl PolicyAction for SpamAction {
    const FEATURE: &'static str = "anti-spam";
    const EXPECTED: &'static str = "mute, delete";

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "mute" => Some(Self::Mute),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    fn remediation(self) -> RemediationAction {
        match self {
            Self::Mute => RemediationAction::MuteRole,
            Self::Delete => RemediationAction::DeleteMessage,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum NukeAction {
    #[default]
    #[display("ban")]
    Ban,
    #[display("kick")]
    Kick,
}

impl PolicyAction for NukeAction {
    const FEATURE: &'static str = "anti-nuke";
    const EXPECTED: &'static str = "ban, kick";

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "ban" => Some(Self::Ban),
            "kick" => Some(Self::Kick),
            _ => None,
        }
    }

    fn remediation(self) -> RemediationAction {
        match self {
            Self::Ban => RemediationAction::Ban,
            Self::Kick => RemediationAction::Kick,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum AutoModAction {
    #[default]
    #[display("delete")]
    Delete,
    #[display("warn")]
    Warn,
    #[display("mute")]
    Mute,
}

impl PolicyAction for AutoModAction {
    const FEATURE: &'static str = "auto-mod";
    const EXPECTED: &'static str = "delete, warn, mute";

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "delete" => Some(Self::Delete),
            "warn" => Some(Self::Warn),
            "mute" => Some(Self::Mute),
            _ => None,
        }
    }

    fn remediation(self) -> RemediationAction {
        match self {
            Self::Delete => RemediationAction::DeleteMessage,
            Self::Warn => RemediationAction::Warn,
            Self::Mute => RemediationAction::Timeout {
                seconds: AUTOMOD_TIMEOUT_SECS,
            },
        }
    }
}
