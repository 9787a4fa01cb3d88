//! Platform-independent event facts fed into the engine
//!
//! The gateway handler converts serenity events into these so detectors can
//! be driven directly from tests.

use chrono::{DateTime, Utc};
use derive_more::Display;
use poise::serenity_prelude::{self as serenity, ChannelId, GuildId, MessageId, UserId};

/// A structural change to a guild that anti-nuke attributes to an actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum MutationKind {
    #[display("channel_delete")]
    ChannelDelete,
    /// A member removal, looked up in the audit log as a kick
    #[display("kick")]
    MemberKick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberJoin {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub at: DateTime<Utc>,
}

impl From<&serenity::Member> for MemberJoin {
    fn from(member: &serenity::Member) -> Self {
        Self {
            guild_id: member.guild_id,
            user_id: member.user.id,
            at: member
                .joined_at
                .map_or_else(Utc::now, |joined| *joined),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    /// `None` for direct messages
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub author_id: UserId,
    pub author_is_bot: bool,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl From<&serenity::Message> for IncomingMessage {
    fn from(message: &serenity::Message) -> Self {
        Self {
            guild_id: message.guild_id,
            channel_id: message.channel_id,
            message_id: message.id,
            author_id: message.author.id,
            author_is_bot: message.author.bot,
            content: message.content.clone(),
            at: *message.timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildMutation {
    pub guild_id: GuildId,
    pub kind: MutationKind,
    /// Deleted channel or removed member
    pub target_id: u64,
    pub at: DateTime<Utc>,
}

/// The newest audit-log entry matching a mutation kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub entry_id: u64,
    pub actor_id: UserId,
    pub target_id: Option<u64>,
    pub created_at: DateTime<Utc>,
}
