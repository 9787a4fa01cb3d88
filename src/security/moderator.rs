//! Moderation API used by the engine
//!
//! [`Moderator`] is the seam between the detectors and the platform. The
//! serenity implementation translates HTTP failures into
//! [`RemediationError`] so callers can tell a missing permission apart from
//! a missing target.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serenity::all::{ChannelId, EditMember, GuildId, Http, MessageId, RoleId, UserId};
use serenity::model::guild::audit_log::{Action, ChannelAction, MemberAction};
use tracing::debug;

use super::error::{RemediationError, RemediationResult};
use super::events::{AuditEntry, MutationKind};

/// Calls the engine makes against the platform
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Moderator: Send + Sync {
    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> RemediationResult;

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> RemediationResult;

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> RemediationResult;

    /// Look up a role by exact name
    async fn find_role(&self, guild_id: GuildId, name: &str) -> RemediationResult<Option<RoleId>>;

    async fn timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        until: DateTime<Utc>,
        reason: &str,
    ) -> RemediationResult;

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> RemediationResult;

    /// Post a message, removing it again after `delete_after` if given
    async fn notify(
        &self,
        channel_id: ChannelId,
        content: &str,
        delete_after: Option<Duration>,
    ) -> RemediationResult;

    /// Newest audit-log entry for this kind of mutation
    async fn latest_audit_entry(
        &self,
        guild_id: GuildId,
        kind: MutationKind,
    ) -> RemediationResult<Option<AuditEntry>>;
}

/// [`Moderator`] backed by the Discord HTTP API
#[derive(Clone)]
pub struct SerenityModerator {
    http: Arc<Http>,
}

impl SerenityModerator {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn audit_action(kind: MutationKind) -> Action {
    match kind {
        MutationKind::ChannelDelete => Action::Channel(ChannelAction::Delete),
        MutationKind::MemberKick => Action::Member(MemberAction::Kick),
    }
}

#[async_trait::async_trait]
impl Moderator for SerenityModerator {
    async fn ban(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> RemediationResult {
        guild_id
            .ban_with_reason(&self.http, user_id, 0, reason)
            .await
            .map_err(RemediationError::from)
    }

    async fn kick(&self, guild_id: GuildId, user_id: UserId, reason: &str) -> RemediationResult {
        guild_id
            .kick_with_reason(&self.http, user_id, reason)
            .await
            .map_err(RemediationError::from)
    }

    async fn add_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
        reason: &str,
    ) -> RemediationResult {
        self.http
            .add_member_role(guild_id, user_id, role_id, Some(reason))
            .await
            .map_err(RemediationError::from)
    }

    async fn find_role(&self, guild_id: GuildId, name: &str) -> RemediationResult<Option<RoleId>> {
        let roles = guild_id
            .roles(&self.http)
            .await
            .map_err(RemediationError::from)?;
        Ok(roles
            .into_iter()
            .find_map(|(id, role)| (role.name == name).then_some(id)))
    }

    async fn timeout(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        until: DateTime<Utc>,
        reason: &str,
    ) -> RemediationResult {
        let builder = EditMember::new()
            .disable_communication_until_datetime(until.into())
            .audit_log_reason(reason);
        guild_id
            .edit_member(&self.http, user_id, builder)
            .await
            .map(|_| ())
            .map_err(RemediationError::from)
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> RemediationResult {
        channel_id
            .delete_message(&self.http, message_id)
            .await
            .map_err(RemediationError::from)
    }

    async fn notify(
        &self,
        channel_id: ChannelId,
        content: &str,
        delete_after: Option<Duration>,
    ) -> RemediationResult {
        let message = channel_id
            .say(&self.http, content)
            .await
            .map_err(RemediationError::from)?;

        if let Some(delay) = delete_after {
            let http = Arc::clone(&self.http);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = message.channel_id.delete_message(&http, message.id).await {
                    debug!("Failed to remove notice {}: {e}", message.id);
                }
            });
        }
        Ok(())
    }

    async fn latest_audit_entry(
        &self,
        guild_id: GuildId,
        kind: MutationKind,
    ) -> RemediationResult<Option<AuditEntry>> {
        let logs = guild_id
            .audit_logs(&self.http, Some(audit_action(kind)), None, None, Some(1))
            .await
            .map_err(RemediationError::from)?;

        Ok(logs.entries.into_iter().next().map(|entry| AuditEntry {
            entry_id: entry.id.get(),
            actor_id: entry.user_id,
            target_id: entry.target_id.map(|id| id.get()),
            created_at: *entry.id.created_at(),
        }))
    }
}
