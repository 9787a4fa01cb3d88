//! Remediation action handlers
//!
//! One handler per [`RemediationKind`], looked up through
//! [`ActionHandlerRegistry`]. Handlers only talk to the platform through the
//! [`Moderator`] trait.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use tracing::{info, warn};

use super::action::{MUTED_ROLE_NAME, RemediationAction, RemediationKind, RemediationTarget};
use super::error::{RemediationError, RemediationResult};
use super::moderator::Moderator;

/// How long the "could not mute" notice stays up
const FAILED_MUTE_NOTICE_TTL: std::time::Duration = std::time::Duration::from_secs(5);

/// Trait for handling remediation actions
#[async_trait::async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the action
    async fn execute(
        &self,
        moderator: &dyn Moderator,
        target: &RemediationTarget,
        action: &RemediationAction,
    ) -> RemediationResult;
}

/// Registry of action handlers
pub struct ActionHandlerRegistry {
    handlers: HashMap<RemediationKind, Box<dyn ActionHandler>>,
}

impl Default for ActionHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ActionHandlerRegistry {
    /// Create a new registry with all handlers registered
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };

        registry.register(RemediationKind::Ban, Box::new(BanHandler));
        registry.register(RemediationKind::Kick, Box::new(KickHandler));
        registry.register(RemediationKind::MuteRole, Box::new(MuteRoleHandler));
        registry.register(RemediationKind::Timeout, Box::new(TimeoutHandler));
        registry.register(RemediationKind::DeleteMessage, Box::new(DeleteMessageHandler));
        registry.register(RemediationKind::Warn, Box::new(WarnHandler));

        registry
    }

    /// Register a handler for an action kind
    pub fn register(&mut self, kind: RemediationKind, handler: Box<dyn ActionHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Get a handler for an action kind
    #[must_use]
    pub fn get(&self, kind: RemediationKind) -> Option<&dyn ActionHandler> {
        self.handlers.get(&kind).map(AsRef::as_ref)
    }

    /// Execute an action
    ///
    /// # Errors
    ///
    /// Returns the handler's `RemediationError`, or `Api` if no handler is
    /// registered for the action kind.
    pub async fn execute(
        &self,
        moderator: &dyn Moderator,
        target: &RemediationTarget,
        action: &RemediationAction,
    ) -> RemediationResult {
        let kind = action.get_type();
        if let Some(handler) = self.get(kind) {
            handler.execute(moderator, target, action).await
        } else {
            Err(RemediationError::Api(format!(
                "No handler registered for action type: {kind}"
            )))
        }
    }
}

/// Add the "Muted" role, reporting a missing role as `NotFound`
async fn apply_mute_role(moderator: &dyn Moderator, target: &RemediationTarget) -> RemediationResult {
    let Some(role_id) = moderator.find_role(target.guild_id, MUTED_ROLE_NAME).await? else {
        return Err(RemediationError::NotFound(format!(
            "role \"{MUTED_ROLE_NAME}\" in guild {}",
            target.guild_id
        )));
    };

    moderator
        .add_role(target.guild_id, target.user_id, role_id, &target.reason)
        .await?;
    info!(
        "Added role {MUTED_ROLE_NAME} to user {} in guild {}",
        target.user_id, target.guild_id
    );
    Ok(())
}

/// Post the target's notice in the triggering channel, if both exist
async fn post_notice(moderator: &dyn Moderator, target: &RemediationTarget) -> RemediationResult {
    let (Some(channel_id), Some(notice)) = (target.channel_id(), target.notice.as_ref()) else {
        return Ok(());
    };
    moderator
        .notify(channel_id, &notice.text, notice.delete_after)
        .await
}

struct BanHandler;

#[async_trait::async_trait]
impl ActionHandler for BanHandler {
    async fn execute(
        &self,
        moderator: &dyn Moderator,
        target: &RemediationTarget,
        _action: &RemediationAction,
    ) -> RemediationResult {
        info!("Banning user {} in guild {}", target.user_id, target.guild_id);
        moderator
            .ban(target.guild_id, target.user_id, &target.reason)
            .await?;
        info!("Successfully banned user {}", target.user_id);
        Ok(())
    }
}

struct KickHandler;

#[async_trait::async_trait]
impl ActionHandler for KickHandler {
    async fn execute(
        &self,
        moderator: &dyn Moderator,
        target: &RemediationTarget,
        _action: &RemediationAction,
    ) -> RemediationResult {
        info!("Kicking user {} from guild {}", target.user_id, target.guild_id);
        moderator
            .kick(target.guild_id, target.user_id, &target.reason)
            .await?;
        info!("Successfully kicked user {}", target.user_id);
        Ok(())
    }
}

struct MuteRoleHandler;

#[async_trait::async_trait]
impl ActionHandler for MuteRoleHandler {
    async fn execute(
        &self,
        moderator: &dyn Moderator,
        target: &RemediationTarget,
        _action: &RemediationAction,
    ) -> RemediationResult {
        apply_mute_role(moderator, target).await
    }
}

/// Platform timeout; falls back to the "Muted" role when the bot may not
/// time the member out
struct TimeoutHandler;

#[async_trait::async_trait]
impl ActionHandler for TimeoutHandler {
    async fn execute(
        &self,
        moderator: &dyn Moderator,
        target: &RemediationTarget,
        action: &RemediationAction,
    ) -> RemediationResult {
        let RemediationAction::Timeout { seconds } = action else {
            return Err(RemediationError::Api("Expected Timeout action".to_string()));
        };

        let until = Utc::now() + Duration::seconds(i64::from(*seconds));
        match moderator
            .timeout(target.guild_id, target.user_id, until, &target.reason)
            .await
        {
            Ok(()) => {
                info!("Timed out user {} until {until}", target.user_id);
            }
            Err(RemediationError::PermissionDenied) => {
                warn!(
                    "Timeout of user {} forbidden in guild {}, falling back to role",
                    target.user_id, target.guild_id
                );
                if let Err(e) = apply_mute_role(moderator, target).await {
                    if let Some(channel_id) = target.channel_id() {
                        let text = format!("<@{}>, error: could not mute!", target.user_id);
                        moderator
                            .notify(channel_id, &text, Some(FAILED_MUTE_NOTICE_TTL))
                            .await?;
                    }
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }

        post_notice(moderator, target).await
    }
}

/// Delete the triggering message, then post the notice if one is attached
struct DeleteMessageHandler;

#[async_trait::async_trait]
impl ActionHandler for DeleteMessageHandler {
    async fn execute(
        &self,
        moderator: &dyn Moderator,
        target: &RemediationTarget,
        _action: &RemediationAction,
    ) -> RemediationResult {
        let Some((channel_id, message_id)) = target.message else {
            return Err(RemediationError::NotFound("triggering message".to_string()));
        };
        moderator.delete_message(channel_id, message_id).await?;
        post_notice(moderator, target).await
    }
}

struct WarnHandler;

#[async_trait::async_trait]
impl ActionHandler for WarnHandler {
    async fn execute(
        &self,
        moderator: &dyn Moderator,
        target: &RemediationTarget,
        _action: &RemediationAction,
    ) -> RemediationResult {
        if target.channel_id().is_none() {
            return Err(RemediationError::NotFound("channel to warn in".to_string()));
        }
        post_notice(moderator, target).await
    }
}
