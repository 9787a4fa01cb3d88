use chrono::Utc;
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, GuildChannel, GuildId, Member, Message, Ready, User,
};
use tracing::{debug, info, warn};

use crate::EVENT_TARGET;
use crate::data::Data;
use crate::security::{DetectionReport, GuildMutation, IncomingMessage, MemberJoin, MutationKind};

pub struct Handler;

/// Shared data, once the framework setup has stored it
async fn data(ctx: &Context) -> Option<Data> {
    let data = ctx.data.read().await.get::<Data>().cloned();
    if data.is_none() {
        debug!(target: EVENT_TARGET, "Event received before setup finished");
    }
    data
}

fn log_reports(event: &str, reports: &[DetectionReport]) {
    for report in reports {
        debug!(
            target: EVENT_TARGET,
            event,
            detection_id = %report.detection.id,
            succeeded = report.all_succeeded(),
            faults = report.faults(),
            "Event produced a detection"
        );
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!("Connected as {user_name}, shard {shard_id}");

        if let Some(data) = data(&ctx).await {
            data.engine.set_bot_id(ready.user.id);
        }
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!("Cache ready! Guarding {guild_count} guild(s)");
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let Some(data) = data(&ctx).await else { return };
        let reports = data.engine.on_member_join(&MemberJoin::from(&new_member)).await;
        log_reports("member_join", &reports);
    }

    async fn message(&self, ctx: Context, new_message: Message) {
        if new_message.author.bot || new_message.guild_id.is_none() {
            return;
        }
        let Some(data) = data(&ctx).await else { return };
        let reports = data
            .engine
            .on_message(&IncomingMessage::from(&new_message))
            .await;
        log_reports("message", &reports);
    }

    async fn channel_delete(&self, ctx: Context, channel: GuildChannel, _messages: Option<Vec<Message>>) {
        let Some(data) = data(&ctx).await else { return };
        let mutation = GuildMutation {
            guild_id: channel.guild_id,
            kind: MutationKind::ChannelDelete,
            target_id: channel.id.get(),
            at: Utc::now(),
        };
        let reports = data.engine.on_guild_mutation(&mutation).await;
        log_reports("channel_delete", &reports);
    }

    /// Removals are checked against the kick audit log; plain leaves have no entry
    async fn guild_member_removal(
        &self,
        ctx: Context,
        guild_id: GuildId,
        user: User,
        _member_data_if_available: Option<Member>,
    ) {
        let Some(data) = data(&ctx).await else { return };
        let mutation = GuildMutation {
            guild_id,
            kind: MutationKind::MemberKick,
            target_id: user.id.get(),
            at: Utc::now(),
        };
        let reports = data.engine.on_guild_mutation(&mutation).await;
        log_reports("member_removal", &reports);
    }
}
