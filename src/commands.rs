use crate::security::{ConfigError, Feature, GuildSecurityPolicy, PolicyStore, StoreError};
use crate::{Context, Error};
use poise::serenity_prelude::{CreateEmbed, GuildId};
use poise::{CreateReply, command};

/// Basic ping command
/// This command is used to check if the bot is responsive.
#[command(prefix_command, slash_command, guild_only)]
pub async fn ping(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say("Pong!").await?;
    Ok(())
}

/// Result of an administrator edit
#[derive(Debug, PartialEq, Eq)]
pub enum EditOutcome {
    /// Saved; the message is the confirmation to show
    Saved(String),
    /// Rejected before anything was written
    Rejected(ConfigError),
}

/// Read a guild's policy, apply `edit` and save it if the edit is valid
///
/// # Errors
/// Returns `StoreError` if the policy cannot be read or saved.
pub async fn edit_policy(
    store: &dyn PolicyStore,
    guild_id: GuildId,
    edit: impl FnOnce(&mut GuildSecurityPolicy) -> Result<String, ConfigError> + Send,
) -> Result<EditOutcome, StoreError> {
    let mut policy = store.get_policy(guild_id).await?;
    match edit(&mut policy) {
        Ok(confirmation) => {
            store.save_policy(guild_id, policy).await?;
            Ok(EditOutcome::Saved(confirmation))
        }
        Err(e) => Ok(EditOutcome::Rejected(e)),
    }
}

async fn reply_ephemeral(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(CreateReply::default().content(content).ephemeral(true))
        .await?;
    Ok(())
}

/// Run an edit for the invoking guild and report the outcome to the admin
async fn apply_edit(
    ctx: Context<'_>,
    edit: impl FnOnce(&mut GuildSecurityPolicy) -> Result<String, ConfigError> + Send,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;

    match edit_policy(ctx.data().policies().as_ref(), guild_id, edit).await {
        Ok(EditOutcome::Saved(confirmation)) => reply_ephemeral(ctx, confirmation).await,
        Ok(EditOutcome::Rejected(e)) => reply_ephemeral(ctx, format!("Invalid setting: {e}")).await,
        Err(e) => {
            reply_ephemeral(ctx, "Could not save the security settings, try again later.").await?;
            Err(e.into())
        }
    }
}

/// Configure the guild's protection features
#[command(
    slash_command,
    guild_only,
    subcommands("show", "toggle", "raid", "links", "spam", "nuke"),
    subcommand_required,
    required_permissions = "ADMINISTRATOR",
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn security(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show the current security settings
#[command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn show(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a server")?;
    let policy = ctx.data().policies().get_policy(guild_id).await?;

    let embed = CreateEmbed::new()
        .title("Security settings")
        .fields(policy.summary().into_iter().map(|(name, value)| (name, value, false)));
    ctx.send(CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Enable or disable a protection feature
#[command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn toggle(
    ctx: Context<'_>,
    #[description = "Feature to switch"] feature: Feature,
) -> Result<(), Error> {
    apply_edit(ctx, move |policy| {
        let state = if policy.toggle(feature) { "enabled" } else { "disabled" };
        Ok(format!("{} is now {state}.", feature.label()))
    })
    .await
}

/// Configure anti-raid
#[command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn raid(
    ctx: Context<'_>,
    #[description = "Joins that trigger the action"] join_threshold: String,
    #[description = "Window in seconds (1-600)"] time_window: String,
    #[description = "ban, kick or mute"] action: String,
) -> Result<(), Error> {
    apply_edit(ctx, move |policy| {
        policy.anti_raid = policy.anti_raid.edited(&join_threshold, &time_window, &action)?;
        Ok("Anti-raid settings saved.".to_string())
    })
    .await
}

/// Configure anti-links
#[command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn links(
    ctx: Context<'_>,
    #[description = "Allowed domains, comma separated"] allowed_domains: Option<String>,
    #[description = "delete or warn"] action: String,
) -> Result<(), Error> {
    apply_edit(ctx, move |policy| {
        policy.anti_links = policy
            .anti_links
            .edited(allowed_domains.as_deref().unwrap_or_default(), &action)?;
        Ok("Anti-links settings saved.".to_string())
    })
    .await
}

/// Configure anti-spam
#[command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn spam(
    ctx: Context<'_>,
    #[description = "Messages that trigger the action"] message_threshold: String,
    #[description = "Window in seconds (1-600)"] time_window: String,
    #[description = "mute or delete"] action: String,
) -> Result<(), Error> {
    apply_edit(ctx, move |policy| {
        policy.anti_spam = policy
            .anti_spam
            .edited(&message_threshold, &time_window, &action)?;
        Ok("Anti-spam settings saved.".to_string())
    })
    .await
}

/// Configure anti-nuke
#[command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn nuke(
    ctx: Context<'_>,
    #[description = "Changes that trigger the action"] change_threshold: String,
    #[description = "Window in seconds (1-600)"] time_window: String,
    #[description = "ban or kick"] action: String,
) -> Result<(), Error> {
    apply_edit(ctx, move |policy| {
        policy.anti_nuke = policy
            .anti_nuke
            .edited(&change_threshold, &time_window, &action)?;
        Ok("Anti-nuke settings saved.".to_string())
    })
    .await
}

/// Configure the auto-mod content filters
#[command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn automod(
    ctx: Context<'_>,
    #[description = "Banned words, comma separated"] banned_words: Option<String>,
    #[description = "Caps limit in percent (0-100)"] caps_threshold: String,
    #[description = "Identical messages that count as repetition (2-20)"] repeat_threshold: String,
    #[description = "delete, warn or mute"] action: String,
) -> Result<(), Error> {
    apply_edit(ctx, move |policy| {
        policy.auto_mod = policy.auto_mod.edited(
            banned_words.as_deref().unwrap_or_default(),
            &caps_threshold,
            &repeat_threshold,
            &action,
        )?;
        Ok("Auto-mod settings saved.".to_string())
    })
    .await
}
