use crate::security::{Detection, Outcome, RemediationError};
use crate::{COMMAND_TARGET, CONSOLE_TARGET, Context, Data, ERROR_TARGET, Error, SECURITY_TARGET};
use poise::serenity_prelude::GuildId;
use poise::FrameworkError;
use std::path::Path;
use std::time::Instant;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    EnvFilter, Layer,
    filter::filter_fn,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

pub const COMMAND_LOG_FILE: &str = "commands";
/// Detection and remediation log file name
pub const SECURITY_LOG_FILE: &str = "security";

/// Install the console layer and the two JSON file layers
///
/// # Errors
/// Fails if the log directory cannot be created or the filter is invalid.
pub fn init(log_dir: &Path) -> Result<(), Error> {
    if !log_dir.exists() {
        std::fs::create_dir_all(log_dir)?;
    }

    let command_file = RollingFileAppender::new(Rotation::DAILY, log_dir, COMMAND_LOG_FILE);
    let security_file = RollingFileAppender::new(Rotation::DAILY, log_dir, SECURITY_LOG_FILE);

    // Human-readable console output
    let console_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(true);

    // Command lifecycle and errors, JSON
    let command_layer = fmt::layer()
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(command_file)
        .with_filter(filter_fn(|meta| {
            meta.target() == COMMAND_TARGET || meta.target() == ERROR_TARGET
        }));

    // One line per detection and per remediation outcome, JSON
    let security_layer = fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .json()
        .with_writer(security_file)
        .with_filter(filter_fn(|meta| meta.target() == SECURITY_TARGET));

    // RUST_LOG wins; otherwise INFO without serenity's heartbeat chatter
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("info").add_directive("serenity=error".parse()?),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(command_layer)
        .with(security_layer)
        .init();

    info!(log_dir = %log_dir.display(), "Logging initialized");
    Ok(())
}

/// Start time of one invocation, kept in poise's invocation data
struct InvokedAt(Instant);

fn guild_label(guild_id: Option<GuildId>) -> String {
    guild_id.map_or_else(|| "DM".to_string(), |id| id.get().to_string())
}

/// Pre-command hook
pub async fn log_command_start(ctx: Context<'_>) {
    ctx.set_invocation_data(InvokedAt(Instant::now())).await;

    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx.guild_id()),
        user_id = %ctx.author().id,
        arguments = %ctx.invocation_string(),
        event = "start",
        "Command invoked"
    );
}

/// Post-command hook, reports how long the invocation took
pub async fn log_command_end(ctx: Context<'_>) {
    let elapsed_ms = ctx
        .invocation_data::<InvokedAt>()
        .await
        .map_or(0, |started| started.0.elapsed().as_millis());

    info!(
        target: COMMAND_TARGET,
        command = %ctx.command().qualified_name,
        guild_id = %guild_label(ctx.guild_id()),
        user_id = %ctx.author().id,
        duration_ms = u64::try_from(elapsed_ms).unwrap_or(u64::MAX),
        event = "end",
        "Command finished"
    );
}

/// Error hook for every framework error
pub fn log_command_error(error: &FrameworkError<'_, Data, Error>) {
    match error {
        FrameworkError::Command { error, ctx, .. } => error!(
            target: ERROR_TARGET,
            command = %ctx.command().qualified_name,
            guild_id = %guild_label(ctx.guild_id()),
            user_id = %ctx.author().id,
            error = %error,
            "Command failed"
        ),
        FrameworkError::MissingUserPermissions { ctx, missing_permissions, .. } => warn!(
            target: ERROR_TARGET,
            command = %ctx.command().qualified_name,
            user_id = %ctx.author().id,
            missing = ?missing_permissions,
            "Command refused: missing user permissions"
        ),
        other => error!(target: ERROR_TARGET, error = %other, "Framework error"),
    }
}

/// Log a detection before it is acted on
pub fn log_detection(detection: &Detection) {
    warn!(
        target: SECURITY_TARGET,
        detection_id = %detection.id,
        guild_id = %detection.guild_id,
        feature = detection.feature.label(),
        action = %detection.action.get_type(),
        targets = detection.targets.len(),
        reason = %detection.reason,
        event = "detection",
        "Threat detected"
    );
}

/// Log what happened when a detection's action was applied to one target
pub fn log_outcome(detection: &Detection, outcome: &Outcome) {
    match &outcome.result {
        Ok(()) => info!(
            target: SECURITY_TARGET,
            detection_id = %detection.id,
            guild_id = %detection.guild_id,
            user_id = %outcome.user_id,
            action = %detection.action.get_type(),
            outcome = "applied",
            event = "remediation",
            "Remediation applied"
        ),
        Err(RemediationError::PermissionDenied) => warn!(
            target: SECURITY_TARGET,
            detection_id = %detection.id,
            guild_id = %detection.guild_id,
            user_id = %outcome.user_id,
            action = %detection.action.get_type(),
            outcome = "forbidden",
            event = "remediation",
            "Remediation skipped: missing permissions"
        ),
        Err(RemediationError::NotFound(missing)) => info!(
            target: SECURITY_TARGET,
            detection_id = %detection.id,
            guild_id = %detection.guild_id,
            user_id = %outcome.user_id,
            action = %detection.action.get_type(),
            outcome = "not_found",
            missing = %missing,
            event = "remediation",
            "Remediation skipped: target not found"
        ),
        Err(e) => error!(
            target: SECURITY_TARGET,
            detection_id = %detection.id,
            guild_id = %detection.guild_id,
            user_id = %outcome.user_id,
            action = %detection.action.get_type(),
            outcome = "failed",
            error = %e,
            event = "remediation",
            "Remediation failed"
        ),
    }
}

/// Plain progress line for the operator console
pub fn log_console(message: &str) {
    info!(target: CONSOLE_TARGET, event = "console", "{message}");
}
