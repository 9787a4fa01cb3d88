use std::sync::Arc;

use bastion::config::Settings;
use bastion::security::{SecurityEngine, SerenityModerator, YamlPolicyStore};
use bastion::{BOT_NAME, Data, Error, commands, handlers, logging};
use poise::serenity_prelude::{self as serenity};
use serenity::GatewayIntents;
use tracing::{error, info};

/// Main function to run the bot
async fn async_main() -> Result<(), Error> {
    let settings = Settings::from_env()?;
    logging::init(&settings.log_dir)?;

    let store = Arc::new(YamlPolicyStore::load(&settings.data_dir).await?);
    info!("Security policies at {}", store.path().display());
    let sweep_interval = settings.sweep_interval_secs;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![commands::ping(), commands::security(), commands::automod()],
            pre_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_start(ctx).await;
                })
            },
            post_command: |ctx| {
                Box::pin(async move {
                    logging::log_command_end(ctx).await;
                })
            },
            on_error: |error| {
                Box::pin(async move {
                    logging::log_command_error(&error);
                })
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                logging::log_console("Registering commands");
                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                let moderator = Arc::new(SerenityModerator::new(Arc::clone(&ctx.http)));
                let engine = Arc::new(SecurityEngine::new(store, moderator));
                engine.set_bot_id(ready.user.id);
                let (sweeper, _) = engine.start_sweeper(sweep_interval);

                let data = Data::with_sweeper(engine, sweeper);
                // Gateway handlers look the data up in serenity's map
                ctx.data.write().await.insert::<Data>(data.clone());
                Ok(data)
            })
        })
        .build();

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;
    let mut client = serenity::ClientBuilder::new(&settings.token, intents)
        .event_handler(handlers::Handler)
        .framework(framework)
        .await?;

    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shard_manager.shutdown_all().await;
        }
    });

    info!("Starting {BOT_NAME}...");
    let result = client.start().await;

    let data = client.data.read().await.get::<Data>().cloned();
    if let Some(data) = data {
        data.shutdown().await;
    }

    result.map_err(Into::into)
}

fn main() {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Failed to start the runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(async_main()) {
        error!("Fatal error: {err}");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
