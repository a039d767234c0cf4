use dotenvy::dotenv;
use serenity::model::id::GuildId;
use serenity::prelude::*;
use songbird::SerenityInit;
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use jukebox::cache::CacheStore;
use jukebox::commands::{self, Data};
use jukebox::config::{load_config, parse_guild_ids, MusicConfig};
use jukebox::downloads::DownloadCoordinator;
use jukebox::registry::GuildRegistry;
use jukebox::resolver::{MediaResolver, MediaTool};
use jukebox::tools::ensure_media_tools;
use jukebox::ytdlp::YtDlp;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let token = env::var("DISCORD_TOKEN").expect("DISCORD_TOKEN not set");
    let guild_ids = env::var("GUILD_IDS").map(|raw| parse_guild_ids(&raw)).unwrap_or_default();

    let config = match load_config().await {
        Ok(cfg) => cfg.music,
        Err(e) => {
            warn!(error = %e, "could not load config, using defaults");
            MusicConfig::default()
        }
    };

    let ytdlp = ensure_media_tools(&config.ytdlp_path)
        .await
        .expect("Failed to prepare media tools (yt-dlp)");

    let cache = Arc::new(CacheStore::new(&config.cache_dir, config.cache_ttl()).expect("Failed to create cache directory"));
    let tool: Arc<dyn MediaTool> = Arc::new(YtDlp::new(ytdlp));
    let downloads = Arc::new(DownloadCoordinator::new(
        tool.clone(),
        cache.clone(),
        config.max_parallel_downloads,
        config.fetch_timeout(),
    ));
    let registry = Arc::new(GuildRegistry::new(downloads, config.session_settings()));
    let resolver = MediaResolver::new(tool);

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands::all(),
            event_handler: |ctx, event, framework, data| Box::pin(commands::event_handler(ctx, event, framework, data)),
            on_error: |error| Box::pin(commands::on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                if guild_ids.is_empty() {
                    poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                    info!("slash commands registered globally");
                } else {
                    for id in &guild_ids {
                        let guild = GuildId::new(*id);
                        match poise::builtins::register_in_guild(ctx, &framework.options().commands, guild).await {
                            Ok(()) => info!(guild = %guild, "slash commands registered"),
                            Err(e) => error!(guild = %guild, error = %e, "could not register slash commands"),
                        }
                    }
                }

                cache.clone().spawn_sweeper(config.sweep_interval());
                Ok(Data { registry, resolver, config })
            })
        })
        .build();

    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    let mut client = Client::builder(token, intents)
        .framework(framework)
        .register_songbird()
        .await
        .expect("Err creating client");

    if let Err(why) = client.start().await {
        error!("Client error: {why:?}");
    }
}
