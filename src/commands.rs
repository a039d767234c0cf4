//! Slash commands and panel buttons.

use std::sync::Arc;

use poise::CreateReply;
use serenity::all::{ComponentInteraction, FullEvent, Interaction};
use serenity::builder::{CreateAttachment, CreateInteractionResponse, CreateInteractionResponseMessage};
use serenity::model::id::{ChannelId, GuildId, UserId};
use serenity::prelude::Context as SerenityContext;
use tracing::{info, warn};

use crate::config::MusicConfig;
use crate::panel::{ChannelPanel, PanelAction};
use crate::registry::GuildRegistry;
use crate::resolver::MediaResolver;
use crate::session::GuildSession;
use crate::voice;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Shared state handed to every command and event.
pub struct Data {
    pub registry: Arc<GuildRegistry>,
    pub resolver: MediaResolver,
    pub config: MusicConfig,
}

pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![play(), pause(), resume(), skip(), stop(), back()]
}

fn voice_channel_for_user_id(ctx: &SerenityContext, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    ctx.cache
        .guild(guild_id)
        .and_then(|guild| guild.voice_states.get(&user_id).and_then(|vs| vs.channel_id))
}

async fn reply_ephemeral(ctx: Context<'_>, content: impl Into<String>) -> Result<(), Error> {
    ctx.send(CreateReply::default().content(content).ephemeral(true)).await?;
    Ok(())
}

/// Every music command needs the invoker in a voice channel.
async fn in_voice_channel(ctx: Context<'_>) -> Result<bool, Error> {
    let Some(guild_id) = ctx.guild_id() else {
        return Ok(false);
    };
    if voice_channel_for_user_id(ctx.serenity_context(), guild_id, ctx.author().id).is_some() {
        return Ok(true);
    }
    reply_ephemeral(ctx, "❌ You need to be in a voice channel.").await?;
    Ok(false)
}

fn session_for(ctx: Context<'_>) -> Result<Arc<GuildSession>, Error> {
    let guild_id = ctx.guild_id().ok_or("This command only works in a guild")?;
    Ok(ctx.data().registry.session(guild_id))
}

/// Play a YouTube video or playlist, or search by name
#[poise::command(slash_command, guild_only, check = "in_voice_channel")]
pub async fn play(
    ctx: Context<'_>,
    #[description = "YouTube link or search text"] url: String,
) -> Result<(), Error> {
    // resolving shells out to yt-dlp, answer before Discord gives up on us
    ctx.defer_ephemeral().await?;

    let guild_id = ctx.guild_id().ok_or("This command only works in a guild")?;
    let voice_channel = voice_channel_for_user_id(ctx.serenity_context(), guild_id, ctx.author().id)
        .ok_or("Couldn't determine your voice channel")?;
    let data = ctx.data();

    let tracks = data.resolver.resolve(&url).await;
    if tracks.is_empty() {
        ctx.say("❌ Could not identify the video or playlist. Check the link.").await?;
        return Ok(());
    }

    let session = data.registry.session(guild_id);
    if !session.has_panel().await {
        let panel = ChannelPanel::new(
            ctx.serenity_context().http.clone(),
            ctx.channel_id(),
            guild_id,
            data.config.embed_color,
        );
        session.set_panel(Arc::new(panel)).await;
    }

    if !session.has_transport().await {
        let manager = songbird::get(ctx.serenity_context())
            .await
            .ok_or("Songbird Voice client placed in at initialisation.")?
            .clone();
        let transport = voice::connect(manager, guild_id, voice_channel, data.config.volume, session.events()).await?;
        session.attach_transport(transport).await;
    }

    let count = tracks.len();
    info!(guild = %guild_id, count, input = %url, "play requested");
    tokio::spawn(async move { session.enqueue(tracks).await });

    ctx.say(format!("➕ Added {count} track(s) to the queue.")).await?;
    Ok(())
}

/// Pause the current track
#[poise::command(slash_command, guild_only, check = "in_voice_channel")]
pub async fn pause(ctx: Context<'_>) -> Result<(), Error> {
    session_for(ctx)?.pause().await;
    reply_ephemeral(ctx, "⏸ Paused!").await
}

/// Resume the current track
#[poise::command(slash_command, guild_only, check = "in_voice_channel")]
pub async fn resume(ctx: Context<'_>) -> Result<(), Error> {
    session_for(ctx)?.resume().await;
    reply_ephemeral(ctx, "▶️ Resumed!").await
}

/// Skip to the next track
#[poise::command(slash_command, guild_only, check = "in_voice_channel")]
pub async fn skip(ctx: Context<'_>) -> Result<(), Error> {
    let session = session_for(ctx)?;
    tokio::spawn(async move { session.skip().await });
    reply_ephemeral(ctx, "⏭ Skipped!").await
}

/// Stop playback and clear the queue
#[poise::command(slash_command, guild_only, check = "in_voice_channel")]
pub async fn stop(ctx: Context<'_>) -> Result<(), Error> {
    session_for(ctx)?.stop().await;
    reply_ephemeral(ctx, "⏹ Playback stopped and queue cleared!").await
}

/// Go back to the previous track
#[poise::command(slash_command, guild_only, check = "in_voice_channel")]
pub async fn back(ctx: Context<'_>) -> Result<(), Error> {
    let session = session_for(ctx)?;
    if !session.has_history().await {
        return reply_ephemeral(ctx, "❌ There is no previous track.").await;
    }
    tokio::spawn(async move { session.back().await });
    reply_ephemeral(ctx, "⬅️ Going back to the previous track!").await
}

async fn respond_ephemeral(ctx: &SerenityContext, mc: &ComponentInteraction, content: &str) -> Result<(), Error> {
    let message = CreateInteractionResponseMessage::new().content(content).ephemeral(true);
    mc.create_response(&ctx.http, CreateInteractionResponse::Message(message)).await?;
    Ok(())
}

async fn handle_button(ctx: &SerenityContext, mc: &ComponentInteraction, data: &Data) -> Result<(), Error> {
    let Some((action, hinted_guild)) = PanelAction::parse(&mc.data.custom_id) else {
        return Ok(());
    };
    let Some(guild_id) = mc.guild_id.or(hinted_guild) else {
        return Ok(());
    };
    let session = data.registry.session(guild_id);

    match action {
        PanelAction::Pause => {
            session.pause().await;
        }
        PanelAction::Resume => {
            session.resume().await;
        }
        PanelAction::Skip => {
            tokio::spawn(async move { session.skip().await });
        }
        PanelAction::Stop => {
            session.stop().await;
            return respond_ephemeral(ctx, mc, "⏹ Playback stopped and queue cleared!").await;
        }
        PanelAction::Back => {
            if !session.has_history().await {
                return respond_ephemeral(ctx, mc, "❌ There is no previous track.").await;
            }
            tokio::spawn(async move { session.back().await });
            return respond_ephemeral(ctx, mc, "⬅️ Going back to the previous track!").await;
        }
        PanelAction::Download => return send_download(ctx, mc, &session).await,
    }

    mc.create_response(&ctx.http, CreateInteractionResponse::Acknowledge).await?;
    Ok(())
}

/// Upload the current track's cached file.
async fn send_download(ctx: &SerenityContext, mc: &ComponentInteraction, session: &GuildSession) -> Result<(), Error> {
    let Some((track, path)) = session.current_artifact().await else {
        let text = if session.snapshot().await.current.is_some() {
            "❌ File not found in the cache."
        } else {
            "❌ Nothing is playing."
        };
        return respond_ephemeral(ctx, mc, text).await;
    };

    let attachment = match CreateAttachment::path(&path).await {
        Ok(a) => a,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read cached file");
            return respond_ephemeral(ctx, mc, "❌ File not found in the cache.").await;
        }
    };
    let message = CreateInteractionResponseMessage::new()
        .content(format!("⬇️ Download: **{}**", track.title))
        .add_file(attachment);
    if let Err(e) = mc.create_response(&ctx.http, CreateInteractionResponse::Message(message)).await {
        warn!(track = %track.id, error = %e, "upload rejected");
        respond_ephemeral(
            ctx,
            mc,
            "❌ Could not send the file (it is probably over the upload limit).",
        )
        .await?;
    }
    Ok(())
}

pub async fn event_handler(
    ctx: &SerenityContext,
    event: &FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            info!(user = %data_about_bot.user.name, guilds = ctx.cache.guild_count(), "connected");
        }
        FullEvent::InteractionCreate {
            interaction: Interaction::Component(mc),
        } => {
            if let Err(e) = handle_button(ctx, mc, data).await {
                warn!(custom_id = %mc.data.custom_id, error = %e, "button failed");
            }
        }
        _ => {}
    }
    Ok(())
}

pub async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            warn!(command = %ctx.command().name, error = %error, "command failed");
            let _ = ctx
                .send(CreateReply::default().content(format!("❌ {error}")).ephemeral(true))
                .await;
        }
        // the check already answered
        poise::FrameworkError::CommandCheckFailed { .. } => {}
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                warn!(error = %e, "error while handling error");
            }
        }
    }
}
