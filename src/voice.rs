//! Voice playback through songbird.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serenity::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::events::{CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent};
use songbird::input::{File as FileInput, Input};
use songbird::tracks::TrackHandle;
use songbird::{Call, Songbird};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// What the voice layer reports back to a guild session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The track started at `epoch` played to its end (or was stopped).
    Finished { epoch: u64 },
    /// Playback or the connection broke; the guild session is over.
    Failed { reason: String },
}

/// One guild's voice connection and audio player.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Replace whatever is playing with the file at `path`. The matching
    /// `Finished` event carries `epoch`.
    async fn play(&self, path: &Path, epoch: u64) -> Result<(), TransportError>;

    fn pause(&self) -> Result<(), TransportError>;

    fn resume(&self) -> Result<(), TransportError>;

    /// Halt the current track, keeping the connection.
    fn stop(&self);

    /// Leave the voice channel. Events raised by leaving are not reported.
    async fn disconnect(&self);
}

pub struct VoiceTransport {
    manager: Arc<Songbird>,
    guild: GuildId,
    call: Arc<tokio::sync::Mutex<Call>>,
    volume: f32,
    current: Mutex<Option<TrackHandle>>,
    closing: Arc<AtomicBool>,
    events: UnboundedSender<TransportEvent>,
}

struct TrackEndNotifier {
    epoch: u64,
    events: UnboundedSender<TransportEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        let _ = self.events.send(TransportEvent::Finished { epoch: self.epoch });
        None
    }
}

struct TrackErrorNotifier {
    events: UnboundedSender<TransportEvent>,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let reason = match ctx {
            EventContext::Track(tracks) => tracks
                .first()
                .map(|(state, _)| format!("track errored in state {:?}", state.playing))
                .unwrap_or_else(|| "track errored".to_string()),
            _ => "track errored".to_string(),
        };
        let _ = self.events.send(TransportEvent::Failed { reason });
        None
    }
}

struct DisconnectNotifier {
    closing: Arc<AtomicBool>,
    events: UnboundedSender<TransportEvent>,
}

#[async_trait]
impl VoiceEventHandler for DisconnectNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(data) = ctx {
            // no reason means we asked for it
            if !self.closing.load(Ordering::SeqCst) {
                if let Some(reason) = &data.reason {
                    let _ = self.events.send(TransportEvent::Failed {
                        reason: format!("voice connection lost: {reason:?}"),
                    });
                }
            }
        }
        None
    }
}

fn lock_handle(current: &Mutex<Option<TrackHandle>>) -> std::sync::MutexGuard<'_, Option<TrackHandle>> {
    current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Join `channel` and wrap the call as a `Transport` reporting into `events`.
pub async fn connect(
    manager: Arc<Songbird>,
    guild: GuildId,
    channel: ChannelId,
    volume: f32,
    events: UnboundedSender<TransportEvent>,
) -> Result<Arc<VoiceTransport>, TransportError> {
    let call = manager
        .join(guild, channel)
        .await
        .map_err(|e| TransportError::Join(e.to_string()))?;

    let closing = Arc::new(AtomicBool::new(false));
    {
        let mut handler = call.lock().await;
        handler.remove_all_global_events();
        handler.add_global_event(
            Event::Core(CoreEvent::DriverDisconnect),
            DisconnectNotifier {
                closing: closing.clone(),
                events: events.clone(),
            },
        );
        if !handler.is_deaf() {
            if let Err(e) = handler.deafen(true).await {
                debug!(guild = %guild, error = ?e, "deafen failed");
            }
        }
    }

    info!(guild = %guild, channel = %channel, "joined voice channel");
    Ok(Arc::new(VoiceTransport {
        manager,
        guild,
        call,
        volume,
        current: Mutex::new(None),
        closing,
        events,
    }))
}

#[async_trait]
impl Transport for VoiceTransport {
    async fn play(&self, path: &Path, epoch: u64) -> Result<(), TransportError> {
        let input: Input = FileInput::new(path.to_path_buf()).into();
        let handle = {
            let mut call = self.call.lock().await;
            call.play_only_input(input)
        };

        let driver = |e: songbird::error::ControlError| TransportError::Driver(e.to_string());
        handle.set_volume(self.volume).map_err(driver)?;
        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    epoch,
                    events: self.events.clone(),
                },
            )
            .map_err(driver)?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorNotifier {
                    events: self.events.clone(),
                },
            )
            .map_err(driver)?;

        debug!(guild = %self.guild, path = %path.display(), epoch, "playing");
        *lock_handle(&self.current) = Some(handle);
        Ok(())
    }

    fn pause(&self) -> Result<(), TransportError> {
        match lock_handle(&self.current).as_ref() {
            Some(handle) => handle.pause().map_err(|e| TransportError::Driver(e.to_string())),
            None => Err(TransportError::NotConnected),
        }
    }

    fn resume(&self) -> Result<(), TransportError> {
        match lock_handle(&self.current).as_ref() {
            Some(handle) => handle.play().map_err(|e| TransportError::Driver(e.to_string())),
            None => Err(TransportError::NotConnected),
        }
    }

    fn stop(&self) {
        if let Some(handle) = lock_handle(&self.current).take() {
            let _ = handle.stop();
        }
    }

    async fn disconnect(&self) {
        self.closing.store(true, Ordering::SeqCst);
        self.stop();
        if let Err(e) = self.manager.remove(self.guild).await {
            warn!(guild = %self.guild, error = ?e, "leaving voice channel failed");
        } else {
            info!(guild = %self.guild, "left voice channel");
        }
    }
}
