//! Per-guild playback session.
//!
//! All transitions (enqueue, advance, back, stop, track end, failure) take
//! the session lock. Downloads are awaited with the lock released; once the
//! lock is retaken the queue epoch is compared and the result is dropped if
//! another transition happened in between.

use std::path::PathBuf;
use std::sync::Arc;

use serenity::model::id::GuildId;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::downloads::DownloadCoordinator;
use crate::panel::{Panel, PanelView};
use crate::queue::{Direction, GuildQueue, PlaybackState, Selection};
use crate::track::Track;
use crate::voice::{Transport, TransportEvent};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Queued tracks (after the current one) protected from eviction.
    pub retention_window: usize,
    /// Queued tracks fetched ahead once playback starts.
    pub prefetch: usize,
    /// Consecutive fetch failures tolerated before the queue is dropped.
    pub max_consecutive_failures: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            retention_window: 3,
            prefetch: 3,
            max_consecutive_failures: 5,
        }
    }
}

/// Read-only copy of a guild queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub tracks: Vec<Track>,
    pub previous: Vec<Track>,
    pub current: Option<Track>,
    pub state: PlaybackState,
}

impl QueueSnapshot {
    pub fn is_playing(&self) -> bool {
        self.state != PlaybackState::Idle
    }
}

struct Inner {
    queue: GuildQueue,
    transport: Option<Arc<dyn Transport>>,
    panel: Option<Arc<dyn Panel>>,
}

pub struct GuildSession {
    guild: GuildId,
    inner: Mutex<Inner>,
    downloads: Arc<DownloadCoordinator>,
    settings: SessionSettings,
    events: UnboundedSender<TransportEvent>,
}

impl GuildSession {
    pub fn new(
        guild: GuildId,
        downloads: Arc<DownloadCoordinator>,
        settings: SessionSettings,
        events: UnboundedSender<TransportEvent>,
    ) -> Self {
        Self {
            guild,
            inner: Mutex::new(Inner {
                queue: GuildQueue::new(),
                transport: None,
                panel: None,
            }),
            downloads,
            settings,
            events,
        }
    }

    pub fn guild(&self) -> GuildId {
        self.guild
    }

    /// Sender that transports attached to this session report into.
    pub fn events(&self) -> UnboundedSender<TransportEvent> {
        self.events.clone()
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        let inner = self.inner.lock().await;
        QueueSnapshot {
            tracks: inner.queue.tracks().iter().cloned().collect(),
            previous: inner.queue.previous().to_vec(),
            current: inner.queue.current().cloned(),
            state: inner.queue.state(),
        }
    }

    pub async fn has_transport(&self) -> bool {
        self.inner.lock().await.transport.is_some()
    }

    pub async fn attach_transport(&self, transport: Arc<dyn Transport>) {
        self.inner.lock().await.transport = Some(transport);
    }

    pub async fn has_panel(&self) -> bool {
        self.inner.lock().await.panel.is_some()
    }

    pub async fn set_panel(&self, panel: Arc<dyn Panel>) {
        self.inner.lock().await.panel = Some(panel);
    }

    pub async fn has_history(&self) -> bool {
        !self.inner.lock().await.queue.previous().is_empty()
    }

    /// Current track and its cached file, when the file exists.
    pub async fn current_artifact(&self) -> Option<(Track, PathBuf)> {
        let current = self.inner.lock().await.queue.current().cloned()?;
        let cache = self.downloads.cache();
        cache.is_cached(&current).await.then(|| {
            let path = cache.path_for(&current);
            (current, path)
        })
    }

    /// Append tracks; starts playback when the session is idle.
    pub async fn enqueue(&self, tracks: Vec<Track>) {
        let count = tracks.len();
        let mut inner = self.inner.lock().await;
        inner.queue.push(tracks);
        info!(guild = %self.guild, count, queued = inner.queue.tracks().len(), "tracks enqueued");

        if !inner.queue.is_playing() {
            self.advance_locked(inner, Direction::Forward).await;
            return;
        }

        self.publish_pins(&inner.queue);
        let view = inner.queue.view();
        let panel = inner.panel.clone();
        let upcoming = inner.queue.upcoming(self.settings.prefetch);
        drop(inner);
        self.show(panel, view).await;
        self.prefetch(upcoming);
    }

    pub async fn advance(&self, direction: Direction) {
        let inner = self.inner.lock().await;
        self.advance_locked(inner, direction).await;
    }

    pub async fn skip(&self) {
        self.advance(Direction::Forward).await;
    }

    /// Step back in history. Returns false (and does nothing) without history.
    pub async fn back(&self) -> bool {
        let inner = self.inner.lock().await;
        if inner.queue.previous().is_empty() {
            return false;
        }
        self.advance_locked(inner, Direction::Backward).await;
        true
    }

    pub async fn pause(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.transport.as_ref().is_some_and(|t| t.pause().is_ok())
    }

    pub async fn resume(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.transport.as_ref().is_some_and(|t| t.resume().is_ok())
    }

    /// Clear the queue and history, leave voice and drop the panel.
    /// The session itself stays usable.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        inner.queue.stop();
        info!(guild = %self.guild, "playback stopped");
        self.teardown(&mut inner).await;
    }

    /// React to the voice layer finishing the track started at `epoch`.
    pub async fn on_track_end(&self, epoch: u64) {
        let inner = self.inner.lock().await;
        if inner.queue.epoch() != epoch || inner.queue.state() != PlaybackState::Playing {
            debug!(guild = %self.guild, epoch, current = inner.queue.epoch(), "ignoring stale track end");
            return;
        }
        self.advance_locked(inner, Direction::Forward).await;
    }

    /// The voice layer broke. Leaves everything torn down; the registry
    /// discards the session afterwards.
    pub async fn fail(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        error!(guild = %self.guild, reason, "voice transport failed, dropping session");
        inner.queue.stop();
        if let Some(transport) = inner.transport.take() {
            transport.disconnect().await;
        }
        if let Some(panel) = inner.panel.take() {
            panel.notify("⚠️ Playback stopped: the voice connection failed.").await;
            panel.clear().await;
        }
        self.downloads.cancel_pending(self.guild);
        let cache = self.downloads.cache();
        cache.evict_guild(self.guild, &[], &self.downloads.busy_ids()).await;
        cache.unpin(self.guild);
    }

    async fn advance_locked(&self, mut inner: MutexGuard<'_, Inner>, mut direction: Direction) {
        let mut failures = 0;
        loop {
            let track = match inner.queue.select(direction) {
                Selection::Track(track) => track,
                Selection::Unavailable => return,
                Selection::Exhausted => {
                    inner.queue.finish();
                    info!(guild = %self.guild, "queue finished");
                    self.teardown(&mut inner).await;
                    return;
                }
            };
            let epoch = inner.queue.epoch();
            self.publish_pins(&inner.queue);
            drop(inner);

            debug!(guild = %self.guild, track = %track.id, epoch, "loading");
            let fetched = self.downloads.ensure_local(&track, self.guild).await;

            inner = self.inner.lock().await;
            if inner.queue.epoch() != epoch {
                debug!(guild = %self.guild, track = %track.id, "selection superseded while loading");
                return;
            }

            match fetched {
                Ok(path) => {
                    self.start_playback(inner, track, path, epoch).await;
                    return;
                }
                Err(e) => {
                    failures += 1;
                    warn!(guild = %self.guild, track = %track.id, error = %e, failures, "skipping unplayable track");
                    inner.queue.drop_current(epoch);
                    if failures >= self.settings.max_consecutive_failures {
                        inner.queue.abandon();
                        if let Some(panel) = inner.panel.clone() {
                            panel
                                .notify(&format!(
                                    "❌ {failures} tracks in a row could not be downloaded; the queue was cleared."
                                ))
                                .await;
                        }
                        self.teardown(&mut inner).await;
                        return;
                    }
                    direction = Direction::Forward;
                }
            }
        }
    }

    async fn start_playback(&self, mut inner: MutexGuard<'_, Inner>, track: Track, path: PathBuf, epoch: u64) {
        let Some(transport) = inner.transport.clone() else {
            warn!(guild = %self.guild, "no voice connection, cannot play");
            inner.queue.finish();
            self.teardown(&mut inner).await;
            return;
        };

        if let Err(e) = transport.play(&path, epoch).await {
            let _ = self.events.send(TransportEvent::Failed { reason: e.to_string() });
            return;
        }
        inner.queue.mark_playing(epoch);
        info!(guild = %self.guild, track = %track.id, title = %track.title, "now playing");

        let view = inner.queue.view();
        let panel = inner.panel.clone();
        let upcoming = inner.queue.upcoming(self.settings.prefetch);
        drop(inner);

        self.show(panel, view).await;
        self.prefetch(upcoming);
    }

    /// Leave voice, remove the panel and shrink the cache to what is still near.
    async fn teardown(&self, inner: &mut Inner) {
        if let Some(transport) = inner.transport.take() {
            transport.stop();
            transport.disconnect().await;
        }
        if let Some(panel) = inner.panel.clone() {
            panel.clear().await;
        }
        self.downloads.cancel_pending(self.guild);
        let window = inner.queue.retention_window(self.settings.retention_window);
        self.downloads
            .cache()
            .evict_guild(self.guild, &window, &self.downloads.busy_ids())
            .await;
    }

    fn publish_pins(&self, queue: &GuildQueue) {
        self.downloads
            .cache()
            .pin(self.guild, &queue.retention_window(self.settings.retention_window));
    }

    async fn show(&self, panel: Option<Arc<dyn Panel>>, view: PanelView) {
        if let Some(panel) = panel {
            if let Err(e) = panel.render(&view).await {
                error!(guild = %self.guild, error = %e, "panel render failed");
            }
        }
    }

    /// Fire-and-forget fetches of upcoming tracks.
    fn prefetch(&self, upcoming: Vec<Track>) {
        for track in upcoming {
            let downloads = self.downloads.clone();
            let guild = self.guild;
            tokio::spawn(async move {
                if let Err(e) = downloads.ensure_local(&track, guild).await {
                    debug!(guild = %guild, track = %track.id, error = %e, "prefetch failed");
                }
            });
        }
    }
}
