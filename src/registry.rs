use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use serenity::model::id::GuildId;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info};

use crate::downloads::DownloadCoordinator;
use crate::session::{GuildSession, SessionSettings};
use crate::voice::TransportEvent;

type SessionMap = HashMap<GuildId, Arc<GuildSession>>;

/// Owns one `GuildSession` per guild.
///
/// Sessions are created on first use and live until a transport failure
/// disposes of them; a stopped session stays registered and idle.
pub struct GuildRegistry {
    sessions: Arc<Mutex<SessionMap>>,
    downloads: Arc<DownloadCoordinator>,
    settings: SessionSettings,
}

fn lock(sessions: &Mutex<SessionMap>) -> MutexGuard<'_, SessionMap> {
    sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl GuildRegistry {
    pub fn new(downloads: Arc<DownloadCoordinator>, settings: SessionSettings) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            downloads,
            settings,
        }
    }

    pub fn downloads(&self) -> &Arc<DownloadCoordinator> {
        &self.downloads
    }

    pub fn get(&self, guild: GuildId) -> Option<Arc<GuildSession>> {
        lock(&self.sessions).get(&guild).cloned()
    }

    /// The guild's session, created (with its event pump) if missing.
    pub fn session(&self, guild: GuildId) -> Arc<GuildSession> {
        let mut sessions = lock(&self.sessions);
        if let Some(existing) = sessions.get(&guild) {
            return existing.clone();
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(GuildSession::new(guild, self.downloads.clone(), self.settings.clone(), tx));
        sessions.insert(guild, session.clone());
        tokio::spawn(pump(Arc::downgrade(&session), rx, Arc::downgrade(&self.sessions)));
        debug!(guild = %guild, "session created");
        session
    }

    /// Forget the guild's session. The next `session` call starts a fresh one.
    pub fn dispose(&self, guild: GuildId) -> Option<Arc<GuildSession>> {
        lock(&self.sessions).remove(&guild)
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Delivers transport events to one session.
async fn pump(
    session: Weak<GuildSession>,
    mut events: UnboundedReceiver<TransportEvent>,
    sessions: Weak<Mutex<SessionMap>>,
) {
    while let Some(event) = events.recv().await {
        let Some(session) = session.upgrade() else {
            break;
        };
        match event {
            TransportEvent::Finished { epoch } => {
                tokio::spawn(async move { session.on_track_end(epoch).await });
            }
            TransportEvent::Failed { reason } => {
                session.fail(&reason).await;
                if let Some(sessions) = sessions.upgrade() {
                    let mut sessions = lock(&sessions);
                    let guild = session.guild();
                    if sessions.get(&guild).is_some_and(|s| Arc::ptr_eq(s, &session)) {
                        sessions.remove(&guild);
                        info!(guild = %guild, "session discarded");
                    }
                }
                break;
            }
        }
    }
}
