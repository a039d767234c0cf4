//! Fetches tracks into the cache under a global concurrency cap.
//!
//! Callers that find no free slot wait in a per-guild FIFO; whenever a slot is
//! released the oldest waiter across all guilds is started. A guild's unstarted
//! waiters can be cancelled wholesale, which never touches fetches that are
//! already running. Concurrent requests for the same uncached track share one
//! fetch; if that fetch is cancelled by the guild that queued it, requesters
//! from other guilds queue it again under their own guild.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serenity::model::id::GuildId;
use tokio::sync::{oneshot, OnceCell};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::error::FetchError;
use crate::resolver::MediaTool;
use crate::track::Track;

type FetchOutcome = Result<PathBuf, FetchError>;

pub struct DownloadCoordinator {
    tool: Arc<dyn MediaTool>,
    cache: Arc<CacheStore>,
    timeout: Duration,
    slots: Arc<Mutex<Slots>>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<FetchOutcome>>>>,
}

#[derive(Debug)]
struct Slots {
    limit: usize,
    active: usize,
    next_seq: u64,
    pending: HashMap<GuildId, VecDeque<(u64, oneshot::Sender<()>)>>,
    /// Bumped on every `cancel_pending` for the guild.
    cancellations: HashMap<GuildId, u64>,
}

impl Slots {
    fn cancellations(&self, guild: GuildId) -> u64 {
        self.cancellations.get(&guild).copied().unwrap_or(0)
    }

    /// Hand free slots to the oldest pending waiters, across guilds.
    fn dispatch(&mut self) {
        while self.active < self.limit {
            let oldest = self
                .pending
                .iter()
                .filter_map(|(guild, fifo)| fifo.front().map(|(seq, _)| (*seq, *guild)))
                .min();
            let Some((_, guild)) = oldest else {
                return;
            };
            let Some(fifo) = self.pending.get_mut(&guild) else {
                return;
            };
            let Some((_, start)) = fifo.pop_front() else {
                return;
            };
            if fifo.is_empty() {
                self.pending.remove(&guild);
            }
            // a closed receiver means the waiter gave up; try the next one
            if start.send(()).is_ok() {
                self.active += 1;
            }
        }
    }

    fn release(&mut self) {
        self.active = self.active.saturating_sub(1);
        self.dispatch();
    }
}

fn lock_slots(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A held download slot. Dropping it frees the slot and starts the next waiter.
struct SlotGuard {
    slots: Arc<Mutex<Slots>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        lock_slots(&self.slots).release();
    }
}

/// A queued request for a slot.
struct SlotWaiter {
    rx: oneshot::Receiver<()>,
    slots: Arc<Mutex<Slots>>,
    granted: bool,
}

impl SlotWaiter {
    async fn wait(mut self) -> Result<SlotGuard, FetchError> {
        match (&mut self.rx).await {
            Ok(()) => {
                self.granted = true;
                Ok(SlotGuard {
                    slots: self.slots.clone(),
                })
            }
            Err(_) => Err(FetchError::Cancelled),
        }
    }
}

impl Drop for SlotWaiter {
    fn drop(&mut self) {
        // The slot may have been handed over after this waiter was abandoned.
        if !self.granted && self.rx.try_recv().is_ok() {
            lock_slots(&self.slots).release();
        }
    }
}

impl DownloadCoordinator {
    pub fn new(tool: Arc<dyn MediaTool>, cache: Arc<CacheStore>, max_parallel: usize, timeout: Duration) -> Self {
        Self {
            tool,
            cache,
            timeout,
            slots: Arc::new(Mutex::new(Slots {
                limit: max_parallel.max(1),
                active: 0,
                next_seq: 0,
                pending: HashMap::new(),
                cancellations: HashMap::new(),
            })),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    /// Make sure the track's artifact is on disk and return its path.
    ///
    /// Returns immediately on a cache hit. Otherwise joins (or starts) the one
    /// fetch for this track id.
    pub async fn ensure_local(&self, track: &Track, guild: GuildId) -> FetchOutcome {
        let path = self.cache.path_for(track);
        if self.cache.is_cached(track).await {
            return Ok(path);
        }

        loop {
            let seen = lock_slots(&self.slots).cancellations(guild);
            let cell = self
                .in_flight_guard()
                .entry(track.id.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone();

            let outcome = cell.get_or_init(|| self.fetch(track, guild)).await.clone();

            {
                let mut in_flight = self.in_flight_guard();
                if in_flight.get(&track.id).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                    in_flight.remove(&track.id);
                }
            }

            let cancelled_here = lock_slots(&self.slots).cancellations(guild) != seen;
            match outcome {
                // cancelled on behalf of some other guild
                Err(FetchError::Cancelled) if !cancelled_here => {
                    debug!(guild = %guild, track = %track.id, "shared fetch cancelled elsewhere, queueing again");
                }
                outcome => return outcome,
            }
        }
    }

    /// Drop every unstarted request queued by `guild`. Running fetches continue.
    pub fn cancel_pending(&self, guild: GuildId) -> usize {
        let mut slots = lock_slots(&self.slots);
        *slots.cancellations.entry(guild).or_default() += 1;
        let removed = slots.pending.remove(&guild).map(|fifo| fifo.len()).unwrap_or(0);
        drop(slots);
        if removed > 0 {
            debug!(guild = %guild, removed, "pending downloads cancelled");
        }
        removed
    }

    /// Track ids with a fetch queued or running.
    pub fn busy_ids(&self) -> HashSet<String> {
        self.in_flight_guard().keys().cloned().collect()
    }

    /// Number of fetches holding a slot right now.
    pub fn active(&self) -> usize {
        lock_slots(&self.slots).active
    }

    /// Number of requests waiting for a slot.
    pub fn pending(&self) -> usize {
        lock_slots(&self.slots).pending.values().map(VecDeque::len).sum()
    }

    async fn acquire(&self, guild: GuildId) -> Result<SlotGuard, FetchError> {
        let rx = {
            let mut slots = lock_slots(&self.slots);
            if slots.active < slots.limit {
                slots.active += 1;
                return Ok(SlotGuard {
                    slots: self.slots.clone(),
                });
            }
            let (tx, rx) = oneshot::channel();
            let seq = slots.next_seq;
            slots.next_seq += 1;
            slots.pending.entry(guild).or_default().push_back((seq, tx));
            rx
        };

        SlotWaiter {
            rx,
            slots: self.slots.clone(),
            granted: false,
        }
        .wait()
        .await
    }

    async fn fetch(&self, track: &Track, guild: GuildId) -> FetchOutcome {
        let _slot = self.acquire(guild).await?;
        let dest = self.cache.path_for(track);

        // Someone may have finished this track while we waited.
        if self.cache.is_cached(track).await {
            return Ok(dest);
        }

        info!(guild = %guild, track = %track.id, "fetch started");
        match tokio::time::timeout(self.timeout, self.tool.fetch_audio(&track.url, &dest)).await {
            Err(_) => {
                warn!(track = %track.id, timeout = ?self.timeout, "fetch timed out");
                return Err(FetchError::Timeout(self.timeout));
            }
            Ok(Err(e)) => {
                warn!(track = %track.id, error = %e, "fetch failed");
                return Err(e.into());
            }
            Ok(Ok(())) => {}
        }

        if self.cache.is_cached(track).await {
            info!(track = %track.id, path = %dest.display(), "fetch complete");
            Ok(dest)
        } else {
            warn!(track = %track.id, "fetch produced no file");
            Err(FetchError::Missing(dest.display().to_string()))
        }
    }

    fn in_flight_guard(&self) -> MutexGuard<'_, HashMap<String, Arc<OnceCell<FetchOutcome>>>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
