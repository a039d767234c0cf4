//! On-disk audio cache.
//!
//! A flat directory of `VIDEOID-<id>.mp3` files. The file's own modification
//! time is the only expiry signal; there is no index. The directory is shared
//! by every guild, so guild-scoped eviction keeps anything another guild still
//! has pinned.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serenity::model::id::GuildId;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::track::{id_from_file_name, Track};

#[derive(Debug)]
pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
    /// Retention window last published by each guild, by track id.
    pins: Mutex<HashMap<GuildId, HashSet<String>>>,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            ttl,
            pins: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, track: &Track) -> PathBuf {
        track.cache_path(&self.dir)
    }

    /// True when a non-empty artifact for the track is on disk.
    pub async fn is_cached(&self, track: &Track) -> bool {
        match tokio::fs::metadata(self.path_for(track)).await {
            Ok(meta) => meta.is_file() && meta.len() > 0,
            Err(_) => false,
        }
    }

    /// Record `window` as the guild's retention set and return the protected paths.
    pub fn pin(&self, guild: GuildId, window: &[Track]) -> HashSet<PathBuf> {
        let ids: HashSet<String> = window.iter().map(|t| t.id.clone()).collect();
        let paths = window.iter().map(|t| self.path_for(t)).collect();
        self.pins_guard().insert(guild, ids);
        paths
    }

    /// Forget a guild's retention set (its session is gone).
    pub fn unpin(&self, guild: GuildId) {
        self.pins_guard().remove(&guild);
    }

    /// Ids currently pinned by any guild.
    pub fn pinned_ids(&self) -> HashSet<String> {
        self.pins_guard().values().flatten().cloned().collect()
    }

    /// Remove every cache file that is neither in `window` (re-pinned for
    /// `guild`), nor pinned by another guild, nor listed in `busy`.
    ///
    /// Returns the number of files removed. Per-file errors are ignored.
    pub async fn evict_guild(&self, guild: GuildId, window: &[Track], busy: &HashSet<String>) -> usize {
        self.pin(guild, window);
        let mut keep = self.pinned_ids();
        keep.extend(busy.iter().cloned());

        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot read cache dir");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(id) = name.to_str().and_then(id_from_file_name) else {
                continue;
            };
            if keep.contains(id) {
                continue;
            }
            if tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }

        info!(guild = %guild, removed, kept = keep.len(), "guild cache cleaned");
        removed
    }

    /// Delete files older than the TTL, measured against `now`.
    pub async fn sweep_expired(&self, now: SystemTime) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "cannot read cache dir");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else {
                continue;
            };
            let age = now.duration_since(modified).unwrap_or_default();
            if age > self.ttl && tokio::fs::remove_file(entry.path()).await.is_ok() {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed, "expired cache files swept");
        }
        removed
    }

    /// Run `sweep_expired` every `every` for the life of the process.
    pub fn spawn_sweeper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = self.sweep_expired(SystemTime::now()).await;
                debug!(removed, "cache sweep finished");
            }
        })
    }

    fn pins_guard(&self) -> std::sync::MutexGuard<'_, HashMap<GuildId, HashSet<String>>> {
        self.pins.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn store() -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::new(dir.path(), DAY).unwrap();
        (dir, store)
    }

    fn track(id: &str) -> Track {
        Track::from_id(id, id)
    }

    fn write(store: &CacheStore, t: &Track) {
        std::fs::write(store.path_for(t), b"audio").unwrap();
    }

    #[tokio::test]
    async fn empty_files_do_not_count_as_cached() {
        let (_dir, store) = store();
        let t = track("aaaaaa");
        assert!(!store.is_cached(&t).await);

        std::fs::write(store.path_for(&t), b"").unwrap();
        assert!(!store.is_cached(&t).await);

        write(&store, &t);
        assert!(store.is_cached(&t).await);
    }

    #[tokio::test]
    async fn sweep_only_removes_files_past_the_ttl() {
        let (dir, store) = store();
        let t = track("aaaaaa");
        write(&store, &t);
        std::fs::write(dir.path().join("stray.log"), b"x").unwrap();

        assert_eq!(store.sweep_expired(SystemTime::now()).await, 0);
        assert!(store.is_cached(&t).await);

        let tomorrow = SystemTime::now() + DAY + Duration::from_secs(60);
        assert_eq!(store.sweep_expired(tomorrow).await, 2);
        assert!(!store.is_cached(&t).await);
    }

    #[tokio::test]
    async fn eviction_keeps_the_window_and_foreign_files() {
        let (dir, store) = store();
        let guild = GuildId::new(1);
        let tracks: Vec<Track> = ["aaaaaa", "bbbbbb", "cccccc", "dddddd", "eeeeee"]
            .into_iter()
            .map(track)
            .collect();
        for t in &tracks {
            write(&store, t);
        }
        std::fs::write(dir.path().join("readme.txt"), b"keep me").unwrap();

        let removed = store.evict_guild(guild, &tracks[..4], &HashSet::new()).await;
        assert_eq!(removed, 1);
        for t in &tracks[..4] {
            assert!(store.is_cached(t).await, "{} evicted", t.id);
        }
        assert!(!store.is_cached(&tracks[4]).await);
        assert!(dir.path().join("readme.txt").exists());
    }

    #[tokio::test]
    async fn eviction_respects_other_guilds_and_busy_downloads() {
        let (_dir, store) = store();
        let (a, b, c) = (track("aaaaaa"), track("bbbbbb"), track("cccccc"));
        for t in [&a, &b, &c] {
            write(&store, t);
        }
        store.pin(GuildId::new(2), std::slice::from_ref(&b));
        let busy = HashSet::from([c.id.clone()]);

        let removed = store.evict_guild(GuildId::new(1), &[], &busy).await;
        assert_eq!(removed, 1);
        assert!(!store.is_cached(&a).await);
        assert!(store.is_cached(&b).await);
        assert!(store.is_cached(&c).await);

        store.unpin(GuildId::new(2));
        assert_eq!(store.evict_guild(GuildId::new(1), &[], &HashSet::new()).await, 2);
    }

    #[test]
    fn pin_returns_the_protected_paths() {
        let (dir, store) = store();
        let paths = store.pin(GuildId::new(9), &[track("aaaaaa"), track("bbbbbb")]);
        assert!(paths.contains(&dir.path().join("VIDEOID-aaaaaa.mp3")));
        assert_eq!(paths.len(), 2);
        assert_eq!(store.pinned_ids().len(), 2);
    }
}
