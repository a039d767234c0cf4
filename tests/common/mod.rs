#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use jukebox::cache::CacheStore;
use jukebox::downloads::DownloadCoordinator;
use jukebox::error::{PanelError, ToolError, TransportError};
use jukebox::panel::{Panel, PanelView};
use jukebox::registry::GuildRegistry;
use jukebox::resolver::MediaTool;
use jukebox::session::{GuildSession, SessionSettings};
use jukebox::track::{id_from_file_name, Track};
use jukebox::voice::Transport;
use serenity::async_trait;
use serenity::model::id::GuildId;

/// Writes a small file for every fetch unless the track id is listed in `failing`.
#[derive(Default)]
pub struct FakeTool {
    pub failing: HashSet<String>,
    pub fetched: Mutex<Vec<String>>,
    pub delay: Duration,
}

impl FakeTool {
    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn slow(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            ..Default::default()
        }
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTool for FakeTool {
    async fn playlist_entries(&self, _url: &str) -> Result<Vec<Track>, ToolError> {
        Ok(Vec::new())
    }

    async fn title(&self, _url: &str) -> Result<String, ToolError> {
        Ok(String::new())
    }

    async fn search_top(&self, _query: &str) -> Result<Option<Track>, ToolError> {
        Ok(None)
    }

    async fn fetch_audio(&self, _url: &str, dest: &Path) -> Result<(), ToolError> {
        let name = dest.file_name().unwrap().to_string_lossy().into_owned();
        let id = id_from_file_name(&name).unwrap().to_string();
        self.fetched.lock().unwrap().push(id.clone());
        tokio::time::sleep(self.delay).await;
        if self.failing.contains(&id) {
            return Err(ToolError::Exit {
                program: "fake".into(),
                status: "exit status: 1".into(),
                stderr: "unavailable".into(),
            });
        }
        tokio::fs::write(dest, b"ID3").await.unwrap();
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub plays: Mutex<Vec<(PathBuf, u64)>>,
    pub paused: Mutex<bool>,
    pub stops: Mutex<usize>,
    pub disconnects: Mutex<usize>,
}

impl FakeTransport {
    pub fn played_ids(&self) -> Vec<String> {
        self.plays
            .lock()
            .unwrap()
            .iter()
            .map(|(path, _)| {
                let name = path.file_name().unwrap().to_string_lossy().into_owned();
                id_from_file_name(&name).unwrap().to_string()
            })
            .collect()
    }

    pub fn last_epoch(&self) -> u64 {
        self.plays.lock().unwrap().last().map(|(_, e)| *e).unwrap()
    }

    pub fn disconnects(&self) -> usize {
        *self.disconnects.lock().unwrap()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn play(&self, path: &Path, epoch: u64) -> Result<(), TransportError> {
        self.plays.lock().unwrap().push((path.to_path_buf(), epoch));
        Ok(())
    }

    fn pause(&self) -> Result<(), TransportError> {
        *self.paused.lock().unwrap() = true;
        Ok(())
    }

    fn resume(&self) -> Result<(), TransportError> {
        *self.paused.lock().unwrap() = false;
        Ok(())
    }

    fn stop(&self) {
        *self.stops.lock().unwrap() += 1;
    }

    async fn disconnect(&self) {
        *self.disconnects.lock().unwrap() += 1;
    }
}

#[derive(Default)]
pub struct FakePanel {
    pub renders: Mutex<Vec<PanelView>>,
    pub clears: Mutex<usize>,
    pub notices: Mutex<Vec<String>>,
}

impl FakePanel {
    pub fn last_render(&self) -> Option<PanelView> {
        self.renders.lock().unwrap().last().cloned()
    }

    pub fn clears(&self) -> usize {
        *self.clears.lock().unwrap()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }
}

#[async_trait]
impl Panel for FakePanel {
    async fn render(&self, view: &PanelView) -> Result<(), PanelError> {
        self.renders.lock().unwrap().push(view.clone());
        Ok(())
    }

    async fn clear(&self) {
        *self.clears.lock().unwrap() += 1;
    }

    async fn notify(&self, text: &str) {
        self.notices.lock().unwrap().push(text.to_string());
    }
}

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub tool: Arc<FakeTool>,
    pub cache: Arc<CacheStore>,
    pub registry: GuildRegistry,
}

impl Harness {
    pub fn new(tool: FakeTool) -> Self {
        Self::with_settings(tool, SessionSettings::default())
    }

    pub fn with_settings(tool: FakeTool, settings: SessionSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(tool);
        let cache = Arc::new(CacheStore::new(dir.path(), Duration::from_secs(3600)).unwrap());
        let downloads = Arc::new(DownloadCoordinator::new(
            tool.clone(),
            cache.clone(),
            1,
            Duration::from_secs(5),
        ));
        Self {
            dir,
            tool,
            cache,
            registry: GuildRegistry::new(downloads, settings),
        }
    }

    /// A session with a fake voice connection and panel attached.
    pub async fn session(&self, guild: u64) -> (Arc<GuildSession>, Arc<FakeTransport>, Arc<FakePanel>) {
        let session = self.registry.session(GuildId::new(guild));
        let transport = Arc::new(FakeTransport::default());
        let panel = Arc::new(FakePanel::default());
        session.attach_transport(transport.clone()).await;
        session.set_panel(panel.clone()).await;
        (session, transport, panel)
    }

    pub fn cached(&self, id: &str) -> bool {
        self.cache.path_for(&track(id)).exists()
    }
}

pub fn track(id: &str) -> Track {
    Track::from_id(id, id.to_uppercase())
}

pub fn tracks(ids: &[&str]) -> Vec<Track> {
    ids.iter().map(|id| track(id)).collect()
}

pub fn ids(tracks: &[Track]) -> Vec<String> {
    tracks.iter().map(|t| t.id.clone()).collect()
}

/// Poll `check` until it holds, failing the test after about a second.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never became true");
}
