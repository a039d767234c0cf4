//! Turns what a user typed into an ordered list of tracks.

use std::path::Path;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serenity::async_trait;
use tracing::{debug, warn};

use crate::error::ToolError;
use crate::track::{is_valid_id, Track};

static SHORT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"youtu\.be/([A-Za-z0-9_-]{6,})").expect("valid regex"));
static WATCH_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]v=([A-Za-z0-9_-]{6,})").expect("valid regex"));
static LIST_PARAM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[?&]list=").expect("valid regex"));
static ANY_VIDEO_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[?&]v=|youtu\.be/").expect("valid regex"));

/// The operations the bot needs from the external media tool.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Every member of a playlist, in playlist order, without downloading.
    async fn playlist_entries(&self, url: &str) -> Result<Vec<Track>, ToolError>;

    /// Title of a single video, ignoring any playlist the url also names.
    async fn title(&self, url: &str) -> Result<String, ToolError>;

    /// Top search result for free text.
    async fn search_top(&self, query: &str) -> Result<Option<Track>, ToolError>;

    /// Extract audio for a single item into `dest`.
    ///
    /// `dest` is the final artifact path; implementations may write
    /// intermediate files next to it.
    async fn fetch_audio(&self, url: &str, dest: &Path) -> Result<(), ToolError>;
}

/// Video id carried directly by the input (`youtu.be/<id>` or `?v=<id>`).
pub fn video_id(input: &str) -> Option<&str> {
    SHORT_LINK
        .captures(input)
        .or_else(|| WATCH_PARAM.captures(input))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// A playlist link that does not also pin a single video.
pub fn is_pure_playlist(input: &str) -> bool {
    LIST_PARAM.is_match(input) && !ANY_VIDEO_PARAM.is_match(input)
}

#[derive(Clone)]
pub struct MediaResolver {
    tool: Arc<dyn MediaTool>,
}

impl MediaResolver {
    pub fn new(tool: Arc<dyn MediaTool>) -> Self {
        Self { tool }
    }

    /// Resolve user input into tracks. Never fails: any extraction error
    /// yields an empty list, which callers report as "could not identify".
    pub async fn resolve(&self, input: &str) -> Vec<Track> {
        let input = input.trim();
        if input.is_empty() {
            return Vec::new();
        }

        if is_pure_playlist(input) {
            return match self.tool.playlist_entries(input).await {
                Ok(tracks) => {
                    let tracks: Vec<Track> = tracks.into_iter().filter(|t| is_valid_id(&t.id)).collect();
                    debug!(count = tracks.len(), "resolved playlist");
                    tracks
                }
                Err(e) => {
                    warn!(input, error = %e, "playlist extraction failed");
                    Vec::new()
                }
            };
        }

        self.resolve_single(input).await.into_iter().collect()
    }

    async fn resolve_single(&self, input: &str) -> Option<Track> {
        if let Some(id) = video_id(input) {
            return match self.tool.title(input).await {
                Ok(title) => Some(Track::new(id, input, title)),
                Err(e) => {
                    warn!(input, error = %e, "could not read video title");
                    None
                }
            };
        }

        match self.tool.search_top(input).await {
            Ok(Some(track)) if is_valid_id(&track.id) => Some(track),
            Ok(_) => {
                debug!(input, "search returned nothing");
                None
            }
            Err(e) => {
                warn!(input, error = %e, "search failed");
                None
            }
        }
    }
}
