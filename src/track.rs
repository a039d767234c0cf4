use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Prefix shared by every cached audio artifact.
pub const CACHE_PREFIX: &str = "VIDEOID-";
/// Extension yt-dlp is asked to transcode to.
pub const CACHE_EXTENSION: &str = "mp3";

/// A resolved, playable item from the video service.
///
/// Identity is `id`; two tracks with the same id share one cache artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub url: String,
    pub title: String,
}

impl Track {
    pub fn new(id: impl Into<String>, url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            title: title.into(),
        }
    }

    /// Track for a bare video id, pointing at the canonical watch url.
    pub fn from_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        let url = watch_url(&id);
        Self::new(id, url, title)
    }

    pub fn file_name(&self) -> String {
        file_name_for(&self.id)
    }

    pub fn cache_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(self.file_name())
    }
}

pub fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={id}")
}

pub fn file_name_for(id: &str) -> String {
    format!("{CACHE_PREFIX}{id}.{CACHE_EXTENSION}")
}

/// Video ids are restricted to the url-safe alphabet so they can never
/// escape the cache directory when turned into a file name.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Track id encoded in a cache file name, if the name follows the cache scheme.
///
/// Intermediate files written by yt-dlp (`VIDEOID-<id>.webm`, `.part`) map to
/// the same id as the final artifact.
pub fn id_from_file_name(name: &str) -> Option<&str> {
    let rest = name.strip_prefix(CACHE_PREFIX)?;
    let id = rest.split('.').next()?;
    is_valid_id(id).then_some(id)
}
