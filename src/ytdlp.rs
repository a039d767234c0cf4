use std::path::Path;
use std::process::Stdio;

use serde::Deserialize;
use serenity::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::resolver::MediaTool;
use crate::track::{is_valid_id, Track};

/// `MediaTool` backed by the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: String,
}

/// One line of `yt-dlp -j --flat-playlist` output. Only the fields we read.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: Option<String>,
    title: Option<String>,
}

impl YtDlp {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn stdout_of(&self, args: &[&str]) -> Result<String, ToolError> {
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        // `-i` makes yt-dlp exit non-zero when a single playlist member is
        // unavailable; keep whatever it managed to print.
        if !output.status.success() && stdout.trim().is_empty() {
            return Err(ToolError::Exit {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(stdout)
    }
}

/// Parse `-j --flat-playlist` output into tracks, keeping source order.
/// Entries without a usable id are skipped; untitled ones get a positional name.
pub fn parse_flat_entries(stdout: &str) -> Vec<Track> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str::<FlatEntry>(line).ok())
        .enumerate()
        .filter_map(|(index, entry)| {
            let id = entry.id.filter(|id| is_valid_id(id))?;
            let title = entry
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| format!("Track {}", index + 1));
            Some(Track::from_id(id, title))
        })
        .collect()
}

/// Output template for yt-dlp: the final extension is filled in after transcoding.
fn output_template(dest: &Path) -> String {
    dest.with_extension("%(ext)s").to_string_lossy().into_owned()
}

#[async_trait]
impl MediaTool for YtDlp {
    async fn playlist_entries(&self, url: &str) -> Result<Vec<Track>, ToolError> {
        let stdout = self.stdout_of(&["--flat-playlist", "-j", "-i", url]).await?;
        let tracks = parse_flat_entries(&stdout);
        if tracks.is_empty() {
            return Err(ToolError::Parse(format!("no playlist entries for {url}")));
        }
        Ok(tracks)
    }

    async fn title(&self, url: &str) -> Result<String, ToolError> {
        let stdout = self.stdout_of(&["--no-playlist", "--get-title", "-i", url]).await?;
        stdout
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ToolError::Parse(format!("no title for {url}")))
    }

    async fn search_top(&self, query: &str) -> Result<Option<Track>, ToolError> {
        let search = format!("ytsearch1:{query}");
        let stdout = self.stdout_of(&["--flat-playlist", "-j", "-i", &search]).await?;
        Ok(parse_flat_entries(&stdout).into_iter().next())
    }

    async fn fetch_audio(&self, url: &str, dest: &Path) -> Result<(), ToolError> {
        info!(url, dest = %dest.display(), "downloading");
        let template = output_template(dest);
        let output = Command::new(&self.program)
            .args(["-x", "--audio-format", "mp3", "--no-playlist", "-o", &template, url])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ToolError::Spawn {
                program: self.program.clone(),
                reason: e.to_string(),
            })?;

        // Success is judged by the artifact existing, not the exit code.
        if output.status.success() {
            debug!(url, "yt-dlp finished");
        } else {
            warn!(
                url,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "yt-dlp exited with an error"
            );
        }
        Ok(())
    }
}
