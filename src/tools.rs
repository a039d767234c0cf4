//! Start-up provisioning of the external media tools.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use reqwest::Client;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, info, warn};

type ToolResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

pub const BIN_DIR: &str = ".bin";

#[cfg(windows)]
const YTDLP_ASSET: &str = "yt-dlp.exe";
#[cfg(not(windows))]
const YTDLP_ASSET: &str = "yt-dlp";

const RELEASES: &str = "https://github.com/yt-dlp/yt-dlp/releases/latest/download";

/// Program to run yt-dlp with.
///
/// `configured` wins when it runs. Otherwise the copy in `.bin/` is used,
/// installed from the latest release first if it is missing or broken.
pub async fn ensure_media_tools(configured: &str) -> ToolResult<String> {
    let program = if runs(configured).await {
        debug!(program = configured, "using configured yt-dlp");
        configured.to_string()
    } else {
        let local = PathBuf::from(BIN_DIR).join(YTDLP_ASSET);
        if !runs(&local).await {
            install_ytdlp(&local).await?;
        }
        local.to_string_lossy().into_owned()
    };

    // extraction to mp3 goes through ffmpeg
    if !runs("ffmpeg").await {
        warn!("ffmpeg not found on PATH, downloads will fail");
    }

    Ok(program)
}

async fn runs(program: impl AsRef<OsStr>) -> bool {
    Command::new(program)
        .arg("--version")
        .kill_on_drop(true)
        .output()
        .await
        .is_ok_and(|o| o.status.success())
}

async fn install_ytdlp(dest: &Path) -> ToolResult<()> {
    if let Some(dir) = dest.parent() {
        fs::create_dir_all(dir).await?;
    }

    let url = format!("{RELEASES}/{YTDLP_ASSET}");
    info!(url = %url, "downloading yt-dlp");
    let body = Client::new().get(&url).send().await?.error_for_status()?.bytes().await?;
    fs::write(dest, &body).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, std::fs::Permissions::from_mode(0o755)).await?;
    }

    info!(path = %dest.display(), bytes = body.len(), "yt-dlp installed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_programs_do_not_run() {
        assert!(!runs("jukebox-no-such-tool").await);
        assert!(!runs(PathBuf::from(BIN_DIR).join("jukebox-no-such-tool")).await);
    }
}
