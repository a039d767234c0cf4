use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::session::SessionSettings;

pub const CONFIG_PATH: &str = "config.jsonc";

const DEFAULT_CONFIG: &str = r#"// Jukebox config (JSONC: supports comments)
{
  "music": {
    // Where downloaded audio is kept
    "cache_dir": "cache",
    // yt-dlp executable; .bin/yt-dlp is installed and used when this one does not run
    "ytdlp_path": "yt-dlp",
    // Downloads running at once, across all guilds
    "max_parallel_downloads": 1,
    // Cached files older than this are swept
    "cache_ttl_secs": 86400,
    "sweep_interval_secs": 3600,
    // Upcoming tracks protected from eviction / fetched ahead
    "retention_window": 3,
    "prefetch": 3,
    // A single download may not take longer than this
    "fetch_timeout_secs": 300,
    // Give up on the queue after this many failed downloads in a row
    "max_consecutive_failures": 5,
    "volume": 0.5,
    "embed_color": 1947988
  }
}
"#;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub music: MusicConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct MusicConfig {
    pub cache_dir: PathBuf,
    pub ytdlp_path: String,
    pub max_parallel_downloads: usize,
    pub cache_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub retention_window: usize,
    pub prefetch: usize,
    pub fetch_timeout_secs: u64,
    pub max_consecutive_failures: usize,
    pub volume: f32,
    pub embed_color: u32,
}

impl Default for MusicConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("cache"),
            ytdlp_path: "yt-dlp".to_string(),
            max_parallel_downloads: 1,
            cache_ttl_secs: 24 * 60 * 60,
            sweep_interval_secs: 60 * 60,
            retention_window: 3,
            prefetch: 3,
            fetch_timeout_secs: 300,
            max_consecutive_failures: 5,
            volume: 0.5,
            embed_color: 0x1DB954,
        }
    }
}

impl MusicConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            retention_window: self.retention_window,
            prefetch: self.prefetch,
            max_consecutive_failures: self.max_consecutive_failures.max(1),
        }
    }
}

pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    Ok(json5::from_str(contents)?)
}

pub async fn ensure_default_config() -> Result<(), ConfigError> {
    match tokio::fs::metadata(CONFIG_PATH).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tokio::fs::write(CONFIG_PATH, DEFAULT_CONFIG).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn load_config() -> Result<AppConfig, ConfigError> {
    let _ = ensure_default_config().await;

    let contents = tokio::fs::read_to_string(CONFIG_PATH).await?;
    parse_config(&contents)
}

/// Guild ids from a comma separated list, skipping blanks and junk.
pub fn parse_guild_ids(raw: &str) -> Vec<u64> {
    raw.split(',')
        .filter_map(|id| id.trim().parse::<u64>().ok())
        .filter(|id| *id != 0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_file_matches_built_in_defaults() {
        let cfg = parse_config(DEFAULT_CONFIG).unwrap();
        assert_eq!(cfg.music, MusicConfig::default());
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg = parse_config(r#"{ music: { max_parallel_downloads: 2, /* c */ volume: 0.2 } }"#).unwrap();
        assert_eq!(cfg.music.max_parallel_downloads, 2);
        assert_eq!(cfg.music.retention_window, 3);
        assert_eq!(cfg.music.cache_ttl(), Duration::from_secs(86400));

        let empty = parse_config("{}").unwrap();
        assert_eq!(empty.music, MusicConfig::default());
    }

    #[test]
    fn failure_bound_is_at_least_one() {
        let cfg = MusicConfig {
            max_consecutive_failures: 0,
            ..Default::default()
        };
        assert_eq!(cfg.session_settings().max_consecutive_failures, 1);
    }

    #[test]
    fn guild_ids_tolerate_spaces_and_junk() {
        assert_eq!(parse_guild_ids(" 111, 222 ,,abc, 0,333"), vec![111, 222, 333]);
        assert!(parse_guild_ids("").is_empty());
    }
}
