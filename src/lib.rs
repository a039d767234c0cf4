//! Discord music bot: per-guild queues over a shared yt-dlp download cache.

pub mod cache;
pub mod commands;
pub mod config;
pub mod downloads;
pub mod error;
pub mod panel;
pub mod queue;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod tools;
pub mod track;
pub mod voice;
pub mod ytdlp;
