//! The interactive "now playing" message.

use std::fmt::Write as _;
use std::sync::Arc;

use serenity::all::ButtonStyle;
use serenity::async_trait;
use serenity::builder::{CreateActionRow, CreateButton, CreateEmbed, CreateMessage, EditMessage};
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::PanelError;

/// Snapshot of a guild queue as the panel shows it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelView {
    pub current: Option<String>,
    pub upcoming: Vec<String>,
    /// Total number of queued tracks, including ones not listed.
    pub remaining: usize,
}

/// Where queue state is shown to users.
#[async_trait]
pub trait Panel: Send + Sync {
    /// Show `view`, replacing the previous render. A lost message is recreated.
    async fn render(&self, view: &PanelView) -> Result<(), PanelError>;

    /// Remove the panel message if there is one.
    async fn clear(&self);

    /// Post a one-off notice next to the panel.
    async fn notify(&self, text: &str);
}

/// Buttons on the panel. Custom ids look like `music:<action>:<guild>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelAction {
    Back,
    Resume,
    Pause,
    Skip,
    Stop,
    Download,
}

impl PanelAction {
    pub const ALL: [PanelAction; 6] = [
        PanelAction::Back,
        PanelAction::Resume,
        PanelAction::Pause,
        PanelAction::Skip,
        PanelAction::Stop,
        PanelAction::Download,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PanelAction::Back => "back",
            PanelAction::Resume => "resume",
            PanelAction::Pause => "pause",
            PanelAction::Skip => "skip",
            PanelAction::Stop => "stop",
            PanelAction::Download => "download",
        }
    }

    pub fn custom_id(self, guild: GuildId) -> String {
        format!("music:{}:{}", self.as_str(), guild.get())
    }

    /// Parse a button custom id. The guild part is optional.
    pub fn parse(custom_id: &str) -> Option<(PanelAction, Option<GuildId>)> {
        let mut parts = custom_id.split(':');
        if parts.next()? != "music" {
            return None;
        }
        let name = parts.next()?;
        let action = Self::ALL.into_iter().find(|a| a.as_str() == name)?;
        let guild = parts
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|id| *id != 0)
            .map(GuildId::new);
        Some((action, guild))
    }

    fn label(self) -> &'static str {
        match self {
            PanelAction::Back => "⬅️ Back",
            PanelAction::Resume => "▶️ Resume",
            PanelAction::Pause => "⏸ Pause",
            PanelAction::Skip => "⏭ Next",
            PanelAction::Stop => "⏹ Stop",
            PanelAction::Download => "⬇️ Download",
        }
    }

    fn style(self) -> ButtonStyle {
        match self {
            PanelAction::Resume => ButtonStyle::Success,
            PanelAction::Pause | PanelAction::Skip => ButtonStyle::Primary,
            PanelAction::Stop => ButtonStyle::Danger,
            PanelAction::Back | PanelAction::Download => ButtonStyle::Secondary,
        }
    }
}

/// Embed description for a view.
pub fn describe(view: &PanelView) -> String {
    let mut desc = String::new();
    if let Some(current) = &view.current {
        let _ = write!(desc, "🎶 **{current}**\n\n");
    }
    if !view.upcoming.is_empty() {
        desc.push_str("🔜 **Up next:**\n");
        for (i, title) in view.upcoming.iter().enumerate() {
            let _ = writeln!(desc, "{}. {title}", i + 1);
        }
        let hidden = view.remaining.saturating_sub(view.upcoming.len());
        if hidden > 0 {
            let _ = writeln!(desc, "…and {hidden} more");
        }
    }
    if desc.is_empty() {
        desc.push_str("Queue empty");
    }
    desc
}

/// Panel living in a text channel, edited in place.
pub struct ChannelPanel {
    http: Arc<Http>,
    channel: ChannelId,
    guild: GuildId,
    color: u32,
    message: Mutex<Option<MessageId>>,
}

impl ChannelPanel {
    pub fn new(http: Arc<Http>, channel: ChannelId, guild: GuildId, color: u32) -> Self {
        Self {
            http,
            channel,
            guild,
            color,
            message: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    fn embed(&self, view: &PanelView) -> CreateEmbed {
        CreateEmbed::new()
            .title("🎵 Playback Queue")
            .description(describe(view))
            .color(self.color)
    }

    fn rows(&self) -> Vec<CreateActionRow> {
        let button = |a: PanelAction| CreateButton::new(a.custom_id(self.guild)).label(a.label()).style(a.style());
        vec![
            CreateActionRow::Buttons(
                [
                    PanelAction::Back,
                    PanelAction::Resume,
                    PanelAction::Pause,
                    PanelAction::Skip,
                    PanelAction::Stop,
                ]
                .into_iter()
                .map(button)
                .collect(),
            ),
            CreateActionRow::Buttons(vec![button(PanelAction::Download)]),
        ]
    }
}

#[async_trait]
impl Panel for ChannelPanel {
    async fn render(&self, view: &PanelView) -> Result<(), PanelError> {
        let mut message = self.message.lock().await;

        if let Some(id) = *message {
            let edit = EditMessage::new().embed(self.embed(view)).components(self.rows());
            match self.channel.edit_message(&self.http, id, edit).await {
                Ok(_) => return Ok(()),
                Err(e) => {
                    warn!(guild = %self.guild, error = %e, "panel message lost, sending a new one");
                    *message = None;
                }
            }
        }

        let create = CreateMessage::new().embed(self.embed(view)).components(self.rows());
        match self.channel.send_message(&self.http, create).await {
            Ok(sent) => {
                debug!(guild = %self.guild, message = %sent.id, "panel sent");
                *message = Some(sent.id);
                Ok(())
            }
            Err(e) => {
                error!(guild = %self.guild, error = %e, "could not send panel");
                Err(PanelError::Send(e.to_string()))
            }
        }
    }

    async fn clear(&self) {
        if let Some(id) = self.message.lock().await.take() {
            let _ = self.channel.delete_message(&self.http, id).await;
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.channel.say(&self.http, text).await {
            warn!(guild = %self.guild, error = %e, "could not post notice");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_ids_parse_back_to_their_action() {
        let guild = GuildId::new(42);
        for action in PanelAction::ALL {
            assert_eq!(PanelAction::parse(&action.custom_id(guild)), Some((action, Some(guild))));
        }
        assert_eq!(PanelAction::parse("music:skip"), Some((PanelAction::Skip, None)));
        assert_eq!(PanelAction::parse("music:dance:42"), None);
        assert_eq!(PanelAction::parse("other:skip:42"), None);
    }

    #[test]
    fn description_lists_current_and_upcoming() {
        let view = PanelView {
            current: Some("Song A".into()),
            upcoming: vec!["Song B".into(), "Song C".into()],
            remaining: 4,
        };
        let desc = describe(&view);
        assert!(desc.starts_with("🎶 **Song A**"));
        assert!(desc.contains("1. Song B\n2. Song C\n"));
        assert!(desc.contains("and 2 more"));
    }

    #[test]
    fn empty_view_says_so() {
        assert_eq!(describe(&PanelView::default()), "Queue empty");
    }
}
