use std::collections::VecDeque;

use crate::panel::PanelView;
use crate::track::Track;

/// How many queued titles the panel lists.
pub const PANEL_UPCOMING: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    /// Nothing selected for playback.
    #[default]
    Idle,
    /// `current` chosen, waiting for its artifact.
    Loading,
    /// Artifact handed to the voice driver.
    Playing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// `current` now holds this track.
    Track(Track),
    /// Forward move with nothing queued; the session should wind down.
    Exhausted,
    /// Backward move with no history; nothing changed.
    Unavailable,
}

/// Per-guild playback order: upcoming tracks, history and the current track.
///
/// Every transition bumps `epoch`. Work that started under an older epoch
/// (a download, a track-end notification) must not be applied.
#[derive(Debug, Default)]
pub struct GuildQueue {
    tracks: VecDeque<Track>,
    previous: Vec<Track>,
    current: Option<Track>,
    state: PlaybackState,
    epoch: u64,
}

impl GuildQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &VecDeque<Track> {
        &self.tracks
    }

    pub fn previous(&self) -> &[Track] {
        &self.previous
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Started and not yet wound down.
    pub fn is_playing(&self) -> bool {
        self.state != PlaybackState::Idle
    }

    pub fn push(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
    }

    /// Pick the next track in `direction` and enter Loading.
    pub fn select(&mut self, direction: Direction) -> Selection {
        let track = match direction {
            Direction::Forward => {
                let Some(next) = self.tracks.pop_front() else {
                    return Selection::Exhausted;
                };
                if let Some(current) = self.current.take() {
                    self.previous.push(current);
                }
                next
            }
            Direction::Backward => {
                let Some(prev) = self.previous.pop() else {
                    return Selection::Unavailable;
                };
                if let Some(current) = self.current.take() {
                    self.tracks.push_front(current);
                }
                prev
            }
        };

        self.current = Some(track.clone());
        self.state = PlaybackState::Loading;
        self.epoch += 1;
        Selection::Track(track)
    }

    /// Loading -> Playing, unless something else happened since `epoch`.
    pub fn mark_playing(&mut self, epoch: u64) -> bool {
        if self.epoch != epoch || self.state != PlaybackState::Loading {
            return false;
        }
        self.state = PlaybackState::Playing;
        true
    }

    /// Forget the track selected at `epoch` because it cannot be played.
    /// It does not enter the history.
    pub fn drop_current(&mut self, epoch: u64) -> bool {
        if self.epoch != epoch {
            return false;
        }
        self.current = None;
        true
    }

    /// Back to Idle after the queue ran out. `current` is left as it was.
    pub fn finish(&mut self) {
        self.state = PlaybackState::Idle;
        self.epoch += 1;
    }

    /// Explicit stop: everything is cleared, including `current`.
    pub fn stop(&mut self) {
        self.tracks.clear();
        self.previous.clear();
        self.current = None;
        self.state = PlaybackState::Idle;
        self.epoch += 1;
    }

    /// Give up on the upcoming tracks after repeated failures.
    pub fn abandon(&mut self) {
        self.tracks.clear();
        self.current = None;
        self.state = PlaybackState::Idle;
        self.epoch += 1;
    }

    /// The next `n` queued tracks.
    pub fn upcoming(&self, n: usize) -> Vec<Track> {
        self.tracks.iter().take(n).cloned().collect()
    }

    /// Current track plus the next `n` queued ones.
    pub fn retention_window(&self, n: usize) -> Vec<Track> {
        self.current.iter().cloned().chain(self.tracks.iter().take(n).cloned()).collect()
    }

    pub fn view(&self) -> PanelView {
        PanelView {
            current: self.current.as_ref().map(|t| t.title.clone()),
            upcoming: self.tracks.iter().take(PANEL_UPCOMING).map(|t| t.title.clone()).collect(),
            remaining: self.tracks.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(id: &str) -> Track {
        Track::from_id(id, format!("title {id}"))
    }

    fn ids<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> Vec<&'a str> {
        tracks.into_iter().map(|t| t.id.as_str()).collect()
    }

    #[test]
    fn forward_moves_current_into_history() {
        let mut q = GuildQueue::new();
        q.push([t("t1"), t("t2"), t("t3")]);

        assert_eq!(q.select(Direction::Forward), Selection::Track(t("t1")));
        assert_eq!(ids(q.tracks()), ["t2", "t3"]);
        assert!(q.previous().is_empty());

        assert_eq!(q.select(Direction::Forward), Selection::Track(t("t2")));
        assert_eq!(q.current(), Some(&t("t2")));
        assert_eq!(ids(q.tracks()), ["t3"]);
        assert_eq!(ids(q.previous()), ["t1"]);
    }

    #[test]
    fn backward_restores_the_previous_track_and_requeues_current() {
        let mut q = GuildQueue::new();
        q.push([t("t1"), t("t2"), t("t3")]);
        q.select(Direction::Forward);
        q.select(Direction::Forward);

        assert_eq!(q.select(Direction::Backward), Selection::Track(t("t1")));
        assert_eq!(q.current(), Some(&t("t1")));
        assert_eq!(ids(q.tracks()), ["t2", "t3"]);
        assert!(q.previous().is_empty());
    }

    #[test]
    fn backward_without_history_changes_nothing() {
        let mut q = GuildQueue::new();
        q.push([t("t1")]);
        q.select(Direction::Forward);
        let epoch = q.epoch();

        assert_eq!(q.select(Direction::Backward), Selection::Unavailable);
        assert_eq!(q.current(), Some(&t("t1")));
        assert_eq!(q.epoch(), epoch);
    }

    #[test]
    fn exhaustion_keeps_current_but_goes_idle() {
        let mut q = GuildQueue::new();
        q.push([t("t1")]);
        q.select(Direction::Forward);
        assert!(q.mark_playing(q.epoch()));

        assert_eq!(q.select(Direction::Forward), Selection::Exhausted);
        q.finish();
        assert_eq!(q.state(), PlaybackState::Idle);
        assert!(!q.is_playing());
        assert_eq!(q.current(), Some(&t("t1")));
    }

    #[test]
    fn stale_epochs_are_rejected() {
        let mut q = GuildQueue::new();
        q.push([t("t1"), t("t2")]);
        q.select(Direction::Forward);
        let first = q.epoch();
        q.select(Direction::Forward);

        assert!(!q.mark_playing(first));
        assert!(!q.drop_current(first));
        assert_eq!(q.state(), PlaybackState::Loading);
        assert!(q.mark_playing(q.epoch()));
    }

    #[test]
    fn stop_clears_everything() {
        let mut q = GuildQueue::new();
        q.push([t("t1"), t("t2"), t("t3")]);
        q.select(Direction::Forward);
        q.select(Direction::Forward);
        q.stop();

        assert!(q.tracks().is_empty());
        assert!(q.previous().is_empty());
        assert_eq!(q.current(), None);
        assert_eq!(q.state(), PlaybackState::Idle);
    }

    #[test]
    fn retention_window_is_current_plus_next_n() {
        let mut q = GuildQueue::new();
        q.push(["t1", "t2", "t3", "t4", "t5", "t6"].map(t));
        assert_eq!(ids(&q.retention_window(3)), ["t1", "t2", "t3"]);

        q.select(Direction::Forward);
        assert_eq!(ids(&q.retention_window(3)), ["t1", "t2", "t3", "t4"]);
        assert_eq!(ids(&q.upcoming(3)), ["t2", "t3", "t4"]);
    }

    #[test]
    fn view_lists_five_upcoming_titles() {
        let mut q = GuildQueue::new();
        q.push(["a1", "a2", "a3", "a4", "a5", "a6", "a7"].map(t));
        q.select(Direction::Forward);

        let view = q.view();
        assert_eq!(view.current.as_deref(), Some("title a1"));
        assert_eq!(view.upcoming.len(), PANEL_UPCOMING);
        assert_eq!(view.upcoming[0], "title a2");
        assert_eq!(view.remaining, 6);
    }
}
