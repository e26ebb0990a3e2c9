//! Cached player state as last seen by the gateway.
//!
//! A [`PlayerState`] is only ever replaced as a whole: every status refresh
//! builds a new value from a fresh [`Status`] and either a freshly fetched or
//! the previously known [`Track`].

use std::fmt;

/// Playback state as reported by the player.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
    #[default]
    Unknown,
}

impl PlayState {
    /// Whether going from `previous` to `self` starts a track, as opposed to
    /// resuming one.
    ///
    /// This decides when the current song is fetched again and when a
    /// "now playing" line is announced: entering `Playing` from anything but
    /// `Paused`.
    #[must_use]
    pub fn starts_track(self, previous: PlayState) -> bool {
        self == Self::Playing && previous != Self::Paused
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Playing => write!(f, "playing"),
            Self::Paused => write!(f, "paused"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Tags of the current song. Any of them may be missing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Track {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
}

impl Track {
    #[must_use]
    pub fn artist(&self) -> &str {
        self.artist.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    #[must_use]
    pub fn album(&self) -> &str {
        self.album.as_deref().unwrap_or_default()
    }

    /// Formats the track start announcement.
    ///
    /// Format: `Now playing: {title} - {artist} ({album})`
    #[must_use]
    pub fn announcement(&self) -> String {
        format!(
            "Now playing: {} - {} ({})",
            self.title(),
            self.artist(),
            self.album()
        )
    }
}

/// Result of a `status` request.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Status {
    pub state: PlayState,
    /// Elapsed time of the current song in whole seconds.
    pub elapsed: u32,
    /// Total time of the current song in whole seconds.
    pub total: u32,
    pub repeat: bool,
    pub random: bool,
}

/// Everything the gateway knows about the player.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PlayerState {
    pub status: Status,
    pub track: Option<Track>,
}

impl PlayerState {
    #[must_use]
    pub fn new(status: Status, track: Option<Track>) -> Self {
        Self { status, track }
    }

    #[must_use]
    pub fn play_state(&self) -> PlayState {
        self.status.state
    }

    /// Formats the one-line status reply.
    ///
    /// Format: `[{state}] {artist} - {title} ({m}:{ss}/{m}:{ss}) | repeat: ...
    /// | random: ... | announce: ...`
    #[must_use]
    pub fn status_line(&self, announce: bool) -> String {
        let (artist, title) = self
            .track
            .as_ref()
            .map_or(("", ""), |track| (track.artist(), track.title()));
        let status = &self.status;

        format!(
            "[{}] {artist} - {title} ({}/{}) | repeat: {} | random: {} | announce: {}",
            status.state,
            clock(status.elapsed),
            clock(status.total),
            abled(status.repeat),
            abled(status.random),
            abled(announce),
        )
    }
}

/// Formats whole seconds as `m:ss`.
fn clock(seconds: u32) -> String {
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// Formats a flag as `enabled` or `disabled`.
#[must_use]
pub fn abled(flag: bool) -> &'static str {
    if flag {
        "enabled"
    } else {
        "disabled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playing() -> PlayerState {
        PlayerState::new(
            Status {
                state: PlayState::Playing,
                elapsed: 65,
                total: 245,
                repeat: true,
                random: false,
            },
            Some(Track {
                artist: Some("Artist".to_owned()),
                title: Some("Title".to_owned()),
                album: Some("Album".to_owned()),
            }),
        )
    }

    #[test]
    fn formats_status_line() {
        assert_eq!(
            playing().status_line(true),
            "[playing] Artist - Title (1:05/4:05) | repeat: enabled | random: disabled | announce: enabled"
        );
    }

    #[test]
    fn status_line_without_track_leaves_tags_empty() {
        let state = PlayerState::default();
        assert_eq!(
            state.status_line(false),
            "[unknown]  -  (0:00/0:00) | repeat: disabled | random: disabled | announce: disabled"
        );
    }

    #[test]
    fn formats_announcement() {
        let track = playing().track.unwrap();
        assert_eq!(track.announcement(), "Now playing: Title - Artist (Album)");

        let partial = Track {
            title: Some("Title".to_owned()),
            ..Track::default()
        };
        assert_eq!(partial.announcement(), "Now playing: Title -  ()");
    }

    #[test]
    fn track_start_excludes_resume() {
        use PlayState::*;

        assert!(Playing.starts_track(Stopped));
        assert!(Playing.starts_track(Unknown));
        assert!(Playing.starts_track(Playing));
        assert!(!Playing.starts_track(Paused));
        assert!(!Paused.starts_track(Playing));
        assert!(!Stopped.starts_track(Playing));
    }
}
