use std::fmt;
use std::time::Duration;

use bitflags::bitflags;

use crate::metadata::TrackMetadata;

/// Unique identifier for a media player: its well-known bus name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(String);

impl PlayerId {
    /// Create a `PlayerId` from a D-Bus bus name
    pub fn from_bus_name(bus_name: &str) -> Self {
        Self(bus_name.to_string())
    }

    /// Get the D-Bus bus name
    pub fn bus_name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current playback status of a media player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    /// Player is currently playing
    Playing,

    /// Player is paused
    Paused,

    /// Player is stopped
    #[default]
    Stopped,
}

impl From<&str> for PlaybackStatus {
    fn from(status: &str) -> Self {
        match status {
            "Playing" => Self::Playing,
            "Paused" => Self::Paused,
            _ => Self::Stopped,
        }
    }
}

impl From<PlaybackStatus> for &'static str {
    fn from(status: PlaybackStatus) -> Self {
        match status {
            PlaybackStatus::Playing => "Playing",
            PlaybackStatus::Paused => "Paused",
            PlaybackStatus::Stopped => "Stopped",
        }
    }
}

/// Loop status for track or playlist repetition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopStatus {
    /// No looping
    #[default]
    None,

    /// Loop current track
    Track,

    /// Loop entire playlist
    Playlist,

    /// Player reported a value outside the MPRIS vocabulary
    Unsupported,
}

impl From<&str> for LoopStatus {
    fn from(status: &str) -> Self {
        match status {
            "None" => Self::None,
            "Track" => Self::Track,
            "Playlist" => Self::Playlist,
            _ => Self::Unsupported,
        }
    }
}

impl From<LoopStatus> for &'static str {
    fn from(status: LoopStatus) -> Self {
        match status {
            LoopStatus::None => "None",
            LoopStatus::Track => "Track",
            LoopStatus::Playlist => "Playlist",
            LoopStatus::Unsupported => "None",
        }
    }
}

/// Capability flags reported by a player across both of its interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    /// Whether the player application can be quit
    pub can_quit: bool,

    /// Whether the player window can be raised
    pub can_raise: bool,

    /// Can skip to the next track
    pub can_go_next: bool,

    /// Can go to the previous track
    pub can_go_previous: bool,

    /// Can start playback
    pub can_play: bool,

    /// Can pause playback
    pub can_pause: bool,

    /// Can seek within the current track
    pub can_seek: bool,

    /// Whether the player accepts control commands at all
    pub can_control: bool,
}

/// Mirrored properties a consumer can subscribe to on a player handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerProperty {
    /// Playback status (Playing, Paused, Stopped)
    PlaybackStatus,
    /// Loop status
    LoopStatus,
    /// Playback rate
    Rate,
    /// Shuffle flag
    Shuffle,
    /// Track metadata record
    Metadata,
    /// Volume level
    Volume,
    /// Playback position (cache updates only; live reads bypass the cache)
    Position,
    /// Can skip forward
    CanGoNext,
    /// Can skip backward
    CanGoPrevious,
    /// Can start playback
    CanPlay,
    /// Can pause playback
    CanPause,
    /// Can seek
    CanSeek,
    /// Accepts control commands
    CanControl,
    /// Application can be quit
    CanQuit,
    /// Window can be raised
    CanRaise,
    /// Human-readable application name
    Identity,
    /// Desktop entry name
    DesktopEntry,
    /// Derived not-presentable flag; edge-triggered
    Invalid,
}

impl PlayerProperty {
    /// Map a wire property name from the player interface to its key
    pub(crate) fn from_player_wire(name: &str) -> Option<Self> {
        match name {
            "PlaybackStatus" => Some(Self::PlaybackStatus),
            "LoopStatus" => Some(Self::LoopStatus),
            "Rate" => Some(Self::Rate),
            "Shuffle" => Some(Self::Shuffle),
            "Metadata" => Some(Self::Metadata),
            "Volume" => Some(Self::Volume),
            "Position" => Some(Self::Position),
            "CanGoNext" => Some(Self::CanGoNext),
            "CanGoPrevious" => Some(Self::CanGoPrevious),
            "CanPlay" => Some(Self::CanPlay),
            "CanPause" => Some(Self::CanPause),
            "CanSeek" => Some(Self::CanSeek),
            "CanControl" => Some(Self::CanControl),
            _ => None,
        }
    }

    /// Map a wire property name from the root interface to its key
    pub(crate) fn from_root_wire(name: &str) -> Option<Self> {
        match name {
            "Identity" => Some(Self::Identity),
            "DesktopEntry" => Some(Self::DesktopEntry),
            "CanQuit" => Some(Self::CanQuit),
            "CanRaise" => Some(Self::CanRaise),
            _ => None,
        }
    }
}

/// Typed value delivered to a property listener
#[derive(Debug, Clone)]
pub enum PropertyValue {
    /// New playback status
    PlaybackStatus(PlaybackStatus),
    /// New loop status
    LoopStatus(LoopStatus),
    /// New playback rate
    Rate(f64),
    /// New shuffle flag
    Shuffle(bool),
    /// New metadata record
    Metadata(TrackMetadata),
    /// New volume level
    Volume(f64),
    /// New cached position
    Position(Duration),
    /// New value of a capability flag
    Flag(bool),
    /// New identity string (None when the player reports none)
    Identity(Option<String>),
    /// New desktop entry (None when the player reports none)
    DesktopEntry(Option<String>),
    /// New derived validity flag
    Invalid(bool),
}

bitflags! {
    /// What changed, carried alongside registry and selection notifications
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Dirty: u8 {
        /// A player appeared or disappeared
        const MEMBERSHIP = 1 << 0;
        /// A playback status changed
        const PLAYBACK = 1 << 1;
        /// A handle's validity flipped
        const VALIDITY = 1 << 2;
        /// A pin was set or cleared
        const PIN = 1 << 3;
        /// The active-player outcome changed
        const SELECTION = 1 << 4;
    }
}

/// Events broadcast by the service to its consumers
#[derive(Debug, Clone)]
pub enum MuxEvent {
    /// The set of presentable players (or their election inputs) changed
    PlayersChanged {
        /// Which aspects changed since the last notification
        dirty: Dirty,
    },

    /// A different player (or none) now drives the display
    SelectionChanged {
        /// The newly elected player, if any
        player: Option<PlayerId>,
    },
}

/// Reasons the election must be re-run
#[derive(Debug, Clone, Copy)]
pub(crate) enum SelectTrigger {
    /// Registry membership changed
    Membership,
    /// A playback status changed
    Playback,
    /// A validity flag flipped
    Validity,
    /// A pin was set or cleared
    Pin,
}

impl SelectTrigger {
    pub(crate) fn dirty(self) -> Dirty {
        match self {
            Self::Membership => Dirty::MEMBERSHIP,
            Self::Playback => Dirty::PLAYBACK,
            Self::Validity => Dirty::VALIDITY,
            Self::Pin => Dirty::PIN,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn playback_status_from_wire_string() {
        assert_eq!(PlaybackStatus::from("Playing"), PlaybackStatus::Playing);
        assert_eq!(PlaybackStatus::from("Paused"), PlaybackStatus::Paused);
        assert_eq!(PlaybackStatus::from("Stopped"), PlaybackStatus::Stopped);
        assert_eq!(PlaybackStatus::from("garbage"), PlaybackStatus::Stopped);
    }

    #[test]
    fn loop_status_round_trip() {
        for status in [LoopStatus::None, LoopStatus::Track, LoopStatus::Playlist] {
            let wire: &str = status.into();
            assert_eq!(LoopStatus::from(wire), status);
        }
        assert_eq!(LoopStatus::from("Bogus"), LoopStatus::Unsupported);
    }

    #[test]
    fn wire_names_map_to_their_interface() {
        assert_eq!(
            PlayerProperty::from_player_wire("PlaybackStatus"),
            Some(PlayerProperty::PlaybackStatus)
        );
        assert_eq!(PlayerProperty::from_player_wire("Identity"), None);
        assert_eq!(
            PlayerProperty::from_root_wire("Identity"),
            Some(PlayerProperty::Identity)
        );
        assert_eq!(PlayerProperty::from_root_wire("Metadata"), None);
    }
}
