#![allow(missing_docs)]

use std::collections::HashMap;
use zbus::{Result, proxy, zvariant::ObjectPath};

/// Prefix shared by every MPRIS player bus name
pub const BUS_NAME_PREFIX: &str = "org.mpris.MediaPlayer2.";

/// Object path at which every MPRIS player exposes its interfaces
pub const OBJECT_PATH: &str = "/org/mpris/MediaPlayer2";

/// Name of the root interface
pub const ROOT_INTERFACE: &str = "org.mpris.MediaPlayer2";

/// Name of the playback-control interface
pub const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

/// MPRIS MediaPlayer2 root interface proxy
///
/// Window control plus the identity and capability properties of the
/// player application itself.
#[proxy(
    interface = "org.mpris.MediaPlayer2",
    default_service = "org.mpris.MediaPlayer2",
    default_path = "/org/mpris/MediaPlayer2"
)]
pub trait MediaPlayer2 {
    /// Quit the media player application
    fn quit(&self) -> Result<()>;

    /// Raise the media player window to the foreground
    fn raise(&self) -> Result<()>;

    /// Whether the player can be quit
    #[zbus(property)]
    fn can_quit(&self) -> Result<bool>;

    /// Whether the player window can be raised
    #[zbus(property)]
    fn can_raise(&self) -> Result<bool>;

    /// Human-readable name of the player
    #[zbus(property)]
    fn identity(&self) -> Result<String>;

    /// Desktop entry name for the player
    #[zbus(property)]
    fn desktop_entry(&self) -> Result<String>;
}

/// MPRIS MediaPlayer2.Player interface proxy
///
/// Transport actions, playback properties, and the Seeked signal.
#[allow(missing_docs)]
#[proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_service = "org.mpris.MediaPlayer2",
    default_path = "/org/mpris/MediaPlayer2"
)]
pub trait MediaPlayer2Player {
    /// Start playback
    fn play(&self) -> Result<()>;

    /// Pause playback
    fn pause(&self) -> Result<()>;

    /// Toggle play/pause state
    fn play_pause(&self) -> Result<()>;

    /// Stop playback
    fn stop(&self) -> Result<()>;

    /// Skip to next track
    fn next(&self) -> Result<()>;

    /// Skip to previous track
    fn previous(&self) -> Result<()>;

    /// Seek by a relative offset in microseconds
    fn seek(&self, offset: i64) -> Result<()>;

    /// Set absolute playback position in microseconds
    fn set_position(&self, track_id: &ObjectPath<'_>, position: i64) -> Result<()>;

    /// Open and play a URI
    fn open_uri(&self, uri: &str) -> Result<()>;

    /// Signal emitted when the playback position jumps
    #[zbus(signal)]
    fn seeked(&self, position: i64) -> Result<()>;

    /// Current playback status (Playing, Paused, Stopped)
    #[zbus(property)]
    fn playback_status(&self) -> Result<String>;

    /// Current loop status (None, Track, Playlist)
    #[zbus(property)]
    fn loop_status(&self) -> Result<String>;

    /// Set the loop status
    #[zbus(property)]
    fn set_loop_status(&self, status: &str) -> Result<()>;

    /// Current playback rate (1.0 is normal speed)
    #[zbus(property)]
    fn rate(&self) -> Result<f64>;

    /// Set the playback rate
    #[zbus(property)]
    fn set_rate(&self, rate: f64) -> Result<()>;

    /// Whether shuffle mode is enabled
    #[zbus(property)]
    fn shuffle(&self) -> Result<bool>;

    /// Set shuffle mode
    #[zbus(property)]
    fn set_shuffle(&self, shuffle: bool) -> Result<()>;

    /// Current track metadata
    #[zbus(property)]
    fn metadata(&self) -> Result<HashMap<String, zbus::zvariant::OwnedValue>>;

    /// Current volume level (0.0 to 1.0)
    #[zbus(property)]
    fn volume(&self) -> Result<f64>;

    /// Set volume level
    #[zbus(property)]
    fn set_volume(&self, volume: f64) -> Result<()>;

    /// Current playback position in microseconds
    #[zbus(property)]
    fn position(&self) -> Result<i64>;

    /// Whether the player can skip to next track
    #[zbus(property)]
    fn can_go_next(&self) -> Result<bool>;

    /// Whether the player can skip to previous track
    #[zbus(property)]
    fn can_go_previous(&self) -> Result<bool>;

    /// Whether the player can start playback
    #[zbus(property)]
    fn can_play(&self) -> Result<bool>;

    /// Whether the player can pause playback
    #[zbus(property)]
    fn can_pause(&self) -> Result<bool>;

    /// Whether the player supports seeking
    #[zbus(property)]
    fn can_seek(&self) -> Result<bool>;

    /// Whether the player can be controlled
    #[zbus(property)]
    fn can_control(&self) -> Result<bool>;
}

/// Check whether a bus name follows the MPRIS player naming convention
pub fn is_player_bus_name(name: &str) -> bool {
    name.starts_with(BUS_NAME_PREFIX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn matches_player_names_only() {
        assert!(is_player_bus_name("org.mpris.MediaPlayer2.spotify"));
        assert!(is_player_bus_name(
            "org.mpris.MediaPlayer2.firefox.instance123"
        ));
        assert!(!is_player_bus_name("org.mpris.MediaPlayer2"));
        assert!(!is_player_bus_name("org.freedesktop.Notifications"));
        assert!(!is_player_bus_name(":1.42"));
    }
}
