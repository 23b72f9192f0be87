use std::{collections::HashMap, time::Duration};

use zbus::zvariant::{OwnedObjectPath, OwnedValue};

/// Metadata record for the current track.
///
/// Every field is optional: players routinely omit keys, and an absent
/// field is legal state, not an error. Display defaults are the
/// consumer's responsibility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
    /// MPRIS track identifier (an object path on the wire)
    pub track_id: Option<String>,

    /// Track duration
    pub length: Option<Duration>,

    /// URL to album artwork
    pub art_url: Option<String>,

    /// Track title
    pub title: Option<String>,

    /// Track artists
    pub artists: Option<Vec<String>>,

    /// Album name
    pub album: Option<String>,

    /// Disc number within the album
    pub disc_number: Option<i32>,

    /// Track number within the disc
    pub track_number: Option<i32>,

    /// Location of the media itself
    pub url: Option<String>,
}

impl TrackMetadata {
    /// Whether the record carries any keys at all
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether the player reported a positive track length
    pub fn has_length(&self) -> bool {
        self.length.is_some()
    }

    /// Parse a metadata record out of a raw property value, if it is
    /// the expected dict of string keys
    pub(crate) fn from_value(value: &OwnedValue) -> Option<Self> {
        HashMap::<String, OwnedValue>::try_from(value.clone())
            .ok()
            .map(Self::from)
    }
}

fn string_entry(map: &HashMap<String, OwnedValue>, key: &str) -> Option<String> {
    let value = map.get(key)?;
    String::try_from(value.clone()).ok().filter(|s| !s.is_empty())
}

fn string_list_entry(map: &HashMap<String, OwnedValue>, key: &str) -> Option<Vec<String>> {
    let value = map.get(key)?;

    if let Ok(array) = <&zbus::zvariant::Array>::try_from(value) {
        let items: Vec<String> = array
            .iter()
            .filter_map(|item| {
                if let Ok(s) = item.downcast_ref::<String>() {
                    Some(s.clone())
                } else if let Ok(s) = item.downcast_ref::<&str>() {
                    Some(s.to_string())
                } else {
                    None
                }
            })
            .filter(|s| !s.is_empty())
            .collect();
        if items.is_empty() { None } else { Some(items) }
    } else {
        // Some players send a single string where MPRIS wants a list.
        String::try_from(value.clone())
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| vec![s])
    }
}

impl From<HashMap<String, OwnedValue>> for TrackMetadata {
    fn from(metadata: HashMap<String, OwnedValue>) -> Self {
        let mut track = Self::default();

        if let Some(track_id) = metadata.get("mpris:trackid") {
            if let Ok(id_str) = String::try_from(track_id.clone()) {
                track.track_id = Some(id_str);
            } else if let Ok(path) = OwnedObjectPath::try_from(track_id.clone()) {
                track.track_id = Some(path.to_string());
            }
        }

        if let Some(length) = metadata.get("mpris:length") {
            let micros = u64::try_from(length.clone())
                .ok()
                .or_else(|| i64::try_from(length.clone()).ok().map(|v| v.max(0) as u64));
            if let Some(micros) = micros {
                if micros > 0 {
                    track.length = Some(Duration::from_micros(micros));
                }
            }
        }

        track.art_url = string_entry(&metadata, "mpris:artUrl");
        track.title = string_entry(&metadata, "xesam:title");
        track.artists = string_list_entry(&metadata, "xesam:artist");
        track.album = string_entry(&metadata, "xesam:album");
        track.url = string_entry(&metadata, "xesam:url");

        if let Some(disc) = metadata.get("xesam:discNumber") {
            track.disc_number = i32::try_from(disc.clone()).ok();
        }

        if let Some(number) = metadata.get("xesam:trackNumber") {
            track.track_number = i32::try_from(number.clone()).ok();
        }

        track
    }
}
