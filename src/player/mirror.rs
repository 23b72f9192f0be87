use std::{
    collections::HashMap,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tracing::debug;
use zbus::zvariant::OwnedValue;

use crate::{
    dispatch::ChangeDispatcher,
    metadata::TrackMetadata,
    types::{Capabilities, LoopStatus, PlaybackStatus, PlayerProperty, PropertyValue},
    utils::from_mpris_micros,
};

/// Last known state of a player, as reported over the bus.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlayerSnapshot {
    /// Bumped on every field write. The poller and the signal path both
    /// write Position/Metadata without mutual ordering; last write on the
    /// loop wins, and this counter makes that observable.
    pub revision: u64,
    pub playback_status: PlaybackStatus,
    pub loop_status: LoopStatus,
    pub rate: f64,
    pub shuffle: bool,
    pub volume: f64,
    pub position: Duration,
    pub metadata: TrackMetadata,
    pub caps: Capabilities,
    pub identity: Option<String>,
    pub desktop_entry: Option<String>,
}

impl Default for PlayerSnapshot {
    fn default() -> Self {
        Self {
            revision: 0,
            playback_status: PlaybackStatus::Stopped,
            loop_status: LoopStatus::None,
            rate: 1.0,
            shuffle: false,
            volume: 1.0,
            position: Duration::ZERO,
            metadata: TrackMetadata::default(),
            caps: Capabilities::default(),
            identity: None,
            desktop_entry: None,
        }
    }
}

/// The in-process mirror of one player: cached snapshot, listener fan-out,
/// and the derived validity flag.
///
/// Kept separate from the proxies so the whole update path can be driven
/// without a bus.
pub(crate) struct StateMirror {
    snapshot: RwLock<PlayerSnapshot>,
    dispatcher: ChangeDispatcher,
    invalid: AtomicBool,
    destroyed: AtomicBool,
}

impl StateMirror {
    pub(crate) fn new() -> Self {
        Self {
            snapshot: RwLock::new(PlayerSnapshot::default()),
            dispatcher: ChangeDispatcher::new(),
            // An empty snapshot has no identity and no title.
            invalid: AtomicBool::new(true),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Wire up the derived listeners: any change to Metadata, Identity, or
    /// DesktopEntry re-derives the validity flag.
    pub(crate) fn register_derived_listeners(self: &std::sync::Arc<Self>) {
        for property in [
            PlayerProperty::Metadata,
            PlayerProperty::Identity,
            PlayerProperty::DesktopEntry,
        ] {
            let weak = std::sync::Arc::downgrade(self);
            self.dispatcher.on_changed(property, move |_| {
                if let Some(mirror) = weak.upgrade() {
                    mirror.recompute_validity();
                }
            });
        }
    }

    pub(crate) fn dispatcher(&self) -> &ChangeDispatcher {
        &self.dispatcher
    }

    fn read<R>(&self, f: impl FnOnce(&PlayerSnapshot) -> R) -> R {
        let snapshot = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        f(&snapshot)
    }

    pub(crate) fn playback_status(&self) -> PlaybackStatus {
        self.read(|s| s.playback_status)
    }

    pub(crate) fn loop_status(&self) -> LoopStatus {
        self.read(|s| s.loop_status)
    }

    pub(crate) fn rate(&self) -> f64 {
        self.read(|s| s.rate)
    }

    pub(crate) fn shuffle(&self) -> bool {
        self.read(|s| s.shuffle)
    }

    pub(crate) fn volume(&self) -> f64 {
        self.read(|s| s.volume)
    }

    pub(crate) fn last_position(&self) -> Duration {
        self.read(|s| s.position)
    }

    pub(crate) fn metadata(&self) -> TrackMetadata {
        self.read(|s| s.metadata.clone())
    }

    pub(crate) fn capabilities(&self) -> Capabilities {
        self.read(|s| s.caps)
    }

    pub(crate) fn identity(&self) -> Option<String> {
        self.read(|s| s.identity.clone())
    }

    pub(crate) fn desktop_entry(&self) -> Option<String> {
        self.read(|s| s.desktop_entry.clone())
    }

    pub(crate) fn revision(&self) -> u64 {
        self.read(|s| s.revision)
    }

    pub(crate) fn is_invalid(&self) -> bool {
        self.invalid.load(Ordering::SeqCst)
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Apply one PropertiesChanged batch for the player interface:
    /// snapshot first, then one notification per changed property.
    pub(crate) fn apply_player_properties(&self, changed: &HashMap<String, OwnedValue>) {
        if self.is_destroyed() {
            return;
        }

        let mut notifications = Vec::new();
        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            for (name, value) in changed {
                let Some(property) = PlayerProperty::from_player_wire(name) else {
                    continue;
                };
                let Some(notification) = apply_player_value(&mut snapshot, property, value)
                else {
                    debug!("Ignoring unparseable value for {property:?}");
                    continue;
                };
                snapshot.revision += 1;
                notifications.push((property, notification));
            }
        }

        for (property, value) in &notifications {
            self.dispatcher.notify(*property, value);
        }
    }

    /// Apply one PropertiesChanged batch for the root interface.
    pub(crate) fn apply_root_properties(&self, changed: &HashMap<String, OwnedValue>) {
        if self.is_destroyed() {
            return;
        }

        let mut notifications = Vec::new();
        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            for (name, value) in changed {
                let Some(property) = PlayerProperty::from_root_wire(name) else {
                    continue;
                };
                let Some(notification) = apply_root_value(&mut snapshot, property, value) else {
                    debug!("Ignoring unparseable value for {property:?}");
                    continue;
                };
                snapshot.revision += 1;
                notifications.push((property, notification));
            }
        }

        for (property, value) in &notifications {
            self.dispatcher.notify(*property, value);
        }
    }

    /// Overwrite Position and Metadata with data the bootstrap poller read,
    /// then fire a synthetic Metadata notification.
    pub(crate) fn apply_bootstrap(&self, position: Duration, metadata: TrackMetadata) {
        if self.is_destroyed() {
            return;
        }

        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            snapshot.position = position;
            snapshot.metadata = metadata.clone();
            snapshot.revision += 2;
        }

        self.dispatcher
            .notify(PlayerProperty::Metadata, &PropertyValue::Metadata(metadata));
    }

    /// Record a Seeked signal: cache the new position, tell seek listeners.
    pub(crate) fn apply_seeked(&self, position: Duration) {
        if self.is_destroyed() {
            return;
        }

        {
            let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            snapshot.position = position;
            snapshot.revision += 1;
        }

        self.dispatcher.notify_seeked(position);
    }

    /// Re-derive the validity flag; notifies Invalid listeners only when
    /// the value actually flips.
    pub(crate) fn recompute_validity(&self) {
        if self.is_destroyed() {
            return;
        }

        let invalid = self.read(|s| {
            (s.identity.is_none() && s.desktop_entry.is_none()) || s.metadata.title.is_none()
        });

        let previous = self.invalid.swap(invalid, Ordering::SeqCst);
        if previous != invalid {
            self.dispatcher
                .notify(PlayerProperty::Invalid, &PropertyValue::Invalid(invalid));
        }
    }

    /// Mark destroyed and drop every listener. Idempotent; once set, no
    /// apply or notify path does anything.
    pub(crate) fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.dispatcher.clear();
    }
}

fn apply_player_value(
    snapshot: &mut PlayerSnapshot,
    property: PlayerProperty,
    value: &OwnedValue,
) -> Option<PropertyValue> {
    match property {
        PlayerProperty::PlaybackStatus => {
            let raw = String::try_from(value.clone()).ok()?;
            let status = PlaybackStatus::from(raw.as_str());
            snapshot.playback_status = status;
            Some(PropertyValue::PlaybackStatus(status))
        }
        PlayerProperty::LoopStatus => {
            let raw = String::try_from(value.clone()).ok()?;
            let status = LoopStatus::from(raw.as_str());
            snapshot.loop_status = status;
            Some(PropertyValue::LoopStatus(status))
        }
        PlayerProperty::Rate => {
            let rate = f64::try_from(value.clone()).ok()?;
            snapshot.rate = rate;
            Some(PropertyValue::Rate(rate))
        }
        PlayerProperty::Shuffle => {
            let shuffle = bool::try_from(value.clone()).ok()?;
            snapshot.shuffle = shuffle;
            Some(PropertyValue::Shuffle(shuffle))
        }
        PlayerProperty::Volume => {
            let volume = f64::try_from(value.clone()).ok()?;
            snapshot.volume = volume;
            Some(PropertyValue::Volume(volume))
        }
        PlayerProperty::Position => {
            let micros = i64::try_from(value.clone()).ok()?;
            let position = from_mpris_micros(micros);
            snapshot.position = position;
            Some(PropertyValue::Position(position))
        }
        PlayerProperty::Metadata => {
            let metadata = TrackMetadata::from_value(value)?;
            snapshot.metadata = metadata.clone();
            Some(PropertyValue::Metadata(metadata))
        }
        PlayerProperty::CanGoNext => {
            let flag = bool::try_from(value.clone()).ok()?;
            snapshot.caps.can_go_next = flag;
            Some(PropertyValue::Flag(flag))
        }
        PlayerProperty::CanGoPrevious => {
            let flag = bool::try_from(value.clone()).ok()?;
            snapshot.caps.can_go_previous = flag;
            Some(PropertyValue::Flag(flag))
        }
        PlayerProperty::CanPlay => {
            let flag = bool::try_from(value.clone()).ok()?;
            snapshot.caps.can_play = flag;
            Some(PropertyValue::Flag(flag))
        }
        PlayerProperty::CanPause => {
            let flag = bool::try_from(value.clone()).ok()?;
            snapshot.caps.can_pause = flag;
            Some(PropertyValue::Flag(flag))
        }
        PlayerProperty::CanSeek => {
            let flag = bool::try_from(value.clone()).ok()?;
            snapshot.caps.can_seek = flag;
            Some(PropertyValue::Flag(flag))
        }
        PlayerProperty::CanControl => {
            let flag = bool::try_from(value.clone()).ok()?;
            snapshot.caps.can_control = flag;
            Some(PropertyValue::Flag(flag))
        }
        _ => None,
    }
}

fn apply_root_value(
    snapshot: &mut PlayerSnapshot,
    property: PlayerProperty,
    value: &OwnedValue,
) -> Option<PropertyValue> {
    match property {
        PlayerProperty::Identity => {
            let identity = String::try_from(value.clone())
                .ok()
                .filter(|s| !s.is_empty());
            snapshot.identity = identity.clone();
            Some(PropertyValue::Identity(identity))
        }
        PlayerProperty::DesktopEntry => {
            let entry = String::try_from(value.clone())
                .ok()
                .filter(|s| !s.is_empty());
            snapshot.desktop_entry = entry.clone();
            Some(PropertyValue::DesktopEntry(entry))
        }
        PlayerProperty::CanQuit => {
            let flag = bool::try_from(value.clone()).ok()?;
            snapshot.caps.can_quit = flag;
            Some(PropertyValue::Flag(flag))
        }
        PlayerProperty::CanRaise => {
            let flag = bool::try_from(value.clone()).ok()?;
            snapshot.caps.can_raise = flag;
            Some(PropertyValue::Flag(flag))
        }
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use zbus::zvariant::Value;

    use super::*;

    fn owned(value: Value<'_>) -> OwnedValue {
        value.try_to_owned().unwrap()
    }

    fn metadata_with_title(title: &str) -> HashMap<String, OwnedValue> {
        let mut dict: HashMap<&str, Value<'_>> = HashMap::new();
        dict.insert("xesam:title", Value::from(title));
        dict.insert("mpris:length", Value::from(180_000_000u64));

        let mut changed = HashMap::new();
        changed.insert("Metadata".to_string(), owned(Value::from(dict)));
        changed
    }

    fn identity_change(name: &str) -> HashMap<String, OwnedValue> {
        let mut changed = HashMap::new();
        changed.insert("Identity".to_string(), owned(Value::from(name)));
        changed
    }

    fn counting_listener(mirror: &StateMirror, property: PlayerProperty) -> Arc<AtomicU32> {
        let hits = Arc::new(AtomicU32::new(0));
        let count = Arc::clone(&hits);
        mirror.dispatcher().on_changed(property, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    #[test]
    fn starts_invalid() {
        let mirror = StateMirror::new();
        assert!(mirror.is_invalid());
    }

    #[test]
    fn validity_notifications_are_edge_triggered() {
        let mirror = Arc::new(StateMirror::new());
        mirror.register_derived_listeners();
        let invalid_hits = counting_listener(&mirror, PlayerProperty::Invalid);
        let metadata_hits = counting_listener(&mirror, PlayerProperty::Metadata);

        mirror.apply_root_properties(&identity_change("Some Player"));
        assert!(mirror.is_invalid(), "identity alone is not presentable");

        mirror.apply_player_properties(&metadata_with_title("Track One"));
        assert!(!mirror.is_invalid());
        assert_eq!(invalid_hits.load(Ordering::SeqCst), 1);

        // Same metadata again: the Metadata listener fires, the derived
        // Invalid listener must not.
        mirror.apply_player_properties(&metadata_with_title("Track One"));
        assert!(!mirror.is_invalid());
        assert_eq!(invalid_hits.load(Ordering::SeqCst), 1);
        assert_eq!(metadata_hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn losing_the_title_flips_back_exactly_once() {
        let mirror = Arc::new(StateMirror::new());
        mirror.register_derived_listeners();
        mirror.apply_root_properties(&identity_change("Some Player"));
        mirror.apply_player_properties(&metadata_with_title("Track One"));
        let invalid_hits = counting_listener(&mirror, PlayerProperty::Invalid);

        let mut empty = HashMap::new();
        empty.insert(
            "Metadata".to_string(),
            owned(Value::from(HashMap::<&str, Value<'_>>::new())),
        );
        mirror.apply_player_properties(&empty);
        mirror.apply_player_properties(&empty);

        assert!(mirror.is_invalid());
        assert_eq!(invalid_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_updates_before_notification() {
        let mirror = Arc::new(StateMirror::new());
        let mut changed = HashMap::new();
        changed.insert("PlaybackStatus".to_string(), owned(Value::from("Playing")));

        let observed = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&observed);
        let inner = Arc::clone(&mirror);
        mirror
            .dispatcher()
            .on_changed(PlayerProperty::PlaybackStatus, move |_| {
                if inner.playback_status() == PlaybackStatus::Playing {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
            });

        mirror.apply_player_properties(&changed);
        assert_eq!(observed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn revision_counts_every_field_write() {
        let mirror = StateMirror::new();
        let base = mirror.revision();

        let mut changed = HashMap::new();
        changed.insert("Volume".to_string(), owned(Value::from(0.8f64)));
        changed.insert("Shuffle".to_string(), owned(Value::from(true)));
        mirror.apply_player_properties(&changed);

        assert_eq!(mirror.revision(), base + 2);
        assert_eq!(mirror.volume(), 0.8);
        assert!(mirror.shuffle());
    }

    #[test]
    fn bootstrap_apply_fires_one_synthetic_metadata_change() {
        let mirror = Arc::new(StateMirror::new());
        let metadata_hits = counting_listener(&mirror, PlayerProperty::Metadata);

        let metadata = TrackMetadata {
            title: Some("Track One".to_string()),
            length: Some(Duration::from_secs(180)),
            ..TrackMetadata::default()
        };
        mirror.apply_bootstrap(Duration::from_micros(1_500_000), metadata);

        assert_eq!(metadata_hits.load(Ordering::SeqCst), 1);
        assert_eq!(mirror.last_position(), Duration::from_micros(1_500_000));
        assert_eq!(mirror.metadata().title.as_deref(), Some("Track One"));
    }

    #[test]
    fn destroyed_mirror_neither_applies_nor_notifies() {
        let mirror = Arc::new(StateMirror::new());
        mirror.register_derived_listeners();
        let metadata_hits = counting_listener(&mirror, PlayerProperty::Metadata);

        mirror.destroy();
        mirror.destroy();

        mirror.apply_player_properties(&metadata_with_title("Track One"));
        mirror.apply_bootstrap(Duration::from_secs(1), TrackMetadata::default());
        mirror.apply_seeked(Duration::from_secs(2));

        assert_eq!(metadata_hits.load(Ordering::SeqCst), 0);
        assert_eq!(mirror.last_position(), Duration::ZERO);
        assert!(mirror.metadata().is_empty());
    }

    #[test]
    fn seeked_updates_the_cached_position() {
        let mirror = StateMirror::new();
        let positions = Arc::new(std::sync::Mutex::new(Vec::new()));

        let seen = Arc::clone(&positions);
        mirror.dispatcher().on_seeked(move |position| {
            seen.lock().unwrap().push(position);
        });

        mirror.apply_seeked(Duration::from_secs(42));

        assert_eq!(mirror.last_position(), Duration::from_secs(42));
        assert_eq!(*positions.lock().unwrap(), vec![Duration::from_secs(42)]);
    }
}
