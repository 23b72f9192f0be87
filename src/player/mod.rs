mod mirror;
pub(crate) mod monitoring;
pub(crate) mod poller;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use zbus::{
    Connection,
    fdo::PropertiesProxy,
    names::{InterfaceName, OwnedBusName},
    zvariant::{ObjectPath, OwnedValue},
};

use crate::{
    dispatch::ListenerId,
    error::MuxError,
    metadata::TrackMetadata,
    proxy::{
        MediaPlayer2PlayerProxy, MediaPlayer2Proxy, OBJECT_PATH, PLAYER_INTERFACE, ROOT_INTERFACE,
    },
    types::{Capabilities, LoopStatus, PlaybackStatus, PlayerId, PlayerProperty, PropertyValue},
    utils::from_mpris_micros,
};

use mirror::StateMirror;

/// In-process mirror of one media player on the bus.
///
/// Wraps the player's three interfaces behind cached property getters,
/// typed fire-and-forget actions, and per-property change subscriptions.
/// Created and destroyed by the registry as the peer's bus name comes and
/// goes; consumers only ever hold it through an `Arc`.
pub struct PlayerHandle {
    id: PlayerId,
    root: MediaPlayer2Proxy<'static>,
    player: MediaPlayer2PlayerProxy<'static>,
    props: PropertiesProxy<'static>,
    mirror: Arc<StateMirror>,
    pinned: AtomicBool,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl PartialEq for PlayerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl fmt::Debug for PlayerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerHandle")
            .field("id", &self.id)
            .field("invalid", &self.is_invalid())
            .field("pinned", &self.is_pinned())
            .finish_non_exhaustive()
    }
}

impl PlayerHandle {
    /// Open proxies for all three player interfaces and prime the mirror.
    ///
    /// The three proxies are built concurrently; if any of them cannot be
    /// constructed the handle is unusable and the caller discards it.
    /// Initial property reads after that point are best-effort: a player
    /// that answers `GetAll` with garbage is still tracked, just empty.
    pub(crate) async fn connect(
        connection: &Connection,
        id: PlayerId,
    ) -> Result<Arc<Self>, MuxError> {
        let bus_name = OwnedBusName::try_from(id.bus_name())
            .map_err(|e| MuxError::InitializationFailed(format!("Invalid bus name: {e}")))?;

        let root_builder = MediaPlayer2Proxy::builder(connection)
            .destination(bus_name.clone())
            .map_err(MuxError::DbusError)?;
        // Position is deliberately uncached: players do not reliably emit
        // PropertiesChanged for it, so every read must hit the wire.
        let player_builder = MediaPlayer2PlayerProxy::builder(connection)
            .destination(bus_name.clone())
            .map_err(MuxError::DbusError)?
            .uncached_properties(&["Position"]);
        let props_builder = PropertiesProxy::builder(connection)
            .destination(bus_name)
            .map_err(MuxError::DbusError)?
            .path(OBJECT_PATH)
            .map_err(MuxError::DbusError)?;

        let (root, player, props) = futures::try_join!(
            root_builder.build(),
            player_builder.build(),
            props_builder.build(),
        )
        .map_err(MuxError::DbusError)?;

        let mirror = Arc::new(StateMirror::new());
        mirror.register_derived_listeners();

        prime_mirror(&mirror, &props).await;
        mirror.recompute_validity();

        let handle = Arc::new(Self {
            id,
            root,
            player,
            props,
            mirror,
            pinned: AtomicBool::new(false),
            poll_task: Mutex::new(None),
            monitor_task: Mutex::new(None),
        });

        let monitor = monitoring::spawn_monitor(&handle);
        *handle
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(monitor);

        Ok(handle)
    }

    /// Stable key: the player's bus name
    pub fn id(&self) -> &PlayerId {
        &self.id
    }

    /// Route one PropertiesChanged batch to the mirror.
    pub(crate) fn apply_properties_changed(
        &self,
        interface: &str,
        changed: &HashMap<String, OwnedValue>,
    ) {
        match interface {
            PLAYER_INTERFACE => self.mirror.apply_player_properties(changed),
            ROOT_INTERFACE => self.mirror.apply_root_properties(changed),
            _ => {}
        }
    }

    // Cached reads. These never touch the bus.

    /// Last known playback status
    pub fn playback_status(&self) -> PlaybackStatus {
        self.mirror.playback_status()
    }

    /// Last known loop status
    pub fn loop_status(&self) -> LoopStatus {
        self.mirror.loop_status()
    }

    /// Last known playback rate
    pub fn rate(&self) -> f64 {
        self.mirror.rate()
    }

    /// Last known shuffle flag
    pub fn shuffle(&self) -> bool {
        self.mirror.shuffle()
    }

    /// Last known volume level
    pub fn volume(&self) -> f64 {
        self.mirror.volume()
    }

    /// Last known metadata record
    pub fn metadata(&self) -> TrackMetadata {
        self.mirror.metadata()
    }

    /// Last known capability flags
    pub fn capabilities(&self) -> Capabilities {
        self.mirror.capabilities()
    }

    /// Human-readable application name, if the player reports one
    pub fn identity(&self) -> Option<String> {
        self.mirror.identity()
    }

    /// Desktop entry name, if the player reports one
    pub fn desktop_entry(&self) -> Option<String> {
        self.mirror.desktop_entry()
    }

    /// Last position observed via Seeked, the poller, or a live read
    pub fn last_position(&self) -> Duration {
        self.mirror.last_position()
    }

    /// Snapshot revision counter; bumps on every cached field write
    pub fn revision(&self) -> u64 {
        self.mirror.revision()
    }

    /// Whether this player is currently not presentable: it has neither an
    /// identity nor a desktop entry, or no track title. Invalid players
    /// stay tracked (so they come back by themselves) but are skipped by
    /// the election.
    pub fn is_invalid(&self) -> bool {
        self.mirror.is_invalid()
    }

    /// Whether the user pinned this player
    pub fn is_pinned(&self) -> bool {
        self.pinned.load(Ordering::SeqCst)
    }

    /// Pin or unpin this player. Only ever called on behalf of the user,
    /// never from bus state.
    pub fn set_pinned(&self, pinned: bool) {
        self.pinned.store(pinned, Ordering::SeqCst);
    }

    /// Current playback position, read live.
    ///
    /// This is the one property that is fetched from the wire on every
    /// read; players do not reliably announce position changes.
    ///
    /// # Errors
    /// Returns `MuxError::DbusError` if the read fails
    pub async fn position(&self) -> Result<Duration, MuxError> {
        let micros = self.player.position().await.map_err(MuxError::DbusError)?;
        Ok(from_mpris_micros(micros))
    }

    // Transport actions. All of these are best-effort remote commands:
    // there is no local state to roll back, so failures are logged and
    // swallowed rather than surfaced to the caller.

    /// Skip to the next track
    pub async fn next(&self) {
        if let Err(e) = self.player.next().await {
            warn!("Next failed for {}: {e}", self.id);
        }
    }

    /// Skip to the previous track
    pub async fn previous(&self) {
        if let Err(e) = self.player.previous().await {
            warn!("Previous failed for {}: {e}", self.id);
        }
    }

    /// Start playback
    pub async fn play(&self) {
        if let Err(e) = self.player.play().await {
            warn!("Play failed for {}: {e}", self.id);
        }
    }

    /// Pause playback
    pub async fn pause(&self) {
        if let Err(e) = self.player.pause().await {
            warn!("Pause failed for {}: {e}", self.id);
        }
    }

    /// Toggle between playing and paused
    pub async fn play_pause(&self) {
        if let Err(e) = self.player.play_pause().await {
            warn!("PlayPause failed for {}: {e}", self.id);
        }
    }

    /// Stop playback
    pub async fn stop(&self) {
        if let Err(e) = self.player.stop().await {
            warn!("Stop failed for {}: {e}", self.id);
        }
    }

    /// Seek by a relative offset in microseconds (negative seeks backwards)
    pub async fn seek(&self, offset_micros: i64) {
        if let Err(e) = self.player.seek(offset_micros).await {
            warn!("Seek failed for {}: {e}", self.id);
        }
    }

    /// Jump to an absolute position within a track
    pub async fn set_position(&self, track_id: &str, position_micros: i64) {
        let Ok(track_path) = ObjectPath::try_from(track_id) else {
            warn!("Invalid track id {track_id:?} for {}", self.id);
            return;
        };

        if let Err(e) = self.player.set_position(&track_path, position_micros).await {
            warn!("SetPosition failed for {}: {e}", self.id);
        }
    }

    /// Ask the player to open and play a URI
    pub async fn open_uri(&self, uri: &str) {
        if let Err(e) = self.player.open_uri(uri).await {
            warn!("OpenUri failed for {}: {e}", self.id);
        }
    }

    /// Raise the player window
    pub async fn raise(&self) {
        if let Err(e) = self.root.raise().await {
            warn!("Raise failed for {}: {e}", self.id);
        }
    }

    /// Quit the player application
    pub async fn quit(&self) {
        if let Err(e) = self.root.quit().await {
            warn!("Quit failed for {}: {e}", self.id);
        }
    }

    /// Set the playback rate
    pub async fn set_rate(&self, rate: f64) {
        if let Err(e) = self.player.set_rate(rate).await {
            warn!("SetRate failed for {}: {e}", self.id);
        }
    }

    /// Set the volume level
    pub async fn set_volume(&self, volume: f64) {
        if let Err(e) = self.player.set_volume(volume).await {
            warn!("SetVolume failed for {}: {e}", self.id);
        }
    }

    /// Enable or disable shuffle
    pub async fn set_shuffle(&self, shuffle: bool) {
        if let Err(e) = self.player.set_shuffle(shuffle).await {
            warn!("SetShuffle failed for {}: {e}", self.id);
        }
    }

    /// Set the loop status
    pub async fn set_loop_status(&self, status: LoopStatus) {
        if matches!(status, LoopStatus::Unsupported) {
            debug!("Not writing Unsupported loop status to {}", self.id);
            return;
        }

        let wire: &str = status.into();
        if let Err(e) = self.player.set_loop_status(wire).await {
            warn!("SetLoopStatus failed for {}: {e}", self.id);
        }
    }

    /// Cycle the loop status: None, then Track, then Playlist, then None
    pub async fn toggle_loop(&self) {
        let next = match self.loop_status() {
            LoopStatus::None => LoopStatus::Track,
            LoopStatus::Track => LoopStatus::Playlist,
            LoopStatus::Playlist => LoopStatus::None,
            LoopStatus::Unsupported => {
                debug!("Loop status unsupported by {}", self.id);
                return;
            }
        };
        self.set_loop_status(next).await;
    }

    /// Flip the shuffle flag
    pub async fn toggle_shuffle(&self) {
        let next = !self.shuffle();
        self.set_shuffle(next).await;
    }

    // Subscriptions.

    /// Register a callback for changes to one mirrored property.
    ///
    /// Returns an id for `remove_listener`; ids are never reused, so
    /// removing a stale id is harmless.
    pub fn on_changed(
        &self,
        property: PlayerProperty,
        callback: impl Fn(&PropertyValue) + Send + Sync + 'static,
    ) -> ListenerId {
        self.mirror.dispatcher().on_changed(property, callback)
    }

    /// Remove a property listener registered with [`Self::on_changed`]
    pub fn remove_listener(&self, property: PlayerProperty, id: ListenerId) {
        self.mirror.dispatcher().remove_listener(property, id);
    }

    /// Register a callback for the player's Seeked signal.
    ///
    /// Returns a closure that unsubscribes the callback.
    pub fn on_seeked(
        &self,
        callback: impl Fn(Duration) + Send + Sync + 'static,
    ) -> Box<dyn FnOnce() + Send> {
        let id = self.mirror.dispatcher().on_seeked(callback);
        let mirror = Arc::clone(&self.mirror);
        Box::new(move || mirror.dispatcher().remove_seek_listener(id))
    }

    /// Start (or restart) the bootstrap poller.
    ///
    /// Starting cancels any poll task already running for this handle.
    pub(crate) fn start_bootstrap_poll(&self) {
        let source = poller::ProxyBootstrapSource::new(self.player.clone(), self.props.clone());
        let task = tokio::spawn(poller::run_bootstrap_poll(Arc::clone(&self.mirror), source));

        let mut slot = self
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    /// Tear the handle down: cancel the poll and monitor tasks and drop
    /// every listener. Idempotent, and synchronous so the registry can
    /// guarantee nothing fires after removal.
    pub fn on_destroy(&self) {
        // Mark first: a tick already scheduled on the loop will see the
        // flag before it can write or notify.
        self.mirror.destroy();

        if let Some(task) = self
            .poll_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        if let Some(task) = self
            .monitor_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

/// Fill the mirror from one GetAll round-trip per interface.
async fn prime_mirror(mirror: &Arc<StateMirror>, props: &PropertiesProxy<'static>) {
    match InterfaceName::try_from(PLAYER_INTERFACE) {
        Ok(interface) => match props.get_all(interface).await {
            Ok(initial) => mirror.apply_player_properties(&initial),
            Err(e) => debug!("GetAll on player interface failed: {e}"),
        },
        Err(e) => debug!("Invalid interface name: {e}"),
    }

    match InterfaceName::try_from(ROOT_INTERFACE) {
        Ok(interface) => match props.get_all(interface).await {
            Ok(initial) => mirror.apply_root_properties(&initial),
            Err(e) => debug!("GetAll on root interface failed: {e}"),
        },
        Err(e) => debug!("Invalid interface name: {e}"),
    }
}
