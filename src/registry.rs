use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::{StreamExt, future::join_all};
use tokio::{
    sync::{RwLock, mpsc},
    task::JoinHandle,
};
use tracing::{debug, info, instrument, warn};
use zbus::{Connection, fdo};

use crate::{
    error::MuxError,
    player::PlayerHandle,
    proxy::is_player_bus_name,
    types::{PlayerId, PlayerProperty, SelectTrigger},
};

/// Shared map of tracked players, keyed by bus name.
pub(crate) type PlayerMap = Arc<RwLock<HashMap<PlayerId, Arc<PlayerHandle>>>>;

/// What a NameOwnerChanged signal means for a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PresenceChange {
    /// The name just gained an owner: the peer appeared
    Acquired,
    /// The name lost its owner: the peer vanished
    Lost,
}

/// Classify a NameOwnerChanged signal.
///
/// An empty (or absent) old owner means the name just appeared; an empty
/// new owner means it vanished. Owner-to-owner transfers and no-op signals
/// are ignored.
pub(crate) fn classify_owner_change(
    old_owner: Option<&str>,
    new_owner: Option<&str>,
) -> Option<PresenceChange> {
    let old_owner = old_owner.filter(|owner| !owner.is_empty());
    let new_owner = new_owner.filter(|owner| !owner.is_empty());

    match (old_owner, new_owner) {
        (None, Some(_)) => Some(PresenceChange::Acquired),
        (Some(_), None) => Some(PresenceChange::Lost),
        _ => None,
    }
}

/// Whether a player resolves to a blacklisted application.
///
/// The blacklist is keyed on the application identity or desktop entry the
/// player itself reports; bus names are not stable enough to key on.
pub(crate) fn matches_blacklist(
    blacklist: &HashSet<String>,
    identity: Option<&str>,
    desktop_entry: Option<&str>,
) -> bool {
    identity.is_some_and(|identity| blacklist.contains(identity))
        || desktop_entry.is_some_and(|entry| blacklist.contains(entry))
}

/// Tracks the set of live players: reacts to bus presence events, applies
/// the blacklist at insertion time, and owns handle lifecycle.
pub(crate) struct Registry {
    connection: Connection,
    players: PlayerMap,
    blacklist: Arc<HashSet<String>>,
    select_tx: mpsc::UnboundedSender<SelectTrigger>,
}

impl Registry {
    pub(crate) fn new(
        connection: Connection,
        players: PlayerMap,
        blacklist: Vec<String>,
        select_tx: mpsc::UnboundedSender<SelectTrigger>,
    ) -> Self {
        Self {
            connection,
            players,
            blacklist: Arc::new(blacklist.into_iter().collect()),
            select_tx,
        }
    }

    /// Subscribe to NameOwnerChanged and react to player names coming and
    /// going. Returns the watcher task for the service to own.
    ///
    /// # Errors
    /// Returns error if the D-Bus proxy or signal subscription fails
    #[instrument(skip(self))]
    pub(crate) async fn start_watching(&self) -> Result<JoinHandle<()>, MuxError> {
        let dbus_proxy = fdo::DBusProxy::new(&self.connection)
            .await
            .map_err(|e| MuxError::InitializationFailed(format!("DBus proxy failed: {e}")))?;

        let mut name_owner_changed = dbus_proxy.receive_name_owner_changed().await.map_err(|e| {
            MuxError::InitializationFailed(format!("Signal subscription failed: {e}"))
        })?;

        let registry = self.clone();
        let task = tokio::spawn(async move {
            while let Some(signal) = name_owner_changed.next().await {
                let Ok(args) = signal.args() else {
                    continue;
                };

                if !is_player_bus_name(args.name()) {
                    continue;
                }

                let player_id = PlayerId::from_bus_name(args.name());
                let change =
                    classify_owner_change(args.old_owner().as_deref(), args.new_owner().as_deref());

                match change {
                    Some(PresenceChange::Acquired) => registry.handle_acquired(player_id).await,
                    Some(PresenceChange::Lost) => registry.handle_lost(player_id).await,
                    None => {}
                }
            }

            debug!("NameOwnerChanged stream ended");
        });

        info!("Player presence watching started");
        Ok(task)
    }

    /// Enumerate names already on the bus and track every player found,
    /// in parallel. Completes once all of them are connected or skipped.
    ///
    /// # Errors
    /// Returns error if the D-Bus proxy or ListNames call fails
    #[instrument(skip(self))]
    pub(crate) async fn discover_existing(&self) -> Result<(), MuxError> {
        let dbus_proxy = fdo::DBusProxy::new(&self.connection)
            .await
            .map_err(|e| MuxError::InitializationFailed(format!("DBus proxy failed: {e}")))?;

        let names = dbus_proxy
            .list_names()
            .await
            .map_err(|e| MuxError::DbusError(e.into()))?;

        let additions = names
            .iter()
            .filter(|name| is_player_bus_name(name))
            .map(|name| self.handle_acquired(PlayerId::from_bus_name(name)));

        join_all(additions).await;

        info!("Finished initial player discovery");
        Ok(())
    }

    /// Track a newly appeared player name.
    ///
    /// Idempotent: a name already tracked is ignored. A connect failure
    /// skips this one player and nothing else. A blacklisted player is
    /// destroyed before it is ever inserted.
    #[instrument(skip(self), fields(bus_name = %player_id.bus_name()))]
    pub(crate) async fn handle_acquired(&self, player_id: PlayerId) {
        {
            let players = self.players.read().await;
            if players.contains_key(&player_id) {
                return;
            }
        }

        let handle = match PlayerHandle::connect(&self.connection, player_id.clone()).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Skipping player: {e}");
                return;
            }
        };

        if self.is_blacklisted(&handle) {
            info!("Ignoring blacklisted player");
            handle.on_destroy();
            return;
        }

        {
            let mut players = self.players.write().await;
            if players.contains_key(&player_id) {
                // A duplicate acquire raced our connect; keep the first.
                handle.on_destroy();
                return;
            }
            players.insert(player_id.clone(), Arc::clone(&handle));
        }

        self.register_selection_listeners(&handle);
        handle.start_bootstrap_poll();
        let _ = self.select_tx.send(SelectTrigger::Membership);
        info!("Player added");
    }

    /// Drop a vanished player.
    ///
    /// The handle is destroyed synchronously with its removal, so no poll
    /// tick or listener can fire for it once the removal is observable.
    #[instrument(skip(self), fields(bus_name = %player_id.bus_name()))]
    pub(crate) async fn handle_lost(&self, player_id: PlayerId) {
        {
            let mut players = self.players.write().await;
            match players.remove(&player_id) {
                Some(handle) => handle.on_destroy(),
                None => return,
            }
        }

        let _ = self.select_tx.send(SelectTrigger::Membership);
        info!("Player removed");
    }

    /// Consulted exactly once per player, at insertion time.
    fn is_blacklisted(&self, handle: &PlayerHandle) -> bool {
        if self.blacklist.is_empty() {
            return false;
        }

        matches_blacklist(
            &self.blacklist,
            handle.identity().as_deref(),
            handle.desktop_entry().as_deref(),
        )
    }

    /// Wire the election triggers into a freshly inserted handle.
    fn register_selection_listeners(&self, handle: &Arc<PlayerHandle>) {
        let tx = self.select_tx.clone();
        handle.on_changed(PlayerProperty::PlaybackStatus, move |_| {
            let _ = tx.send(SelectTrigger::Playback);
        });

        let tx = self.select_tx.clone();
        handle.on_changed(PlayerProperty::Invalid, move |_| {
            let _ = tx.send(SelectTrigger::Validity);
        });
    }

    /// Destroy and forget every tracked handle.
    pub(crate) async fn destroy_all(&self) {
        let mut players = self.players.write().await;
        for (_, handle) in players.drain() {
            handle.on_destroy();
        }
    }
}

impl Clone for Registry {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            players: Arc::clone(&self.players),
            blacklist: Arc::clone(&self.blacklist),
            select_tx: self.select_tx.clone(),
        }
    }
}
