use std::{
    collections::HashMap,
    sync::{Arc, Mutex as StdMutex, PoisonError},
};

use async_stream::stream;
use futures::Stream;
use tokio::{
    sync::{RwLock, broadcast, mpsc},
    task::JoinHandle,
};
use tracing::{info, instrument, warn};
use zbus::Connection;

use crate::{
    error::MuxError,
    player::PlayerHandle,
    property::Property,
    registry::{PlayerMap, Registry},
    selector::{PlayerChoice, select_active},
    types::{Dirty, MuxEvent, PlaybackStatus, PlayerId, SelectTrigger},
};

/// Configuration for the player mux service
#[derive(Default)]
pub struct Config {
    /// Application identities (or desktop entries) never to track.
    ///
    /// Matched against what the player itself reports, once, when it
    /// appears on the bus.
    pub blacklist: Vec<String>,
}

/// Discovers MPRIS players on the session bus, mirrors their state, and
/// elects a single active player to drive a display.
///
/// Consumers read the tracked players through [`Self::players`], subscribe
/// to change notifications through [`Self::events`] or the watch streams,
/// and observe the election outcome through [`Self::active_player`].
pub struct PlayerMuxService {
    registry: Registry,
    players: PlayerMap,
    player_list: Property<Vec<Arc<PlayerHandle>>>,
    active_player: Property<Option<Arc<PlayerHandle>>>,
    events_tx: broadcast::Sender<MuxEvent>,
    select_tx: mpsc::UnboundedSender<SelectTrigger>,
    watcher_task: StdMutex<Option<JoinHandle<()>>>,
    select_task: StdMutex<Option<JoinHandle<()>>>,
}

impl PlayerMuxService {
    /// Connect to the session bus, discover every player already present,
    /// and start watching for players coming and going.
    ///
    /// Resolves once the initial discovery pass is complete, so
    /// [`Self::players`] reflects the bus as of startup.
    ///
    /// # Errors
    /// Returns `MuxError::InitializationFailed` if the bus connection or
    /// the presence subscription fails
    #[instrument(skip(config))]
    pub async fn start(config: Config) -> Result<Self, MuxError> {
        info!("Starting player mux service");

        let connection = Connection::session().await.map_err(|e| {
            MuxError::InitializationFailed(format!("D-Bus connection failed: {e}"))
        })?;

        let players: PlayerMap = Arc::new(RwLock::new(HashMap::new()));
        let (select_tx, select_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(64);

        let registry = Registry::new(
            connection,
            Arc::clone(&players),
            config.blacklist,
            select_tx.clone(),
        );

        let player_list = Property::new(Vec::new());
        let active_player = Property::new(None);

        let select_task = tokio::spawn(selection_loop(
            Arc::clone(&players),
            player_list.clone(),
            active_player.clone(),
            events_tx.clone(),
            select_rx,
        ));

        let watcher_task = registry.start_watching().await?;
        registry.discover_existing().await?;
        let _ = select_tx.send(SelectTrigger::Membership);

        Ok(Self {
            registry,
            players,
            player_list,
            active_player,
            events_tx,
            select_tx,
            watcher_task: StdMutex::new(Some(watcher_task)),
            select_task: StdMutex::new(Some(select_task)),
        })
    }

    /// The presentable players, ordered by bus name.
    ///
    /// Invalid players are tracked but not listed; they reappear here by
    /// themselves once they become presentable.
    pub fn players(&self) -> Vec<Arc<PlayerHandle>> {
        self.player_list.get()
    }

    /// Every tracked player, presentable or not, ordered by bus name.
    pub async fn all_players(&self) -> Vec<Arc<PlayerHandle>> {
        let mut all: Vec<Arc<PlayerHandle>> =
            self.players.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Look up one tracked player by id.
    pub async fn player(&self, id: &PlayerId) -> Option<Arc<PlayerHandle>> {
        self.players.read().await.get(id).cloned()
    }

    /// Watch the presentable player list: yields the current list
    /// immediately, then again whenever it changes.
    pub fn players_changed(&self) -> impl Stream<Item = Vec<Arc<PlayerHandle>>> + Send {
        self.player_list.watch()
    }

    /// The player currently elected to drive the display, if any.
    pub fn active_player(&self) -> Option<Arc<PlayerHandle>> {
        self.active_player.get()
    }

    /// Watch the election outcome: yields the current choice immediately,
    /// then again whenever a different player (or none) is elected.
    pub fn active_player_changed(&self) -> impl Stream<Item = Option<Arc<PlayerHandle>>> + Send {
        self.active_player.watch()
    }

    /// Change notifications with [`Dirty`] flags describing what moved.
    pub fn events(&self) -> impl Stream<Item = MuxEvent> + Send {
        let mut rx = self.events_tx.subscribe();
        stream! {
            while let Ok(event) = rx.recv().await {
                yield event;
            }
        }
    }

    /// Pin or unpin a player on behalf of the user and re-run the election.
    ///
    /// A pinned valid player always wins the election, playing or not.
    ///
    /// # Errors
    /// Returns `MuxError::PlayerNotFound` if the player is not tracked
    pub async fn set_pinned(&self, id: &PlayerId, pinned: bool) -> Result<(), MuxError> {
        {
            let players = self.players.read().await;
            let handle = players
                .get(id)
                .ok_or_else(|| MuxError::PlayerNotFound(id.clone()))?;
            handle.set_pinned(pinned);
        }

        let _ = self.select_tx.send(SelectTrigger::Pin);
        Ok(())
    }

    /// Stop watching the bus and destroy every tracked handle.
    pub async fn shutdown(&self) {
        self.abort_tasks();
        self.registry.destroy_all().await;
        self.player_list.set(Vec::new());
        self.active_player.set(None);
    }

    fn abort_tasks(&self) {
        if let Some(task) = self
            .watcher_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        if let Some(task) = self
            .select_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

impl Drop for PlayerMuxService {
    fn drop(&mut self) {
        self.abort_tasks();

        let Ok(mut players) = self.players.try_write() else {
            warn!("Could not acquire player map during drop");
            return;
        };

        for (_, handle) in players.drain() {
            handle.on_destroy();
        }
    }
}

/// Re-run the election whenever something that feeds it changes.
///
/// Triggers arriving while one pass runs are coalesced into the next pass,
/// with their dirty flags merged. Each pass rebuilds the presentable list,
/// elects with the current selection as the displayed peer (the sticky
/// tie-break input), and broadcasts what changed.
async fn selection_loop(
    players: PlayerMap,
    player_list: Property<Vec<Arc<PlayerHandle>>>,
    active_player: Property<Option<Arc<PlayerHandle>>>,
    events_tx: broadcast::Sender<MuxEvent>,
    mut select_rx: mpsc::UnboundedReceiver<SelectTrigger>,
) {
    while let Some(trigger) = select_rx.recv().await {
        let mut dirty = trigger.dirty();
        while let Ok(extra) = select_rx.try_recv() {
            dirty |= extra.dirty();
        }

        let mut tracked: Vec<Arc<PlayerHandle>> =
            { players.read().await.values().cloned().collect() };
        tracked.sort_by(|a, b| a.id().cmp(b.id()));

        let valid: Vec<Arc<PlayerHandle>> = tracked
            .iter()
            .filter(|handle| !handle.is_invalid())
            .cloned()
            .collect();

        let displayed = active_player.get().map(|handle| handle.id().clone());
        let choices: Vec<PlayerChoice> = tracked
            .iter()
            .map(|handle| PlayerChoice {
                id: handle.id().clone(),
                invalid: handle.is_invalid(),
                pinned: handle.is_pinned(),
                playing: handle.playback_status() == PlaybackStatus::Playing,
            })
            .collect();

        let chosen_id = select_active(&choices, displayed.as_ref());
        let chosen = chosen_id
            .as_ref()
            .and_then(|id| tracked.iter().find(|handle| handle.id() == id).cloned());

        let selection_changed = displayed != chosen_id;
        if selection_changed {
            dirty |= Dirty::SELECTION;
        }

        player_list.set(valid);
        active_player.set(chosen);

        let _ = events_tx.send(MuxEvent::PlayersChanged { dirty });
        if selection_changed {
            let _ = events_tx.send(MuxEvent::SelectionChanged { player: chosen_id });
        }
    }
}
