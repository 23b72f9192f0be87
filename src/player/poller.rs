use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tracing::debug;
use zbus::names::InterfaceName;

use super::mirror::StateMirror;
use crate::{
    error::MuxError,
    metadata::TrackMetadata,
    proxy::{MediaPlayer2PlayerProxy, PLAYER_INTERFACE},
    utils::from_mpris_micros,
};

/// How often the bootstrap poller re-reads a freshly appeared player
pub(crate) const BOOTSTRAP_INTERVAL: Duration = Duration::from_millis(250);

/// How many reads the poller attempts before giving up
pub(crate) const BOOTSTRAP_ATTEMPTS: u32 = 20;

/// Where the bootstrap poller reads live position and metadata from.
///
/// Separated from the D-Bus proxies so the poll loop can be driven by a
/// scripted source in tests.
#[async_trait]
pub(crate) trait BootstrapSource: Send + Sync {
    /// Read the current playback position, bypassing any cache
    async fn position(&self) -> Result<Duration, MuxError>;

    /// Read the current metadata record, bypassing any cache
    async fn metadata(&self) -> Result<TrackMetadata, MuxError>;
}

/// Proxy-backed read source used for real players.
pub(crate) struct ProxyBootstrapSource {
    player: MediaPlayer2PlayerProxy<'static>,
    props: zbus::fdo::PropertiesProxy<'static>,
}

impl ProxyBootstrapSource {
    pub(crate) fn new(
        player: MediaPlayer2PlayerProxy<'static>,
        props: zbus::fdo::PropertiesProxy<'static>,
    ) -> Self {
        Self { player, props }
    }
}

#[async_trait]
impl BootstrapSource for ProxyBootstrapSource {
    async fn position(&self) -> Result<Duration, MuxError> {
        // Position is marked uncached on this proxy, so this is a real read.
        let micros = self.player.position().await.map_err(MuxError::DbusError)?;
        Ok(from_mpris_micros(micros))
    }

    async fn metadata(&self) -> Result<TrackMetadata, MuxError> {
        // The player proxy caches Metadata off PropertiesChanged; players
        // that need this poller are exactly the ones not emitting it yet,
        // so go through Properties.Get instead.
        let interface = InterfaceName::try_from(PLAYER_INTERFACE)
            .map_err(|e| MuxError::InvalidData(e.to_string()))?;
        let value = self
            .props
            .get(interface, "Metadata")
            .await
            .map_err(|e| MuxError::DbusError(e.into()))?;
        TrackMetadata::from_value(&value)
            .ok_or_else(|| MuxError::InvalidData("Metadata was not a dict".to_string()))
    }
}

/// Re-read position and metadata until a player that appeared with empty
/// state reports something real, then overwrite the mirror once.
///
/// Some players expose zero position and an empty metadata record for a
/// short window after taking their bus name. Each tick does two
/// best-effort reads; a failed or still-empty read consumes an attempt.
/// Exhausting the budget is not an error: the player may simply have no
/// track loaded, and the mirror keeps whatever state it has.
pub(crate) async fn run_bootstrap_poll<S: BootstrapSource>(mirror: Arc<StateMirror>, source: S) {
    for _ in 0..BOOTSTRAP_ATTEMPTS {
        tokio::time::sleep(BOOTSTRAP_INTERVAL).await;

        if mirror.is_destroyed() {
            return;
        }

        let (position, metadata) = tokio::join!(source.position(), source.metadata());
        let (Ok(position), Ok(metadata)) = (position, metadata) else {
            continue;
        };

        if position.is_zero() || !metadata.has_length() {
            continue;
        }

        mirror.apply_bootstrap(position, metadata);
        return;
    }

    debug!("Bootstrap poll budget exhausted; keeping current state");
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{
        Mutex,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::types::PlayerProperty;

    /// Scripted source: each attempt pops the next (position, metadata)
    /// pair; once the script runs out, reads keep failing.
    struct ScriptedSource {
        attempts: AtomicU32,
        script: Mutex<Vec<(Result<Duration, ()>, Result<TrackMetadata, ()>)>>,
    }

    impl ScriptedSource {
        fn new(mut script: Vec<(Result<Duration, ()>, Result<TrackMetadata, ()>)>) -> Self {
            script.reverse();
            Self {
                attempts: AtomicU32::new(0),
                script: Mutex::new(script),
            }
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    fn read_error() -> MuxError {
        MuxError::InvalidData("scripted failure".to_string())
    }

    #[async_trait]
    impl BootstrapSource for &ScriptedSource {
        async fn position(&self) -> Result<Duration, MuxError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let script = self.script.lock().unwrap();
            match script.last() {
                Some((position, _)) => (*position).map_err(|()| read_error()),
                None => Err(read_error()),
            }
        }

        async fn metadata(&self) -> Result<TrackMetadata, MuxError> {
            let entry = self.script.lock().unwrap().pop();
            match entry {
                Some((_, metadata)) => metadata.map_err(|()| read_error()),
                None => Err(read_error()),
            }
        }
    }

    fn valid_metadata() -> TrackMetadata {
        TrackMetadata {
            title: Some("Track One".to_string()),
            length: Some(Duration::from_micros(180_000_000)),
            ..TrackMetadata::default()
        }
    }

    fn empty_tick() -> (Result<Duration, ()>, Result<TrackMetadata, ()>) {
        (Ok(Duration::ZERO), Ok(TrackMetadata::default()))
    }

    fn counting_listener(
        mirror: &StateMirror,
        property: PlayerProperty,
    ) -> std::sync::Arc<AtomicU32> {
        let hits = std::sync::Arc::new(AtomicU32::new(0));
        let count = std::sync::Arc::clone(&hits);
        mirror.dispatcher().on_changed(property, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
        });
        hits
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_exhausted_without_valid_data() {
        let mirror = Arc::new(StateMirror::new());
        let source = ScriptedSource::new(vec![empty_tick(); 64]);

        run_bootstrap_poll(Arc::clone(&mirror), &source).await;

        assert_eq!(source.attempts(), BOOTSTRAP_ATTEMPTS);
        assert!(mirror.metadata().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_failures_still_consume_the_budget() {
        let mirror = Arc::new(StateMirror::new());
        let source = ScriptedSource::new(vec![(Err(()), Err(())); 64]);

        run_bootstrap_poll(Arc::clone(&mirror), &source).await;

        assert_eq!(source.attempts(), BOOTSTRAP_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_valid_reading() {
        let mirror = Arc::new(StateMirror::new());
        mirror.register_derived_listeners();
        mirror.apply_root_properties(&{
            let mut changed = std::collections::HashMap::new();
            changed.insert(
                "Identity".to_string(),
                zbus::zvariant::Value::from("Some Player").try_to_owned().unwrap(),
            );
            changed
        });

        let metadata_hits = counting_listener(&mirror, PlayerProperty::Metadata);
        let invalid_hits = counting_listener(&mirror, PlayerProperty::Invalid);

        let source = ScriptedSource::new(vec![
            empty_tick(),
            empty_tick(),
            (Ok(Duration::from_micros(1_500_000)), Ok(valid_metadata())),
            empty_tick(),
        ]);

        run_bootstrap_poll(Arc::clone(&mirror), &source).await;

        assert_eq!(source.attempts(), 3, "poller must stop once data is valid");
        assert_eq!(metadata_hits.load(Ordering::SeqCst), 1);
        assert_eq!(invalid_hits.load(Ordering::SeqCst), 1, "validity flips once");
        assert!(!mirror.is_invalid());
        assert_eq!(mirror.last_position(), Duration::from_micros(1_500_000));
    }

    #[tokio::test(start_paused = true)]
    async fn position_without_length_is_not_enough() {
        let mirror = Arc::new(StateMirror::new());
        let source = ScriptedSource::new(vec![
            (Ok(Duration::from_secs(1)), Ok(TrackMetadata::default()));
            64
        ]);

        run_bootstrap_poll(Arc::clone(&mirror), &source).await;

        assert_eq!(source.attempts(), BOOTSTRAP_ATTEMPTS);
        assert!(mirror.metadata().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_mirror_ends_the_poll_before_any_read() {
        let mirror = Arc::new(StateMirror::new());
        mirror.destroy();

        let source = ScriptedSource::new(vec![
            (Ok(Duration::from_secs(1)), Ok(valid_metadata()));
            64
        ]);

        run_bootstrap_poll(Arc::clone(&mirror), &source).await;

        assert_eq!(source.attempts(), 0);
        assert!(mirror.metadata().is_empty());
    }
}
