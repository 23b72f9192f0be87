use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::debug;
use zbus::zvariant::{OwnedValue, Value};

use super::PlayerHandle;
use crate::utils::from_mpris_micros;

/// Spawn the per-player monitor task.
///
/// One task per handle drives both wire event sources: the batched
/// `PropertiesChanged` signal (root and player interfaces arrive on the
/// same stream, tagged with their interface name) and the `Seeked` signal.
/// The task holds only a weak reference to the handle and exits when the
/// handle is gone or either stream ends.
pub(super) fn spawn_monitor(handle: &Arc<PlayerHandle>) -> JoinHandle<()> {
    let weak: Weak<PlayerHandle> = Arc::downgrade(handle);
    let props = handle.props.clone();
    let player = handle.player.clone();
    let id = handle.id.clone();

    tokio::spawn(async move {
        let mut property_changes = match props.receive_properties_changed().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("PropertiesChanged subscription failed for {id}: {e}");
                return;
            }
        };

        let mut seeks = match player.receive_seeked().await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("Seeked subscription failed for {id}: {e}");
                return;
            }
        };

        loop {
            tokio::select! {
                signal = property_changes.next() => {
                    let Some(signal) = signal else { break };
                    let Some(handle) = weak.upgrade() else { break };
                    let Ok(args) = signal.args() else { continue };

                    let interface = args.interface_name().to_string();
                    let changed = to_owned_map(args.changed_properties());
                    handle.apply_properties_changed(&interface, &changed);
                }
                signal = seeks.next() => {
                    let Some(signal) = signal else { break };
                    let Some(handle) = weak.upgrade() else { break };
                    let Ok(args) = signal.args() else { continue };

                    handle.mirror.apply_seeked(from_mpris_micros(*args.position()));
                }
            }
        }

        debug!("Monitor loop ended for {id}");
    })
}

/// Detach a changed-properties payload from its signal message.
fn to_owned_map(changed: &HashMap<&str, Value<'_>>) -> HashMap<String, OwnedValue> {
    changed
        .iter()
        .filter_map(|(name, value)| {
            value
                .try_to_owned()
                .ok()
                .map(|owned| ((*name).to_string(), owned))
        })
        .collect()
}
