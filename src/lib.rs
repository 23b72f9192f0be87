//! Playermux - MPRIS player discovery and active-player election.
//!
//! Playermux watches the D-Bus session bus for media players following the
//! MPRIS naming convention, keeps a live in-process mirror of each player's
//! control surface, and elects a single "active" player for a display to
//! follow. The main pieces:
//!
//! - Per-player handles with cached property reads, typed fire-and-forget
//!   controls, and per-property change subscriptions
//! - A bootstrap poller for players that appear on the bus with empty state
//! - A registry reacting to bus presence events, with a blacklist applied
//!   at insertion time
//! - A deterministic, sticky active-player election
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use playermux::{Config, PlayerMuxService};
//!
//! # async fn run() -> Result<(), playermux::MuxError> {
//! let service = PlayerMuxService::start(Config::default()).await?;
//!
//! for player in service.players() {
//!     println!("{}: {:?}", player.id(), player.playback_status());
//! }
//!
//! if let Some(active) = service.active_player() {
//!     active.play_pause().await;
//! }
//! # Ok(())
//! # }
//! ```

/// Per-property listener registry and fan-out.
pub mod dispatch;

/// Error types.
pub mod error;

/// Track metadata record and wire parsing.
pub mod metadata;

/// Per-player handle: proxies, cached state, poller, subscriptions.
pub mod player;

/// Reactive value wrapper backing the service outputs.
pub mod property;

/// D-Bus proxy trait definitions and bus-name conventions.
pub mod proxy;

/// Player registry and bus-presence wiring.
mod registry;

/// Active-player election.
pub mod selector;

/// The top-level service.
pub mod service;

/// Core identifiers, enums, and notification types.
pub mod types;

/// Small wire-unit conversions.
pub mod utils;

pub use dispatch::ListenerId;
pub use error::MuxError;
pub use metadata::TrackMetadata;
pub use player::PlayerHandle;
pub use property::Property;
pub use selector::{PlayerChoice, select_active};
pub use service::{Config, PlayerMuxService};
pub use types::*;
