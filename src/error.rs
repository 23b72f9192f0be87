use crate::types::PlayerId;

/// Errors that can occur while tracking media players
#[derive(thiserror::Error, Debug)]
pub enum MuxError {
    /// Player with the given bus name is not tracked
    #[error("Player {0:?} not found")]
    PlayerNotFound(PlayerId),

    /// D-Bus communication error
    #[error("D-Bus operation failed: {0}")]
    DbusError(#[from] zbus::Error),

    /// A peer sent a value this crate cannot interpret
    #[error("Unexpected wire data: {0}")]
    InvalidData(String),

    /// Failed to bring up the service or a player handle
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}
