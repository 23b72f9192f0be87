//! Active-player election.
//!
//! A pure function from the current set of tracked players (plus the peer
//! currently on the display) to at most one chosen player. The service
//! re-runs it whenever membership, pin state, playback status, or validity
//! changes.

use crate::types::PlayerId;

/// Election inputs for a single tracked player.
///
/// A plain-data view of a handle so the election stays a pure function of
/// its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerChoice {
    /// Stable player key
    pub id: PlayerId,

    /// Derived not-presentable flag
    pub invalid: bool,

    /// Whether the user pinned this player
    pub pinned: bool,

    /// Whether the player is currently playing
    pub playing: bool,
}

/// Elect the player that should drive the display.
///
/// Rules, in order:
/// 1. Invalid players are never considered.
/// 2. The first pinned valid player wins outright, playing or not.
/// 3. Otherwise the first valid player is the running candidate; a later
///    valid player replaces it when the candidate is not playing but the
///    newcomer is, or when the newcomer is the peer already on the display
///    (sticky tie-break, so churn between two playing peers does not flap
///    the display).
///
/// Returns `None` when nothing valid is tracked.
pub fn select_active(choices: &[PlayerChoice], displayed: Option<&PlayerId>) -> Option<PlayerId> {
    let mut candidate: Option<&PlayerChoice> = None;

    for choice in choices {
        if choice.invalid {
            continue;
        }

        if choice.pinned {
            return Some(choice.id.clone());
        }

        match candidate {
            None => candidate = Some(choice),
            Some(current) => {
                let takes_over = !current.playing && choice.playing;
                let is_displayed = displayed == Some(&choice.id);
                if takes_over || is_displayed {
                    candidate = Some(choice);
                }
            }
        }
    }

    candidate.map(|choice| choice.id.clone())
}
