//! Integration tests for the active-player election as a consumer sees it:
//! a display follows the outcome across player lifecycle events.

#![cfg_attr(test, allow(clippy::unwrap_used))]

use playermux::{PlayerChoice, PlayerId, select_active};

fn id(name: &str) -> PlayerId {
    PlayerId::from_bus_name(&format!("org.mpris.MediaPlayer2.{name}"))
}

fn player(name: &str, playing: bool) -> PlayerChoice {
    PlayerChoice {
        id: id(name),
        invalid: false,
        pinned: false,
        playing,
    }
}

/// Re-run the election the way the service does: the previous outcome is
/// the next run's displayed peer.
fn run(choices: &[PlayerChoice], displayed: &mut Option<PlayerId>) -> Option<PlayerId> {
    let outcome = select_active(choices, displayed.as_ref());
    *displayed = outcome.clone();
    outcome
}

#[test]
fn playing_player_takes_the_display_from_a_paused_one() {
    let mut displayed = None;

    let choices = vec![player("a", false), player("b", true)];
    assert_eq!(run(&choices, &mut displayed), Some(id("b")));
}

#[test]
fn pinning_overrides_a_playing_peer_until_unpinned() {
    let mut displayed = None;

    let mut choices = vec![player("a", false), player("b", true)];
    assert_eq!(run(&choices, &mut displayed), Some(id("b")));

    choices[0].pinned = true;
    assert_eq!(run(&choices, &mut displayed), Some(id("a")));
    // Pin holds across unrelated churn.
    assert_eq!(run(&choices, &mut displayed), Some(id("a")));

    choices[0].pinned = false;
    assert_eq!(run(&choices, &mut displayed), Some(id("b")));
}

#[test]
fn losing_the_selected_peer_falls_back_to_the_survivor() {
    let mut displayed = None;

    let choices = vec![player("a", false), player("b", true)];
    assert_eq!(run(&choices, &mut displayed), Some(id("b")));

    // "b" drops off the bus.
    let remaining = vec![player("a", false)];
    assert_eq!(run(&remaining, &mut displayed), Some(id("a")));

    // ...and then "a" goes too.
    assert_eq!(run(&[], &mut displayed), None);
}

#[test]
fn selection_does_not_flap_between_two_playing_peers() {
    let mut displayed = None;

    let choices = vec![player("a", true), player("b", true)];
    let first = run(&choices, &mut displayed);

    // Re-elections on unrelated churn keep the same outcome.
    for _ in 0..10 {
        assert_eq!(run(&choices, &mut displayed), first);
    }
}

#[test]
fn a_player_turning_invalid_leaves_the_display_and_comes_back() {
    let mut displayed = None;

    let mut choices = vec![player("a", true)];
    assert_eq!(run(&choices, &mut displayed), Some(id("a")));

    // The handle stays tracked but loses its title mid-track-change.
    choices[0].invalid = true;
    assert_eq!(run(&choices, &mut displayed), None);

    choices[0].invalid = false;
    assert_eq!(run(&choices, &mut displayed), Some(id("a")));
}

#[test]
fn stopped_player_keeps_the_display_until_something_plays() {
    let mut displayed = None;

    let mut choices = vec![player("a", false)];
    assert_eq!(run(&choices, &mut displayed), Some(id("a")));

    choices.push(player("b", false));
    assert_eq!(run(&choices, &mut displayed), Some(id("a")));

    choices[1].playing = true;
    assert_eq!(run(&choices, &mut displayed), Some(id("b")));
}
