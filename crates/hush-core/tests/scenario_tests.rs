// Host-side integration tests for end-to-end listening scenarios:
// warmth across pause/resume, crossfades, the heartbeat layer and the lullaby.

mod common;

use common::*;
use hush_core::constants::{HEARTBEAT_PERIOD_SEC, WARMTH_CUTOFF_HZ};
use hush_core::{AudioBackend, ParamRef, Soundscape, Transport};

#[test]
fn rain_with_warmth_survives_pause_and_resume() {
    let mut e = engine();
    e.set_volume(0.4);
    e.play(Soundscape::Rain);
    run_for(&mut e, 1.0);
    e.set_warmth(true);
    run_for(&mut e, 1.0);
    e.pause();
    let fade = e.settings().fade_secs;
    run_for(&mut e, fade + 0.5);
    assert_eq!(e.tracked_node_count(), 0);

    e.play(Soundscape::Rain);
    let resumed_at = now(&e);
    let fade_gain = ParamRef::gain(e.active_voice().expect("rain").fade_gain());
    assert_eq!(e.backend().param_value_at(fade_gain, resumed_at), Some(0.0));
    run_for(&mut e, fade + 0.5);

    assert_eq!(e.state(), Transport::Playing(Soundscape::Rain));
    let warmth = e.master_path().expect("master").warmth_filter();
    let cutoff = e
        .backend()
        .param_value(ParamRef::frequency(warmth))
        .expect("cutoff");
    assert!((cutoff - WARMTH_CUTOFF_HZ).abs() < 1.0, "cutoff {}", cutoff);
    assert!((master_gain(&e) - 0.4_f32.powf(2.5)).abs() < 1e-3);
    assert_eq!(e.backend().param_value(fade_gain), Ok(1.0));

    let active = e.active_voice().expect("rain");
    assert_eq!(e.retiring_voice_count(), 0);
    assert_eq!(connected_voice_count(&e), 1);
    assert_eq!(
        e.backend().live_node_count(),
        master_node_count(&e) + active.node_count()
    );
}

#[test]
fn brown_to_ocean_crossfade_leaves_only_ocean() {
    let mut e = engine();
    e.play(Soundscape::BrownNoise);
    e.play(Soundscape::Ocean);
    let fade = e.settings().fade_secs;

    run_for(&mut e, fade / 2.0);
    assert_eq!(e.retiring_voice_count(), 1);
    assert_eq!(connected_voice_count(&e), 2);

    run_for(&mut e, fade * 1.5);
    let ocean = e.active_voice().expect("ocean");
    assert_eq!(ocean.id(), Soundscape::Ocean);
    assert_eq!(e.retiring_voice_count(), 0);
    assert_eq!(e.voice_nodes().len(), ocean.node_count());
    assert_eq!(
        e.backend().live_node_count(),
        master_node_count(&e) + ocean.node_count()
    );
}

#[test]
fn heartbeat_enabled_while_idle_stays_silent() {
    let mut e = engine();
    e.toggle_heartbeat_layer(true);
    run_for(&mut e, 3.0);
    assert_eq!(e.beats_scheduled(), 0);
    assert_eq!(e.pending_tasks(), 0);
    assert!(!e.heartbeat_armed());

    e.play(Soundscape::PinkNoise);
    run_for(&mut e, 0.1);
    assert_eq!(e.beats_scheduled(), 2);
}

#[test]
fn heartbeat_schedules_two_beats_per_period() {
    let mut e = engine();
    e.toggle_heartbeat_layer(true);
    e.play(Soundscape::BrownNoise);

    // Cycles fire at 0, 1.2, ..., 6.0.
    run_for(&mut e, 5.5 * HEARTBEAT_PERIOD_SEC);
    assert_eq!(e.beats_scheduled(), 12);

    let before = e.beats_scheduled();
    run_for(&mut e, HEARTBEAT_PERIOD_SEC);
    assert_eq!(e.beats_scheduled() - before, 2);
}

#[test]
fn disabling_heartbeat_stops_new_beats_and_releases_old_ones() {
    let mut e = engine();
    e.toggle_heartbeat_layer(true);
    e.play(Soundscape::Shush);
    run_for(&mut e, 2.0);
    let before = e.beats_scheduled();
    assert!(before > 0);

    e.toggle_heartbeat_layer(false);
    run_for(&mut e, HEARTBEAT_PERIOD_SEC);
    assert_eq!(e.beats_scheduled(), before);

    run_for(&mut e, 1.0);
    let active = e.active_voice().expect("shush");
    assert_eq!(e.tracked_node_count(), active.node_count());
    assert_eq!(
        e.backend().live_node_count(),
        master_node_count(&e) + active.node_count()
    );
}

#[test]
fn stopping_disarms_the_heartbeat() {
    let mut e = engine();
    e.toggle_heartbeat_layer(true);
    e.play(Soundscape::Rain);
    run_for(&mut e, 1.0);
    e.stop_all(true, false);
    let before = e.beats_scheduled();
    run_for(&mut e, 3.0);
    assert_eq!(e.beats_scheduled(), before);
    assert_eq!(e.tracked_node_count(), 0);
    assert!(e.settings().heartbeat);

    e.play(Soundscape::Rain);
    run_for(&mut e, 0.1);
    assert_eq!(e.beats_scheduled(), before + 2);
}

#[test]
fn heartbeat_keeps_its_rhythm_across_a_switch() {
    let mut e = engine();
    e.toggle_heartbeat_layer(true);
    e.play(Soundscape::PinkNoise);
    run_for(&mut e, 0.5);
    e.play(Soundscape::Ocean);
    run_for(&mut e, 0.5);
    // Still only the first cycle: the switch did not re-arm.
    assert_eq!(e.beats_scheduled(), 2);
}

#[test]
fn lullaby_schedules_notes_ahead_and_prunes_finished_ones() {
    let mut e = engine();
    e.play(Soundscape::Lullaby);
    run_for(&mut e, 10.0);
    let melody = e
        .active_voice()
        .and_then(|v| v.melody())
        .expect("lullaby melody");
    assert!(melody.notes_scheduled() >= 8);
    assert!(melody.in_flight() <= 4);
    assert!(melody.next_note_time() > now(&e));
}

#[test]
fn lullaby_stopped_mid_phrase_releases_its_notes() {
    let mut e = engine();
    e.play(Soundscape::Lullaby);
    run_for(&mut e, 2.3);
    let in_flight = e
        .active_voice()
        .and_then(|v| v.melody())
        .map_or(0, |m| m.in_flight());
    assert!(in_flight > 0);

    e.stop_all(true, false);
    let fade = e.settings().fade_secs;
    run_for(&mut e, fade + 0.2);
    assert_eq!(e.tracked_node_count(), 0);
    assert_eq!(e.backend().live_node_count(), master_node_count(&e));
}
