// Host-side integration tests for the soundscape recipes: what each one
// sounds like once rendered, and how its modulators are wired.

mod common;

use common::*;
use hush_core::constants::MELODY_FEEDBACK;
use hush_core::{AudioBackend, Engine, NodeId, ParamKind, ParamRef, RenderGraph, Soundscape};

fn playing(id: Soundscape) -> Engine<RenderGraph> {
    let mut e = engine();
    e.set_volume(1.0);
    e.set_fade_time(0.1);
    e.play(id);
    e
}

/// An LFO routed through a depth gain into a parameter.
#[derive(Debug)]
struct Modulation {
    target: ParamRef,
    base: f32,
    depth: f32,
    rate: f32,
    lfo: NodeId,
}

fn modulations(e: &Engine<RenderGraph>) -> Vec<Modulation> {
    let g = e.backend();
    let mut found = Vec::new();
    for node in e.active_voice().expect("voice").nodes() {
        for target in [ParamRef::gain(node), ParamRef::frequency(node)] {
            for amount in g.param_inputs(target) {
                let lfo = g.inputs(amount)[0];
                found.push(Modulation {
                    target,
                    base: g.param_value(target).expect("base"),
                    depth: g.param_value(ParamRef::gain(amount)).expect("depth"),
                    rate: g.param_value(ParamRef::frequency(lfo)).expect("rate"),
                    lfo,
                });
            }
        }
    }
    found
}

#[test]
fn every_soundscape_renders_audible_dc_free_output() {
    for id in Soundscape::ALL {
        let mut e = playing(id);
        let out = render_for(&mut e, 3.0);
        assert!(out.iter().all(|s| s.is_finite()), "{id} produced a non-finite sample");
        let tail = &out[out.len() / 3..];
        let level = rms(tail);
        let mean = tail.iter().sum::<f32>() / tail.len() as f32;
        assert!(level > 1e-3, "{id} rms {level}");
        assert!(mean.abs() < 0.05, "{id} mean {mean}");
    }
}

#[test]
fn ocean_swell_drives_cutoff_and_level_from_one_slow_lfo() {
    let e = playing(Soundscape::Ocean);
    let mods = modulations(&e);
    assert_eq!(mods.len(), 2, "{mods:?}");
    assert_eq!(mods[0].lfo, mods[1].lfo);
    assert!((1.0 / mods[0].rate - 8.0).abs() < 1e-3);

    let cutoff = mods
        .iter()
        .find(|m| m.target.kind == ParamKind::Frequency)
        .expect("cutoff modulation");
    assert!((cutoff.base - cutoff.depth - 150.0).abs() < 1e-3);
    assert!((cutoff.base + cutoff.depth - 850.0).abs() < 1e-3);

    let level = mods
        .iter()
        .find(|m| m.target.kind == ParamKind::Gain)
        .expect("level modulation");
    assert!((level.base - level.depth - 0.3).abs() < 1e-4);
    assert!((level.base + level.depth - 0.9).abs() < 1e-4);
}

#[test]
fn shush_breathes_at_a_quarter_hertz() {
    let mut e = playing(Soundscape::Shush);
    let mods = modulations(&e);
    assert_eq!(mods.len(), 1, "{mods:?}");
    let breath = &mods[0];
    assert_eq!(breath.target.kind, ParamKind::Gain);
    assert!((breath.rate - 0.25).abs() < 1e-6);
    assert!((breath.base - breath.depth - 0.05).abs() < 1e-4);
    assert!((breath.base + breath.depth - 0.95).abs() < 1e-4);

    // Quarter-second windows over two breaths: loud and quiet phases differ
    // by far more than noise alone would explain.
    let out = render_for(&mut e, 8.5);
    let window = (0.25 * RATE as f64) as usize;
    let levels: Vec<f32> = out[window * 2..].chunks(window).map(rms).collect();
    let loudest = levels.iter().cloned().fold(0.0, f32::max);
    let quietest = levels.iter().cloned().fold(f32::MAX, f32::min);
    assert!(loudest > 4.0 * quietest, "{loudest} vs {quietest}");
}

#[test]
fn hair_dryer_mixes_three_layers() {
    let e = playing(Soundscape::HairDryer);
    let voice = e.active_voice().expect("hair dryer");
    let g = e.backend();
    let feeds = g.inputs(voice.fade_gain());
    assert_eq!(feeds.len(), 1);
    assert_eq!(g.inputs(feeds[0]).len(), 3);
    assert!(modulations(&e).is_empty());
}

#[test]
fn rain_sums_two_bands() {
    let e = playing(Soundscape::Rain);
    let voice = e.active_voice().expect("rain");
    assert_eq!(e.backend().inputs(voice.fade_gain()).len(), 2);
}

#[test]
fn lullaby_echo_feeds_back_into_its_delay() {
    let e = playing(Soundscape::Lullaby);
    let g = e.backend();
    let nodes = e.active_voice().expect("lullaby").nodes();
    let loops: Vec<NodeId> = nodes
        .iter()
        .copied()
        .filter(|&fb| g.inputs(fb).iter().any(|&d| g.is_connected(fb, d)))
        .filter(|&fb| g.param_value(ParamRef::gain(fb)).is_ok())
        .collect();
    assert_eq!(loops.len(), 1, "{loops:?}");
    assert_eq!(g.param_value(ParamRef::gain(loops[0])), Ok(MELODY_FEEDBACK));
}
