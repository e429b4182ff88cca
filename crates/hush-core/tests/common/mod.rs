// Shared helpers for driving the engine on a virtual clock.

#![allow(dead_code)]

use hush_core::{AudioBackend, Engine, NodeId, ParamRef, RenderGraph};

pub const RATE: f32 = 8_000.0;
pub const STEP: f64 = 0.01;

pub fn engine() -> Engine<RenderGraph> {
    Engine::new(RenderGraph::new(RATE))
}

/// Advance the clock in small steps, running due tasks after each one.
pub fn run_for(engine: &mut Engine<RenderGraph>, secs: f64) {
    let steps = (secs / STEP).round() as usize;
    for _ in 0..steps {
        engine.backend_mut().advance(STEP);
        engine.tick();
    }
}

pub fn now(engine: &Engine<RenderGraph>) -> f64 {
    engine.backend().current_time()
}

pub fn master_input(engine: &Engine<RenderGraph>) -> NodeId {
    engine.master_path().expect("master path").input()
}

pub fn master_node_count(engine: &Engine<RenderGraph>) -> usize {
    engine.master_path().map_or(0, |m| m.nodes().len())
}

pub fn master_gain(engine: &Engine<RenderGraph>) -> f32 {
    engine
        .backend()
        .param_value(ParamRef::gain(master_input(engine)))
        .expect("master gain")
}

/// Voice fade gains currently wired into the master gain, retiring voices
/// included.
pub fn connected_voice_count(engine: &Engine<RenderGraph>) -> usize {
    let voice_nodes = engine.voice_nodes();
    engine
        .backend()
        .inputs(master_input(engine))
        .iter()
        .filter(|n| voice_nodes.contains(n))
        .count()
}

/// Render `secs` of output, running due tasks between blocks.
pub fn render_for(engine: &mut Engine<RenderGraph>, secs: f64) -> Vec<f32> {
    let block = (STEP * RATE as f64).round() as usize;
    let steps = (secs / STEP).round() as usize;
    let mut out = Vec::with_capacity(block * steps);
    for _ in 0..steps {
        engine.tick();
        out.extend(engine.backend_mut().render_mono(block));
    }
    out
}

pub fn rms(samples: &[f32]) -> f32 {
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
}
