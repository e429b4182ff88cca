//! Optional "thud-thud" layer mixed straight into the master gain.
//!
//! The overlay keeps no nodes between beats. Each beat builds an
//! oscillator -> envelope -> low-pass triple and hands the ids back so the
//! engine can release them once the envelope has finished.

use crate::backend::{AudioBackend, FilterKind, NodeId, ParamEvent, ParamRef, Waveform};
use crate::constants::{
    BEAT_ATTACK_SEC, BEAT_END_HZ, BEAT_FIRST_HZ, BEAT_FIRST_PEAK, BEAT_LENGTH_SEC,
    BEAT_LOWPASS_HZ, BEAT_SECOND_HZ, BEAT_SECOND_PEAK, BEAT_SWEEP_SEC,
    HEARTBEAT_SECOND_BEAT_OFFSET_SEC, SILENCE_FLOOR,
};
use crate::error::GraphError;
use crate::voice::stop_quietly;
use smallvec::SmallVec;

/// Nodes of one scheduled beat and the time its output is over.
#[derive(Clone, Debug, PartialEq)]
pub struct Beat {
    pub nodes: SmallVec<[NodeId; 4]>,
    pub ends_at: f64,
}

/// Arming state of the overlay.
///
/// Every arm or disarm bumps `generation`; cycle tasks carry the generation
/// they were queued under and are ignored once it is stale.
#[derive(Debug, Default)]
pub struct Heartbeat {
    armed: bool,
    generation: u64,
    beats: u64,
}

impl Heartbeat {
    pub fn arm(&mut self) -> u64 {
        self.armed = true;
        self.generation += 1;
        self.generation
    }

    pub fn disarm(&mut self) {
        if self.armed {
            self.armed = false;
            self.generation += 1;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.armed && generation == self.generation
    }

    /// Total beats scheduled since creation.
    pub fn beats_scheduled(&self) -> u64 {
        self.beats
    }

    /// Schedule the louder, higher first beat at `start` and the softer, lower
    /// second beat shortly after.
    pub fn schedule_cycle(
        &mut self,
        backend: &mut dyn AudioBackend,
        target: NodeId,
        start: f64,
    ) -> Result<SmallVec<[Beat; 2]>, GraphError> {
        let first = schedule_beat(
            backend,
            target,
            start,
            BEAT_FIRST_HZ,
            BEAT_FIRST_PEAK,
        )?;
        let second_at = start + HEARTBEAT_SECOND_BEAT_OFFSET_SEC;
        let second = match schedule_beat(
            backend,
            target,
            second_at,
            BEAT_SECOND_HZ,
            BEAT_SECOND_PEAK,
        ) {
            Ok(beat) => beat,
            Err(e) => {
                for node in first.nodes {
                    backend.release(node);
                }
                return Err(e);
            }
        };
        self.beats += 2;
        let mut beats = SmallVec::new();
        beats.push(first);
        beats.push(second);
        Ok(beats)
    }
}

/// One pitch-swept, enveloped, low-passed thud.
pub fn schedule_beat(
    backend: &mut dyn AudioBackend,
    target: NodeId,
    when: f64,
    pitch_hz: f32,
    peak: f32,
) -> Result<Beat, GraphError> {
    let mut nodes: SmallVec<[NodeId; 4]> = SmallVec::new();
    let ends_at = when + BEAT_LENGTH_SEC + 0.02;
    let built = build_beat(backend, target, when, pitch_hz, peak, ends_at, &mut nodes);
    match built {
        Ok(()) => Ok(Beat { nodes, ends_at }),
        Err(e) => {
            if let Some(&osc) = nodes.first() {
                stop_quietly(backend, osc, when);
            }
            for node in nodes {
                backend.release(node);
            }
            Err(e)
        }
    }
}

fn build_beat(
    backend: &mut dyn AudioBackend,
    target: NodeId,
    when: f64,
    pitch_hz: f32,
    peak: f32,
    ends_at: f64,
    nodes: &mut SmallVec<[NodeId; 4]>,
) -> Result<(), GraphError> {
    let osc = backend.create_oscillator(Waveform::Sine, pitch_hz, 0.0)?;
    nodes.push(osc);
    let env = backend.create_gain(0.0)?;
    nodes.push(env);
    let tone = backend.create_filter(FilterKind::Lowpass, BEAT_LOWPASS_HZ, 0.7)?;
    nodes.push(tone);

    let freq = ParamRef::frequency(osc);
    backend.automate(
        freq,
        ParamEvent::SetValue {
            value: pitch_hz,
            at: when,
        },
    )?;
    backend.automate(
        freq,
        ParamEvent::ExponentialRamp {
            value: BEAT_END_HZ,
            end: when + BEAT_SWEEP_SEC,
        },
    )?;

    let gain = ParamRef::gain(env);
    backend.automate(
        gain,
        ParamEvent::SetValue {
            value: 0.0,
            at: when,
        },
    )?;
    backend.automate(
        gain,
        ParamEvent::LinearRamp {
            value: peak,
            end: when + BEAT_ATTACK_SEC,
        },
    )?;
    backend.automate(
        gain,
        ParamEvent::ExponentialRamp {
            value: SILENCE_FLOOR,
            end: when + BEAT_LENGTH_SEC,
        },
    )?;

    backend.connect(osc, env)?;
    backend.connect(env, tone)?;
    backend.connect(tone, target)?;
    backend.start(osc, when)?;
    backend.stop(osc, ends_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderGraph;

    #[test]
    fn arming_bumps_generation_and_disarm_invalidates_it() {
        let mut hb = Heartbeat::default();
        let g = hb.arm();
        assert!(hb.is_current(g));
        hb.disarm();
        assert!(!hb.is_current(g));
        let g2 = hb.arm();
        assert!(g2 > g);
        assert!(hb.is_current(g2));
    }

    #[test]
    fn cycle_builds_two_self_contained_beats() {
        let mut graph = RenderGraph::new(8_000.0);
        graph.open().unwrap();
        let dst = graph.destination().unwrap();
        let mut hb = Heartbeat::default();
        let beats = hb.schedule_cycle(&mut graph, dst, 0.1).unwrap();
        assert_eq!(beats.len(), 2);
        assert_eq!(hb.beats_scheduled(), 2);
        assert_eq!(graph.live_node_count(), 6);
        assert!(beats[1].ends_at > beats[0].ends_at);
        let second_start = 0.1 + HEARTBEAT_SECOND_BEAT_OFFSET_SEC;
        let pitches = [
            graph.param_value_at(ParamRef::frequency(beats[0].nodes[0]), 0.1),
            graph.param_value_at(ParamRef::frequency(beats[1].nodes[0]), second_start),
        ];
        for pitch in pitches {
            let hz = pitch.unwrap();
            assert!((60.0..=70.0).contains(&hz), "beat starts at {hz} Hz");
        }
        assert!(pitches[0].unwrap() > pitches[1].unwrap());
        for beat in &beats {
            let tone = beat.nodes[2];
            assert!(graph.is_connected(tone, dst));
        }
    }

    #[test]
    fn beat_sweeps_down_and_decays() {
        let mut graph = RenderGraph::new(8_000.0);
        graph.open().unwrap();
        let dst = graph.destination().unwrap();
        let beat = schedule_beat(&mut graph, dst, 0.0, 65.0, 1.0).unwrap();
        let freq = ParamRef::frequency(beat.nodes[0]);
        let gain = ParamRef::gain(beat.nodes[1]);
        let at = |param, t| graph.param_value_at(param, t).unwrap();
        assert!((at(freq, 0.0) - 65.0).abs() < 1e-3);
        assert!((at(freq, BEAT_SWEEP_SEC) - BEAT_END_HZ).abs() < 1e-3);
        assert!((at(gain, BEAT_ATTACK_SEC) - 1.0).abs() < 1e-4);
        assert!(at(gain, BEAT_LENGTH_SEC) <= SILENCE_FLOOR + 1e-6);
    }
}
