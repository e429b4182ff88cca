//! Master gain, warmth low-pass and the keep-alive sink.
//!
//! ```text
//! voices ─┐
//!         ├─> master gain ─> warmth low-pass ─> destination
//! beats ──┘
//! silent loop ─> gain(0) ─> destination        (keep-alive)
//! ```

use crate::backend::{anchor_param, AudioBackend, FilterKind, NodeId, ParamEvent, ParamRef};
use crate::constants::{
    DEFAULT_FADE_SEC, MASTER_SMOOTHING_TAU_SEC, MAX_FADE_SEC, MIN_FADE_SEC, OPEN_CUTOFF_HZ,
    WARMTH_CUTOFF_HZ, WARMTH_Q, WARMTH_RAMP_SEC,
};
use crate::error::GraphError;

/// User-facing master settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MasterState {
    pub volume: f32,
    pub muted: bool,
    pub warmth: bool,
    pub fade_secs: f64,
    pub heartbeat: bool,
}

impl Default for MasterState {
    fn default() -> Self {
        Self {
            volume: 0.5,
            muted: false,
            warmth: false,
            fade_secs: DEFAULT_FADE_SEC,
            heartbeat: false,
        }
    }
}

/// Slider position to linear gain: `muted ? 0 : volume^exponent`.
pub fn perceptual_gain(volume: f32, muted: bool, exponent: f32) -> f32 {
    if muted {
        return 0.0;
    }
    volume.clamp(0.0, 1.0).powf(exponent)
}

/// Keep fade lengths positive and bounded. Non-finite input falls back to the
/// minimum.
pub fn clamp_fade(secs: f64, min: f64) -> f64 {
    if !secs.is_finite() || secs <= 0.0 {
        return min;
    }
    secs.clamp(min, MAX_FADE_SEC.max(min))
}

pub fn warmth_cutoff(warm: bool) -> f32 {
    if warm {
        WARMTH_CUTOFF_HZ
    } else {
        OPEN_CUTOFF_HZ
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MasterPath {
    gain: NodeId,
    warmth: NodeId,
    keep_alive: Option<(NodeId, NodeId)>,
}

impl MasterPath {
    /// Build gain (silent) -> warmth (open) -> destination, plus the
    /// keep-alive sink if the backend allows it.
    pub fn build(backend: &mut dyn AudioBackend) -> Result<MasterPath, GraphError> {
        let destination = backend.destination()?;
        let gain = backend.create_gain(0.0)?;
        let warmth = match backend.create_filter(FilterKind::Lowpass, OPEN_CUTOFF_HZ, WARMTH_Q) {
            Ok(id) => id,
            Err(e) => {
                backend.release(gain);
                return Err(e);
            }
        };
        let wired = backend
            .connect(gain, warmth)
            .and_then(|()| backend.connect(warmth, destination));
        if let Err(e) = wired {
            backend.release(gain);
            backend.release(warmth);
            return Err(e);
        }

        let keep_alive = match keep_alive(backend, destination) {
            Ok(pair) => Some(pair),
            Err(e) => {
                log::warn!("[master] keep-alive sink unavailable: {}", e);
                None
            }
        };
        log::debug!("[master] path ready");
        Ok(MasterPath {
            gain,
            warmth,
            keep_alive,
        })
    }

    /// Where voices and beats connect.
    pub fn input(&self) -> NodeId {
        self.gain
    }

    pub fn warmth_filter(&self) -> NodeId {
        self.warmth
    }

    pub fn has_keep_alive(&self) -> bool {
        self.keep_alive.is_some()
    }

    /// Approach `target` exponentially from the current value.
    pub fn apply_gain(
        &self,
        backend: &mut dyn AudioBackend,
        target: f32,
    ) -> Result<(), GraphError> {
        let param = ParamRef::gain(self.gain);
        anchor_param(backend, param)?;
        let start = backend.current_time();
        backend.automate(
            param,
            ParamEvent::SetTarget {
                value: target.max(0.0),
                start,
                tau: MASTER_SMOOTHING_TAU_SEC,
            },
        )
    }

    /// Sweep the low-pass cutoff to the warm or open position.
    pub fn apply_warmth(
        &self,
        backend: &mut dyn AudioBackend,
        warm: bool,
    ) -> Result<(), GraphError> {
        let param = ParamRef::frequency(self.warmth);
        anchor_param(backend, param)?;
        let end = backend.current_time() + WARMTH_RAMP_SEC;
        backend.automate(
            param,
            ParamEvent::ExponentialRamp {
                value: warmth_cutoff(warm),
                end,
            },
        )
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes = vec![self.gain, self.warmth];
        if let Some((source, sink)) = self.keep_alive {
            nodes.push(source);
            nodes.push(sink);
        }
        nodes
    }
}

// A looping buffer of silence into a zero gain keeps the output device awake
// between soundscapes.
fn keep_alive(
    backend: &mut dyn AudioBackend,
    destination: NodeId,
) -> Result<(NodeId, NodeId), GraphError> {
    let frames = (backend.sample_rate().max(1.0) as usize).max(1);
    let buffer = backend.create_buffer(&vec![0.0; frames])?;
    let source = backend.create_buffer_source(buffer, true)?;
    let sink = match backend.create_gain(0.0) {
        Ok(id) => id,
        Err(e) => {
            backend.release(source);
            return Err(e);
        }
    };
    let now = backend.current_time();
    let wired = backend
        .connect(source, sink)
        .and_then(|()| backend.connect(sink, destination))
        .and_then(|()| backend.start(source, now));
    match wired {
        Ok(()) => Ok((source, sink)),
        Err(e) => {
            backend.release(source);
            backend.release(sink);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderGraph;

    #[test]
    fn volume_curve_is_silent_at_zero_and_when_muted() {
        assert_eq!(perceptual_gain(0.0, false, 2.5), 0.0);
        assert_eq!(perceptual_gain(0.8, true, 2.5), 0.0);
        assert!((perceptual_gain(1.0, false, 2.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn volume_curve_is_monotonic() {
        let mut prev = -1.0;
        for i in 0..=100 {
            let g = perceptual_gain(i as f32 / 100.0, false, 2.5);
            assert!(g >= prev);
            prev = g;
        }
    }

    #[test]
    fn out_of_range_volume_is_clamped() {
        assert_eq!(perceptual_gain(-0.5, false, 2.5), 0.0);
        assert!((perceptual_gain(3.0, false, 2.5) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn fades_stay_positive() {
        assert_eq!(clamp_fade(0.0, MIN_FADE_SEC), MIN_FADE_SEC);
        assert_eq!(clamp_fade(-3.0, MIN_FADE_SEC), MIN_FADE_SEC);
        assert_eq!(clamp_fade(f64::NAN, MIN_FADE_SEC), MIN_FADE_SEC);
        assert_eq!(clamp_fade(4.0, MIN_FADE_SEC), 4.0);
        assert_eq!(clamp_fade(1_000.0, MIN_FADE_SEC), MAX_FADE_SEC);
    }

    #[test]
    fn path_routes_gain_through_warmth_to_destination() {
        let mut graph = RenderGraph::new(8_000.0);
        graph.open().unwrap();
        let path = MasterPath::build(&mut graph).unwrap();
        let dst = graph.destination().unwrap();
        assert!(graph.is_connected(path.input(), path.warmth_filter()));
        assert!(graph.is_connected(path.warmth_filter(), dst));
        assert!(path.has_keep_alive());
        assert_eq!(graph.live_node_count(), path.nodes().len());
        assert_eq!(graph.param_value(ParamRef::gain(path.input())), Ok(0.0));
    }

    #[test]
    fn warmth_ramps_to_cutoff_in_half_a_second() {
        let mut graph = RenderGraph::new(8_000.0);
        graph.open().unwrap();
        let path = MasterPath::build(&mut graph).unwrap();
        path.apply_warmth(&mut graph, true).unwrap();
        let freq = ParamRef::frequency(path.warmth_filter());
        let mid = graph.param_value_at(freq, 0.25).unwrap();
        assert!(mid < OPEN_CUTOFF_HZ && mid > WARMTH_CUTOFF_HZ);
        let end = graph.param_value_at(freq, WARMTH_RAMP_SEC).unwrap();
        assert!((end - WARMTH_CUTOFF_HZ).abs() < 1e-2);
    }

    #[test]
    fn gain_settles_on_target() {
        let mut graph = RenderGraph::new(8_000.0);
        graph.open().unwrap();
        let path = MasterPath::build(&mut graph).unwrap();
        path.apply_gain(&mut graph, 0.5).unwrap();
        let settled = graph
            .param_value_at(ParamRef::gain(path.input()), 1.0)
            .unwrap();
        assert!((settled - 0.5).abs() < 1e-3);
    }
}
