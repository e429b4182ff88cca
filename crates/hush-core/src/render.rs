//! In-process audio graph with a sample clock.
//!
//! `RenderGraph` implements [`AudioBackend`] by pulling samples through a node
//! arena one frame at a time. The native frontend feeds it to a `cpal` output
//! stream through [`SharedGraph`]; tests drive it with a virtual clock via
//! [`RenderGraph::advance`] and inspect the node arena directly.

use crate::automation::ParamTimeline;
use crate::backend::{
    AudioBackend, BufferId, FilterKind, NodeId, ParamEvent, ParamKind, ParamRef, Waveform,
};
use crate::dsp::{detuned, wave_sample, Biquad};
use crate::error::GraphError;
use smallvec::SmallVec;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const DESTINATION: NodeId = NodeId(0);

#[derive(Clone, Copy, Debug, Default)]
struct Span {
    start: Option<f64>,
    stop: Option<f64>,
}

impl Span {
    fn active(&self, t: f64) -> bool {
        matches!(self.start, Some(s) if t >= s) && self.stop.map_or(true, |s| t < s)
    }
}

enum Kind {
    Destination,
    Gain,
    Filter(Biquad),
    Oscillator {
        waveform: Waveform,
        phase: f32,
        span: Span,
    },
    BufferSource {
        buffer: BufferId,
        position: usize,
        looping: bool,
        span: Span,
    },
    Delay {
        line: Vec<f32>,
        write: usize,
    },
}

impl Kind {
    fn span_mut(&mut self) -> Option<&mut Span> {
        match self {
            Kind::Oscillator { span, .. } | Kind::BufferSource { span, .. } => Some(span),
            _ => None,
        }
    }
}

struct Param {
    kind: ParamKind,
    timeline: ParamTimeline,
    inputs: SmallVec<[NodeId; 2]>,
}

struct Slot {
    kind: Kind,
    inputs: SmallVec<[NodeId; 4]>,
    params: SmallVec<[Param; 2]>,
    output: f32,
    pass: u64,
    busy: bool,
}

impl Slot {
    fn new(kind: Kind, params: &[(ParamKind, f32)]) -> Self {
        Self {
            kind,
            inputs: SmallVec::new(),
            params: params
                .iter()
                .map(|&(kind, initial)| Param {
                    kind,
                    timeline: ParamTimeline::new(initial),
                    inputs: SmallVec::new(),
                })
                .collect(),
            output: 0.0,
            pass: 0,
            busy: false,
        }
    }

    fn param(&self, kind: ParamKind) -> Option<&Param> {
        self.params.iter().find(|p| p.kind == kind)
    }

    fn param_mut(&mut self, kind: ParamKind) -> Option<&mut Param> {
        self.params.iter_mut().find(|p| p.kind == kind)
    }
}

/// Sample-accurate software implementation of the audio graph.
pub struct RenderGraph {
    sample_rate: f32,
    frame: u64,
    available: bool,
    opened: bool,
    running: bool,
    gesture_locked: bool,
    nodes: Vec<Option<Slot>>,
    buffers: Vec<Arc<[f32]>>,
    pass: u64,
}

impl RenderGraph {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            frame: 0,
            available: true,
            opened: false,
            running: false,
            gesture_locked: false,
            nodes: Vec::new(),
            buffers: Vec::new(),
            pass: 0,
        }
    }

    /// A graph whose context can never be opened, like a platform without
    /// an audio subsystem.
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(48_000.0)
        }
    }

    /// A graph that refuses to run until [`grant_user_gesture`] is called.
    ///
    /// [`grant_user_gesture`]: RenderGraph::grant_user_gesture
    pub fn gesture_locked(sample_rate: f32) -> Self {
        Self {
            gesture_locked: true,
            ..Self::new(sample_rate)
        }
    }

    pub fn grant_user_gesture(&mut self) {
        self.gesture_locked = false;
    }

    /// Move the clock forward without producing samples.
    pub fn advance(&mut self, secs: f64) {
        if self.opened && self.running && secs > 0.0 {
            self.frame += (secs * self.sample_rate as f64).round() as u64;
        }
    }

    /// Render interleaved frames; every channel carries the same mono mix.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        if !self.opened || !self.running {
            out.fill(0.0);
            return;
        }
        for frame in out.chunks_mut(channels) {
            let s = self.next_sample();
            frame.fill(s);
        }
    }

    pub fn render_mono(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        self.render(&mut out, 1);
        out
    }

    /// Number of live nodes, not counting the destination.
    pub fn live_node_count(&self) -> usize {
        self.nodes.iter().skip(1).filter(|n| n.is_some()).count()
    }

    pub fn live_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.slot(node).is_ok()
    }

    pub fn inputs(&self, node: NodeId) -> Vec<NodeId> {
        self.slot(node)
            .map(|s| s.inputs.to_vec())
            .unwrap_or_default()
    }

    /// Nodes summed into `param` on top of its automation.
    pub fn param_inputs(&self, param: ParamRef) -> Vec<NodeId> {
        self.slot(param.node)
            .ok()
            .and_then(|s| s.param(param.kind))
            .map(|p| p.inputs.to_vec())
            .unwrap_or_default()
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.slot(to).map_or(false, |s| s.inputs.contains(&from))
    }

    /// Whether a source node is producing output at the current time.
    pub fn is_playing(&self, node: NodeId) -> bool {
        let t = self.current_time();
        match self.slot(node).map(|s| &s.kind) {
            Ok(Kind::Oscillator { span, .. }) | Ok(Kind::BufferSource { span, .. }) => {
                span.active(t)
            }
            _ => false,
        }
    }

    /// Automation value of a parameter at an arbitrary time.
    pub fn param_value_at(&self, param: ParamRef, t: f64) -> Option<f32> {
        self.slot(param.node)
            .ok()
            .and_then(|s| s.param(param.kind))
            .map(|p| p.timeline.value_at(t))
    }

    fn slot(&self, node: NodeId) -> Result<&Slot, GraphError> {
        self.nodes
            .get(node.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(GraphError::UnknownNode(node))
    }

    fn slot_mut(&mut self, node: NodeId) -> Result<&mut Slot, GraphError> {
        self.nodes
            .get_mut(node.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(GraphError::UnknownNode(node))
    }

    fn ensure_open(&self) -> Result<(), GraphError> {
        if self.opened {
            Ok(())
        } else {
            Err(GraphError::Unavailable("context not opened".into()))
        }
    }

    fn insert(&mut self, slot: Slot) -> Result<NodeId, GraphError> {
        self.ensure_open()?;
        // Reuse freed slots so long sessions do not grow the arena.
        if let Some(i) = self.nodes.iter().skip(1).position(Option::is_none) {
            self.nodes[i + 1] = Some(slot);
            return Ok(NodeId(i as u32 + 1));
        }
        self.nodes.push(Some(slot));
        Ok(NodeId(self.nodes.len() as u32 - 1))
    }

    fn next_sample(&mut self) -> f32 {
        let t = self.current_time();
        self.pass += 1;
        let out = self.pull(DESTINATION.0 as usize, t);

        // Delay lines read before they write, which breaks feedback cycles.
        for i in 0..self.nodes.len() {
            let inputs = match &self.nodes[i] {
                Some(Slot {
                    kind: Kind::Delay { .. },
                    inputs,
                    ..
                }) => inputs.clone(),
                _ => continue,
            };
            let input: f32 = inputs.iter().map(|n| self.pull(n.0 as usize, t)).sum();
            if let Some(Slot {
                kind: Kind::Delay { line, write },
                ..
            }) = &mut self.nodes[i]
            {
                line[*write] = input;
                *write = (*write + 1) % line.len();
            }
        }

        self.frame += 1;
        out
    }

    fn input_at(&self, i: usize, k: usize) -> Option<NodeId> {
        self.nodes.get(i)?.as_ref()?.inputs.get(k).copied()
    }

    fn param_input_at(&self, i: usize, p: usize, k: usize) -> Option<NodeId> {
        self.nodes.get(i)?.as_ref()?.params.get(p)?.inputs.get(k).copied()
    }

    // Inputs are walked by index so the audio callback never allocates.
    fn pull(&mut self, i: usize, t: f64) -> f32 {
        let (param_kinds, is_delay) = match self.nodes.get_mut(i).and_then(Option::as_mut) {
            None => return 0.0,
            Some(slot) if slot.pass == self.pass => return slot.output,
            Some(slot) if slot.busy => return 0.0,
            Some(slot) => {
                slot.busy = true;
                let kinds: SmallVec<[ParamKind; 4]> =
                    slot.params.iter().map(|p| p.kind).collect();
                (kinds, matches!(slot.kind, Kind::Delay { .. }))
            }
        };

        let mut input = 0.0;
        if !is_delay {
            let mut k = 0;
            while let Some(n) = self.input_at(i, k) {
                input += self.pull(n.0 as usize, t);
                k += 1;
            }
        }
        let mut modulation: SmallVec<[(ParamKind, f32); 4]> = SmallVec::new();
        for (p, &kind) in param_kinds.iter().enumerate() {
            let mut k = 0;
            let mut sum = 0.0;
            while let Some(n) = self.param_input_at(i, p, k) {
                sum += self.pull(n.0 as usize, t);
                k += 1;
            }
            if k > 0 {
                modulation.push((kind, sum));
            }
        }

        let sample_rate = self.sample_rate;
        let pass = self.pass;
        let buffers = &self.buffers;
        let Some(slot) = self.nodes.get_mut(i).and_then(Option::as_mut) else {
            return 0.0;
        };
        let value = |slot: &Slot, kind: ParamKind| -> f32 {
            let base = slot.param(kind).map_or(0.0, |p| p.timeline.value_at(t));
            let modulated: f32 = modulation
                .iter()
                .filter(|(k, _)| *k == kind)
                .map(|(_, v)| v)
                .sum();
            base + modulated
        };

        let gain = value(slot, ParamKind::Gain);
        let frequency = value(slot, ParamKind::Frequency);
        let detune = value(slot, ParamKind::Detune);
        let q = value(slot, ParamKind::Q);
        let delay_time = value(slot, ParamKind::DelayTime);

        let output = match &mut slot.kind {
            Kind::Destination => input,
            Kind::Gain => input * gain,
            Kind::Filter(biquad) => {
                biquad.set_params(frequency, q);
                biquad.process(input)
            }
            Kind::Oscillator {
                waveform,
                phase,
                span,
            } => {
                if span.active(t) {
                    let out = wave_sample(*phase, *waveform);
                    *phase += detuned(frequency, detune) / sample_rate;
                    *phase -= phase.floor();
                    out
                } else {
                    0.0
                }
            }
            Kind::BufferSource {
                buffer,
                position,
                looping,
                span,
            } => match buffers.get(buffer.0 as usize) {
                Some(data) if span.active(t) && !data.is_empty() => {
                    let out = data[*position];
                    *position += 1;
                    if *position >= data.len() {
                        if *looping {
                            *position = 0;
                        } else {
                            span.stop = Some(t);
                        }
                    }
                    out
                }
                _ => 0.0,
            },
            Kind::Delay { line, write } => {
                let len = line.len();
                let d = ((delay_time * sample_rate).round() as usize).clamp(1, len - 1);
                line[(*write + len - d) % len]
            }
        };

        slot.output = output;
        slot.pass = pass;
        slot.busy = false;
        output
    }
}

impl AudioBackend for RenderGraph {
    fn open(&mut self) -> Result<(), GraphError> {
        if !self.available {
            return Err(GraphError::Unavailable("no audio device".into()));
        }
        if !self.opened {
            self.nodes.push(Some(Slot::new(Kind::Destination, &[])));
            self.opened = true;
            self.running = !self.gesture_locked;
        }
        Ok(())
    }

    fn resume(&mut self) -> Result<(), GraphError> {
        self.ensure_open()?;
        if self.gesture_locked {
            return Err(GraphError::AutoplayBlocked);
        }
        self.running = true;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), GraphError> {
        self.ensure_open()?;
        self.running = false;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.opened && self.running
    }

    fn current_time(&self) -> f64 {
        self.frame as f64 / self.sample_rate as f64
    }

    fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    fn destination(&self) -> Result<NodeId, GraphError> {
        self.ensure_open()?;
        Ok(DESTINATION)
    }

    fn create_gain(&mut self, initial: f32) -> Result<NodeId, GraphError> {
        self.insert(Slot::new(Kind::Gain, &[(ParamKind::Gain, initial)]))
    }

    fn create_filter(
        &mut self,
        kind: FilterKind,
        frequency: f32,
        q: f32,
    ) -> Result<NodeId, GraphError> {
        let biquad = Biquad::new(kind, self.sample_rate);
        self.insert(Slot::new(
            Kind::Filter(biquad),
            &[(ParamKind::Frequency, frequency), (ParamKind::Q, q)],
        ))
    }

    fn create_oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f32,
        detune_cents: f32,
    ) -> Result<NodeId, GraphError> {
        self.insert(Slot::new(
            Kind::Oscillator {
                waveform,
                phase: 0.0,
                span: Span::default(),
            },
            &[
                (ParamKind::Frequency, frequency),
                (ParamKind::Detune, detune_cents),
            ],
        ))
    }

    fn create_delay(&mut self, max_secs: f32, secs: f32) -> Result<NodeId, GraphError> {
        let len = ((max_secs.max(0.01) * self.sample_rate) as usize).max(2) + 1;
        self.insert(Slot::new(
            Kind::Delay {
                line: vec![0.0; len],
                write: 0,
            },
            &[(ParamKind::DelayTime, secs)],
        ))
    }

    fn create_buffer(&mut self, samples: &[f32]) -> Result<BufferId, GraphError> {
        self.ensure_open()?;
        self.buffers.push(Arc::from(samples));
        Ok(BufferId(self.buffers.len() as u32 - 1))
    }

    fn create_buffer_source(
        &mut self,
        buffer: BufferId,
        looping: bool,
    ) -> Result<NodeId, GraphError> {
        if buffer.0 as usize >= self.buffers.len() {
            return Err(GraphError::Platform(format!("unknown buffer {buffer:?}")));
        }
        self.insert(Slot::new(
            Kind::BufferSource {
                buffer,
                position: 0,
                looping,
                span: Span::default(),
            },
            &[],
        ))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.slot(from)?;
        let slot = self.slot_mut(to)?;
        if !slot.inputs.contains(&from) {
            slot.inputs.push(from);
        }
        Ok(())
    }

    fn connect_param(&mut self, from: NodeId, param: ParamRef) -> Result<(), GraphError> {
        self.slot(from)?;
        let slot = self.slot_mut(param.node)?;
        let p = slot
            .param_mut(param.kind)
            .ok_or(GraphError::NoSuchParam {
                node: param.node,
                param: param.kind.name(),
            })?;
        if !p.inputs.contains(&from) {
            p.inputs.push(from);
        }
        Ok(())
    }

    fn start(&mut self, node: NodeId, when: f64) -> Result<(), GraphError> {
        let span = self
            .slot_mut(node)?
            .kind
            .span_mut()
            .ok_or(GraphError::NotASource(node))?;
        if span.start.is_some() {
            return Err(GraphError::AlreadyStarted(node));
        }
        span.start = Some(when);
        Ok(())
    }

    fn stop(&mut self, node: NodeId, when: f64) -> Result<(), GraphError> {
        let span = self
            .slot_mut(node)?
            .kind
            .span_mut()
            .ok_or(GraphError::NotASource(node))?;
        if span.start.is_none() {
            return Err(GraphError::NotStarted(node));
        }
        if span.stop.is_some() {
            return Err(GraphError::AlreadyStopped(node));
        }
        span.stop = Some(when);
        Ok(())
    }

    fn release(&mut self, node: NodeId) {
        if node == DESTINATION {
            return;
        }
        let Some(entry) = self.nodes.get_mut(node.0 as usize) else {
            return;
        };
        if entry.take().is_none() {
            return;
        }
        for slot in self.nodes.iter_mut().flatten() {
            slot.inputs.retain(|n| *n != node);
            for p in slot.params.iter_mut() {
                p.inputs.retain(|n| *n != node);
            }
        }
    }

    fn automate(&mut self, param: ParamRef, event: ParamEvent) -> Result<(), GraphError> {
        let now = self.current_time();
        let p = self
            .slot_mut(param.node)?
            .param_mut(param.kind)
            .ok_or(GraphError::NoSuchParam {
                node: param.node,
                param: param.kind.name(),
            })?;
        p.timeline.insert(event, now)
    }

    fn param_value(&self, param: ParamRef) -> Result<f32, GraphError> {
        let p = self
            .slot(param.node)?
            .param(param.kind)
            .ok_or(GraphError::NoSuchParam {
                node: param.node,
                param: param.kind.name(),
            })?;
        Ok(p.timeline.value_at(self.current_time()))
    }
}

/// A [`RenderGraph`] shared between the control thread and an audio callback.
#[derive(Clone)]
pub struct SharedGraph(Arc<Mutex<RenderGraph>>);

impl SharedGraph {
    pub fn new(graph: RenderGraph) -> Self {
        Self(Arc::new(Mutex::new(graph)))
    }

    /// Lock the graph. A panic on another thread does not make the graph
    /// unusable, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, RenderGraph> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn render(&self, out: &mut [f32], channels: usize) {
        self.lock().render(out, channels);
    }
}

impl AudioBackend for SharedGraph {
    fn open(&mut self) -> Result<(), GraphError> {
        self.lock().open()
    }

    fn resume(&mut self) -> Result<(), GraphError> {
        self.lock().resume()
    }

    fn suspend(&mut self) -> Result<(), GraphError> {
        self.lock().suspend()
    }

    fn is_running(&self) -> bool {
        self.lock().is_running()
    }

    fn current_time(&self) -> f64 {
        self.lock().current_time()
    }

    fn sample_rate(&self) -> f32 {
        self.lock().sample_rate()
    }

    fn destination(&self) -> Result<NodeId, GraphError> {
        self.lock().destination()
    }

    fn create_gain(&mut self, initial: f32) -> Result<NodeId, GraphError> {
        self.lock().create_gain(initial)
    }

    fn create_filter(
        &mut self,
        kind: FilterKind,
        frequency: f32,
        q: f32,
    ) -> Result<NodeId, GraphError> {
        self.lock().create_filter(kind, frequency, q)
    }

    fn create_oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f32,
        detune_cents: f32,
    ) -> Result<NodeId, GraphError> {
        self.lock().create_oscillator(waveform, frequency, detune_cents)
    }

    fn create_delay(&mut self, max_secs: f32, secs: f32) -> Result<NodeId, GraphError> {
        self.lock().create_delay(max_secs, secs)
    }

    fn create_buffer(&mut self, samples: &[f32]) -> Result<BufferId, GraphError> {
        self.lock().create_buffer(samples)
    }

    fn create_buffer_source(
        &mut self,
        buffer: BufferId,
        looping: bool,
    ) -> Result<NodeId, GraphError> {
        self.lock().create_buffer_source(buffer, looping)
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.lock().connect(from, to)
    }

    fn connect_param(&mut self, from: NodeId, param: ParamRef) -> Result<(), GraphError> {
        self.lock().connect_param(from, param)
    }

    fn start(&mut self, node: NodeId, when: f64) -> Result<(), GraphError> {
        self.lock().start(node, when)
    }

    fn stop(&mut self, node: NodeId, when: f64) -> Result<(), GraphError> {
        self.lock().stop(node, when)
    }

    fn release(&mut self, node: NodeId) {
        self.lock().release(node)
    }

    fn automate(&mut self, param: ParamRef, event: ParamEvent) -> Result<(), GraphError> {
        self.lock().automate(param, event)
    }

    fn param_value(&self, param: ParamRef) -> Result<f32, GraphError> {
        self.lock().param_value(param)
    }
}
