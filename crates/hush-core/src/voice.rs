use crate::backend::{
    anchor_param, AudioBackend, BufferId, FilterKind, NodeId, ParamEvent, ParamRef, Waveform,
};
use crate::error::GraphError;
use crate::generators::{NoiseBank, NoiseColor};
use crate::melody::Melody;
use crate::soundscape::Soundscape;

/// Records every node a recipe creates so the voice can tear it all down.
pub struct VoiceBuilder<'a> {
    backend: &'a mut dyn AudioBackend,
    noise: &'a mut NoiseBank,
    output: NodeId,
    nodes: Vec<NodeId>,
    sources: Vec<NodeId>,
    melody: Option<Melody>,
}

impl<'a> VoiceBuilder<'a> {
    /// Node that recipes route their final signal into (the fade gain).
    pub fn output(&self) -> NodeId {
        self.output
    }

    pub fn gain(&mut self, initial: f32) -> Result<NodeId, GraphError> {
        let id = self.backend.create_gain(initial)?;
        self.nodes.push(id);
        Ok(id)
    }

    pub fn filter(
        &mut self,
        kind: FilterKind,
        frequency: f32,
        q: f32,
    ) -> Result<NodeId, GraphError> {
        let id = self.backend.create_filter(kind, frequency, q)?;
        self.nodes.push(id);
        Ok(id)
    }

    pub fn delay(&mut self, max_secs: f32, secs: f32) -> Result<NodeId, GraphError> {
        let id = self.backend.create_delay(max_secs, secs)?;
        self.nodes.push(id);
        Ok(id)
    }

    pub fn oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f32,
        detune_cents: f32,
    ) -> Result<NodeId, GraphError> {
        let id = self
            .backend
            .create_oscillator(waveform, frequency, detune_cents)?;
        self.nodes.push(id);
        self.sources.push(id);
        Ok(id)
    }

    pub fn buffer_source(&mut self, buffer: BufferId, looping: bool) -> Result<NodeId, GraphError> {
        let id = self.backend.create_buffer_source(buffer, looping)?;
        self.nodes.push(id);
        self.sources.push(id);
        Ok(id)
    }

    pub fn noise_buffer(&mut self, color: NoiseColor) -> Result<BufferId, GraphError> {
        self.noise.buffer(&mut *self.backend, color)
    }

    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        self.backend.connect(from, to)
    }

    pub fn connect_param(&mut self, from: NodeId, param: ParamRef) -> Result<(), GraphError> {
        self.backend.connect_param(from, param)
    }

    /// Connect a chain of nodes in order.
    pub fn chain(&mut self, nodes: &[NodeId]) -> Result<(), GraphError> {
        for pair in nodes.windows(2) {
            self.backend.connect(pair[0], pair[1])?;
        }
        Ok(())
    }

    pub fn set_melody(&mut self, melody: Melody) {
        self.melody = Some(melody);
    }
}

/// One playing soundscape's sub-graph.
///
/// Owned by the transport controller. Every node the recipe created is listed
/// in `nodes`; the startable ones are also in `sources`. Melody notes live in
/// the melody's own in-flight list and are released with the voice.
pub struct Voice {
    id: Soundscape,
    serial: u64,
    fade: NodeId,
    nodes: Vec<NodeId>,
    sources: Vec<NodeId>,
    melody: Option<Melody>,
}

impl Voice {
    /// Build the recipe for `id` behind a fresh fade gain wired to `target`.
    /// On failure every node created so far is released.
    pub fn build(
        backend: &mut dyn AudioBackend,
        noise: &mut NoiseBank,
        id: Soundscape,
        serial: u64,
        target: NodeId,
    ) -> Result<Voice, GraphError> {
        let fade = backend.create_gain(0.0)?;
        if let Err(e) = backend.connect(fade, target) {
            backend.release(fade);
            return Err(e);
        }

        let mut builder = VoiceBuilder {
            backend,
            noise,
            output: fade,
            nodes: Vec::new(),
            sources: Vec::new(),
            melody: None,
        };
        let recipe = id.recipe();
        let built = recipe(&mut builder);
        let VoiceBuilder {
            backend,
            nodes,
            sources,
            melody,
            ..
        } = builder;

        let mut voice = Voice {
            id,
            serial,
            fade,
            nodes,
            sources,
            melody,
        };
        match built {
            Ok(()) => Ok(voice),
            Err(e) => {
                voice.sources.clear();
                voice.release(backend);
                Err(e)
            }
        }
    }

    /// Start every source now and ramp the fade gain 0 -> 1 over `fade_secs`.
    pub fn start(
        &mut self,
        backend: &mut dyn AudioBackend,
        fade_secs: f64,
    ) -> Result<(), GraphError> {
        let now = backend.current_time();
        for &source in &self.sources {
            backend.start(source, now)?;
        }
        let gain = ParamRef::gain(self.fade);
        backend.automate(gain, ParamEvent::Cancel { from: now })?;
        backend.automate(
            gain,
            ParamEvent::SetValue {
                value: 0.0,
                at: now,
            },
        )?;
        backend.automate(
            gain,
            ParamEvent::LinearRamp {
                value: 1.0,
                end: now + fade_secs,
            },
        )?;
        if let Some(melody) = self.melody.as_mut() {
            melody.begin(now);
        }
        Ok(())
    }

    /// Ramp the fade gain from wherever it is down to silence.
    pub fn fade_out(&self, backend: &mut dyn AudioBackend, secs: f64) -> Result<(), GraphError> {
        let gain = ParamRef::gain(self.fade);
        anchor_param(backend, gain)?;
        let end = backend.current_time() + secs;
        backend.automate(gain, ParamEvent::LinearRamp { value: 0.0, end })
    }

    /// Advance the melody scheduler, if this voice has one.
    pub fn step_melody(&mut self, backend: &mut dyn AudioBackend) -> Result<usize, GraphError> {
        match self.melody.as_mut() {
            Some(melody) => melody.advance(backend),
            None => Ok(0),
        }
    }

    /// Stop every source and drop every node. Double-teardown errors from the
    /// backend are expected here and ignored.
    pub fn release(mut self, backend: &mut dyn AudioBackend) {
        let now = backend.current_time();
        for &source in &self.sources {
            stop_quietly(backend, source, now);
        }
        if let Some(melody) = self.melody.as_mut() {
            melody.release(backend);
        }
        for &node in &self.nodes {
            backend.release(node);
        }
        backend.release(self.fade);
        log::debug!(
            "[voice] released {} #{} ({} nodes)",
            self.id,
            self.serial,
            self.nodes.len() + 1
        );
    }

    pub fn id(&self) -> Soundscape {
        self.id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn fade_gain(&self) -> NodeId {
        self.fade
    }

    pub fn has_melody(&self) -> bool {
        self.melody.is_some()
    }

    pub fn melody(&self) -> Option<&Melody> {
        self.melody.as_ref()
    }

    /// Every node currently owned by the voice, fade gain included.
    pub fn nodes(&self) -> Vec<NodeId> {
        let mut all = self.nodes.clone();
        all.push(self.fade);
        if let Some(melody) = &self.melody {
            all.extend(melody.nodes());
        }
        all
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len() + 1 + self.melody.as_ref().map_or(0, |m| m.node_count())
    }
}

/// Stop a source, treating "already stopped" and "never started" as done.
pub(crate) fn stop_quietly(backend: &mut dyn AudioBackend, node: NodeId, when: f64) {
    match backend.stop(node, when) {
        Ok(()) => {}
        Err(GraphError::AlreadyStopped(_)) | Err(GraphError::NotStarted(_)) => {
            log::trace!("[voice] {:?} already stopped", node);
        }
        Err(e) => log::warn!("[voice] stop {:?} failed: {}", node, e),
    }
}
