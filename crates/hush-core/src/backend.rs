//! The seam between the engine and a real-time audio graph.
//!
//! The engine never touches platform objects directly. It creates nodes,
//! wires them and schedules parameter automation through [`AudioBackend`],
//! which is implemented by the WebAudio frontend and by the in-process
//! [`RenderGraph`](crate::render::RenderGraph) used natively and in tests.

use crate::error::GraphError;

/// Handle to a node owned by a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// Handle to a sample buffer uploaded to a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub u32);

/// Basic oscillator shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Square,
    Saw,
    Triangle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Bandpass,
}

/// Automatable parameters exposed by the node kinds the engine uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ParamKind {
    Gain,
    Frequency,
    Detune,
    Q,
    DelayTime,
}

impl ParamKind {
    pub fn name(self) -> &'static str {
        match self {
            ParamKind::Gain => "gain",
            ParamKind::Frequency => "frequency",
            ParamKind::Detune => "detune",
            ParamKind::Q => "Q",
            ParamKind::DelayTime => "delayTime",
        }
    }
}

/// A parameter of a specific node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub node: NodeId,
    pub kind: ParamKind,
}

impl ParamRef {
    pub fn gain(node: NodeId) -> Self {
        Self {
            node,
            kind: ParamKind::Gain,
        }
    }

    pub fn frequency(node: NodeId) -> Self {
        Self {
            node,
            kind: ParamKind::Frequency,
        }
    }
}

/// One scheduled change to a parameter, on the backend clock (seconds).
///
/// Mirrors the WebAudio `AudioParam` automation methods.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ParamEvent {
    SetValue { value: f32, at: f64 },
    LinearRamp { value: f32, end: f64 },
    ExponentialRamp { value: f32, end: f64 },
    SetTarget { value: f32, start: f64, tau: f64 },
    Cancel { from: f64 },
}

impl ParamEvent {
    /// Time at which the event takes effect (end time for ramps).
    pub fn time(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { at, .. } => at,
            ParamEvent::LinearRamp { end, .. } | ParamEvent::ExponentialRamp { end, .. } => end,
            ParamEvent::SetTarget { start, .. } => start,
            ParamEvent::Cancel { from } => from,
        }
    }
}

/// A real-time audio graph with its own sample clock.
///
/// Every call is non-blocking. Source nodes follow the WebAudio rule that a
/// node may be started once and stopped once; backends report violations as
/// [`GraphError::AlreadyStarted`] / [`GraphError::AlreadyStopped`].
pub trait AudioBackend {
    /// Create the underlying context if needed. Idempotent.
    fn open(&mut self) -> Result<(), GraphError>;
    /// Ask the context to run. May fail with [`GraphError::AutoplayBlocked`].
    fn resume(&mut self) -> Result<(), GraphError>;
    fn suspend(&mut self) -> Result<(), GraphError>;
    fn is_running(&self) -> bool;

    /// Current time of the sample clock in seconds.
    fn current_time(&self) -> f64;
    fn sample_rate(&self) -> f32;
    /// The hardware output node.
    fn destination(&self) -> Result<NodeId, GraphError>;

    fn create_gain(&mut self, initial: f32) -> Result<NodeId, GraphError>;
    fn create_filter(&mut self, kind: FilterKind, frequency: f32, q: f32)
        -> Result<NodeId, GraphError>;
    fn create_oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f32,
        detune_cents: f32,
    ) -> Result<NodeId, GraphError>;
    fn create_delay(&mut self, max_secs: f32, secs: f32) -> Result<NodeId, GraphError>;
    fn create_buffer(&mut self, samples: &[f32]) -> Result<BufferId, GraphError>;
    fn create_buffer_source(
        &mut self,
        buffer: BufferId,
        looping: bool,
    ) -> Result<NodeId, GraphError>;

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError>;
    /// Route a node's output into a parameter (audio-rate modulation).
    fn connect_param(&mut self, from: NodeId, param: ParamRef) -> Result<(), GraphError>;

    fn start(&mut self, node: NodeId, when: f64) -> Result<(), GraphError>;
    fn stop(&mut self, node: NodeId, when: f64) -> Result<(), GraphError>;
    /// Disconnect the node everywhere and drop it. Unknown ids are ignored.
    fn release(&mut self, node: NodeId);

    fn automate(&mut self, param: ParamRef, event: ParamEvent) -> Result<(), GraphError>;
    /// Value of the parameter's automation at the current clock time.
    fn param_value(&self, param: ParamRef) -> Result<f32, GraphError>;
}

/// Cancel pending automation and pin the parameter at its current value, so a
/// following ramp starts exactly where the signal is now.
pub fn anchor_param<B: AudioBackend + ?Sized>(
    backend: &mut B,
    param: ParamRef,
) -> Result<f32, GraphError> {
    let now = backend.current_time();
    let value = backend.param_value(param)?;
    backend.automate(param, ParamEvent::Cancel { from: now })?;
    backend.automate(param, ParamEvent::SetValue { value, at: now })?;
    Ok(value)
}
