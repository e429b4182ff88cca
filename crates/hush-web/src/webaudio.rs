use fnv::FnvHashMap;
use hush_core::{
    AudioBackend, BufferId, FilterKind, GraphError, NodeId, ParamEvent, ParamKind, ParamRef,
    Waveform,
};
use wasm_bindgen::JsValue;
use wasm_bindgen_futures::{spawn_local, JsFuture};
use web_sys as web;

const DESTINATION: NodeId = NodeId(0);

#[derive(Clone, Copy, Default)]
struct Playback {
    started: bool,
    stopped: bool,
}

enum WebNode {
    Destination(web::AudioDestinationNode),
    Gain(web::GainNode),
    Filter(web::BiquadFilterNode),
    Delay(web::DelayNode),
    Oscillator(web::OscillatorNode, Playback),
    Buffer(web::AudioBufferSourceNode, Playback),
}

impl WebNode {
    fn audio_node(&self) -> &web::AudioNode {
        match self {
            WebNode::Destination(n) => n,
            WebNode::Gain(n) => n,
            WebNode::Filter(n) => n,
            WebNode::Delay(n) => n,
            WebNode::Oscillator(n, _) => n,
            WebNode::Buffer(n, _) => n,
        }
    }

    fn param(&self, kind: ParamKind) -> Option<web::AudioParam> {
        match (self, kind) {
            (WebNode::Gain(n), ParamKind::Gain) => Some(n.gain()),
            (WebNode::Filter(n), ParamKind::Frequency) => Some(n.frequency()),
            (WebNode::Filter(n), ParamKind::Q) => Some(n.q()),
            (WebNode::Filter(n), ParamKind::Detune) => Some(n.detune()),
            (WebNode::Delay(n), ParamKind::DelayTime) => Some(n.delay_time()),
            (WebNode::Oscillator(n, _), ParamKind::Frequency) => Some(n.frequency()),
            (WebNode::Oscillator(n, _), ParamKind::Detune) => Some(n.detune()),
            _ => None,
        }
    }

    fn scheduled(&mut self) -> Option<(&web::AudioScheduledSourceNode, &mut Playback)> {
        match self {
            WebNode::Oscillator(n, p) => Some((&**n, p)),
            WebNode::Buffer(n, p) => Some((&**n, p)),
            _ => None,
        }
    }
}

fn js_err(e: JsValue) -> GraphError {
    GraphError::Platform(format!("{:?}", e))
}

/// [`AudioBackend`] over a browser `AudioContext`.
///
/// The context is created on the first `open`, which hosts should trigger
/// from a user gesture.
#[derive(Default)]
pub struct WebAudio {
    ctx: Option<web::AudioContext>,
    nodes: FnvHashMap<NodeId, WebNode>,
    buffers: FnvHashMap<BufferId, web::AudioBuffer>,
    next_node: u32,
    next_buffer: u32,
}

impl WebAudio {
    pub fn new() -> Self {
        Self::default()
    }

    fn ctx(&self) -> Result<&web::AudioContext, GraphError> {
        self.ctx
            .as_ref()
            .ok_or_else(|| GraphError::Unavailable("audio context not open".into()))
    }

    fn node(&self, id: NodeId) -> Result<&WebNode, GraphError> {
        self.nodes.get(&id).ok_or(GraphError::UnknownNode(id))
    }

    fn insert(&mut self, node: WebNode) -> NodeId {
        self.next_node += 1;
        let id = NodeId(self.next_node);
        self.nodes.insert(id, node);
        id
    }

    fn audio_param(&self, param: ParamRef) -> Result<web::AudioParam, GraphError> {
        self.node(param.node)?
            .param(param.kind)
            .ok_or(GraphError::NoSuchParam {
                node: param.node,
                param: param.kind.name(),
            })
    }
}

// Promise rejections from resume/suspend surface asynchronously; log them.
fn watch(promise: js_sys::Promise, what: &'static str) {
    spawn_local(async move {
        if let Err(e) = JsFuture::from(promise).await {
            log::warn!("[webaudio] {} rejected: {:?}", what, e);
        }
    });
}

impl AudioBackend for WebAudio {
    fn open(&mut self) -> Result<(), GraphError> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let ctx = web::AudioContext::new()
            .map_err(|e| GraphError::Unavailable(format!("{:?}", e)))?;
        self.nodes
            .insert(DESTINATION, WebNode::Destination(ctx.destination()));
        log::info!("[webaudio] context created at {} Hz", ctx.sample_rate());
        self.ctx = Some(ctx);
        Ok(())
    }

    fn resume(&mut self) -> Result<(), GraphError> {
        let ctx = self.ctx()?;
        if ctx.state() == web::AudioContextState::Running {
            return Ok(());
        }
        let promise = ctx.resume().map_err(js_err)?;
        watch(promise, "resume");
        if ctx.state() == web::AudioContextState::Running {
            Ok(())
        } else {
            Err(GraphError::AutoplayBlocked)
        }
    }

    fn suspend(&mut self) -> Result<(), GraphError> {
        let promise = self.ctx()?.suspend().map_err(js_err)?;
        watch(promise, "suspend");
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.ctx
            .as_ref()
            .map_or(false, |c| c.state() == web::AudioContextState::Running)
    }

    fn current_time(&self) -> f64 {
        self.ctx.as_ref().map_or(0.0, |c| c.current_time())
    }

    fn sample_rate(&self) -> f32 {
        self.ctx.as_ref().map_or(48_000.0, |c| c.sample_rate())
    }

    fn destination(&self) -> Result<NodeId, GraphError> {
        self.ctx()?;
        Ok(DESTINATION)
    }

    fn create_gain(&mut self, initial: f32) -> Result<NodeId, GraphError> {
        let gain = web::GainNode::new(self.ctx()?).map_err(|e| {
            log::error!("GainNode error: {:?}", e);
            js_err(e)
        })?;
        gain.gain().set_value(initial);
        Ok(self.insert(WebNode::Gain(gain)))
    }

    fn create_filter(
        &mut self,
        kind: FilterKind,
        frequency: f32,
        q: f32,
    ) -> Result<NodeId, GraphError> {
        let filter = web::BiquadFilterNode::new(self.ctx()?).map_err(|e| {
            log::error!("BiquadFilterNode error: {:?}", e);
            js_err(e)
        })?;
        filter.set_type(match kind {
            FilterKind::Lowpass => web::BiquadFilterType::Lowpass,
            FilterKind::Highpass => web::BiquadFilterType::Highpass,
            FilterKind::Bandpass => web::BiquadFilterType::Bandpass,
        });
        filter.frequency().set_value(frequency);
        filter.q().set_value(q);
        Ok(self.insert(WebNode::Filter(filter)))
    }

    fn create_oscillator(
        &mut self,
        waveform: Waveform,
        frequency: f32,
        detune_cents: f32,
    ) -> Result<NodeId, GraphError> {
        let osc = web::OscillatorNode::new(self.ctx()?).map_err(|e| {
            log::error!("OscillatorNode error: {:?}", e);
            js_err(e)
        })?;
        match waveform {
            Waveform::Sine => osc.set_type(web::OscillatorType::Sine),
            Waveform::Square => osc.set_type(web::OscillatorType::Square),
            Waveform::Saw => osc.set_type(web::OscillatorType::Sawtooth),
            Waveform::Triangle => osc.set_type(web::OscillatorType::Triangle),
        }
        osc.frequency().set_value(frequency);
        osc.detune().set_value(detune_cents);
        Ok(self.insert(WebNode::Oscillator(osc, Playback::default())))
    }

    fn create_delay(&mut self, max_secs: f32, secs: f32) -> Result<NodeId, GraphError> {
        let delay = self
            .ctx()?
            .create_delay_with_max_delay_time(max_secs as f64)
            .map_err(|e| {
                log::error!("DelayNode error: {:?}", e);
                js_err(e)
            })?;
        delay.delay_time().set_value(secs);
        Ok(self.insert(WebNode::Delay(delay)))
    }

    fn create_buffer(&mut self, samples: &[f32]) -> Result<BufferId, GraphError> {
        let ctx = self.ctx()?;
        let len = samples.len().max(1) as u32;
        let buffer = ctx
            .create_buffer(1, len, ctx.sample_rate())
            .map_err(js_err)?;
        let mut data = samples.to_vec();
        buffer.copy_to_channel(&mut data, 0).map_err(js_err)?;
        self.next_buffer += 1;
        let id = BufferId(self.next_buffer);
        self.buffers.insert(id, buffer);
        Ok(id)
    }

    fn create_buffer_source(
        &mut self,
        buffer: BufferId,
        looping: bool,
    ) -> Result<NodeId, GraphError> {
        let data = self
            .buffers
            .get(&buffer)
            .ok_or_else(|| GraphError::Platform(format!("unknown buffer {:?}", buffer)))?;
        let source = self.ctx()?.create_buffer_source().map_err(js_err)?;
        source.set_buffer(Some(data));
        source.set_loop(looping);
        Ok(self.insert(WebNode::Buffer(source, Playback::default())))
    }

    fn connect(&mut self, from: NodeId, to: NodeId) -> Result<(), GraphError> {
        let target = self.node(to)?.audio_node();
        self.node(from)?
            .audio_node()
            .connect_with_audio_node(target)
            .map(|_| ())
            .map_err(js_err)
    }

    fn connect_param(&mut self, from: NodeId, param: ParamRef) -> Result<(), GraphError> {
        let target = self.audio_param(param)?;
        self.node(from)?
            .audio_node()
            .connect_with_audio_param(&target)
            .map_err(js_err)
    }

    fn start(&mut self, node: NodeId, when: f64) -> Result<(), GraphError> {
        let entry = self.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        let (source, playback) = entry.scheduled().ok_or(GraphError::NotASource(node))?;
        if playback.started {
            return Err(GraphError::AlreadyStarted(node));
        }
        source.start_with_when(when).map_err(js_err)?;
        playback.started = true;
        Ok(())
    }

    fn stop(&mut self, node: NodeId, when: f64) -> Result<(), GraphError> {
        let entry = self.nodes.get_mut(&node).ok_or(GraphError::UnknownNode(node))?;
        let (source, playback) = entry.scheduled().ok_or(GraphError::NotASource(node))?;
        if !playback.started {
            return Err(GraphError::NotStarted(node));
        }
        if playback.stopped {
            return Err(GraphError::AlreadyStopped(node));
        }
        source.stop_with_when(when).map_err(js_err)?;
        playback.stopped = true;
        Ok(())
    }

    fn release(&mut self, node: NodeId) {
        if node == DESTINATION {
            return;
        }
        if let Some(entry) = self.nodes.remove(&node) {
            let _ = entry.audio_node().disconnect();
        }
    }

    fn automate(&mut self, param: ParamRef, event: ParamEvent) -> Result<(), GraphError> {
        let p = self.audio_param(param)?;
        let scheduled = match event {
            ParamEvent::SetValue { value, at } => p.set_value_at_time(value, at),
            ParamEvent::LinearRamp { value, end } => p.linear_ramp_to_value_at_time(value, end),
            ParamEvent::ExponentialRamp { value, end } => {
                if value <= 0.0 {
                    return Err(GraphError::InvalidValue(value));
                }
                p.exponential_ramp_to_value_at_time(value, end)
            }
            ParamEvent::SetTarget { value, start, tau } => {
                p.set_target_at_time(value, start, tau)
            }
            ParamEvent::Cancel { from } => p.cancel_scheduled_values(from),
        };
        scheduled.map(|_| ()).map_err(js_err)
    }

    fn param_value(&self, param: ParamRef) -> Result<f32, GraphError> {
        Ok(self.audio_param(param)?.value())
    }
}
