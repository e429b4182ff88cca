//! Transport controller: the public face of the engine.
//!
//! Owns the backend, the master path, the active voice, voices that are
//! fading out, and the task queue that releases them. No control call returns
//! an error; failures are absorbed here and logged.

use crate::backend::{AudioBackend, NodeId};
use crate::constants::{
    BEAT_RELEASE_MARGIN_SEC, DEFAULT_NOISE_SEED, HARD_STOP_SEC, HEARTBEAT_LEAD_SEC,
    HEARTBEAT_PERIOD_SEC, LONG_FADE_SEC, MELODY_STEP_SEC, MIN_FADE_SEC, NOISE_BUFFER_SEC,
    VOLUME_CURVE_EXPONENT,
};
use crate::error::GraphError;
use crate::generators::NoiseBank;
use crate::heartbeat::Heartbeat;
use crate::master::{clamp_fade, perceptual_gain, MasterPath, MasterState};
use crate::scheduler::{Scheduler, Task};
use crate::soundscape::Soundscape;
use crate::voice::Voice;
use fnv::FnvHashMap;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EngineConfig {
    pub noise_seed: u64,
    pub noise_buffer_secs: f32,
    pub volume_exponent: f32,
    /// Fade used when the sleep timer runs out.
    pub long_fade_secs: f64,
    /// Fade used by an abrupt stop.
    pub hard_stop_secs: f64,
    pub min_fade_secs: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            noise_seed: DEFAULT_NOISE_SEED,
            noise_buffer_secs: NOISE_BUFFER_SEC,
            volume_exponent: VOLUME_CURVE_EXPONENT,
            long_fade_secs: LONG_FADE_SEC,
            hard_stop_secs: HARD_STOP_SEC,
            min_fade_secs: MIN_FADE_SEC,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
    Idle,
    Playing(Soundscape),
    Paused(Soundscape),
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Idle => f.write_str("idle"),
            Transport::Playing(id) => write!(f, "playing {}", id),
            Transport::Paused(id) => write!(f, "paused {}", id),
        }
    }
}

pub struct Engine<B: AudioBackend> {
    backend: B,
    config: EngineConfig,
    settings: MasterState,
    transport: Transport,
    master: Option<MasterPath>,
    noise: NoiseBank,
    active: Option<Voice>,
    retiring: FnvHashMap<u64, Voice>,
    heartbeat: Heartbeat,
    scheduler: Scheduler,
    transient_nodes: usize,
    next_serial: u64,
    unavailable_logged: bool,
}

impl<B: AudioBackend> Engine<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, EngineConfig::default(), MasterState::default())
    }

    pub fn with_config(backend: B, config: EngineConfig, settings: MasterState) -> Self {
        let mut settings = settings;
        settings.volume = if settings.volume.is_finite() {
            settings.volume.clamp(0.0, 1.0)
        } else {
            MasterState::default().volume
        };
        settings.fade_secs = clamp_fade(settings.fade_secs, config.min_fade_secs);
        Self {
            noise: NoiseBank::new(config.noise_seed, config.noise_buffer_secs),
            backend,
            config,
            settings,
            transport: Transport::Idle,
            master: None,
            active: None,
            retiring: FnvHashMap::default(),
            heartbeat: Heartbeat::default(),
            scheduler: Scheduler::new(),
            transient_nodes: 0,
            next_serial: 0,
            unavailable_logged: false,
        }
    }

    // ---- transport ----

    /// Start `id`, crossfading from whatever is playing. Every call retries
    /// the context resume; a voice already playing `id` is kept.
    pub fn play(&mut self, id: Soundscape) {
        let master = self.ensure_context();
        if let Err(e) = self.backend.resume() {
            self.absorb("resume", e);
        }
        if self.active.as_ref().map(Voice::id) == Some(id) {
            self.transport = Transport::Playing(id);
            return;
        }
        let fade = self.settings.fade_secs;
        self.retire_active(fade);
        self.transport = Transport::Playing(id);

        let Some(master) = master else {
            return;
        };
        self.apply_master(&master);

        self.next_serial += 1;
        let serial = self.next_serial;
        let built = Voice::build(
            &mut self.backend,
            &mut self.noise,
            id,
            serial,
            master.input(),
        );
        let mut voice = match built {
            Ok(voice) => voice,
            Err(e) => {
                log::warn!("[engine] could not build {}: {}", id, e);
                return;
            }
        };
        if let Err(e) = voice.start(&mut self.backend, fade) {
            log::warn!("[engine] could not start {}: {}", id, e);
            voice.release(&mut self.backend);
            return;
        }
        let now = self.backend.current_time();
        if voice.has_melody() {
            self.scheduler.schedule(now, Task::MelodyStep { serial });
        }
        log::debug!("[engine] playing {} #{} ({} nodes)", id, serial, voice.node_count());
        self.active = Some(voice);

        if self.settings.heartbeat && !self.heartbeat.is_armed() {
            self.arm_heartbeat();
        }
    }

    /// Fade out and release the current voice, remembering which one it was.
    pub fn pause(&mut self) {
        let Transport::Playing(id) = self.transport else {
            return;
        };
        let fade = self.settings.fade_secs;
        self.retire_active(fade);
        self.heartbeat.disarm();
        self.transport = Transport::Paused(id);
        log::debug!("[engine] paused {}", id);
    }

    /// Tear everything down. `fade_out == false` is an abrupt stop; otherwise
    /// the configured fade, or the long fade for the sleep timer.
    pub fn stop_all(&mut self, fade_out: bool, long_fade: bool) {
        let secs = match (fade_out, long_fade) {
            (false, _) => self.config.hard_stop_secs,
            (true, true) => self.config.long_fade_secs,
            (true, false) => self.settings.fade_secs,
        };
        self.retire_active(clamp_fade(secs, self.config.min_fade_secs));
        self.heartbeat.disarm();
        if self.transport != Transport::Idle {
            log::debug!("[engine] stopped over {:.2}s", secs);
        }
        self.transport = Transport::Idle;
    }

    // ---- master settings ----

    pub fn set_volume(&mut self, volume: f32) {
        if !volume.is_finite() {
            log::warn!("[engine] ignoring volume {}", volume);
            return;
        }
        self.settings.volume = volume.clamp(0.0, 1.0);
        self.refresh_gain();
    }

    pub fn toggle_mute(&mut self, muted: bool) {
        self.settings.muted = muted;
        self.refresh_gain();
    }

    pub fn set_warmth(&mut self, warm: bool) {
        self.settings.warmth = warm;
        if let Some(master) = self.master {
            if let Err(e) = master.apply_warmth(&mut self.backend, warm) {
                self.absorb("warmth", e);
            }
        }
    }

    pub fn set_fade_time(&mut self, secs: f64) {
        self.settings.fade_secs = clamp_fade(secs, self.config.min_fade_secs);
    }

    /// Enable or disable the heartbeat overlay. It only sounds while a voice
    /// is playing.
    pub fn toggle_heartbeat_layer(&mut self, enabled: bool) {
        self.settings.heartbeat = enabled;
        if !enabled {
            self.heartbeat.disarm();
            return;
        }
        let playing = matches!(self.transport, Transport::Playing(_));
        if playing && self.master.is_some() && !self.heartbeat.is_armed() {
            self.arm_heartbeat();
        }
    }

    // ---- lifecycle ----

    /// Ask the context to run again, e.g. after the host regains focus.
    pub fn resume(&mut self) {
        if self.master.is_none() {
            return;
        }
        if let Err(e) = self.backend.resume() {
            self.absorb("resume", e);
        }
    }

    pub fn suspend(&mut self) {
        if self.master.is_none() {
            return;
        }
        if let Err(e) = self.backend.suspend() {
            self.absorb("suspend", e);
        }
    }

    /// Run every scheduled task that is due on the backend clock. Hosts call
    /// this periodically.
    pub fn tick(&mut self) {
        let now = self.backend.current_time();
        while let Some((at, task)) = self.scheduler.pop_due(now) {
            self.run(at, now, task);
        }
    }

    // ---- observers ----

    pub fn state(&self) -> Transport {
        self.transport
    }

    pub fn settings(&self) -> &MasterState {
        &self.settings
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn active_voice(&self) -> Option<&Voice> {
        self.active.as_ref()
    }

    pub fn retiring_voice_count(&self) -> usize {
        self.retiring.len()
    }

    /// Ids of every node owned by a voice, including voices still fading out.
    pub fn voice_nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self
            .active
            .iter()
            .chain(self.retiring.values())
            .flat_map(Voice::nodes)
            .collect();
        nodes.sort();
        nodes
    }

    /// Nodes owned by voices and heartbeat beats. The master path is not
    /// counted.
    pub fn tracked_node_count(&self) -> usize {
        self.active.as_ref().map_or(0, Voice::node_count)
            + self.retiring.values().map(Voice::node_count).sum::<usize>()
            + self.transient_nodes
    }

    pub fn beats_scheduled(&self) -> u64 {
        self.heartbeat.beats_scheduled()
    }

    pub fn heartbeat_armed(&self) -> bool {
        self.heartbeat.is_armed()
    }

    pub fn pending_tasks(&self) -> usize {
        self.scheduler.len()
    }

    pub fn master_path(&self) -> Option<&MasterPath> {
        self.master.as_ref()
    }

    /// Gain the master path is heading for with the current settings.
    pub fn master_gain_target(&self) -> f32 {
        perceptual_gain(
            self.settings.volume,
            self.settings.muted,
            self.config.volume_exponent,
        )
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    // ---- internals ----

    fn ensure_context(&mut self) -> Option<MasterPath> {
        if self.master.is_some() {
            return self.master;
        }
        let built = self
            .backend
            .open()
            .and_then(|()| MasterPath::build(&mut self.backend));
        match built {
            Ok(path) => {
                log::info!(
                    "[engine] audio context open at {} Hz",
                    self.backend.sample_rate()
                );
                self.master = Some(path);
                Some(path)
            }
            Err(e) => {
                self.absorb("open", e);
                None
            }
        }
    }

    fn apply_master(&mut self, master: &MasterPath) {
        let target = self.master_gain_target();
        if let Err(e) = master.apply_gain(&mut self.backend, target) {
            self.absorb("master gain", e);
        }
        if let Err(e) = master.apply_warmth(&mut self.backend, self.settings.warmth) {
            self.absorb("warmth", e);
        }
    }

    fn refresh_gain(&mut self) {
        let Some(master) = self.master else {
            return;
        };
        let target = self.master_gain_target();
        if let Err(e) = master.apply_gain(&mut self.backend, target) {
            self.absorb("master gain", e);
        }
    }

    /// Fade the active voice out and queue its release for when the fade ends.
    /// A stalled clock would never reach that time, and nothing is audible
    /// then, so the voice is released at once.
    fn retire_active(&mut self, secs: f64) {
        let Some(voice) = self.active.take() else {
            return;
        };
        if !self.backend.is_running() {
            log::debug!("[engine] context not running, releasing {} now", voice.id());
            voice.release(&mut self.backend);
            return;
        }
        if let Err(e) = voice.fade_out(&mut self.backend, secs) {
            log::warn!(
                "[engine] fade-out of {} failed, releasing now: {}",
                voice.id(),
                e
            );
            voice.release(&mut self.backend);
            return;
        }
        let at = self.backend.current_time() + secs;
        let serial = voice.serial();
        self.scheduler.schedule(at, Task::ReleaseVoice { serial });
        self.retiring.insert(serial, voice);
    }

    fn arm_heartbeat(&mut self) {
        let generation = self.heartbeat.arm();
        let now = self.backend.current_time();
        self.scheduler.schedule(now, Task::HeartbeatCycle { generation });
    }

    fn run(&mut self, at: f64, now: f64, task: Task) {
        match task {
            Task::ReleaseVoice { serial } => {
                if let Some(voice) = self.retiring.remove(&serial) {
                    voice.release(&mut self.backend);
                }
            }
            Task::ReleaseNodes(nodes) => {
                for &node in &nodes {
                    self.backend.release(node);
                }
                self.transient_nodes = self.transient_nodes.saturating_sub(nodes.len());
            }
            Task::HeartbeatCycle { generation } => {
                self.heartbeat_cycle(at, now, generation)
            }
            Task::MelodyStep { serial } => self.melody_step(now, serial),
        }
    }

    fn heartbeat_cycle(&mut self, at: f64, now: f64, generation: u64) {
        if !self.heartbeat.is_current(generation) {
            return;
        }
        let Some(master) = self.master else {
            return;
        };
        let start = at.max(now) + HEARTBEAT_LEAD_SEC;
        match self
            .heartbeat
            .schedule_cycle(&mut self.backend, master.input(), start)
        {
            Ok(beats) => {
                for beat in beats {
                    self.transient_nodes += beat.nodes.len();
                    self.scheduler.schedule(
                        beat.ends_at + BEAT_RELEASE_MARGIN_SEC,
                        Task::ReleaseNodes(beat.nodes),
                    );
                }
            }
            Err(e) => self.absorb("heartbeat", e),
        }

        // Skip cycles that were missed while the host was not ticking.
        let mut next = at + HEARTBEAT_PERIOD_SEC;
        while next <= now {
            next += HEARTBEAT_PERIOD_SEC;
        }
        self.scheduler
            .schedule(next, Task::HeartbeatCycle { generation });
    }

    fn melody_step(&mut self, now: f64, serial: u64) {
        let Some(voice) = self.active.as_mut() else {
            return;
        };
        if voice.serial() != serial {
            return;
        }
        if let Err(e) = voice.step_melody(&mut self.backend) {
            log::warn!("[engine] melody step failed: {}", e);
        }
        self.scheduler
            .schedule(now + MELODY_STEP_SEC, Task::MelodyStep { serial });
    }

    fn absorb(&mut self, what: &str, err: GraphError) {
        match err {
            GraphError::AutoplayBlocked => {
                log::debug!("[engine] {}: waiting for a user gesture", what);
            }
            GraphError::Unavailable(reason) => {
                if !self.unavailable_logged {
                    log::warn!("[engine] audio unavailable, running silent: {}", reason);
                    self.unavailable_logged = true;
                }
            }
            other => log::warn!("[engine] {} failed: {}", what, other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::RenderGraph;

    fn engine() -> Engine<RenderGraph> {
        Engine::new(RenderGraph::new(8_000.0))
    }

    #[test]
    fn starts_idle_without_touching_the_backend() {
        let e = engine();
        assert_eq!(e.state(), Transport::Idle);
        assert!(e.master_path().is_none());
        assert_eq!(e.tracked_node_count(), 0);
    }

    #[test]
    fn play_opens_the_context_and_builds_one_voice() {
        let mut e = engine();
        e.play(Soundscape::PinkNoise);
        assert_eq!(e.state(), Transport::Playing(Soundscape::PinkNoise));
        assert!(e.master_path().is_some());
        assert_eq!(e.active_voice().map(Voice::id), Some(Soundscape::PinkNoise));
        assert_eq!(e.retiring_voice_count(), 0);
    }

    #[test]
    fn replaying_the_same_soundscape_is_a_no_op() {
        let mut e = engine();
        e.play(Soundscape::Rain);
        let serial = e.active_voice().map(Voice::serial);
        e.play(Soundscape::Rain);
        assert_eq!(e.active_voice().map(Voice::serial), serial);
        assert_eq!(e.retiring_voice_count(), 0);
    }

    #[test]
    fn pause_from_idle_stays_idle() {
        let mut e = engine();
        e.pause();
        assert_eq!(e.state(), Transport::Idle);
    }

    #[test]
    fn fade_time_is_clamped() {
        let mut e = engine();
        e.set_fade_time(-1.0);
        assert_eq!(e.settings().fade_secs, MIN_FADE_SEC);
        e.set_fade_time(3.0);
        assert_eq!(e.settings().fade_secs, 3.0);
    }

    #[test]
    fn non_finite_volume_is_ignored() {
        let mut e = engine();
        e.set_volume(0.3);
        e.set_volume(f32::NAN);
        assert_eq!(e.settings().volume, 0.3);
    }

    #[test]
    fn transport_displays_its_soundscape() {
        assert_eq!(Transport::Playing(Soundscape::Ocean).to_string(), "playing ocean");
        assert_eq!(Transport::Idle.to_string(), "idle");
    }
}
