// Shared tuning constants used by the engine and both frontends.

// Master path
pub const VOLUME_CURVE_EXPONENT: f32 = 2.5; // slider -> gain perceptual exponent
pub const MASTER_SMOOTHING_TAU_SEC: f64 = 0.05; // set-target time constant for volume/mute
pub const WARMTH_CUTOFF_HZ: f32 = 600.0;
pub const OPEN_CUTOFF_HZ: f32 = 20_000.0;
pub const WARMTH_RAMP_SEC: f64 = 0.5;
pub const WARMTH_Q: f32 = 0.707;

// Fades
pub const DEFAULT_FADE_SEC: f64 = 2.0;
pub const MIN_FADE_SEC: f64 = 0.05;
pub const MAX_FADE_SEC: f64 = 30.0;
pub const LONG_FADE_SEC: f64 = 10.0; // sleep timer elapsed
pub const HARD_STOP_SEC: f64 = 0.1;

// Generator library
pub const NOISE_BUFFER_SEC: f32 = 4.0;
pub const NOISE_LOOP_CROSSFADE_SEC: f32 = 0.05;
pub const NOISE_PEAK: f32 = 0.9;
pub const DEFAULT_NOISE_SEED: u64 = 0x5EED_1234_ABCD_0042;

// Heartbeat overlay
pub const HEARTBEAT_PERIOD_SEC: f64 = 1.2;
pub const HEARTBEAT_SECOND_BEAT_OFFSET_SEC: f64 = 0.3;
pub const BEAT_FIRST_HZ: f32 = 65.0;
pub const BEAT_SECOND_HZ: f32 = 60.0;
pub const BEAT_FIRST_PEAK: f32 = 0.9;
pub const BEAT_SECOND_PEAK: f32 = 0.6;
pub const HEARTBEAT_LEAD_SEC: f64 = 0.05; // schedule slightly ahead of the clock
pub const BEAT_SWEEP_SEC: f64 = 0.15;
pub const BEAT_ATTACK_SEC: f64 = 0.01;
pub const BEAT_LENGTH_SEC: f64 = 0.25;
pub const BEAT_END_HZ: f32 = 10.0;
pub const BEAT_LOWPASS_HZ: f32 = 150.0;
pub const BEAT_RELEASE_MARGIN_SEC: f64 = 0.05;

// Lullaby scheduler
pub const MELODY_BPM: f64 = 72.0;
pub const MELODY_LOOKAHEAD_SEC: f64 = 0.25; // how far ahead notes are scheduled
pub const MELODY_STEP_SEC: f64 = 0.05; // step task period
pub const MELODY_NOTE_PEAK: f32 = 0.22;
pub const MELODY_ATTACK_SEC: f64 = 0.04;
pub const MELODY_DELAY_SEC: f32 = 0.38;
pub const MELODY_FEEDBACK: f32 = 0.35;

// Floor used for exponential ramps that approach silence
pub const SILENCE_FLOOR: f32 = 0.0001;
