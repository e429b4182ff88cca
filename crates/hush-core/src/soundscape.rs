//! The eight soundscapes and the recipe that builds each one's sub-graph.

use crate::backend::{FilterKind, ParamRef, Waveform};
use crate::constants::{MELODY_DELAY_SEC, MELODY_FEEDBACK};
use crate::error::{GraphError, ParseSoundscapeError};
use crate::generators::{lfo, modulate, noise, tone, NoiseColor};
use crate::melody::Melody;
use crate::voice::VoiceBuilder;
use std::fmt;
use std::str::FromStr;

/// Builds a voice's nodes between its sources and `builder.output()`.
pub type Recipe = fn(&mut VoiceBuilder<'_>) -> Result<(), GraphError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Soundscape {
    WhiteNoise,
    PinkNoise,
    BrownNoise,
    Rain,
    Ocean,
    HairDryer,
    Shush,
    Lullaby,
}

impl Soundscape {
    pub const ALL: [Soundscape; 8] = [
        Soundscape::WhiteNoise,
        Soundscape::PinkNoise,
        Soundscape::BrownNoise,
        Soundscape::Rain,
        Soundscape::Ocean,
        Soundscape::HairDryer,
        Soundscape::Shush,
        Soundscape::Lullaby,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Soundscape::WhiteNoise => "white-noise",
            Soundscape::PinkNoise => "pink-noise",
            Soundscape::BrownNoise => "brown-noise",
            Soundscape::Rain => "rain",
            Soundscape::Ocean => "ocean",
            Soundscape::HairDryer => "hair-dryer",
            Soundscape::Shush => "shush",
            Soundscape::Lullaby => "lullaby",
        }
    }

    pub fn recipe(self) -> Recipe {
        match self {
            Soundscape::WhiteNoise => white_noise,
            Soundscape::PinkNoise => pink_noise,
            Soundscape::BrownNoise => brown_noise,
            Soundscape::Rain => rain,
            Soundscape::Ocean => ocean,
            Soundscape::HairDryer => hair_dryer,
            Soundscape::Shush => shush,
            Soundscape::Lullaby => lullaby,
        }
    }
}

impl fmt::Display for Soundscape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Soundscape {
    type Err = ParseSoundscapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s
            .trim()
            .to_ascii_lowercase()
            .replace(|c: char| c == '_' || c == ' ', "-");
        Soundscape::ALL
            .into_iter()
            .find(|id| id.as_str() == key)
            .ok_or_else(|| ParseSoundscapeError(s.to_string()))
    }
}

fn white_noise(b: &mut VoiceBuilder<'_>) -> Result<(), GraphError> {
    let src = noise(b, NoiseColor::White)?;
    let band = b.filter(FilterKind::Lowpass, 9_000.0, 0.5)?;
    let level = b.gain(0.35)?;
    let out = b.output();
    b.chain(&[src, band, level, out])
}

fn pink_noise(b: &mut VoiceBuilder<'_>) -> Result<(), GraphError> {
    let src = noise(b, NoiseColor::Pink)?;
    let band = b.filter(FilterKind::Lowpass, 7_000.0, 0.5)?;
    let level = b.gain(0.5)?;
    let out = b.output();
    b.chain(&[src, band, level, out])
}

fn brown_noise(b: &mut VoiceBuilder<'_>) -> Result<(), GraphError> {
    let src = noise(b, NoiseColor::Brown)?;
    let rumble_cut = b.filter(FilterKind::Highpass, 25.0, 0.7)?;
    let band = b.filter(FilterKind::Lowpass, 1_500.0, 0.5)?;
    let level = b.gain(0.7)?;
    let out = b.output();
    b.chain(&[src, rumble_cut, band, level, out])
}

// Bright hiss for the drops plus a softer band for the body of the rain.
fn rain(b: &mut VoiceBuilder<'_>) -> Result<(), GraphError> {
    let out = b.output();

    let hiss = noise(b, NoiseColor::White)?;
    let low_cut = b.filter(FilterKind::Highpass, 400.0, 0.7)?;
    let high_cut = b.filter(FilterKind::Lowpass, 4_500.0, 0.7)?;
    let hiss_level = b.gain(0.3)?;
    b.chain(&[hiss, low_cut, high_cut, hiss_level, out])?;

    let body = noise(b, NoiseColor::Pink)?;
    let band = b.filter(FilterKind::Bandpass, 900.0, 0.6)?;
    let body_level = b.gain(0.25)?;
    b.chain(&[body, band, body_level, out])
}

// One 8 s swell drives both the cutoff and the level.
fn ocean(b: &mut VoiceBuilder<'_>) -> Result<(), GraphError> {
    let src = noise(b, NoiseColor::Brown)?;
    let surf = b.filter(FilterKind::Lowpass, 500.0, 1.0)?;
    let swell = b.gain(0.6)?;
    let out = b.output();
    b.chain(&[src, surf, swell, out])?;

    let wave = lfo(b, 0.125)?;
    modulate(b, wave, 350.0, ParamRef::frequency(surf))?;
    modulate(b, wave, 0.3, ParamRef::gain(swell))?;
    Ok(())
}

// Air turbulence, a beating motor pair and a sub rumble summed into one mix.
fn hair_dryer(b: &mut VoiceBuilder<'_>) -> Result<(), GraphError> {
    let mix = b.gain(1.0)?;
    let out = b.output();
    b.connect(mix, out)?;

    let air = noise(b, NoiseColor::Pink)?;
    let air_band = b.filter(FilterKind::Bandpass, 1_200.0, 0.8)?;
    let air_level = b.gain(0.45)?;
    b.chain(&[air, air_band, air_level, mix])?;

    let motor_a = tone(b, Waveform::Saw, 110.0, -7.0)?;
    let motor_b = tone(b, Waveform::Saw, 110.0, 7.0)?;
    let motor_tone = b.filter(FilterKind::Lowpass, 700.0, 0.7)?;
    let motor_level = b.gain(0.08)?;
    b.connect(motor_a, motor_tone)?;
    b.connect(motor_b, motor_tone)?;
    b.chain(&[motor_tone, motor_level, mix])?;

    let rumble = tone(b, Waveform::Sine, 55.0, 0.0)?;
    let rumble_level = b.gain(0.25)?;
    b.chain(&[rumble, rumble_level, mix])
}

// "Shh-shh": the breath gain swings 0.05..0.95 at a quarter hertz.
fn shush(b: &mut VoiceBuilder<'_>) -> Result<(), GraphError> {
    let src = noise(b, NoiseColor::Pink)?;
    let band = b.filter(FilterKind::Bandpass, 2_500.0, 0.9)?;
    let breath = b.gain(0.5)?;
    let out = b.output();
    b.chain(&[src, band, breath, out])?;

    let cadence = lfo(b, 0.25)?;
    modulate(b, cadence, 0.45, ParamRef::gain(breath))?;
    Ok(())
}

fn lullaby(b: &mut VoiceBuilder<'_>) -> Result<(), GraphError> {
    let out = b.output();
    let bus = b.gain(1.0)?;
    b.connect(bus, out)?;

    let echo = b.delay(1.0, MELODY_DELAY_SEC)?;
    let feedback = b.gain(MELODY_FEEDBACK)?;
    let wet = b.gain(0.4)?;
    b.connect(bus, echo)?;
    b.chain(&[echo, feedback, echo])?;
    b.chain(&[echo, wet, out])?;

    b.set_melody(Melody::new(bus));
    Ok(())
}
