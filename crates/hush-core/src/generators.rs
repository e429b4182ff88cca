//! Raw signal material for the soundscapes.
//!
//! Noise is pre-rendered into loopable buffers once per color so playback
//! costs nothing per sample beyond a buffer read. Tones and slow modulators
//! are plain oscillators wired through the voice builder.

use crate::backend::{AudioBackend, BufferId, NodeId, ParamRef, Waveform};
use crate::constants::{NOISE_LOOP_CROSSFADE_SEC, NOISE_PEAK};
use crate::error::GraphError;
use crate::voice::VoiceBuilder;
use fnv::FnvHashMap;
use rand::prelude::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoiseColor {
    White,
    Pink,
    Brown,
}

const VOSS_ROWS: usize = 16;

pub fn white_noise<R: Rng>(rng: &mut R, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

/// Voss-McCartney pink noise: row `k` is refreshed every `2^k` samples and
/// the rows are summed with a white component.
pub fn pink_noise<R: Rng>(rng: &mut R, len: usize) -> Vec<f32> {
    let mut rows = [0.0_f32; VOSS_ROWS];
    let mut running = 0.0_f32;
    let mut counter: u32 = 0;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        counter = counter.wrapping_add(1);
        let k = counter.trailing_zeros() as usize;
        if k < VOSS_ROWS {
            running -= rows[k];
            rows[k] = rng.gen_range(-1.0..1.0);
            running += rows[k];
        }
        let white: f32 = rng.gen_range(-1.0..1.0);
        out.push((running + white) / (VOSS_ROWS as f32 + 1.0));
    }
    out
}

/// Brown noise from a leaky integrator over white noise.
pub fn brown_noise<R: Rng>(rng: &mut R, len: usize) -> Vec<f32> {
    let mut last = 0.0_f32;
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let white: f32 = rng.gen_range(-1.0..1.0);
        last = (last + 0.02 * white) / 1.02;
        out.push(last * 3.5);
    }
    out
}

/// Turn `len + crossfade` raw samples into a `len` sample loop whose last
/// sample flows into its first: the head is an equal-power blend of the
/// rendered tail (fading out) and the original head (fading in).
pub fn make_seamless(raw: &[f32], crossfade: usize) -> Vec<f32> {
    let len = raw.len().saturating_sub(crossfade);
    if crossfade == 0 || len < crossfade {
        return raw.to_vec();
    }
    let mut out = raw[..len].to_vec();
    for (i, sample) in out.iter_mut().take(crossfade).enumerate() {
        let x = i as f32 / crossfade as f32 * std::f32::consts::FRAC_PI_2;
        *sample = raw[len + i] * x.cos() + raw[i] * x.sin();
    }
    out
}

fn remove_dc(buf: &mut [f32]) {
    if buf.is_empty() {
        return;
    }
    let mean = buf.iter().sum::<f32>() / buf.len() as f32;
    buf.iter_mut().for_each(|s| *s -= mean);
}

fn normalize(buf: &mut [f32], peak: f32) {
    let max = buf.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
    if max > 0.0 {
        let k = peak / max;
        buf.iter_mut().for_each(|s| *s *= k);
    }
}

/// Render a loop-ready, DC-free, peak-normalised noise buffer.
pub fn noise_buffer(color: NoiseColor, sample_rate: f32, secs: f32, seed: u64) -> Vec<f32> {
    let len = (sample_rate * secs).max(1.0) as usize;
    let crossfade = ((sample_rate * NOISE_LOOP_CROSSFADE_SEC) as usize).min(len / 4);
    // Each color gets its own stream so changing one never changes another.
    let salt = (color as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut rng = StdRng::seed_from_u64(seed ^ salt);
    let mut raw = match color {
        NoiseColor::White => white_noise(&mut rng, len + crossfade),
        NoiseColor::Pink => pink_noise(&mut rng, len + crossfade),
        NoiseColor::Brown => brown_noise(&mut rng, len + crossfade),
    };
    remove_dc(&mut raw);
    let mut buf = make_seamless(&raw, crossfade);
    normalize(&mut buf, NOISE_PEAK);
    buf
}

/// Noise buffers uploaded to one context, rendered lazily per color.
pub struct NoiseBank {
    seed: u64,
    secs: f32,
    buffers: FnvHashMap<NoiseColor, BufferId>,
}

impl NoiseBank {
    pub fn new(seed: u64, secs: f32) -> Self {
        Self {
            seed,
            secs,
            buffers: FnvHashMap::default(),
        }
    }

    pub fn buffer(
        &mut self,
        backend: &mut dyn AudioBackend,
        color: NoiseColor,
    ) -> Result<BufferId, GraphError> {
        if let Some(id) = self.buffers.get(&color) {
            return Ok(*id);
        }
        let samples = noise_buffer(color, backend.sample_rate(), self.secs, self.seed);
        let id = backend.create_buffer(&samples)?;
        log::debug!("[noise] rendered {:?} buffer ({} samples)", color, samples.len());
        self.buffers.insert(color, id);
        Ok(id)
    }

    pub fn cached(&self) -> usize {
        self.buffers.len()
    }
}

/// A looping noise source registered with the voice.
pub fn noise(b: &mut VoiceBuilder<'_>, color: NoiseColor) -> Result<NodeId, GraphError> {
    let buffer = b.noise_buffer(color)?;
    b.buffer_source(buffer, true)
}

pub fn tone(
    b: &mut VoiceBuilder<'_>,
    waveform: Waveform,
    frequency: f32,
    detune_cents: f32,
) -> Result<NodeId, GraphError> {
    b.oscillator(waveform, frequency, detune_cents)
}

/// A slow sine modulator. Route it with [`modulate`].
pub fn lfo(b: &mut VoiceBuilder<'_>, rate_hz: f32) -> Result<NodeId, GraphError> {
    b.oscillator(Waveform::Sine, rate_hz, 0.0)
}

/// Scale a modulator by `depth` and add it to `target`.
pub fn modulate(
    b: &mut VoiceBuilder<'_>,
    source: NodeId,
    depth: f32,
    target: ParamRef,
) -> Result<NodeId, GraphError> {
    let amount = b.gain(depth)?;
    b.connect(source, amount)?;
    b.connect_param(amount, target)?;
    Ok(amount)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|s| s * s).sum::<f32>() / buf.len() as f32).sqrt()
    }

    #[test]
    fn buffers_have_requested_length_and_peak() {
        for color in [NoiseColor::White, NoiseColor::Pink, NoiseColor::Brown] {
            let buf = noise_buffer(color, 8_000.0, 2.0, 7);
            assert_eq!(buf.len(), 16_000);
            let peak = buf.iter().fold(0.0_f32, |m, s| m.max(s.abs()));
            assert!((peak - NOISE_PEAK).abs() < 1e-4, "{color:?} peak {peak}");
        }
    }

    #[test]
    fn buffers_are_free_of_dc() {
        for color in [NoiseColor::White, NoiseColor::Pink, NoiseColor::Brown] {
            let buf = noise_buffer(color, 8_000.0, 2.0, 7);
            let mean = buf.iter().sum::<f32>() / buf.len() as f32;
            assert!(mean.abs() < 0.05, "{color:?} mean {mean}");
        }
    }

    #[test]
    fn bank_uploads_each_color_once() {
        let mut graph = crate::render::RenderGraph::new(8_000.0);
        graph.open().unwrap();
        let mut bank = NoiseBank::new(1, 0.5);
        let pink = bank.buffer(&mut graph, NoiseColor::Pink).unwrap();
        assert_eq!(bank.buffer(&mut graph, NoiseColor::Pink).unwrap(), pink);
        assert_eq!(bank.cached(), 1);
        let brown = bank.buffer(&mut graph, NoiseColor::Brown).unwrap();
        assert_ne!(brown, pink);
        assert_eq!(bank.cached(), 2);
    }

    #[test]
    fn same_seed_renders_same_buffer() {
        let a = noise_buffer(NoiseColor::Pink, 8_000.0, 1.0, 99);
        let b = noise_buffer(NoiseColor::Pink, 8_000.0, 1.0, 99);
        assert_eq!(a, b);
    }

    #[test]
    fn brown_is_smoother_than_white() {
        // Sample-to-sample differences shrink as the spectrum darkens.
        let diff = |buf: &[f32]| rms(&buf.windows(2).map(|w| w[1] - w[0]).collect::<Vec<_>>());
        let white = noise_buffer(NoiseColor::White, 8_000.0, 1.0, 3);
        let pink = noise_buffer(NoiseColor::Pink, 8_000.0, 1.0, 3);
        let brown = noise_buffer(NoiseColor::Brown, 8_000.0, 1.0, 3);
        assert!(diff(&white) > diff(&pink));
        assert!(diff(&pink) > diff(&brown));
    }

    #[test]
    fn loop_point_continues_the_rendered_stream() {
        let raw: Vec<f32> = (0..120).map(|i| i as f32).collect();
        let looped = make_seamless(&raw, 20);
        assert_eq!(looped.len(), 100);
        // Wrapping from the last sample lands on the sample that followed it.
        assert_eq!(looped[99], 99.0);
        assert_eq!(looped[0], 100.0);
        assert_eq!(looped[50], 50.0);
    }

    #[test]
    fn brown_loop_has_no_seam_jump() {
        let buf = noise_buffer(NoiseColor::Brown, 8_000.0, 1.0, 11);
        let seam = (buf[0] - buf[buf.len() - 1]).abs();
        let typical = buf.windows(2).map(|w| (w[1] - w[0]).abs()).fold(0.0_f32, f32::max);
        assert!(seam <= typical, "seam {seam} exceeds largest step {typical}");
    }
}
