//! Sample-level building blocks used by the render graph.

use crate::backend::{FilterKind, Waveform};
use std::f64::consts::PI;

/// Second-order IIR filter with WebAudio `BiquadFilterNode` coefficients
/// (Audio EQ Cookbook), in Direct Form II Transposed.
#[derive(Debug, Clone)]
pub struct Biquad {
    kind: FilterKind,
    sample_rate: f64,
    frequency: f64,
    q: f64,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    pub fn new(kind: FilterKind, sample_rate: f32) -> Self {
        let mut f = Biquad {
            kind,
            sample_rate: sample_rate as f64,
            frequency: f64::NAN,
            q: f64::NAN,
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            z1: 0.0,
            z2: 0.0,
        };
        f.set_params(1000.0, 0.707);
        f
    }

    /// Update cutoff and Q, recomputing coefficients only when they move.
    pub fn set_params(&mut self, frequency: f32, q: f32) {
        let nyquist = self.sample_rate * 0.5;
        let frequency = (frequency as f64).clamp(10.0, nyquist * 0.9);
        let q = (q as f64).max(0.0001);
        if (frequency - self.frequency).abs() < 1e-3 && (q - self.q).abs() < 1e-6 {
            return;
        }
        self.frequency = frequency;
        self.q = q;

        let w0 = 2.0 * PI * frequency / self.sample_rate;
        let cos_w0 = w0.cos();
        let alpha = w0.sin() / (2.0 * q);
        let (b0, b1, b2) = match self.kind {
            FilterKind::Lowpass => {
                let b1 = 1.0 - cos_w0;
                (b1 / 2.0, b1, b1 / 2.0)
            }
            FilterKind::Highpass => {
                let b0 = (1.0 + cos_w0) / 2.0;
                (b0, -(1.0 + cos_w0), b0)
            }
            FilterKind::Bandpass => (alpha, 0.0, -alpha),
        };
        let a0 = 1.0 + alpha;
        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = -2.0 * cos_w0 / a0;
        self.a2 = (1.0 - alpha) / a0;
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let x = input as f64;
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y as f32
    }
}

/// Naive waveform value for a phase in `[0, 1)`.
pub fn wave_sample(phase: f32, waveform: Waveform) -> f32 {
    match waveform {
        Waveform::Sine => (phase * std::f32::consts::TAU).sin(),
        Waveform::Square => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        Waveform::Saw => 2.0 * phase - 1.0,
        Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
    }
}

/// Frequency after applying a detune in cents.
#[inline]
pub fn detuned(frequency: f32, cents: f32) -> f32 {
    frequency * 2.0_f32.powf(cents / 1200.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_passes_dc() {
        let mut f = Biquad::new(FilterKind::Lowpass, 44_100.0);
        f.set_params(5_000.0, 0.707);
        let mut out = 0.0;
        for _ in 0..1000 {
            out = f.process(1.0);
        }
        assert!((out - 1.0).abs() < 1e-3, "lowpass should pass DC, got {out}");
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut f = Biquad::new(FilterKind::Highpass, 44_100.0);
        f.set_params(1_000.0, 0.707);
        let mut out = 1.0;
        for _ in 0..2000 {
            out = f.process(1.0);
        }
        assert!(out.abs() < 1e-3, "highpass should block DC, got {out}");
    }

    #[test]
    fn cutoff_above_nyquist_stays_stable() {
        let mut f = Biquad::new(FilterKind::Lowpass, 8_000.0);
        f.set_params(20_000.0, 0.707);
        for i in 0..4000 {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            assert!(f.process(x).is_finite());
        }
    }

    #[test]
    fn waveforms_stay_in_unit_range() {
        for w in [Waveform::Sine, Waveform::Square, Waveform::Saw, Waveform::Triangle] {
            for i in 0..100 {
                let v = wave_sample(i as f32 / 100.0, w);
                assert!((-1.0..=1.0).contains(&v), "{w:?} out of range: {v}");
            }
        }
    }

    #[test]
    fn detune_by_an_octave_doubles() {
        assert!((detuned(110.0, 1200.0) - 220.0).abs() < 1e-3);
    }
}
