//! The lullaby voice's note scheduler.
//!
//! Notes are scheduled a little ahead of the sample clock by a step task the
//! engine re-queues every
//! [`MELODY_STEP_SEC`](crate::constants::MELODY_STEP_SEC). Each note owns an
//! oscillator and an envelope gain that stay in the in-flight list until
//! their envelope has finished, so a voice stopped mid-phrase can release
//! them all.

use crate::backend::{AudioBackend, NodeId, ParamEvent, ParamRef, Waveform};
use crate::constants::{
    MELODY_ATTACK_SEC, MELODY_BPM, MELODY_LOOKAHEAD_SEC, MELODY_NOTE_PEAK, SILENCE_FLOOR,
};
use crate::error::GraphError;
use crate::voice::stop_quietly;
use std::collections::VecDeque;

/// One entry of the note table: MIDI pitch (`None` for a rest) and length in
/// beats.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Step {
    pub midi: Option<i32>,
    pub beats: f64,
}

const fn n(midi: i32, beats: f64) -> Step {
    Step {
        midi: Some(midi),
        beats,
    }
}

const fn rest(beats: f64) -> Step {
    Step { midi: None, beats }
}

/// Brahms' lullaby in C, looped with a rest between repetitions.
pub const LULLABY: &[Step] = &[
    n(64, 0.5),
    n(64, 0.5),
    n(67, 1.5),
    n(64, 0.5),
    n(64, 1.0),
    n(67, 2.0),
    n(64, 0.5),
    n(67, 0.5),
    n(72, 1.0),
    n(71, 1.5),
    n(69, 0.5),
    n(69, 1.0),
    n(67, 1.0),
    n(62, 0.5),
    n(64, 0.5),
    n(65, 1.0),
    n(62, 1.0),
    n(62, 0.5),
    n(64, 0.5),
    n(65, 2.0),
    n(62, 0.5),
    n(65, 0.5),
    n(71, 0.5),
    n(69, 0.5),
    n(67, 1.0),
    n(71, 1.0),
    n(72, 2.0),
    rest(2.0),
];

pub fn midi_to_hz(midi: f32) -> f32 {
    440.0 * (2.0_f32).powf((midi - 69.0) / 12.0)
}

#[derive(Clone, Copy, Debug)]
struct ScheduledNote {
    osc: NodeId,
    env: NodeId,
    ends_at: f64,
}

pub struct Melody {
    bus: NodeId,
    table: &'static [Step],
    cursor: usize,
    next_time: f64,
    seconds_per_beat: f64,
    in_flight: VecDeque<ScheduledNote>,
    scheduled: u64,
}

impl Melody {
    /// A melody whose notes are routed into `bus`.
    pub fn new(bus: NodeId) -> Self {
        Self::with_table(bus, LULLABY)
    }

    pub fn with_table(bus: NodeId, table: &'static [Step]) -> Self {
        Self {
            bus,
            table,
            cursor: 0,
            next_time: 0.0,
            seconds_per_beat: 60.0 / MELODY_BPM,
            in_flight: VecDeque::new(),
            scheduled: 0,
        }
    }

    pub fn begin(&mut self, at: f64) {
        self.cursor = 0;
        self.next_time = at;
    }

    /// Release finished notes, then schedule every note that starts within
    /// the lookahead window. Returns the number of notes scheduled.
    pub fn advance(&mut self, backend: &mut dyn AudioBackend) -> Result<usize, GraphError> {
        let now = backend.current_time();
        while let Some(note) = self.in_flight.front() {
            if note.ends_at > now {
                break;
            }
            backend.release(note.osc);
            backend.release(note.env);
            self.in_flight.pop_front();
        }

        if self.table.is_empty() {
            return Ok(0);
        }
        // A late step must not schedule envelopes in the past.
        if self.next_time < now {
            self.next_time = now + 0.02;
        }

        let mut count = 0;
        while self.next_time < now + MELODY_LOOKAHEAD_SEC {
            let step = self.table[self.cursor];
            let duration = step.beats * self.seconds_per_beat;
            if let Some(midi) = step.midi {
                let note = schedule_note(
                    backend,
                    self.bus,
                    midi_to_hz(midi as f32),
                    self.next_time,
                    duration,
                )?;
                self.in_flight.push_back(note);
                self.scheduled += 1;
                count += 1;
            }
            self.next_time += duration;
            self.cursor = (self.cursor + 1) % self.table.len();
        }
        Ok(count)
    }

    /// Stop and drop every note still in flight.
    pub fn release(&mut self, backend: &mut dyn AudioBackend) {
        let now = backend.current_time();
        for note in self.in_flight.drain(..) {
            stop_quietly(backend, note.osc, now);
            backend.release(note.osc);
            backend.release(note.env);
        }
    }

    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.in_flight.iter().flat_map(|n| [n.osc, n.env])
    }

    pub fn node_count(&self) -> usize {
        self.in_flight.len() * 2
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn notes_scheduled(&self) -> u64 {
        self.scheduled
    }

    pub fn next_note_time(&self) -> f64 {
        self.next_time
    }
}

fn schedule_note(
    backend: &mut dyn AudioBackend,
    bus: NodeId,
    frequency: f32,
    start: f64,
    duration: f64,
) -> Result<ScheduledNote, GraphError> {
    let osc = backend.create_oscillator(Waveform::Triangle, frequency, 0.0)?;
    let env = match backend.create_gain(0.0) {
        Ok(env) => env,
        Err(e) => {
            backend.release(osc);
            return Err(e);
        }
    };
    let note = ScheduledNote {
        osc,
        env,
        ends_at: start + duration,
    };
    let wired = wire_note(backend, &note, bus, start, duration);
    match wired {
        Ok(()) => Ok(note),
        Err(e) => {
            backend.release(osc);
            backend.release(env);
            Err(e)
        }
    }
}

fn wire_note(
    backend: &mut dyn AudioBackend,
    note: &ScheduledNote,
    bus: NodeId,
    start: f64,
    duration: f64,
) -> Result<(), GraphError> {
    let gain = ParamRef::gain(note.env);
    backend.automate(
        gain,
        ParamEvent::SetValue {
            value: 0.0,
            at: start,
        },
    )?;
    backend.automate(
        gain,
        ParamEvent::LinearRamp {
            value: MELODY_NOTE_PEAK,
            end: start + MELODY_ATTACK_SEC,
        },
    )?;
    backend.automate(
        gain,
        ParamEvent::ExponentialRamp {
            value: SILENCE_FLOOR,
            end: start + duration * 0.95,
        },
    )?;
    backend.automate(
        gain,
        ParamEvent::LinearRamp {
            value: 0.0,
            end: start + duration,
        },
    )?;
    backend.connect(note.osc, note.env)?;
    backend.connect(note.env, bus)?;
    backend.start(note.osc, start)?;
    backend.stop(note.osc, start + duration)
}
