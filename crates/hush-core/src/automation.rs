//! Evaluation of scheduled parameter automation.
//!
//! Follows the WebAudio `AudioParam` model closely enough for the engine's
//! needs: events are kept sorted by time, a ramp starts at the time and value
//! of the previous event, and a set-target curve runs until the next event.

use crate::backend::ParamEvent;
use crate::error::GraphError;

#[derive(Clone, Copy, Debug)]
enum Curve {
    Hold,
    Target { value: f32, tau: f64 },
}

#[derive(Clone, Debug)]
pub struct ParamTimeline {
    initial: f32,
    events: Vec<ParamEvent>,
}

impl ParamTimeline {
    pub fn new(initial: f32) -> Self {
        Self {
            initial,
            events: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Insert an event. `now` is the current clock time and is used to drop
    /// history that can no longer influence future values.
    pub fn insert(&mut self, event: ParamEvent, now: f64) -> Result<(), GraphError> {
        match event {
            ParamEvent::Cancel { from } => {
                self.events.retain(|e| e.time() < from);
                return Ok(());
            }
            ParamEvent::ExponentialRamp { value, .. } if value <= 0.0 || !value.is_finite() => {
                return Err(GraphError::InvalidValue(value));
            }
            ParamEvent::SetTarget { tau, value, .. } if tau <= 0.0 || !value.is_finite() => {
                return Err(GraphError::InvalidValue(value));
            }
            ParamEvent::SetValue { value, .. }
            | ParamEvent::LinearRamp { value, .. }
            | ParamEvent::ExponentialRamp { value, .. }
                if !value.is_finite() =>
            {
                return Err(GraphError::InvalidValue(value));
            }
            _ => {}
        }

        let t = event.time();
        let idx = self.events.partition_point(|e| e.time() <= t);
        self.events.insert(idx, event);

        // A set-value that is already in effect makes everything before it
        // irrelevant for the present and future.
        if let ParamEvent::SetValue { at, .. } = event {
            if at <= now {
                let keep_from = self.events.partition_point(|e| e.time() < at);
                self.events.drain(..keep_from);
            }
        }
        Ok(())
    }

    pub fn value_at(&self, t: f64) -> f32 {
        let mut anchor_t = f64::NEG_INFINITY;
        let mut anchor_v = self.initial;
        let mut curve = Curve::Hold;

        let hold = |anchor_t: f64, anchor_v: f32, curve: Curve, x: f64| -> f32 {
            match curve {
                Curve::Hold => anchor_v,
                Curve::Target { value, tau } => {
                    let k = (-(x - anchor_t) / tau).exp() as f32;
                    value + (anchor_v - value) * k
                }
            }
        };

        for event in &self.events {
            match *event {
                ParamEvent::SetValue { value, at } => {
                    if t < at {
                        return hold(anchor_t, anchor_v, curve, t);
                    }
                    anchor_t = at;
                    anchor_v = value;
                    curve = Curve::Hold;
                }
                ParamEvent::LinearRamp { value, end } => {
                    let start_v = anchor_v;
                    if t < end {
                        if !anchor_t.is_finite() || end <= anchor_t {
                            return start_v;
                        }
                        let frac = ((t - anchor_t) / (end - anchor_t)).clamp(0.0, 1.0) as f32;
                        return start_v + (value - start_v) * frac;
                    }
                    anchor_t = end;
                    anchor_v = value;
                    curve = Curve::Hold;
                }
                ParamEvent::ExponentialRamp { value, end } => {
                    let start_v = anchor_v;
                    if t < end {
                        if !anchor_t.is_finite() || end <= anchor_t {
                            return start_v;
                        }
                        if start_v <= 0.0 {
                            // Same as WebAudio: no exponential path from zero.
                            return start_v;
                        }
                        let frac = ((t - anchor_t) / (end - anchor_t)).clamp(0.0, 1.0) as f32;
                        return start_v * (value / start_v).powf(frac);
                    }
                    anchor_t = end;
                    anchor_v = value;
                    curve = Curve::Hold;
                }
                ParamEvent::SetTarget { value, start, tau } => {
                    if t < start {
                        return hold(anchor_t, anchor_v, curve, t);
                    }
                    anchor_v = hold(anchor_t, anchor_v, curve, start);
                    anchor_t = start;
                    curve = Curve::Target { value, tau };
                }
                ParamEvent::Cancel { .. } => {}
            }
        }
        hold(anchor_t, anchor_v, curve, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    fn set(value: f32, at: f64) -> ParamEvent {
        ParamEvent::SetValue { value, at }
    }

    fn linear(value: f32, end: f64) -> ParamEvent {
        ParamEvent::LinearRamp { value, end }
    }

    fn expo(value: f32, end: f64) -> ParamEvent {
        ParamEvent::ExponentialRamp { value, end }
    }

    #[test]
    fn holds_initial_value_without_events() {
        let tl = ParamTimeline::new(0.3);
        assert!(approx(tl.value_at(0.0), 0.3));
        assert!(approx(tl.value_at(100.0), 0.3));
    }

    #[test]
    fn linear_ramp_interpolates_from_previous_event() {
        let mut tl = ParamTimeline::new(0.0);
        tl.insert(set(0.0, 1.0), 0.0).unwrap();
        tl.insert(linear(1.0, 3.0), 0.0).unwrap();
        assert!(approx(tl.value_at(0.5), 0.0));
        assert!(approx(tl.value_at(2.0), 0.5));
        assert!(approx(tl.value_at(3.0), 1.0));
        assert!(approx(tl.value_at(10.0), 1.0));
    }

    #[test]
    fn exponential_ramp_rejects_zero_target() {
        let mut tl = ParamTimeline::new(1.0);
        let err = tl.insert(expo(0.0, 1.0), 0.0);
        assert_eq!(err, Err(GraphError::InvalidValue(0.0)));
    }

    #[test]
    fn exponential_ramp_is_geometric() {
        let mut tl = ParamTimeline::new(20_000.0);
        tl.insert(set(20_000.0, 0.0), 0.0).unwrap();
        tl.insert(expo(200.0, 2.0), 0.0).unwrap();
        assert!((tl.value_at(1.0) - 2_000.0).abs() < 1.0);
        assert!(approx(tl.value_at(2.0), 200.0));
    }

    #[test]
    fn set_target_approaches_value() {
        let mut tl = ParamTimeline::new(0.0);
        let target = ParamEvent::SetTarget {
            value: 1.0,
            start: 0.0,
            tau: 0.1,
        };
        tl.insert(target, 0.0).unwrap();
        let v1 = tl.value_at(0.1);
        assert!((v1 - (1.0 - (-1.0f32).exp())).abs() < 1e-3);
        assert!(tl.value_at(2.0) > 0.999);
    }

    #[test]
    fn cancel_then_anchor_keeps_value_continuous() {
        let mut tl = ParamTimeline::new(0.0);
        tl.insert(set(0.0, 0.0), 0.0).unwrap();
        tl.insert(linear(1.0, 2.0), 0.0).unwrap();
        let now = 1.0;
        let mid = tl.value_at(now);
        tl.insert(ParamEvent::Cancel { from: now }, now).unwrap();
        tl.insert(set(mid, now), now).unwrap();
        tl.insert(linear(0.0, 2.0), now).unwrap();
        assert!(approx(tl.value_at(1.0), 0.5));
        assert!(approx(tl.value_at(1.5), 0.25));
        assert!(approx(tl.value_at(2.0), 0.0));
    }

    #[test]
    fn past_set_value_compacts_history() {
        let mut tl = ParamTimeline::new(0.0);
        for i in 0..10 {
            let at = i as f64;
            tl.insert(set(i as f32, at), at).unwrap();
        }
        assert_eq!(tl.len(), 1);
        assert!(approx(tl.value_at(9.5), 9.0));
    }
}
