//! Hysteresis Level Selector
//!
//! Maps a continuous control value to a small number of discrete levels with
//! a quarter-step dead band around each boundary, so that a value sitting
//! right on a boundary does not flip levels with every wiggle of the knob.
//! Used by the quantizer's amount-to-level mapping and by the gate
//! generator's rate and bias selectors.

/// Debounced continuous-to-discrete quantizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct HysteresisQuantizer {
    level: i32,
}

impl HysteresisQuantizer {
    pub fn new() -> Self {
        Self { level: 0 }
    }

    /// Map `value` (nominally 0..=1) to a level in `0..num_steps`.
    ///
    /// The previously returned level attracts the decision by a quarter of a
    /// step. Out-of-range values are clamped, so a negative `value` always
    /// selects level 0.
    pub fn process(&mut self, value: f32, num_steps: usize) -> usize {
        let scaled = value * (num_steps as f32 - 1.0);
        let hysteresis = if scaled > self.level as f32 {
            -0.25
        } else {
            0.25
        };
        let q = (scaled + hysteresis + 0.5).floor() as i32;
        let q = q.clamp(0, num_steps as i32 - 1);
        self.level = q;
        q as usize
    }

    pub fn reset(&mut self) {
        self.level = 0;
    }
}
