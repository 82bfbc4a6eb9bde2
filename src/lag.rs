//! Voltage Smoothing
//!
//! Phase-synchronized glide used by the output channels when `steps` sits in
//! the smooth half of its range. The ramp is retriggered at each step and
//! completes after a programmable fraction of the step period, so glide time
//! scales with the clock instead of being a fixed time constant. A light
//! one-pole on top rounds the ramp corners.

/// Glide processor. One instance per output channel.
#[derive(Debug, Clone)]
pub struct LagProcessor {
    state: f32,
    ramp_origin: f32,
}

impl LagProcessor {
    pub fn new() -> Self {
        Self {
            state: 0.0,
            ramp_origin: 0.0,
        }
    }

    /// Latch the current output as the origin of the next glide. Call at
    /// each step boundary, before the target changes.
    pub fn reset_ramp(&mut self) {
        self.ramp_origin = self.state;
    }

    /// Advance toward `target`. `smoothness` in [0, 1] is the fraction of
    /// the step period the glide takes; 0 snaps immediately. `phase` is the
    /// master phase within the current step.
    pub fn process(&mut self, target: f32, smoothness: f32, phase: f32) -> f32 {
        let smoothness = smoothness.clamp(0.0, 1.0);
        let t = if smoothness < 1.0e-6 {
            1.0
        } else {
            (phase / smoothness).min(1.0)
        };
        let ramp = self.ramp_origin + (target - self.ramp_origin) * t;
        self.state += (1.0 - 0.5 * smoothness) * (ramp - self.state);
        self.state
    }
}

impl Default for LagProcessor {
    fn default() -> Self {
        Self::new()
    }
}
