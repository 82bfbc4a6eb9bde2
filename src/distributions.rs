//! Shaped Randomness
//!
//! Maps uniform draws onto the bell/bathtub family of distributions the
//! voltage and pulse-width generators need. The sampler is a closed-form
//! two-sided power quantile: cheap enough for the per-step budget, no lookup
//! tables, and smoothly parameterized by `spread` (concentration) and `bias`
//! (location):
//!
//! - `spread` 0.0: mass collapses onto `bias`;
//! - `spread` 0.5: the draw passes through unchanged;
//! - `spread` 1.0: bimodal, mass pushed to both ends.
//!
//! The fully-degenerate and fully-Bernoulli blends at the extremes of the
//! spread range are applied by the output channel, not here.

/// Shape a uniform draw `u` in [0, 1) into a beta-like variate in [0, 1).
///
/// The quantile is split at `bias`, which pins the distribution's median
/// there for every spread; each side is a power curve whose exponent sweeps
/// from flat (concentrating at the split) through identity to steep
/// (draining toward the range ends). Out-of-range parameters are clamped
/// before use.
pub fn beta_sample(u: f32, spread: f32, bias: f32) -> f32 {
    let u = u.clamp(0.0, 0.999999);
    let spread = spread.clamp(0.0, 1.0);
    let bias = bias.clamp(0.0, 1.0);

    // e^-4 (tight around the bias) through 1 (identity) to e^4 (bimodal)
    // as spread goes 0 -> 0.5 -> 1.
    let exponent = libm::expf(4.0 * (2.0 * spread - 1.0));

    // u < 1 after the clamp, so each branch's divisor is nonzero.
    if u < bias {
        bias * libm::powf(u / bias, exponent)
    } else {
        1.0 - (1.0 - bias) * libm::powf((1.0 - u) / (1.0 - bias), exponent)
    }
}
