//! Variable-Resolution Scale Quantizer
//!
//! Snaps a continuous voltage to the nearest degree of a weighted
//! [`Scale`](crate::scale::Scale). A continuous "amount" parameter selects a
//! discrete resolution level through a hysteresis-debounced selector; each
//! level admits only the degrees whose weight clears that level's threshold,
//! so turning the amount up gradually opens the scale from its strongest
//! degrees to every passing tone.
//!
//! Chord quantization runs against a second level table ordered
//! least-common-first and can exclude voltages already taken by sibling
//! channels, so that a chord widens toward rarer notes before it ever
//! duplicates one.

use crate::hysteresis::HysteresisQuantizer;
use crate::scale::{Scale, ScaleError, MAX_DEGREES};

/// Number of resolution levels above "no quantization".
pub const NUM_THRESHOLDS: usize = 7;

/// Number of chord resolution levels (least-common-first, then
/// most-common-first).
pub const NUM_CHORD_LEVELS: usize = 12;

/// One resolution level: which degrees are eligible, and the cached first
/// and last eligible index for wraparound search.
#[derive(Debug, Clone, Copy, Default)]
struct Level {
    bitmask: u16,
    first: usize,
    last: usize,
}

impl Level {
    fn from_bitmask(bitmask: u16, num_degrees: usize) -> Self {
        let mut first = 0;
        let mut last = 0;
        let mut seen = false;
        for i in 0..num_degrees {
            if bitmask & (1 << i) != 0 {
                if !seen {
                    first = i;
                    seen = true;
                }
                last = i;
            }
        }
        Self {
            bitmask,
            first,
            last,
        }
    }
}

/// Scale-constrained voltage quantizer with per-level hysteresis feedback.
#[derive(Debug, Clone)]
pub struct Quantizer {
    num_degrees: usize,
    base_interval: f32,
    base_interval_reciprocal: f32,
    voltage: [f32; MAX_DEGREES],
    levels: [Level; NUM_THRESHOLDS],
    chord_levels: [Level; NUM_CHORD_LEVELS],
    level_selector: HysteresisQuantizer,
    feedback: [f32; NUM_THRESHOLDS],
    chord_feedback: [f32; NUM_CHORD_LEVELS],
}

impl Quantizer {
    /// A quantizer loaded with the default scale.
    pub fn new() -> Self {
        let mut q = Self {
            num_degrees: 0,
            base_interval: 1.0,
            base_interval_reciprocal: 1.0,
            voltage: [0.0; MAX_DEGREES],
            levels: [Level::default(); NUM_THRESHOLDS],
            chord_levels: [Level::default(); NUM_CHORD_LEVELS],
            level_selector: HysteresisQuantizer::new(),
            feedback: [0.0; NUM_THRESHOLDS],
            chord_feedback: [0.0; NUM_CHORD_LEVELS],
        };
        // The default scale satisfies its own invariants.
        q.init(&Scale::default()).ok();
        q
    }

    /// Rebuild the level tables from `scale`.
    ///
    /// A degenerate scale is rejected and the previous tables are kept, so a
    /// corrupt preset can never leave the quantizer without a usable table.
    pub fn init(&mut self, scale: &Scale) -> Result<(), ScaleError> {
        scale.validate()?;
        let n = scale.num_degrees();

        self.num_degrees = n;
        self.base_interval = scale.base_interval;
        self.base_interval_reciprocal = 1.0 / scale.base_interval;

        let mut second_largest: u8 = 0;
        let mut smallest: u8 = 255;
        let mut second_smallest: u8 = 255;
        for (i, degree) in scale.degrees.iter().enumerate() {
            self.voltage[i] = degree.voltage;
            let w = degree.weight;
            if w != 255 && w >= second_largest {
                second_largest = w;
            }
            if w <= second_smallest {
                if w <= smallest {
                    second_smallest = smallest;
                    smallest = w;
                } else {
                    second_smallest = w;
                }
            }
        }

        let mut thresholds: [u8; NUM_THRESHOLDS] = [0, 16, 32, 64, 128, 192, 255];
        let mut chord_thresholds: [u8; NUM_THRESHOLDS] = [0, 16, 32, 64, 128, 192, 255];

        if second_largest > 192 {
            // Keep the last-but-one level selective enough to admit only the
            // two strongest ranks.
            thresholds[NUM_THRESHOLDS - 2] = second_largest;
            chord_thresholds[NUM_THRESHOLDS - 2] = second_largest;
        }
        if second_smallest < 16 {
            chord_thresholds[1] = second_smallest;
        }

        let mut inverted = [Level::default(); NUM_THRESHOLDS];
        for t in 0..NUM_THRESHOLDS {
            let mut bitmask: u16 = 0;
            let mut bitmask_inv: u16 = 0;
            for (i, degree) in scale.degrees.iter().enumerate() {
                if degree.weight >= thresholds[t] {
                    bitmask |= 1 << i;
                }
                if degree.weight <= chord_thresholds[t] {
                    bitmask_inv |= 1 << i;
                }
            }
            self.levels[t] = Level::from_bitmask(bitmask, n);
            inverted[t] = Level::from_bitmask(bitmask_inv, n);
        }

        // Chord search order: rarest-only first, widening to everything at
        // the center, narrowing to commonest-only at the top.
        self.chord_levels[0] = inverted[1];
        self.chord_levels[1] = inverted[2];
        self.chord_levels[2] = inverted[3];
        self.chord_levels[3] = inverted[4];
        self.chord_levels[4] = inverted[5];
        for t in 0..NUM_THRESHOLDS {
            self.chord_levels[5 + t] = self.levels[t];
        }

        self.level_selector.reset();
        self.feedback = [0.0; NUM_THRESHOLDS];
        self.chord_feedback = [0.0; NUM_CHORD_LEVELS];
        Ok(())
    }

    /// Quantize `value` at the resolution selected by `amount`.
    ///
    /// `amount <= 0` selects level 0, which passes the value through
    /// unquantized. With `hysteresis`, a quarter of the previous
    /// quantization error at this level is fed back into the input, damping
    /// chatter for inputs near a degree boundary.
    pub fn process(&mut self, value: f32, amount: f32, hysteresis: bool) -> f32 {
        let level = self.level_selector.process(amount, NUM_THRESHOLDS + 1);
        if level == 0 {
            return value;
        }
        let level = level - 1;

        let raw_value = value;
        let value = if hysteresis {
            value + self.feedback[level]
        } else {
            value
        };

        let (note_integral, note_fractional) = self.fold_octave(value);

        let l = self.levels[level];
        let (a, b) = self.search(l, note_fractional);

        // Exact midpoint ties round to the lower degree.
        let mut quantized = if note_fractional <= (a + b) * 0.5 { a } else { b };
        quantized += note_integral as f32 * self.base_interval;
        self.feedback[level] = (quantized - raw_value) * 0.25;
        quantized
    }

    /// Chord variant: quantize against the chord-ordered level table,
    /// excluding any degree whose absolute voltage already appears in
    /// `used_voltages`.
    ///
    /// If every eligible degree at this level is used, fall back to the
    /// unrestricted bracketing pair: a duplicate note is permitted only when
    /// truly unavoidable at this resolution.
    pub fn process_chord(
        &mut self,
        value: f32,
        amount: f32,
        hysteresis: bool,
        used_voltages: &[f32],
    ) -> f32 {
        let level = self.level_selector.process(amount, NUM_CHORD_LEVELS);

        let raw_value = value;
        let value = if hysteresis {
            value + self.chord_feedback[level]
        } else {
            value
        };

        let (note_integral, note_fractional) = self.fold_octave(value);
        let octave_offset = note_integral as f32 * self.base_interval;

        let l = self.chord_levels[level];
        let mut lower = self.voltage[l.last] - self.base_interval;
        let mut upper = self.voltage[l.first] + self.base_interval;
        // Bracketing pair ignoring the used set, kept for the all-used
        // fallback.
        let mut any_lower = lower;
        let mut any_upper = upper;
        let mut any_upper_locked = false;
        let mut eligible_count = 0;
        let mut used_count = 0;

        let mut bitmask = l.bitmask;
        for i in 0..self.num_degrees {
            if bitmask & 1 != 0 {
                eligible_count += 1;
                let v = self.voltage[i];
                let used = used_voltages.iter().any(|&u| v + octave_offset == u);
                if used {
                    used_count += 1;
                }
                if note_fractional > v {
                    if !used {
                        lower = v;
                    }
                    if !any_upper_locked {
                        any_lower = v;
                    }
                } else if used {
                    if !any_upper_locked {
                        any_upper = v;
                        any_upper_locked = true;
                    }
                } else {
                    upper = v;
                    if !any_upper_locked {
                        any_upper = v;
                    }
                    break;
                }
            }
            bitmask >>= 1;
        }

        let (a, b) = if used_count > 0 && used_count == eligible_count {
            (any_lower, any_upper)
        } else {
            (lower, upper)
        };
        let mut quantized = if note_fractional <= (a + b) * 0.5 { a } else { b };
        quantized += octave_offset;
        self.chord_feedback[level] = (quantized - raw_value) * 0.25;
        quantized
    }

    /// Split `value` into a whole number of base intervals and a fractional
    /// position inside one interval (always non-negative).
    fn fold_octave(&self, value: f32) -> (i32, f32) {
        let note = value * self.base_interval_reciprocal;
        let mut integral = note as i32;
        let mut fractional = note - integral as f32;
        if value < 0.0 {
            integral -= 1;
            fractional += 1.0;
        }
        (integral, fractional * self.base_interval)
    }

    /// Tightest lower/upper bracketing voltages among the level's eligible
    /// degrees. A linear scan is required: masked entries break the
    /// monotonic ordering a binary search would need.
    fn search(&self, l: Level, note_fractional: f32) -> (f32, f32) {
        let mut a = self.voltage[l.last] - self.base_interval;
        let mut b = self.voltage[l.first] + self.base_interval;
        let mut bitmask = l.bitmask;
        for i in 0..self.num_degrees {
            if bitmask & 1 != 0 {
                let v = self.voltage[i];
                if note_fractional > v {
                    a = v;
                } else {
                    b = v;
                    break;
                }
            }
            bitmask >>= 1;
        }
        (a, b)
    }
}

impl Default for Quantizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::Degree;
    use approx::assert_abs_diff_eq;

    fn two_degree_scale() -> Scale {
        Scale::new(
            1.0,
            vec![Degree::new(0.0, 255), Degree::new(0.5, 255)],
        )
    }

    #[test]
    fn test_degenerate_scale_keeps_previous_table() {
        let mut q = Quantizer::new();
        q.init(&two_degree_scale()).unwrap();
        assert!(q.init(&Scale::new(0.0, vec![Degree::new(0.0, 255)])).is_err());
        assert!(q.init(&Scale::new(1.0, vec![])).is_err());

        // Still quantizes against the two-degree scale.
        assert_abs_diff_eq!(q.process(0.1, 1.0, false), 0.0);
        assert_abs_diff_eq!(q.process(0.4, 1.0, false), 0.5);
    }

    #[test]
    fn test_level_zero_passes_through() {
        let mut q = Quantizer::new();
        q.init(&two_degree_scale()).unwrap();
        assert_abs_diff_eq!(q.process(0.3210, 0.0, false), 0.3210);
        assert_abs_diff_eq!(q.process(-1.234, -1.0, false), -1.234);
    }

    #[test]
    fn test_one_degree_per_octave_round_trip() {
        let mut q = Quantizer::new();
        q.init(&Scale::new(1.0, vec![Degree::new(0.0, 255)]))
            .unwrap();

        for k in -3..4 {
            let base = k as f32;
            assert_abs_diff_eq!(q.process(base + 0.2, 1.0, false), base);
            assert_abs_diff_eq!(q.process(base + 0.8, 1.0, false), base + 1.0);
            // Tie breaks to the lower multiple.
            assert_abs_diff_eq!(q.process(base + 0.5, 1.0, false), base);
        }
    }

    #[test]
    fn test_negative_voltages_fold_correctly() {
        let mut q = Quantizer::new();
        q.init(&two_degree_scale()).unwrap();
        assert_abs_diff_eq!(q.process(-0.9, 1.0, false), -1.0);
        assert_abs_diff_eq!(q.process(-0.6, 1.0, false), -0.5);
    }

    #[test]
    fn test_hysteresis_feedback_damps_boundary_chatter() {
        let mut q = Quantizer::new();
        q.init(&two_degree_scale()).unwrap();

        // Settle on the lower degree, leaving negative feedback behind.
        assert_abs_diff_eq!(q.process(0.20, 1.0, true), 0.0);
        // Just above the 0.25 midpoint: with hysteresis, stays low.
        assert_abs_diff_eq!(q.process(0.26, 1.0, true), 0.0);

        // Without hysteresis the same input flips to the upper degree.
        let mut q2 = Quantizer::new();
        q2.init(&two_degree_scale()).unwrap();
        assert_abs_diff_eq!(q2.process(0.20, 1.0, false), 0.0);
        assert_abs_diff_eq!(q2.process(0.26, 1.0, false), 0.5);
    }

    #[test]
    fn test_chord_avoids_used_voltages() {
        let mut q = Quantizer::new();
        q.init(&two_degree_scale()).unwrap();

        // All but one degree used: the remaining one must be chosen.
        let used = [0.0];
        let v = q.process_chord(0.1, 1.0, false, &used);
        assert_abs_diff_eq!(v, 0.5);

        let used = [0.5];
        let v = q.process_chord(0.4, 1.0, false, &used);
        assert_abs_diff_eq!(v, 0.0);
    }

    #[test]
    fn test_chord_all_used_falls_back() {
        let mut q = Quantizer::new();
        q.init(&two_degree_scale()).unwrap();

        // Every eligible degree (and the octave brackets) used: the
        // unrestricted pair is permitted rather than no note at all.
        let used = [-0.5, 0.0, 0.5, 1.0];
        let v = q.process_chord(0.1, 1.0, false, &used);
        assert!(used.contains(&v));
    }

    #[test]
    fn test_chord_empty_used_matches_plain_bracketing() {
        let mut q = Quantizer::new();
        q.init(&two_degree_scale()).unwrap();
        assert_abs_diff_eq!(q.process_chord(0.1, 1.0, false, &[]), 0.0);
        assert_abs_diff_eq!(q.process_chord(0.4, 1.0, false, &[]), 0.5);
    }

    #[test]
    fn test_chord_low_amount_prefers_rare_degrees() {
        // Rare F# (weight 8) should be eligible at the lowest chord level,
        // while the common C (255) is not.
        let mut q = Quantizer::new();
        q.init(&Scale::default()).unwrap();
        let v = q.process_chord(0.02, 0.0, false, &[]);
        // Snaps to a rare degree rather than C.
        assert!(v != 0.0);
    }
}
