//! Scale Data Model
//!
//! A [`Scale`] is supplied by the host (panel firmware, preset storage) and
//! describes the set of voltages the quantizer may snap to. Each degree
//! carries a weight in 0..=255 ranking how "common" it is: 255 means the
//! degree survives at every resolution level, lower weights are only
//! included as the quantization amount opens up.

use serde::{Deserialize, Serialize};

/// Maximum number of degrees per scale (degree sets are tracked in a u16
/// bitmask).
pub const MAX_DEGREES: usize = 16;

/// Number of scale slots each output channel holds.
pub const NUM_SCALE_SLOTS: usize = 6;

/// One degree of a scale: a voltage inside the base interval and its weight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Degree {
    pub voltage: f32,
    pub weight: u8,
}

impl Degree {
    pub const fn new(voltage: f32, weight: u8) -> Self {
        Self { voltage, weight }
    }
}

/// A weighted musical scale over one repeating interval (usually 1 V/oct).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scale {
    /// Voltage span of one repeating unit, e.g. 1.0 for an octave.
    pub base_interval: f32,
    pub degrees: Vec<Degree>,
}

/// Why a scale was rejected at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleError {
    /// Zero degrees, or more than [`MAX_DEGREES`].
    InvalidDegreeCount(usize),
    /// `base_interval` must be non-zero.
    ZeroInterval,
    /// Scale slot index at or beyond [`NUM_SCALE_SLOTS`].
    SlotOutOfRange(usize),
}

impl core::fmt::Display for ScaleError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ScaleError::InvalidDegreeCount(n) => {
                write!(f, "Invalid degree count: {} (expected 1..={})", n, MAX_DEGREES)
            }
            ScaleError::ZeroInterval => write!(f, "Scale base interval must be non-zero"),
            ScaleError::SlotOutOfRange(slot) => {
                write!(f, "Scale slot {} out of range (0..{})", slot, NUM_SCALE_SLOTS)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for ScaleError {}

impl Scale {
    pub fn new(base_interval: f32, degrees: Vec<Degree>) -> Self {
        Self {
            base_interval,
            degrees,
        }
    }

    /// Check the invariants the quantizer relies on.
    pub fn validate(&self) -> Result<(), ScaleError> {
        let n = self.degrees.len();
        if n == 0 || n > MAX_DEGREES {
            return Err(ScaleError::InvalidDegreeCount(n));
        }
        if self.base_interval == 0.0 {
            return Err(ScaleError::ZeroInterval);
        }
        Ok(())
    }

    pub fn num_degrees(&self) -> usize {
        self.degrees.len()
    }
}

impl Default for Scale {
    /// C major over 1 V/oct, chromatic passing tones ranked low.
    fn default() -> Self {
        Self::new(
            1.0,
            vec![
                Degree::new(0.0000, 255), // C
                Degree::new(0.0833, 16),  // C#
                Degree::new(0.1667, 96),  // D
                Degree::new(0.2500, 24),  // D#
                Degree::new(0.3333, 128), // E
                Degree::new(0.4167, 64),  // F
                Degree::new(0.5000, 8),   // F#
                Degree::new(0.5833, 192), // G
                Degree::new(0.6667, 16),  // G#
                Degree::new(0.7500, 96),  // A
                Degree::new(0.8333, 24),  // A#
                Degree::new(0.9167, 64),  // B
            ],
        )
    }
}
