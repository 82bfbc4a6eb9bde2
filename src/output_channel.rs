//! CV Output Channel
//!
//! One stochastic voltage lane: on every wrap of its step phase it draws a
//! value from the shared random sequence, shapes it through the spread/bias
//! distribution, optionally quantizes it against the active scale, and
//! renders it either stepped or glided. A channel can also be frozen into
//! register mode, where the external register value deterministically
//! replaces the random draw.

use crate::distributions::beta_sample;
use crate::gate::GateFlags;
use crate::lag::LagProcessor;
use crate::quantizer::Quantizer;
use crate::scale::{Scale, ScaleError, NUM_SCALE_SLOTS};
use crate::sequence::RandomSequence;
use serde::{Deserialize, Serialize};

/// Number of steps over which a freshly-enabled register keeps rewriting
/// the loop contents with the register value.
const NUM_REACQUISITIONS: u32 = 20;

/// How the register value is folded into quantized output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RootMode {
    /// Register transposes the raw voltage; quantization sees it directly.
    #[default]
    Off,
    /// Quantize first, then add the register voltage.
    Offset,
    /// Shift the lattice by the fractional part of the register voltage,
    /// preserving octaves.
    Reflect,
}

/// Chord behavior of the channel. Modes beyond [`ChordMode::Off`] force the
/// output to stay on the quantized lattice; the two slewed modes glide
/// between chord tones instead of stepping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChordMode {
    #[default]
    Off,
    /// Chord notes, same-note probability fixed.
    Basic,
    /// Same-note probability driven by the steps CV.
    StepsCv,
    /// Same-note probability driven by the bias CV.
    BiasCv,
    /// Like [`ChordMode::BiasCv`], with slewed transitions.
    BiasCvSlew,
    /// Same-note probability from the bias knob, slew amount from the steps
    /// knob.
    KnobSlew,
}

impl ChordMode {
    pub fn is_active(self) -> bool {
        self != ChordMode::Off
    }

    pub fn slews(self) -> bool {
        matches!(self, ChordMode::BiasCvSlew | ChordMode::KnobSlew)
    }
}

/// Affine map from the unit interval to the output voltage range.
#[derive(Debug, Clone, Copy)]
struct ScaleOffset {
    scale: f32,
    offset: f32,
}

impl ScaleOffset {
    const fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset }
    }

    fn apply(&self, x: f32) -> f32 {
        x * self.scale + self.offset
    }
}

pub struct OutputChannel {
    spread: f32,
    bias: f32,
    steps: f32,

    previous_spread: f32,
    previous_bias: f32,
    previous_steps: f32,

    scale_index: usize,
    root_mode: RootMode,
    chord_mode: ChordMode,
    slew_rate: f32,
    same_note_probability: f32,
    same_note: bool,

    register_mode: bool,
    register_value: f32,
    register_transposition: f32,
    reacquisition_counter: u32,

    gate_holding: bool,
    previous_phase: f32,

    previous_voltage: f32,
    voltage: f32,
    quantized_voltage: f32,
    quantized: bool,

    scale_offset: ScaleOffset,
    lag_processor: LagProcessor,
    quantizers: [Quantizer; NUM_SCALE_SLOTS],
}

impl OutputChannel {
    pub fn new() -> Self {
        Self {
            spread: 0.5,
            bias: 0.5,
            steps: 0.5,
            previous_spread: 0.5,
            previous_bias: 0.5,
            previous_steps: 0.5,
            scale_index: 0,
            root_mode: RootMode::Off,
            chord_mode: ChordMode::Off,
            slew_rate: 0.0,
            same_note_probability: 0.0,
            same_note: false,
            register_mode: false,
            register_value: 0.0,
            register_transposition: 0.0,
            reacquisition_counter: 0,
            gate_holding: false,
            previous_phase: 0.0,
            previous_voltage: 0.0,
            voltage: 0.0,
            quantized_voltage: 0.0,
            quantized: false,
            scale_offset: ScaleOffset::new(10.0, -5.0),
            lag_processor: LagProcessor::new(),
            quantizers: core::array::from_fn(|_| Quantizer::new()),
        }
    }

    /// Load a scale into one of the channel's slots. The previous table in
    /// that slot is kept on error.
    pub fn load_scale(&mut self, slot: usize, scale: &Scale) -> Result<(), ScaleError> {
        if slot >= NUM_SCALE_SLOTS {
            return Err(ScaleError::SlotOutOfRange(slot));
        }
        self.quantizers[slot].init(scale)
    }

    pub fn select_scale(&mut self, index: usize) {
        if index < NUM_SCALE_SLOTS {
            self.scale_index = index;
        }
    }

    pub fn set_spread(&mut self, spread: f32) {
        self.spread = spread;
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.bias = bias;
    }

    pub fn set_steps(&mut self, steps: f32) {
        self.steps = steps;
    }

    pub fn set_root_mode(&mut self, root_mode: RootMode) {
        self.root_mode = root_mode;
    }

    pub fn set_chord_mode(&mut self, chord_mode: ChordMode) {
        self.chord_mode = chord_mode;
    }

    pub fn set_slew_rate(&mut self, slew_rate: f32) {
        self.slew_rate = slew_rate;
    }

    pub fn set_same_note_probability(&mut self, p: f32) {
        self.same_note_probability = p;
    }

    pub fn same_note_probability(&self) -> f32 {
        self.same_note_probability
    }

    /// Tell the channel whether the upcoming step repeats the previous
    /// chord tone. Drawn externally so all chord channels share one coin.
    pub fn set_same_note(&mut self, same_note: bool) {
        self.same_note = same_note;
    }

    pub fn set_register_mode(&mut self, register_mode: bool) {
        if register_mode && !self.register_mode {
            self.reacquisition_counter = NUM_REACQUISITIONS;
        }
        self.register_mode = register_mode;
    }

    pub fn set_register_value(&mut self, register_value: f32) {
        self.register_value = register_value;
    }

    pub fn set_register_transposition(&mut self, register_transposition: f32) {
        self.register_transposition = register_transposition;
    }

    pub fn register_mode(&self) -> bool {
        self.register_mode
    }

    /// Last committed pre-quantization voltage.
    pub fn voltage(&self) -> f32 {
        self.voltage
    }

    pub fn previous_voltage(&self) -> f32 {
        self.previous_voltage
    }

    /// Last quantized voltage, if the channel has quantized anything yet.
    pub fn quantized_voltage(&self) -> Option<f32> {
        if self.quantized {
            Some(self.quantized_voltage)
        } else {
            None
        }
    }

    /// Render one block. `phase` is the master step phase in [0, 1);
    /// a wrap (sample below the previous sample) commits a new step.
    /// `used_voltages` lists chord tones already claimed by sibling
    /// channels; empty disables duplicate avoidance.
    pub fn process(
        &mut self,
        sequence: &mut RandomSequence,
        phase: &[f32],
        output: &mut [f32],
        external_gate: Option<&[GateFlags]>,
        external_hold: bool,
        used_voltages: &[f32],
    ) {
        debug_assert_eq!(phase.len(), output.len());
        let size = phase.len();

        let mut steps = self.previous_steps;
        let mut spread = self.previous_spread;
        let mut bias = self.previous_bias;
        let steps_increment = (self.steps - steps) / size as f32;
        let spread_increment = (self.spread - spread) / size as f32;
        let bias_increment = (self.bias - bias) / size as f32;

        if self.reacquisition_counter > 0 {
            // A register that was just enabled (or whose loop contents
            // predate it) replays random loop values that have nothing to
            // do with the frozen register. Rewriting the current loop entry
            // for a few steps makes the loop converge to the held value
            // instead of waiting a full revolution.
            self.reacquisition_counter -= 1;
            let u = sequence.rewrite_value(self.register_value);
            self.voltage = 10.0 * (u - 0.5) + self.register_transposition;
            self.requantize(2.0 * self.steps - 1.0, used_voltages);
        }

        for i in 0..size {
            let flags = external_gate.map_or(GateFlags::Low, |g| g[i]);
            if flags.is_high() {
                if external_hold {
                    self.gate_holding = true;
                } else {
                    sequence.reset_step();
                }
            } else {
                self.gate_holding = false;
            }

            steps += steps_increment;
            spread += spread_increment;
            bias += bias_increment;

            if !self.gate_holding && phase[i] < self.previous_phase {
                self.previous_voltage = self.voltage;
                let reuse_note = self.chord_mode.is_active() && self.same_note;
                if !reuse_note {
                    self.voltage = self.generate_new_voltage(sequence, spread, bias);
                }
                self.lag_processor.reset_ramp();
                self.requantize(2.0 * steps - 1.0, used_voltages);
                if self.register_mode {
                    self.reacquisition_counter = NUM_REACQUISITIONS;
                }
            }

            output[i] = if self.chord_mode.slews() {
                self.lag_processor
                    .process(self.quantized_voltage, self.slew_rate, phase[i])
            } else if self.chord_mode.is_active() || steps >= 0.5 {
                self.quantized_voltage
            } else {
                let smoothness = 1.0 - 2.0 * steps;
                self.lag_processor.process(self.voltage, smoothness, phase[i])
            };

            self.previous_phase = phase[i];
        }

        self.previous_steps = self.steps;
        self.previous_spread = self.spread;
        self.previous_bias = self.bias;
    }

    fn generate_new_voltage(&mut self, sequence: &mut RandomSequence, spread: f32, bias: f32) -> f32 {
        let deterministic = self.register_mode && self.root_mode == RootMode::Off;
        let u = sequence.next_value(deterministic, self.register_value);
        if deterministic {
            10.0 * (u - 0.5) + self.register_transposition
        } else {
            // Below spread = 0.05 the distribution collapses onto the bias;
            // above 0.95 it hardens into a Bernoulli coin between the two
            // range extremes. In between, the shaped draw is used as-is.
            let degenerate_amount = (1.25 - spread * 25.0).clamp(0.0, 1.0);
            let bernoulli_amount = (spread * 25.0 - 23.75).clamp(0.0, 1.0);
            let mut value = beta_sample(u, spread, bias);
            let bernoulli_value = if u >= 1.0 - bias { 0.999999 } else { 0.0 };
            value += degenerate_amount * (bias - value);
            value += bernoulli_amount * (bernoulli_value - value);
            self.scale_offset.apply(value)
        }
    }

    fn requantize(&mut self, amount: f32, used_voltages: &[f32]) {
        let voltage = self.voltage;
        self.quantized_voltage = match self.root_mode {
            RootMode::Off => self.quantize(voltage, amount, used_voltages),
            RootMode::Offset => {
                self.quantize(voltage, amount, used_voltages) + self.register_value * 10.0 - 5.0
            }
            RootMode::Reflect => {
                let root = self.register_value * 10.0 - 5.0;
                let offset = root - root.floor();
                self.quantize(voltage - offset, amount, used_voltages) + offset
            }
        };
    }

    fn quantize(&mut self, voltage: f32, amount: f32, used_voltages: &[f32]) -> f32 {
        self.quantized = true;
        let quantizer = &mut self.quantizers[self.scale_index];
        if used_voltages.is_empty() {
            quantizer.process(voltage, amount, false)
        } else {
            quantizer.process_chord(voltage, amount, false, used_voltages)
        }
    }
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new()
    }
}
