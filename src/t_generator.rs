//! Gate Generator
//!
//! Produces two correlated random gate streams locked to an externally
//! supplied master phase. Each wrap of the (rate-scaled) internal phase is a
//! clock; one of seven models decides which of the two channels fire, and
//! the per-clock random vector shapes pulse width and start jitter.
//!
//! The generator owns its own [`RandomSequence`], so its gate pattern can be
//! locked and edited with déjà vu independently of the voltage channels.

use crate::distributions::beta_sample;
use crate::gate::GateFlags;
use crate::hysteresis::HysteresisQuantizer;
use crate::rng::RandomStream;
use crate::sequence::{LoopCapacity, RandomSequence, SlotError, NUM_LOOP_SLOTS};
use serde::{Deserialize, Serialize};

pub const NUM_T_CHANNELS: usize = 2;
pub const MARKOV_HISTORY_SIZE: usize = 16;

const NUM_RATE_RATIOS: usize = 9;
const NUM_DRUM_PATTERNS: usize = 18;
const DRUM_PATTERN_SIZE: usize = 8;
const NUM_DIVIDER_PATTERNS: usize = 17;

/// Which stochastic process drives the two gate channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TModel {
    /// Exactly one channel fires per clock; bias sets which.
    #[default]
    ComplementaryBernoulli,
    /// Runs of the same channel, geometric run lengths.
    Clusters,
    /// Kick/snare style patterns selected by bias.
    Drums,
    /// Each channel fires on its own coin.
    IndependentBernoulli,
    /// Deterministic integer clock divisions selected by bias.
    Divider,
    /// Walk over three states: channel 1, both, channel 2.
    ThreeStates,
    /// Firing probability follows each channel's recent history.
    Markov,
}

/// Rate range multiplier applied on top of the clock ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TRange {
    /// 0.25x
    Slow,
    /// 1x
    #[default]
    Normal,
    /// 4x
    Fast,
}

impl TRange {
    pub fn multiplier(self) -> f32 {
        match self {
            TRange::Slow => 0.25,
            TRange::Normal => 1.0,
            TRange::Fast => 4.0,
        }
    }
}

#[derive(Clone, Copy)]
struct Ratio {
    num: u32,
    den: u32,
}

impl Ratio {
    const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    fn to_f32(self) -> f32 {
        self.num as f32 / self.den as f32
    }

    /// Bresenham pulse placement: `num` evenly spread hits every `den`
    /// clocks, always firing on clock 0.
    fn fires(self, step: u32) -> bool {
        (step * self.num) % self.den < self.num
    }
}

static RATE_RATIOS: [Ratio; NUM_RATE_RATIOS] = [
    Ratio::new(1, 4),
    Ratio::new(1, 3),
    Ratio::new(1, 2),
    Ratio::new(2, 3),
    Ratio::new(1, 1),
    Ratio::new(3, 2),
    Ratio::new(2, 1),
    Ratio::new(3, 1),
    Ratio::new(4, 1),
];

struct DividerPattern {
    ratios: [Ratio; NUM_T_CHANNELS],
    length: u32,
}

const fn divider(n1: u32, d1: u32, n2: u32, d2: u32, length: u32) -> DividerPattern {
    DividerPattern {
        ratios: [Ratio::new(n1, d1), Ratio::new(n2, d2)],
        length,
    }
}

static DIVIDER_PATTERNS: [DividerPattern; NUM_DIVIDER_PATTERNS] = [
    divider(1, 1, 1, 2, 2),
    divider(1, 1, 1, 3, 3),
    divider(1, 1, 1, 4, 4),
    divider(1, 1, 1, 6, 6),
    divider(1, 1, 1, 8, 8),
    divider(1, 2, 1, 3, 6),
    divider(1, 2, 1, 4, 4),
    divider(1, 2, 1, 6, 6),
    divider(1, 2, 1, 8, 8),
    divider(1, 3, 1, 4, 12),
    divider(1, 3, 1, 6, 6),
    divider(1, 4, 1, 6, 12),
    divider(1, 4, 1, 8, 8),
    divider(1, 6, 1, 8, 24),
    divider(2, 3, 1, 3, 3),
    divider(3, 4, 1, 4, 4),
    divider(2, 3, 1, 2, 6),
];

// Two-bit masks, bit 0 = channel 1 ("kick"), bit 1 = channel 2 ("snare"),
// ordered from sparse to busy so the bias sweep densifies the groove.
static DRUM_PATTERNS: [[u8; DRUM_PATTERN_SIZE]; NUM_DRUM_PATTERNS] = [
    [1, 0, 0, 0, 0, 0, 0, 0],
    [1, 0, 0, 0, 2, 0, 0, 0],
    [1, 0, 0, 0, 2, 0, 1, 0],
    [1, 0, 1, 0, 2, 0, 0, 0],
    [1, 0, 2, 0, 1, 0, 2, 0],
    [1, 0, 2, 0, 0, 1, 2, 0],
    [1, 0, 2, 1, 0, 0, 2, 0],
    [1, 0, 2, 0, 1, 1, 2, 0],
    [1, 1, 2, 0, 1, 0, 2, 0],
    [1, 0, 2, 1, 1, 0, 2, 1],
    [1, 1, 2, 0, 1, 1, 2, 0],
    [1, 0, 3, 0, 1, 0, 2, 1],
    [1, 1, 2, 1, 1, 0, 2, 1],
    [1, 2, 1, 2, 1, 2, 1, 2],
    [1, 1, 2, 1, 1, 1, 2, 1],
    [3, 0, 1, 2, 1, 0, 3, 2],
    [1, 3, 2, 1, 3, 1, 2, 3],
    [3, 3, 3, 3, 3, 3, 3, 3],
];

/// Per-clock draw consumed by the active model.
struct RandomVector {
    pulse_width: [f32; NUM_T_CHANNELS],
    u: [f32; NUM_T_CHANNELS],
    p: f32,
    jitter: f32,
}

impl RandomVector {
    fn draw(sequence: &mut RandomSequence) -> Self {
        let mut x = [0.0; 6];
        sequence.next_vector(&mut x);
        Self {
            pulse_width: [x[0], x[1]],
            u: [x[2], x[3]],
            p: x[4],
            jitter: x[5],
        }
    }
}

/// One scheduled gate within the current clock period, as a delayed window
/// on the internal phase.
#[derive(Debug, Clone, Copy, Default)]
struct SlaveRamp {
    armed: bool,
    delay: f32,
    width: f32,
}

impl SlaveRamp {
    fn schedule(&mut self, width: f32, delay: f32) {
        self.armed = true;
        self.width = width;
        self.delay = delay;
    }

    fn clear(&mut self) {
        self.armed = false;
    }

    fn gate(&self, phase: f32) -> bool {
        self.armed && phase >= self.delay && phase < (self.delay + self.width).min(1.0)
    }
}

/// Bookkeeping captured alongside a sequence slot, so pattern position
/// survives a save/load round trip.
#[derive(Debug, Clone, Copy, Default)]
struct StateSlot {
    streak: [i32; NUM_T_CHANNELS],
    markov_history: [u8; MARKOV_HISTORY_SIZE],
    markov_history_ptr: usize,
    drum_pattern_step: usize,
    divider_step: u32,
    three_state: usize,
}

pub struct TGenerator {
    model: TModel,
    range: TRange,
    rate: f32,
    bias: f32,
    jitter: f32,
    pulse_width_mean: f32,
    pulse_width_std: f32,

    master_phase: f32,
    previous_external_phase: f32,
    gate_holding: bool,

    streak: [i32; NUM_T_CHANNELS],
    markov_history: [u8; MARKOV_HISTORY_SIZE],
    markov_history_ptr: usize,
    drum_pattern_step: usize,
    divider_step: u32,
    three_state: usize,

    bias_quantizer: HysteresisQuantizer,
    rate_quantizer: HysteresisQuantizer,

    sequence: RandomSequence,
    slave_ramps: [SlaveRamp; NUM_T_CHANNELS],
    state_slots: [StateSlot; NUM_LOOP_SLOTS],
}

impl TGenerator {
    pub fn new(stream: RandomStream) -> Self {
        Self {
            model: TModel::default(),
            range: TRange::default(),
            rate: 0.5,
            bias: 0.5,
            jitter: 0.0,
            pulse_width_mean: 0.5,
            pulse_width_std: 0.0,
            master_phase: 0.0,
            previous_external_phase: 0.0,
            gate_holding: false,
            streak: [0; NUM_T_CHANNELS],
            markov_history: [0; MARKOV_HISTORY_SIZE],
            markov_history_ptr: 0,
            drum_pattern_step: 0,
            divider_step: 0,
            three_state: 0,
            bias_quantizer: HysteresisQuantizer::new(),
            rate_quantizer: HysteresisQuantizer::new(),
            sequence: RandomSequence::new(stream),
            slave_ramps: [SlaveRamp::default(); NUM_T_CHANNELS],
            state_slots: [StateSlot::default(); NUM_LOOP_SLOTS],
        }
    }

    pub fn set_model(&mut self, model: TModel) {
        self.model = model;
    }

    pub fn set_range(&mut self, range: TRange) {
        self.range = range;
    }

    /// Rate control in [0, 1]; snapped to one of nine musical ratios.
    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate.clamp(0.0, 1.0);
    }

    pub fn set_bias(&mut self, bias: f32) {
        self.bias = bias.clamp(0.0, 1.0);
    }

    pub fn set_jitter(&mut self, jitter: f32) {
        self.jitter = jitter.clamp(0.0, 1.0);
    }

    pub fn set_pulse_width_mean(&mut self, mean: f32) {
        self.pulse_width_mean = mean.clamp(0.0, 1.0);
    }

    pub fn set_pulse_width_std(&mut self, std: f32) {
        self.pulse_width_std = std.clamp(0.0, 1.0);
    }

    pub fn set_deja_vu(&mut self, deja_vu: f32) {
        self.sequence.set_deja_vu(deja_vu);
    }

    pub fn set_length(&mut self, length: usize) {
        self.sequence.set_length(length);
    }

    pub fn set_start(&mut self, start: usize) {
        self.sequence.set_start(start);
    }

    pub fn set_loop_capacity(&mut self, capacity: LoopCapacity) {
        self.sequence.set_loop_capacity(capacity);
    }

    pub fn sequence(&mut self) -> &mut RandomSequence {
        &mut self.sequence
    }

    /// Save the déjà vu loop together with the pattern bookkeeping.
    pub fn save_slot(&mut self, slot: usize) -> Result<(), SlotError> {
        self.sequence.save_slot(slot)?;
        self.state_slots[slot] = StateSlot {
            streak: self.streak,
            markov_history: self.markov_history,
            markov_history_ptr: self.markov_history_ptr,
            drum_pattern_step: self.drum_pattern_step,
            divider_step: self.divider_step,
            three_state: self.three_state,
        };
        Ok(())
    }

    pub fn load_slot(&mut self, slot: usize) -> Result<(), SlotError> {
        self.sequence.load_slot(slot)?;
        let state = self.state_slots[slot];
        self.streak = state.streak;
        self.markov_history = state.markov_history;
        self.markov_history_ptr = state.markov_history_ptr;
        self.drum_pattern_step = state.drum_pattern_step;
        self.divider_step = state.divider_step;
        self.three_state = state.three_state;
        Ok(())
    }

    /// Advance by one block of external master phase and fill per-sample
    /// gate levels for both channels.
    pub fn process(
        &mut self,
        external_phase: &[f32],
        gates: &mut [[bool; NUM_T_CHANNELS]],
        external_reset: Option<&[GateFlags]>,
        external_hold: bool,
    ) {
        debug_assert_eq!(external_phase.len(), gates.len());

        let ratio_index = self.rate_quantizer.process(self.rate, NUM_RATE_RATIOS);
        let multiplier = self.range.multiplier() * RATE_RATIOS[ratio_index].to_f32();

        for (i, &phase) in external_phase.iter().enumerate() {
            let flags = external_reset.map_or(GateFlags::Low, |g| g[i]);
            if flags.is_high() {
                if external_hold {
                    self.gate_holding = true;
                } else {
                    self.sequence.reset_step();
                }
            } else {
                self.gate_holding = false;
            }

            let mut delta = phase - self.previous_external_phase;
            if delta < 0.0 {
                delta += 1.0;
            }
            self.previous_external_phase = phase;

            if !self.gate_holding {
                self.master_phase += delta * multiplier;
                while self.master_phase >= 1.0 {
                    self.master_phase -= 1.0;
                    self.on_clock();
                }
            }

            for (channel, ramp) in self.slave_ramps.iter().enumerate() {
                gates[i][channel] = ramp.gate(self.master_phase);
            }
        }
    }

    fn on_clock(&mut self) {
        let vector = RandomVector::draw(&mut self.sequence);
        let bitmask = match self.model {
            TModel::ComplementaryBernoulli => self.clock_complementary(&vector),
            TModel::Clusters => self.clock_clusters(&vector),
            TModel::Drums => self.clock_drums(),
            TModel::IndependentBernoulli => self.clock_independent(&vector),
            TModel::Divider => self.clock_divider(),
            TModel::ThreeStates => self.clock_three_states(&vector),
            TModel::Markov => self.clock_markov(&vector),
        };

        let delay = self.jitter * vector.jitter * 0.25;
        for channel in 0..NUM_T_CHANNELS {
            if bitmask & (1 << channel) != 0 {
                let width = self.random_pulse_width(vector.pulse_width[channel]);
                self.slave_ramps[channel].schedule(width, delay);
            } else {
                self.slave_ramps[channel].clear();
            }
        }
    }

    fn clock_complementary(&mut self, vector: &RandomVector) -> u8 {
        if vector.p < self.bias {
            2
        } else {
            1
        }
    }

    fn clock_independent(&mut self, vector: &RandomVector) -> u8 {
        let mut mask = 0;
        if vector.u[0] < 1.0 - self.bias {
            mask |= 1;
        }
        if vector.u[1] < self.bias {
            mask |= 2;
        }
        mask
    }

    fn clock_clusters(&mut self, vector: &RandomVector) -> u8 {
        let current = usize::from(self.streak[1] > 0);
        // Geometric run lengths; bias stretches the runs.
        let continue_probability = 0.3 + 0.65 * self.bias;
        let channel = if vector.p < continue_probability {
            current
        } else {
            1 - current
        };
        self.streak[channel] += 1;
        self.streak[1 - channel] = 0;
        1 << channel
    }

    fn clock_drums(&mut self) -> u8 {
        let index = self.bias_quantizer.process(self.bias, NUM_DRUM_PATTERNS);
        let mask = DRUM_PATTERNS[index][self.drum_pattern_step];
        self.drum_pattern_step = (self.drum_pattern_step + 1) % DRUM_PATTERN_SIZE;
        mask
    }

    fn clock_divider(&mut self) -> u8 {
        let index = self.bias_quantizer.process(self.bias, NUM_DIVIDER_PATTERNS);
        let pattern = &DIVIDER_PATTERNS[index];
        let step = self.divider_step;
        self.divider_step = (step + 1) % pattern.length;
        let mut mask = 0;
        for (channel, ratio) in pattern.ratios.iter().enumerate() {
            if ratio.fires(step) {
                mask |= 1 << channel;
            }
        }
        mask
    }

    fn clock_three_states(&mut self, vector: &RandomVector) -> u8 {
        if vector.p < 0.5 {
            let direction = if vector.u[0] < self.bias { 1 } else { 2 };
            self.three_state = (self.three_state + direction) % 3;
        }
        [1, 3, 2][self.three_state]
    }

    fn clock_markov(&mut self, vector: &RandomVector) -> u8 {
        let mut counts = [0usize; NUM_T_CHANNELS];
        for &entry in &self.markov_history {
            for (channel, count) in counts.iter_mut().enumerate() {
                if entry & (1 << channel) != 0 {
                    *count += 1;
                }
            }
        }
        // Each channel's probability blends its recent firing rate with the
        // bias, so patterns self-reinforce but the knob still steers them.
        let mut mask = 0;
        for channel in 0..NUM_T_CHANNELS {
            let frequency = counts[channel] as f32 / MARKOV_HISTORY_SIZE as f32;
            let probability = (0.5 * self.bias + 0.5 * frequency).clamp(0.05, 0.95);
            if vector.u[channel] < probability {
                mask |= 1 << channel;
            }
        }
        self.markov_history[self.markov_history_ptr] = mask;
        self.markov_history_ptr = (self.markov_history_ptr + 1) % MARKOV_HISTORY_SIZE;
        mask
    }

    fn random_pulse_width(&self, u: f32) -> f32 {
        if self.pulse_width_std == 0.0 {
            0.05 + 0.9 * self.pulse_width_mean
        } else {
            0.05 + 0.9 * beta_sample(u, self.pulse_width_std, self.pulse_width_mean)
        }
    }
}
