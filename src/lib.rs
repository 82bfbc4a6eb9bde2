//! # Aleator: Stochastic CV and Gate Generation
//!
//! `aleator` is the random core of a control-voltage and gate generator for
//! modular synthesis: correlated random gate streams on one side, shaped and
//! quantized random voltages on the other, both built on a lockable random
//! loop ("déjà vu") that can replay, mutate and shuffle its own past.
//!
//! ## Architecture
//!
//! The engine is organized around three pieces:
//!
//! - **Random backbone** - a deterministic Xorshift128+ stream feeding a
//!   loopable [`sequence::RandomSequence`] with record/replay and slot
//!   save/restore
//! - **Voltage side** - [`output_channel::OutputChannel`] shapes draws
//!   through a spread/bias distribution, quantizes against weighted scales,
//!   and renders stepped or glided CV
//! - **Gate side** - [`t_generator::TGenerator`] clocks one of seven
//!   stochastic models and renders two channels of jittered, width-shaped
//!   gates
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aleator::prelude::*;
//!
//! let mut sequence = RandomSequence::new(RandomStream::from_seed(42));
//! let mut channel = OutputChannel::new();
//! sequence.set_deja_vu(0.5);
//! channel.set_steps(1.0);
//!
//! // One step period of master phase, 8 samples per step.
//! let phase: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
//! let mut cv = vec![0.0; phase.len()];
//! channel.process(&mut sequence, &phase, &mut cv, None, false, &[]);
//!
//! let mut gates = TGenerator::new(RandomStream::from_seed(17));
//! let mut levels = vec![[false; 2]; phase.len()];
//! gates.process(&phase, &mut levels, None, false);
//! ```

pub mod distributions;
pub mod gate;
pub mod hysteresis;
pub mod lag;
pub mod output_channel;
pub mod presets;
pub mod quantizer;
pub mod rng;
pub mod scale;
pub mod sequence;
pub mod t_generator;

/// Prelude module for convenient imports
pub mod prelude {
    // Random backbone
    pub use crate::rng::RandomStream;
    pub use crate::sequence::{
        repetition_probability, LoopCapacity, RandomSequence, SlotError, DEJA_VU_BUFFER_SIZE,
        NUM_LOOP_SLOTS,
    };

    // Voltage side
    pub use crate::hysteresis::HysteresisQuantizer;
    pub use crate::lag::LagProcessor;
    pub use crate::output_channel::{ChordMode, OutputChannel, RootMode};
    pub use crate::quantizer::Quantizer;
    pub use crate::scale::{Degree, Scale, ScaleError, MAX_DEGREES, NUM_SCALE_SLOTS};

    // Gate side
    pub use crate::gate::{extract_gate_flags, GateFlags};
    pub use crate::t_generator::{TGenerator, TModel, TRange, NUM_T_CHANNELS};

    // Shaped randomness
    pub use crate::distributions::beta_sample;

    // Persistence
    pub use crate::presets::{ChannelDef, GeneratorDef, PresetDef, SequenceDef};
}
