//! Presets and Persistence
//!
//! Serializable snapshots of the control-plane state: everything a host
//! would save with a patch, none of the internal random state. A preset is
//! applied through the public setters, so loading one behaves exactly like
//! turning the knobs.

use crate::output_channel::{ChordMode, OutputChannel, RootMode};
use crate::scale::{Scale, ScaleError, NUM_SCALE_SLOTS};
use crate::sequence::{LoopCapacity, RandomSequence};
use crate::t_generator::{TGenerator, TModel, TRange};
use serde::{Deserialize, Serialize};

/// Serializable preset definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresetDef {
    /// Schema version for forward compatibility
    pub version: u32,

    pub name: String,

    /// Gate generator parameters
    pub generator: GeneratorDef,

    /// Déjà vu loop shared by the voltage channels
    pub sequence: SequenceDef,

    /// Per-channel voltage parameters
    pub channels: Vec<ChannelDef>,

    /// Scale slot contents; entries beyond the slot count are ignored
    pub scales: Vec<Scale>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorDef {
    pub model: TModel,
    pub range: TRange,
    pub rate: f32,
    pub bias: f32,
    pub jitter: f32,
    pub pulse_width_mean: f32,
    pub pulse_width_std: f32,
    pub deja_vu: f32,
    pub loop_length: usize,
    pub loop_start: usize,
    pub loop_capacity: LoopCapacity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceDef {
    pub deja_vu: f32,
    pub loop_length: usize,
    pub loop_start: usize,
    pub loop_capacity: LoopCapacity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDef {
    pub spread: f32,
    pub bias: f32,
    pub steps: f32,
    pub scale_index: usize,
    pub root_mode: RootMode,
    pub chord_mode: ChordMode,
    pub slew_rate: f32,
    pub register_mode: bool,
    pub register_value: f32,
    pub register_transposition: f32,
}

impl PresetDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            version: 1,
            name: name.into(),
            generator: GeneratorDef::default(),
            sequence: SequenceDef::default(),
            channels: vec![ChannelDef::default(); 3],
            scales: vec![],
        }
    }

    /// Push the preset into a generator, a voltage sequence and its
    /// channels. Scales load first so channel scale indices land on the
    /// new tables.
    pub fn apply(
        &self,
        generator: &mut TGenerator,
        sequence: &mut RandomSequence,
        channels: &mut [OutputChannel],
    ) -> Result<(), ScaleError> {
        for (slot, scale) in self.scales.iter().enumerate().take(NUM_SCALE_SLOTS) {
            for channel in channels.iter_mut() {
                channel.load_scale(slot, scale)?;
            }
        }
        self.generator.apply(generator);
        self.sequence.apply(sequence);
        for (channel, def) in channels.iter_mut().zip(self.channels.iter()) {
            def.apply(channel);
        }
        Ok(())
    }

    /// Serialize to JSON string
    #[cfg(feature = "alloc")]
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize from JSON string
    #[cfg(feature = "alloc")]
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

impl Default for PresetDef {
    fn default() -> Self {
        Self::new("init")
    }
}

impl GeneratorDef {
    pub fn apply(&self, generator: &mut TGenerator) {
        generator.set_model(self.model);
        generator.set_range(self.range);
        generator.set_rate(self.rate);
        generator.set_bias(self.bias);
        generator.set_jitter(self.jitter);
        generator.set_pulse_width_mean(self.pulse_width_mean);
        generator.set_pulse_width_std(self.pulse_width_std);
        generator.set_loop_capacity(self.loop_capacity);
        generator.set_deja_vu(self.deja_vu);
        generator.set_length(self.loop_length);
        generator.set_start(self.loop_start);
    }
}

impl Default for GeneratorDef {
    fn default() -> Self {
        Self {
            model: TModel::default(),
            range: TRange::default(),
            rate: 0.5,
            bias: 0.5,
            jitter: 0.0,
            pulse_width_mean: 0.5,
            pulse_width_std: 0.0,
            deja_vu: 0.0,
            loop_length: 8,
            loop_start: 0,
            loop_capacity: LoopCapacity::default(),
        }
    }
}

impl SequenceDef {
    pub fn apply(&self, sequence: &mut RandomSequence) {
        sequence.set_loop_capacity(self.loop_capacity);
        sequence.set_deja_vu(self.deja_vu);
        sequence.set_length(self.loop_length);
        sequence.set_start(self.loop_start);
    }
}

impl Default for SequenceDef {
    fn default() -> Self {
        Self {
            deja_vu: 0.0,
            loop_length: 8,
            loop_start: 0,
            loop_capacity: LoopCapacity::default(),
        }
    }
}

impl ChannelDef {
    pub fn apply(&self, channel: &mut OutputChannel) {
        channel.set_spread(self.spread);
        channel.set_bias(self.bias);
        channel.set_steps(self.steps);
        channel.select_scale(self.scale_index);
        channel.set_root_mode(self.root_mode);
        channel.set_chord_mode(self.chord_mode);
        channel.set_slew_rate(self.slew_rate);
        channel.set_register_mode(self.register_mode);
        channel.set_register_value(self.register_value);
        channel.set_register_transposition(self.register_transposition);
    }
}

impl Default for ChannelDef {
    fn default() -> Self {
        Self {
            spread: 0.5,
            bias: 0.5,
            steps: 0.5,
            scale_index: 0,
            root_mode: RootMode::default(),
            chord_mode: ChordMode::default(),
            slew_rate: 0.0,
            register_mode: false,
            register_value: 0.0,
            register_transposition: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::RandomStream;
    use crate::scale::Degree;

    #[test]
    fn test_json_round_trip() {
        let mut preset = PresetDef::new("bench patch");
        preset.generator.model = TModel::Drums;
        preset.generator.bias = 0.3;
        preset.sequence.deja_vu = 0.5;
        preset.channels[1].chord_mode = ChordMode::Basic;
        preset.scales.push(Scale::default());

        let json = preset.to_json().unwrap();
        let restored = PresetDef::from_json(&json).unwrap();
        assert_eq!(restored.version, 1);
        assert_eq!(restored.name, "bench patch");
        assert_eq!(restored.generator.model, TModel::Drums);
        assert_eq!(restored.sequence.deja_vu, 0.5);
        assert_eq!(restored.channels[1].chord_mode, ChordMode::Basic);
        assert_eq!(restored.scales.len(), 1);
    }

    #[test]
    fn test_apply_pushes_settings() {
        let mut preset = PresetDef::new("applied");
        preset.sequence.deja_vu = 0.75;
        preset.sequence.loop_length = 5;
        preset.channels[0].register_mode = true;
        preset.scales = vec![Scale::new(
            1.0,
            vec![Degree::new(0.0, 255), Degree::new(0.5, 128)],
        )];

        let mut generator = TGenerator::new(RandomStream::from_seed(1));
        let mut sequence = RandomSequence::new(RandomStream::from_seed(2));
        let mut channels = [
            OutputChannel::new(),
            OutputChannel::new(),
            OutputChannel::new(),
        ];
        preset
            .apply(&mut generator, &mut sequence, &mut channels)
            .unwrap();
        assert_eq!(sequence.deja_vu(), 0.75);
        assert_eq!(sequence.length(), 5);
        assert!(channels[0].register_mode());
        assert!(!channels[1].register_mode());
    }

    #[test]
    fn test_apply_rejects_degenerate_scale() {
        let mut preset = PresetDef::new("bad");
        preset.scales = vec![Scale::new(1.0, vec![])];
        let mut generator = TGenerator::new(RandomStream::from_seed(1));
        let mut sequence = RandomSequence::new(RandomStream::from_seed(2));
        let mut channels = [OutputChannel::new()];
        assert!(preset
            .apply(&mut generator, &mut sequence, &mut channels)
            .is_err());
    }
}
