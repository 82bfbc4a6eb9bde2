//! Gate Edge Tracking
//!
//! External gate inputs arrive as per-sample flags carrying both level and
//! edge information, so downstream consumers never have to keep their own
//! previous-sample state.

/// Level plus edge of a gate signal at one sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateFlags {
    #[default]
    Low,
    Rising,
    High,
    Falling,
}

impl GateFlags {
    /// Fold the next boolean level into the flag stream.
    pub fn extract(self, high: bool) -> GateFlags {
        let was_high = matches!(self, GateFlags::High | GateFlags::Rising);
        match (was_high, high) {
            (false, true) => GateFlags::Rising,
            (true, true) => GateFlags::High,
            (true, false) => GateFlags::Falling,
            (false, false) => GateFlags::Low,
        }
    }

    pub fn is_high(self) -> bool {
        matches!(self, GateFlags::High | GateFlags::Rising)
    }
}

/// Convert a block of boolean levels into gate flags.
pub fn extract_gate_flags(previous: GateFlags, levels: &[bool], flags: &mut [GateFlags]) -> GateFlags {
    let mut state = previous;
    for (level, flag) in levels.iter().zip(flags.iter_mut()) {
        state = state.extract(*level);
        *flag = state;
    }
    state
}
