use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::{ms, GearTiming};

pub const FORWARD_THRESHOLD: f64 = 0.6;
pub const REVERSE_THRESHOLD: f64 = -1.46;
/// Decision parked on when the request falls in the neutral band.
pub const NEUTRAL_DECISION: f64 = -0.42;
pub const MAX_FORWARD_DECISION: f64 = 5.0;
pub const MIN_FORWARD_DECISION: f64 = 0.62;
pub const MAX_REVERSE_DECISION: f64 = -1.48;
pub const MIN_REVERSE_DECISION: f64 = -4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GearState{
    Neutral,
    Forward,
    Reverse,
}

impl GearState{
    pub const ALL: [GearState; 3] = [GearState::Neutral, GearState::Forward, GearState::Reverse];

    pub fn for_decision(decision: f64) -> Self{
        if decision >= FORWARD_THRESHOLD{
            GearState::Forward
        }else if decision <= REVERSE_THRESHOLD{
            GearState::Reverse
        }else{
            GearState::Neutral
        }
    }

    /// Voltage window the lever board reports once the gear has engaged.
    /// Both ends inclusive.
    pub fn confirmation_window(&self) -> (f64, f64){
        match self{
            GearState::Neutral => (2.65, 2.75),
            GearState::Forward => (2.0, 2.3),
            GearState::Reverse => (3.2, 3.3),
        }
    }

    /// Voltage assumed after a hop when there is no board to ask.
    pub fn nominal_voltage(&self) -> f64{
        match self{
            GearState::Neutral => 2.71,
            GearState::Forward => 2.19,
            GearState::Reverse => 3.24,
        }
    }

    pub fn accepts(&self, volts: f64) -> bool{
        let (low, high) = self.confirmation_window();
        (low..=high).contains(&volts)
    }
}

impl fmt::Display for GearState{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        let name = match self{
            GearState::Neutral => "neutral",
            GearState::Forward => "forward",
            GearState::Reverse => "reverse",
        };
        f.write_str(name)
    }
}

/// One leg of a gear change: the gear to engage and how long to wait
/// before looking for confirmation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hop{
    pub to: GearState,
    pub delay: Duration,
}

/// Legs needed to get from `from` to `to`.
///
/// Forward and reverse never meet directly, the lever has to rest in
/// neutral in between. Empty when there is nothing to do.
pub fn transition_plan(from: GearState, to: GearState, timing: &GearTiming) -> Vec<Hop>{
    use GearState::*;
    match (from, to){
        (Forward, Reverse) | (Reverse, Forward) => vec![
            Hop{ to: Neutral, delay: ms(timing.indirect_first_hop_ms) },
            Hop{ to, delay: ms(timing.indirect_second_hop_ms) },
        ],
        (a, b) if a == b => Vec::new(),
        (_, to) => vec![Hop{ to, delay: ms(timing.single_hop_ms) }],
    }
}

/// Control voltage a decision asks for.
pub fn target_voltage(decision: f64) -> f64{
    (5.0 - decision) / 2.0
}

/// Inverse of [`target_voltage`], used when re-basing the shadow.
pub fn decision_for_voltage(volts: f64) -> f64{
    5.0 - 2.0 * volts
}

/// Number of `range`-sized steps between `current` and the target for
/// `decision`. Halves round away from zero.
pub fn voltage_steps(decision: f64, current: f64, range: f64) -> u32{
    ((target_voltage(decision) - current).abs() / range).round() as u32
}

/// Snaps a requested decision onto the ranges the lever can hold.
pub fn clamp_decision(decision: f64) -> f64{
    if decision > REVERSE_THRESHOLD && decision < FORWARD_THRESHOLD{
        NEUTRAL_DECISION
    }else if decision > 0.0{
        decision.clamp(MIN_FORWARD_DECISION, MAX_FORWARD_DECISION)
    }else{
        decision.clamp(MIN_REVERSE_DECISION, MAX_REVERSE_DECISION)
    }
}
