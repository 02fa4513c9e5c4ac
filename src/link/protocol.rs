//command vocabulary understood by the lever board and the two rudder boards
//tokens are plain ASCII, written without terminator, no acknowledgement

use std::fmt;
use std::str::FromStr;
use crate::gear::GearState;
use crate::side::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StepSize{
    One,
    Five,
    Ten,
}

impl StepSize{
    pub const ALL: [StepSize; 3] = [StepSize::One, StepSize::Five, StepSize::Ten];

    pub fn volts(&self) -> f64{
        match self{
            StepSize::One => 0.01,
            StepSize::Five => 0.05,
            StepSize::Ten => 0.1,
        }
    }

    pub fn millivolts(&self) -> i32{
        match self{
            StepSize::One => 10,
            StepSize::Five => 50,
            StepSize::Ten => 100,
        }
    }

    /// Maps a requested granularity onto one of the three step families.
    pub fn from_range(range: f64) -> Option<Self>{
        StepSize::ALL.into_iter().find(|s| (s.volts() - range).abs() < 1e-9)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Press{
    Long,
    Short,
}

/// Lever (gear) board commands.
///
/// The board names are from the throttle's point of view: `Accelerate`
/// lowers the control voltage, `Decelerate` raises it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BoardToken{
    Accelerate{ side: Side, size: StepSize },
    Decelerate{ side: Side, size: StepSize },
    Shift{ side: Side, gear: GearState },
    ThrottleOnly(Press),
    StationSelect(Press),
}

impl BoardToken{
    /// Step token that moves the control voltage towards `raise` (true = up).
    pub fn step(side: Side, size: StepSize, raise: bool) -> Self{
        if raise{
            BoardToken::Decelerate{ side, size }
        }else{
            BoardToken::Accelerate{ side, size }
        }
    }

    pub fn as_str(&self) -> &'static str{
        use BoardToken::*;
        match self{
            Accelerate{ side: Side::Left, size: StepSize::One } => "LPS_L_ACC",
            Accelerate{ side: Side::Left, size: StepSize::Five } => "LPS_L_ACC_Five",
            Accelerate{ side: Side::Left, size: StepSize::Ten } => "LPS_L_ACC_Ten",
            Accelerate{ side: Side::Right, size: StepSize::One } => "LPS_R_ACC",
            Accelerate{ side: Side::Right, size: StepSize::Five } => "LPS_R_ACC_Five",
            Accelerate{ side: Side::Right, size: StepSize::Ten } => "LPS_R_ACC_Ten",
            Decelerate{ side: Side::Left, size: StepSize::One } => "LPS_L_DEC",
            Decelerate{ side: Side::Left, size: StepSize::Five } => "LPS_L_DEC_Five",
            Decelerate{ side: Side::Left, size: StepSize::Ten } => "LPS_L_DEC_Ten",
            Decelerate{ side: Side::Right, size: StepSize::One } => "LPS_R_DEC",
            Decelerate{ side: Side::Right, size: StepSize::Five } => "LPS_R_DEC_Five",
            Decelerate{ side: Side::Right, size: StepSize::Ten } => "LPS_R_DEC_Ten",
            Shift{ side: Side::Left, gear: GearState::Neutral } => "LPS_L_Neutral",
            Shift{ side: Side::Left, gear: GearState::Forward } => "LPS_L_Forward",
            Shift{ side: Side::Left, gear: GearState::Reverse } => "LPS_L_Reverse",
            Shift{ side: Side::Right, gear: GearState::Neutral } => "LPS_R_Neutral",
            Shift{ side: Side::Right, gear: GearState::Forward } => "LPS_R_Forward",
            Shift{ side: Side::Right, gear: GearState::Reverse } => "LPS_R_Reverse",
            ThrottleOnly(Press::Long) => "TH_ONLY_LONG_PRESS",
            ThrottleOnly(Press::Short) => "TH_ONLY_SHORT_PRESS",
            StationSelect(Press::Long) => "STA_SEL_LONG_PRESS",
            StationSelect(Press::Short) => "STA_SEL_SHORT_PRESS",
        }
    }

    pub fn all() -> Vec<BoardToken>{
        let mut tokens = Vec::with_capacity(22);
        for side in Side::BOTH{
            for size in StepSize::ALL{
                tokens.push(BoardToken::Accelerate{ side, size });
                tokens.push(BoardToken::Decelerate{ side, size });
            }
            for gear in GearState::ALL{
                tokens.push(BoardToken::Shift{ side, gear });
            }
        }
        for press in [Press::Long, Press::Short]{
            tokens.push(BoardToken::ThrottleOnly(press));
            tokens.push(BoardToken::StationSelect(press));
        }
        tokens
    }

    pub fn side(&self) -> Option<Side>{
        match self{
            BoardToken::Accelerate{ side, .. }
            | BoardToken::Decelerate{ side, .. }
            | BoardToken::Shift{ side, .. } => Some(*side),
            _ => None,
        }
    }
}

impl fmt::Display for BoardToken{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        f.write_str(self.as_str())
    }
}

impl FromStr for BoardToken{
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err>{
        BoardToken::all().into_iter().find(|t| t.as_str() == s).ok_or(())
    }
}

/// Rudder (autopilot) board commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RudderToken{
    StandbyMode,
    AutoMode,
    FollowUpMode,
    AutoStarboardOneDeg,
    AutoPortOneDeg,
    FollowUpStarboardOneDeg,
    FollowUpPortOneDeg,
}

impl RudderToken{
    pub const ALL: [RudderToken; 7] = [
        RudderToken::StandbyMode,
        RudderToken::AutoMode,
        RudderToken::FollowUpMode,
        RudderToken::AutoStarboardOneDeg,
        RudderToken::AutoPortOneDeg,
        RudderToken::FollowUpStarboardOneDeg,
        RudderToken::FollowUpPortOneDeg,
    ];

    pub fn as_str(&self) -> &'static str{
        match self{
            RudderToken::StandbyMode => "AutopilotSdbyMode",
            RudderToken::AutoMode => "AutopilotAutoMode",
            RudderToken::FollowUpMode => "AutopilotFUMode",
            RudderToken::AutoStarboardOneDeg => "AutoStOneDeg",
            RudderToken::AutoPortOneDeg => "AutoPortOneDeg",
            RudderToken::FollowUpStarboardOneDeg => "FUStbOneDeg",
            RudderToken::FollowUpPortOneDeg => "FUPortOneDeg",
        }
    }

    /// Signed angle change a step token requests, zero for mode commands.
    pub fn degrees(&self) -> i32{
        match self{
            RudderToken::FollowUpStarboardOneDeg | RudderToken::AutoStarboardOneDeg => 1,
            RudderToken::FollowUpPortOneDeg | RudderToken::AutoPortOneDeg => -1,
            _ => 0,
        }
    }
}

impl fmt::Display for RudderToken{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result{
        f.write_str(self.as_str())
    }
}

impl FromStr for RudderToken{
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err>{
        RudderToken::ALL.into_iter().find(|t| t.as_str() == s).ok_or(())
    }
}
