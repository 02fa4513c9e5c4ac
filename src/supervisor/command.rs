use serde::{Deserialize, Serialize};

use crate::error::{HelmError, Result};
use crate::gear::NEUTRAL_DECISION;

pub const DEFAULT_RANGE: f64 = 0.01;
/// Codes at or above this are one-shot station commands.
pub const HIGH_PRIORITY_CODE: i32 = 900;

/// Request body as the operator console sends it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandParams {
    #[serde(rename = "Speed")]
    pub speed: f64,
    #[serde(rename = "Range")]
    pub range: f64,
    #[serde(rename = "Left_Speed")]
    pub left_speed: Option<f64>,
    #[serde(rename = "Left_Rudder")]
    pub left_rudder: f64,
    #[serde(rename = "Right_Speed")]
    pub right_speed: Option<f64>,
    #[serde(rename = "Right_Rudder")]
    pub right_rudder: f64,
    #[serde(rename = "Current_heading")]
    pub current_heading: f64,
}

impl Default for CommandParams {
    fn default() -> Self {
        Self {
            speed: NEUTRAL_DECISION,
            range: DEFAULT_RANGE,
            left_speed: None,
            left_rudder: 0.0,
            right_speed: None,
            right_rudder: 0.0,
            current_heading: 0.0,
        }
    }
}

impl CommandParams {
    pub fn with_speed(speed: f64) -> Self {
        Self {
            speed,
            ..Self::default()
        }
    }
}

/// Table-driven movements: both gears and both rudders from one speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Maneuver {
    Forward,
    Backward,
    TopRight,
    Right,
    LowerRight,
    TopLeft,
    Left,
    LowerLeft,
    RotateClockwise,
    RotateCounterClockwise,
    TranslateTopRight,
    TranslateRight,
    TranslateLowerRight,
    TranslateTopLeft,
    TranslateLeft,
    TranslateLowerLeft,
    BackwardLowerLeft,
    BackwardLowerRight,
}

/// Decisions for all four actuators, before clamping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ActuatorPlan {
    pub left_gear: f64,
    pub right_gear: f64,
    pub left_rudder: f64,
    pub right_rudder: f64,
}

/// Astern decision matching a forward `speed`; `ratio` widens the spread.
pub fn astern(speed: f64, ratio: f64) -> f64 {
    -1.98 - ratio * (speed - 1.0)
}

impl Maneuver {
    pub fn code(&self) -> i32 {
        use Maneuver::*;
        match self {
            Forward => 1,
            TopRight => 2,
            Right => 3,
            LowerRight => 4,
            TranslateTopRight => 5,
            TranslateRight => 6,
            TranslateLowerRight => 7,
            RotateClockwise => 8,
            Backward => -1,
            TopLeft => -2,
            Left => -3,
            LowerLeft => -4,
            TranslateTopLeft => -5,
            TranslateLeft => -6,
            TranslateLowerLeft => -7,
            RotateCounterClockwise => -8,
            BackwardLowerLeft => -9,
            BackwardLowerRight => -10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        use Maneuver::*;
        [
            Forward, Backward, TopRight, Right, LowerRight, TopLeft, Left, LowerLeft,
            RotateClockwise, RotateCounterClockwise, TranslateTopRight, TranslateRight,
            TranslateLowerRight, TranslateTopLeft, TranslateLeft, TranslateLowerLeft,
            BackwardLowerLeft, BackwardLowerRight,
        ]
        .into_iter()
        .find(|m| m.code() == code)
    }

    pub fn label(&self) -> &'static str {
        use Maneuver::*;
        match self {
            Forward => "forward",
            Backward => "backward",
            TopRight => "forward right",
            Right => "right",
            LowerRight => "hard right",
            TopLeft => "forward left",
            Left => "left",
            LowerLeft => "hard left",
            RotateClockwise => "rotate clockwise",
            RotateCounterClockwise => "rotate counter-clockwise",
            TranslateTopRight => "translate forward right",
            TranslateRight => "translate right",
            TranslateLowerRight => "translate aft right",
            TranslateTopLeft => "translate forward left",
            TranslateLeft => "translate left",
            TranslateLowerLeft => "translate aft left",
            BackwardLowerLeft => "backward left",
            BackwardLowerRight => "backward right",
        }
    }

    pub fn plan(&self, speed: f64) -> ActuatorPlan {
        use Maneuver::*;
        let ahead = speed;
        let back = astern(speed, 1.0);
        let (left_gear, right_gear, left_rudder, right_rudder) = match self {
            Forward => (ahead, ahead, 0.0, 0.0),
            Backward => (back, back, 0.0, 0.0),
            TopRight => (ahead, ahead, 0.0, 10.0),
            Right => (ahead, ahead, 20.0, 20.0),
            LowerRight => (ahead, ahead, 25.0, 25.0),
            TopLeft => (ahead, ahead, -10.0, 0.0),
            Left => (ahead, ahead, -20.0, -20.0),
            LowerLeft => (ahead, ahead, -25.0, -25.0),
            RotateClockwise => (ahead, back, 20.0, -20.0),
            RotateCounterClockwise => (back, ahead, 20.0, -20.0),
            TranslateTopRight => (1.25 * speed, back, -20.0, 30.0),
            TranslateRight => (ahead, astern(speed, 1.4), -25.0, 25.0),
            TranslateLowerRight => (ahead, astern(speed, 1.8), -30.0, 30.0),
            TranslateTopLeft => (back, 1.25 * speed, -30.0, 20.0),
            TranslateLeft => (astern(speed, 1.4), ahead, -25.0, 25.0),
            TranslateLowerLeft => (astern(speed, 1.8), ahead, -30.0, 30.0),
            BackwardLowerLeft => (back, back, -25.0, -25.0),
            BackwardLowerRight => (back, back, 25.0, 25.0),
        };
        ActuatorPlan { left_gear, right_gear, left_rudder, right_rudder }
    }
}

/// Everything the supervisor can be asked to do, decoded once from the
/// wire code.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Stop,
    Maneuver { maneuver: Maneuver, speed: f64, range: f64 },
    FineControl {
        left_speed: f64,
        left_rudder: f64,
        right_speed: f64,
        right_rudder: f64,
        range: f64,
    },
    AutoHeading { current_heading: f64, speed: f64, range: f64 },
    Connect,
    CallStation,
    Disconnect,
}

/// Reverse requests on the fine-control path sit further astern.
fn fine_speed(speed: Option<f64>) -> f64 {
    let speed = speed.unwrap_or(NEUTRAL_DECISION);
    if speed < NEUTRAL_DECISION {
        speed - 0.98
    } else {
        speed
    }
}

impl Command {
    pub fn decode(code: i32, params: &CommandParams) -> Result<Self> {
        let command = match code {
            0 => Command::Stop,
            666 => Command::FineControl {
                left_speed: fine_speed(params.left_speed),
                left_rudder: params.left_rudder,
                right_speed: fine_speed(params.right_speed),
                right_rudder: params.right_rudder,
                range: params.range,
            },
            701 => Command::AutoHeading {
                current_heading: params.current_heading,
                speed: params.speed,
                range: params.range,
            },
            900 => Command::Connect,
            901 => Command::CallStation,
            999 => Command::Disconnect,
            other => match Maneuver::from_code(other) {
                Some(maneuver) => Command::Maneuver {
                    maneuver,
                    speed: params.speed,
                    range: params.range,
                },
                None => return Err(HelmError::UnknownCommand(other)),
            },
        };
        Ok(command)
    }

    pub fn code(&self) -> i32 {
        match self {
            Command::Stop => 0,
            Command::Maneuver { maneuver, .. } => maneuver.code(),
            Command::FineControl { .. } => 666,
            Command::AutoHeading { .. } => 701,
            Command::Connect => 900,
            Command::CallStation => 901,
            Command::Disconnect => 999,
        }
    }

    pub fn is_high_priority(&self) -> bool {
        self.code() >= HIGH_PRIORITY_CODE
    }
}
