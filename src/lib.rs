pub mod config;
pub mod error;
pub mod side;
pub mod worker;
pub mod link;
pub mod telemetry;
pub mod gear;
pub mod rudder;
pub mod heading;
pub mod supervisor;
pub mod ffi;

#[cfg(feature = "python")]
pub mod python;

pub use config::{Calibration, GearTiming, HelmConfig, PortConfig, RudderTiming, SupervisorTiming};
pub use error::{HelmError, Result};
pub use side::Side;
pub use worker::{ActuatorWorker, StopToken};

pub use link::{
    BoardToken, RudderToken, StepSize,
    CommandLink, LinkOpener, LinkSlot,
    SerialOpener, SimulatedBoard, SimulatedOpener,
};
pub use telemetry::{SentenceDecoder, TelemetryDecoder, TelemetrySnapshot, TelemetrySource};

pub use gear::{GearActuator, GearBoard, GearOutcome, GearState};
pub use rudder::{RudderActuator, RudderMode};
pub use heading::{HeadingCommand, HeadingHoldController};
pub use supervisor::{Command, CommandParams, CommandSupervisor, ControlLoop, Maneuver, SystemStatus};
