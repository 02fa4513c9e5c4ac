pub mod actuator;
pub mod board;
pub mod queue;
pub mod state;

pub use actuator::{step_size_for, GearActuator, GearCore, GearOutcome};
pub use board::GearBoard;
pub use queue::CommandQueue;
pub use state::{clamp_decision, target_voltage, GearState, NEUTRAL_DECISION};
