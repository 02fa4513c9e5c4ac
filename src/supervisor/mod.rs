/**
 * Command supervisor
 *
 * Composition root of the control stack. Owns the telemetry snapshot, the
 * lever board with its two gear actuators, the two rudder actuators and the
 * heading-hold controller, and turns operator command codes into per-actuator
 * decisions.
 *
 * Every public action answers with a short status line; errors never reach
 * the caller as anything else.
 */

pub mod command;
pub mod control_loop;

pub use command::{ActuatorPlan, Command, CommandParams, Maneuver, DEFAULT_RANGE, HIGH_PRIORITY_CODE};
pub use control_loop::ControlLoop;

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ms, Calibration, HelmConfig, PortConfig};
use crate::error::Result;
use crate::gear::{clamp_decision, step_size_for, GearBoard, GearOutcome, GearState, NEUTRAL_DECISION};
use crate::heading::HeadingHoldController;
use crate::link::{LinkOpener, LinkSlot};
use crate::rudder::{clamp_angle, RudderActuator, RudderMode};
use crate::side::Side;
use crate::telemetry::{TelemetrySnapshot, TelemetrySource};

/// Who asked for what, and when. Single writer: the dispatch path.
#[derive(Debug)]
struct Session {
    last_request: (i32, CommandParams),
    last_request_at: Instant,
    /// Code of the last command actually carried out.
    last_executed: Option<i32>,
}

impl Session {
    fn new() -> Self {
        Self {
            last_request: (0, CommandParams::default()),
            last_request_at: Instant::now(),
            last_executed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub side: Side,
    pub gear: GearState,
    pub shadow_voltage: f64,
    pub decision: f64,
    pub real_voltage: Option<f64>,
    pub pending_tokens: usize,
    pub write_failures: u64,
    pub last_outcome: Option<GearOutcome>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RudderStatus {
    pub side: Side,
    pub angle: f64,
    pub decision: f64,
    pub mode: RudderMode,
    pub feedback: Option<i32>,
    pub write_failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkStatus {
    pub gear_board: bool,
    pub left_rudder: bool,
    pub right_rudder: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStatus {
    pub engines: Vec<EngineStatus>,
    pub rudders: Vec<RudderStatus>,
    pub links: LinkStatus,
    pub last_command: i32,
    pub heading_target: Option<f64>,
}

pub struct CommandSupervisor {
    config: HelmConfig,
    opener: Arc<dyn LinkOpener>,
    telemetry: Arc<TelemetrySnapshot>,
    gears: GearBoard,
    rudders: [RudderActuator; 2],
    heading: Mutex<HeadingHoldController>,
    session: Mutex<Session>,
    dispatch: Mutex<()>,
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CommandSupervisor {
    pub fn new(config: HelmConfig, opener: Arc<dyn LinkOpener>) -> Result<Self> {
        let telemetry = Arc::new(TelemetrySnapshot::new());
        let gears = GearBoard::new(
            Arc::clone(&telemetry),
            &config.gear_timing,
            &config.supervisor_timing,
            &config.calibration,
        )?;
        let rudders = [
            RudderActuator::new(Side::Left, LinkSlot::new(), config.rudder_timing.clone(), config.calibration.rudder_left_deg),
            RudderActuator::new(Side::Right, LinkSlot::new(), config.rudder_timing.clone(), config.calibration.rudder_right_deg),
        ];

        Ok(Self {
            config,
            opener,
            telemetry,
            gears,
            rudders,
            heading: Mutex::new(HeadingHoldController::default()),
            session: Mutex::new(Session::new()),
            dispatch: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &HelmConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<TelemetrySnapshot> {
        &self.telemetry
    }

    pub fn gear_board(&self) -> &GearBoard {
        &self.gears
    }

    pub fn rudder(&self, side: Side) -> &RudderActuator {
        &self.rudders[side.index()]
    }

    /// Operator entry point: records the request for the control loop and
    /// carries it out.
    ///
    /// Recording and executing happen under one dispatch guard, so the last
    /// recorded request is always the last one the actuators received.
    pub fn decision(&self, code: i32, params: CommandParams) -> String {
        let serial = relock(&self.dispatch);
        {
            let mut session = relock(&self.session);
            session.last_request = (code, params.clone());
            session.last_request_at = Instant::now();
        }
        self.dispatch_locked(&serial, code, &params)
    }

    /// Carries out a command without recording it as a new request.
    pub fn dispatch(&self, code: i32, params: &CommandParams) -> String {
        let serial = relock(&self.dispatch);
        self.dispatch_locked(&serial, code, params)
    }

    /// A station command (connect, call station, disconnect) repeated back to
    /// back is not run again; the repeat becomes a stop.
    fn dispatch_locked(&self, _serial: &MutexGuard<'_, ()>, code: i32, params: &CommandParams) -> String {
        let command = match Command::decode(code, params) {
            Ok(command) => command,
            Err(e) => {
                log::warn!("{}", e);
                return format!("invalid command {}", code);
            }
        };

        let command = {
            let mut session = relock(&self.session);
            if command.is_high_priority() && session.last_executed == Some(code) {
                log::info!("command {} repeated, stopping instead", code);
                Command::Stop
            } else {
                session.last_executed = Some(code);
                command
            }
        };

        match self.execute(&command) {
            Ok(msg) => {
                log::info!("command {}: {}", command.code(), msg);
                msg
            }
            Err(e) => {
                log::error!("command {} failed: {}", command.code(), e);
                format!("command {} failed: {}", command.code(), e)
            }
        }
    }

    fn execute(&self, command: &Command) -> Result<String> {
        match *command {
            Command::Stop => {
                self.stop()?;
                Ok("stopped".to_string())
            }
            Command::Maneuver { maneuver, speed, range } => {
                let plan = maneuver.plan(speed);
                self.control_gears(plan.left_gear, plan.right_gear, range)?;
                self.control_rudders(plan.left_rudder, plan.right_rudder)?;
                Ok(maneuver.label().to_string())
            }
            Command::FineControl { left_speed, left_rudder, right_speed, right_rudder, range } => {
                self.control_gears(left_speed, right_speed, range)?;
                self.control_rudders(left_rudder, right_rudder)?;
                Ok("fine control applied".to_string())
            }
            Command::AutoHeading { current_heading, speed, range } => {
                let hold = relock(&self.heading).update_now(current_heading);
                let rudder = hold.rudder as f64;
                self.control_rudders(rudder, rudder)?;
                self.control_gears(speed, speed, range)?;
                Ok(format!(
                    "heading hold: target {:.2} error {:.2} rudder {} speed {:.2}",
                    hold.target_heading, hold.heading_error, hold.rudder, speed
                ))
            }
            Command::Connect => Ok(self.connect()),
            Command::CallStation => Ok(self.call_station()),
            Command::Disconnect => {
                self.disconnect();
                Ok("disconnected".to_string())
            }
        }
    }

    fn control_gears(&self, left: f64, right: f64, range: f64) -> Result<()> {
        let range = step_size_for(range).volts();
        let skew = ms(self.config.supervisor_timing.side_skew_ms);
        let (left, right) = (clamp_decision(left), clamp_decision(right));
        log::debug!("gears: left {:.2} right {:.2} range {}", left, right, range);

        self.gears.engine(Side::Left).control_gear(left, range)?;
        thread::sleep(skew);
        self.gears.engine(Side::Right).control_gear(right, range)?;
        thread::sleep(skew);
        Ok(())
    }

    fn control_rudders(&self, left: f64, right: f64) -> Result<()> {
        self.rudders[0].control_rudder(clamp_angle(left))?;
        self.rudders[1].control_rudder(clamp_angle(right))?;
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        self.gears.neutral();
        self.gears.engine(Side::Left).control_gear(NEUTRAL_DECISION, DEFAULT_RANGE)?;
        thread::sleep(ms(self.config.supervisor_timing.neutral_skew_ms));
        self.gears.engine(Side::Right).control_gear(NEUTRAL_DECISION, DEFAULT_RANGE)?;
        self.control_rudders(0.0, 0.0)
    }

    fn ports(&self) -> [(&PortConfig, TelemetrySource, &LinkSlot); 3] {
        [
            (&self.config.left_rudder_port, TelemetrySource::Rudder(Side::Left), self.rudders[0].link()),
            (&self.config.right_rudder_port, TelemetrySource::Rudder(Side::Right), self.rudders[1].link()),
            (&self.config.gear_port, TelemetrySource::GearBoard, self.gears.link()),
        ]
    }

    fn connect(&self) -> String {
        let mut failed = Vec::new();
        for (port, source, slot) in self.ports() {
            if slot.is_open() {
                log::info!("{} already open", port.name);
                continue;
            }
            match self.opener.open(port, source, Arc::clone(&self.telemetry)) {
                Ok(link) => slot.attach(link),
                Err(e) => {
                    log::error!("opening {} failed: {}", port.name, e);
                    failed.push(port.name.clone());
                }
            }
        }
        if failed.is_empty() {
            "connected".to_string()
        } else {
            format!("connection failed: {}", failed.join(", "))
        }
    }

    fn disconnect(&self) {
        for (_, _, slot) in self.ports() {
            slot.detach();
        }
        self.telemetry.reset_gear_board();
    }

    fn call_station(&self) -> String {
        for side in Side::BOTH {
            let feedback = self.telemetry.rudder_feedback(side).unwrap_or_else(|| {
                log::warn!("call station: no usable rudder feedback on {:?}", side);
                0
            });
            if feedback != 0 {
                let nudged = feedback + feedback.signum();
                self.rudder(side).adjust(nudged as f64);
                if side == Side::Left {
                    thread::sleep(ms(self.config.supervisor_timing.feedback_settle_ms));
                }
            }
        }

        if self.gears.call_station() {
            "station called".to_string()
        } else {
            "call station failed".to_string()
        }
    }

    /// Re-bases all four shadow values at once.
    pub fn calibrate(&self, calibration: &Calibration) {
        self.gears.engine(Side::Left).adjust(calibration.gear_left_volts);
        self.gears.engine(Side::Right).adjust(calibration.gear_right_volts);
        self.rudders[0].adjust(calibration.rudder_left_deg);
        self.rudders[1].adjust(calibration.rudder_right_deg);
        log::info!("calibrated: {:?}", calibration);
    }

    pub fn adjust_gear(&self, engine_id: i32, volts: f64) -> Result<()> {
        self.gears.adjust(engine_id, volts)
    }

    pub fn adjust_rudder(&self, engine_id: i32, angle: f64) -> Result<()> {
        let side = Side::from_engine_id(engine_id)?;
        self.rudder(side).adjust(angle);
        Ok(())
    }

    /// One pass of the periodic control loop.
    ///
    /// Replays the latest request so actuators keep converging. Auto-heading
    /// requests pick up the heading the left rudder board reports; anything
    /// else releases the held heading. A request older than the command
    /// timeout is replaced by a stop.
    pub fn tick(&self) -> String {
        let serial = relock(&self.dispatch);
        let (code, mut params, age) = {
            let session = relock(&self.session);
            let (code, params) = session.last_request.clone();
            (code, params, session.last_request_at.elapsed())
        };

        if age > ms(self.config.supervisor_timing.command_timeout_ms) {
            log::debug!("no command for {:?}, holding stop", age);
            return match self.execute(&Command::Stop) {
                Ok(msg) => msg,
                Err(e) => format!("command 0 failed: {}", e),
            };
        }

        if code == 701 {
            params.current_heading = self.telemetry.heading(Side::Left).unwrap_or(0.0);
        } else {
            relock(&self.heading).reset();
        }
        self.dispatch_locked(&serial, code, &params)
    }

    pub fn status(&self) -> SystemStatus {
        let engines = Side::BOTH
            .iter()
            .map(|&side| {
                let engine = self.gears.engine(side);
                let core = engine.core();
                EngineStatus {
                    side,
                    gear: core.gear,
                    shadow_voltage: core.shadow_voltage,
                    decision: core.decision,
                    real_voltage: self.telemetry.gear_voltage(side),
                    pending_tokens: engine.pending_tokens(),
                    write_failures: engine.write_failures(),
                    last_outcome: engine.last_outcome(),
                }
            })
            .collect();

        let rudders = Side::BOTH
            .iter()
            .map(|&side| {
                let rudder = self.rudder(side);
                let core = rudder.core();
                RudderStatus {
                    side,
                    angle: core.currudder,
                    decision: core.decision,
                    mode: core.mode,
                    feedback: self.telemetry.rudder_feedback(side),
                    write_failures: rudder.write_failures(),
                }
            })
            .collect();

        SystemStatus {
            engines,
            rudders,
            links: LinkStatus {
                gear_board: self.gears.link().is_open(),
                left_rudder: self.rudders[0].link().is_open(),
                right_rudder: self.rudders[1].link().is_open(),
            },
            last_command: relock(&self.session).last_request.0,
            heading_target: relock(&self.heading).target(),
        }
    }

    /// Blocks until every actuator has finished its current job.
    pub fn wait_idle(&self) {
        self.gears.wait_idle();
        for rudder in &self.rudders {
            rudder.wait_idle();
        }
    }

    /// Waits for queued gear tokens to reach the board.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.gears.flush(timeout)
    }

    pub fn write_failures(&self) -> u64 {
        self.gears.write_failures() + self.rudders.iter().map(|r| r.write_failures()).sum::<u64>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GearTiming, RudderTiming, SupervisorTiming};
    use crate::link::SimulatedOpener;

    fn fast_config() -> HelmConfig {
        HelmConfig {
            gear_timing: GearTiming {
                single_hop_ms: 2,
                indirect_first_hop_ms: 2,
                indirect_second_hop_ms: 2,
                confirm_timeout_ms: 100,
                confirm_poll_ms: 1,
                step_interval_ms: 1,
                token_interval_ms: 1,
            },
            rudder_timing: RudderTiming { step_interval_ms: 1, mode_settle_ms: 1 },
            supervisor_timing: SupervisorTiming {
                side_skew_ms: 1,
                neutral_skew_ms: 1,
                feedback_settle_ms: 1,
                call_settle_ms: 1,
                call_hold_ms: 1,
                tick_interval_ms: 10,
                command_timeout_ms: 60_000,
            },
            ..HelmConfig::default()
        }
    }

    fn offline() -> CommandSupervisor {
        CommandSupervisor::new(fast_config(), Arc::new(SimulatedOpener::new())).unwrap()
    }

    #[test]
    fn test_unknown_code_reports_invalid() {
        let supervisor = offline();
        assert_eq!(supervisor.decision(123, CommandParams::default()), "invalid command 123");
    }

    #[test]
    fn test_forward_maneuver_offline() {
        let supervisor = offline();
        let msg = supervisor.decision(1, CommandParams::with_speed(1.2));
        assert_eq!(msg, "forward");
        supervisor.wait_idle();

        let status = supervisor.status();
        for engine in &status.engines {
            assert_eq!(engine.gear, GearState::Forward);
            assert!((engine.shadow_voltage - 1.9).abs() <= 0.005);
        }
        assert_eq!(status.last_command, 1);
        assert!(!status.links.gear_board);
    }

    #[test]
    fn test_rudder_values_are_clamped() {
        let supervisor = offline();
        let params = CommandParams {
            left_rudder: 45.0,
            right_rudder: -50.0,
            ..CommandParams::default()
        };
        supervisor.decision(666, params);
        supervisor.wait_idle();
        assert_eq!(supervisor.rudder(Side::Left).angle(), 30.0);
        assert_eq!(supervisor.rudder(Side::Right).angle(), -30.0);
    }

    #[test]
    fn test_auto_heading_latches_target() {
        let supervisor = offline();
        let params = CommandParams {
            speed: 1.0,
            current_heading: 120.0,
            ..CommandParams::default()
        };
        let msg = supervisor.decision(701, params);
        assert!(msg.starts_with("heading hold: target 120.00"), "{}", msg);
        assert_eq!(supervisor.status().heading_target, Some(120.0));
    }

    #[test]
    fn test_tick_releases_heading_for_other_commands() {
        let supervisor = offline();
        supervisor.decision(701, CommandParams { current_heading: 80.0, ..CommandParams::default() });
        supervisor.decision(1, CommandParams::with_speed(1.0));
        supervisor.tick();
        assert_eq!(supervisor.status().heading_target, None);
    }

    #[test]
    fn test_tick_queued_behind_dispatch_cannot_replay_stale_request() {
        let supervisor = Arc::new(offline());
        supervisor.decision(1, CommandParams::with_speed(1.2));
        supervisor.wait_idle();

        let serial = relock(&supervisor.dispatch);
        let ticker = {
            let supervisor = Arc::clone(&supervisor);
            thread::spawn(move || supervisor.tick())
        };
        let stopper = {
            let supervisor = Arc::clone(&supervisor);
            thread::spawn(move || supervisor.decision(0, CommandParams::default()))
        };
        thread::sleep(Duration::from_millis(20));
        drop(serial);

        ticker.join().unwrap();
        assert_eq!(stopper.join().unwrap(), "stopped");
        supervisor.wait_idle();

        for side in Side::BOTH {
            assert_eq!(supervisor.gear_board().engine(side).gear_state(), GearState::Neutral);
            assert_eq!(supervisor.rudder(side).angle(), 0.0);
        }
        assert_eq!(supervisor.status().last_command, 0);
    }

    #[test]
    fn test_calibrate() {
        let supervisor = offline();
        supervisor.calibrate(&Calibration {
            gear_left_volts: 2.5,
            gear_right_volts: 2.6,
            rudder_left_deg: 4.5,
            rudder_right_deg: -4.0,
        });
        let status = supervisor.status();
        assert!((status.engines[0].shadow_voltage - 2.5).abs() < 1e-12);
        assert!((status.engines[1].shadow_voltage - 2.6).abs() < 1e-12);
        assert_eq!(status.rudders[0].angle, 4.5);
        assert_eq!(status.rudders[1].angle, -4.0);
        assert!(supervisor.adjust_rudder(3, 0.0).is_err());
    }
}
