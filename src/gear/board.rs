use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::{ms, Calibration, GearTiming, SupervisorTiming};
use crate::error::Result;
use crate::link::{BoardToken, LinkSlot, Press};
use crate::side::Side;
use crate::telemetry::TelemetrySnapshot;
use super::actuator::GearActuator;
use super::state::GearState;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The lever board: both engines behind one serial link.
pub struct GearBoard{
    link: LinkSlot,
    telemetry: Arc<TelemetrySnapshot>,
    engines: [GearActuator; 2],
    call_settle: Duration,
    call_hold: Duration,
}

impl GearBoard{
    pub fn new(
        telemetry: Arc<TelemetrySnapshot>,
        timing: &GearTiming,
        supervisor_timing: &SupervisorTiming,
        calibration: &Calibration,
    ) -> Result<Self>{
        let link = LinkSlot::new();
        let left = GearActuator::new(Side::Left, link.clone(), Arc::clone(&telemetry), timing.clone(), calibration.gear_left_volts)?;
        let right = GearActuator::new(Side::Right, link.clone(), Arc::clone(&telemetry), timing.clone(), calibration.gear_right_volts)?;
        Ok(GearBoard{
            link,
            telemetry,
            engines: [left, right],
            call_settle: ms(supervisor_timing.call_settle_ms),
            call_hold: ms(supervisor_timing.call_hold_ms),
        })
    }

    pub fn link(&self) -> &LinkSlot{
        &self.link
    }

    pub fn engine(&self, side: Side) -> &GearActuator{
        &self.engines[side.index()]
    }

    pub fn control_gear(&self, engine_id: i32, decision: f64, range: f64) -> Result<()>{
        let side = Side::from_engine_id(engine_id)?;
        self.engine(side).control_gear(decision, range)
    }

    pub fn adjust(&self, engine_id: i32, volts: f64) -> Result<()>{
        let side = Side::from_engine_id(engine_id)?;
        self.engine(side).adjust(volts);
        Ok(())
    }

    /// Drops both engines into neutral at once. Only meaningful with a link.
    pub fn neutral(&self){
        if !self.link.is_open(){
            return;
        }
        for engine in &self.engines{
            engine.clear_queue();
            engine.send(BoardToken::Shift{ side: engine.side(), gear: GearState::Neutral });
        }
        for engine in &self.engines{
            engine.adjust(GearState::Neutral.nominal_voltage());
        }
    }

    /// Takes command of the helm station. The board only accepts the request
    /// while its ACTIVE LED is off.
    pub fn call_station(&self) -> bool{
        let Some(link) = self.link.current() else{
            log::warn!("call station: lever board not connected");
            return false;
        };
        if self.telemetry.active_led().as_deref() != Some("0"){
            log::warn!("call station: station already active");
            return false;
        }

        self.neutral();
        if !self.flush(DRAIN_TIMEOUT){
            log::warn!("call station: neutral tokens still queued");
        }
        thread::sleep(self.call_settle);
        let token = BoardToken::StationSelect(Press::Long);
        if let Err(e) = link.write_token(token.as_str()){
            log::error!("call station: sending {} failed: {}", token, e);
            return false;
        }
        thread::sleep(self.call_hold);
        true
    }

    pub fn wait_idle(&self){
        for engine in &self.engines{
            engine.wait_idle();
        }
    }

    pub fn flush(&self, timeout: Duration) -> bool{
        self.engines.iter().all(|e| e.flush(timeout))
    }

    pub fn write_failures(&self) -> u64{
        self.engines.iter().map(|e| e.write_failures()).sum()
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::link::SimulatedBoard;
    use crate::telemetry::TelemetrySource;
    use crate::error::HelmError;

    fn board() -> (GearBoard, Arc<TelemetrySnapshot>){
        let telemetry = Arc::new(TelemetrySnapshot::new());
        let timing = GearTiming{
            single_hop_ms: 5,
            indirect_first_hop_ms: 5,
            indirect_second_hop_ms: 5,
            confirm_timeout_ms: 100,
            confirm_poll_ms: 1,
            step_interval_ms: 1,
            token_interval_ms: 1,
        };
        let supervisor_timing = SupervisorTiming{
            call_settle_ms: 1,
            call_hold_ms: 1,
            ..SupervisorTiming::default()
        };
        let board = GearBoard::new(Arc::clone(&telemetry), &timing, &supervisor_timing, &Calibration::default()).unwrap();
        (board, telemetry)
    }

    #[test]
    fn test_unknown_engine_rejected(){
        let (board, _) = board();
        assert!(matches!(board.control_gear(2, 1.0, 0.01), Err(HelmError::UnknownEngine(2))));
        assert!(matches!(board.adjust(-1, 2.71), Err(HelmError::UnknownEngine(-1))));
        board.adjust(1, 2.5).unwrap();
        assert!((board.engine(Side::Right).shadow_voltage() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_call_station_needs_link(){
        let (board, _) = board();
        assert!(!board.call_station());
    }

    #[test]
    fn test_call_station_sends_neutral_then_select(){
        let (board, telemetry) = board();
        let sim = Arc::new(SimulatedBoard::new("lever", TelemetrySource::GearBoard, Arc::clone(&telemetry)));
        board.link().attach(sim.clone());

        board.adjust(0, 2.3).unwrap();
        assert!(board.call_station());
        assert!(board.flush(Duration::from_secs(2)));

        let tokens = sim.tokens();
        assert!(tokens.contains(&"LPS_L_Neutral".to_string()));
        assert!(tokens.contains(&"LPS_R_Neutral".to_string()));
        assert_eq!(tokens.last().map(String::as_str), Some("STA_SEL_LONG_PRESS"));
        assert!((board.engine(Side::Left).shadow_voltage() - 2.71).abs() < 1e-12);
        assert_eq!(telemetry.active_led().as_deref(), Some("1"));

        //station is now active
        assert!(!board.call_station());
    }
}
