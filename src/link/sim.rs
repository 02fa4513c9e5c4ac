/**
 * Simulated controller boards
 *
 * Stand-ins for the lever board and the rudder boards. Every token written
 * is recorded, and the board reacts the way the hardware does: gear tokens
 * drive the reported voltage into the gear's window, step tokens move it by
 * the step size, rudder step tokens move the rudder feedback by one degree.
 * Used by the offline mode of the controller binary and by the tests.
 */

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::config::PortConfig;
use crate::error::{HelmError, Result};
use crate::side::Side;
use crate::telemetry::{TelemetrySnapshot, TelemetrySource};
use super::protocol::{BoardToken, Press, RudderToken};
use super::{CommandLink, LinkOpener};

pub struct SimulatedBoard{
    name: String,
    source: TelemetrySource,
    telemetry: Arc<TelemetrySnapshot>,
    written: Mutex<Vec<String>>,
    fail_writes: AtomicBool,
    responsive: AtomicBool,
}

impl SimulatedBoard{
    pub fn new(name: &str, source: TelemetrySource, telemetry: Arc<TelemetrySnapshot>) -> Self{
        if source == TelemetrySource::GearBoard{
            for side in Side::BOTH{
                telemetry.set_gear_voltage_millivolts(side, 2710);
            }
        }
        SimulatedBoard{
            name: name.to_string(),
            source,
            telemetry,
            written: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            responsive: AtomicBool::new(true),
        }
    }

    /// Every token successfully written so far, oldest first.
    pub fn tokens(&self) -> Vec<String>{
        self.written.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear_tokens(&self){
        self.written.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Makes subsequent writes fail, like a yanked USB cable.
    pub fn set_fail_writes(&self, fail: bool){
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// When false the board swallows tokens without updating telemetry.
    pub fn set_responsive(&self, responsive: bool){
        self.responsive.store(responsive, Ordering::SeqCst);
    }

    pub fn source(&self) -> TelemetrySource{
        self.source
    }

    fn emulate(&self, token: &str){
        match self.source{
            TelemetrySource::GearBoard =>{
                let Ok(token) = token.parse::<BoardToken>() else{ return };
                match token{
                    BoardToken::Shift{ side, gear } =>{
                        let mv = (gear.nominal_voltage() * 1000.0).round() as i32;
                        self.telemetry.set_gear_voltage_millivolts(side, mv);
                    }
                    BoardToken::Accelerate{ side, size } =>{
                        let mv = self.telemetry.gear_voltage_millivolts(side) - size.millivolts();
                        self.telemetry.set_gear_voltage_millivolts(side, mv);
                    }
                    BoardToken::Decelerate{ side, size } =>{
                        let mv = self.telemetry.gear_voltage_millivolts(side) + size.millivolts();
                        self.telemetry.set_gear_voltage_millivolts(side, mv);
                    }
                    BoardToken::StationSelect(Press::Long) =>{
                        self.telemetry.set_gear_field("ACTIVE_LED", "1");
                    }
                    _ => {}
                }
            }
            TelemetrySource::Rudder(side) =>{
                let Ok(token) = token.parse::<RudderToken>() else{ return };
                match token{
                    RudderToken::StandbyMode => self.telemetry.set_rudder_field(side, "Pilot_Mode", "Standby"),
                    RudderToken::AutoMode => self.telemetry.set_rudder_field(side, "Pilot_Mode", "Auto"),
                    RudderToken::FollowUpMode => self.telemetry.set_rudder_field(side, "Pilot_Mode", "FollowUp"),
                    step =>{
                        let angle = self.telemetry.rudder_feedback(side).unwrap_or(0) + step.degrees();
                        self.telemetry.set_rudder_field(side, "RudderFeedback", angle.to_string());
                    }
                }
            }
        }
    }
}

impl CommandLink for SimulatedBoard{
    fn write_token(&self, token: &str) -> Result<()>{
        if self.fail_writes.load(Ordering::SeqCst){
            return Err(HelmError::InjectedFault(self.name.clone()));
        }
        self.written.lock().unwrap_or_else(PoisonError::into_inner).push(token.to_string());
        if self.responsive.load(Ordering::SeqCst){
            self.emulate(token);
        }
        Ok(())
    }

    fn name(&self) -> &str{
        &self.name
    }
}

/// Hands out simulated boards instead of serial ports.
#[derive(Default)]
pub struct SimulatedOpener{
    boards: Mutex<Vec<Arc<SimulatedBoard>>>,
    opened: AtomicUsize,
    refuse: AtomicBool,
}

impl SimulatedOpener{
    pub fn new() -> Self{
        Self::default()
    }

    /// Makes subsequent opens fail.
    pub fn set_refuse(&self, refuse: bool){
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize{
        self.opened.load(Ordering::SeqCst)
    }

    /// Most recently opened board for `source`.
    pub fn board(&self, source: TelemetrySource) -> Option<Arc<SimulatedBoard>>{
        self.boards.lock().unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|b| b.source() == source)
            .cloned()
    }
}

impl LinkOpener for SimulatedOpener{
    fn open(
        &self,
        port: &PortConfig,
        source: TelemetrySource,
        telemetry: Arc<TelemetrySnapshot>,
    ) -> Result<Arc<dyn CommandLink>>{
        if self.refuse.load(Ordering::SeqCst){
            return Err(HelmError::LinkClosed(port.name.clone()));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        let board = Arc::new(SimulatedBoard::new(&port.name, source, telemetry));
        self.boards.lock().unwrap_or_else(PoisonError::into_inner).push(Arc::clone(&board));
        Ok(board)
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::gear::GearState;
    use crate::link::StepSize;

    #[test]
    fn test_gear_board_emulation(){
        let telemetry = Arc::new(TelemetrySnapshot::new());
        let board = SimulatedBoard::new("lever", TelemetrySource::GearBoard, Arc::clone(&telemetry));
        assert_eq!(telemetry.gear_voltage_millivolts(Side::Left), 2710);

        board.write_token(BoardToken::Shift{ side: Side::Left, gear: GearState::Forward }.as_str()).unwrap();
        assert_eq!(telemetry.gear_voltage_millivolts(Side::Left), 2190);

        board.write_token(BoardToken::step(Side::Left, StepSize::Five, false).as_str()).unwrap();
        assert_eq!(telemetry.gear_voltage_millivolts(Side::Left), 2140);
        assert_eq!(telemetry.gear_voltage_millivolts(Side::Right), 2710);
        assert_eq!(board.tokens(), vec!["LPS_L_Forward", "LPS_L_ACC_Five"]);
    }

    #[test]
    fn test_rudder_board_emulation(){
        let telemetry = Arc::new(TelemetrySnapshot::new());
        let board = SimulatedBoard::new("rudder", TelemetrySource::Rudder(Side::Right), Arc::clone(&telemetry));
        board.write_token("FUStbOneDeg").unwrap();
        board.write_token("FUStbOneDeg").unwrap();
        board.write_token("FUPortOneDeg").unwrap();
        assert_eq!(telemetry.rudder_feedback(Side::Right), Some(1));
    }

    #[test]
    fn test_failing_writes_are_not_recorded(){
        let telemetry = Arc::new(TelemetrySnapshot::new());
        let board = SimulatedBoard::new("lever", TelemetrySource::GearBoard, telemetry);
        board.set_fail_writes(true);
        assert!(board.write_token("LPS_L_ACC").is_err());
        assert!(board.tokens().is_empty());
    }
}
