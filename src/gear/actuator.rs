/**
 * Gear actuator
 *
 * One propulsion engine: the neutral/forward/reverse state machine plus the
 * voltage stepper that walks the control voltage towards the target for a
 * decision value. All work happens on the actuator's single worker; a new
 * request interrupts the one in flight.
 *
 * With no link open every hop ends on the gear's nominal voltage after the
 * hop delay and stepping only moves the shadow value.
 */

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::{ms, GearTiming};
use crate::error::Result;
use crate::link::{BoardToken, LinkSlot, StepSize};
use crate::side::Side;
use crate::telemetry::TelemetrySnapshot;
use crate::worker::{sleep_unless_cancelled, ActuatorWorker, StopToken};
use super::queue::CommandQueue;
use super::state::{self, GearState, Hop};

/// How the last control request ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum GearOutcome{
    Converged{ steps: u32 },
    AlreadyConverged,
    Interrupted{ completed: u32 },
    GearChangeFailed{ from: GearState, to: GearState },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GearCore{
    pub gear: GearState,
    /// Control voltage we believe the engine is at.
    pub shadow_voltage: f64,
    /// Decision value matching `shadow_voltage`.
    pub decision: f64,
}

/// Coerces an arbitrary range onto one of the three step families.
pub fn step_size_for(range: f64) -> StepSize{
    StepSize::from_range(range).unwrap_or_else(||{
        log::warn!("invalid range {}, falling back to {}", range, StepSize::One.volts());
        StepSize::One
    })
}

struct GearShared{
    side: Side,
    core: Mutex<GearCore>,
    outcome: Mutex<Option<GearOutcome>>,
    link: LinkSlot,
    telemetry: Arc<TelemetrySnapshot>,
    queue: CommandQueue,
    timing: GearTiming,
}

pub struct GearActuator{
    shared: Arc<GearShared>,
    worker: ActuatorWorker,
}

impl GearActuator{
    pub fn new(
        side: Side,
        link: LinkSlot,
        telemetry: Arc<TelemetrySnapshot>,
        timing: GearTiming,
        initial_volts: f64,
    ) -> Result<Self>{
        let name = format!("gear-{}", side.letter());
        let queue = CommandQueue::start(&name, link.clone(), ms(timing.token_interval_ms))?;
        let shared = Arc::new(GearShared{
            side,
            core: Mutex::new(GearCore{
                gear: GearState::Neutral,
                shadow_voltage: initial_volts,
                decision: state::decision_for_voltage(initial_volts),
            }),
            outcome: Mutex::new(None),
            link,
            telemetry,
            queue,
            timing,
        });
        Ok(GearActuator{
            shared,
            worker: ActuatorWorker::new(&name),
        })
    }

    pub fn side(&self) -> Side{
        self.shared.side
    }

    /// Drives the engine towards `decision`, stepping `range` volts at a time.
    ///
    /// Returns once the request is scheduled; the previous request, if still
    /// running, has returned by then.
    pub fn control_gear(&self, decision: f64, range: f64) -> Result<()>{
        let size = step_size_for(range);
        let shared = Arc::clone(&self.shared);
        self.worker.submit(move |stop|{
            let outcome = shared.run(decision, size, &stop);
            log::debug!("engine {}: {:?}", shared.side.engine_id(), outcome);
            *shared.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
        })
    }

    /// Re-bases the shadow voltage and its decision value.
    pub fn adjust(&self, volts: f64){
        self.shared.rebase(volts);
    }

    pub fn core(&self) -> GearCore{
        *self.shared.lock_core()
    }

    pub fn gear_state(&self) -> GearState{
        self.shared.lock_core().gear
    }

    pub fn shadow_voltage(&self) -> f64{
        self.shared.lock_core().shadow_voltage
    }

    pub fn last_outcome(&self) -> Option<GearOutcome>{
        *self.shared.outcome.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn wait_idle(&self){
        self.worker.wait_idle();
    }

    pub fn is_busy(&self) -> bool{
        self.worker.is_busy()
    }

    /// Stops the request in flight without scheduling another.
    pub fn cancel(&self){
        self.worker.cancel();
    }

    pub fn pending_tokens(&self) -> usize{
        self.shared.queue.pending()
    }

    pub fn write_failures(&self) -> u64{
        self.shared.queue.write_failures()
    }

    pub fn flush(&self, timeout: Duration) -> bool{
        self.shared.queue.flush(timeout)
    }

    pub(crate) fn clear_queue(&self) -> usize{
        self.shared.queue.clear()
    }

    pub(crate) fn send(&self, token: BoardToken){
        self.shared.queue.push(token.as_str());
    }
}

impl GearShared{
    fn lock_core(&self) -> MutexGuard<'_, GearCore>{
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn engine_id(&self) -> i32{
        self.side.engine_id()
    }

    fn rebase(&self, volts: f64){
        let mut core = self.lock_core();
        core.shadow_voltage = volts;
        core.decision = state::decision_for_voltage(volts);
    }

    /// Voltage the stepper starts from. With a link the board's reading wins
    /// and the shadow is re-based onto it.
    fn baseline(&self) -> f64{
        if self.link.is_open(){
            if let Some(real) = self.telemetry.gear_voltage(self.side){
                self.rebase(real);
                return real;
            }
        }
        self.lock_core().shadow_voltage
    }

    fn run(&self, decision: f64, size: StepSize, stop: &StopToken) -> GearOutcome{
        let requested = GearState::for_decision(decision);
        let current = self.lock_core().gear;

        if requested != current{
            log::info!("engine {}: shifting {} -> {}", self.engine_id(), current, requested);
            if let Err(outcome) = self.change_gear(current, requested, stop){
                return outcome;
            }
        }

        let start = self.baseline();
        let steps = state::voltage_steps(decision, start, size.volts());
        if steps == 0{
            log::debug!("engine {}: already at {:.3} V", self.engine_id(), start);
            return GearOutcome::AlreadyConverged;
        }

        let raise = state::target_voltage(decision) > start;
        let token = BoardToken::step(self.side, size, raise);
        let delta = if raise{ size.volts() }else{ -size.volts() };
        log::info!(
            "engine {}: {} x {} from {:.3} V towards {:.3} V",
            self.engine_id(), steps, token, start, state::target_voltage(decision)
        );
        self.step_voltage(steps, token, delta, decision, stop)
    }

    fn step_voltage(&self, steps: u32, token: BoardToken, delta: f64, decision: f64, stop: &StopToken) -> GearOutcome{
        let interval = ms(self.timing.step_interval_ms);

        for completed in 0..steps{
            if stop.is_cancelled(){
                self.queue.clear();
                log::info!("engine {}: interrupted after {} of {} steps", self.engine_id(), completed, steps);
                return GearOutcome::Interrupted{ completed };
            }

            //shadow moves even if the write below later fails
            let volts = {
                let mut core = self.lock_core();
                core.shadow_voltage += delta;
                core.shadow_voltage
            };
            log::info!(target: "helm::telemetry", "{},{:.3},{},{}", self.engine_id(), volts, token, decision);

            if self.link.is_open(){
                self.queue.push(token.as_str());
                sleep_unless_cancelled(interval, stop);
            }
        }
        GearOutcome::Converged{ steps }
    }

    fn change_gear(&self, from: GearState, to: GearState, stop: &StopToken) -> std::result::Result<(), GearOutcome>{
        for hop in state::transition_plan(from, to, &self.timing){
            if stop.is_cancelled(){
                log::info!("engine {}: gear change {} -> {} interrupted", self.engine_id(), from, to);
                return Err(GearOutcome::Interrupted{ completed: 0 });
            }
            let engaged = if self.link.is_open(){
                self.hop_with_board(hop)
            }else{
                self.hop_simulated(hop)
            };
            if !engaged{
                log::warn!("engine {}: {} not confirmed, gear change {} -> {} abandoned", self.engine_id(), hop.to, from, to);
                return Err(GearOutcome::GearChangeFailed{ from, to });
            }
        }
        self.lock_core().gear = to;
        Ok(())
    }

    fn hop_simulated(&self, hop: Hop) -> bool{
        thread::sleep(hop.delay);
        self.rebase(hop.to.nominal_voltage());
        log::info!("engine {}: {} (simulated)", self.engine_id(), hop.to);
        true
    }

    fn hop_with_board(&self, hop: Hop) -> bool{
        let token = BoardToken::Shift{ side: self.side, gear: hop.to };
        let before = self.telemetry.gear_voltage(self.side);

        if hop.to == GearState::Neutral{
            self.queue.push(token.as_str());
            thread::sleep(hop.delay);
        }else{
            //stale step tokens would fight the shift
            self.queue.clear();
            self.queue.push(token.as_str());
            thread::sleep(hop.delay);
            self.queue.push(token.as_str());
        }

        if let Some(observed) = self.wait_for_window(hop.to){
            self.rebase(observed);
            log::info!("engine {}: {} confirmed at {:.3} V", self.engine_id(), hop.to, observed);
            return true;
        }

        if hop.to != GearState::Neutral{
            //lever sometimes misses the first two presses
            self.queue.push(token.as_str());
        }
        let fallback = self.telemetry.gear_voltage(self.side)
            .or(before)
            .unwrap_or_else(|| self.lock_core().shadow_voltage);
        self.rebase(fallback);
        false
    }

    /// Polls the board until the voltage lands in `gear`'s window.
    fn wait_for_window(&self, gear: GearState) -> Option<f64>{
        let deadline = Instant::now() + ms(self.timing.confirm_timeout_ms);
        let poll = ms(self.timing.confirm_poll_ms);
        loop{
            if let Some(volts) = self.telemetry.gear_voltage(self.side){
                if gear.accepts(volts){
                    return Some(volts);
                }
            }
            if Instant::now() >= deadline{
                return None;
            }
            thread::sleep(poll);
        }
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::link::SimulatedBoard;
    use crate::telemetry::TelemetrySource;

    fn fast_timing() -> GearTiming{
        GearTiming{
            single_hop_ms: 5,
            indirect_first_hop_ms: 10,
            indirect_second_hop_ms: 5,
            confirm_timeout_ms: 200,
            confirm_poll_ms: 1,
            step_interval_ms: 2,
            token_interval_ms: 1,
        }
    }

    fn offline(side: Side) -> GearActuator{
        GearActuator::new(side, LinkSlot::new(), Arc::new(TelemetrySnapshot::new()), fast_timing(), 2.71).unwrap()
    }

    fn online(side: Side) -> (GearActuator, Arc<SimulatedBoard>, Arc<TelemetrySnapshot>){
        let telemetry = Arc::new(TelemetrySnapshot::new());
        let board = Arc::new(SimulatedBoard::new("lever", TelemetrySource::GearBoard, Arc::clone(&telemetry)));
        let slot = LinkSlot::new();
        slot.attach(board.clone());
        let actuator = GearActuator::new(side, slot, Arc::clone(&telemetry), fast_timing(), 2.71).unwrap();
        (actuator, board, telemetry)
    }

    #[test]
    fn test_invalid_range_coerced(){
        assert_eq!(step_size_for(0.05), StepSize::Five);
        assert_eq!(step_size_for(0.3), StepSize::One);
    }

    #[test]
    fn test_offline_forward_then_converge(){
        let gear = offline(Side::Left);
        gear.control_gear(1.2, 0.01).unwrap();
        gear.wait_idle();

        assert_eq!(gear.gear_state(), GearState::Forward);
        assert_eq!(gear.last_outcome(), Some(GearOutcome::Converged{ steps: 29 }));
        assert!((gear.shadow_voltage() - 1.9).abs() <= 0.005);
    }

    #[test]
    fn test_offline_reverse_from_forward(){
        let gear = offline(Side::Right);
        gear.control_gear(2.0, 0.1).unwrap();
        gear.wait_idle();
        assert_eq!(gear.gear_state(), GearState::Forward);

        gear.control_gear(-2.0, 0.1).unwrap();
        gear.wait_idle();
        assert_eq!(gear.gear_state(), GearState::Reverse);
        //3.24 -> 3.5
        assert_eq!(gear.last_outcome(), Some(GearOutcome::Converged{ steps: 3 }));
    }

    #[test]
    fn test_adjust_rebases_decision(){
        let gear = offline(Side::Left);
        gear.adjust(2.19);
        let core = gear.core();
        assert!((core.shadow_voltage - 2.19).abs() < 1e-12);
        assert!((core.decision - 0.62).abs() < 1e-9);
    }

    #[test]
    fn test_online_shift_is_confirmed_by_board(){
        let (gear, board, _) = online(Side::Left);
        gear.control_gear(1.2, 0.01).unwrap();
        gear.wait_idle();
        assert!(gear.flush(Duration::from_secs(2)));

        let tokens = board.tokens();
        assert_eq!(tokens[0], "LPS_L_Forward");
        assert_eq!(tokens[1], "LPS_L_Forward");
        assert_eq!(tokens.iter().filter(|t| *t == "LPS_L_ACC").count(), 29);
        assert_eq!(gear.gear_state(), GearState::Forward);
    }

    #[test]
    fn test_unresponsive_board_fails_gear_change(){
        let (gear, board, _) = online(Side::Right);
        board.set_responsive(false);
        gear.control_gear(2.0, 0.01).unwrap();
        gear.wait_idle();

        assert_eq!(
            gear.last_outcome(),
            Some(GearOutcome::GearChangeFailed{ from: GearState::Neutral, to: GearState::Forward })
        );
        assert_eq!(gear.gear_state(), GearState::Neutral);
        assert!(gear.flush(Duration::from_secs(2)));
        //two presses plus the retry, no steps
        assert_eq!(board.tokens(), vec!["LPS_R_Forward"; 3]);
    }
}
