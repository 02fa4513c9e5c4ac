/**
 * Rudder actuator
 *
 * Walks one rudder towards a commanded angle a degree at a time using the
 * follow-up step tokens. Same worker model as the gear actuators: one job
 * in flight, a new command interrupts the old one and the angle stays
 * wherever the interrupted job left it.
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::config::{ms, RudderTiming};
use crate::error::Result;
use crate::link::{LinkSlot, RudderToken};
use crate::side::Side;
use crate::worker::{sleep_unless_cancelled, ActuatorWorker, StopToken};

pub const MAX_RUDDER_ANGLE: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RudderMode{
    Standby,
    Auto,
    FollowUp,
}

impl RudderMode{
    pub fn token(&self) -> RudderToken{
        match self{
            RudderMode::Standby => RudderToken::StandbyMode,
            RudderMode::Auto => RudderToken::AutoMode,
            RudderMode::FollowUp => RudderToken::FollowUpMode,
        }
    }
}

pub fn clamp_angle(angle: f64) -> f64{
    angle.clamp(-MAX_RUDDER_ANGLE, MAX_RUDDER_ANGLE)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RudderCore{
    pub mode: RudderMode,
    /// Angle we believe the rudder is at.
    pub currudder: f64,
    /// Step tracker the step count is measured from.
    pub step: f64,
    /// Last commanded angle.
    pub decision: f64,
}

struct RudderShared{
    side: Side,
    core: Mutex<RudderCore>,
    link: LinkSlot,
    timing: RudderTiming,
    write_failures: AtomicU64,
}

pub struct RudderActuator{
    shared: Arc<RudderShared>,
    worker: ActuatorWorker,
}

impl RudderActuator{
    pub fn new(side: Side, link: LinkSlot, timing: RudderTiming, initial_angle: f64) -> Self{
        let shared = Arc::new(RudderShared{
            side,
            core: Mutex::new(RudderCore{
                mode: RudderMode::FollowUp,
                currudder: initial_angle,
                step: initial_angle,
                decision: initial_angle,
            }),
            link,
            timing,
            write_failures: AtomicU64::new(0),
        });
        RudderActuator{
            shared,
            worker: ActuatorWorker::new(&format!("rudder-{}", side.letter())),
        }
    }

    pub fn side(&self) -> Side{
        self.shared.side
    }

    pub fn link(&self) -> &LinkSlot{
        &self.shared.link
    }

    /// Steers towards `decision` degrees, interrupting any move in progress.
    pub fn control_rudder(&self, decision: f64) -> Result<()>{
        let shared = Arc::clone(&self.shared);
        self.worker.submit(move |stop| shared.run(decision, &stop))
    }

    /// Switches the autopilot mode right away, outside the worker.
    pub fn set_mode(&self, mode: RudderMode) -> Result<()>{
        self.shared.switch_mode(mode)
    }

    /// Re-bases the angle trackers, e.g. from the board's feedback.
    pub fn adjust(&self, angle: f64){
        let mut core = self.shared.lock_core();
        core.decision = angle;
        core.currudder = angle;
        core.step = angle;
    }

    pub fn core(&self) -> RudderCore{
        *self.shared.lock_core()
    }

    pub fn angle(&self) -> f64{
        self.shared.lock_core().currudder
    }

    pub fn mode(&self) -> RudderMode{
        self.shared.lock_core().mode
    }

    pub fn write_failures(&self) -> u64{
        self.shared.write_failures.load(Ordering::SeqCst)
    }

    pub fn wait_idle(&self){
        self.worker.wait_idle();
    }

    pub fn cancel(&self){
        self.worker.cancel();
    }
}

impl RudderShared{
    fn lock_core(&self) -> MutexGuard<'_, RudderCore>{
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn engine_id(&self) -> i32{
        self.side.engine_id()
    }

    fn switch_mode(&self, mode: RudderMode) -> Result<()>{
        if let Some(link) = self.link.current(){
            link.write_token(mode.token().as_str())?;
        }
        self.lock_core().mode = mode;
        log::info!("rudder {}: mode {:?}", self.engine_id(), mode);
        Ok(())
    }

    fn run(&self, decision: f64, stop: &StopToken){
        let (mode, tracker, current) = {
            let mut core = self.lock_core();
            core.decision = decision;
            (core.mode, core.step, core.currudder)
        };

        if mode != RudderMode::FollowUp{
            if stop.is_cancelled(){
                return;
            }
            if let Err(e) = self.switch_mode(RudderMode::FollowUp){
                self.write_failures.fetch_add(1, Ordering::SeqCst);
                log::error!("rudder {}: switching to follow-up failed: {}", self.engine_id(), e);
                return;
            }
            if !sleep_unless_cancelled(ms(self.timing.mode_settle_ms), stop){
                return;
            }
        }

        let steps = (tracker - decision).abs() as u32;
        let token = if decision < current{
            RudderToken::FollowUpPortOneDeg
        }else if decision > current{
            RudderToken::FollowUpStarboardOneDeg
        }else{
            log::debug!("rudder {}: no change at {}", self.engine_id(), current);
            return;
        };
        self.step(steps, token, ms(self.timing.step_interval_ms), stop);
    }

    fn step(&self, steps: u32, token: RudderToken, interval: Duration, stop: &StopToken){
        let increment = token.degrees() as f64;
        for done in 0..steps{
            if stop.is_cancelled(){
                log::info!("rudder {}: interrupted after {} of {} steps", self.engine_id(), done, steps);
                return;
            }
            if let Some(link) = self.link.current(){
                if let Err(e) = link.write_token(token.as_str()){
                    self.write_failures.fetch_add(1, Ordering::SeqCst);
                    log::error!("rudder {}: sending {} failed: {}", self.engine_id(), token, e);
                }
            }

            let angle = {
                let mut core = self.lock_core();
                core.currudder += increment;
                core.step += increment;
                core.currudder
            };
            log::info!(target: "helm::telemetry", "rudder,{},{},{}", self.engine_id(), angle, token);
            sleep_unless_cancelled(interval, stop);
        }
    }
}
