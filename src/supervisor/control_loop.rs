use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ms;
use crate::error::{HelmError, Result};
use super::CommandSupervisor;

const STOP_POLL: Duration = Duration::from_millis(20);

/// Background thread that calls [`CommandSupervisor::tick`] every
/// `tick_interval_ms`.
pub struct ControlLoop {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ControlLoop {
    pub fn start(supervisor: Arc<CommandSupervisor>) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let interval = ms(supervisor.config().supervisor_timing.tick_interval_ms);

        let handle = thread::Builder::new()
            .name("control-loop".to_string())
            .spawn(move || {
                log::info!("control loop running every {:?}", interval);
                while flag.load(Ordering::SeqCst) {
                    let msg = supervisor.tick();
                    log::debug!("tick: {}", msg);

                    let next = Instant::now() + interval;
                    while flag.load(Ordering::SeqCst) && Instant::now() < next {
                        thread::sleep(STOP_POLL.min(interval));
                    }
                }
                log::info!("control loop stopped");
            })
            .map_err(|source| HelmError::Spawn { name: "control-loop".to_string(), source })?;

        Ok(Self { running, handle: Some(handle) })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ControlLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HelmConfig;
    use crate::link::SimulatedOpener;
    use crate::supervisor::CommandParams;

    #[test]
    fn test_loop_replays_latest_command() {
        let mut config = HelmConfig::default();
        config.supervisor_timing.tick_interval_ms = 10;
        config.supervisor_timing.side_skew_ms = 0;
        config.supervisor_timing.neutral_skew_ms = 0;
        config.rudder_timing.step_interval_ms = 0;
        let supervisor = Arc::new(CommandSupervisor::new(config, Arc::new(SimulatedOpener::new())).unwrap());

        let mut control = ControlLoop::start(Arc::clone(&supervisor)).unwrap();
        assert!(control.is_running());

        supervisor.decision(-3, CommandParams::default());
        //undo the move behind the supervisor's back, the loop must redo it
        supervisor.rudder(crate::side::Side::Left).wait_idle();
        supervisor.adjust_rudder(0, 0.0).unwrap();
        thread::sleep(Duration::from_millis(200));
        control.stop();
        supervisor.wait_idle();

        assert_eq!(supervisor.rudder(crate::side::Side::Left).angle(), -20.0);
        assert!(!control.is_running());
    }
}
