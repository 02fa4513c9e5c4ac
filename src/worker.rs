/**
 * Single-slot actuator worker
 *
 * Each actuator owns one of these. Submitting a job cancels the job in
 * flight, waits for it to return, then starts the new one; the slot lock is
 * held for the whole cancel-join-spawn sequence so two submissions can never
 * interleave. Cancellation is cooperative: jobs poll their StopToken between
 * steps.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{HelmError, Result};

/// Per-job cancellation flag. A fresh token is minted for every submission.
#[derive(Debug, Clone, Default)]
pub struct StopToken{
    flag: Arc<AtomicBool>,
}

impl StopToken{
    pub fn new() -> Self{
        Self::default()
    }

    pub fn cancel(&self){
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool{
        self.flag.load(Ordering::SeqCst)
    }
}

struct InFlight{
    handle: JoinHandle<()>,
    stop: StopToken,
}

pub struct ActuatorWorker{
    name: String,
    slot: Mutex<Option<InFlight>>,
}

impl ActuatorWorker{
    pub fn new(name: &str) -> Self{
        ActuatorWorker{
            name: name.to_string(),
            slot: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str{
        &self.name
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<InFlight>>{
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Supersedes whatever is running and starts `job`.
    pub fn submit<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let mut slot = self.lock_slot();

        if let Some(previous) = slot.take(){
            if !previous.handle.is_finished(){
                log::debug!("{}: interrupting in-flight job", self.name);
            }
            previous.stop.cancel();
            if previous.handle.join().is_err(){
                log::error!("{}: previous job panicked", self.name);
            }
        }

        let stop = StopToken::new();
        let job_stop = stop.clone();
        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move ||{
                job(job_stop);
            })
            .map_err(|source| HelmError::Spawn{ name: self.name.clone(), source })?;

        *slot = Some(InFlight{ handle, stop });
        Ok(())
    }

    /// Cancels the job in flight, if any, and waits for it.
    pub fn cancel(&self){
        if let Some(previous) = self.lock_slot().take(){
            previous.stop.cancel();
            if previous.handle.join().is_err(){
                log::error!("{}: cancelled job panicked", self.name);
            }
        }
    }

    /// Blocks until the current job returns on its own.
    pub fn wait_idle(&self){
        if let Some(current) = self.lock_slot().take(){
            if current.handle.join().is_err(){
                log::error!("{}: job panicked", self.name);
            }
        }
    }

    pub fn is_busy(&self) -> bool{
        self.lock_slot()
            .as_ref()
            .map(|f| !f.handle.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for ActuatorWorker{
    fn drop(&mut self){
        self.cancel();
    }
}

/// Sleeps for `total`, waking early if `stop` is cancelled.
///
/// Returns false when the sleep was cut short.
pub fn sleep_unless_cancelled(total: Duration, stop: &StopToken) -> bool{
    const SLICE: Duration = Duration::from_millis(10);
    let mut remaining = total;
    while remaining > Duration::ZERO{
        if stop.is_cancelled(){
            return false;
        }
        let nap = remaining.min(SLICE);
        thread::sleep(nap);
        remaining -= nap;
    }
    !stop.is_cancelled()
}

#[cfg(test)]
mod tests{
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    #[test]
    fn test_job_runs(){
        let worker = ActuatorWorker::new("test-worker");
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        worker.submit(move |_| flag.store(true, Ordering::SeqCst)).unwrap();
        worker.wait_idle();
        assert!(ran.load(Ordering::SeqCst));
        assert!(!worker.is_busy());
    }

    #[test]
    fn test_new_submission_interrupts_previous(){
        let worker = ActuatorWorker::new("test-worker");
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = Arc::clone(&log);
        worker.submit(move |stop|{
            for i in 0..1000{
                if stop.is_cancelled(){
                    first_log.lock().unwrap().push(format!("first stopped at {}", i));
                    return;
                }
                thread::sleep(Duration::from_millis(1));
            }
            first_log.lock().unwrap().push("first finished".to_string());
        }).unwrap();

        thread::sleep(Duration::from_millis(20));

        let second_log = Arc::clone(&log);
        worker.submit(move |_| second_log.lock().unwrap().push("second".to_string())).unwrap();
        worker.wait_idle();

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].starts_with("first stopped"));
        assert_eq!(log[1], "second");
    }

    #[test]
    fn test_only_one_job_in_flight(){
        let worker = Arc::new(ActuatorWorker::new("test-worker"));
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicBool::new(false));

        for _ in 0..10{
            let active = Arc::clone(&active);
            let overlap = Arc::clone(&overlap);
            worker.submit(move |stop|{
                if active.fetch_add(1, Ordering::SeqCst) != 0{
                    overlap.store(true, Ordering::SeqCst);
                }
                sleep_unless_cancelled(Duration::from_millis(50), &stop);
                active.fetch_sub(1, Ordering::SeqCst);
            }).unwrap();
        }
        worker.wait_idle();
        assert!(!overlap.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancel_survives_panicked_job(){
        let worker = ActuatorWorker::new("test-worker");
        worker.submit(|_| panic!("actuator job blew up")).unwrap();
        thread::sleep(Duration::from_millis(20));
        worker.cancel();
        assert!(!worker.is_busy());

        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        worker.submit(move |_| flag.store(true, Ordering::SeqCst)).unwrap();
        worker.wait_idle();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_interruptible_sleep(){
        let stop = StopToken::new();
        let canceller = stop.clone();
        let start = Instant::now();
        let handle = thread::spawn(move ||{
            thread::sleep(Duration::from_millis(20));
            canceller.cancel();
        });
        assert!(!sleep_unless_cancelled(Duration::from_secs(5), &stop));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }
}
