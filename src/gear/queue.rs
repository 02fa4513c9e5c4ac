/**
 * Rate-limited token queue
 *
 * Control workers produce step tokens faster than the lever board can take
 * them. Tokens are pushed onto an unbounded channel and a dedicated sender
 * thread writes them to whatever link is attached, one every
 * `token_interval`.
 */

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{HelmError, Result};
use crate::link::LinkSlot;

const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Default)]
struct QueueCounters{
    enqueued: AtomicU64,
    sent: AtomicU64,
    dropped: AtomicU64,
    write_failures: AtomicU64,
    settled: AtomicU64,
}

impl QueueCounters{
    fn outstanding(&self) -> u64{
        let done = self.settled.load(Ordering::SeqCst) + self.dropped.load(Ordering::SeqCst);
        self.enqueued.load(Ordering::SeqCst).saturating_sub(done)
    }
}

pub struct CommandQueue{
    name: String,
    tx: Sender<String>,
    rx: Receiver<String>,
    counters: Arc<QueueCounters>,
    running: Arc<AtomicBool>,
    sender: Mutex<Option<JoinHandle<()>>>,
}

impl CommandQueue{
    pub fn start(name: &str, link: LinkSlot, token_interval: Duration) -> Result<Self>{
        let (tx, rx) = unbounded::<String>();
        let counters = Arc::new(QueueCounters::default());
        let running = Arc::new(AtomicBool::new(true));

        let drain = TokenSender{
            rx: rx.clone(),
            link,
            counters: Arc::clone(&counters),
            running: Arc::clone(&running),
            token_interval,
        };
        let thread_name = format!("{}-tx", name);
        let handle = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move ||{
                drain.run_loop();
            })
            .map_err(|source| HelmError::Spawn{ name: thread_name, source })?;

        Ok(CommandQueue{
            name: name.to_string(),
            tx,
            rx,
            counters,
            running,
            sender: Mutex::new(Some(handle)),
        })
    }

    pub fn push(&self, token: &str){
        self.counters.enqueued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(token.to_string()).is_err(){
            //receiver lives in self, cannot be gone while we are
            log::error!("{}: queue closed, dropping {}", self.name, token);
        }
    }

    /// Drops everything not yet transmitted. Returns how many were dropped.
    pub fn clear(&self) -> usize{
        let mut dropped = 0;
        while self.rx.try_recv().is_ok(){
            dropped += 1;
        }
        if dropped > 0{
            self.counters.dropped.fetch_add(dropped as u64, Ordering::SeqCst);
            log::debug!("{}: cleared {} queued tokens", self.name, dropped);
        }
        dropped
    }

    pub fn pending(&self) -> usize{
        self.rx.len()
    }

    /// Waits until every queued token has been handed to the link.
    /// Returns false on timeout.
    pub fn flush(&self, timeout: Duration) -> bool{
        let deadline = Instant::now() + timeout;
        loop{
            if self.counters.outstanding() == 0{
                return true;
            }
            if Instant::now() >= deadline{
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn enqueued(&self) -> u64{
        self.counters.enqueued.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> u64{
        self.counters.sent.load(Ordering::SeqCst)
    }

    pub fn write_failures(&self) -> u64{
        self.counters.write_failures.load(Ordering::SeqCst)
    }

    pub fn stop(&self){
        self.running.store(false, Ordering::SeqCst);
        let handle = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle{
            let _ = handle.join();
        }
    }
}

impl Drop for CommandQueue{
    fn drop(&mut self){
        self.stop();
    }
}

struct TokenSender{
    rx: Receiver<String>,
    link: LinkSlot,
    counters: Arc<QueueCounters>,
    running: Arc<AtomicBool>,
    token_interval: Duration,
}

impl TokenSender{
    fn run_loop(self){
        while self.running.load(Ordering::SeqCst){
            let token = match self.rx.recv_timeout(IDLE_POLL){
                Ok(token) => token,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };
            self.transmit(&token);
            thread::sleep(self.token_interval);
            self.counters.settled.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn transmit(&self, token: &str){
        let Some(link) = self.link.current() else{
            log::warn!("link not open, cannot send {}", token);
            self.counters.write_failures.fetch_add(1, Ordering::SeqCst);
            return;
        };
        match link.write_token(token){
            Ok(()) =>{
                self.counters.sent.fetch_add(1, Ordering::SeqCst);
                log::debug!("{} <- {}", link.name(), token);
            }
            Err(e) =>{
                self.counters.write_failures.fetch_add(1, Ordering::SeqCst);
                log::error!("sending {} to {} failed: {}", token, link.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests{
    use super::*;
    use crate::link::SimulatedBoard;
    use crate::telemetry::{TelemetrySnapshot, TelemetrySource};

    fn board() -> Arc<SimulatedBoard>{
        Arc::new(SimulatedBoard::new("lever", TelemetrySource::GearBoard, Arc::new(TelemetrySnapshot::new())))
    }

    #[test]
    fn test_tokens_sent_in_order(){
        let slot = LinkSlot::new();
        let board = board();
        slot.attach(board.clone());

        let queue = CommandQueue::start("q", slot, Duration::from_millis(1)).unwrap();
        for token in ["LPS_L_Forward", "LPS_L_ACC", "LPS_L_ACC"]{
            queue.push(token);
        }
        assert!(queue.flush(Duration::from_secs(2)));
        assert_eq!(board.tokens(), vec!["LPS_L_Forward", "LPS_L_ACC", "LPS_L_ACC"]);
        assert_eq!(queue.sent(), 3);
        assert_eq!(queue.write_failures(), 0);
    }

    #[test]
    fn test_clear_drops_pending(){
        let slot = LinkSlot::new();
        slot.attach(board());
        let queue = CommandQueue::start("q", slot, Duration::from_millis(200)).unwrap();
        for _ in 0..5{
            queue.push("LPS_R_DEC");
        }
        thread::sleep(Duration::from_millis(50));
        let dropped = queue.clear();
        assert!(dropped >= 3);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn test_write_failures_counted(){
        let slot = LinkSlot::new();
        let board = board();
        board.set_fail_writes(true);
        slot.attach(board.clone());
        let queue = CommandQueue::start("q", slot, Duration::from_millis(1)).unwrap();
        queue.push("LPS_L_DEC");
        queue.push("LPS_L_DEC");
        assert!(queue.flush(Duration::from_secs(2)));
        assert_eq!(queue.write_failures(), 2);
        assert!(board.tokens().is_empty());
    }
}
