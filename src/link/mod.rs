pub mod protocol;
pub mod serial;
pub mod sim;

pub use protocol::*;
pub use serial::{SerialLink, SerialOpener};
pub use sim::{SimulatedBoard, SimulatedOpener};

use std::sync::{Arc, PoisonError, RwLock};
use crate::config::PortConfig;
use crate::error::Result;
use crate::telemetry::{TelemetrySnapshot, TelemetrySource};

/// Outbound half of a connection to a controller board.
pub trait CommandLink: Send + Sync{
    /// Writes one command token as raw bytes. No acknowledgement is expected.
    fn write_token(&self, token: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// Opens links for the connect command.
pub trait LinkOpener: Send + Sync{
    fn open(
        &self,
        port: &PortConfig,
        source: TelemetrySource,
        telemetry: Arc<TelemetrySnapshot>,
    ) -> Result<Arc<dyn CommandLink>>;
}

/// Shared handle to a link that may or may not be open.
///
/// Actuators hold a clone and look at it on every step; a closed slot puts
/// them in simulated-timing mode.
#[derive(Clone, Default)]
pub struct LinkSlot{
    inner: Arc<RwLock<Option<Arc<dyn CommandLink>>>>,
}

impl LinkSlot{
    pub fn new() -> Self{
        Self::default()
    }

    pub fn attach(&self, link: Arc<dyn CommandLink>){
        log::info!("link {} attached", link.name());
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(link);
    }

    pub fn detach(&self) -> Option<Arc<dyn CommandLink>>{
        let previous = self.inner.write().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(link) = &previous{
            log::info!("link {} detached", link.name());
        }
        previous
    }

    pub fn current(&self) -> Option<Arc<dyn CommandLink>>{
        self.inner.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn is_open(&self) -> bool{
        self.inner.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl std::fmt::Debug for LinkSlot{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result{
        match self.current(){
            Some(link) => write!(f, "LinkSlot({})", link.name()),
            None => write!(f, "LinkSlot(closed)"),
        }
    }
}

#[cfg(test)]
mod tests{
    use super::*;

    #[test]
    fn test_slot_attach_detach(){
        let slot = LinkSlot::new();
        assert!(!slot.is_open());

        let board = Arc::new(SimulatedBoard::new("sim0", TelemetrySource::GearBoard, Arc::new(TelemetrySnapshot::new())));
        slot.attach(board);
        assert!(slot.is_open());
        assert_eq!(slot.current().unwrap().name(), "sim0");

        let clone = slot.clone();
        assert!(clone.detach().is_some());
        assert!(!slot.is_open());
        assert!(slot.detach().is_none());
    }
}
