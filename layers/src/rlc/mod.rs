//! Radio Link Control (RLC) Layer Implementation
//! 
//! Acknowledged and Unacknowledged Mode entities, one per logical channel,
//! multiplexed by [`Rlc`]. PDCP/RRC push SDUs and receive reassembled SDUs;
//! MAC pulls PDUs sized to its transmission opportunities and pushes
//! received PDUs. Timers advance through [`Rlc::tick`].

pub mod am;
pub mod config;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod pdu;
pub mod segment;
pub mod slots;
pub mod sn;
pub mod timer;
pub mod um;

pub use config::{AmConfig, RlcConfig, SnFieldLength, UmConfig};
pub use entity::{EntityState, ReestablishReport, RlcEntity, WindowState};
pub use error::{RlcError, Violation};
pub use metrics::RlcMetrics;
pub use sn::Sn;

use crate::{LayerError, ProtocolLayer};
use async_trait::async_trait;
use bytes::Bytes;
use common::Lcid;
use interfaces::rlc::{PdcpRlcInterface, RlcMacInterface, RlcPdcpInterface, RrcRlcInterface};
use interfaces::InterfaceError;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// RLC operating modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RlcMode {
    /// Unacknowledged Mode
    #[serde(rename = "UM")]
    Um,
    /// Acknowledged Mode
    #[serde(rename = "AM")]
    Am,
}

/// Everything RLC reports upwards: SDUs to PDCP, failures to RRC
pub trait RlcUpperLayer: PdcpRlcInterface + RrcRlcInterface {}

impl<T: PdcpRlcInterface + RrcRlcInterface> RlcUpperLayer for T {}

/// RLC layer: the bearers of one UE
pub struct Rlc {
    bearers: RwLock<HashMap<Lcid, Arc<RlcEntity>>>,
    upper: Arc<dyn RlcUpperLayer>,
    initialized: AtomicBool,
}

impl Rlc {
    /// Create a new RLC layer instance
    pub fn new(upper: Arc<dyn RlcUpperLayer>) -> Self {
        Self {
            bearers: RwLock::new(HashMap::new()),
            upper,
            initialized: AtomicBool::new(false),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Configure a bearer. A failed bearer on the same LCID is replaced.
    pub fn add_bearer(&self, lcid: Lcid, config: RlcConfig) -> Result<(), RlcError> {
        if !self.is_initialized() {
            return Err(RlcError::NotInitialized);
        }
        if Lcid::new(lcid.0).is_none() {
            return Err(RlcError::InvalidConfiguration(format!("LCID {} out of range", lcid.0)));
        }

        let mode = config.mode();
        let entity = RlcEntity::new(lcid, config, self.upper.clone())?;
        let mut bearers = self.bearers.write();
        if let Some(existing) = bearers.get(&lcid) {
            if existing.state() != EntityState::Failed {
                return Err(RlcError::InvalidConfiguration(format!(
                    "bearer {} already configured",
                    lcid
                )));
            }
            info!("Replacing failed bearer {}", lcid);
        }
        entity.activate();
        bearers.insert(lcid, Arc::new(entity));
        info!("Added {:?} bearer {}", mode, lcid);
        Ok(())
    }

    pub fn del_bearer(&self, lcid: Lcid) -> Result<(), RlcError> {
        self.bearers
            .write()
            .remove(&lcid)
            .map(|_| info!("Removed bearer {}", lcid))
            .ok_or(RlcError::UnknownChannel(lcid))
    }

    /// Configured LCIDs in ascending order
    pub fn bearers(&self) -> Vec<Lcid> {
        let mut lcids: Vec<Lcid> = self.bearers.read().keys().copied().collect();
        lcids.sort();
        lcids
    }

    /// Handle to one bearer. The map lock is released on return.
    pub fn entity(&self, lcid: Lcid) -> Result<Arc<RlcEntity>, RlcError> {
        self.bearers
            .read()
            .get(&lcid)
            .cloned()
            .ok_or(RlcError::UnknownChannel(lcid))
    }

    pub fn write_sdu(&self, lcid: Lcid, sdu: Bytes) -> Result<(), RlcError> {
        self.entity(lcid)?.write_sdu(sdu)
    }

    pub fn read_pdu(&self, lcid: Lcid, max_size: usize) -> Option<Bytes> {
        self.entity(lcid).ok()?.read_pdu(max_size)
    }

    pub fn write_pdu(&self, lcid: Lcid, pdu: Bytes) {
        match self.entity(lcid) {
            Ok(entity) => entity.write_pdu(pdu),
            Err(e) => debug!("Dropping PDU of {} bytes: {}", pdu.len(), e),
        }
    }

    pub fn buffer_state(&self, lcid: Lcid) -> usize {
        self.entity(lcid).map(|e| e.buffer_state()).unwrap_or(0)
    }

    /// Advance the timers of every bearer by `elapsed_ms`
    pub fn tick(&self, elapsed_ms: u32) {
        let entities: Vec<Arc<RlcEntity>> = self.bearers.read().values().cloned().collect();
        for entity in entities {
            entity.tick(elapsed_ms);
        }
    }

    /// Reestablish every bearer. Failed bearers are skipped.
    pub fn reestablish(&self) -> ReestablishReport {
        let mut total = ReestablishReport::default();
        for lcid in self.bearers() {
            match self.reestablish_bearer(lcid) {
                Ok(report) => {
                    total.requeued_sdus += report.requeued_sdus;
                    total.discarded_sdus += report.discarded_sdus;
                }
                Err(e) => warn!("Skipping {} during reestablishment: {}", lcid, e),
            }
        }
        total
    }

    pub fn reestablish_bearer(&self, lcid: Lcid) -> Result<ReestablishReport, RlcError> {
        self.entity(lcid)?.reestablish()
    }

    pub fn metrics(&self, lcid: Lcid) -> Result<RlcMetrics, RlcError> {
        Ok(self.entity(lcid)?.metrics())
    }

    pub fn state(&self, lcid: Lcid) -> Result<EntityState, RlcError> {
        Ok(self.entity(lcid)?.state())
    }

    pub fn window_state(&self, lcid: Lcid) -> Result<WindowState, RlcError> {
        Ok(self.entity(lcid)?.window_state())
    }
}

#[async_trait]
impl ProtocolLayer for Rlc {
    async fn initialize(&mut self) -> Result<(), LayerError> {
        info!("Initializing RLC layer");
        if self.is_initialized() {
            return Err(LayerError::InvalidState("RLC already initialized".into()));
        }
        self.initialized.store(true, Ordering::Release);
        info!("RLC layer initialized successfully");
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), LayerError> {
        info!("Shutting down RLC layer");
        let bearers = std::mem::take(&mut *self.bearers.write());
        debug!("Released {} bearers", bearers.len());
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }
}

impl From<RlcError> for InterfaceError {
    fn from(err: RlcError) -> Self {
        match err {
            RlcError::CapacityExceeded { .. } => InterfaceError::BufferFull,
            RlcError::UnknownChannel(lcid) => InterfaceError::UnknownChannel(lcid),
            RlcError::ChannelFailed(lcid) => InterfaceError::ChannelFailed(lcid),
            RlcError::NotInitialized => InterfaceError::NotInitialized,
            RlcError::InvalidConfiguration(msg) => InterfaceError::InvalidConfig(msg),
            other => InterfaceError::Rejected(other.to_string()),
        }
    }
}

impl RlcPdcpInterface for Rlc {
    fn enqueue_sdu(&self, lcid: Lcid, sdu: Bytes) -> Result<(), InterfaceError> {
        self.write_sdu(lcid, sdu).map_err(InterfaceError::from)
    }
}

impl RlcMacInterface for Rlc {
    fn buffer_state(&self, lcid: Lcid) -> usize {
        Rlc::buffer_state(self, lcid)
    }

    fn read_pdu(&self, lcid: Lcid, max_size: usize) -> Option<Bytes> {
        Rlc::read_pdu(self, lcid, max_size)
    }

    fn write_pdu(&self, lcid: Lcid, pdu: Bytes) {
        Rlc::write_pdu(self, lcid, pdu)
    }
}
