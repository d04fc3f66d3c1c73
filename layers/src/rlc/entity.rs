//! RLC entity: one bearer, AM or UM
//! 
//! Each entity has one lock per direction. PDCP enqueues and MAC pulls PDUs
//! through the TX lock, MAC pushes PDUs through the RX lock. Only
//! reestablishment takes both, always TX first. Upper-layer callbacks run
//! with no lock held.

use bytes::Bytes;
use common::Lcid;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use std::sync::atomic::{AtomicU8, Ordering};

use super::am::AmEntity;
use super::error::RlcError;
use super::metrics::RlcMetrics;
use super::sn::Sn;
use super::um::UmEntity;
use super::{RlcConfig, RlcMode, RlcUpperLayer};
use std::sync::Arc;

/// Entity lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum EntityState {
    /// Created, not yet accepting traffic
    Init = 0,
    Active = 1,
    Reestablishing = 2,
    /// Retransmission limit hit; the bearer must be recreated
    Failed = 3,
}

/// Lock-free holder of an [`EntityState`]
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new(state: EntityState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> EntityState {
        EntityState::from_u8(self.0.load(Ordering::Acquire)).unwrap_or(EntityState::Failed)
    }

    pub(crate) fn set(&self, state: EntityState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`. False if the state was not `from`.
    pub(crate) fn transition(&self, from: EntityState, to: EntityState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ok when traffic may flow
    pub(crate) fn check_active(&self, lcid: Lcid) -> Result<(), RlcError> {
        match self.get() {
            EntityState::Active => Ok(()),
            EntityState::Failed => Err(RlcError::ChannelFailed(lcid)),
            EntityState::Init | EntityState::Reestablishing => Err(RlcError::NotActive(lcid)),
        }
    }
}

/// Outcome of a reestablishment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReestablishReport {
    /// SDUs queued again for transmission (AM)
    pub requeued_sdus: usize,
    /// SDUs and partially received SNs dropped
    pub discarded_sdus: usize,
}

/// Sequence-number state of both directions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// VT(A) in AM, VT(US) in UM
    pub tx_base: Sn,
    /// VT(S) in AM, VT(US) in UM
    pub tx_next: Sn,
    /// VR(R) in AM, VR(UR) in UM
    pub rx_base: Sn,
    /// VR(H) in AM, VR(UH) in UM
    pub rx_highest: Sn,
}

/// One bearer
pub enum RlcEntity {
    Am(AmEntity),
    Um(UmEntity),
}

impl RlcEntity {
    /// Create an entity in the `Init` state
    pub fn new(lcid: Lcid, config: RlcConfig, upper: Arc<dyn RlcUpperLayer>) -> Result<Self, RlcError> {
        config.validate()?;
        Ok(match config {
            RlcConfig::Am(cfg) => RlcEntity::Am(AmEntity::new(lcid, cfg, upper)?),
            RlcConfig::Um(cfg) => RlcEntity::Um(UmEntity::new(lcid, cfg, upper)?),
        })
    }

    pub fn mode(&self) -> RlcMode {
        match self {
            RlcEntity::Am(_) => RlcMode::Am,
            RlcEntity::Um(_) => RlcMode::Um,
        }
    }

    fn state_cell(&self) -> &StateCell {
        match self {
            RlcEntity::Am(am) => &am.state,
            RlcEntity::Um(um) => &um.state,
        }
    }

    pub fn state(&self) -> EntityState {
        self.state_cell().get()
    }

    /// `Init` to `Active`
    pub fn activate(&self) -> bool {
        self.state_cell().transition(EntityState::Init, EntityState::Active)
    }

    pub fn write_sdu(&self, sdu: Bytes) -> Result<(), RlcError> {
        match self {
            RlcEntity::Am(am) => am.write_sdu(sdu),
            RlcEntity::Um(um) => um.write_sdu(sdu),
        }
    }

    pub fn read_pdu(&self, max_size: usize) -> Option<Bytes> {
        match self {
            RlcEntity::Am(am) => am.read_pdu(max_size),
            RlcEntity::Um(um) => um.read_pdu(max_size),
        }
    }

    pub fn write_pdu(&self, pdu: Bytes) {
        match self {
            RlcEntity::Am(am) => am.write_pdu(pdu),
            RlcEntity::Um(um) => um.write_pdu(pdu),
        }
    }

    pub fn buffer_state(&self) -> usize {
        match self {
            RlcEntity::Am(am) => am.buffer_state(),
            RlcEntity::Um(um) => um.buffer_state(),
        }
    }

    pub fn tick(&self, elapsed_ms: u32) {
        match self {
            RlcEntity::Am(am) => am.tick(elapsed_ms),
            RlcEntity::Um(um) => um.tick(elapsed_ms),
        }
    }

    pub fn reestablish(&self) -> Result<ReestablishReport, RlcError> {
        match self {
            RlcEntity::Am(am) => am.reestablish(),
            RlcEntity::Um(um) => um.reestablish(),
        }
    }

    pub fn metrics(&self) -> RlcMetrics {
        match self {
            RlcEntity::Am(am) => am.metrics(),
            RlcEntity::Um(um) => um.metrics(),
        }
    }

    pub fn window_state(&self) -> WindowState {
        match self {
            RlcEntity::Am(am) => am.window_state(),
            RlcEntity::Um(um) => um.window_state(),
        }
    }
}
