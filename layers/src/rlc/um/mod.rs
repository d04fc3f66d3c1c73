//! Unacknowledged Mode entity

mod rx;
mod tx;

pub use rx::UmRx;
pub use tx::UmTx;

use bytes::Bytes;
use common::{bytes_to_hex_limited, Lcid};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use super::config::UmConfig;
use super::entity::{EntityState, ReestablishReport, StateCell, WindowState};
use super::error::{RlcError, Violation};
use super::metrics::RlcMetrics;
use super::pdu::{decode, RlcPdu};
use super::RlcUpperLayer;

/// UM bearer: segmentation and reordering, no retransmission
pub struct UmEntity {
    lcid: Lcid,
    cfg: UmConfig,
    tx: Mutex<UmTx>,
    rx: Mutex<UmRx>,
    pub(crate) state: StateCell,
    upper: Arc<dyn RlcUpperLayer>,
}

impl UmEntity {
    pub fn new(lcid: Lcid, cfg: UmConfig, upper: Arc<dyn RlcUpperLayer>) -> Result<Self, RlcError> {
        cfg.validate()?;
        Ok(Self {
            lcid,
            tx: Mutex::new(UmTx::new(cfg.clone())),
            rx: Mutex::new(UmRx::new(&cfg)?),
            cfg,
            state: StateCell::new(EntityState::Init),
            upper,
        })
    }

    pub fn write_sdu(&self, sdu: Bytes) -> Result<(), RlcError> {
        self.state.check_active(self.lcid)?;
        self.tx.lock().enqueue(sdu)
    }

    pub fn read_pdu(&self, max_size: usize) -> Option<Bytes> {
        if self.state.check_active(self.lcid).is_err() {
            return None;
        }
        self.tx.lock().build_pdu(max_size)
    }

    pub fn write_pdu(&self, pdu: Bytes) {
        if let Err(e) = self.state.check_active(self.lcid) {
            debug!("{}: dropping PDU ({})", self.lcid, e);
            return;
        }
        trace!("{} RX PDU: {}", self.lcid, bytes_to_hex_limited(&pdu, 16));

        let result = match decode(&pdu, self.cfg.rx_sn_field_length.bits()) {
            Ok(RlcPdu::Data(data)) => self.rx.lock().receive(data),
            Ok(RlcPdu::Status(_)) => {
                self.rx.lock().metrics.num_protocol_violations += 1;
                Err(Violation::UnexpectedControlPdu.into())
            }
            Err(violation) => {
                self.rx.lock().metrics.num_protocol_violations += 1;
                Err(violation.into())
            }
        };
        match result {
            Ok(sdus) => self.deliver(sdus),
            Err(e) => warn!("{}: PDU dropped: {}", self.lcid, e),
        }
    }

    fn deliver(&self, sdus: Vec<Bytes>) {
        for sdu in sdus {
            self.upper.deliver_sdu(self.lcid, sdu);
        }
    }

    pub fn buffer_state(&self) -> usize {
        if self.state.check_active(self.lcid).is_err() {
            return 0;
        }
        self.tx.lock().buffer_state()
    }

    pub fn tick(&self, elapsed_ms: u32) {
        if self.state.get() != EntityState::Active {
            return;
        }
        let sdus = self.rx.lock().tick(elapsed_ms);
        self.deliver(sdus);
    }

    /// Reset both directions, dropping everything buffered
    pub fn reestablish(&self) -> Result<ReestablishReport, RlcError> {
        let mut tx = self.tx.lock();
        let mut rx = self.rx.lock();
        // A bearer that failed meanwhile stays failed
        if !self.state.transition(EntityState::Active, EntityState::Reestablishing) {
            return Err(match self.state.get() {
                EntityState::Failed => RlcError::ChannelFailed(self.lcid),
                _ => RlcError::NotActive(self.lcid),
            });
        }
        let discarded = tx.reestablish();
        let held = rx.reestablish();
        rx.metrics.num_discarded_sdus += held as u64;
        self.state.set(EntityState::Active);

        info!("{}: UM reestablished, {} SDUs discarded", self.lcid, discarded + held);
        Ok(ReestablishReport {
            requeued_sdus: 0,
            discarded_sdus: discarded + held,
        })
    }

    pub fn metrics(&self) -> RlcMetrics {
        let mut metrics = self.tx.lock().metrics.clone();
        metrics.absorb(&self.rx.lock().metrics);
        metrics
    }

    pub fn window_state(&self) -> WindowState {
        let vt_us = self.tx.lock().vt_us();
        let rx = self.rx.lock();
        WindowState {
            tx_base: vt_us,
            tx_next: vt_us,
            rx_base: rx.vr_ur(),
            rx_highest: rx.vr_uh(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::pdu::StatusPdu;
    use interfaces::rlc::SduQueue;

    #[test]
    fn test_status_pdu_is_violation() {
        let upper = Arc::new(SduQueue::new());
        let um = UmEntity::new(Lcid(5), UmConfig::default(), upper.clone()).unwrap();
        um.state.set(EntityState::Active);

        um.write_pdu(StatusPdu { ack_sn: 0, nacks: vec![] }.encode());
        assert_eq!(um.metrics().num_protocol_violations, 1);
        assert_eq!(upper.num_delivered(), 0);
    }

    #[test]
    fn test_loopback_delivers() {
        let upper = Arc::new(SduQueue::new());
        let um = UmEntity::new(Lcid(5), UmConfig::default(), upper.clone()).unwrap();
        um.state.set(EntityState::Active);

        um.write_sdu(Bytes::from(vec![9u8; 50])).unwrap();
        while let Some(pdu) = um.read_pdu(20) {
            um.write_pdu(pdu);
        }
        assert_eq!(upper.delivered_on(Lcid(5)), vec![Bytes::from(vec![9u8; 50])]);
    }
}
