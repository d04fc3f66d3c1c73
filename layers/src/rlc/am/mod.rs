//! Acknowledged Mode entity

mod rx;
mod tx;

pub use rx::AmRx;
pub use tx::{AmTx, TxFlush};

use bytes::Bytes;
use common::{bytes_to_hex_limited, Lcid};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::config::AmConfig;
use super::entity::{EntityState, ReestablishReport, StateCell, WindowState};
use super::error::RlcError;
use super::metrics::RlcMetrics;
use super::pdu::{decode, RlcPdu};
use super::sn::Sn;
use super::RlcUpperLayer;

/// AM bearer: ARQ with polling and STATUS reports
pub struct AmEntity {
    lcid: Lcid,
    cfg: AmConfig,
    tx: Mutex<AmTx>,
    rx: Mutex<AmRx>,
    pub(crate) state: StateCell,
    upper: Arc<dyn RlcUpperLayer>,
}

impl AmEntity {
    pub fn new(lcid: Lcid, cfg: AmConfig, upper: Arc<dyn RlcUpperLayer>) -> Result<Self, RlcError> {
        cfg.validate()?;
        Ok(Self {
            lcid,
            tx: Mutex::new(AmTx::new(cfg.clone())?),
            rx: Mutex::new(AmRx::new(&cfg)?),
            cfg,
            state: StateCell::new(EntityState::Init),
            upper,
        })
    }

    pub fn write_sdu(&self, sdu: Bytes) -> Result<(), RlcError> {
        self.state.check_active(self.lcid)?;
        self.tx.lock().enqueue(sdu)
    }

    /// Pending STATUS first, then retransmissions, then new data
    pub fn read_pdu(&self, max_size: usize) -> Option<Bytes> {
        if self.state.check_active(self.lcid).is_err() {
            return None;
        }
        if let Some(status) = self.rx.lock().build_status(max_size) {
            return Some(status.encode());
        }
        self.tx.lock().build_pdu(max_size)
    }

    pub fn write_pdu(&self, pdu: Bytes) {
        if let Err(e) = self.state.check_active(self.lcid) {
            debug!("{}: dropping PDU ({})", self.lcid, e);
            return;
        }
        trace!("{} RX PDU: {}", self.lcid, bytes_to_hex_limited(&pdu, 16));

        match decode(&pdu, self.cfg.sn_field_length.bits()) {
            Ok(RlcPdu::Data(data)) => {
                let result = self.rx.lock().receive(data);
                match result {
                    Ok(sdus) => self.deliver(sdus),
                    Err(e) => warn!("{}: {}", self.lcid, e),
                }
            }
            Ok(RlcPdu::Status(status)) => {
                let failed = {
                    let mut tx = self.tx.lock();
                    let result = tx.handle_status(&status);
                    self.check_tx_result(result)
                };
                if failed {
                    self.upper.notify_max_retx(self.lcid);
                }
            }
            Err(violation) => {
                self.rx.lock().metrics.num_protocol_violations += 1;
                warn!("{}: malformed PDU dropped: {}", self.lcid, violation);
            }
        }
    }

    fn deliver(&self, sdus: Vec<Bytes>) {
        for sdu in sdus {
            self.upper.deliver_sdu(self.lcid, sdu);
        }
    }

    /// Called with the TX lock held, so a reestablishment cannot interleave.
    /// True when the bearer just failed and RRC must be told.
    fn check_tx_result(&self, result: Result<(), RlcError>) -> bool {
        match result {
            Ok(()) => false,
            Err(RlcError::MaxRetxReached { sn }) => {
                let failed = self.state.transition(EntityState::Active, EntityState::Failed);
                if failed {
                    error!("{}: SN={} reached max retransmissions, bearer failed", self.lcid, sn);
                }
                failed
            }
            Err(e) => {
                warn!("{}: {}", self.lcid, e);
                false
            }
        }
    }

    pub fn buffer_state(&self) -> usize {
        if self.state.check_active(self.lcid).is_err() {
            return 0;
        }
        let status = self.rx.lock().status_len();
        status + self.tx.lock().buffer_state()
    }

    pub fn tick(&self, elapsed_ms: u32) {
        if self.state.get() != EntityState::Active {
            return;
        }
        let failed = {
            let mut tx = self.tx.lock();
            let result = tx.tick(elapsed_ms);
            self.check_tx_result(result)
        };
        if failed {
            self.upper.notify_max_retx(self.lcid);
            return;
        }
        self.rx.lock().tick(elapsed_ms);
    }

    /// Reset both directions. Unacknowledged SDUs are queued again from SN 0.
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
        let flush = tx.reestablish(true);
        let held = rx.reestablish();
        rx.metrics.num_discarded_sdus += held as u64;
        self.state.set(EntityState::Active);

        info!(
            "{}: AM reestablished, {} SDUs requeued, {} partial SNs dropped",
            self.lcid, flush.requeued, held
        );
        Ok(ReestablishReport {
            requeued_sdus: flush.requeued,
            discarded_sdus: flush.discarded + held,
        })
    }

    pub fn metrics(&self) -> RlcMetrics {
        let mut metrics = self.tx.lock().metrics.clone();
        metrics.absorb(&self.rx.lock().metrics);
        metrics
    }

    /// Retransmission rounds of an SN not yet acknowledged
    pub fn retx_count(&self, sn: Sn) -> Option<u32> {
        self.tx.lock().retx_count(sn)
    }

    pub fn window_state(&self) -> WindowState {
        let (tx_base, tx_next) = {
            let tx = self.tx.lock();
            (tx.vt_a(), tx.vt_s())
        };
        let rx = self.rx.lock();
        WindowState {
            tx_base,
            tx_next,
            rx_base: rx.vr_r(),
            rx_highest: rx.vr_h(),
        }
    }
}
