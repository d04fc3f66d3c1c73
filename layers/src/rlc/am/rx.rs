//! AM receiver: reception window, reassembly and STATUS generation

use bytes::Bytes;
use tracing::{debug, trace};

use crate::rlc::config::AmConfig;
use crate::rlc::error::RlcError;
use crate::rlc::metrics::RlcMetrics;
use crate::rlc::pdu::{DataPdu, NackEntry, StatusPdu, STATUS_HEADER_LEN};
use crate::rlc::segment::{InsertOutcome, Reassembly, SegmentAssembler};
use crate::rlc::slots::SnSlots;
use crate::rlc::sn::{Sn, SnSpace};
use crate::rlc::timer::RlcTimer;

#[derive(Debug)]
enum RxSlot {
    Partial(SegmentAssembler),
    Complete(Bytes),
}

impl RxSlot {
    fn is_complete(&self) -> bool {
        matches!(self, RxSlot::Complete(_))
    }
}

/// AM receiving side
#[derive(Debug)]
pub struct AmRx {
    space: SnSpace,
    slots: SnSlots<RxSlot>,
    /// VR(R): oldest SN not yet delivered
    vr_r: Sn,
    /// VR(H): one past the highest SN received
    vr_h: Sn,
    /// VR(MS): status point, first SN not completely received
    vr_ms: Sn,
    /// VR(X): VR(H) when t-Reordering was started
    vr_x: Sn,
    t_reordering: RlcTimer,
    t_status_prohibit: RlcTimer,
    status_required: bool,
    pub(crate) metrics: RlcMetrics,
}

impl AmRx {
    pub fn new(cfg: &AmConfig) -> Result<Self, RlcError> {
        let space = SnSpace::new(cfg.modulus(), cfg.window_size())?;
        Ok(Self {
            space,
            slots: SnSlots::new(space.modulus()),
            vr_r: 0,
            vr_h: 0,
            vr_ms: 0,
            vr_x: 0,
            t_reordering: RlcTimer::new("t-Reordering", cfg.t_reordering),
            t_status_prohibit: RlcTimer::new("t-StatusProhibit", cfg.t_status_prohibit),
            status_required: false,
            metrics: RlcMetrics::default(),
        })
    }

    /// Process one data PDU. Returns the SDUs that became deliverable, in order.
    pub fn receive(&mut self, pdu: DataPdu) -> Result<Vec<Bytes>, RlcError> {
        let sn = pdu.header.sn;
        self.metrics.count_rx_pdu(pdu.header.len() + pdu.payload.len());
        trace!(
            "RX SN={} SI={:?} SO={} P={} (VR(R)={} VR(H)={})",
            sn,
            pdu.header.si,
            pdu.header.so,
            pdu.header.poll,
            self.vr_r,
            self.vr_h
        );

        if pdu.header.poll {
            self.status_required = true;
        }

        if !self.space.in_window(sn, self.vr_r) {
            debug!("SN={} outside receive window [{}, +{})", sn, self.vr_r, self.space.window());
            self.metrics.num_dropped_duplicates += 1;
            return Ok(Vec::new());
        }

        if !self.store(pdu)? {
            self.metrics.num_dropped_duplicates += 1;
            return Ok(Vec::new());
        }

        if !self.space.precedes(self.vr_r, sn, self.vr_h) {
            self.vr_h = self.space.next(sn);
        }
        if sn == self.vr_ms {
            self.vr_ms = self.first_incomplete_from(self.vr_ms);
        }
        let delivered = self.deliver_in_order();
        self.update_reordering();
        Ok(delivered)
    }

    /// Put the payload into its slot. Returns false for a duplicate.
    fn store(&mut self, pdu: DataPdu) -> Result<bool, RlcError> {
        let sn = pdu.header.sn;
        let slot = self
            .slots
            .get_or_insert_with(sn, || RxSlot::Partial(SegmentAssembler::new()));
        let assembler = match slot {
            RxSlot::Complete(_) => return Ok(false),
            RxSlot::Partial(assembler) => assembler,
        };

        let outcome = assembler.insert(
            pdu.header.so as usize,
            pdu.payload,
            pdu.header.si.is_last(),
        );
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(violation) => {
                if assembler.received_bytes() == 0 {
                    self.slots.remove(sn);
                }
                self.metrics.num_protocol_violations += 1;
                return Err(violation.into());
            }
        };
        if outcome == InsertOutcome::Duplicate {
            return Ok(false);
        }

        if assembler.is_complete() {
            match assembler.assemble()? {
                Reassembly::Complete(sdu) => *slot = RxSlot::Complete(sdu),
                Reassembly::Incomplete => {}
            }
        }
        Ok(true)
    }

    /// First SN at or after `from`, below VR(H), not completely received
    fn first_incomplete_from(&self, from: Sn) -> Sn {
        let mut sn = from;
        while sn != self.vr_h && self.slots.get(sn).map_or(false, RxSlot::is_complete) {
            sn = self.space.next(sn);
        }
        sn
    }

    fn deliver_in_order(&mut self) -> Vec<Bytes> {
        let mut delivered = Vec::new();
        while let Some(RxSlot::Complete(_)) = self.slots.get(self.vr_r) {
            if let Some(RxSlot::Complete(sdu)) = self.slots.remove(self.vr_r) {
                self.metrics.count_rx_sdu(sdu.len());
                delivered.push(sdu);
            }
            self.vr_r = self.space.next(self.vr_r);
        }
        delivered
    }

    fn update_reordering(&mut self) {
        if self.t_reordering.is_running() {
            let pos = self.space.distance(self.vr_r, self.vr_x);
            if pos == 0 || pos > self.space.window() {
                self.t_reordering.stop();
            }
        }
        if !self.t_reordering.is_running() && self.vr_h != self.vr_r {
            self.vr_x = self.vr_h;
            self.t_reordering.start();
        }
    }

    /// Advance timers
    pub fn tick(&mut self, elapsed_ms: u32) {
        self.t_status_prohibit.tick(elapsed_ms);
        if !self.t_reordering.tick(elapsed_ms) {
            return;
        }

        let from = if self.space.precedes(self.vr_r, self.vr_ms, self.vr_x) {
            self.vr_x
        } else {
            self.vr_ms
        };
        self.vr_ms = self.first_incomplete_from(from);
        debug!("t-Reordering expired: VR(MS)={} VR(H)={}", self.vr_ms, self.vr_h);
        if self.vr_ms != self.vr_h {
            self.vr_x = self.vr_h;
            self.t_reordering.start();
        }
        self.status_required = true;
    }

    /// A STATUS PDU is due and not held back by t-StatusProhibit
    pub fn status_pending(&self) -> bool {
        self.status_required && !self.t_status_prohibit.is_running()
    }

    /// Size of the STATUS PDU that would be sent now
    pub fn status_len(&self) -> usize {
        if self.status_pending() {
            self.collect_status(usize::MAX).encoded_len()
        } else {
            0
        }
    }

    /// Build a STATUS PDU of at most `max_size` bytes and start t-StatusProhibit.
    /// Returns None when no status is due or it cannot fit.
    pub fn build_status(&mut self, max_size: usize) -> Option<StatusPdu> {
        if !self.status_pending() || max_size < STATUS_HEADER_LEN {
            return None;
        }
        let status = self.collect_status(max_size);
        self.status_required = false;
        self.t_status_prohibit.start();
        self.metrics.num_tx_status += 1;
        debug!("TX STATUS ACK_SN={} with {} NACKs", status.ack_sn, status.nacks.len());
        Some(status)
    }

    /// ACK up to VR(MS) and NACK every gap below it. When the NACKs do not
    /// fit, ACK_SN is lowered to the first SN left out.
    fn collect_status(&self, max_size: usize) -> StatusPdu {
        let mut status = StatusPdu { ack_sn: self.vr_ms, nacks: Vec::new() };
        let mut len = STATUS_HEADER_LEN;

        for sn in self.space.range(self.vr_r, self.vr_ms) {
            let nacks: Vec<NackEntry> = match self.slots.get(sn) {
                Some(RxSlot::Complete(_)) => continue,
                Some(RxSlot::Partial(assembler)) => assembler
                    .missing()
                    .into_iter()
                    .map(|range| NackEntry { sn, so: Some(range) })
                    .collect(),
                None => vec![NackEntry { sn, so: None }],
            };
            let needed: usize = nacks.iter().map(NackEntry::encoded_len).sum();
            if len + needed > max_size {
                status.ack_sn = sn;
                break;
            }
            len += needed;
            status.nacks.extend(nacks);
        }
        status
    }

    /// Drop everything received and reset the window. Returns the number of
    /// SNs that were held.
    pub fn reestablish(&mut self) -> usize {
        let held = self.slots.len();
        self.slots.clear();
        self.vr_r = 0;
        self.vr_h = 0;
        self.vr_ms = 0;
        self.vr_x = 0;
        self.t_reordering.stop();
        self.t_status_prohibit.stop();
        self.status_required = false;
        held
    }

    pub fn vr_r(&self) -> Sn {
        self.vr_r
    }

    pub fn vr_h(&self) -> Sn {
        self.vr_h
    }

    pub fn vr_ms(&self) -> Sn {
        self.vr_ms
    }

    pub fn reordering_running(&self) -> bool {
        self.t_reordering.is_running()
    }
}
