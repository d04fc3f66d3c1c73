//! UM receiver
//! 
//! The window is `[VR(UH) - W, VR(UH))`. SNs below VR(UR) inside it were
//! either delivered or skipped; a skipped SN keeps a tombstone so that it can
//! still be delivered once if its remaining segments arrive.

use bytes::Bytes;
use tracing::{debug, trace};

use crate::rlc::config::UmConfig;
use crate::rlc::error::RlcError;
use crate::rlc::metrics::RlcMetrics;
use crate::rlc::pdu::DataPdu;
use crate::rlc::segment::{InsertOutcome, Reassembly, SegmentAssembler};
use crate::rlc::slots::SnSlots;
use crate::rlc::sn::{Sn, SnSpace};
use crate::rlc::timer::RlcTimer;

#[derive(Debug)]
enum UmSlot {
    Partial(SegmentAssembler),
    Complete(Bytes),
    /// Skipped by VR(UR); may still complete late
    Lost(SegmentAssembler),
}

/// UM receiving side
#[derive(Debug)]
pub struct UmRx {
    space: SnSpace,
    slots: SnSlots<UmSlot>,
    /// VR(UR): oldest SN still awaited for in-order delivery
    vr_ur: Sn,
    /// VR(UX): VR(UH) when t-Reordering was started
    vr_ux: Sn,
    /// VR(UH): one past the highest SN received
    vr_uh: Sn,
    t_reordering: RlcTimer,
    pub(crate) metrics: RlcMetrics,
}

impl UmRx {
    pub fn new(cfg: &UmConfig) -> Result<Self, RlcError> {
        let space = SnSpace::new(cfg.rx_mod, cfg.rx_window_size)?;
        Ok(Self {
            space,
            slots: SnSlots::new(space.modulus()),
            vr_ur: 0,
            vr_ux: 0,
            vr_uh: 0,
            t_reordering: RlcTimer::new("t-Reordering", cfg.t_reordering),
            metrics: RlcMetrics::default(),
        })
    }

    fn window_base(&self) -> Sn {
        self.space.sub(self.vr_uh, self.space.window())
    }

    /// Process one data PDU. Returns the SDUs ready for delivery.
    pub fn receive(&mut self, pdu: DataPdu) -> Result<Vec<Bytes>, RlcError> {
        let sn = pdu.header.sn;
        self.metrics.count_rx_pdu(pdu.header.len() + pdu.payload.len());
        trace!(
            "RX SN={} SI={:?} SO={} (VR(UR)={} VR(UH)={})",
            sn,
            pdu.header.si,
            pdu.header.so,
            self.vr_ur,
            self.vr_uh
        );

        let base = self.window_base();
        if self.space.precedes(base, sn, self.vr_ur) {
            return self.receive_late(pdu);
        }

        let mut delivered = Vec::new();
        if !self.space.in_window(sn, base) {
            self.slide_window(sn, &mut delivered);
        }

        if !self.store(pdu)? {
            self.metrics.num_dropped_duplicates += 1;
        }

        while let Some(UmSlot::Complete(_)) = self.slots.get(self.vr_ur) {
            if let Some(UmSlot::Complete(sdu)) = self.slots.remove(self.vr_ur) {
                self.metrics.count_rx_sdu(sdu.len());
                delivered.push(sdu);
            }
            self.vr_ur = self.space.next(self.vr_ur);
        }

        self.update_reordering();
        Ok(delivered)
    }

    /// SN below VR(UR): only a tombstoned SN is still accepted
    fn receive_late(&mut self, pdu: DataPdu) -> Result<Vec<Bytes>, RlcError> {
        let sn = pdu.header.sn;
        let Some(UmSlot::Lost(assembler)) = self.slots.get_mut(sn) else {
            debug!("SN={} already delivered or discarded", sn);
            self.metrics.num_dropped_duplicates += 1;
            return Ok(Vec::new());
        };

        match assembler.insert(pdu.header.so as usize, pdu.payload, pdu.header.si.is_last()) {
            Ok(InsertOutcome::Stored) => {}
            Ok(InsertOutcome::Duplicate) => {
                self.metrics.num_dropped_duplicates += 1;
                return Ok(Vec::new());
            }
            Err(violation) => {
                self.metrics.num_protocol_violations += 1;
                return Err(violation.into());
            }
        }
        if !assembler.is_complete() {
            return Ok(Vec::new());
        }

        let Reassembly::Complete(sdu) = assembler.assemble()? else {
            return Ok(Vec::new());
        };
        self.slots.remove(sn);
        debug!("SN={} delivered late", sn);
        self.metrics.num_late_sdus += 1;
        self.metrics.count_rx_sdu(sdu.len());
        Ok(vec![sdu])
    }

    /// `sn` lies ahead of the window: move VR(UH) past it and flush what
    /// falls out of the window.
    fn slide_window(&mut self, sn: Sn, delivered: &mut Vec<Bytes>) {
        let old_base = self.window_base();
        self.vr_uh = self.space.next(sn);
        let new_base = self.window_base();

        let ur_pos = self.space.distance(old_base, self.vr_ur);
        for (pos, stale) in self.space.range(old_base, new_base).enumerate() {
            let slot = self.slots.remove(stale);
            if (pos as u16) < ur_pos {
                // Delivered or tombstoned earlier
                continue;
            }
            match slot {
                Some(UmSlot::Complete(sdu)) => {
                    self.metrics.count_rx_sdu(sdu.len());
                    delivered.push(sdu);
                }
                _ => self.metrics.num_lost_sdus += 1,
            }
        }
        if !self.space.in_window(self.vr_ur, new_base) {
            debug!("VR(UR) {} pushed out of the window, now {}", self.vr_ur, new_base);
            self.vr_ur = new_base;
        }
    }

    /// Returns false for a duplicate
    fn store(&mut self, pdu: DataPdu) -> Result<bool, RlcError> {
        let sn = pdu.header.sn;
        let slot = self
            .slots
            .get_or_insert_with(sn, || UmSlot::Partial(SegmentAssembler::new()));
        let assembler = match slot {
            UmSlot::Partial(assembler) => assembler,
            _ => return Ok(false),
        };

        let outcome = match assembler.insert(
            pdu.header.so as usize,
            pdu.payload,
            pdu.header.si.is_last(),
        ) {
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
            if let Reassembly::Complete(sdu) = assembler.assemble()? {
                *slot = UmSlot::Complete(sdu);
            }
        }
        Ok(true)
    }

    fn update_reordering(&mut self) {
        let base = self.window_base();
        if self.t_reordering.is_running() {
            let ux = self.space.distance(base, self.vr_ux);
            let ur = self.space.distance(base, self.vr_ur);
            if ux <= ur || ux > self.space.window() {
                self.t_reordering.stop();
            }
        }
        if !self.t_reordering.is_running() && self.vr_uh != self.vr_ur {
            self.vr_ux = self.vr_uh;
            self.t_reordering.start();
        }
    }

    /// Advance t-Reordering. On expiry VR(UR) skips to the first incomplete
    /// SN at or after VR(UX); SDUs that became in-order are returned.
    pub fn tick(&mut self, elapsed_ms: u32) -> Vec<Bytes> {
        let mut delivered = Vec::new();
        if !self.t_reordering.tick(elapsed_ms) {
            return delivered;
        }

        let mut target = self.vr_ux;
        while target != self.vr_uh && matches!(self.slots.get(target), Some(UmSlot::Complete(_))) {
            target = self.space.next(target);
        }
        debug!("t-Reordering expired: VR(UR) {} -> {}", self.vr_ur, target);

        for sn in self.space.range(self.vr_ur, target) {
            match self.slots.remove(sn) {
                Some(UmSlot::Complete(sdu)) => {
                    self.metrics.count_rx_sdu(sdu.len());
                    delivered.push(sdu);
                }
                Some(UmSlot::Partial(assembler)) | Some(UmSlot::Lost(assembler)) => {
                    self.metrics.num_lost_sdus += 1;
                    self.slots.insert(sn, UmSlot::Lost(assembler));
                }
                None => {
                    self.metrics.num_lost_sdus += 1;
                    self.slots.insert(sn, UmSlot::Lost(SegmentAssembler::new()));
                }
            }
        }
        self.vr_ur = target;

        if self.vr_uh != self.vr_ur {
            self.vr_ux = self.vr_uh;
            self.t_reordering.start();
        }
        delivered
    }

    /// Drop everything and reset the window. Returns the SNs held for
    /// reassembly; tombstones were already counted as lost.
    pub fn reestablish(&mut self) -> usize {
        let held = self
            .slots
            .values()
            .filter(|slot| !matches!(slot, UmSlot::Lost(_)))
            .count();
        self.slots.clear();
        self.vr_ur = 0;
        self.vr_ux = 0;
        self.vr_uh = 0;
        self.t_reordering.stop();
        held
    }

    pub fn vr_ur(&self) -> Sn {
        self.vr_ur
    }

    pub fn vr_uh(&self) -> Sn {
        self.vr_uh
    }

    pub fn reordering_running(&self) -> bool {
        self.t_reordering.is_running()
    }
}
