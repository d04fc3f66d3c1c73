//! UM transmitter
//! 
//! One SN per SDU, segmented to fit each opportunity. Nothing is kept once
//! sent.

use bytes::Bytes;
use std::collections::VecDeque;
use tracing::trace;

use crate::rlc::config::UmConfig;
use crate::rlc::error::RlcError;
use crate::rlc::metrics::RlcMetrics;
use crate::rlc::pdu::{DataPdu, DataPduHeader, SegmentInfo, MAX_SDU_SIZE};
use crate::rlc::segment::next_segment;
use crate::rlc::sn::Sn;

#[derive(Debug)]
struct Ongoing {
    sn: Sn,
    sdu: Bytes,
    sent: usize,
}

/// UM transmitting side
#[derive(Debug)]
pub struct UmTx {
    cfg: UmConfig,
    sdu_queue: VecDeque<Bytes>,
    queued_bytes: usize,
    ongoing: Option<Ongoing>,
    /// VT(US): SN given to the next SDU
    vt_us: Sn,
    pub(crate) metrics: RlcMetrics,
}

impl UmTx {
    pub fn new(cfg: UmConfig) -> Self {
        Self {
            cfg,
            sdu_queue: VecDeque::new(),
            queued_bytes: 0,
            ongoing: None,
            vt_us: 0,
            metrics: RlcMetrics::default(),
        }
    }

    pub fn enqueue(&mut self, sdu: Bytes) -> Result<(), RlcError> {
        if sdu.is_empty() {
            return Err(RlcError::EmptySdu);
        }
        if sdu.len() > MAX_SDU_SIZE {
            return Err(RlcError::SduTooLarge { size: sdu.len(), max: MAX_SDU_SIZE });
        }
        if self.sdu_queue.len() >= self.cfg.max_sdus
            || self.queued_bytes + sdu.len() > self.cfg.max_bytes
        {
            self.metrics.num_rejected_sdus += 1;
            return Err(RlcError::CapacityExceeded {
                queued_sdus: self.sdu_queue.len(),
                queued_bytes: self.queued_bytes,
            });
        }
        self.queued_bytes += sdu.len();
        self.sdu_queue.push_back(sdu);
        Ok(())
    }

    pub fn buffer_state(&self) -> usize {
        let ongoing = self
            .ongoing
            .as_ref()
            .map(|o| SegmentInfo::Last.header_len() + o.sdu.len() - o.sent)
            .unwrap_or(0);
        ongoing + self.queued_bytes + self.sdu_queue.len() * SegmentInfo::Full.header_len()
    }

    pub fn build_pdu(&mut self, max_size: usize) -> Option<Bytes> {
        if self.ongoing.is_none() {
            if self.sdu_queue.is_empty() || max_size <= SegmentInfo::Full.header_len() {
                return None;
            }
            let sdu = self.sdu_queue.pop_front()?;
            self.queued_bytes -= sdu.len();
            self.metrics.num_tx_sdus += 1;
            self.metrics.num_tx_sdu_bytes += sdu.len() as u64;

            let sn = self.vt_us;
            self.vt_us = ((self.vt_us as u32 + 1) % self.cfg.tx_mod as u32) as Sn;
            self.ongoing = Some(Ongoing { sn, sdu, sent: 0 });
        }

        let ongoing = self.ongoing.as_mut()?;
        let seg = next_segment(&ongoing.sdu, ongoing.sent, ongoing.sdu.len(), max_size)?;
        ongoing.sent = seg.end();
        let pdu = DataPdu {
            header: DataPduHeader { sn: ongoing.sn, si: seg.si(), so: seg.offset as u16, poll: false },
            payload: seg.data,
        };
        if pdu.header.si.is_last() {
            self.ongoing = None;
        }

        let encoded = pdu.encode();
        self.metrics.count_tx_pdu(encoded.len());
        trace!(
            "TX SN={} SI={:?} SO={} ({} bytes)",
            pdu.header.sn,
            pdu.header.si,
            pdu.header.so,
            encoded.len()
        );
        Some(encoded)
    }

    /// Drop everything and restart from SN 0. Returns the SDUs discarded.
    pub fn reestablish(&mut self) -> usize {
        let discarded = self.sdu_queue.len() + usize::from(self.ongoing.is_some());
        self.sdu_queue.clear();
        self.queued_bytes = 0;
        self.ongoing = None;
        self.vt_us = 0;
        self.metrics.num_discarded_sdus += discarded as u64;
        discarded
    }

    pub fn vt_us(&self) -> Sn {
        self.vt_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::pdu::{decode, RlcPdu};

    fn data(pdu: Bytes) -> DataPdu {
        match decode(&pdu, 5).unwrap() {
            RlcPdu::Data(d) => d,
            other => panic!("expected data PDU, got {:?}", other),
        }
    }

    #[test]
    fn test_one_sn_per_sdu() {
        let mut um = UmTx::new(UmConfig::default());
        um.enqueue(Bytes::from(vec![1u8; 10])).unwrap();
        um.enqueue(Bytes::from(vec![2u8; 10])).unwrap();

        let a = data(um.build_pdu(8).unwrap());
        let b = data(um.build_pdu(100).unwrap());
        let c = data(um.build_pdu(100).unwrap());
        assert_eq!((a.header.sn, a.header.si), (0, SegmentInfo::First));
        assert_eq!((b.header.sn, b.header.si, b.header.so), (0, SegmentInfo::Last, 6));
        assert_eq!((c.header.sn, c.header.si), (1, SegmentInfo::Full));
        assert!(!a.header.poll && !b.header.poll && !c.header.poll);
        assert_eq!(um.build_pdu(100), None);
    }

    #[test]
    fn test_sn_wraps_at_tx_mod() {
        let mut um = UmTx::new(UmConfig::default());
        for _ in 0..33 {
            um.enqueue(Bytes::from_static(b"x")).unwrap();
            um.build_pdu(10).unwrap();
        }
        assert_eq!(um.vt_us(), 1);
    }

    #[test]
    fn test_reestablish_discards() {
        let mut um = UmTx::new(UmConfig::default());
        for _ in 0..3 {
            um.enqueue(Bytes::from(vec![0u8; 20])).unwrap();
        }
        um.build_pdu(10).unwrap();
        assert_eq!(um.reestablish(), 3);
        assert_eq!(um.buffer_state(), 0);
        assert_eq!(um.vt_us(), 0);
        assert_eq!(um.metrics.num_discarded_sdus, 3);
    }
}
