//! AM transmitter: SDU queue, retransmission buffer and polling
//! 
//! Every SDU is given one SN on its first transmission and keeps it until it
//! is acknowledged. NACKed byte ranges are queued for retransmission and
//! are always served before new data.

use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use tracing::{debug, trace, warn};

use crate::rlc::config::AmConfig;
use crate::rlc::error::{RlcError, Violation};
use crate::rlc::metrics::RlcMetrics;
use crate::rlc::pdu::{DataPdu, DataPduHeader, NackEntry, SegmentInfo, StatusPdu, MAX_SDU_SIZE};
use crate::rlc::segment::next_segment;
use crate::rlc::slots::SnSlots;
use crate::rlc::sn::{Sn, SnSpace};
use crate::rlc::timer::RlcTimer;

/// SDU held until acknowledged
#[derive(Debug)]
struct TxEntry {
    sdu: Bytes,
    /// Bytes sent at least once, from offset 0
    sent_bytes: usize,
    retx_count: u32,
}

/// Byte range of one SN waiting for retransmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RetxRequest {
    sn: Sn,
    start: usize,
    end: usize,
}

/// What a reestablishment did with buffered SDUs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxFlush {
    /// SDUs put back in the queue as new SDUs
    pub requeued: usize,
    /// SDUs dropped
    pub discarded: usize,
}

/// AM transmitting side
#[derive(Debug)]
pub struct AmTx {
    cfg: AmConfig,
    space: SnSpace,
    sdu_queue: VecDeque<Bytes>,
    queued_bytes: usize,
    tx_window: SnSlots<TxEntry>,
    retx_queue: VecDeque<RetxRequest>,
    /// VT(A): oldest SN not yet acknowledged
    vt_a: Sn,
    /// VT(S): SN given to the next new SDU
    vt_s: Sn,
    /// SN whose first transmission is still under way
    in_progress: Option<Sn>,
    pdu_without_poll: u32,
    byte_without_poll: u32,
    poll_sn: Sn,
    poll_pending: bool,
    t_poll_retx: RlcTimer,
    pub(crate) metrics: RlcMetrics,
}

impl AmTx {
    pub fn new(cfg: AmConfig) -> Result<Self, RlcError> {
        let space = SnSpace::new(cfg.modulus(), cfg.window_size())?;
        Ok(Self {
            space,
            sdu_queue: VecDeque::new(),
            queued_bytes: 0,
            tx_window: SnSlots::new(space.modulus()),
            retx_queue: VecDeque::new(),
            vt_a: 0,
            vt_s: 0,
            in_progress: None,
            pdu_without_poll: 0,
            byte_without_poll: 0,
            poll_sn: 0,
            poll_pending: false,
            t_poll_retx: RlcTimer::new("t-PollRetransmit", cfg.t_poll_retx),
            metrics: RlcMetrics::default(),
            cfg,
        })
    }

    /// Queue an SDU for first transmission
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

    /// Bytes needed to send everything pending, headers included
    pub fn buffer_state(&self) -> usize {
        let retx: usize = self
            .retx_queue
            .iter()
            .map(|r| SegmentInfo::from_position(r.start == 0, false).header_len() + r.end - r.start)
            .sum();
        let ongoing = self
            .in_progress
            .and_then(|sn| self.tx_window.get(sn))
            .map(|e| SegmentInfo::Last.header_len() + e.sdu.len() - e.sent_bytes)
            .unwrap_or(0);
        let new = self.queued_bytes + self.sdu_queue.len() * SegmentInfo::Full.header_len();
        retx + ongoing + new
    }

    /// Build one PDU of at most `max_size` bytes. Retransmissions go first:
    /// while one is pending, no new data is sent, even if the pending range
    /// does not fit this opportunity.
    pub fn build_pdu(&mut self, max_size: usize) -> Option<Bytes> {
        self.drop_acked_retx();
        let pdu = if self.retx_queue.is_empty() {
            self.build_new_pdu(max_size)?
        } else {
            self.build_retx_pdu(max_size)?
        };

        let encoded = pdu.encode();
        self.metrics.count_tx_pdu(encoded.len());
        trace!(
            "TX SN={} SI={:?} SO={} P={} ({} bytes)",
            pdu.header.sn,
            pdu.header.si,
            pdu.header.so,
            pdu.header.poll,
            encoded.len()
        );
        Some(encoded)
    }

    /// Pop retransmission requests whose SN has left the window
    fn drop_acked_retx(&mut self) {
        while let Some(req) = self.retx_queue.front() {
            if self.tx_window.contains(req.sn) {
                break;
            }
            self.retx_queue.pop_front();
        }
    }

    fn build_retx_pdu(&mut self, max_size: usize) -> Option<DataPdu> {
        let req = *self.retx_queue.front()?;
        let entry = self.tx_window.get(req.sn)?;
        let seg = next_segment(&entry.sdu, req.start, req.end, max_size)?;

        match self.retx_queue.front_mut() {
            Some(front) if seg.end() < front.end => front.start = seg.end(),
            _ => {
                self.retx_queue.pop_front();
            }
        }

        self.metrics.num_retx_pdus += 1;
        let poll = self.check_poll(seg.data.len());
        Some(DataPdu {
            header: DataPduHeader { sn: req.sn, si: seg.si(), so: seg.offset as u16, poll },
            payload: seg.data,
        })
    }

    fn build_new_pdu(&mut self, max_size: usize) -> Option<DataPdu> {
        let sn = match self.in_progress {
            Some(sn) => sn,
            None => {
                if self.sdu_queue.is_empty() || max_size <= SegmentInfo::Full.header_len() {
                    return None;
                }
                if self.is_window_stalled() {
                    debug!("TX window full: VT(A)={} VT(S)={}", self.vt_a, self.vt_s);
                    return None;
                }
                let sdu = self.sdu_queue.pop_front()?;
                self.queued_bytes -= sdu.len();
                self.metrics.num_tx_sdus += 1;
                self.metrics.num_tx_sdu_bytes += sdu.len() as u64;

                let sn = self.vt_s;
                self.tx_window.insert(sn, TxEntry { sdu, sent_bytes: 0, retx_count: 0 });
                self.vt_s = self.space.next(self.vt_s);
                self.in_progress = Some(sn);
                sn
            }
        };

        let entry = self.tx_window.get_mut(sn)?;
        let seg = next_segment(&entry.sdu, entry.sent_bytes, entry.sdu.len(), max_size)?;
        entry.sent_bytes = seg.end();
        if seg.last {
            self.in_progress = None;
        }

        let poll = self.check_poll(seg.data.len());
        Some(DataPdu {
            header: DataPduHeader { sn, si: seg.si(), so: seg.offset as u16, poll },
            payload: seg.data,
        })
    }

    fn is_window_stalled(&self) -> bool {
        !self.space.in_window(self.vt_s, self.vt_a)
    }

    /// Decide whether the PDU being built carries the poll bit
    fn check_poll(&mut self, payload_len: usize) -> bool {
        self.pdu_without_poll += 1;
        self.byte_without_poll = self.byte_without_poll.saturating_add(payload_len as u32);

        let buffer_empty =
            self.sdu_queue.is_empty() && self.retx_queue.is_empty() && self.in_progress.is_none();
        let poll = self.poll_pending
            || self.pdu_without_poll >= self.cfg.poll_pdu
            || self.byte_without_poll >= self.cfg.poll_byte
            || buffer_empty
            || self.is_window_stalled();

        if poll {
            self.pdu_without_poll = 0;
            self.byte_without_poll = 0;
            self.poll_pending = false;
            self.poll_sn = self.space.sub(self.vt_s, 1);
            self.t_poll_retx.start();
        }
        poll
    }

    /// Apply a STATUS PDU received from the peer
    pub fn handle_status(&mut self, status: &StatusPdu) -> Result<(), RlcError> {
        self.metrics.num_rx_status += 1;

        let span = self.space.distance(self.vt_a, self.vt_s);
        let acked_span = self.space.distance(self.vt_a, status.ack_sn);
        if acked_span > span {
            self.metrics.num_protocol_violations += 1;
            return Err(Violation::AckOutOfWindow {
                ack_sn: status.ack_sn,
                vt_a: self.vt_a,
                vt_s: self.vt_s,
            }
            .into());
        }
        debug!(
            "RX STATUS ACK_SN={} with {} NACKs (VT(A)={} VT(S)={})",
            status.ack_sn,
            status.nacks.len(),
            self.vt_a,
            self.vt_s
        );

        if self.t_poll_retx.is_running() && self.space.distance(self.vt_a, self.poll_sn) < acked_span {
            self.t_poll_retx.stop();
        }

        // NACKs grouped by position in the window; stray ones are ignored
        let mut nacked: BTreeMap<u16, Vec<NackEntry>> = BTreeMap::new();
        for nack in &status.nacks {
            let pos = self.space.distance(self.vt_a, nack.sn);
            if pos < acked_span {
                nacked.entry(pos).or_default().push(*nack);
            } else {
                self.metrics.num_protocol_violations += 1;
                warn!("NACK_SN={} outside [{}, {})", nack.sn, self.vt_a, status.ack_sn);
            }
        }

        let mut result = Ok(());
        for (pos, sn) in self.space.range(self.vt_a, status.ack_sn).enumerate() {
            match nacked.get(&(pos as u16)) {
                Some(nacks) => {
                    if let Err(e) = self.schedule_retx(sn, nacks) {
                        result = Err(e);
                    }
                }
                None if self.in_progress == Some(sn) => {}
                None => {
                    if self.tx_window.remove(sn).is_some() {
                        self.retx_queue.retain(|r| r.sn != sn);
                    }
                }
            }
        }

        while self.vt_a != self.vt_s && !self.tx_window.contains(self.vt_a) {
            self.vt_a = self.space.next(self.vt_a);
        }
        result
    }

    /// Queue NACKed ranges of `sn` for retransmission
    fn schedule_retx(&mut self, sn: Sn, nacks: &[NackEntry]) -> Result<(), RlcError> {
        let already_pending = self.retx_queue.iter().any(|r| r.sn == sn);
        let Some(entry) = self.tx_window.get_mut(sn) else {
            return Ok(());
        };

        // Only bytes sent at least once can be retransmitted
        let ranges: Vec<(usize, usize)> = nacks
            .iter()
            .map(|nack| match nack.so {
                Some(so) => so.clip(entry.sent_bytes),
                None => (0, entry.sent_bytes),
            })
            .filter(|(start, end)| start < end)
            .collect();
        if ranges.is_empty() {
            return Ok(());
        }

        if !already_pending {
            entry.retx_count += 1;
        }
        if entry.retx_count > self.cfg.max_retx_thresh {
            warn!("SN={} reached max retransmissions ({})", sn, self.cfg.max_retx_thresh);
            return Err(RlcError::MaxRetxReached { sn });
        }
        debug!("SN={} scheduled for retransmission (retx_count={})", sn, entry.retx_count);

        self.retx_queue.retain(|r| r.sn != sn);
        self.retx_queue
            .extend(ranges.into_iter().map(|(start, end)| RetxRequest { sn, start, end }));
        Ok(())
    }

    /// Advance timers; t-PollRetransmit expiry forces a poll
    pub fn tick(&mut self, elapsed_ms: u32) -> Result<(), RlcError> {
        if !self.t_poll_retx.tick(elapsed_ms) {
            return Ok(());
        }
        debug!("t-PollRetransmit expired (POLL_SN={})", self.poll_sn);
        self.poll_pending = true;

        let nothing_new = self.sdu_queue.is_empty() && self.in_progress.is_none();
        if (nothing_new && self.retx_queue.is_empty()) || self.is_window_stalled() {
            let highest = self.space.sub(self.vt_s, 1);
            let sn = if self.tx_window.contains(highest) { highest } else { self.vt_a };
            if self.tx_window.contains(sn) {
                self.schedule_retx(sn, &[NackEntry { sn, so: None }])?;
            }
        }
        Ok(())
    }

    /// Drop all state. With `requeue`, SDUs not yet acknowledged go back
    /// into the queue, oldest first.
    pub fn reestablish(&mut self, requeue: bool) -> TxFlush {
        let mut pending: Vec<Bytes> = self
            .space
            .range(self.vt_a, self.vt_s)
            .filter_map(|sn| self.tx_window.remove(sn))
            .map(|entry| entry.sdu)
            .collect();
        pending.extend(self.sdu_queue.drain(..));

        self.tx_window.clear();
        self.retx_queue.clear();
        self.vt_a = 0;
        self.vt_s = 0;
        self.in_progress = None;
        self.pdu_without_poll = 0;
        self.byte_without_poll = 0;
        self.poll_sn = 0;
        self.poll_pending = false;
        self.t_poll_retx.stop();

        let mut flush = TxFlush::default();
        if requeue {
            flush.requeued = pending.len();
            self.queued_bytes = pending.iter().map(Bytes::len).sum();
            self.sdu_queue = pending.into();
        } else {
            flush.discarded = pending.len();
            self.metrics.num_discarded_sdus += pending.len() as u64;
            self.queued_bytes = 0;
        }
        flush
    }

    pub fn vt_a(&self) -> Sn {
        self.vt_a
    }

    pub fn vt_s(&self) -> Sn {
        self.vt_s
    }

    /// Retransmission rounds of an SN still awaiting acknowledgement
    pub fn retx_count(&self, sn: Sn) -> Option<u32> {
        self.tx_window.get(sn).map(|e| e.retx_count)
    }

    /// SDUs not yet acknowledged, queued ones included
    pub fn unacked_sdus(&self) -> usize {
        self.tx_window.len() + self.sdu_queue.len()
    }

    pub fn poll_retx_running(&self) -> bool {
        self.t_poll_retx.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rlc::pdu::{decode, RlcPdu, SoRange};

    fn tx(cfg: AmConfig) -> AmTx {
        AmTx::new(cfg).unwrap()
    }

    fn data(pdu: Bytes) -> DataPdu {
        match decode(&pdu, 10).unwrap() {
            RlcPdu::Data(d) => d,
            other => panic!("expected data PDU, got {:?}", other),
        }
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut am = tx(AmConfig { max_sdus: 2, ..AmConfig::default() });
        am.enqueue(Bytes::from_static(b"a")).unwrap();
        am.enqueue(Bytes::from_static(b"b")).unwrap();
        assert_eq!(
            am.enqueue(Bytes::from_static(b"c")),
            Err(RlcError::CapacityExceeded { queued_sdus: 2, queued_bytes: 2 })
        );
        assert_eq!(am.metrics.num_rejected_sdus, 1);
        assert_eq!(am.enqueue(Bytes::new()), Err(RlcError::EmptySdu));
    }

    #[test]
    fn test_segmentation_to_opportunity() {
        let mut am = tx(AmConfig::default());
        am.enqueue(Bytes::from(vec![7u8; 100])).unwrap();
        assert_eq!(am.buffer_state(), 102);

        let first = data(am.build_pdu(50).unwrap());
        assert_eq!(first.header.si, SegmentInfo::First);
        assert_eq!(first.payload.len(), 48);
        assert!(!first.header.poll);

        let last = data(am.build_pdu(80).unwrap());
        assert_eq!(last.header.si, SegmentInfo::Last);
        assert_eq!(last.header.so, 48);
        assert_eq!(last.payload.len(), 52);
        // Buffer drained: poll
        assert!(last.header.poll);
        assert!(am.poll_retx_running());
        assert_eq!(am.build_pdu(80), None);
        assert_eq!(am.vt_s(), 1);
    }

    #[test]
    fn test_poll_pdu_counter() {
        let mut am = tx(AmConfig { poll_pdu: 2, ..AmConfig::default() });
        for _ in 0..4 {
            am.enqueue(Bytes::from_static(b"xyz")).unwrap();
        }
        let polls: Vec<bool> = (0..4).map(|_| data(am.build_pdu(100).unwrap()).header.poll).collect();
        assert_eq!(polls, vec![false, true, false, true]);
    }

    #[test]
    fn test_status_acks_and_nacks() {
        let mut am = tx(AmConfig::default());
        for i in 0..4u8 {
            am.enqueue(Bytes::from(vec![i; 10])).unwrap();
            am.build_pdu(100).unwrap();
        }

        let status = StatusPdu {
            ack_sn: 4,
            nacks: vec![
                NackEntry { sn: 1, so: None },
                NackEntry { sn: 2, so: Some(SoRange { start: 5, end: SO_END }) },
            ],
        };
        am.handle_status(&status).unwrap();
        assert_eq!(am.vt_a(), 1);
        assert_eq!(am.retx_count(0), None);
        assert_eq!(am.retx_count(1), Some(1));
        assert_eq!(am.retx_count(2), Some(1));
        assert_eq!(am.unacked_sdus(), 2);

        let retx1 = data(am.build_pdu(100).unwrap());
        assert_eq!((retx1.header.sn, retx1.header.si), (1, SegmentInfo::Full));
        let retx2 = data(am.build_pdu(100).unwrap());
        assert_eq!((retx2.header.sn, retx2.header.si, retx2.header.so), (2, SegmentInfo::Last, 5));
        assert_eq!(retx2.payload.len(), 5);
        assert_eq!(am.metrics.num_retx_pdus, 2);

        am.handle_status(&StatusPdu { ack_sn: 4, nacks: vec![] }).unwrap();
        assert_eq!(am.vt_a(), 4);
        assert_eq!(am.unacked_sdus(), 0);
    }

    const SO_END: u16 = crate::rlc::pdu::SO_END_OF_SDU;

    #[test]
    fn test_ack_outside_window_rejected() {
        let mut am = tx(AmConfig::default());
        am.enqueue(Bytes::from_static(b"abc")).unwrap();
        am.build_pdu(100).unwrap();
        let err = am.handle_status(&StatusPdu { ack_sn: 5, nacks: vec![] }).unwrap_err();
        assert_eq!(
            err,
            RlcError::ProtocolViolation(Violation::AckOutOfWindow { ack_sn: 5, vt_a: 0, vt_s: 1 })
        );
        assert_eq!(am.vt_a(), 0);
    }

    #[test]
    fn test_max_retx_reached() {
        let mut am = tx(AmConfig { max_retx_thresh: 1, ..AmConfig::default() });
        am.enqueue(Bytes::from_static(b"abc")).unwrap();
        am.build_pdu(100).unwrap();

        let nack = StatusPdu { ack_sn: 1, nacks: vec![NackEntry { sn: 0, so: None }] };
        am.handle_status(&nack).unwrap();
        am.build_pdu(100).unwrap();
        assert_eq!(am.handle_status(&nack), Err(RlcError::MaxRetxReached { sn: 0 }));
    }

    #[test]
    fn test_repeated_nack_while_pending_counts_once() {
        let mut am = tx(AmConfig::default());
        am.enqueue(Bytes::from_static(b"abc")).unwrap();
        am.build_pdu(100).unwrap();

        let nack = StatusPdu { ack_sn: 1, nacks: vec![NackEntry { sn: 0, so: None }] };
        am.handle_status(&nack).unwrap();
        am.handle_status(&nack).unwrap();
        assert_eq!(am.retx_count(0), Some(1));
    }

    #[test]
    fn test_retx_resegmented_to_small_opportunity() {
        let mut am = tx(AmConfig::default());
        am.enqueue(Bytes::from(vec![1u8; 30])).unwrap();
        am.build_pdu(100).unwrap();
        am.handle_status(&StatusPdu { ack_sn: 1, nacks: vec![NackEntry { sn: 0, so: None }] })
            .unwrap();

        let a = data(am.build_pdu(12).unwrap());
        let b = data(am.build_pdu(12).unwrap());
        let c = data(am.build_pdu(40).unwrap());
        assert_eq!((a.header.si, a.header.so, a.payload.len()), (SegmentInfo::First, 0, 10));
        assert_eq!((b.header.si, b.header.so, b.payload.len()), (SegmentInfo::Middle, 10, 8));
        assert_eq!((c.header.si, c.header.so, c.payload.len()), (SegmentInfo::Last, 18, 12));
    }

    #[test]
    fn test_pending_retx_blocks_new_data_on_small_grant() {
        let mut am = tx(AmConfig::default());
        am.enqueue(Bytes::from(vec![1u8; 20])).unwrap();
        am.build_pdu(100).unwrap();
        let status = StatusPdu {
            ack_sn: 1,
            nacks: vec![NackEntry { sn: 0, so: Some(SoRange { start: 10, end: SO_END }) }],
        };
        am.handle_status(&status).unwrap();
        am.enqueue(Bytes::from(vec![2u8; 20])).unwrap();

        // The retransmission needs an SO, so 4 bytes carry no payload
        assert_eq!(am.build_pdu(4), None);
        assert_eq!(am.vt_s(), 1);

        let retx = data(am.build_pdu(8).unwrap());
        assert_eq!((retx.header.sn, retx.header.so, retx.payload.len()), (0, 10, 4));
        let retx = data(am.build_pdu(100).unwrap());
        assert_eq!((retx.header.sn, retx.header.si, retx.header.so), (0, SegmentInfo::Last, 14));
        let new = data(am.build_pdu(100).unwrap());
        assert_eq!((new.header.sn, new.header.si), (1, SegmentInfo::Full));
    }

    #[test]
    fn test_poll_retx_expiry_retransmits_last_sn() {
        let mut am = tx(AmConfig { t_poll_retx: 5, ..AmConfig::default() });
        am.enqueue(Bytes::from_static(b"abc")).unwrap();
        assert!(data(am.build_pdu(100).unwrap()).header.poll);

        am.tick(5).unwrap();
        assert_eq!(am.retx_count(0), Some(1));
        let retx = data(am.build_pdu(100).unwrap());
        assert_eq!(retx.header.sn, 0);
        assert!(retx.header.poll);
    }

    #[test]
    fn test_window_stall() {
        let cfg = AmConfig { sn_field_length: crate::rlc::config::SnFieldLength::Bits5, ..AmConfig::default() };
        let mut am = tx(cfg);
        for _ in 0..20 {
            am.enqueue(Bytes::from_static(b"x")).unwrap();
        }
        let sent = std::iter::from_fn(|| am.build_pdu(10)).count();
        assert_eq!(sent, 16);
        assert_eq!(am.vt_s(), 16);
    }

    #[test]
    fn test_reestablish_requeues_unacked() {
        let mut am = tx(AmConfig::default());
        for i in 0..5u8 {
            am.enqueue(Bytes::from(vec![i; 4])).unwrap();
        }
        for _ in 0..3 {
            am.build_pdu(100).unwrap();
        }
        am.handle_status(&StatusPdu { ack_sn: 2, nacks: vec![] }).unwrap();

        let flush = am.reestablish(true);
        assert_eq!(flush, TxFlush { requeued: 3, discarded: 0 });
        assert_eq!((am.vt_a(), am.vt_s()), (0, 0));
        let first = data(am.build_pdu(100).unwrap());
        assert_eq!(first.header.sn, 0);
        assert_eq!(&first.payload[..], &[2u8; 4]);
    }
}
