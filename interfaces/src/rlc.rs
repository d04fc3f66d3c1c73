//! RLC Service Interfaces
//! 
//! Traits through which PDCP, RRC and MAC talk to an RLC instance and
//! through which RLC reports back to the upper layers.

use crate::InterfaceError;
use bytes::Bytes;
use common::Lcid;
use parking_lot::Mutex;
use tracing::trace;

/// Services RLC offers to PDCP
pub trait RlcPdcpInterface: Send + Sync {
    /// Queue an SDU for transmission. `BufferFull` is the backpressure signal.
    fn enqueue_sdu(&self, lcid: Lcid, sdu: Bytes) -> Result<(), InterfaceError>;
}

/// Services RLC offers to MAC
pub trait RlcMacInterface: Send + Sync {
    /// Bytes MAC must grant to drain the bearer, headers included
    fn buffer_state(&self, lcid: Lcid) -> usize;

    /// Build one PDU of at most `max_size` bytes for a transmission opportunity
    fn read_pdu(&self, lcid: Lcid, max_size: usize) -> Option<Bytes>;

    /// Hand a received PDU to RLC
    fn write_pdu(&self, lcid: Lcid, pdu: Bytes);
}

/// PDCP services used by RLC
pub trait PdcpRlcInterface: Send + Sync {
    /// Deliver a reassembled SDU
    fn deliver_sdu(&self, lcid: Lcid, sdu: Bytes);
}

/// RRC services used by RLC
pub trait RrcRlcInterface: Send + Sync {
    /// A bearer exceeded its retransmission limit and has failed
    fn notify_max_retx(&self, lcid: Lcid);
}

/// Upper layer that only records what RLC hands it
#[derive(Default)]
pub struct SduQueue {
    delivered: Mutex<Vec<(Lcid, Bytes)>>,
    max_retx: Mutex<Vec<Lcid>>,
}

impl SduQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return all SDUs delivered so far
    pub fn take_delivered(&self) -> Vec<(Lcid, Bytes)> {
        std::mem::take(&mut *self.delivered.lock())
    }

    /// Payloads delivered on one channel, in delivery order
    pub fn delivered_on(&self, lcid: Lcid) -> Vec<Bytes> {
        self.delivered
            .lock()
            .iter()
            .filter(|(l, _)| *l == lcid)
            .map(|(_, sdu)| sdu.clone())
            .collect()
    }

    /// Number of SDUs delivered on all channels
    pub fn num_delivered(&self) -> usize {
        self.delivered.lock().len()
    }

    /// Channels reported as failed, one entry per notification
    pub fn max_retx_notifications(&self) -> Vec<Lcid> {
        self.max_retx.lock().clone()
    }
}

impl PdcpRlcInterface for SduQueue {
    fn deliver_sdu(&self, lcid: Lcid, sdu: Bytes) {
        trace!("{}: SDU of {} bytes delivered", lcid, sdu.len());
        self.delivered.lock().push((lcid, sdu));
    }
}

impl RrcRlcInterface for SduQueue {
    fn notify_max_retx(&self, lcid: Lcid) {
        self.max_retx.lock().push(lcid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdu_queue_records_per_channel() {
        let queue = SduQueue::new();
        queue.deliver_sdu(Lcid(1), Bytes::from_static(b"a"));
        queue.deliver_sdu(Lcid(4), Bytes::from_static(b"b"));
        queue.deliver_sdu(Lcid(1), Bytes::from_static(b"c"));
        queue.notify_max_retx(Lcid(4));

        assert_eq!(queue.delivered_on(Lcid(1)), vec![Bytes::from_static(b"a"), Bytes::from_static(b"c")]);
        assert_eq!(queue.num_delivered(), 3);
        assert_eq!(queue.max_retx_notifications(), vec![Lcid(4)]);
        assert_eq!(queue.take_delivered().len(), 3);
        assert_eq!(queue.num_delivered(), 0);
    }
}
