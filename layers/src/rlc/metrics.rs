//! Per-bearer counters

use serde::Serialize;

/// Counters of one RLC bearer. Every dropped PDU or SDU lands in one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RlcMetrics {
    pub num_tx_sdus: u64,
    pub num_tx_sdu_bytes: u64,
    pub num_tx_pdus: u64,
    pub num_tx_pdu_bytes: u64,
    pub num_retx_pdus: u64,
    pub num_tx_status: u64,
    pub num_rx_pdus: u64,
    pub num_rx_pdu_bytes: u64,
    pub num_rx_sdus: u64,
    pub num_rx_sdu_bytes: u64,
    pub num_rx_status: u64,
    pub num_dropped_duplicates: u64,
    pub num_protocol_violations: u64,
    pub num_lost_sdus: u64,
    pub num_late_sdus: u64,
    pub num_rejected_sdus: u64,
    pub num_discarded_sdus: u64,
}

impl RlcMetrics {
    /// Add every counter of `other` to `self`
    pub fn absorb(&mut self, other: &RlcMetrics) {
        self.num_tx_sdus += other.num_tx_sdus;
        self.num_tx_sdu_bytes += other.num_tx_sdu_bytes;
        self.num_tx_pdus += other.num_tx_pdus;
        self.num_tx_pdu_bytes += other.num_tx_pdu_bytes;
        self.num_retx_pdus += other.num_retx_pdus;
        self.num_tx_status += other.num_tx_status;
        self.num_rx_pdus += other.num_rx_pdus;
        self.num_rx_pdu_bytes += other.num_rx_pdu_bytes;
        self.num_rx_sdus += other.num_rx_sdus;
        self.num_rx_sdu_bytes += other.num_rx_sdu_bytes;
        self.num_rx_status += other.num_rx_status;
        self.num_dropped_duplicates += other.num_dropped_duplicates;
        self.num_protocol_violations += other.num_protocol_violations;
        self.num_lost_sdus += other.num_lost_sdus;
        self.num_late_sdus += other.num_late_sdus;
        self.num_rejected_sdus += other.num_rejected_sdus;
        self.num_discarded_sdus += other.num_discarded_sdus;
    }

    pub(crate) fn count_tx_pdu(&mut self, len: usize) {
        self.num_tx_pdus += 1;
        self.num_tx_pdu_bytes += len as u64;
    }

    pub(crate) fn count_rx_pdu(&mut self, len: usize) {
        self.num_rx_pdus += 1;
        self.num_rx_pdu_bytes += len as u64;
    }

    pub(crate) fn count_rx_sdu(&mut self, len: usize) {
        self.num_rx_sdus += 1;
        self.num_rx_sdu_bytes += len as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absorb_sums_counters() {
        let mut tx = RlcMetrics { num_tx_pdus: 3, num_retx_pdus: 1, ..Default::default() };
        let rx = RlcMetrics { num_rx_pdus: 2, num_tx_status: 1, ..Default::default() };
        tx.absorb(&rx);
        assert_eq!(tx.num_tx_pdus, 3);
        assert_eq!(tx.num_rx_pdus, 2);
        assert_eq!(tx.num_tx_status, 1);
        assert_eq!(tx.num_retx_pdus, 1);
    }
}
