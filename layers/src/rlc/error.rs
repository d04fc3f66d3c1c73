//! RLC error types

use common::Lcid;
use thiserror::Error;

use super::sn::Sn;

/// Malformed or inconsistent PDU. The PDU is dropped and counted, the
/// bearer keeps running.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    #[error("PDU truncated")]
    Truncated,

    #[error("SN {sn} does not fit a {bits}-bit SN field")]
    SnOutOfRange { sn: u16, bits: u8 },

    #[error("reserved header bits set")]
    ReservedBits,

    #[error("data PDU without payload")]
    EmptyPayload,

    #[error("segment [{offset}, {end}) exceeds the maximum SDU size")]
    SegmentOverflow { offset: usize, end: usize },

    #[error("segment [{offset}, {end}) overlaps a previous segment")]
    OverlappingSegment { offset: usize, end: usize },

    #[error("segment [{offset}, {end}) lies beyond the end of the SDU ({sdu_len} bytes)")]
    SegmentBeyondEnd { offset: usize, end: usize, sdu_len: usize },

    #[error("last segment ends at {end}, earlier data declared {previous}")]
    ConflictingEnd { end: usize, previous: usize },

    #[error("unknown control PDU type {0}")]
    UnknownControlPdu(u8),

    #[error("control PDU received on an unacknowledged bearer")]
    UnexpectedControlPdu,

    #[error("NACK range [{start}, {end}) is empty")]
    InvalidNackRange { start: u16, end: u16 },

    #[error("ACK_SN {ack_sn} outside transmission window [{vt_a}, {vt_s}]")]
    AckOutOfWindow { ack_sn: Sn, vt_a: Sn, vt_s: Sn },
}

/// RLC errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RlcError {
    #[error("Transmission buffer full ({queued_sdus} SDUs, {queued_bytes} bytes queued)")]
    CapacityExceeded { queued_sdus: usize, queued_bytes: usize },

    #[error("SDU of {size} bytes exceeds maximum of {max} bytes")]
    SduTooLarge { size: usize, max: usize },

    #[error("Empty SDU")]
    EmptySdu,

    #[error("Protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),

    #[error("Maximum number of retransmissions reached for SN {sn}")]
    MaxRetxReached { sn: Sn },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown logical channel {0}")]
    UnknownChannel(Lcid),

    #[error("Logical channel {0} has failed")]
    ChannelFailed(Lcid),

    #[error("Logical channel {0} is not active")]
    NotActive(Lcid),

    #[error("RLC not initialized")]
    NotInitialized,
}
