//! RLC PDU formats
//! 
//! Data PDU header (2 or 4 bytes):
//! 
//! ```text
//!  7    6   5  4   3  2   1    0
//! [D/C][P ][ SI ][ R  ][SN9][SN8]
//! [            SN7..SN0         ]
//! [            SO (16 bits)     ]   only for SI = last / middle
//! ```
//! 
//! STATUS PDU: `D/C=0 CPT(3)=0 R(4)`, 16-bit ACK_SN, then NACK entries of
//! `E(1) R(5) NACK_SN(10)` optionally followed by `SOstart(16) SOend(16)`.
//! `SOend = 0xFFFF` stands for "up to the end of the SDU"; otherwise the
//! range is half-open.

use bitflags::bitflags;
use bytes::{BufMut, Bytes, BytesMut};
use nom::{
    combinator::{cond, rest},
    multi::many0,
    number::complete::{be_u16, be_u8},
    sequence::tuple,
    IResult,
};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use super::error::Violation;
use super::sn::Sn;

/// Fixed part of a data PDU header
pub const DATA_HEADER_LEN: usize = 2;
/// Segment offset field
pub const SO_LEN: usize = 2;
/// Fixed part of a STATUS PDU
pub const STATUS_HEADER_LEN: usize = 3;
/// NACK entry without an SO range
pub const NACK_LEN: usize = 2;
/// NACK entry with an SO range
pub const NACK_SO_LEN: usize = 6;
/// SOend value meaning "to the end of the SDU"
pub const SO_END_OF_SDU: u16 = 0xFFFF;
/// Largest SDU accepted for transmission
pub const MAX_SDU_SIZE: usize = 9000;

const SN_FIELD_MASK: u16 = 0x03FF;
const NACK_E_FLAG: u16 = 0x8000;
const NACK_RESERVED: u16 = 0x7C00;

bitflags! {
    /// Flag bits of the first header octet
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HeaderFlags: u8 {
        /// Data PDU (cleared for control PDUs)
        const DATA = 0x80;
        /// Status report requested
        const POLL = 0x40;
    }
}

/// Segmentation info: where the payload sits within its SDU
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum SegmentInfo {
    /// Complete SDU
    Full = 0,
    /// First segment
    First = 1,
    /// Last segment
    Last = 2,
    /// Neither first nor last
    Middle = 3,
}

impl SegmentInfo {
    pub fn from_position(first: bool, last: bool) -> Self {
        match (first, last) {
            (true, true) => SegmentInfo::Full,
            (true, false) => SegmentInfo::First,
            (false, true) => SegmentInfo::Last,
            (false, false) => SegmentInfo::Middle,
        }
    }

    pub fn is_last(self) -> bool {
        matches!(self, SegmentInfo::Full | SegmentInfo::Last)
    }

    /// SO is only carried when the segment does not start at offset 0
    pub fn has_so(self) -> bool {
        matches!(self, SegmentInfo::Last | SegmentInfo::Middle)
    }

    /// Header length for a PDU carrying this kind of payload
    pub fn header_len(self) -> usize {
        if self.has_so() {
            DATA_HEADER_LEN + SO_LEN
        } else {
            DATA_HEADER_LEN
        }
    }
}

/// Data PDU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPduHeader {
    /// Sequence number
    pub sn: Sn,
    /// Segmentation info
    pub si: SegmentInfo,
    /// Segment offset in bytes
    pub so: u16,
    /// Polling bit
    pub poll: bool,
}

impl DataPduHeader {
    pub fn len(&self) -> usize {
        self.si.header_len()
    }

    fn write(&self, buf: &mut BytesMut) {
        let mut flags = HeaderFlags::DATA;
        flags.set(HeaderFlags::POLL, self.poll);
        buf.put_u8(flags.bits() | ((self.si as u8) << 4) | ((self.sn >> 8) as u8 & 0x03));
        buf.put_u8(self.sn as u8);
        if self.si.has_so() {
            buf.put_u16(self.so);
        }
    }
}

/// Data PDU: header plus a whole SDU or one segment of it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPdu {
    pub header: DataPduHeader,
    pub payload: Bytes,
}

impl DataPdu {
    /// Byte offset just past this segment
    pub fn end(&self) -> usize {
        self.header.so as usize + self.payload.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.header.len() + self.payload.len());
        self.header.write(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Byte range `[start, end)` of an SDU reported missing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoRange {
    pub start: u16,
    pub end: u16,
}

impl SoRange {
    /// Clip the range to the first `len` bytes of an SDU
    pub fn clip(&self, len: usize) -> (usize, usize) {
        let end = if self.end == SO_END_OF_SDU {
            len
        } else {
            (self.end as usize).min(len)
        };
        ((self.start as usize).min(end), end)
    }
}

/// Negative acknowledgement of a whole SN or a byte range within it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NackEntry {
    pub sn: Sn,
    pub so: Option<SoRange>,
}

impl NackEntry {
    pub fn encoded_len(&self) -> usize {
        if self.so.is_some() {
            NACK_SO_LEN
        } else {
            NACK_LEN
        }
    }
}

/// STATUS PDU: everything below `ack_sn` except the NACKed parts was received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPdu {
    pub ack_sn: Sn,
    pub nacks: Vec<NackEntry>,
}

impl StatusPdu {
    pub fn encoded_len(&self) -> usize {
        STATUS_HEADER_LEN + self.nacks.iter().map(NackEntry::encoded_len).sum::<usize>()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        // D/C = 0, CPT = 000
        buf.put_u8(0);
        buf.put_u16(self.ack_sn & SN_FIELD_MASK);
        for nack in &self.nacks {
            let mut field = nack.sn & SN_FIELD_MASK;
            if nack.so.is_some() {
                field |= NACK_E_FLAG;
            }
            buf.put_u16(field);
            if let Some(so) = nack.so {
                buf.put_u16(so.start);
                buf.put_u16(so.end);
            }
        }
        buf.freeze()
    }
}

/// Any RLC PDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlcPdu {
    Data(DataPdu),
    Status(StatusPdu),
}

type RawNack = (u16, Option<(u16, u16)>);

fn parse_nack(input: &[u8]) -> IResult<&[u8], RawNack> {
    let (input, field) = be_u16(input)?;
    let (input, so) = cond(field & NACK_E_FLAG != 0, tuple((be_u16, be_u16)))(input)?;
    Ok((input, (field, so)))
}

fn parse_status(input: &[u8]) -> IResult<&[u8], (u8, u16, Vec<RawNack>)> {
    let (input, (first, ack)) = tuple((be_u8, be_u16))(input)?;
    let (input, nacks) = many0(parse_nack)(input)?;
    Ok((input, (first, ack, nacks)))
}

fn parse_data(input: &[u8]) -> IResult<&[u8], (u8, u8, Option<u16>, usize)> {
    let (input, (first, second)) = tuple((be_u8, be_u8))(input)?;
    let si = (first >> 4) & 0x03;
    let (input, so) = cond(si & 0x02 != 0, be_u16)(input)?;
    let (input, payload) = rest(input)?;
    Ok((input, (first, second, so, payload.len())))
}

fn check_sn(sn: u16, sn_bits: u8) -> Result<Sn, Violation> {
    if sn >> sn_bits != 0 {
        return Err(Violation::SnOutOfRange { sn, bits: sn_bits });
    }
    Ok(sn)
}

/// Decode a PDU received from MAC. `sn_bits` is the configured SN length.
pub fn decode(pdu: &Bytes, sn_bits: u8) -> Result<RlcPdu, Violation> {
    let first = *pdu.first().ok_or(Violation::Truncated)?;
    if HeaderFlags::from_bits_truncate(first).contains(HeaderFlags::DATA) {
        decode_data(pdu, sn_bits).map(RlcPdu::Data)
    } else {
        decode_status(pdu, sn_bits).map(RlcPdu::Status)
    }
}

fn decode_data(pdu: &Bytes, sn_bits: u8) -> Result<DataPdu, Violation> {
    let (_, (first, second, so, payload_len)) =
        parse_data(pdu).map_err(|_| Violation::Truncated)?;

    if first & 0x0C != 0 {
        return Err(Violation::ReservedBits);
    }
    if payload_len == 0 {
        return Err(Violation::EmptyPayload);
    }

    let si = SegmentInfo::from_u8((first >> 4) & 0x03).ok_or(Violation::Truncated)?;
    let sn = check_sn((((first & 0x03) as u16) << 8) | second as u16, sn_bits)?;
    let so = so.unwrap_or(0);
    let end = so as usize + payload_len;
    if end > MAX_SDU_SIZE {
        return Err(Violation::SegmentOverflow { offset: so as usize, end });
    }

    let header = DataPduHeader {
        sn,
        si,
        so,
        poll: first & HeaderFlags::POLL.bits() != 0,
    };
    let payload = pdu.slice(pdu.len() - payload_len..);
    Ok(DataPdu { header, payload })
}

fn decode_status(pdu: &Bytes, sn_bits: u8) -> Result<StatusPdu, Violation> {
    let (remaining, (first, ack, raw_nacks)) =
        parse_status(pdu).map_err(|_| Violation::Truncated)?;
    if !remaining.is_empty() {
        return Err(Violation::Truncated);
    }

    let cpt = (first >> 4) & 0x07;
    if cpt != 0 {
        return Err(Violation::UnknownControlPdu(cpt));
    }
    if first & 0x0F != 0 || ack & !SN_FIELD_MASK != 0 {
        return Err(Violation::ReservedBits);
    }

    let ack_sn = check_sn(ack, sn_bits)?;
    let mut nacks = Vec::with_capacity(raw_nacks.len());
    for (field, so) in raw_nacks {
        if field & NACK_RESERVED != 0 {
            return Err(Violation::ReservedBits);
        }
        let sn = check_sn(field & SN_FIELD_MASK, sn_bits)?;
        let so = match so {
            Some((start, end)) if end != SO_END_OF_SDU && start >= end => {
                return Err(Violation::InvalidNackRange { start, end });
            }
            Some((start, end)) => Some(SoRange { start, end }),
            None => None,
        };
        nacks.push(NackEntry { sn, so });
    }

    Ok(StatusPdu { ack_sn, nacks })
}
