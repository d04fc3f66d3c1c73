//! SDU segmentation and reassembly
//! 
//! [`next_segment`] cuts the next slice of an SDU to fit a MAC opportunity,
//! header included; both transmitters build every data PDU with it. [`reassemble`] puts byte ranges back together and only yields the
//! SDU once the ranges tile `[0, len)` exactly. [`SegmentAssembler`] is the
//! incremental form used by the receivers: it trims retransmitted bytes it
//! already holds, so the ranges it keeps never overlap.

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

use super::error::Violation;
use super::pdu::{SegmentInfo, SoRange, SO_END_OF_SDU};

/// One slice of an SDU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Byte offset within the SDU
    pub offset: usize,
    /// Segment payload
    pub data: Bytes,
    /// Set on the segment that ends the SDU
    pub last: bool,
}

impl Segment {
    pub fn end(&self) -> usize {
        self.offset + self.data.len()
    }

    pub fn si(&self) -> SegmentInfo {
        SegmentInfo::from_position(self.offset == 0, self.last)
    }
}

/// Result of a reassembly attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembly {
    /// All bytes present
    Complete(Bytes),
    /// Still waiting for segments
    Incomplete,
}

/// Next segment of `sdu` starting at `start` and ending no later than `end`,
/// sized so that its data PDU fits `max_size` bytes. `None` when not even
/// one payload byte fits or the range is empty.
pub fn next_segment(sdu: &Bytes, start: usize, end: usize, max_size: usize) -> Option<Segment> {
    let end = end.min(sdu.len());
    let header_len = SegmentInfo::from_position(start == 0, false).header_len();
    if start >= end || max_size <= header_len {
        return None;
    }

    let stop = end.min(start + max_size - header_len);
    Some(Segment {
        offset: start,
        data: sdu.slice(start..stop),
        last: stop == sdu.len(),
    })
}

/// Slice a whole SDU into segments whose data PDUs fit `max_size` bytes.
/// Empty if `max_size` leaves no room for payload after a segment header.
pub fn segment(sdu: &Bytes, max_size: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut offset = 0;
    while offset < sdu.len() {
        let Some(seg) = next_segment(sdu, offset, sdu.len(), max_size) else {
            return Vec::new();
        };
        offset = seg.end();
        segments.push(seg);
    }
    segments
}

/// Rebuild an SDU from segments given in any order
pub fn reassemble(segments: &[Segment]) -> Result<Reassembly, Violation> {
    let mut sorted: Vec<&Segment> = segments.iter().collect();
    sorted.sort_by_key(|s| s.offset);

    let sdu_len = sorted.iter().find(|s| s.last).map(|s| s.end());
    let mut expected = 0;
    let mut gap = false;

    for seg in &sorted {
        if seg.offset < expected {
            return Err(Violation::OverlappingSegment { offset: seg.offset, end: seg.end() });
        }
        if let Some(len) = sdu_len {
            if seg.end() > len {
                return Err(Violation::SegmentBeyondEnd {
                    offset: seg.offset,
                    end: seg.end(),
                    sdu_len: len,
                });
            }
        }
        gap |= seg.offset > expected;
        expected = seg.end();
    }

    match sdu_len {
        Some(len) if !gap && expected == len => Ok(Reassembly::Complete(concat(&sorted))),
        _ => Ok(Reassembly::Incomplete),
    }
}

fn concat(sorted: &[&Segment]) -> Bytes {
    if let [single] = sorted {
        return single.data.clone();
    }
    let total = sorted.iter().map(|s| s.data.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for seg in sorted {
        buf.put_slice(&seg.data);
    }
    buf.freeze()
}

/// What happened to a segment handed to the assembler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// At least one new byte was stored
    Stored,
    /// Every byte was already present
    Duplicate,
}

/// Incremental reassembly buffer for one SN
#[derive(Debug, Default)]
pub struct SegmentAssembler {
    /// Disjoint byte ranges keyed by offset
    segments: BTreeMap<usize, Bytes>,
    /// SDU length, known once the last segment arrived
    sdu_len: Option<usize>,
    received: usize,
}

impl SegmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the bytes `[offset, offset + data.len())`
    pub fn insert(&mut self, offset: usize, data: Bytes, last: bool) -> Result<InsertOutcome, Violation> {
        let end = offset + data.len();

        if last {
            if let Some(previous) = self.sdu_len {
                if previous != end {
                    return Err(Violation::ConflictingEnd { end, previous });
                }
            }
            if let Some(highest) = self.highest_end() {
                if highest > end {
                    return Err(Violation::ConflictingEnd { end, previous: highest });
                }
            }
        } else if let Some(sdu_len) = self.sdu_len {
            if end > sdu_len {
                return Err(Violation::SegmentBeyondEnd { offset, end, sdu_len });
            }
        }

        let pieces = self.uncovered(offset, end);
        if last {
            self.sdu_len = Some(end);
        }
        if pieces.is_empty() {
            return Ok(InsertOutcome::Duplicate);
        }

        for (start, stop) in pieces {
            self.received += stop - start;
            self.segments.insert(start, data.slice(start - offset..stop - offset));
        }
        Ok(InsertOutcome::Stored)
    }

    /// Sub-ranges of `[start, end)` not yet held
    fn uncovered(&self, start: usize, end: usize) -> Vec<(usize, usize)> {
        let mut pieces = Vec::new();
        let mut cursor = start;
        for (&offset, data) in self.segments.range(..end) {
            let seg_end = offset + data.len();
            if seg_end <= cursor {
                continue;
            }
            if offset > cursor {
                pieces.push((cursor, offset));
            }
            cursor = cursor.max(seg_end);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            pieces.push((cursor, end));
        }
        pieces
    }

    fn highest_end(&self) -> Option<usize> {
        self.segments
            .iter()
            .next_back()
            .map(|(offset, data)| offset + data.len())
    }

    pub fn is_complete(&self) -> bool {
        self.sdu_len == Some(self.received)
    }

    /// Bytes received so far
    pub fn received_bytes(&self) -> usize {
        self.received
    }

    /// Rebuild the SDU if every byte is present
    pub fn assemble(&self) -> Result<Reassembly, Violation> {
        let segments: Vec<Segment> = self
            .segments
            .iter()
            .map(|(&offset, data)| Segment {
                offset,
                data: data.clone(),
                last: Some(offset + data.len()) == self.sdu_len,
            })
            .collect();
        reassemble(&segments)
    }

    /// Byte ranges still missing. An open-ended gap runs to `SO_END_OF_SDU`.
    pub fn missing(&self) -> Vec<SoRange> {
        let mut gaps = Vec::new();
        let mut cursor = 0;
        for (&offset, data) in &self.segments {
            if offset > cursor {
                gaps.push(SoRange { start: cursor as u16, end: offset as u16 });
            }
            cursor = offset + data.len();
        }
        match self.sdu_len {
            Some(len) if cursor < len => gaps.push(SoRange { start: cursor as u16, end: len as u16 }),
            Some(_) => {}
            None => gaps.push(SoRange { start: cursor as u16, end: SO_END_OF_SDU }),
        }
        gaps
    }
}
