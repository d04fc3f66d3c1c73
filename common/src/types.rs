//! Common Types for the radio link stack
//! 
//! Defines fundamental identifiers used throughout the protocol stack

use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical Channel Identity (LCID)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Lcid(pub u8);

impl Lcid {
    /// Highest LCID usable by a radio bearer
    pub const MAX: u8 = 32;

    /// Create a new LCID with validation
    pub fn new(value: u8) -> Option<Self> {
        if value <= Self::MAX {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Signalling radio bearers occupy LCID 0..=3
    pub fn is_srb(&self) -> bool {
        self.0 <= 3
    }
}

impl fmt::Display for Lcid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_srb() {
            write!(f, "SRB{}", self.0)
        } else {
            write!(f, "DRB{}", self.0 - 3)
        }
    }
}
