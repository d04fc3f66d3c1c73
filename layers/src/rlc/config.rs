//! RLC bearer configuration
//! 
//! Set when a bearer is added and immutable until the bearer is
//! reestablished or recreated. Timer values are in milliseconds.

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};

use super::RlcError;

/// SN field length in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SnFieldLength {
    Bits5 = 5,
    Bits10 = 10,
}

impl SnFieldLength {
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Size of the SN space
    pub fn modulus(self) -> u16 {
        1 << self.bits()
    }
}

impl TryFrom<u8> for SnFieldLength {
    type Error = String;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        SnFieldLength::from_u8(bits).ok_or_else(|| format!("unsupported SN field length: {} bits", bits))
    }
}

impl From<SnFieldLength> for u8 {
    fn from(len: SnFieldLength) -> u8 {
        len.bits()
    }
}

/// Acknowledged Mode parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AmConfig {
    /// SN field length (10 bits gives an SN space of 1024)
    pub sn_field_length: SnFieldLength,
    /// Retransmissions of one SN allowed before the bearer fails
    pub max_retx_thresh: u32,
    /// Poll after this many PDUs without a poll
    pub poll_pdu: u32,
    /// Poll after this many payload bytes without a poll
    pub poll_byte: u32,
    /// t-PollRetransmit
    pub t_poll_retx: u32,
    /// t-Reordering
    pub t_reordering: u32,
    /// t-StatusProhibit
    pub t_status_prohibit: u32,
    /// SDUs waiting for first transmission before enqueue is refused
    pub max_sdus: usize,
    /// Bytes waiting for first transmission before enqueue is refused
    pub max_bytes: usize,
}

impl Default for AmConfig {
    fn default() -> Self {
        Self {
            sn_field_length: SnFieldLength::Bits10,
            max_retx_thresh: 4,
            poll_pdu: 4,
            poll_byte: 25_000,
            t_poll_retx: 5,
            t_reordering: 5,
            t_status_prohibit: 5,
            max_sdus: 512,
            max_bytes: 1 << 20,
        }
    }
}

impl AmConfig {
    pub fn modulus(&self) -> u16 {
        self.sn_field_length.modulus()
    }

    /// AM window is half the SN space
    pub fn window_size(&self) -> u16 {
        self.modulus() / 2
    }

    pub fn validate(&self) -> Result<(), RlcError> {
        if self.max_retx_thresh == 0 {
            return Err(RlcError::InvalidConfiguration("max_retx_thresh must be at least 1".into()));
        }
        check_capacity(self.max_sdus, self.max_bytes)
    }
}

/// Unacknowledged Mode parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmConfig {
    /// SN field length used when sending
    pub tx_sn_field_length: SnFieldLength,
    /// SN field length expected when receiving
    pub rx_sn_field_length: SnFieldLength,
    /// Transmit SN modulus
    pub tx_mod: u16,
    /// Receive SN modulus
    pub rx_mod: u16,
    /// UM receive window
    pub rx_window_size: u16,
    /// t-Reordering
    pub t_reordering: u32,
    /// SDUs waiting for transmission before enqueue is refused
    pub max_sdus: usize,
    /// Bytes waiting for transmission before enqueue is refused
    pub max_bytes: usize,
}

impl Default for UmConfig {
    fn default() -> Self {
        Self {
            tx_sn_field_length: SnFieldLength::Bits5,
            rx_sn_field_length: SnFieldLength::Bits5,
            tx_mod: 32,
            rx_mod: 32,
            rx_window_size: 16,
            t_reordering: 5,
            max_sdus: 512,
            max_bytes: 1 << 20,
        }
    }
}

impl UmConfig {
    /// 10-bit SN variant
    pub fn with_10bit_sn() -> Self {
        Self {
            tx_sn_field_length: SnFieldLength::Bits10,
            rx_sn_field_length: SnFieldLength::Bits10,
            tx_mod: 1024,
            rx_mod: 1024,
            rx_window_size: 512,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), RlcError> {
        if self.tx_mod != self.tx_sn_field_length.modulus() {
            return Err(RlcError::InvalidConfiguration(format!(
                "tx_mod {} does not match a {}-bit SN",
                self.tx_mod,
                self.tx_sn_field_length.bits()
            )));
        }
        if self.rx_mod != self.rx_sn_field_length.modulus() {
            return Err(RlcError::InvalidConfiguration(format!(
                "rx_mod {} does not match a {}-bit SN",
                self.rx_mod,
                self.rx_sn_field_length.bits()
            )));
        }
        if self.rx_window_size == 0 || 2 * self.rx_window_size as u32 > self.rx_mod as u32 {
            return Err(RlcError::InvalidConfiguration(format!(
                "rx_window_size {} must be in [1, {}]",
                self.rx_window_size,
                self.rx_mod / 2
            )));
        }
        check_capacity(self.max_sdus, self.max_bytes)
    }
}

fn check_capacity(max_sdus: usize, max_bytes: usize) -> Result<(), RlcError> {
    if max_sdus == 0 || max_bytes == 0 {
        return Err(RlcError::InvalidConfiguration("SDU queue capacity must be non-zero".into()));
    }
    Ok(())
}

/// Bearer configuration, tagged by mode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum RlcConfig {
    #[serde(rename = "AM")]
    Am(AmConfig),
    #[serde(rename = "UM")]
    Um(UmConfig),
}

impl RlcConfig {
    pub fn default_am() -> Self {
        RlcConfig::Am(AmConfig::default())
    }

    pub fn default_um() -> Self {
        RlcConfig::Um(UmConfig::default())
    }

    pub fn mode(&self) -> super::RlcMode {
        match self {
            RlcConfig::Am(_) => super::RlcMode::Am,
            RlcConfig::Um(_) => super::RlcMode::Um,
        }
    }

    pub fn validate(&self) -> Result<(), RlcError> {
        match self {
            RlcConfig::Am(cfg) => cfg.validate(),
            RlcConfig::Um(cfg) => cfg.validate(),
        }
    }
}
