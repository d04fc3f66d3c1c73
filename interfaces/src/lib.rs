//! Layer Boundary Interfaces Library
//! 
//! This crate defines the service interfaces between RLC and its neighbours:
//! PDCP/RRC above and MAC below.

pub mod rlc;

use common::Lcid;
use thiserror::Error;

/// Interface errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("Unknown logical channel {0}")]
    UnknownChannel(Lcid),

    #[error("Logical channel {0} has failed")]
    ChannelFailed(Lcid),

    #[error("Interface not initialized")]
    NotInitialized,
    
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    
    #[error("Buffer full")]
    BufferFull,

    #[error("SDU rejected: {0}")]
    Rejected(String),
}
