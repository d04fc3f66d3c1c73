//! Protocol Stack Layers Library
//! 
//! This crate implements the Radio Link Control layer of the radio protocol
//! stack: the Acknowledged and Unacknowledged Mode engines that sit between
//! PDCP/RRC and MAC.

pub mod rlc;

use async_trait::async_trait;
use thiserror::Error;

pub use rlc::RlcError;

/// Common errors for protocol layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Layer not initialized")]
    NotInitialized,
    
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("RLC error: {0}")]
    Rlc(#[from] RlcError),
}

/// Common lifecycle trait for all protocol layers
#[async_trait]
pub trait ProtocolLayer: Send + Sync {
    /// Initialize the layer
    async fn initialize(&mut self) -> Result<(), LayerError>;
    
    /// Shutdown the layer
    async fn shutdown(&mut self) -> Result<(), LayerError>;
}
