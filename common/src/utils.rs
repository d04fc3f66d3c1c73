//! Common Utilities
//! 
//! Provides utility functions used across the stack

/// Convert a byte slice to hex string for debugging
pub fn bytes_to_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Hex dump limited to the first `limit` bytes, used for PDU trace logs
pub fn bytes_to_hex_limited(data: &[u8], limit: usize) -> String {
    if data.len() <= limit {
        return bytes_to_hex(data);
    }
    format!("{} ... ({} bytes)", bytes_to_hex(&data[..limit]), data.len())
}
