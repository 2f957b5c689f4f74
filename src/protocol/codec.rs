//! Line codec for the chat protocol
//!
//! Each record is one self-contained JSON object, UTF-8, newline-terminated.
//! This module is the only place wire bytes are turned into protocol values
//! and back, so the rest of the server works on decoded records.

use crate::error::{ChatError, Result};
use crate::protocol::messages::{ToClient, ToServer};

/// Encode an outbound record as one newline-terminated JSON line.
pub fn encode(message: &ToClient) -> Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Decode one inbound line into a record.
///
/// The trailing newline (and a carriage return, for clients that send
/// `\r\n`) is stripped before parsing.
pub fn decode(line: &str) -> Result<ToServer> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.is_empty() {
        return Err(ChatError::InvalidMessage("empty record".to_string()));
    }
    Ok(serde_json::from_str(line)?)
}
