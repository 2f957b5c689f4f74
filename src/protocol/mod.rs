//! Protocol layer for the chat server
//!
//! This module provides:
//! - Wire message type definitions (tagged unions for both directions)
//! - The newline-delimited JSON line codec
//! - Name validation rules shared by identities and room ids

pub mod codec;
pub mod messages;

// Re-export commonly used types
pub use codec::{decode, encode};
pub use messages::{
    is_valid_identity_name, is_valid_name, is_valid_room_name, RoomSummary, ToClient, ToServer,
    GUEST_PREFIX, MAIN_HALL, MAX_IDENTITY_LEN, MAX_ROOM_LEN, MIN_NAME_LEN,
};
