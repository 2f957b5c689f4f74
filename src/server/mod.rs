//! Server-side connection and room-management engine
//!
//! This module provides:
//! - The guest identity allocator
//! - The room directory (membership, ownership, broadcast)
//! - The per-connection protocol session
//! - The TCP listener tying them together

pub mod identity;
pub mod listener;
pub mod room_directory;
pub mod session;

// Re-export commonly used types
pub use identity::IdentityAllocator;
pub use listener::{ChatServer, ServerConfig};
pub use room_directory::{ConnId, RoomDirectory};
pub use session::Session;
