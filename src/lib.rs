//! Multi-room TCP chat server
//!
//! Clients connect over TCP, receive an auto-assigned guest identity, and
//! exchange newline-delimited JSON records to chat, change identity, and
//! join, create, list or delete rooms. The default room `MainHall` always
//! exists; every connection is a member of exactly one room.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::{ChatError, Result};
pub use server::{ChatServer, ServerConfig};
