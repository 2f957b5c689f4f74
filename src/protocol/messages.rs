//! Protocol message types for the chat system
//!
//! The closed set of records exchanged with clients, one JSON object per
//! newline-terminated line. Uses serde with an internal `type` tag so the
//! dispatcher can match exhaustively on a tagged union.

use serde::{Deserialize, Serialize};

/// The default room. Always exists, has no owner, is never deleted.
pub const MAIN_HALL: &str = "MainHall";

/// Prefix of auto-assigned guest identities (`guest1`, `guest2`, ...).
pub const GUEST_PREFIX: &str = "guest";

/// Minimum length for identities and room ids
pub const MIN_NAME_LEN: usize = 3;
/// Maximum identity length
pub const MAX_IDENTITY_LEN: usize = 16;
/// Maximum room id length
pub const MAX_ROOM_LEN: usize = 32;

/// Check the shared charset/length rule: ASCII alphanumeric only,
/// between [`MIN_NAME_LEN`] and `max` characters.
pub fn is_valid_name(name: &str, max: usize) -> bool {
    name.len() >= MIN_NAME_LEN
        && name.len() <= max
        && name.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Charset/length rule for identities (3-16 chars)
pub fn is_valid_identity_name(name: &str) -> bool {
    is_valid_name(name, MAX_IDENTITY_LEN)
}

/// Charset/length rule for room ids (3-32 chars)
pub fn is_valid_room_name(name: &str) -> bool {
    is_valid_name(name, MAX_ROOM_LEN)
}

// =============================================================================
// Client -> Server
// =============================================================================

/// Records a client may send to the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToServer {
    /// Request a new identity
    #[serde(rename = "identitychange")]
    IdentityChange {
        /// Requested identity
        identity: String,
    },

    /// Move to another room
    #[serde(rename = "join")]
    Join {
        /// Target room id
        roomid: String,
    },

    /// Ask for the contents of a room
    #[serde(rename = "who")]
    Who {
        /// Room id to inspect
        roomid: String,
    },

    /// Ask for the room listing
    #[serde(rename = "list")]
    List,

    /// Create a new room owned by the requester
    #[serde(rename = "createroom")]
    CreateRoom {
        /// Requested room id
        roomid: String,
    },

    /// Delete a room (owner only)
    #[serde(rename = "delete")]
    Delete {
        /// Room id to delete
        roomid: String,
    },

    /// Graceful disconnect
    #[serde(rename = "quit")]
    Quit,

    /// Chat text for the current room
    #[serde(rename = "message")]
    Message {
        /// Message body
        content: String,
    },
}

// =============================================================================
// Server -> Client
// =============================================================================

/// Records the server may push to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ToClient {
    /// Identity assignment or change; `former` is empty on the initial
    /// assignment, and `former == identity` signals a rejected change
    #[serde(rename = "newidentity")]
    NewIdentity {
        /// Previous identity ("" on first assignment)
        former: String,
        /// Current identity
        identity: String,
    },

    /// Room membership change; `roomid` empty signals departure with no
    /// new room, and `roomid == former` signals a rejected join
    #[serde(rename = "roomchange")]
    RoomChange {
        /// Identity that moved
        identity: String,
        /// Room left ("" when joining for the first time)
        former: String,
        /// Room entered ("" on disconnect)
        roomid: String,
    },

    /// Snapshot of one room's members
    #[serde(rename = "roomcontents")]
    RoomContents {
        /// Room id
        roomid: String,
        /// Identities of all current members
        identities: Vec<String>,
        /// Owner identity ("" = unowned)
        owner: String,
    },

    /// Listing of all rooms with member counts
    #[serde(rename = "roomlist")]
    RoomList {
        /// One entry per existing room
        rooms: Vec<RoomSummary>,
    },

    /// Chat text relayed to a room
    #[serde(rename = "message")]
    Message {
        /// Message body
        content: String,
        /// Identity of the sender
        identity: String,
    },
}

/// One room in a `roomlist` record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    /// Room id
    pub roomid: String,
    /// Current member count
    pub count: usize,
}
