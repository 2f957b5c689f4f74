//! Room directory for the chat server
//!
//! Owns all shared mutable state: the room map (members and owners) and the
//! peer table (identity, current room, outbound channel per connection).
//! Every read-modify-write runs under one mutex, so concurrent sessions see
//! each operation atomically. Nothing here touches a socket: deliveries are
//! non-blocking sends into each peer's outbound channel, performed after the
//! critical section with a membership snapshot captured inside it, so a slow
//! client can never stall the directory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::protocol::messages::{is_valid_room_name, RoomSummary, ToClient, MAIN_HALL};
use crate::server::identity::{guest_number, IdentityAllocator};

/// Connection id keying the peer table. Never exposed on the wire.
pub type ConnId = Uuid;

/// Outbound channel handing records to a connection's writer task
pub type OutboundSender = mpsc::UnboundedSender<ToClient>;

/// A chat room: member connections plus an optional owner
#[derive(Debug, Default)]
struct Room {
    /// Owner identity ("" = unowned)
    owner: String,
    /// Member connections in join order
    members: Vec<ConnId>,
}

/// Directory-side record of one live connection
struct Peer {
    /// Current identity (unique among live peers)
    identity: String,
    /// Current room; None only during the handshake window
    room: Option<String>,
    /// Outbound delivery channel
    sender: OutboundSender,
}

struct DirectoryState {
    /// All rooms by id; BTreeMap keeps listings deterministic
    rooms: BTreeMap<String, Room>,
    /// All live connections
    peers: HashMap<ConnId, Peer>,
}

/// Result of a join attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// Identity of the moving connection
    pub identity: String,
    /// Room left ("" if the connection had none yet)
    pub former: String,
    /// Whether the move happened
    pub joined: bool,
}

/// Result of an identity change attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityChange {
    /// Identity updated; owner records were renamed along with it
    Accepted {
        /// The identity given up
        former: String,
        /// The room to announce the change in
        room: Option<String>,
    },
    /// Candidate failed validation; state unchanged
    Rejected {
        /// The identity the connection keeps
        current: String,
    },
}

/// Shared room/peer state, the single source of truth for membership
pub struct RoomDirectory {
    state: Mutex<DirectoryState>,
    identities: Arc<IdentityAllocator>,
}

impl RoomDirectory {
    /// Create a directory seeded with the default room
    pub fn new(identities: Arc<IdentityAllocator>) -> Self {
        let mut rooms = BTreeMap::new();
        rooms.insert(MAIN_HALL.to_string(), Room::default());

        Self {
            state: Mutex::new(DirectoryState {
                rooms,
                peers: HashMap::new(),
            }),
            identities,
        }
    }

    /// Register a new connection. It belongs to no room until the first join.
    pub async fn register(&self, conn_id: ConnId, identity: String, sender: OutboundSender) {
        let mut state = self.state.lock().await;
        state.peers.insert(
            conn_id,
            Peer {
                identity,
                room: None,
                sender,
            },
        );
    }

    /// Remove a connection and everything it held: its room membership, and
    /// ownership of any rooms (owner cleared to "", the room deleted if it
    /// is now empty and not the default room). Idempotent.
    pub async fn unregister(&self, conn_id: ConnId) {
        let mut state = self.state.lock().await;
        let Some(peer) = state.peers.remove(&conn_id) else {
            return;
        };

        if let Some(room_id) = &peer.room {
            if let Some(room) = state.rooms.get_mut(room_id) {
                room.members.retain(|id| *id != conn_id);
            }
        }

        let mut emptied = Vec::new();
        for (room_id, room) in &mut state.rooms {
            if room.owner == peer.identity {
                room.owner.clear();
                if room.members.is_empty() && room_id != MAIN_HALL {
                    emptied.push(room_id.clone());
                }
            }
        }
        for room_id in emptied {
            state.rooms.remove(&room_id);
        }
    }

    /// Current identity and room of a connection
    pub async fn current_view(&self, conn_id: ConnId) -> Option<(String, Option<String>)> {
        let state = self.state.lock().await;
        state
            .peers
            .get(&conn_id)
            .map(|peer| (peer.identity.clone(), peer.room.clone()))
    }

    /// True iff `candidate` satisfies the room charset/length rule and no
    /// room with that id exists
    pub async fn is_valid_room_id(&self, candidate: &str) -> bool {
        let state = self.state.lock().await;
        is_valid_room_name(candidate) && !state.rooms.contains_key(candidate)
    }

    /// Create an empty room owned by the requesting connection's identity.
    ///
    /// Validation and insertion happen under one lock, so a creation race
    /// between two sessions resolves to exactly one room.
    pub async fn create_room(&self, room_id: &str, conn_id: ConnId) -> bool {
        let mut state = self.state.lock().await;
        let Some(owner) = state.peers.get(&conn_id).map(|p| p.identity.clone()) else {
            return false;
        };
        if !is_valid_room_name(room_id) || state.rooms.contains_key(room_id) {
            return false;
        }
        state.rooms.insert(
            room_id.to_string(),
            Room {
                owner,
                members: Vec::new(),
            },
        );
        true
    }

    /// Delete a room if the requester owns it, relocating every member to
    /// the default room atomically. Returns the relocated members (and their
    /// identities) so the caller can emit one notice per member, or None for
    /// a non-owner or missing room.
    pub async fn delete_room(
        &self,
        room_id: &str,
        conn_id: ConnId,
    ) -> Option<Vec<(ConnId, String)>> {
        let mut state = self.state.lock().await;
        let state = &mut *state;

        let requester = state.peers.get(&conn_id).map(|p| p.identity.clone())?;
        if state.rooms.get(room_id)?.owner != requester {
            return None;
        }

        let room = state.rooms.remove(room_id)?;
        let mut relocated = Vec::with_capacity(room.members.len());
        for member in room.members {
            let Some(peer) = state.peers.get_mut(&member) else {
                continue;
            };
            peer.room = Some(MAIN_HALL.to_string());
            relocated.push((member, peer.identity.clone()));
            if let Some(main_hall) = state.rooms.get_mut(MAIN_HALL) {
                main_hall.members.push(member);
            }
        }
        Some(relocated)
    }

    /// Move a connection into a room.
    ///
    /// On success the connection leaves its previous room and enters the
    /// target in one critical section: it is never in two rooms, and in zero
    /// only inside this call. Joining a missing room changes nothing.
    /// Returns None for an unknown connection.
    pub async fn join_room(&self, conn_id: ConnId, room_id: &str) -> Option<JoinOutcome> {
        let mut state = self.state.lock().await;

        let peer = state.peers.get(&conn_id)?;
        let identity = peer.identity.clone();
        let former = peer.room.clone().unwrap_or_default();

        if !state.rooms.contains_key(room_id) {
            return Some(JoinOutcome {
                identity,
                former,
                joined: false,
            });
        }

        if !former.is_empty() {
            if let Some(previous) = state.rooms.get_mut(&former) {
                previous.members.retain(|id| *id != conn_id);
            }
        }
        if let Some(room) = state.rooms.get_mut(room_id) {
            room.members.push(conn_id);
        }
        if let Some(peer) = state.peers.get_mut(&conn_id) {
            peer.room = Some(room_id.to_string());
        }

        Some(JoinOutcome {
            identity,
            former,
            joined: true,
        })
    }

    /// One consistent snapshot of every room and its member count
    pub async fn list_rooms(&self) -> Vec<RoomSummary> {
        let state = self.state.lock().await;
        state
            .rooms
            .iter()
            .map(|(room_id, room)| RoomSummary {
                roomid: room_id.clone(),
                count: room.members.len(),
            })
            .collect()
    }

    /// Member identities and owner of a room, or None if the room does not
    /// exist (distinguishable from an existing-but-empty room)
    pub async fn list_members(&self, room_id: &str) -> Option<(Vec<String>, String)> {
        let state = self.state.lock().await;
        let room = state.rooms.get(room_id)?;
        let identities = room
            .members
            .iter()
            .filter_map(|id| state.peers.get(id).map(|p| p.identity.clone()))
            .collect();
        Some((identities, room.owner.clone()))
    }

    /// Deliver a record to every member of a room except `exclude`.
    ///
    /// The member snapshot is captured under the lock; delivery happens
    /// after it is released. Members whose session is concurrently shutting
    /// down are skipped silently.
    pub async fn broadcast(&self, room_id: &str, message: ToClient, exclude: Option<ConnId>) {
        let recipients: Vec<OutboundSender> = {
            let state = self.state.lock().await;
            let Some(room) = state.rooms.get(room_id) else {
                return;
            };
            room.members
                .iter()
                .filter(|id| Some(**id) != exclude)
                .filter_map(|id| state.peers.get(id).map(|p| p.sender.clone()))
                .collect()
        };

        for sender in recipients {
            let _ = sender.send(message.clone());
        }
    }

    /// Deliver a record to a single connection; no-op if it is gone
    pub async fn send_to(&self, conn_id: ConnId, message: ToClient) {
        let sender = {
            let state = self.state.lock().await;
            state.peers.get(&conn_id).map(|p| p.sender.clone())
        };
        if let Some(sender) = sender {
            let _ = sender.send(message);
        }
    }

    /// Attempt to change a connection's identity.
    ///
    /// The whole read-modify-write runs under the directory lock: validation
    /// against live identities, the guest-slot claim for `guest<N>`-shaped
    /// names, the rename of owner records, and the release of the former
    /// guest number. Rejection leaves every piece of state untouched.
    pub async fn change_identity(&self, conn_id: ConnId, candidate: &str) -> Option<IdentityChange> {
        let mut state = self.state.lock().await;

        let current = state.peers.get(&conn_id)?.identity.clone();
        let live: HashSet<String> = state.peers.values().map(|p| p.identity.clone()).collect();

        if !self.identities.is_valid_identity(candidate, &live) {
            return Some(IdentityChange::Rejected { current });
        }
        if let Some(number) = guest_number(candidate) {
            // The decisive atomic claim; a concurrent allocation of the same
            // number makes this lose, not collide.
            if !self.identities.try_claim(number) {
                return Some(IdentityChange::Rejected { current });
            }
        }

        let room = state.peers.get(&conn_id).and_then(|p| p.room.clone());
        if let Some(peer) = state.peers.get_mut(&conn_id) {
            peer.identity = candidate.to_string();
        }
        for owned in state.rooms.values_mut() {
            if owned.owner == current {
                owned.owner = candidate.to_string();
            }
        }
        self.identities.release(&current);

        Some(IdentityChange::Accepted {
            former: current,
            room,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn directory() -> RoomDirectory {
        RoomDirectory::new(Arc::new(IdentityAllocator::new()))
    }

    async fn register_peer(
        directory: &RoomDirectory,
        identity: &str,
    ) -> (ConnId, UnboundedReceiver<ToClient>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        directory.register(conn_id, identity.to_string(), tx).await;
        (conn_id, rx)
    }

    #[tokio::test]
    async fn test_default_room_exists_unowned() {
        let directory = directory();
        let rooms = directory.list_rooms().await;
        assert_eq!(
            rooms,
            vec![RoomSummary {
                roomid: MAIN_HALL.to_string(),
                count: 0
            }]
        );
        let (members, owner) = directory.list_members(MAIN_HALL).await.unwrap();
        assert!(members.is_empty());
        assert_eq!(owner, "");
    }

    #[tokio::test]
    async fn test_join_moves_between_rooms() {
        let directory = directory();
        let (alice, _rx) = register_peer(&directory, "alice").await;

        let outcome = directory.join_room(alice, MAIN_HALL).await.unwrap();
        assert!(outcome.joined);
        assert_eq!(outcome.former, "");

        assert!(directory.create_room("chess", alice).await);
        let outcome = directory.join_room(alice, "chess").await.unwrap();
        assert!(outcome.joined);
        assert_eq!(outcome.former, MAIN_HALL);

        // Exactly one membership at any time.
        let (main_hall, _) = directory.list_members(MAIN_HALL).await.unwrap();
        let (chess, _) = directory.list_members("chess").await.unwrap();
        assert!(main_hall.is_empty());
        assert_eq!(chess, vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_join_missing_room_changes_nothing() {
        let directory = directory();
        let (alice, _rx) = register_peer(&directory, "alice").await;
        directory.join_room(alice, MAIN_HALL).await;

        let outcome = directory.join_room(alice, "nowhere").await.unwrap();
        assert!(!outcome.joined);
        assert_eq!(outcome.former, MAIN_HALL);

        let (identity, room) = directory.current_view(alice).await.unwrap();
        assert_eq!(identity, "alice");
        assert_eq!(room.as_deref(), Some(MAIN_HALL));
    }

    #[tokio::test]
    async fn test_create_room_validation_and_ownership() {
        let directory = directory();
        let (alice, _rx) = register_peer(&directory, "alice").await;

        assert!(directory.is_valid_room_id("chess").await);
        assert!(directory.create_room("chess", alice).await);
        let (_, owner) = directory.list_members("chess").await.unwrap();
        assert_eq!(owner, "alice");

        // The new room shows up immediately, empty.
        let rooms = directory.list_rooms().await;
        assert!(rooms.contains(&RoomSummary {
            roomid: "chess".to_string(),
            count: 0
        }));

        // Duplicate, bad charset, bad length, existing default room.
        assert!(!directory.create_room("chess", alice).await);
        assert!(!directory.create_room("ch ess", alice).await);
        assert!(!directory.create_room("ab", alice).await);
        assert!(!directory.create_room(MAIN_HALL, alice).await);

        let rooms = directory.list_rooms().await;
        assert_eq!(rooms.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_room_relocates_members() {
        let directory = directory();
        let (owner, _rx1) = register_peer(&directory, "alice").await;
        let (member, _rx2) = register_peer(&directory, "bob").await;
        directory.join_room(owner, MAIN_HALL).await;
        directory.join_room(member, MAIN_HALL).await;

        directory.create_room("chess", owner).await;
        directory.join_room(owner, "chess").await;
        directory.join_room(member, "chess").await;

        let relocated = directory.delete_room("chess", owner).await.unwrap();
        let identities: Vec<&str> = relocated.iter().map(|(_, id)| id.as_str()).collect();
        assert_eq!(identities, vec!["alice", "bob"]);

        assert!(directory.list_members("chess").await.is_none());
        let (main_hall, _) = directory.list_members(MAIN_HALL).await.unwrap();
        assert_eq!(main_hall.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_room_requires_owner() {
        let directory = directory();
        let (owner, _rx1) = register_peer(&directory, "alice").await;
        let (other, _rx2) = register_peer(&directory, "bob").await;
        directory.create_room("chess", owner).await;

        assert!(directory.delete_room("chess", other).await.is_none());
        assert!(directory.delete_room("nowhere", other).await.is_none());
        assert!(directory.list_members("chess").await.is_some());
    }

    #[tokio::test]
    async fn test_unregister_clears_ownership_and_empty_rooms() {
        let directory = directory();
        let (alice, _rx1) = register_peer(&directory, "alice").await;
        let (bob, _rx2) = register_peer(&directory, "bob").await;
        directory.join_room(alice, MAIN_HALL).await;
        directory.join_room(bob, MAIN_HALL).await;

        // alice owns two rooms; bob sits in one of them.
        directory.create_room("chess", alice).await;
        directory.create_room("poker", alice).await;
        directory.join_room(bob, "poker").await;

        directory.unregister(alice).await;

        // Empty owned room is gone; occupied one survives, unowned.
        assert!(directory.list_members("chess").await.is_none());
        let (_, owner) = directory.list_members("poker").await.unwrap();
        assert_eq!(owner, "");

        // Idempotent.
        directory.unregister(alice).await;
        assert!(directory.current_view(alice).await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_never_deletes_default_room() {
        let directory = directory();
        let (alice, _rx) = register_peer(&directory, "alice").await;
        directory.join_room(alice, MAIN_HALL).await;
        directory.unregister(alice).await;

        let rooms = directory.list_rooms().await;
        assert_eq!(rooms[0].roomid, MAIN_HALL);
        assert_eq!(rooms[0].count, 0);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_and_skips_dead_receivers() {
        let directory = directory();
        let (alice, mut rx_alice) = register_peer(&directory, "alice").await;
        let (bob, mut rx_bob) = register_peer(&directory, "bob").await;
        let (carol, rx_carol) = register_peer(&directory, "carol").await;
        for id in [alice, bob, carol] {
            directory.join_room(id, MAIN_HALL).await;
        }

        // carol's writer task is gone.
        drop(rx_carol);

        let message = ToClient::Message {
            content: "hello".to_string(),
            identity: "alice".to_string(),
        };
        directory
            .broadcast(MAIN_HALL, message.clone(), Some(alice))
            .await;

        assert_eq!(rx_bob.try_recv().unwrap(), message);
        assert!(rx_alice.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_change_identity_renames_owner_records() {
        let directory = directory();
        let (alice, _rx) = register_peer(&directory, "guest1").await;
        directory.join_room(alice, MAIN_HALL).await;
        directory.create_room("chess", alice).await;

        let change = directory.change_identity(alice, "alice").await.unwrap();
        assert_eq!(
            change,
            IdentityChange::Accepted {
                former: "guest1".to_string(),
                room: Some(MAIN_HALL.to_string()),
            }
        );

        let (_, owner) = directory.list_members("chess").await.unwrap();
        assert_eq!(owner, "alice");
    }

    #[tokio::test]
    async fn test_change_identity_rejects_collision_and_bad_names() {
        let directory = directory();
        let (alice, _rx1) = register_peer(&directory, "alice").await;
        let (_bob, _rx2) = register_peer(&directory, "bob").await;

        for candidate in ["bob", "alice", "ab", "a b"] {
            let change = directory.change_identity(alice, candidate).await.unwrap();
            assert_eq!(
                change,
                IdentityChange::Rejected {
                    current: "alice".to_string()
                },
                "candidate {candidate} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_change_identity_guest_slot_rules() {
        let allocator = Arc::new(IdentityAllocator::new());
        let directory = RoomDirectory::new(Arc::clone(&allocator));

        let guest1 = allocator.allocate();
        assert_eq!(guest1, "guest1");
        let (conn, _rx) = register_peer(&directory, &guest1).await;

        // Claiming an unused guestN string as a custom identity marks N used.
        let change = directory.change_identity(conn, "guest5").await.unwrap();
        assert!(matches!(change, IdentityChange::Accepted { .. }));
        assert!(!allocator.try_claim(5));

        // The former guest number went back to the free pool.
        assert_eq!(allocator.allocate(), "guest1");

        // A slot in use by another connection cannot be claimed.
        let (other, _rx2) = register_peer(&directory, "bob").await;
        let change = directory.change_identity(other, "guest5").await.unwrap();
        assert_eq!(
            change,
            IdentityChange::Rejected {
                current: "bob".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_list_rooms_is_a_consistent_snapshot() {
        let directory = directory();
        let (alice, _rx) = register_peer(&directory, "alice").await;
        directory.join_room(alice, MAIN_HALL).await;
        directory.create_room("chess", alice).await;

        let first = directory.list_rooms().await;
        let second = directory.list_rooms().await;
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);

        directory.join_room(alice, "chess").await;
        let rooms = directory.list_rooms().await;
        assert_eq!(
            rooms.iter().find(|r| r.roomid == "chess").unwrap().count,
            1
        );
    }
}
