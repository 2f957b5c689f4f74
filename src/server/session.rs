//! Per-connection protocol session
//!
//! One session per accepted connection: a reader task decoding one
//! newline-delimited record at a time and dispatching it against the shared
//! directory, plus a writer task draining the connection's outbound channel
//! to the socket. Inbound records are processed strictly sequentially, so a
//! session never races with itself; cross-session effects all go through the
//! directory.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::codec;
use crate::protocol::messages::{ToClient, ToServer, MAIN_HALL};
use crate::server::identity::IdentityAllocator;
use crate::server::room_directory::{ConnId, IdentityChange, RoomDirectory};

/// Protocol state for one connection
pub struct Session {
    conn_id: ConnId,
    directory: Arc<RoomDirectory>,
    identities: Arc<IdentityAllocator>,
    outbound: mpsc::UnboundedSender<ToClient>,
}

impl Session {
    fn new(
        conn_id: ConnId,
        directory: Arc<RoomDirectory>,
        identities: Arc<IdentityAllocator>,
        outbound: mpsc::UnboundedSender<ToClient>,
    ) -> Self {
        Self {
            conn_id,
            directory,
            identities,
            outbound,
        }
    }

    /// Drive one connection from accept to cleanup.
    ///
    /// Handshake: allocate a guest identity, register with the directory,
    /// join the default room, then push the assigned identity, the room
    /// change, the default room's contents and the room list, giving the
    /// client a consistent initial view.
    pub async fn run(
        stream: TcpStream,
        directory: Arc<RoomDirectory>,
        identities: Arc<IdentityAllocator>,
    ) -> Result<()> {
        let peer_addr = stream.peer_addr()?;
        let (read_half, write_half) = stream.into_split();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(write_outbound(write_half, outbound_rx));

        let conn_id = Uuid::new_v4();
        let identity = identities.allocate();
        info!("connection from {peer_addr} assigned identity {identity}");

        directory
            .register(conn_id, identity.clone(), outbound.clone())
            .await;

        let session = Session::new(conn_id, directory, identities, outbound);
        session.handshake(&identity).await;
        session.read_loop(read_half).await;
        session.cleanup().await;

        // Dropping the session drops the last outbound sender; the writer
        // drains what is queued and exits.
        drop(session);
        let _ = writer.await;
        Ok(())
    }

    async fn handshake(&self, identity: &str) {
        self.directory.join_room(self.conn_id, MAIN_HALL).await;

        self.send(ToClient::NewIdentity {
            former: String::new(),
            identity: identity.to_string(),
        });
        self.send(ToClient::RoomChange {
            identity: identity.to_string(),
            former: String::new(),
            roomid: MAIN_HALL.to_string(),
        });
        self.send_room_contents(MAIN_HALL).await;
        self.send_room_list().await;
    }

    async fn read_loop(&self, read_half: OwnedReadHalf) {
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    debug!("connection {} closed by peer", self.conn_id);
                    break;
                }
                Ok(_) => {
                    let record = match codec::decode(&line) {
                        Ok(record) => record,
                        Err(e) => {
                            // Drop the bad record, keep the connection.
                            warn!("connection {}: dropping malformed record: {e}", self.conn_id);
                            continue;
                        }
                    };
                    if !self.dispatch(record).await {
                        break;
                    }
                }
                Err(e) => {
                    debug!("connection {} read error: {e}", self.conn_id);
                    break;
                }
            }
        }
    }

    /// Handle one inbound record. Returns false when the session should end.
    async fn dispatch(&self, record: ToServer) -> bool {
        match record {
            ToServer::IdentityChange { identity } => self.handle_identity_change(&identity).await,
            ToServer::Join { roomid } => self.handle_join(&roomid).await,
            ToServer::Who { roomid } => self.handle_who(&roomid).await,
            ToServer::List => self.send_room_list().await,
            ToServer::CreateRoom { roomid } => self.handle_create_room(&roomid).await,
            ToServer::Delete { roomid } => self.handle_delete(&roomid).await,
            ToServer::Message { content } => self.handle_message(content).await,
            ToServer::Quit => return false,
        }
        true
    }

    async fn handle_identity_change(&self, candidate: &str) {
        match self.directory.change_identity(self.conn_id, candidate).await {
            Some(IdentityChange::Accepted { former, room }) => {
                info!("identity {former} is now {candidate}");
                let notice = ToClient::NewIdentity {
                    former,
                    identity: candidate.to_string(),
                };
                match room {
                    // Everyone in the room learns the new name, requester
                    // included.
                    Some(room) => self.directory.broadcast(&room, notice, None).await,
                    None => self.send(notice),
                }
            }
            Some(IdentityChange::Rejected { current }) => {
                // former == identity signals "rejected, you keep the old one".
                self.send(ToClient::NewIdentity {
                    former: current.clone(),
                    identity: current,
                });
            }
            None => {}
        }
    }

    async fn handle_join(&self, roomid: &str) {
        let Some(outcome) = self.directory.join_room(self.conn_id, roomid).await else {
            return;
        };

        if outcome.joined {
            debug!("{} moved from '{}' to {roomid}", outcome.identity, outcome.former);
            self.directory
                .broadcast(
                    roomid,
                    ToClient::RoomChange {
                        identity: outcome.identity,
                        former: outcome.former,
                        roomid: roomid.to_string(),
                    },
                    None,
                )
                .await;

            if roomid == MAIN_HALL {
                self.send_room_contents(MAIN_HALL).await;
                self.send_room_list().await;
            }
        } else {
            // roomid == former signals the rejection.
            self.send(ToClient::RoomChange {
                identity: outcome.identity,
                former: outcome.former.clone(),
                roomid: outcome.former,
            });
        }
    }

    async fn handle_who(&self, roomid: &str) {
        if let Some((identities, owner)) = self.directory.list_members(roomid).await {
            if !identities.is_empty() {
                self.send(ToClient::RoomContents {
                    roomid: roomid.to_string(),
                    identities,
                    owner,
                });
            }
        }
    }

    async fn handle_create_room(&self, roomid: &str) {
        if self.directory.create_room(roomid, self.conn_id).await {
            info!("room {roomid} created");
            self.send_room_list().await;
        } else {
            // No explicit error code in this protocol: the refusal shows as
            // a listing with the requested id filtered out.
            let rooms = self
                .directory
                .list_rooms()
                .await
                .into_iter()
                .filter(|room| room.roomid != roomid)
                .collect();
            self.send(ToClient::RoomList { rooms });
        }
    }

    async fn handle_delete(&self, roomid: &str) {
        let Some(relocated) = self.directory.delete_room(roomid, self.conn_id).await else {
            // Non-owner or missing room: silent, no information leak.
            return;
        };

        info!("room {roomid} deleted, {} members relocated", relocated.len());
        for (member, identity) in relocated {
            self.directory
                .send_to(
                    member,
                    ToClient::RoomChange {
                        identity,
                        former: roomid.to_string(),
                        roomid: MAIN_HALL.to_string(),
                    },
                )
                .await;
        }
        self.send_room_list().await;
    }

    async fn handle_message(&self, content: String) {
        let Some((identity, room)) = self.directory.current_view(self.conn_id).await else {
            return;
        };
        if let Some(room) = room {
            self.directory
                .broadcast(
                    &room,
                    ToClient::Message { content, identity },
                    Some(self.conn_id),
                )
                .await;
        }
    }

    /// Disconnect cleanup: announce the departure to the current room, drop
    /// all directory state, return the guest number to the free pool.
    /// Runs exactly once even if quit and a transport error race: the
    /// second call finds no peer record and does nothing.
    async fn cleanup(&self) {
        let Some((identity, room)) = self.directory.current_view(self.conn_id).await else {
            return;
        };

        if let Some(room) = &room {
            self.directory
                .broadcast(
                    room,
                    ToClient::RoomChange {
                        identity: identity.clone(),
                        former: room.clone(),
                        roomid: String::new(),
                    },
                    None,
                )
                .await;
        }

        self.directory.unregister(self.conn_id).await;
        self.identities.release(&identity);
        info!("{identity} disconnected");
    }

    async fn send_room_contents(&self, roomid: &str) {
        if let Some((identities, owner)) = self.directory.list_members(roomid).await {
            self.send(ToClient::RoomContents {
                roomid: roomid.to_string(),
                identities,
                owner,
            });
        }
    }

    async fn send_room_list(&self) {
        let rooms = self.directory.list_rooms().await;
        self.send(ToClient::RoomList { rooms });
    }

    fn send(&self, message: ToClient) {
        let _ = self.outbound.send(message);
    }
}

/// Writer task: serialize outbound records to the socket, one line each.
/// Ends when the channel closes or the peer stops accepting writes.
async fn write_outbound(
    mut write_half: OwnedWriteHalf,
    mut outbound_rx: mpsc::UnboundedReceiver<ToClient>,
) {
    while let Some(message) = outbound_rx.recv().await {
        let line = match codec::encode(&message) {
            Ok(line) => line,
            Err(e) => {
                warn!("failed to encode outbound record: {e}");
                continue;
            }
        };
        if write_half.write_all(line.as_bytes()).await.is_err() {
            break;
        }
    }
}
