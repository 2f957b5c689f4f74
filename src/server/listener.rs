//! TCP listener for the chat server
//!
//! Binds the configured address, accepts connections, and spawns one session
//! task per connection. The directory and the guest identity allocator are
//! created here and shared with every session.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::server::identity::IdentityAllocator;
use crate::server::room_directory::RoomDirectory;
use crate::server::session::Session;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:4444".parse().unwrap(),
        }
    }
}

/// The chat server: accept loop plus the shared room state
pub struct ChatServer {
    listener: TcpListener,
    directory: Arc<RoomDirectory>,
    identities: Arc<IdentityAllocator>,
}

impl ChatServer {
    /// Bind the listening socket and set up the shared state
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        info!("server listening on {}", listener.local_addr()?);

        let identities = Arc::new(IdentityAllocator::new());
        let directory = Arc::new(RoomDirectory::new(Arc::clone(&identities)));

        Ok(Self {
            listener,
            directory,
            identities,
        })
    }

    /// The bound address (useful when binding port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections forever, one session task each.
    ///
    /// A failure on one connection never affects another; accept errors are
    /// logged and the loop keeps going.
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("accepted connection from {addr}");
                    let directory = Arc::clone(&self.directory);
                    let identities = Arc::clone(&self.identities);
                    tokio::spawn(async move {
                        if let Err(e) = Session::run(stream, directory, identities).await {
                            warn!("connection from {addr} ended with error: {e}");
                        }
                    });
                }
                Err(e) => {
                    error!("accept failed: {e}");
                }
            }
        }
    }
}
