//! Client-side session over one server connection
//!
//! Thin wrapper around [`shared::Connection`] in pull mode: connect, send a
//! login, then poll for inbound packets. All I/O failure shows up as
//! `is_alive` turning false; the session never raises transport errors to
//! its caller after connect.

use log::info;
use shared::{ChatPacket, Connection, LoginPacket, Packet, PacketRegistry, PingPacket};
use std::io;
use std::sync::Arc;
use tokio::net::TcpStream;

pub struct Session {
    connection: Connection,
    username: String,
}

impl Session {
    /// Connects to the server and immediately presents credentials.
    pub async fn connect(
        server_addr: &str,
        registry: Arc<PacketRegistry>,
        username: impl Into<String>,
    ) -> io::Result<Self> {
        let username = username.into();
        let stream = TcpStream::connect(server_addr).await?;
        info!("connected to {}", server_addr);

        let connection = Connection::start(stream, registry, None)?;
        let session = Self {
            connection,
            username,
        };
        session.login();
        Ok(session)
    }

    fn login(&self) {
        let packet = LoginPacket {
            username: self.username.clone(),
            password: String::new(),
        };
        self.connection.write_packet(&packet);
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn is_alive(&self) -> bool {
        self.connection.is_alive()
    }

    /// Queues a chat line for sending. The server stamps the sender id, so
    /// the local username only matters for login.
    pub fn send_chat(&self, message: impl Into<String>) -> bool {
        let packet = ChatPacket::new(self.username.clone(), message);
        self.connection.write_packet(&packet)
    }

    pub fn send_ping(&self, nonce: i32) -> bool {
        self.connection.write_packet(&PingPacket { nonce })
    }

    /// Non-blocking poll for the next inbound packet.
    pub fn poll(&self) -> Option<Box<dyn Packet>> {
        self.connection.try_read_packet()
    }

    pub async fn close(&self) {
        self.connection.close().await;
    }
}
