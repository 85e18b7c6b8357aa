//! Application hook for inbound packets
//!
//! The server's `run` loop hands every decoded, non-sentinel packet from a
//! tracked client to a `PacketHandler`. Handlers run inline on the dispatch
//! loop, so they should stay quick; anything slow belongs in its own task.

use crate::server::Server;
use async_trait::async_trait;
use log::{debug, info};
use shared::{ChatPacket, LoginPacket, Packet, PingPacket};

#[async_trait]
pub trait PacketHandler: Send + Sync {
    /// Called once per inbound packet from a tracked client. `packet` is
    /// never the empty sentinel; unknown or malformed frames are filtered
    /// out before dispatch.
    async fn receive_packet(&self, server: &Server, client_id: &str, packet: Box<dyn Packet>);
}

/// Chat-room protocol over the bundled packet types: a login with a
/// non-empty username grants authentication, chat lines are stamped with
/// the sender's id and broadcast, pings echo back to the sender.
#[derive(Debug, Default)]
pub struct ChatHandler;

#[async_trait]
impl PacketHandler for ChatHandler {
    async fn receive_packet(&self, server: &Server, client_id: &str, packet: Box<dyn Packet>) {
        if let Some(login) = packet.as_any().downcast_ref::<LoginPacket>() {
            let granted = !login.username.is_empty();
            info!(
                "login from {} as \"{}\": {}",
                client_id,
                login.username,
                if granted { "accepted" } else { "rejected" }
            );
            server.authenticate(client_id, granted).await;
            return;
        }

        if let Some(chat) = packet.as_any().downcast_ref::<ChatPacket>() {
            let stamped = ChatPacket::new(client_id, chat.message.clone());
            server.send_packet(&stamped, None).await;
            return;
        }

        if let Some(ping) = packet.as_any().downcast_ref::<PingPacket>() {
            server
                .send_packet(ping, Some(&[client_id.to_string()]))
                .await;
            return;
        }

        debug!(
            "unhandled \"{}\" packet from {}",
            packet.type_name(),
            client_id
        );
    }
}
