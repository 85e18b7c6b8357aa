//! Framed-TCP game server: connection acceptance, client tracking,
//! authentication, lifecycle events, and packet dispatch.

pub mod events;
pub mod handler;
pub mod server;
pub mod table;

pub use events::{EventArgs, ServerEvent};
pub use handler::{ChatHandler, PacketHandler};
pub use server::Server;
pub use table::ClientTable;
