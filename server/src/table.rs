//! Tracking of connected clients and their authentication state
//!
//! This module owns the server-side bookkeeping for live connections:
//! - the bidirectional identifier table (opaque id ↔ connection)
//! - the authentication table (id → bool, default false)
//!
//! A connection absent from the table is invisible to lookups and broadcast
//! even if its socket is still open. All three maps are mutated together so
//! the table stays internally consistent; the server holds the whole thing
//! behind one `RwLock`.

use log::info;
use shared::Connection;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Bidirectional id ↔ connection table plus per-client authentication flags.
#[derive(Debug, Default)]
pub struct ClientTable {
    by_id: HashMap<String, Arc<Connection>>,
    ids_by_addr: HashMap<SocketAddr, String>,
    authenticated: HashMap<String, bool>,
}

impl ClientTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection under `id`. New clients start unauthenticated.
    pub fn insert(&mut self, id: String, connection: Arc<Connection>) {
        info!("client {} connected from {}", id, connection.peer_addr());
        self.ids_by_addr.insert(connection.peer_addr(), id.clone());
        self.authenticated.insert(id.clone(), false);
        self.by_id.insert(id, connection);
    }

    /// Removes a client by id, returning the connection if it was tracked.
    pub fn remove(&mut self, id: &str) -> Option<Arc<Connection>> {
        let connection = self.by_id.remove(id)?;
        self.ids_by_addr.remove(&connection.peer_addr());
        self.authenticated.remove(id);
        info!("client {} removed", id);
        Some(connection)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.by_id.get(id).cloned()
    }

    pub fn id_for_addr(&self, addr: SocketAddr) -> Option<String> {
        self.ids_by_addr.get(&addr).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Sets the authentication flag. Returns false if the id is untracked,
    /// in which case nothing is stored.
    pub fn set_authenticated(&mut self, id: &str, success: bool) -> bool {
        if !self.by_id.contains_key(id) {
            return false;
        }
        self.authenticated.insert(id.to_string(), success);
        true
    }

    /// Authentication defaults to false until explicitly granted.
    pub fn is_authenticated(&self, id: &str) -> bool {
        self.authenticated.get(id).copied().unwrap_or(false)
    }

    pub fn ids(&self) -> Vec<String> {
        self.by_id.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
