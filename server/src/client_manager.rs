//! Routing table for connected clients
//!
//! This module tracks which connection belongs to which player:
//! - Assigning player ids to accepted connections
//! - Enforcing the server's client capacity
//! - Unicast and broadcast delivery through connection handles
//!
//! Ids are never reused while the process runs. A rejected connection does
//! not consume one.

use crate::connection::ConnectionHandle;
use castle_shared::{framing, Message, PlayerId};
use log::{debug, info};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// A registered connection
#[derive(Debug)]
pub struct Client {
    pub id: PlayerId,
    pub addr: SocketAddr,
    pub connected_at: Instant,
    pub handle: ConnectionHandle,
}

impl Client {
    pub fn new(id: PlayerId, addr: SocketAddr, handle: ConnectionHandle) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            handle,
        }
    }
}

/// Owns every live [`Client`] and the id counter.
///
/// Only the server event loop touches the manager, so it needs no locking.
pub struct ClientManager {
    clients: HashMap<PlayerId, Client>,
    next_client_id: PlayerId,
    max_clients: usize,
}

impl ClientManager {
    /// Creates an empty manager. Ids start from 1.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    pub fn is_full(&self) -> bool {
        self.clients.len() >= self.max_clients
    }

    /// Registers a new connection
    ///
    /// `connect` receives the assigned id and returns the started
    /// connection's handle. Returns None, without calling `connect` or
    /// consuming an id, when the server is at capacity.
    pub fn add_client<F>(&mut self, addr: SocketAddr, connect: F) -> Option<PlayerId>
    where
        F: FnOnce(PlayerId) -> ConnectionHandle,
    {
        if self.is_full() {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id = self.next_client_id.wrapping_add(1).max(1);

        let handle = connect(client_id);
        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, handle));
        Some(client_id)
    }

    /// Removes a client from the table. The connection itself is stopped by
    /// whoever reported its end.
    pub fn remove_client(&mut self, client_id: PlayerId) -> Option<Client> {
        let client = self.clients.remove(&client_id)?;
        info!(
            "Client {} disconnected after {:.1}s",
            client.id,
            client.connected_at.elapsed().as_secs_f32()
        );
        Some(client)
    }

    pub fn get(&self, client_id: PlayerId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    /// Queues `message` for one client. Sending to an unknown or closed
    /// client is a logged no-op.
    pub fn send_to(&self, client_id: PlayerId, message: &Message) -> bool {
        match self.clients.get(&client_id) {
            Some(client) if client.handle.send(message) => true,
            _ => {
                debug!(
                    "Dropped {:?} for client {}: not connected",
                    message.message_type(),
                    client_id
                );
                false
            }
        }
    }

    /// Queues `message` for every client that has completed `Connect`,
    /// except `exclude`. The frame is encoded once. Returns how many
    /// clients accepted it.
    pub fn broadcast(&self, message: &Message, exclude: Option<PlayerId>) -> usize {
        let frame = framing::encode_frame(message);
        self.clients
            .values()
            .filter(|client| Some(client.id) != exclude)
            .filter(|client| client.handle.is_authenticated())
            .filter(|client| client.handle.send_frame(frame.clone()))
            .count()
    }

    /// Stops every connection. Their disconnect reports still arrive
    /// through the event queue.
    pub fn stop_all(&self) {
        for client in self.clients.values() {
            client.handle.stop();
        }
    }

    /// Connected ids in ascending order.
    pub fn ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.clients.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
