//! Participant registry for the board server
//!
//! This module tracks every live participant connection:
//! - Connection lifecycle (join, leave) and id assignment
//! - The outbound packet queue of each participant
//! - Fan-out of one packet to everyone except an optional originator
//! - Capacity enforcement and the connected-user count
//! - Dropping participants that stop draining their queue
//!
//! The registry is owned by the server's actor loop alone, so counts and
//! recipient lists are never read half-updated.

use log::{debug, info, warn};
use shared::Packet;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Packets a participant may have queued before it is considered stalled
pub const QUEUE_CAPACITY: usize = 1024;

/// A connected participant
///
/// Each client holds:
/// - Connection metadata (ID, address, join time)
/// - The sending half of its outbound queue, drained by the connection's
///   writer task
#[derive(Debug)]
pub struct Client {
    /// Unique client identifier assigned by the server
    pub id: u32,
    /// Remote address, for logging
    pub addr: SocketAddr,
    /// When the participant joined
    pub connected_at: Instant,
    /// Packets queued for this participant, in send order
    pub sender: mpsc::Sender<Packet>,
}

impl Client {
    pub fn new(id: u32, addr: SocketAddr, sender: mpsc::Sender<Packet>) -> Self {
        Self {
            id,
            addr,
            connected_at: Instant::now(),
            sender,
        }
    }

    /// Queues a packet for this participant without waiting
    pub fn send(&self, packet: Packet) -> Result<(), TrySendError<Packet>> {
        self.sender.try_send(packet)
    }
}

/// Manages all connected participants
///
/// Enforces the capacity limit and decides who receives each broadcast.
/// Queue order per participant is the order packets are handed to the
/// manager, which gives every recipient the writer's send order.
pub struct ClientManager {
    /// Connected clients indexed by their unique ID
    clients: HashMap<u32, Client>,
    /// Next available client ID for new connections
    next_client_id: u32,
    /// Maximum number of concurrent clients allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    ///
    /// Client IDs start from 1 and increment for each new connection.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Attempts to register a new participant
    ///
    /// Returns Some(client_id) if successful, None if the server is at
    /// capacity.
    pub fn add_client(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::Sender<Packet>,
    ) -> Option<u32> {
        if self.clients.len() >= self.max_clients {
            warn!("Refusing {}: server full ({} clients)", addr, self.max_clients);
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Client {} connected from {}", client_id, addr);
        self.clients
            .insert(client_id, Client::new(client_id, addr, sender));

        Some(client_id)
    }

    /// Removes a participant
    ///
    /// Dropping the client drops its queue sender, which ends the writer
    /// task. Returns true if the client was found and removed.
    pub fn remove_client(&mut self, client_id: &u32) -> bool {
        if let Some(client) = self.clients.remove(client_id) {
            info!(
                "Client {} disconnected after {:.1}s",
                client.id,
                client.connected_at.elapsed().as_secs_f32()
            );
            true
        } else {
            false
        }
    }

    pub fn contains(&self, client_id: u32) -> bool {
        self.clients.contains_key(&client_id)
    }

    /// Queues a packet for one participant
    ///
    /// Returns false if the client is unknown, its connection is closing, or
    /// its queue is full, in which case it is dropped.
    pub fn send_to(&mut self, client_id: u32, packet: Packet) -> bool {
        let Some(client) = self.clients.get(&client_id) else {
            return false;
        };

        match client.send(packet) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.drop_stalled(client_id);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Queues a packet for every participant except `exclude`
    ///
    /// Participants whose queue is full are dropped. Returns how many queues
    /// accepted the packet.
    pub fn broadcast(&mut self, packet: &Packet, exclude: Option<u32>) -> usize {
        let mut delivered = 0;
        let mut stalled = Vec::new();
        for (client_id, client) in &self.clients {
            if Some(*client_id) == exclude {
                continue;
            }

            match client.send(packet.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => stalled.push(*client_id),
                Err(TrySendError::Closed(_)) => {
                    debug!("Client {} queue closed, skipping {}", client_id, packet.event_name());
                }
            }
        }

        for client_id in stalled {
            self.drop_stalled(client_id);
        }
        delivered
    }

    /// Removing the client drops its sender, so its writer flushes what is
    /// queued and then closes the connection
    fn drop_stalled(&mut self, client_id: u32) {
        warn!("Client {} stopped reading, dropping it", client_id);
        self.remove_client(&client_id);
    }

    /// Tells every participant the server is going away and forgets them
    pub fn disconnect_all(&mut self, reason: &str) {
        for (client_id, client) in self.clients.drain() {
            let packet = Packet::Disconnected {
                reason: reason.to_string(),
            };
            if client.send(packet).is_err() {
                debug!("Client {} gone before shutdown notice", client_id);
            }
        }
    }

    /// Returns the number of currently connected clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no clients are currently connected
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{Cell, Envelope};
    use tokio::sync::mpsc::error::TryRecvError;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:8080".parse().unwrap()
    }

    fn test_addr2() -> SocketAddr {
        "127.0.0.1:8081".parse().unwrap()
    }

    fn incoming(x: u32) -> Packet {
        Packet::Incoming(Envelope::okay(Cell::new(x, 0, 1)))
    }

    #[test]
    fn test_client_creation() {
        let (tx, _rx) = mpsc::channel(QUEUE_CAPACITY);
        let client = Client::new(1, test_addr(), tx);

        assert_eq!(client.id, 1);
        assert_eq!(client.addr, test_addr());
    }

    #[test]
    fn test_client_send_after_receiver_dropped() {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let client = Client::new(1, test_addr(), tx);
        drop(rx);

        assert!(matches!(client.send(incoming(0)), Err(TrySendError::Closed(_))));
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_multiple_clients() {
        let mut manager = ClientManager::new(3);
        let (tx1, _rx1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx2, _rx2) = mpsc::channel(QUEUE_CAPACITY);

        let client_id1 = manager.add_client(test_addr(), tx1).unwrap();
        let client_id2 = manager.add_client(test_addr2(), tx2).unwrap();

        assert_eq!(client_id1, 1);
        assert_eq!(client_id2, 2);
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);
        let (tx1, _rx1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx2, _rx2) = mpsc::channel(QUEUE_CAPACITY);

        assert!(manager.add_client(test_addr(), tx1).is_some());
        assert!(manager.add_client(test_addr2(), tx2).is_none());
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_ids_not_reused_after_removal() {
        let mut manager = ClientManager::new(2);
        let (tx1, _rx1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx2, _rx2) = mpsc::channel(QUEUE_CAPACITY);

        let first = manager.add_client(test_addr(), tx1).unwrap();
        assert!(manager.remove_client(&first));
        let second = manager.add_client(test_addr(), tx2).unwrap();

        assert_ne!(first, second);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_remove_nonexistent_client() {
        let mut manager = ClientManager::new(2);
        assert!(!manager.remove_client(&999));
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_send_to_one_client() {
        let mut manager = ClientManager::new(2);
        let (tx1, mut rx1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx2, mut rx2) = mpsc::channel(QUEUE_CAPACITY);
        let id1 = manager.add_client(test_addr(), tx1).unwrap();
        manager.add_client(test_addr2(), tx2).unwrap();

        assert!(manager.send_to(id1, incoming(3)));
        assert!(!manager.send_to(999, incoming(3)));

        assert_eq!(rx1.try_recv().unwrap(), incoming(3));
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_excludes_originator() {
        let mut manager = ClientManager::new(3);
        let (tx1, mut rx1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx2, mut rx2) = mpsc::channel(QUEUE_CAPACITY);
        let (tx3, mut rx3) = mpsc::channel(QUEUE_CAPACITY);
        let id1 = manager.add_client(test_addr(), tx1).unwrap();
        manager.add_client(test_addr2(), tx2).unwrap();
        manager.add_client(test_addr2(), tx3).unwrap();

        assert_eq!(manager.broadcast(&incoming(1), Some(id1)), 2);

        assert!(rx1.try_recv().is_err());
        assert_eq!(rx2.try_recv().unwrap(), incoming(1));
        assert_eq!(rx3.try_recv().unwrap(), incoming(1));
    }

    #[test]
    fn test_broadcast_preserves_order() {
        let mut manager = ClientManager::new(2);
        let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);
        manager.add_client(test_addr(), tx).unwrap();

        for x in 0..5 {
            manager.broadcast(&incoming(x), None);
        }
        for x in 0..5 {
            assert_eq!(rx.try_recv().unwrap(), incoming(x));
        }
    }

    #[test]
    fn test_broadcast_skips_closed_queues() {
        let mut manager = ClientManager::new(2);
        let (tx1, rx1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx2, _rx2) = mpsc::channel(QUEUE_CAPACITY);
        manager.add_client(test_addr(), tx1).unwrap();
        manager.add_client(test_addr2(), tx2).unwrap();
        drop(rx1);

        assert_eq!(manager.broadcast(&incoming(0), None), 1);
    }

    #[test]
    fn test_stalled_client_is_dropped() {
        let mut manager = ClientManager::new(2);
        let (tx1, _rx1) = mpsc::channel(1);
        let (tx2, mut rx2) = mpsc::channel(QUEUE_CAPACITY);
        let slow = manager.add_client(test_addr(), tx1).unwrap();
        manager.add_client(test_addr2(), tx2).unwrap();

        assert_eq!(manager.broadcast(&incoming(0), None), 2);
        // the slow client never drained its single slot
        assert_eq!(manager.broadcast(&incoming(1), None), 1);

        assert!(!manager.contains(slow));
        assert_eq!(manager.len(), 1);
        assert_eq!(rx2.try_recv().unwrap(), incoming(0));
        assert_eq!(rx2.try_recv().unwrap(), incoming(1));
    }

    #[test]
    fn test_send_to_full_queue_drops_client() {
        let mut manager = ClientManager::new(1);
        let (tx, _rx) = mpsc::channel(1);
        let id = manager.add_client(test_addr(), tx).unwrap();

        assert!(manager.send_to(id, incoming(0)));
        assert!(!manager.send_to(id, incoming(1)));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_disconnect_all() {
        let mut manager = ClientManager::new(2);
        let (tx1, mut rx1) = mpsc::channel(QUEUE_CAPACITY);
        let (tx2, rx2) = mpsc::channel(QUEUE_CAPACITY);
        manager.add_client(test_addr(), tx1).unwrap();
        manager.add_client(test_addr2(), tx2).unwrap();
        drop(rx2);

        manager.disconnect_all("bye");

        assert!(manager.is_empty());
        assert_eq!(
            rx1.try_recv().unwrap(),
            Packet::Disconnected {
                reason: "bye".to_string()
            }
        );
        // the sender was dropped with its client
        assert_eq!(rx1.try_recv(), Err(TryRecvError::Disconnected));
    }
}
