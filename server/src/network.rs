//! Server network layer: TCP connections, the fan-out actor and board fetches

use crate::board::{CellStore, StoreError};
use crate::client_manager::{ClientManager, QUEUE_CAPACITY};
use log::{debug, error, info, warn};
use serde_json::{json, Value};
use shared::{BoardReply, Envelope, Metadata, Packet, PROTOCOL_VERSION};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Error text sent back for malformed or out-of-range placements
pub const INVALID_BLOCK: &str = "invalid block received";

/// Messages sent from connection tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    Joined {
        addr: SocketAddr,
        sender: mpsc::Sender<Packet>,
        reply: oneshot::Sender<Option<u32>>,
    },
    Placement {
        client_id: u32,
        block: Value,
    },
    Left {
        client_id: u32,
    },
    Shutdown,
}

/// Cloneable handle for stopping a running [`Server`]
#[derive(Debug, Clone)]
pub struct ServerHandle {
    server_tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn shutdown(&self) {
        if self.server_tx.send(ServerMessage::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

/// Main server: owns the participant registry and serializes every
/// join, leave and placement through one loop
pub struct Server {
    listener: Option<TcpListener>,
    acceptor: Option<JoinHandle<()>>,
    local_addr: SocketAddr,
    store: Arc<dyn CellStore>,
    clients: ClientManager,
    placements: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        store: Arc<dyn CellStore>,
        max_clients: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener: Some(listener),
            acceptor: None,
            local_addr,
            store,
            clients: ClientManager::new(max_clients),
            placements: 0,
            server_tx,
            server_rx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            server_tx: self.server_tx.clone(),
        }
    }

    pub fn connected_users(&self) -> usize {
        self.clients.len()
    }

    /// Spawns task that accepts connections and hands each to its own task
    fn spawn_acceptor(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let server_tx = self.server_tx.clone();
        let store = Arc::clone(&self.store);

        self.acceptor = Some(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, addr)) => {
                        let server_tx = server_tx.clone();
                        let store = Arc::clone(&store);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, addr, server_tx, store).await {
                                debug!("Connection from {} ended with error: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Error accepting connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                }
            }
        }));
    }

    /// Closes the listener and disconnects every participant
    fn stop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        self.clients.disconnect_all("Server shutting down");
    }

    /// Processes one message from a connection task
    ///
    /// Returns false when the server should stop.
    pub async fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::Joined {
                addr,
                sender,
                reply,
            } => {
                let client_id = self.handle_join(addr, sender);
                if reply.send(client_id).is_err() {
                    // connection task died while waiting; undo the join
                    if let Some(client_id) = client_id {
                        self.clients.remove_client(&client_id);
                    }
                }
            }
            ServerMessage::Placement { client_id, block } => {
                if self.clients.contains(client_id) {
                    self.handle_placement(client_id, block).await;
                } else {
                    debug!("Ignoring placement from dropped client {}", client_id);
                }
            }
            ServerMessage::Left { client_id } => {
                self.clients.remove_client(&client_id);
                debug!("{} users connected", self.clients.len());
            }
            ServerMessage::Shutdown => {
                info!("Server shutting down");
                return false;
            }
        }
        true
    }

    fn handle_join(
        &mut self,
        addr: SocketAddr,
        sender: mpsc::Sender<Packet>,
    ) -> Option<u32> {
        let refusal = sender.clone();
        let Some(client_id) = self.clients.add_client(addr, sender) else {
            let _ = refusal.try_send(Packet::Disconnected {
                reason: "Server full".to_string(),
            });
            return None;
        };

        // metadata goes out before any incoming cell can be queued for this
        // client, which is what lets it treat metadata as "subscribed"
        let connected_users = self.clients.len() as u32;
        self.clients.send_to(
            client_id,
            Packet::Metadata(Envelope::okay(Metadata { connected_users })),
        );
        self.clients.broadcast(
            &Packet::NewUser(Envelope::okay(connected_users)),
            Some(client_id),
        );

        Some(client_id)
    }

    /// Stores a new block and broadcasts it to the rest of the clients
    async fn handle_placement(&mut self, client_id: u32, block: Value) {
        let Some((x, y, color)) = parse_block(&block) else {
            warn!("Client {} sent a malformed block: {}", client_id, block);
            self.reject_invalid(client_id, block);
            return;
        };

        match self.store.set_cell(x, y, color).await {
            Ok(cell) => {
                self.placements += 1;
                self.clients
                    .broadcast(&Packet::Incoming(Envelope::okay(cell)), Some(client_id));

                if self.placements % 100 == 0 {
                    debug!(
                        "{} placements committed, {} clients",
                        self.placements,
                        self.clients.len()
                    );
                }
            }
            Err(StoreError::InvalidCell(e)) => {
                warn!("Client {} sent a bad block, but caught it: {}", client_id, e);
                self.reject_invalid(client_id, block);
            }
            Err(e) => {
                error!("Placement from client {} failed: {}", client_id, e);
                self.clients.send_to(
                    client_id,
                    Packet::PlacementError(Envelope::error(e.to_string(), None)),
                );
            }
        }
    }

    fn reject_invalid(&mut self, client_id: u32, block: Value) {
        self.clients.send_to(
            client_id,
            Packet::PlacementError(Envelope::error(
                INVALID_BLOCK,
                Some(json!({ "block": block })),
            )),
        );
    }

    /// Main server loop
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_acceptor();
        info!("Server started successfully");

        while let Some(message) = self.server_rx.recv().await {
            if !self.handle_message(message).await {
                break;
            }
        }

        self.stop();
        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

/// Extracts `[x, y, color]` from a placement payload
///
/// Only shape is checked here; ranges are the store's business. Floats
/// with no fractional part count as integers.
pub fn parse_block(block: &Value) -> Option<(i64, i64, i64)> {
    match block.as_array()?.as_slice() {
        [x, y, color] => Some((integer(x)?, integer(y)?, integer(color)?)),
        _ => None,
    }
}

fn integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    store: Arc<dyn CellStore>,
) -> io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let Some(first) = lines.next_line().await? else {
        return Ok(());
    };

    match Packet::from_line(&first) {
        Ok(Packet::FetchBoard) => serve_board(write_half, store.as_ref(), addr).await,
        Ok(Packet::Connect { client_version }) if client_version == PROTOCOL_VERSION => {
            run_session(lines, write_half, addr, server_tx).await
        }
        Ok(Packet::Connect { client_version }) => {
            warn!("Client at {} speaks protocol version {}", addr, client_version);
            let packet = Packet::Disconnected {
                reason: "Protocol version mismatch".to_string(),
            };
            write_packet(&mut write_half, &packet).await
        }
        Ok(other) => {
            warn!("Unexpected {} packet opening connection from {}", other.event_name(), addr);
            Ok(())
        }
        Err(e) => {
            warn!("Failed to parse opening packet from {}: {}", addr, e);
            Ok(())
        }
    }
}

/// Answers a whole-board fetch with one frame and closes
async fn serve_board(
    mut write_half: OwnedWriteHalf,
    store: &dyn CellStore,
    addr: SocketAddr,
) -> io::Result<()> {
    info!("{} fetching bitmap", addr);
    let reply = match store.snapshot().await {
        Ok(bitmap) => BoardReply::Board(bitmap),
        Err(e) => {
            error!("Sending unavailable board to {}: {}", addr, e);
            BoardReply::Unavailable(e.to_string())
        }
    };

    let frame = reply
        .to_frame()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_half.write_all(&frame).await?;
    write_half.shutdown().await
}

async fn run_session(
    mut lines: Lines<BufReader<OwnedReadHalf>>,
    write_half: OwnedWriteHalf,
    addr: SocketAddr,
    server_tx: mpsc::UnboundedSender<ServerMessage>,
) -> io::Result<()> {
    let (sender, receiver) = mpsc::channel(QUEUE_CAPACITY);
    let (reply_tx, reply_rx) = oneshot::channel();

    let joined = ServerMessage::Joined {
        addr,
        sender,
        reply: reply_tx,
    };
    if server_tx.send(joined).is_err() {
        error!("Server loop gone, dropping {}", addr);
        return Ok(());
    }

    let Ok(Some(client_id)) = reply_rx.await else {
        // refused: flush the disconnect notice and close
        return write_packets(write_half, receiver).await;
    };

    tokio::spawn(async move {
        if let Err(e) = write_packets(write_half, receiver).await {
            debug!("Writer for client {} stopped: {}", client_id, e);
        }
    });

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match Packet::from_line(&line) {
                Ok(Packet::Placement(block)) => {
                    if server_tx
                        .send(ServerMessage::Placement { client_id, block })
                        .is_err()
                    {
                        break;
                    }
                }
                Ok(other) => {
                    warn!("Unexpected {} packet from client {}", other.event_name(), client_id);
                }
                Err(e) => {
                    warn!("Failed to deserialize packet from client {}: {}", client_id, e);
                }
            },
            Ok(None) => break,
            Err(e) => {
                debug!("Read from client {} failed: {}", client_id, e);
                break;
            }
        }
    }

    // the registry drops our queue sender, which stops the writer task
    let _ = server_tx.send(ServerMessage::Left { client_id });
    Ok(())
}

/// Drains a participant's queue onto its socket until the queue closes
async fn write_packets(
    mut write_half: OwnedWriteHalf,
    mut receiver: mpsc::Receiver<Packet>,
) -> io::Result<()> {
    while let Some(packet) = receiver.recv().await {
        write_packet(&mut write_half, &packet).await?;
    }
    write_half.shutdown().await
}

async fn write_packet(write_half: &mut OwnedWriteHalf, packet: &Packet) -> io::Result<()> {
    let line = packet
        .to_line()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_half.write_all(line.as_bytes()).await
}
