use crate::sync::{Phase, SnapshotReplay, SyncError};
use log::{debug, error, info, warn};
use shared::protocol::{FRAME_HEADER_LEN, MAX_FRAME_LEN};
use shared::{BoardReply, Cell, GridError, LocalReplica, Packet, PROTOCOL_VERSION};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed packet: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("malformed board frame: {0}")]
    Frame(#[from] bincode::Error),
    #[error("board frame of {0} bytes is too large")]
    FrameTooLarge(usize),
    #[error("board unavailable: {0}")]
    BoardUnavailable(String),
    #[error("disconnected by server: {0}")]
    Disconnected(String),
    #[error("connection closed by server")]
    Closed,
    #[error("unexpected {0} packet")]
    Unexpected(&'static str),
    #[error("board not synchronized yet")]
    NotSynchronized,
    #[error(transparent)]
    InvalidCell(#[from] GridError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

/// What one inbound packet meant to this participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Someone else committed a cell
    Incoming(Cell),
    /// Connected-user count changed
    UserCount(u32),
    /// Our own placement was refused
    PlacementRejected(String),
}

/// Counters shown alongside the board
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stats {
    pub connected_users: u32,
    pub placed_by_self: u64,
    pub placed_by_others: u64,
    pub last_error: Option<String>,
}

/// A participant session: one live connection plus its replica
pub struct Client {
    server_addr: String,
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,

    sync: SnapshotReplay,
    stats: Stats,
}

impl Client {
    /// Joins the server and waits for `metadata`
    ///
    /// The server only sends `metadata` after it has registered us, so from
    /// here on no broadcast can miss this session.
    pub async fn connect(server_addr: &str) -> Result<Self, ClientError> {
        info!("Connecting to server at {}...", server_addr);
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();

        let mut client = Client {
            server_addr: server_addr.to_string(),
            lines: BufReader::new(read_half).lines(),
            writer,
            sync: SnapshotReplay::new(),
            stats: Stats::default(),
        };

        client
            .send_packet(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .await?;

        match client.next_packet().await? {
            Packet::Metadata(envelope) => {
                let metadata = envelope.into_data().ok_or(ClientError::Unexpected("metadata"))?;
                client.stats.connected_users = metadata.connected_users;
                info!("Connected! {} user(s) online", metadata.connected_users);
                Ok(client)
            }
            Packet::Disconnected { reason } => Err(ClientError::Disconnected(reason)),
            other => Err(ClientError::Unexpected(other.event_name())),
        }
    }

    /// Fetches the board and replays everything that arrived meanwhile
    ///
    /// Live packets keep being read while the fetch is in flight, so the
    /// server never backs up behind us. Returns the number of replayed cells.
    pub async fn synchronize(&mut self) -> Result<usize, ClientError> {
        if self.sync.phase() != Phase::Buffering {
            return Err(SyncError::WrongPhase(self.sync.phase()).into());
        }

        let fetch = fetch_board(self.server_addr.clone());
        tokio::pin!(fetch);

        let fetched = loop {
            tokio::select! {
                result = &mut fetch => break result,
                line = self.lines.next_line() => {
                    let handled = match line {
                        Ok(Some(line)) => self.handle_line(&line).map(|_| ()),
                        Ok(None) => Err(ClientError::Closed),
                        Err(e) => Err(e.into()),
                    };
                    if let Err(e) = handled {
                        self.sync.fail(e.to_string());
                        return Err(e);
                    }
                }
            }
        };

        match fetched {
            Ok(bitmap) => Ok(self.sync.on_snapshot(bitmap)?),
            Err(e) => {
                error!("Failed to fetch board: {}", e);
                Err(self.sync.fail(e.to_string()).into())
            }
        }
    }

    /// Validates against the replica, paints locally and sends the placement
    pub async fn place(&mut self, x: i64, y: i64, color: i64) -> Result<Cell, ClientError> {
        let replica = self.sync.replica_mut().ok_or(ClientError::NotSynchronized)?;
        let cell = Cell::validate(x, y, color, replica.columns())?;
        replica.apply_cell(cell);

        self.send_packet(&Packet::placement(cell)).await?;
        self.stats.placed_by_self += 1;
        debug!("Placed {:?}", cell);
        Ok(cell)
    }

    /// Reads and handles inbound packets until one yields an [`Event`]
    pub async fn poll_event(&mut self) -> Result<Event, ClientError> {
        loop {
            let line = self.lines.next_line().await?.ok_or(ClientError::Closed)?;
            if let Some(event) = self.handle_line(&line)? {
                return Ok(event);
            }
        }
    }

    pub fn replica(&self) -> Option<&LocalReplica> {
        self.sync.replica()
    }

    pub fn phase(&self) -> Phase {
        self.sync.phase()
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn handle_line(&mut self, line: &str) -> Result<Option<Event>, ClientError> {
        match Packet::from_line(line) {
            Ok(packet) => self.handle_packet(packet),
            Err(e) => {
                warn!("Failed to deserialize packet: {}", e);
                Ok(None)
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) -> Result<Option<Event>, ClientError> {
        match packet {
            Packet::Incoming(envelope) => {
                let Some(cell) = envelope.into_data() else {
                    warn!("Incoming packet without a cell");
                    return Ok(None);
                };
                // cells parked for replay are not counted
                let live = self.sync.phase() == Phase::Live;
                if self.sync.on_update(cell) && live {
                    self.stats.placed_by_others += 1;
                }
                Ok(Some(Event::Incoming(cell)))
            }

            Packet::NewUser(envelope) => {
                let Some(count) = envelope.into_data() else {
                    return Ok(None);
                };
                self.stats.connected_users = count;
                Ok(Some(Event::UserCount(count)))
            }

            Packet::Metadata(envelope) => {
                let Some(metadata) = envelope.into_data() else {
                    return Ok(None);
                };
                self.stats.connected_users = metadata.connected_users;
                Ok(Some(Event::UserCount(metadata.connected_users)))
            }

            Packet::PlacementError(envelope) => {
                let mut message = envelope
                    .error
                    .unwrap_or_else(|| "placement rejected".to_string());
                if let Some(details) = envelope.details {
                    message = format!("{} {}", message, details);
                }
                warn!("Placement rejected: {}", message);
                self.stats.last_error = Some(message.clone());
                Ok(Some(Event::PlacementRejected(message)))
            }

            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                Err(ClientError::Disconnected(reason))
            }

            other => {
                warn!("Unexpected packet type {}", other.event_name());
                Ok(None)
            }
        }
    }

    async fn next_packet(&mut self) -> Result<Packet, ClientError> {
        let line = self.lines.next_line().await?.ok_or(ClientError::Closed)?;
        Ok(Packet::from_line(&line)?)
    }

    async fn send_packet(&mut self, packet: &Packet) -> Result<(), ClientError> {
        let line = packet.to_line()?;
        self.writer.write_all(line.as_bytes()).await?;
        Ok(())
    }
}

/// Fetches the whole packed board over a one-shot connection
pub async fn fetch_board<A: ToSocketAddrs>(addr: A) -> Result<Vec<u8>, ClientError> {
    let mut stream = TcpStream::connect(addr).await?;
    stream
        .write_all(Packet::FetchBoard.to_line()?.as_bytes())
        .await?;

    let mut header = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut header).await?;
    let len = BoardReply::frame_len(header);
    if len > MAX_FRAME_LEN {
        return Err(ClientError::FrameTooLarge(len));
    }

    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;

    match BoardReply::from_frame_body(&body)? {
        BoardReply::Board(bitmap) => {
            debug!("Fetched board ({} bytes)", bitmap.len());
            Ok(bitmap)
        }
        BoardReply::Unavailable(reason) => Err(ClientError::BoardUnavailable(reason)),
    }
}
