use clap::Parser;
use log::{error, info, warn};
use server::backend::MemoryBackend;
use server::board::{create_board, Board, StoreError};
use server::network::Server;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Name of the board to serve
    #[arg(short, long, default_value = "main")]
    board: String,

    /// File the boards are loaded from and saved to
    #[arg(short, long)]
    data_file: Option<PathBuf>,

    /// Create the board with this many rows and columns if it is missing
    #[arg(short, long)]
    columns: Option<u32>,

    /// Maximum number of concurrent participants
    #[arg(short, long, default_value = "256")]
    max_clients: usize,

    /// Seconds between saves of the data file
    #[arg(short, long, default_value = "5")]
    flush_interval: u64,
}

/// Main-method of the board server.
/// Opens the backend and board, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let backend = Arc::new(match &args.data_file {
        Some(path) => MemoryBackend::with_data_file(path)?,
        None => {
            warn!("No data file given, the board will not survive a restart");
            MemoryBackend::new()
        }
    });

    let key = shared::board_key(&args.board);
    if let Some(columns) = args.columns {
        match create_board(backend.as_ref(), &key, columns).await {
            Ok(()) => {}
            Err(StoreError::BoardAlreadyExists(_)) => {
                info!("Board {} already exists, keeping it", key);
            }
            Err(e) => return Err(e.into()),
        }
    }

    let board = Board::open(backend.clone(), key).await?;

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, Arc::new(board), args.max_clients).await?;

    if backend.data_file().is_some() {
        let backend = Arc::clone(&backend);
        let period = Duration::from_secs(args.flush_interval.max(1));
        tokio::spawn(async move {
            let mut flush_timer = interval(period);
            flush_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                flush_timer.tick().await;
                if let Err(e) = backend.persist() {
                    error!("Failed to save boards: {}", e);
                }
            }
        });
    }

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    if backend.persist()? {
        info!("Saved boards before exit");
    }

    Ok(())
}
