//! Creates a new board filled with color 15 in the server's data file

use clap::Parser;
use log::{error, info};
use server::backend::MemoryBackend;
use server::board::{create_board, StoreError};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File the boards are saved to
    #[arg(short, long)]
    data_file: PathBuf,

    /// Name of the board to create
    #[arg(short, long)]
    board: String,

    /// Rows and columns of the new board
    #[arg(short, long, default_value = "100")]
    columns: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let backend = MemoryBackend::with_data_file(&args.data_file)?;

    let key = shared::board_key(&args.board);
    match create_board(&backend, &key, args.columns).await {
        Ok(()) => {}
        Err(e @ StoreError::BoardAlreadyExists(_)) => {
            error!("Board {} already exists, not touching it", key);
            return Err(e.into());
        }
        Err(e) => {
            error!("Couldn't create board {}: {}", key, e);
            return Err(e.into());
        }
    }

    backend.persist()?;
    info!("Saved {} to {}", key, args.data_file.display());

    Ok(())
}
