//! Load bot: places a random cell on a fixed interval until Ctrl+C

use clap::Parser;
use client::network::{Client, Event};
use log::{debug, info, warn};
use rand::Rng;
use tokio::time::{interval, Duration};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Milliseconds between placements
    #[arg(short = 'i', long, default_value = "100")]
    interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut client = Client::connect(&args.server).await?;
    client.synchronize().await?;
    let Some(columns) = client.replica().map(|replica| replica.columns() as i64) else {
        return Err("synchronized without a board".into());
    };
    info!("Bot placing on a {}x{} board every {}ms", columns, columns, args.interval);

    let mut place_timer = interval(Duration::from_millis(args.interval.max(1)));
    let mut placed = 0u64;

    loop {
        tokio::select! {
            _ = place_timer.tick() => {
                let (x, y, color) = {
                    let mut rng = rand::thread_rng();
                    (rng.gen_range(0..columns), rng.gen_range(0..columns), rng.gen_range(0..16))
                };
                client.place(x, y, color).await?;
                placed += 1;
                if placed % 10 == 0 {
                    info!("Placed {} cells", placed);
                }
            }
            event = client.poll_event() => match event? {
                Event::PlacementRejected(reason) => warn!("Placement rejected: {}", reason),
                other => debug!("{:?}", other),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, placed {} cells in total", placed);
                break;
            }
        }
    }

    Ok(())
}
