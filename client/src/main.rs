use clap::Parser;
use client::network::{Client, Event};
use log::{error, info};
use shared::Cell;
use tokio::time::{interval, Duration, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Cell to place once synchronized, as x,y,color (repeatable)
    #[arg(short = 'p', long = "place", value_parser = parse_cell)]
    place: Vec<(i64, i64, i64)>,

    /// Print the synchronized board and exit
    #[arg(short = 'd', long)]
    dump: bool,

    /// Seconds between stats lines
    #[arg(long, default_value = "10")]
    stats_interval: u64,
}

fn parse_cell(value: &str) -> Result<(i64, i64, i64), String> {
    let parts = value
        .split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| format!("{}: {}", value, e))?;

    match parts.as_slice() {
        [x, y, color] => Ok((*x, *y, *color)),
        _ => Err(format!("expected x,y,color, got {}", value)),
    }
}

/// One hex digit per cell, one line per row
fn render(client: &Client) -> String {
    let Some(replica) = client.replica() else {
        return String::new();
    };

    let columns = replica.columns() as usize;
    let mut rows = vec![vec!['?'; columns]; columns];
    for (x, y, color) in replica.points() {
        rows[y as usize][x as usize] = char::from_digit(color as u32, 16).unwrap_or('?');
    }

    rows.into_iter()
        .map(|row| row.into_iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut client = Client::connect(&args.server).await?;
    let replayed = client.synchronize().await?;
    info!("Board ready, {} update(s) replayed", replayed);

    for (x, y, color) in &args.place {
        match client.place(*x, *y, *color).await {
            Ok(Cell { x, y, color }) => info!("Placed color {} at ({}, {})", color, x, y),
            Err(e) => error!("Couldn't place ({}, {}, {}): {}", x, y, color, e),
        }
    }

    if args.dump {
        println!("{}", render(&client));
        return Ok(());
    }

    let mut stats_timer = interval(Duration::from_secs(args.stats_interval.max(1)));
    stats_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = client.poll_event() => match event? {
                Event::Incoming(cell) => {
                    info!("Cell ({}, {}) is now color {}", cell.x, cell.y, cell.color);
                }
                Event::UserCount(count) => info!("{} user(s) online", count),
                Event::PlacementRejected(reason) => error!("Placement rejected: {}", reason),
            },
            _ = stats_timer.tick() => {
                let stats = client.stats();
                info!(
                    "users={} placed={} received={} last_error={}",
                    stats.connected_users,
                    stats.placed_by_self,
                    stats.placed_by_others,
                    stats.last_error.as_deref().unwrap_or("none")
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving");
                break;
            }
        }
    }

    Ok(())
}
