use chess_analysis_core::GameDatabase;
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Import PGN games into the statistics database.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// PGN file to import
    #[arg(short, long)]
    input: PathBuf,

    /// SQLite games database
    #[arg(short, long, default_value = "games.db")]
    database: PathBuf,

    /// Maximum number of games to import
    #[arg(short, long)]
    max_games: Option<usize>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("chess_analysis_core=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let db = GameDatabase::open(&args.database)?;
    let before = db.game_count()?;

    let started = Instant::now();
    let stored = db.import_pgn(&args.input, args.max_games, true)?;

    println!(
        "Imported {} games in {:.1?} ({} total in {})",
        stored,
        started.elapsed(),
        before + stored,
        args.database.display()
    );
    Ok(())
}
