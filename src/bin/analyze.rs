use chess_analysis_core::{AnalysisConfig, AnalysisPool, BackendKind, Position};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Analyse one position with a configured engine.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Position as space-separated UCI moves from the initial position
    #[arg(default_value = "")]
    moves: String,

    /// Engine family: classical (stockfish) or neural (lczero)
    #[arg(short, long, default_value = "classical")]
    engine: BackendKind,

    /// Thinking time in milliseconds
    #[arg(short, long, default_value = "1000")]
    time_ms: u64,

    /// Number of candidate moves to report
    #[arg(short, long, default_value = "3")]
    breadth: usize,

    /// JSON configuration file; the environment is used when absent
    #[arg(short, long)]
    config: Option<PathBuf>,
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

    let config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)?,
        None => AnalysisConfig::from_env()?,
    };

    let position = Position::new(&args.moves);
    // Reject illegal input before starting an engine
    position.board()?;

    let pool = AnalysisPool::from_config(&config)?;
    let result = pool.submit_and_await(
        &position,
        args.engine,
        Duration::from_millis(args.time_ms),
        args.breadth,
    )?;
    pool.shutdown();

    let label = if position.is_start() { "startpos" } else { position.as_str() };
    println!("Position: {}", label);
    println!("Source: {:?}", result.source);
    let pov = position.side_to_move();
    for (rank, candidate) in result.candidates.iter().enumerate() {
        let score = candidate
            .score
            .map(|score| score.pov(pov).to_string())
            .unwrap_or_else(|| "book".to_string());
        println!(
            "{:>2}. {:<6} {:>8}  {}",
            rank + 1,
            candidate.uci,
            score,
            candidate.pv.join(" ")
        );
    }

    Ok(())
}
