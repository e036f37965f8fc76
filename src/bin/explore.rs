use chess_analysis_core::{AnalysisConfig, ExploreOptions, Explorer, GameDatabase, Position};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn default_workers() -> usize {
    (num_cpus::get() / 2).max(1)
}

/// Multi-threaded explorer of move distributions.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of worker threads querying the games database
    #[arg(long, default_value_t = default_workers())]
    num_workers: usize,

    /// Depth of the exploration
    #[arg(long, default_value = "3")]
    depth: usize,

    /// Minimum ratio of occurrences to continue exploration
    #[arg(long, default_value = "0.05")]
    stop_threshold: f64,

    /// Distribution cache file (defaults to EXPLORER_CACHE_PATH)
    #[arg(long)]
    cache: Option<PathBuf>,

    /// SQLite games database to read statistics from
    #[arg(long, default_value = "games.db")]
    games_db: PathBuf,

    /// Start position as space-separated UCI moves
    #[arg(long, default_value = "")]
    start: String,

    /// Hide the progress spinner
    #[arg(long)]
    quiet: bool,
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

    let mut config = AnalysisConfig::from_env()?.explorer;
    config.num_workers = args.num_workers;
    config.max_depth = args.depth;
    config.stop_threshold = args.stop_threshold;
    if let Some(cache) = args.cache {
        config.cache_path = Some(cache);
    }

    info!(
        games_db = %args.games_db.display(),
        workers = config.num_workers,
        depth = config.max_depth,
        stop_threshold = config.stop_threshold,
        "Starting exploration"
    );

    let games = GameDatabase::open(&args.games_db)?;
    let explorer = Explorer::from_config(games, &config)?;

    let start = Position::new(&args.start);
    let options = ExploreOptions::from(&config).with_progress(!args.quiet);

    let started = Instant::now();
    let report = explorer.explore_with(&start, &options)?;
    explorer.shutdown();

    let stats = explorer.cache().stats();
    println!("Explored {} positions in {:.1?}", report.visited.len(), started.elapsed());
    println!("  expanded: {}", report.expanded);
    println!("  pruned moves: {}", report.pruned);
    println!("  deepest ply: {}", report.deepest);
    println!(
        "  cache: {} entries, {} hits, {} misses",
        stats.size, stats.hits, stats.misses
    );

    Ok(())
}
