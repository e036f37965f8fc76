//! # Chess Analysis Core
//!
//! Coordination layer between callers that want chess analysis and the
//! engines, opening corpus and game statistics that provide it.
//!
//! ## Features
//!
//! - **Backend adapter**: classical and neural UCI engines behind one [`Analyzer`] capability
//! - **Opening reference**: corpus lookups consulted before any engine is started
//! - **Job coordinator**: deduplicated submit/await over a bounded worker pool
//! - **Exploration cache**: durable position → move-frequency map, filled by a pruned tree walk
//! - **Move evaluator**: grades a played move against the engine's best line
//!
//! ## Quick Start
//!
//! ```rust
//! use chess_analysis_core::{OpeningBook, Position};
//!
//! let book = OpeningBook::from_lines(["e2e4 e7e5 g1f3", "e2e4 c7c5", "d2d4 d7d5"]);
//!
//! let after_e4 = Position::start().push("e2e4");
//! let replies = book.find(&after_e4);
//! assert!(replies.contains("e7e5"));
//! assert!(replies.contains("c7c5"));
//! ```
//!
//! Positions are move sequences from the initial position, in UCI notation.
//! Scores are centipawns relative to the side to move; see [`PovScore`].

// Core modules
pub mod errors;
pub mod utils;

pub use errors::{AnalysisError, Result};

pub mod backend;
pub mod config;
pub mod coordinator;
pub mod distribution;
pub mod evaluator;
pub mod explorer;
pub mod games;
pub mod opening_book;
pub mod persistence;
pub mod position;
pub mod trainer;

pub use backend::{
    AnalysisResult, Analyzer, AnalyzerFactory, BackendKind, CandidateMove, EngineBackend,
    EngineFactory, PovScore, ResultSource, Score, UciProcess, MATE_SCORE,
};
pub use config::{AnalysisConfig, EngineConfig, ExplorerConfig, TrainerConfig};
pub use coordinator::{AnalysisPool, JobId, JobKey, JobState};
pub use distribution::{MoveDistribution, MoveStatistics};
pub use evaluator::{Hint, MoveEvaluator, MoveQuality};
pub use explorer::{DistributionCache, ExploreOptions, ExploreReport, Explorer};
pub use games::{GameDatabase, GameRecord};
pub use opening_book::{OpeningBook, OpeningBookStats};
pub use persistence::DistributionStore;
pub use position::Position;
pub use trainer::{sample_move, Trainer, TrainerReply};
