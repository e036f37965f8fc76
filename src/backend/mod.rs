//! Analysis backends.
//!
//! Every engine is reached through the [`Analyzer`] capability. The set of
//! engines is closed: [`EngineBackend`] is either the classical alpha-beta
//! searcher or the neural-network driven one, both spoken to over UCI and both
//! normalized to the same score convention (see [`PovScore`]).

pub mod uci;

use chess::Color;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::config::{AnalysisConfig, EngineConfig};
use crate::config_error;
use crate::errors::{AnalysisError, Result};
use crate::position::Position;

pub use uci::{parse_info_line, InfoLine, UciProcess};

/// Score magnitude used for forced mates; mate in `n` maps to `MATE_SCORE - n`.
pub const MATE_SCORE: i32 = 100_000;

/// Which engine family analyses a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    /// Alpha-beta search engine (Stockfish-like)
    Classical,
    /// Neural-network driven engine (Lc0-like), optionally with a weights file
    Neural,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Classical => "classical",
            BackendKind::Neural => "neural",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "classical" | "stockfish" => Ok(BackendKind::Classical),
            "neural" | "lczero" | "lc0" => Ok(BackendKind::Neural),
            other => Err(config_error!("Unknown engine type: {}", other)),
        }
    }
}

/// Raw engine score, relative to the side to move of the analysed position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Score {
    Centipawns(i32),
    /// Mate in `n` moves; negative when the side to move gets mated, 0 when already mated
    Mate(i32),
}

impl Score {
    /// Collapse to a single centipawn-like number, preferring faster mates.
    pub fn value(&self) -> i32 {
        match *self {
            Score::Centipawns(cp) => cp,
            Score::Mate(n) if n > 0 => MATE_SCORE - n,
            Score::Mate(n) => -MATE_SCORE - n,
        }
    }
}

/// A score tagged with the side it is relative to.
///
/// Every backend reports scores from the side to move's point of view; keeping
/// that side next to the number lets consumers re-express it for any player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PovScore {
    pub turn: Color,
    pub score: Score,
}

impl PovScore {
    pub fn new(turn: Color, score: Score) -> Self {
        Self { turn, score }
    }

    /// Score from `color`'s point of view: positive means `color` is better.
    pub fn pov(&self, color: Color) -> i32 {
        if color == self.turn {
            self.score.value()
        } else {
            -self.score.value()
        }
    }
}

/// A move suggested by a backend or the opening book.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMove {
    pub uci: String,
    /// Absent for book moves
    pub score: Option<PovScore>,
    /// Principal variation starting with `uci`
    pub pv: Vec<String>,
    pub depth: Option<u32>,
}

impl CandidateMove {
    pub fn book(uci: impl Into<String>) -> Self {
        let uci = uci.into();
        Self {
            pv: vec![uci.clone()],
            uci,
            score: None,
            depth: None,
        }
    }
}

/// Where an analysis result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultSource {
    Book,
    Engine(BackendKind),
}

/// Ranked candidates for one request, best first, never longer than the requested breadth.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub candidates: Vec<CandidateMove>,
    pub source: ResultSource,
}

impl AnalysisResult {
    pub fn best(&self) -> Option<&CandidateMove> {
        self.candidates.first()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn moves(&self) -> Vec<&str> {
        self.candidates.iter().map(|c| c.uci.as_str()).collect()
    }

    pub fn is_book(&self) -> bool {
        self.source == ResultSource::Book
    }
}

/// The analysis capability every backend provides.
pub trait Analyzer {
    /// Analyse `position` for roughly `time_budget`, returning up to `breadth` lines.
    fn analyze(
        &mut self,
        position: &Position,
        time_budget: Duration,
        breadth: usize,
    ) -> Result<AnalysisResult>;
}

/// Creates a fresh analyzer per job; the analyzer is dropped when the job finishes.
pub trait AnalyzerFactory: Send + Sync {
    fn create(&self, kind: BackendKind) -> Result<Box<dyn Analyzer + Send>>;
}

/// A live engine of one of the supported families.
pub enum EngineBackend {
    Classical(UciProcess),
    Neural(UciProcess),
}

impl EngineBackend {
    /// Spawn and configure the engine for `kind`.
    ///
    /// Fails with a configuration error before spawning anything when no
    /// executable is configured.
    pub fn launch(kind: BackendKind, config: &EngineConfig) -> Result<Self> {
        if !config.is_configured() {
            return Err(config_error!("No executable configured for {} backend", kind));
        }

        match kind {
            BackendKind::Classical => Ok(EngineBackend::Classical(UciProcess::spawn(config, &[])?)),
            BackendKind::Neural => {
                let mut extra = Vec::new();
                if let Some(weights) = &config.weights {
                    extra.push(("WeightsFile".to_string(), weights.display().to_string()));
                }
                Ok(EngineBackend::Neural(UciProcess::spawn(config, &extra)?))
            }
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            EngineBackend::Classical(_) => BackendKind::Classical,
            EngineBackend::Neural(_) => BackendKind::Neural,
        }
    }

    pub fn process(&self) -> &UciProcess {
        match self {
            EngineBackend::Classical(process) | EngineBackend::Neural(process) => process,
        }
    }
}

impl Analyzer for EngineBackend {
    fn analyze(
        &mut self,
        position: &Position,
        time_budget: Duration,
        breadth: usize,
    ) -> Result<AnalysisResult> {
        let kind = self.kind();
        let process = match self {
            EngineBackend::Classical(process) | EngineBackend::Neural(process) => process,
        };
        let candidates = process.analyze(position, time_budget, breadth)?;
        Ok(AnalysisResult {
            candidates,
            source: ResultSource::Engine(kind),
        })
    }
}

/// Production factory: launches engine processes from an [`AnalysisConfig`].
#[derive(Debug, Clone)]
pub struct EngineFactory {
    classical: EngineConfig,
    neural: EngineConfig,
}

impl EngineFactory {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            classical: config.classical.clone(),
            neural: config.neural.clone(),
        }
    }

    pub fn engine_config(&self, kind: BackendKind) -> &EngineConfig {
        match kind {
            BackendKind::Classical => &self.classical,
            BackendKind::Neural => &self.neural,
        }
    }
}

impl AnalyzerFactory for EngineFactory {
    fn create(&self, kind: BackendKind) -> Result<Box<dyn Analyzer + Send>> {
        let backend = EngineBackend::launch(kind, self.engine_config(kind))?;
        Ok(Box::new(backend))
    }
}
