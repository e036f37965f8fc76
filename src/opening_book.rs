use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::info;

use crate::errors::{AnalysisError, Result};
use crate::position::Position;

/// Opening reference built from a flat corpus of UCI move sequences.
///
/// Each corpus line is one known game or line of theory. A line answers a
/// lookup when it starts with the queried position and continues past it.
/// The book is immutable after construction and can be shared between worker
/// threads behind an `Arc` without locking.
#[derive(Debug, Clone, Default)]
pub struct OpeningBook {
    lines: Vec<Vec<String>>,
}

impl OpeningBook {
    /// Create an empty opening book
    pub fn new() -> Self {
        Self::default()
    }

    /// Load one UCI line per row; blank rows are skipped.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref()).map_err(|e| {
            AnalysisError::Io(format!("cannot open book '{}': {}", path.as_ref().display(), e))
        })?;

        let mut rows = Vec::new();
        for row in BufReader::new(file).lines() {
            rows.push(row?);
        }

        let book = Self::from_lines(rows);
        info!(
            path = %path.as_ref().display(),
            lines = book.len(),
            "opening book loaded"
        );
        Ok(book)
    }

    pub fn from_lines<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines = rows
            .into_iter()
            .map(|row| row.as_ref().split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|moves| !moves.is_empty())
            .collect();
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    fn continuations<'a>(&'a self, position: &'a Position) -> impl Iterator<Item = &'a str> + 'a {
        let prefix: Vec<&str> = position.moves().collect();
        self.lines.iter().filter_map(move |line| {
            if line.len() > prefix.len() && line.iter().zip(&prefix).all(|(a, b)| a == b) {
                Some(line[prefix.len()].as_str())
            } else {
                None
            }
        })
    }

    /// Distinct next moves that follow `position` in the corpus.
    pub fn find(&self, position: &Position) -> BTreeSet<String> {
        self.continuations(position).map(str::to_string).collect()
    }

    /// Next moves ranked by how many corpus lines play them, ties broken alphabetically.
    pub fn find_ranked(&self, position: &Position) -> Vec<(String, usize)> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for mv in self.continuations(position) {
            *counts.entry(mv).or_insert(0) += 1;
        }

        let mut ranked: Vec<(String, usize)> = counts
            .into_iter()
            .map(|(mv, count)| (mv.to_string(), count))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Like [`OpeningBook::find`], but treats a miss as an error.
    pub fn require(&self, position: &Position) -> Result<BTreeSet<String>> {
        let moves = self.find(position);
        if moves.is_empty() {
            Err(AnalysisError::PositionNotInCorpus(position.to_string()))
        } else {
            Ok(moves)
        }
    }

    pub fn contains(&self, position: &Position) -> bool {
        self.continuations(position).next().is_some()
    }

    /// Get opening book statistics
    pub fn get_statistics(&self) -> OpeningBookStats {
        let total_lines = self.lines.len();
        let first_moves: BTreeSet<&str> = self
            .lines
            .iter()
            .filter_map(|line| line.first().map(String::as_str))
            .collect();

        OpeningBookStats {
            total_lines,
            distinct_first_moves: first_moves.len(),
            avg_line_length: if total_lines > 0 {
                self.lines.iter().map(Vec::len).sum::<usize>() as f32 / total_lines as f32
            } else {
                0.0
            },
        }
    }
}

/// Statistics about the opening book coverage
#[derive(Debug, Clone)]
pub struct OpeningBookStats {
    pub total_lines: usize,
    pub distinct_first_moves: usize,
    pub avg_line_length: f32,
}
