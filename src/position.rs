use chess::{Board, BoardStatus, ChessMove, Color};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::{AnalysisError, Result};

/// A game position identified by the UCI moves played from the initial position.
///
/// This is the universal key for analysis jobs, cache entries and book lookups.
/// Whitespace is normalized on construction so that two positions are equal
/// exactly when their move lists are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Position(String);

impl Position {
    /// Create a position from a space-separated UCI move string.
    pub fn new(uci: &str) -> Self {
        Position(uci.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    /// The initial position (no moves played).
    pub fn start() -> Self {
        Position(String::new())
    }

    /// Build a position from SAN moves, converting each to UCI through the rules library.
    pub fn from_san_moves<S: AsRef<str>>(san_moves: &[S]) -> Result<Self> {
        let mut board = Board::default();
        let mut uci_moves = Vec::with_capacity(san_moves.len());

        for san in san_moves {
            let san = san.as_ref();
            let chess_move = ChessMove::from_san(&board, san).map_err(|e| {
                AnalysisError::InvalidPosition(format!("cannot parse SAN move '{}': {}", san, e))
            })?;
            board = board.make_move_new(chess_move);
            uci_moves.push(chess_move.to_string());
        }

        Ok(Position(uci_moves.join(" ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_start(&self) -> bool {
        self.0.is_empty()
    }

    pub fn moves(&self) -> impl Iterator<Item = &str> {
        self.0.split_whitespace()
    }

    /// Number of plies played.
    pub fn len(&self) -> usize {
        self.moves().count()
    }

    pub fn is_empty(&self) -> bool {
        self.is_start()
    }

    /// Position reached after playing `uci_move`.
    pub fn push(&self, uci_move: &str) -> Position {
        if self.is_start() {
            Position::new(uci_move)
        } else {
            Position::new(&format!("{} {}", self.0, uci_move))
        }
    }

    /// Split off the last move, returning it together with the position before it.
    pub fn split_last(&self) -> Option<(String, Position)> {
        match self.0.rsplit_once(' ') {
            Some((prev, last)) => Some((last.to_string(), Position(prev.to_string()))),
            None if self.is_start() => None,
            None => Some((self.0.clone(), Position::start())),
        }
    }

    /// Whether this position starts with every move of `prefix`.
    pub fn starts_with(&self, prefix: &Position) -> bool {
        let mut moves = self.moves();
        prefix.moves().all(|mv| moves.next() == Some(mv))
    }

    /// Side to move, derived from the number of plies from the standard start.
    pub fn side_to_move(&self) -> Color {
        if self.len() % 2 == 0 {
            Color::White
        } else {
            Color::Black
        }
    }

    /// Replay the moves through the rules library, rejecting illegal sequences.
    pub fn board(&self) -> Result<Board> {
        let mut board = Board::default();
        for (ply, uci) in self.moves().enumerate() {
            let chess_move = ChessMove::from_str(uci).map_err(|_| {
                let message = format!("ply {}: '{}' is not a UCI move", ply + 1, uci);
                AnalysisError::InvalidPosition(message)
            })?;
            if !board.legal(chess_move) {
                return Err(AnalysisError::InvalidPosition(format!(
                    "ply {}: '{}' is illegal in '{}'",
                    ply + 1,
                    uci,
                    self
                )));
            }
            board = board.make_move_new(chess_move);
        }
        Ok(board)
    }

    /// Game status after the last move (ongoing, checkmate or stalemate).
    pub fn status(&self) -> Result<BoardStatus> {
        Ok(self.board()?.status())
    }

    /// The UCI `position` command that sets up this position.
    pub fn to_uci_command(&self) -> String {
        if self.is_start() {
            "position startpos".to_string()
        } else {
            format!("position startpos moves {}", self.0)
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Position {
    fn from(uci: &str) -> Self {
        Position::new(uci)
    }
}

impl From<String> for Position {
    fn from(uci: String) -> Self {
        Position::new(&uci)
    }
}

impl From<Position> for String {
    fn from(position: Position) -> Self {
        position.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_whitespace() {
        let position = Position::new("  e2e4   e7e5 ");
        assert_eq!(position.as_str(), "e2e4 e7e5");
        assert_eq!(position, Position::new("e2e4 e7e5"));
        assert_eq!(position.len(), 2);
    }

    #[test]
    fn test_push_and_split_last() {
        let start = Position::start();
        let after_e4 = start.push("e2e4");
        assert_eq!(after_e4.as_str(), "e2e4");

        let after_e5 = after_e4.push("e7e5");
        let (last, prev) = after_e5.split_last().unwrap();
        assert_eq!(last, "e7e5");
        assert_eq!(prev, after_e4);

        let (last, prev) = after_e4.split_last().unwrap();
        assert_eq!(last, "e2e4");
        assert!(prev.is_start());

        assert!(start.split_last().is_none());
    }

    #[test]
    fn test_side_to_move() {
        assert_eq!(Position::start().side_to_move(), Color::White);
        assert_eq!(Position::new("e2e4").side_to_move(), Color::Black);
        assert_eq!(Position::new("e2e4 e7e5").side_to_move(), Color::White);
    }

    #[test]
    fn test_board_replay_rejects_illegal_moves() {
        let board = Position::new("e2e4 e7e5 g1f3").board().unwrap();
        assert_eq!(board.side_to_move(), Color::Black);

        assert!(Position::new("e2e5").board().is_err());
        assert!(Position::new("e2e4 zz99").board().is_err());
    }

    #[test]
    fn test_from_san_moves() {
        let position = Position::from_san_moves(&["e4", "e5", "Nf3", "Nc6", "Bb5"]).unwrap();
        assert_eq!(position.as_str(), "e2e4 e7e5 g1f3 b8c6 f1b5");

        assert!(Position::from_san_moves(&["e4", "Ke3"]).is_err());
    }

    #[test]
    fn test_checkmate_status() {
        // Fool's mate
        let position = Position::new("f2f3 e7e5 g2g4 d8h4");
        assert_eq!(position.status().unwrap(), BoardStatus::Checkmate);
    }

    #[test]
    fn test_starts_with_is_move_wise() {
        let position = Position::new("e2e4 e7e5 g1f3");
        assert!(position.starts_with(&Position::new("e2e4 e7e5")));
        assert!(position.starts_with(&Position::start()));
        assert!(!position.starts_with(&Position::new("e2e4 e7e6")));
        assert!(!Position::new("e2e4").starts_with(&position));
    }

    #[test]
    fn test_uci_command() {
        assert_eq!(Position::start().to_uci_command(), "position startpos");
        assert_eq!(
            Position::new("d2d4").to_uci_command(),
            "position startpos moves d2d4"
        );
    }
}
