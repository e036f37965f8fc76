use chess::{Board, ChessMove};
use indicatif::{ProgressBar, ProgressStyle};
use pgn_reader::{BufferedReader, RawHeader, SanPlus, Skip, Visitor};
use rayon::prelude::*;
use rusqlite::{params, Connection};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info, warn};

use crate::distribution::{MoveDistribution, MoveStatistics};
use crate::errors::{AnalysisError, Result};
use crate::position::Position;
use crate::utils::lock;

/// One stored game: its moves in UCI plus the headers worth querying.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameRecord {
    pub uci: Position,
    pub event: Option<String>,
    pub white: Option<String>,
    pub black: Option<String>,
    pub result: Option<String>,
    pub white_elo: Option<i32>,
    pub black_elo: Option<i32>,
    pub eco: Option<String>,
    pub opening: Option<String>,
}

impl GameRecord {
    pub fn new(uci: impl Into<Position>) -> Self {
        Self {
            uci: uci.into(),
            ..Self::default()
        }
    }
}

/// SQLite-backed corpus of played games, the statistics source for exploration.
pub struct GameDatabase {
    conn: Mutex<Connection>,
}

impl GameDatabase {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let db = GameDatabase {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = GameDatabase {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        let conn = lock(&self.conn);
        conn.execute(
            "CREATE TABLE IF NOT EXISTS games (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uci TEXT NOT NULL,
                event TEXT,
                white TEXT,
                black TEXT,
                result TEXT,
                white_elo INTEGER,
                black_elo INTEGER,
                eco TEXT,
                opening TEXT
            )",
            [],
        )?;
        conn.execute("CREATE INDEX IF NOT EXISTS idx_games_uci ON games(uci)", [])?;
        Ok(())
    }

    pub fn add_game(&self, game: &GameRecord) -> Result<i64> {
        let conn = lock(&self.conn);
        insert_game(&conn, game)?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert all games in one transaction.
    pub fn add_games(&self, games: &[GameRecord]) -> Result<usize> {
        let mut conn = lock(&self.conn);
        let tx = conn.transaction()?;
        for game in games {
            insert_game(&tx, game)?;
        }
        tx.commit()?;
        Ok(games.len())
    }

    pub fn game_count(&self) -> Result<usize> {
        let conn = lock(&self.conn);
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM games", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Parse a PGN file, convert every main line to UCI and store the games.
    ///
    /// Games whose moves cannot be replayed are skipped. Returns the number of
    /// games stored.
    pub fn import_pgn<P: AsRef<Path>>(
        &self,
        path: P,
        max_games: Option<usize>,
        show_progress: bool,
    ) -> Result<usize> {
        let games = split_pgn_games(path.as_ref(), max_games)?;
        info!(path = %path.as_ref().display(), games = games.len(), "Collected PGN games");

        let pb = if show_progress {
            ProgressBar::new(games.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
        ) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let records: Vec<GameRecord> = games
            .par_iter()
            .filter_map(|game_pgn| {
                pb.inc(1);
                let mut extractor = UciExtractor::default();
                let mut reader = BufferedReader::new(std::io::Cursor::new(game_pgn));
                match reader.read_game(&mut extractor) {
                    Ok(Some(record)) => record,
                    Ok(None) => None,
                    Err(e) => {
                        debug!(error = %e, "PGN parse error");
                        None
                    }
                }
            })
            .collect();

        pb.finish_and_clear();

        let skipped = games.len() - records.len();
        if skipped > 0 {
            warn!(skipped, "Skipped games with unreadable moves");
        }

        let stored = self.add_games(&records)?;
        info!(stored, "Imported games");
        Ok(stored)
    }
}

fn insert_game(conn: &Connection, game: &GameRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO games (uci, event, white, black, result, white_elo, black_elo, eco, opening)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            game.uci.as_str(),
            game.event,
            game.white,
            game.black,
            game.result,
            game.white_elo,
            game.black_elo,
            game.eco,
            game.opening
        ],
    )?;
    Ok(())
}

/// Next-move counts over the games matching `condition`; `?1` is the 1-based
/// offset where the next move starts.
fn next_move_query(condition: &str) -> String {
    format!(
        "SELECT next, COUNT(*) FROM (
             SELECT CASE WHEN instr(rest, ' ') > 0
                         THEN substr(rest, 1, instr(rest, ' ') - 1)
                         ELSE rest END AS next
             FROM (SELECT substr(uci, ?1) AS rest FROM games WHERE {})
         )
         WHERE next != ''
         GROUP BY next",
        condition
    )
}

const CONTINUES_PAST: &str = "uci >= ?2 AND uci < ?3";

fn count_next_moves<P: rusqlite::Params>(
    conn: &Connection,
    condition: &str,
    params: P,
) -> Result<MoveDistribution> {
    let mut stmt = conn.prepare(&next_move_query(condition))?;
    let rows = stmt.query_map(params, |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;

    let mut distribution = MoveDistribution::new();
    for row in rows {
        let (next, count) = row?;
        distribution.add(next, count as u64);
    }
    Ok(distribution)
}

impl MoveStatistics for GameDatabase {
    /// Count the move played right after `position` across all games that
    /// continue past it.
    fn next_move_distribution(&self, position: &Position) -> Result<MoveDistribution> {
        let conn = lock(&self.conn);
        if position.is_start() {
            return count_next_moves(&conn, "1", params![1i64]);
        }

        // Continuations of "<moves>" sort within ["<moves> ", "<moves>!")
        let lower = format!("{} ", position.as_str());
        let upper = format!("{}!", position.as_str());
        let offset = lower.len() as i64 + 1;
        count_next_moves(&conn, CONTINUES_PAST, params![offset, lower, upper])
    }
}

/// Split a PGN file into one string per game, cut after each result token.
fn split_pgn_games(path: &Path, max_games: Option<usize>) -> Result<Vec<String>> {
    let file = File::open(path).map_err(|e| {
        AnalysisError::Io(format!("cannot open PGN '{}': {}", path.display(), e))
    })?;

    let mut games = Vec::new();
    let mut current_game = String::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        current_game.push_str(&line);
        current_game.push('\n');

        let trimmed = line.trim();
        let ends_game = !trimmed.starts_with('[')
            && (trimmed.ends_with("1-0")
                || trimmed.ends_with("0-1")
                || trimmed.ends_with("1/2-1/2")
                || trimmed.ends_with('*'));
        if ends_game {
            games.push(std::mem::take(&mut current_game));
            if max_games.is_some_and(|max| games.len() >= max) {
                break;
            }
        }
    }
    Ok(games)
}

/// PGN visitor converting the main line to UCI and keeping the useful headers.
#[derive(Default)]
struct UciExtractor {
    board: Board,
    record: GameRecord,
    moves: Vec<String>,
    invalid: bool,
}

impl Visitor for UciExtractor {
    type Result = Option<GameRecord>;

    fn begin_game(&mut self) {
        *self = UciExtractor::default();
    }

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        let text = value.decode_utf8_lossy().into_owned();
        match key {
            b"Event" => self.record.event = Some(text),
            b"White" => self.record.white = Some(text),
            b"Black" => self.record.black = Some(text),
            b"Result" => self.record.result = Some(text),
            b"WhiteElo" => self.record.white_elo = text.parse().ok(),
            b"BlackElo" => self.record.black_elo = text.parse().ok(),
            b"ECO" => self.record.eco = Some(text),
            b"Opening" => self.record.opening = Some(text),
            _ => {}
        }
    }

    fn san(&mut self, san_plus: SanPlus) {
        if self.invalid {
            return;
        }
        let san = san_plus.san.to_string();
        match ChessMove::from_san(&self.board, &san) {
            Ok(chess_move) if self.board.legal(chess_move) => {
                self.board = self.board.make_move_new(chess_move);
                self.moves.push(chess_move.to_string());
            }
            _ => self.invalid = true,
        }
    }

    fn begin_variation(&mut self) -> Skip {
        Skip(true)
    }

    fn end_game(&mut self) -> Self::Result {
        if self.invalid || self.moves.is_empty() {
            return None;
        }
        let mut record = std::mem::take(&mut self.record);
        record.uci = Position::new(&self.moves.join(" "));
        Some(record)
    }
}
