use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::{CandidateMove, PovScore, Score};
use crate::backend_error;
use crate::config::EngineConfig;
use crate::config_error;
use crate::errors::{AnalysisError, Result};
use crate::position::Position;

/// A UCI engine subprocess owned by exactly one analysis call.
///
/// The process is released when the value is dropped: `quit` is sent, the
/// engine gets a short grace period to exit, and is then killed and reaped.
/// This runs on every exit path, including failed handshakes and analyses.
pub struct UciProcess {
    child: Child,
    stdin: BufWriter<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    name: Option<String>,
    multipv: usize,
    quit_grace: Duration,
}

impl UciProcess {
    /// Spawn the engine and complete the `uci` / `isready` handshake.
    ///
    /// `extra_options` are sent after the configured options.
    pub fn spawn(config: &EngineConfig, extra_options: &[(String, String)]) -> Result<Self> {
        if !config.is_configured() {
            return Err(config_error!("Engine executable is empty"));
        }

        let mut child = Command::new(&config.executable)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                let message = format!("Failed to start '{}': {}", config.executable, e);
                AnalysisError::BackendLaunch(message)
            })?;

        let stdin = match child.stdin.take() {
            Some(stdin) => BufWriter::new(stdin),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AnalysisError::BackendLaunch("Failed to get stdin".to_string()));
            }
        };
        let stdout = match child.stdout.take() {
            Some(stdout) => BufReader::new(stdout),
            None => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(AnalysisError::BackendLaunch("Failed to get stdout".to_string()));
            }
        };

        debug!(executable = %config.executable, pid = child.id(), "engine process started");

        let mut process = Self {
            child,
            stdin,
            stdout,
            name: None,
            multipv: 1,
            quit_grace: Duration::from_millis(config.quit_grace_ms),
        };

        let options = config
            .options
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .chain(extra_options.iter().cloned());
        process.initialize(options)?;

        Ok(process)
    }

    fn initialize(&mut self, options: impl Iterator<Item = (String, String)>) -> Result<()> {
        self.send_command("uci")?;

        loop {
            let response = self.read_line()?;
            if let Some(name) = response.strip_prefix("id name ") {
                self.name = Some(name.trim().to_string());
            } else if response == "uciok" {
                break;
            }
        }

        for (name, value) in options {
            self.set_option(&name, &value)?;
        }

        self.wait_ready()
    }

    fn wait_ready(&mut self) -> Result<()> {
        self.send_command("isready")?;
        loop {
            if self.read_line()? == "readyok" {
                return Ok(());
            }
        }
    }

    pub fn send_command(&mut self, command: &str) -> Result<()> {
        trace!(command, "uci >");
        writeln!(self.stdin, "{}", command)
            .map_err(|e| backend_error!("Send failed: {}", e))?;
        self.stdin
            .flush()
            .map_err(|e| backend_error!("Flush failed: {}", e))?;
        Ok(())
    }

    fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let read = self
            .stdout
            .read_line(&mut line)
            .map_err(|e| backend_error!("Read failed: {}", e))?;
        if read == 0 {
            return Err(backend_error!("Engine closed its output (exited or crashed)"));
        }
        let line = line.trim().to_string();
        trace!(line = %line, "uci <");
        Ok(line)
    }

    pub fn set_option(&mut self, name: &str, value: &str) -> Result<()> {
        self.send_command(&format!("setoption name {} value {}", name, value))
    }

    /// Engine name reported during the handshake.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// OS process id of the engine.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Search `position` for `time_budget` and return up to `breadth` ranked lines.
    pub fn analyze(
        &mut self,
        position: &Position,
        time_budget: Duration,
        breadth: usize,
    ) -> Result<Vec<CandidateMove>> {
        if breadth == 0 {
            return Err(config_error!("Breadth must be at least 1"));
        }
        position.board()?;

        if self.multipv != breadth {
            self.set_option("MultiPV", &breadth.to_string())?;
            self.wait_ready()?;
            self.multipv = breadth;
        }

        let turn = position.side_to_move();
        let movetime_ms = time_budget.as_millis().max(1);

        self.send_command(&position.to_uci_command())?;
        self.send_command(&format!("go movetime {}", movetime_ms))?;

        let mut lines: BTreeMap<usize, InfoLine> = BTreeMap::new();
        let best_move = loop {
            let response = self.read_line()?;
            if response.starts_with("info") {
                if let Some(info) = parse_info_line(&response) {
                    lines.insert(info.multipv, info);
                }
            } else if let Some(rest) = response.strip_prefix("bestmove") {
                break rest.split_whitespace().next().map(str::to_string);
            }
        };

        let mut candidates: Vec<CandidateMove> = lines
            .into_values()
            .filter(|info| !info.pv.is_empty())
            .take(breadth)
            .map(|info| CandidateMove {
                uci: info.pv[0].clone(),
                score: info.score.map(|score| PovScore::new(turn, score)),
                pv: info.pv,
                depth: info.depth,
            })
            .collect();

        // Engines may skip pv output for very short searches
        if candidates.is_empty() {
            if let Some(best) = best_move.filter(|mv| mv != "(none)") {
                candidates.push(CandidateMove {
                    pv: vec![best.clone()],
                    uci: best,
                    score: None,
                    depth: None,
                });
            }
        }

        debug!(
            position = %position,
            breadth,
            returned = candidates.len(),
            "engine analysis finished"
        );
        Ok(candidates)
    }
}

impl Drop for UciProcess {
    fn drop(&mut self) {
        let _ = self.send_command("quit");

        let deadline = Instant::now() + self.quit_grace;
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(5)),
                Ok(None) => {
                    warn!(pid = self.child.id(), "engine ignored quit, killing it");
                    break;
                }
                Err(_) => break,
            }
        }

        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// One parsed `info` line carrying a scored principal variation.
#[derive(Debug, Clone, PartialEq)]
pub struct InfoLine {
    pub multipv: usize,
    pub depth: Option<u32>,
    pub score: Option<Score>,
    pub pv: Vec<String>,
}

/// Parse a UCI `info` line.
///
/// Returns `None` for lines without a principal variation (`currmove`,
/// `string`, ...) and for bound-only scores, which are superseded by the next
/// exact line.
pub fn parse_info_line(line: &str) -> Option<InfoLine> {
    let mut tokens = line.split_whitespace();
    if tokens.next() != Some("info") {
        return None;
    }

    let mut info = InfoLine {
        multipv: 1,
        depth: None,
        score: None,
        pv: Vec::new(),
    };

    while let Some(token) = tokens.next() {
        match token {
            "depth" => info.depth = tokens.next().and_then(|v| v.parse().ok()),
            "multipv" => info.multipv = tokens.next().and_then(|v| v.parse().ok())?,
            "score" => {
                let kind = tokens.next()?;
                let value: i32 = tokens.next()?.parse().ok()?;
                info.score = match kind {
                    "cp" => Some(Score::Centipawns(value)),
                    "mate" => Some(Score::Mate(value)),
                    _ => return None,
                };
            }
            "lowerbound" | "upperbound" => return None,
            "string" => return None,
            "pv" => {
                info.pv = tokens.by_ref().map(str::to_string).collect();
            }
            _ => {}
        }
    }

    if info.pv.is_empty() {
        None
    } else {
        Some(info)
    }
}
