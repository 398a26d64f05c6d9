//! Authoritative game: starting position, applied moves, derived views.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shakmaty::{Chess, Color, Move, Position};

use crate::rules::{coordinate_notation, parse_fen, parse_san, RulesError, RulesOracle, START_FEN};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error(transparent)]
    Rules(#[from] RulesError),
    #[error("no move to undo")]
    NothingToUndo,
}

/// One applied move and the position it produced.
#[derive(Clone, Debug)]
pub struct MoveRecord {
    /// 1-based ply index within this game.
    pub ply: usize,
    pub san: String,
    pub uci: String,
    pub fen_after: String,
    position: Chess,
}

impl MoveRecord {
    pub fn position(&self) -> &Chess {
        &self.position
    }
}

/// Persisted form of a game.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub starting_fen: String,
    pub moves: Vec<String>,
}

/// Read-only summary handed to observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameView {
    pub fen: String,
    pub move_text: String,
    pub plies: usize,
    pub last_san: Option<String>,
    pub is_terminal: bool,
    pub version: u64,
}

#[derive(Clone)]
pub struct GameState {
    rules: Arc<dyn RulesOracle>,
    starting_fen: String,
    start: Chess,
    history: Vec<MoveRecord>,
    version: u64,
}

impl fmt::Debug for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameState")
            .field("starting_fen", &self.starting_fen)
            .field("plies", &self.history.len())
            .field("version", &self.version)
            .finish()
    }
}

impl GameState {
    /// A game from the standard starting position.
    pub fn new(rules: Arc<dyn RulesOracle>) -> Self {
        Self {
            rules,
            starting_fen: START_FEN.to_string(),
            start: Chess::default(),
            history: Vec::new(),
            version: 0,
        }
    }

    pub fn from_fen(rules: Arc<dyn RulesOracle>, fen: &str) -> Result<Self, GameError> {
        let mut game = Self::new(rules);
        game.reset(Some(fen))?;
        game.version = 0;
        Ok(game)
    }

    /// Rebuild a game by replaying a stored record.
    pub fn from_record(rules: Arc<dyn RulesOracle>, record: &GameRecord) -> Result<Self, GameError> {
        let mut game = Self::from_fen(rules, &record.starting_fen)?;
        for san in &record.moves {
            game.apply_san(san)?;
        }
        Ok(game)
    }

    /// Replace this game with a replay of `record`, keeping the version
    /// counter increasing.
    pub fn load_record(&mut self, record: &GameRecord) -> Result<(), GameError> {
        let replayed = Self::from_record(self.rules.clone(), record)?;
        let version = self.version + 1;
        *self = replayed;
        self.version = version;
        Ok(())
    }

    #[inline]
    pub fn position(&self) -> &Chess {
        self.history
            .last()
            .map(|r| &r.position)
            .unwrap_or(&self.start)
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    #[inline]
    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    #[inline]
    pub fn starting_fen(&self) -> &str {
        &self.starting_fen
    }

    pub fn rules(&self) -> &Arc<dyn RulesOracle> {
        &self.rules
    }

    pub fn fen(&self) -> String {
        self.rules.to_fen(self.position())
    }

    pub fn is_terminal(&self) -> bool {
        self.rules.is_terminal(self.position())
    }

    /// Apply a legal move and append it to the history.
    pub fn apply_move(&mut self, mv: &Move) -> Result<MoveRecord, GameError> {
        let before = self.position();
        let san = self.rules.san(before, mv);
        let position = self.rules.apply(before, mv)?;
        let record = MoveRecord {
            ply: self.history.len() + 1,
            san,
            uci: coordinate_notation(mv),
            fen_after: self.rules.to_fen(&position),
            position,
        };
        self.history.push(record.clone());
        self.version += 1;
        Ok(record)
    }

    pub fn apply_san(&mut self, san: &str) -> Result<MoveRecord, GameError> {
        let mv = parse_san(self.position(), san)?;
        self.apply_move(&mv)
    }

    /// Remove the last move, restoring the exact prior position.
    pub fn undo_last(&mut self) -> Result<MoveRecord, GameError> {
        let record = self.history.pop().ok_or(GameError::NothingToUndo)?;
        self.version += 1;
        Ok(record)
    }

    /// Clear the history and start over from `fen`, or the standard start.
    pub fn reset(&mut self, fen: Option<&str>) -> Result<(), GameError> {
        let (start, starting_fen) = match fen {
            Some(fen) => {
                let start = parse_fen(fen)?;
                let normalized = self.rules.to_fen(&start);
                (start, normalized)
            }
            None => (Chess::default(), START_FEN.to_string()),
        };
        self.start = start;
        self.starting_fen = starting_fen;
        self.history.clear();
        self.version += 1;
        Ok(())
    }

    /// Compact text of the last two plies, e.g. `1...e5 2.Nf3`.
    pub fn move_text(&self) -> String {
        let len = self.history.len();
        let n = len / 2;
        match len {
            0 => String::new(),
            1 => format!("1. {}", self.history[0].san),
            _ => {
                let first = &self.history[len - 2].san;
                let second = &self.history[len - 1].san;
                if len % 2 == 0 {
                    format!("{n}.{first} {second}")
                } else {
                    format!("{n}...{first} {}.{second}", n + 1)
                }
            }
        }
    }

    pub fn to_record(&self) -> GameRecord {
        GameRecord {
            starting_fen: self.starting_fen.clone(),
            moves: self.history.iter().map(|r| r.san.clone()).collect(),
        }
    }

    /// Export as PGN with `[Result]`, `[SetUp]`/`[FEN]` for custom starts,
    /// and any extra header pairs.
    pub fn to_pgn(&self, headers: &[(&str, &str)]) -> String {
        let result = match self.position().outcome() {
            Some(outcome) => outcome.to_string(),
            None => "*".to_string(),
        };

        let mut out = String::new();
        for (key, value) in headers {
            out.push_str(&format!("[{key} \"{}\"]\n", escape(value)));
        }
        out.push_str(&format!("[Result \"{result}\"]\n"));
        if self.starting_fen != START_FEN {
            out.push_str("[SetUp \"1\"]\n");
            out.push_str(&format!("[FEN \"{}\"]\n", self.starting_fen));
        }
        out.push('\n');

        let mut number = self.start.fullmoves().get();
        let mut turn = self.start.turn();
        let mut tokens = Vec::with_capacity(self.history.len() * 3 / 2 + 1);
        for (i, record) in self.history.iter().enumerate() {
            match turn {
                Color::White => tokens.push(format!("{number}.")),
                Color::Black if i == 0 => tokens.push(format!("{number}...")),
                Color::Black => {}
            }
            tokens.push(record.san.clone());
            if turn == Color::Black {
                number += 1;
            }
            turn = !turn;
        }
        tokens.push(result);
        out.push_str(&tokens.join(" "));
        out.push('\n');
        out
    }

    pub fn view(&self) -> GameView {
        GameView {
            fen: self.fen(),
            move_text: self.move_text(),
            plies: self.history.len(),
            last_san: self.history.last().map(|r| r.san.clone()),
            is_terminal: self.is_terminal(),
            version: self.version,
        }
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::StandardRules;

    fn game() -> GameState {
        GameState::new(Arc::new(StandardRules))
    }

    fn play(game: &mut GameState, sans: &[&str]) {
        for san in sans {
            game.apply_san(san).unwrap();
        }
    }

    #[test]
    fn move_text_follows_the_last_two_plies() {
        let mut g = game();
        assert_eq!(g.move_text(), "");
        play(&mut g, &["e4"]);
        assert_eq!(g.move_text(), "1. e4");
        play(&mut g, &["e5"]);
        assert_eq!(g.move_text(), "1.e4 e5");
        play(&mut g, &["Nf3"]);
        assert_eq!(g.move_text(), "1...e5 2.Nf3");
        play(&mut g, &["Nc6"]);
        assert_eq!(g.move_text(), "2.Nf3 Nc6");
    }

    #[test]
    fn undo_restores_exact_position() {
        let mut g = game();
        play(&mut g, &["e4", "c5"]);
        let fen = g.fen();
        let version = g.version();
        let record = g.apply_san("Nf3").unwrap();
        assert_eq!(record.ply, 3);
        assert_eq!(record.uci, "g1f3");

        let undone = g.undo_last().unwrap();
        assert_eq!(undone.san, "Nf3");
        assert_eq!(g.fen(), fen);
        assert_eq!(g.history().len(), 2);
        assert_eq!(g.version(), version + 2);
    }

    #[test]
    fn undo_on_empty_history_fails() {
        assert_eq!(game().undo_last().unwrap_err(), GameError::NothingToUndo);
    }

    #[test]
    fn illegal_move_leaves_game_untouched() {
        let mut g = game();
        let err = g.apply_san("e5").unwrap_err();
        assert!(matches!(err, GameError::Rules(RulesError::InvalidSan { .. })));
        assert_eq!(g.version(), 0);
        assert!(g.history().is_empty());
    }

    #[test]
    fn record_round_trips_from_custom_start() {
        let rules: Arc<dyn RulesOracle> = Arc::new(StandardRules);
        let fen = "4k3/8/8/8/8/8/4P3/4K3 b - - 0 40";
        let mut g = GameState::from_fen(rules.clone(), fen).unwrap();
        play(&mut g, &["Kd7", "e4"]);

        let record = g.to_record();
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"startingFen\""));

        let back = GameState::from_record(rules, &serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(back.fen(), g.fen());
        assert_eq!(back.to_record(), record);
    }

    #[test]
    fn pgn_numbers_moves_and_marks_custom_start() {
        let mut g = game();
        play(&mut g, &["e4", "e5", "Nf3"]);
        let pgn = g.to_pgn(&[("Event", "Club \"night\"")]);
        assert!(pgn.starts_with("[Event \"Club \\\"night\\\"\"]\n[Result \"*\"]\n\n"));
        assert!(pgn.ends_with("1. e4 e5 2. Nf3 *\n"));

        let fen = "4k3/8/8/8/8/8/4P3/4K3 b - - 0 40";
        let mut g = GameState::from_fen(Arc::new(StandardRules), fen).unwrap();
        play(&mut g, &["Kd7", "e4"]);
        let pgn = g.to_pgn(&[]);
        assert!(pgn.contains("[FEN \"4k3/8/8/8/8/8/4P3/4K3 b - - 0 40\"]"));
        assert!(pgn.ends_with("40... Kd7 41. e4 *\n"));
    }

    #[test]
    fn finished_game_reports_result() {
        let mut g = game();
        play(&mut g, &["f3", "e5", "g4", "Qh4#"]);
        assert!(g.is_terminal());
        assert!(g.to_pgn(&[]).ends_with("0-1\n"));
    }
}
