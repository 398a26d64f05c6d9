//! Chess rules seam.
//!
//! Everything legality related goes through [`RulesOracle`], so the resolver
//! and game state never generate moves themselves. [`StandardRules`] backs it
//! with `shakmaty`.

use shakmaty::fen::Fen;
use shakmaty::san::{San, SanPlus};
use shakmaty::{CastlingMode, Chess, EnPassantMode, File, Move, Position, Square};

use crate::piece::PieceClass;

/// FEN of the standard starting position.
pub const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RulesError {
    #[error("illegal move {uci} in position {fen}")]
    IllegalMove { uci: String, fen: String },
    #[error("invalid FEN {fen:?}: {reason}")]
    InvalidFen { fen: String, reason: String },
    #[error("cannot read move {text:?}: {reason}")]
    InvalidSan { text: String, reason: String },
    #[error("rules oracle failed: {0}")]
    Oracle(String),
}

/// Legal move generation and move application.
///
/// Implementations must be deterministic: the same position always yields
/// the same moves in the same order.
pub trait RulesOracle: Send + Sync {
    fn legal_moves(&self, position: &Chess) -> Result<Vec<Move>, RulesError>;

    /// Play `mv` on a copy of `position`. Fails if the move is not legal.
    fn apply(&self, position: &Chess, mv: &Move) -> Result<Chess, RulesError>;

    fn to_fen(&self, position: &Chess) -> String;

    fn is_terminal(&self, position: &Chess) -> bool;

    /// Standard algebraic notation including check and mate suffixes.
    fn san(&self, position: &Chess, mv: &Move) -> String;
}

/// Orthodox chess rules.
#[derive(Clone, Copy, Debug, Default)]
pub struct StandardRules;

impl RulesOracle for StandardRules {
    fn legal_moves(&self, position: &Chess) -> Result<Vec<Move>, RulesError> {
        Ok(position.legal_moves().into_iter().collect())
    }

    fn apply(&self, position: &Chess, mv: &Move) -> Result<Chess, RulesError> {
        position
            .clone()
            .play(mv)
            .map_err(|_| RulesError::IllegalMove {
                uci: coordinate_notation(mv),
                fen: self.to_fen(position),
            })
    }

    fn to_fen(&self, position: &Chess) -> String {
        Fen::from_position(position.clone(), EnPassantMode::Legal).to_string()
    }

    fn is_terminal(&self, position: &Chess) -> bool {
        position.is_game_over()
    }

    fn san(&self, position: &Chess, mv: &Move) -> String {
        let mut scratch = position.clone();
        SanPlus::from_move_and_play_unchecked(&mut scratch, mv).to_string()
    }
}

pub fn parse_fen(text: &str) -> Result<Chess, RulesError> {
    let invalid = |reason: String| RulesError::InvalidFen {
        fen: text.to_string(),
        reason,
    };
    let fen: Fen = text.trim().parse().map_err(|e| invalid(format!("{e}")))?;
    fen.into_position(CastlingMode::Standard)
        .map_err(|e| invalid(format!("{e}")))
}

/// Read a SAN move (check suffixes allowed) against `position`.
pub fn parse_san(position: &Chess, text: &str) -> Result<Move, RulesError> {
    let invalid = |reason: String| RulesError::InvalidSan {
        text: text.to_string(),
        reason,
    };
    let san: San = text
        .trim()
        .parse::<SanPlus>()
        .map_err(|e| invalid(format!("{e}")))?
        .san;
    san.to_move(position).map_err(|e| invalid(format!("{e}")))
}

/// Coordinate form such as `e2e4`, `e7e8q` or `e1g1` for castling.
pub fn coordinate_notation(mv: &Move) -> String {
    let (from, to) = match *mv {
        Move::Castle { king, rook } => {
            let file = if rook > king { File::G } else { File::C };
            (Some(king), Square::from_coords(file, king.rank()))
        }
        _ => (mv.from(), mv.to()),
    };
    let mut out = String::with_capacity(5);
    if let Some(from) = from {
        out.push_str(&from.to_string());
    }
    out.push_str(&to.to_string());
    if let Some(role) = mv.promotion() {
        out.push(role.char());
    }
    out
}

/// Piece placement of `position`, indexed by square (a1 = 0, h8 = 63).
pub fn placement(position: &Chess) -> [Option<PieceClass>; 64] {
    let board = position.board();
    let mut out = [None; 64];
    for sq in Square::ALL {
        out[sq as usize] = board.piece_at(sq).map(PieceClass::from_piece);
    }
    out
}
