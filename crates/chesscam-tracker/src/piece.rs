use serde::{Deserialize, Serialize};
use shakmaty::{Color, Piece, Role};

/// The twelve piece classes a detection model can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PieceClass {
    WhitePawn,
    WhiteKnight,
    WhiteBishop,
    WhiteRook,
    WhiteQueen,
    WhiteKing,
    BlackPawn,
    BlackKnight,
    BlackBishop,
    BlackRook,
    BlackQueen,
    BlackKing,
}

impl PieceClass {
    pub const ALL: [PieceClass; 12] = [
        PieceClass::WhitePawn,
        PieceClass::WhiteKnight,
        PieceClass::WhiteBishop,
        PieceClass::WhiteRook,
        PieceClass::WhiteQueen,
        PieceClass::WhiteKing,
        PieceClass::BlackPawn,
        PieceClass::BlackKnight,
        PieceClass::BlackBishop,
        PieceClass::BlackRook,
        PieceClass::BlackQueen,
        PieceClass::BlackKing,
    ];

    pub fn color(self) -> Color {
        self.piece().color
    }

    pub fn role(self) -> Role {
        self.piece().role
    }

    pub fn piece(self) -> Piece {
        let (color, role) = match self {
            PieceClass::WhitePawn => (Color::White, Role::Pawn),
            PieceClass::WhiteKnight => (Color::White, Role::Knight),
            PieceClass::WhiteBishop => (Color::White, Role::Bishop),
            PieceClass::WhiteRook => (Color::White, Role::Rook),
            PieceClass::WhiteQueen => (Color::White, Role::Queen),
            PieceClass::WhiteKing => (Color::White, Role::King),
            PieceClass::BlackPawn => (Color::Black, Role::Pawn),
            PieceClass::BlackKnight => (Color::Black, Role::Knight),
            PieceClass::BlackBishop => (Color::Black, Role::Bishop),
            PieceClass::BlackRook => (Color::Black, Role::Rook),
            PieceClass::BlackQueen => (Color::Black, Role::Queen),
            PieceClass::BlackKing => (Color::Black, Role::King),
        };
        Piece { color, role }
    }

    pub fn from_piece(piece: Piece) -> Self {
        let offset = match piece.role {
            Role::Pawn => 0,
            Role::Knight => 1,
            Role::Bishop => 2,
            Role::Rook => 3,
            Role::Queen => 4,
            Role::King => 5,
        };
        let base = match piece.color {
            Color::White => 0,
            Color::Black => 6,
        };
        Self::ALL[base + offset]
    }

    /// FEN letter: uppercase for white, lowercase for black.
    pub fn fen_char(self) -> char {
        let c = match self.role() {
            Role::Pawn => 'p',
            Role::Knight => 'n',
            Role::Bishop => 'b',
            Role::Rook => 'r',
            Role::Queen => 'q',
            Role::King => 'k',
        };
        match self.color() {
            Color::White => c.to_ascii_uppercase(),
            Color::Black => c,
        }
    }

    pub fn from_fen_char(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|class| class.fen_char() == c)
    }
}

impl From<Piece> for PieceClass {
    fn from(piece: Piece) -> Self {
        Self::from_piece(piece)
    }
}

impl From<PieceClass> for Piece {
    fn from(class: PieceClass) -> Self {
        class.piece()
    }
}
