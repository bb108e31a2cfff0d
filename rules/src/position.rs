//! Pure rule evaluation over a chess position.
//!
//! `Position::apply` never mutates `self`: it returns the resulting position
//! together with the notation and any terminal flag, or a rejection. Callers
//! own the authoritative position and decide what to do with the result.

use std::collections::HashMap;

use cozy_chess::{Board, Color, Move, Piece, Rank, Square};

use crate::types::{file_index, file_to_char, rank_to_char, PieceKind, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<PieceKind>,
}

impl CandidateMove {
    /// Build a candidate from wire-level square strings and an optional
    /// promotion piece character.
    pub fn parse(from: &str, to: &str, promotion: Option<&str>) -> Result<Self, MoveRejected> {
        let from = crate::types::parse_square(from)
            .ok_or_else(|| MoveRejected::BadSquare(from.to_string()))?;
        let to = crate::types::parse_square(to)
            .ok_or_else(|| MoveRejected::BadSquare(to.to_string()))?;
        let promotion = match promotion {
            None => None,
            Some(p) => Some(
                crate::types::parse_piece(p).ok_or_else(|| MoveRejected::BadPiece(p.to_string()))?,
            ),
        };
        Ok(Self {
            from,
            to,
            promotion,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoveRejected {
    #[error("illegal move")]
    Illegal,
    #[error("invalid square: {0}")]
    BadSquare(String),
    #[error("invalid promotion piece: {0}")]
    BadPiece(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PositionError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
}

/// Why a position is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalFlag {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    Repetition,
}

impl TerminalFlag {
    pub fn reason(self) -> &'static str {
        match self {
            Self::Checkmate => "checkmate",
            Self::Stalemate => "stalemate",
            Self::InsufficientMaterial => "insufficient material",
            Self::FiftyMoveRule => "fifty-move rule",
            Self::Repetition => "threefold repetition",
        }
    }

    /// Checkmate is the only flag that produces a winner; every other
    /// terminal flag is a draw.
    pub fn is_decisive(self) -> bool {
        matches!(self, Self::Checkmate)
    }
}

/// Result of a successfully applied move.
#[derive(Debug, Clone)]
pub struct Applied {
    pub position: Position,
    /// The move as actually played, with castling normalized and any
    /// defaulted promotion filled in.
    pub mv: Move,
    pub san: String,
    pub terminal: Option<TerminalFlag>,
}

/// Board state plus the repetition table needed for the threefold rule.
///
/// The table maps position hashes to occurrence counts and is cleared
/// whenever the halfmove clock resets: an irreversible move makes every
/// earlier position unreachable.
#[derive(Debug, Clone)]
pub struct Position {
    board: Board,
    repetitions: HashMap<u64, u8>,
}

impl Position {
    pub fn startpos() -> Self {
        Self::from_board(Board::default())
    }

    pub fn from_fen(fen: &str) -> Result<Self, PositionError> {
        let board: Board = fen
            .parse()
            .map_err(|_| PositionError::InvalidFen(fen.to_string()))?;
        Ok(Self::from_board(board))
    }

    fn from_board(board: Board) -> Self {
        let mut repetitions = HashMap::new();
        repetitions.insert(board.hash(), 1);
        Self {
            board,
            repetitions,
        }
    }

    pub fn fen(&self) -> String {
        self.board.to_string()
    }

    pub fn side_to_move(&self) -> Side {
        self.board.side_to_move().into()
    }

    pub fn in_check(&self) -> bool {
        !self.board.checkers().is_empty()
    }

    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves = Vec::new();
        self.board.generate_moves(|mvs| {
            moves.extend(mvs);
            false
        });
        moves
    }

    /// Evaluate a candidate move against this position.
    ///
    /// Deterministic for identical inputs and side-effect free: on rejection
    /// the caller's position is untouched by construction.
    pub fn apply(&self, candidate: CandidateMove) -> Result<Applied, MoveRejected> {
        let legal = self.legal_moves();
        let mv = self.resolve(candidate, &legal)?;
        let piece = self.board.piece_on(mv.from).ok_or(MoveRejected::Illegal)?;
        let san = self.san_for(mv, piece);

        let mut board = self.board.clone();
        board.play_unchecked(mv);

        let mut repetitions = self.repetitions.clone();
        if board.halfmove_clock() == 0 {
            repetitions.clear();
        }
        let entry = repetitions.entry(board.hash()).or_insert(0);
        *entry += 1;
        let occurrences = *entry;

        let position = Position {
            board,
            repetitions,
        };
        let terminal = position.terminal_flag(occurrences);
        Ok(Applied {
            position,
            mv,
            san,
            terminal,
        })
    }

    /// Map a wire-level candidate onto a legal move. Handles the two
    /// encoding quirks clients produce: promotion moves without a piece
    /// hint (default queen) and UCI-style castling (king two files), which
    /// the move generator encodes as king-takes-own-rook.
    fn resolve(&self, candidate: CandidateMove, legal: &[Move]) -> Result<Move, MoveRejected> {
        let mut promotion = candidate.promotion.map(Piece::from);
        if promotion.is_none()
            && self.board.piece_on(candidate.from) == Some(Piece::Pawn)
            && candidate.to.rank() == promotion_rank(self.board.side_to_move())
        {
            promotion = Some(Piece::Queen);
        }

        let mv = Move {
            from: candidate.from,
            to: candidate.to,
            promotion,
        };
        if legal.contains(&mv) {
            return Ok(mv);
        }

        if let Some(remapped) = remap_castling(mv) {
            if legal.contains(&remapped) {
                return Ok(remapped);
            }
        }

        Err(MoveRejected::Illegal)
    }

    fn terminal_flag(&self, occurrences: u8) -> Option<TerminalFlag> {
        if self.legal_moves().is_empty() {
            return Some(if self.in_check() {
                TerminalFlag::Checkmate
            } else {
                TerminalFlag::Stalemate
            });
        }
        if self.board.halfmove_clock() >= 100 {
            return Some(TerminalFlag::FiftyMoveRule);
        }
        if occurrences >= 3 {
            return Some(TerminalFlag::Repetition);
        }
        if self.insufficient_material() {
            return Some(TerminalFlag::InsufficientMaterial);
        }
        None
    }

    /// King vs king, optionally with a single minor piece on either side.
    fn insufficient_material(&self) -> bool {
        let board = &self.board;
        let heavy = board.pieces(Piece::Pawn) | board.pieces(Piece::Rook) | board.pieces(Piece::Queen);
        if !heavy.is_empty() {
            return false;
        }
        let minors = board.pieces(Piece::Knight) | board.pieces(Piece::Bishop);
        minors.len() <= 1
    }

    /// Simplified SAN: no check suffixes or file disambiguation.
    fn san_for(&self, mv: Move, piece: Piece) -> String {
        // Castling is encoded as the king capturing its own rook.
        if piece == Piece::King && self.board.color_on(mv.to) == Some(self.board.side_to_move()) {
            return if file_index(mv.to.file()) > file_index(mv.from.file()) {
                "O-O".to_string()
            } else {
                "O-O-O".to_string()
            };
        }

        let mut san = String::new();
        let is_capture = self.board.piece_on(mv.to).is_some();
        match piece {
            Piece::King => san.push('K'),
            Piece::Queen => san.push('Q'),
            Piece::Rook => san.push('R'),
            Piece::Bishop => san.push('B'),
            Piece::Knight => san.push('N'),
            Piece::Pawn => {
                if is_capture {
                    san.push(file_to_char(mv.from.file()));
                }
            }
        }

        if is_capture {
            san.push('x');
        }

        san.push(file_to_char(mv.to.file()));
        san.push(rank_to_char(mv.to.rank()));

        if let Some(promo) = mv.promotion {
            san.push('=');
            san.push(PieceKind::from(promo).to_char_upper());
        }

        san
    }
}

fn promotion_rank(color: Color) -> Rank {
    match color {
        Color::White => Rank::Eighth,
        Color::Black => Rank::First,
    }
}

/// UCI castling ("e1g1") -> cozy-chess encoding ("e1h1"), if the move looks
/// like a king sliding two files. Legality is checked by the caller.
fn remap_castling(mv: Move) -> Option<Move> {
    let distance = file_index(mv.to.file()) - file_index(mv.from.file());
    let rook_file = match distance {
        2 => cozy_chess::File::H,
        -2 => cozy_chess::File::A,
        _ => return None,
    };
    Some(Move {
        from: mv.from,
        to: Square::new(rook_file, mv.from.rank()),
        promotion: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(from: &str, to: &str) -> CandidateMove {
        CandidateMove::parse(from, to, None).unwrap()
    }

    fn apply_all(position: Position, moves: &[(&str, &str)]) -> Applied {
        let mut current = position;
        let mut last = None;
        for (from, to) in moves {
            let applied = current.apply(mv(from, to)).unwrap();
            current = applied.position.clone();
            last = Some(applied);
        }
        last.unwrap()
    }

    #[test]
    fn test_startpos_fen() {
        assert_eq!(
            Position::startpos().fen(),
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[test]
    fn test_apply_simple_move() {
        let applied = Position::startpos().apply(mv("e2", "e4")).unwrap();
        assert_eq!(applied.san, "e4");
        assert_eq!(applied.position.side_to_move(), Side::Black);
        assert!(applied.terminal.is_none());
        assert_eq!(
            applied.position.fen(),
            "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1"
        );
    }

    #[test]
    fn test_illegal_move_rejected() {
        let position = Position::startpos();
        assert_eq!(
            position.apply(mv("e2", "e5")).unwrap_err(),
            MoveRejected::Illegal
        );
        // The caller's position is untouched.
        assert_eq!(position.side_to_move(), Side::White);
    }

    #[test]
    fn test_fools_mate_is_checkmate() {
        let last = apply_all(
            Position::startpos(),
            &[("f2", "f3"), ("e7", "e5"), ("g2", "g4"), ("d8", "h4")],
        );
        assert_eq!(last.terminal, Some(TerminalFlag::Checkmate));
        assert!(last.san.starts_with("Qh4"));
    }

    #[test]
    fn test_stalemate_detected() {
        let position = Position::from_fen("7k/8/6K1/5Q2/8/8/8/8 w - - 0 1").unwrap();
        let applied = position.apply(mv("f5", "f7")).unwrap();
        assert_eq!(applied.terminal, Some(TerminalFlag::Stalemate));
    }

    #[test]
    fn test_fifty_move_rule() {
        let position = Position::from_fen("8/8/8/8/8/4k3/8/4K2R w - - 99 80").unwrap();
        let applied = position.apply(mv("h1", "h2")).unwrap();
        assert_eq!(applied.terminal, Some(TerminalFlag::FiftyMoveRule));
    }

    #[test]
    fn test_threefold_repetition() {
        let shuffle = [("g1", "f3"), ("g8", "f6"), ("f3", "g1"), ("f6", "g8")];
        let mut current = Position::startpos();
        let mut last_terminal = None;
        for _ in 0..2 {
            for (from, to) in shuffle {
                let applied = current.apply(mv(from, to)).unwrap();
                last_terminal = applied.terminal;
                current = applied.position;
            }
        }
        // The starting position has now occurred three times.
        assert_eq!(last_terminal, Some(TerminalFlag::Repetition));
    }

    #[test]
    fn test_repetition_table_cleared_by_pawn_move() {
        let applied = Position::startpos().apply(mv("e2", "e4")).unwrap();
        // Pawn move resets the halfmove clock; only the new position remains.
        assert_eq!(applied.position.repetitions.len(), 1);
    }

    #[test]
    fn test_insufficient_material_after_capture() {
        let position = Position::from_fen("8/8/8/8/3k4/8/4p3/4K3 w - - 0 1").unwrap();
        let applied = position.apply(mv("e1", "e2")).unwrap();
        assert_eq!(applied.terminal, Some(TerminalFlag::InsufficientMaterial));
    }

    #[test]
    fn test_default_queen_promotion() {
        let position = Position::from_fen("8/4P3/8/8/8/8/8/K6k w - - 0 1").unwrap();
        let applied = position.apply(mv("e7", "e8")).unwrap();
        assert_eq!(applied.san, "e8=Q");
        assert!(applied.position.fen().starts_with("4Q3/"));
    }

    #[test]
    fn test_explicit_underpromotion() {
        let position = Position::from_fen("8/4P3/8/8/8/8/8/K6k w - - 0 1").unwrap();
        let candidate = CandidateMove::parse("e7", "e8", Some("n")).unwrap();
        let applied = position.apply(candidate).unwrap();
        assert_eq!(applied.san, "e8=N");
    }

    #[test]
    fn test_uci_castling_remapped() {
        let last = apply_all(
            Position::startpos(),
            &[
                ("e2", "e4"),
                ("e7", "e5"),
                ("g1", "f3"),
                ("b8", "c6"),
                ("f1", "c4"),
                ("f8", "c5"),
                ("e1", "g1"),
            ],
        );
        assert_eq!(last.san, "O-O");
        assert!(last.position.fen().contains("RK1"));
    }

    #[test]
    fn test_capture_san() {
        let last = apply_all(
            Position::startpos(),
            &[("e2", "e4"), ("d7", "d5"), ("e4", "d5")],
        );
        assert_eq!(last.san, "exd5");
    }

    #[test]
    fn test_apply_is_deterministic() {
        let position = Position::startpos();
        let a = position.apply(mv("g1", "f3")).unwrap();
        let b = position.apply(mv("g1", "f3")).unwrap();
        assert_eq!(a.position.fen(), b.position.fen());
        assert_eq!(a.san, b.san);
    }
}
