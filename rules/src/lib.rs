pub mod position;
pub mod types;

pub use position::{Applied, CandidateMove, MoveRejected, Position, PositionError, TerminalFlag};
pub use types::{
    format_square, parse_piece, parse_square, PieceKind, Side,
};
