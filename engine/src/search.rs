//! Iterative-deepening negamax with alpha-beta pruning and a material
//! evaluation. Strength is not a goal; returning a sane move within the
//! budget is.

use std::time::{Duration, Instant};

use cozy_chess::{Board, Color, Move, Piece};
use rules::{CandidateMove, PieceKind};

const MAX_DEPTH: u8 = 4;
const INF: i32 = 1_000_000;
const MATE: i32 = 100_000;

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
}

/// Search a position given as FEN. Returns `None` when the side to move has
/// no legal moves.
pub fn search_fen(fen: &str, budget: Duration) -> Result<Option<CandidateMove>, SearchError> {
    let board: Board = fen
        .parse()
        .map_err(|_| SearchError::InvalidFen(fen.to_string()))?;
    Ok(pick_move(&board, budget).map(|mv| CandidateMove {
        from: mv.from,
        to: mv.to,
        promotion: mv.promotion.map(PieceKind::from),
    }))
}

pub fn pick_move(board: &Board, budget: Duration) -> Option<Move> {
    let deadline = Instant::now() + budget;
    let moves = legal_moves(board);
    if moves.is_empty() {
        return None;
    }

    // Keep the result of the deepest fully completed iteration.
    let mut best = moves[0];
    for depth in 1..=MAX_DEPTH {
        match search_root(board, &moves, depth, deadline) {
            Some(mv) => best = mv,
            None => break,
        }
    }
    Some(best)
}

fn search_root(board: &Board, moves: &[Move], depth: u8, deadline: Instant) -> Option<Move> {
    let mut best = None;
    let mut alpha = -INF;
    for &mv in moves {
        let mut child = board.clone();
        child.play_unchecked(mv);
        let score = -negamax(&child, depth - 1, -INF, -alpha, deadline)?;
        if best.is_none() || score > alpha {
            alpha = score;
            best = Some(mv);
        }
    }
    best
}

fn negamax(board: &Board, depth: u8, mut alpha: i32, beta: i32, deadline: Instant) -> Option<i32> {
    if Instant::now() >= deadline {
        return None;
    }

    let moves = legal_moves(board);
    if moves.is_empty() {
        // Checkmate against the side to move, or stalemate.
        return Some(if board.checkers().is_empty() { 0 } else { -MATE });
    }
    if depth == 0 {
        return Some(evaluate(board));
    }

    for mv in moves {
        let mut child = board.clone();
        child.play_unchecked(mv);
        let score = -negamax(&child, depth - 1, -beta, -alpha, deadline)?;
        if score >= beta {
            return Some(score);
        }
        if score > alpha {
            alpha = score;
        }
    }
    Some(alpha)
}

/// Material balance from the side-to-move's perspective.
fn evaluate(board: &Board) -> i32 {
    const VALUES: [(Piece, i32); 5] = [
        (Piece::Pawn, 100),
        (Piece::Knight, 320),
        (Piece::Bishop, 330),
        (Piece::Rook, 500),
        (Piece::Queen, 900),
    ];

    let mut score = 0;
    for (piece, value) in VALUES {
        let bb = board.pieces(piece);
        let white = (bb & board.colors(Color::White)).len() as i32;
        let black = (bb & board.colors(Color::Black)).len() as i32;
        score += value * (white - black);
    }

    match board.side_to_move() {
        Color::White => score,
        Color::Black => -score,
    }
}

fn legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|mvs| {
        moves.extend(mvs);
        false
    });
    moves
}
