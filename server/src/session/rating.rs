//! Elo rating adjustment, applied once at session finalization for games
//! between two human seats.

use super::snapshot::Outcome;

const K: f64 = 32.0;

/// New (white, black) ratings after a game.
pub fn adjusted(white: i64, black: i64, outcome: Outcome) -> (i64, i64) {
    let expected_white = 1.0 / (1.0 + 10f64.powf((black - white) as f64 / 400.0));
    let score_white = match outcome {
        Outcome::WhiteWins => 1.0,
        Outcome::BlackWins => 0.0,
        Outcome::Draw => 0.5,
    };
    let delta = K * (score_white - expected_white);
    (
        (white as f64 + delta).round() as i64,
        (black as f64 - delta).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_ratings_decisive() {
        assert_eq!(adjusted(1200, 1200, Outcome::WhiteWins), (1216, 1184));
        assert_eq!(adjusted(1200, 1200, Outcome::BlackWins), (1184, 1216));
    }

    #[test]
    fn test_equal_ratings_draw_is_neutral() {
        assert_eq!(adjusted(1200, 1200, Outcome::Draw), (1200, 1200));
    }

    #[test]
    fn test_underdog_win_gains_more() {
        let (white, black) = adjusted(1200, 1400, Outcome::WhiteWins);
        assert!(white - 1200 > 16);
        assert_eq!((white - 1200), (1400 - black));
    }

    #[test]
    fn test_rating_sum_preserved() {
        let (white, black) = adjusted(1234, 1456, Outcome::BlackWins);
        assert_eq!(white + black, 1234 + 1456);
    }
}
