//! Turn-clock accounting.
//!
//! The arithmetic lives in pure functions of {remaining, increment, elapsed};
//! the actor owns the `ClockPair` and is the only mutator. A session without
//! a time control never constructs a clock, so every operation here is a
//! no-op for untimed games.

use std::time::{Duration, Instant};

use rules::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeControl {
    pub initial_ms: u64,
    pub increment_ms: u64,
}

/// Remaining budgets plus the wall-clock time of the last turn transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClockPair {
    pub white_ms: u64,
    pub black_ms: u64,
    pub last_transition: Instant,
}

impl ClockPair {
    pub fn new(control: TimeControl) -> Self {
        Self {
            white_ms: control.initial_ms,
            black_ms: control.initial_ms,
            last_transition: Instant::now(),
        }
    }

    pub fn remaining(&self, side: Side) -> u64 {
        match side {
            Side::White => self.white_ms,
            Side::Black => self.black_ms,
        }
    }

    pub fn set_remaining(&mut self, side: Side, ms: u64) {
        match side {
            Side::White => self.white_ms = ms,
            Side::Black => self.black_ms = ms,
        }
    }
}

/// Result of applying one turn transition to the mover's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub remaining_ms: u64,
    pub forfeit: bool,
}

/// Deduct the elapsed time and apply the increment. When the budget ran out
/// before the move, the increment is not applied and the forfeit flag is set.
pub fn turn_transition(remaining_ms: u64, increment_ms: u64, elapsed: Duration) -> Transition {
    let elapsed_ms = elapsed.as_millis() as u64;
    if elapsed_ms >= remaining_ms {
        Transition {
            remaining_ms: 0,
            forfeit: true,
        }
    } else {
        Transition {
            remaining_ms: remaining_ms - elapsed_ms + increment_ms,
            forfeit: false,
        }
    }
}

/// True when the side on move has exhausted its budget.
pub fn flag_fallen(remaining_ms: u64, elapsed: Duration) -> bool {
    elapsed.as_millis() as u64 >= remaining_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduction_and_increment() {
        // 600s initial, 5s increment, 12s elapsed.
        let t = turn_transition(600_000, 5_000, Duration::from_secs(12));
        assert_eq!(t.remaining_ms, 593_000);
        assert!(!t.forfeit);
    }

    #[test]
    fn test_forfeit_when_budget_exhausted() {
        let t = turn_transition(10_000, 5_000, Duration::from_secs(11));
        assert_eq!(t.remaining_ms, 0);
        assert!(t.forfeit);
    }

    #[test]
    fn test_forfeit_at_exact_boundary() {
        // The increment is not applied once the flag has fallen.
        let t = turn_transition(10_000, 5_000, Duration::from_secs(10));
        assert_eq!(t.remaining_ms, 0);
        assert!(t.forfeit);
    }

    #[test]
    fn test_increment_applied_even_with_zero_elapsed() {
        let t = turn_transition(10_000, 5_000, Duration::ZERO);
        assert_eq!(t.remaining_ms, 15_000);
        assert!(!t.forfeit);
    }

    #[test]
    fn test_flag_fallen() {
        assert!(!flag_fallen(1_000, Duration::from_millis(999)));
        assert!(flag_fallen(1_000, Duration::from_millis(1_000)));
        assert!(flag_fallen(1_000, Duration::from_millis(1_001)));
    }

    #[test]
    fn test_clock_pair_accessors() {
        let mut clocks = ClockPair::new(TimeControl {
            initial_ms: 60_000,
            increment_ms: 0,
        });
        assert_eq!(clocks.remaining(Side::White), 60_000);
        assert_eq!(clocks.remaining(Side::Black), 60_000);
        clocks.set_remaining(Side::Black, 1_234);
        assert_eq!(clocks.remaining(Side::Black), 1_234);
        assert_eq!(clocks.remaining(Side::White), 60_000);
    }
}
