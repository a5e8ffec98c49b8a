use std::ops::RangeInclusive;

use rand::Rng;

/// Smallest number a client can be assigned.
pub const NUMBER_MIN: u8 = 1;

/// Largest number a client can be assigned.
pub const NUMBER_MAX: u8 = 20;

/// Lifecycle of the single lobby a server runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyPhase {
    /// Accepting connections while the countdown runs.
    Waiting,
    /// Countdown hit zero. No more joins; the winner is being announced.
    Started,
    /// Every socket, including the listener, has been closed.
    Finished,
}

impl LobbyPhase {
    /// Phases only move forward, one step at a time.
    pub fn can_transition_to(self, next: LobbyPhase) -> bool {
        matches!(
            (self, next),
            (LobbyPhase::Waiting, LobbyPhase::Started) | (LobbyPhase::Started, LobbyPhase::Finished)
        )
    }
}

/// The inclusive range numbers are drawn from, capped at `max`.
pub fn number_range(max: u8) -> RangeInclusive<u8> {
    NUMBER_MIN..=max.clamp(NUMBER_MIN, NUMBER_MAX)
}

/// Draw a uniform number in `[1, max]`. Two clients may draw the same value.
pub fn draw_number<R: Rng>(rng: &mut R, max: u8) -> u8 {
    rng.random_range(number_range(max))
}

/// Index of the highest number. On a tie the earliest entry wins, so callers
/// must pass numbers in join order.
pub fn select_winner(numbers: &[u8]) -> Option<usize> {
    numbers
        .iter()
        .enumerate()
        .reduce(|best, candidate| if candidate.1 > best.1 { candidate } else { best })
        .map(|(index, _)| index)
}
