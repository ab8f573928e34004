//! The opaque position model consumed by the search.
//!
//! The search never looks inside a position: it generates legal moves, plays
//! them on clones, asks for terminal outcomes, and hashes positions for the
//! evaluation cache. Game rules (including repetition and counting-rule
//! draws) live entirely behind this trait.

use crate::moves::{Move, MoveList};

/// Outcome of a finished game, always from the side to move's perspective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Loss,
    Draw,
    Win,
}

impl GameOutcome {
    /// Outcome as a backup value in {-1, 0, 1}.
    #[inline]
    pub fn value(self) -> f32 {
        match self {
            GameOutcome::Loss => -1.0,
            GameOutcome::Draw => 0.0,
            GameOutcome::Win => 1.0,
        }
    }
}

/// A board state the search can explore.
///
/// Implementations must be cheap to clone; the search clones positions along
/// every selection path. `outcome()` must return `Some` exactly when the
/// position has no continuation, which includes draws by rule; a position
/// with no legal moves must report an outcome.
pub trait Position: Clone + Send + Sync + 'static {
    /// Legal moves in a stable, deterministic order. Empty iff terminal.
    fn legal_moves(&self) -> MoveList;

    /// Play a move, returning the resulting position.
    fn make_move(&self, mv: Move) -> Self;

    /// Terminal result from the side to move's perspective, if the game
    /// has ended here (checkmate, stalemate rule, repetition, fold count).
    fn outcome(&self) -> Option<GameOutcome>;

    /// Hash used as evaluation-cache key material.
    fn hash(&self) -> u64;

    /// Encode the position as network input planes.
    fn encode(&self) -> Vec<f32>;

    /// Validate the position before a search starts.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// The played line plus the in-search extension stack.
///
/// The prefix up to the search root is fixed for the duration of a search;
/// workers push positions as they descend and truncate back between picks.
#[derive(Debug, Clone)]
pub struct PositionHistory<P: Position> {
    positions: Vec<P>,
}

impl<P: Position> PositionHistory<P> {
    /// Start a history at a single root position.
    pub fn new(root: P) -> Self {
        PositionHistory {
            positions: vec![root],
        }
    }

    /// The most recent position.
    pub fn last(&self) -> &P {
        self.positions.last().unwrap()
    }

    /// Number of positions in the history.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Halfmoves played since the start of the history.
    pub fn game_ply(&self) -> usize {
        self.positions.len() - 1
    }

    /// Play a move onto the tip of the history.
    pub fn append(&mut self, mv: Move) {
        self.positions.push(self.last().make_move(mv));
    }

    /// Drop positions past `len` (used to rewind to the search root).
    pub fn truncate(&mut self, len: usize) {
        debug_assert!(len >= 1);
        self.positions.truncate(len);
    }

    /// Drop the tip position.
    pub fn pop(&mut self) {
        debug_assert!(self.positions.len() > 1);
        self.positions.pop();
    }

    /// Cache key for the tip position, folding in the last `history_len`
    /// plies so cached evaluations depend on the same history the network
    /// sees. `history_len == 0` keys on the tip position alone.
    pub fn cache_hash(&self, history_len: u32) -> u64 {
        let n = self.positions.len();
        let mut hash = self.last().hash();
        for i in 1..=history_len as usize {
            if i >= n {
                break;
            }
            hash = hash.rotate_left(11) ^ self.positions[n - 1 - i].hash();
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moves::Square;

    // A minimal position for exercising the history: a counter that is
    // terminal at 3 and hashes to its own value.
    #[derive(Debug, Clone)]
    struct Counter(u64);

    impl Position for Counter {
        fn legal_moves(&self) -> MoveList {
            if self.0 >= 3 {
                return Vec::new();
            }
            vec![Move::new(Square::from_index(0), Square::from_index(1))]
        }

        fn make_move(&self, _mv: Move) -> Self {
            Counter(self.0 + 1)
        }

        fn outcome(&self) -> Option<GameOutcome> {
            (self.0 >= 3).then_some(GameOutcome::Draw)
        }

        fn hash(&self) -> u64 {
            self.0.wrapping_mul(0x9E37_79B9_7F4A_7C15)
        }

        fn encode(&self) -> Vec<f32> {
            vec![self.0 as f32]
        }
    }

    fn step() -> Move {
        Move::new(Square::from_index(0), Square::from_index(1))
    }

    #[test]
    fn test_append_and_truncate() {
        let mut history = PositionHistory::new(Counter(0));
        history.append(step());
        history.append(step());
        assert_eq!(history.len(), 3);
        assert_eq!(history.game_ply(), 2);
        assert_eq!(history.last().0, 2);

        history.truncate(1);
        assert_eq!(history.last().0, 0);
    }

    #[test]
    fn test_cache_hash_position_only() {
        let mut a = PositionHistory::new(Counter(0));
        a.append(step());

        let mut b = PositionHistory::new(Counter(1));
        b.truncate(1);

        // With no history folded in, equal tip positions key equally.
        assert_eq!(a.cache_hash(0), b.cache_hash(0));
        // With one ply of history, the paths differ.
        assert_ne!(a.cache_hash(1), b.cache_hash(1));
    }

    #[test]
    fn test_cache_hash_short_history() {
        let history = PositionHistory::new(Counter(5));
        // Requesting more plies than exist must not panic.
        let _ = history.cache_hash(8);
    }
}
