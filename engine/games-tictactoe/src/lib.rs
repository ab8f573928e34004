//! TicTacToe position model for exercising the search core.
//!
//! The search treats positions as black boxes; this crate is the black box
//! the test suite and benches plug in. Board cell `i` is exposed as the
//! degenerate move `Square(i) -> Square(i)`, which keeps the engine's move
//! type untouched while giving tests simple, predictable move lists.

use engine_core::{GameOutcome, Move, MoveList, Position, Square};

/// TicTacToe board: 0 = empty, 1 = X, 2 = O. X moves first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TicTacToe {
    board: [u8; 9],
    side_to_move: u8,
}

const LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8], // rows
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8], // columns
    [0, 4, 8],
    [2, 4, 6], // diagonals
];

/// The move placing a piece on cell `cell`.
pub fn cell_move(cell: u8) -> Move {
    Move::new(Square::from_index(cell), Square::from_index(cell))
}

impl TicTacToe {
    /// An empty board with X to move.
    pub fn new() -> Self {
        TicTacToe {
            board: [0; 9],
            side_to_move: 1,
        }
    }

    /// A position reached by playing `cells` from the empty board.
    pub fn from_cells(cells: &[u8]) -> Self {
        let mut pos = TicTacToe::new();
        for &cell in cells {
            pos = pos.make_move(cell_move(cell));
        }
        pos
    }

    fn winner(&self) -> u8 {
        for line in &LINES {
            let [a, b, c] = *line;
            if self.board[a] != 0 && self.board[a] == self.board[b] && self.board[b] == self.board[c]
            {
                return self.board[a];
            }
        }
        0
    }

    fn is_full(&self) -> bool {
        self.board.iter().all(|&cell| cell != 0)
    }
}

impl Default for TicTacToe {
    fn default() -> Self {
        Self::new()
    }
}

impl Position for TicTacToe {
    fn legal_moves(&self) -> MoveList {
        if self.outcome().is_some() {
            return Vec::new();
        }
        (0..9u8)
            .filter(|&cell| self.board[cell as usize] == 0)
            .map(cell_move)
            .collect()
    }

    fn make_move(&self, mv: Move) -> Self {
        let cell = mv.from().index() as usize;
        debug_assert!(cell < 9 && self.board[cell] == 0);
        let mut next = *self;
        next.board[cell] = self.side_to_move;
        next.side_to_move = 3 - self.side_to_move;
        next
    }

    fn outcome(&self) -> Option<GameOutcome> {
        let winner = self.winner();
        if winner != 0 {
            // The winner is always the player who just moved, so the side
            // to move has lost.
            debug_assert!(winner != self.side_to_move);
            return Some(GameOutcome::Loss);
        }
        if self.is_full() {
            return Some(GameOutcome::Draw);
        }
        None
    }

    fn hash(&self) -> u64 {
        let mut hash: u64 = 0xCBF2_9CE4_8422_2325;
        for &cell in self.board.iter().chain(std::iter::once(&self.side_to_move)) {
            hash ^= cell as u64;
            hash = hash.wrapping_mul(0x100_0000_01B3);
        }
        hash
    }

    fn encode(&self) -> Vec<f32> {
        let mut planes = vec![0.0; 19];
        for (i, &cell) in self.board.iter().enumerate() {
            if cell == 1 {
                planes[i] = 1.0;
            } else if cell == 2 {
                planes[i + 9] = 1.0;
            }
        }
        planes[18] = if self.side_to_move == 1 { 1.0 } else { 0.0 };
        planes
    }

    fn validate(&self) -> Result<(), String> {
        let x_count = self.board.iter().filter(|&&c| c == 1).count();
        let o_count = self.board.iter().filter(|&&c| c == 2).count();
        if x_count < o_count || x_count > o_count + 1 {
            return Err(format!("impossible piece counts: {x_count} X vs {o_count} O"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_position() {
        let pos = TicTacToe::new();
        assert_eq!(pos.legal_moves().len(), 9);
        assert!(pos.outcome().is_none());
        assert!(pos.validate().is_ok());
    }

    #[test]
    fn test_make_move_alternates_sides() {
        let pos = TicTacToe::new().make_move(cell_move(4));
        assert_eq!(pos.legal_moves().len(), 8);
        assert!(!pos.legal_moves().contains(&cell_move(4)));
    }

    #[test]
    fn test_win_is_loss_for_side_to_move() {
        // X: 0, 1, 2 across the top; O: 3, 4.
        let pos = TicTacToe::from_cells(&[0, 3, 1, 4, 2]);
        assert_eq!(pos.outcome(), Some(GameOutcome::Loss));
        assert!(pos.legal_moves().is_empty());
    }

    #[test]
    fn test_draw() {
        // X X O / O O X / X O X - full board, no line.
        let pos = TicTacToe::from_cells(&[0, 2, 1, 3, 5, 4, 6, 7, 8]);
        assert_eq!(pos.outcome(), Some(GameOutcome::Draw));
    }

    #[test]
    fn test_hash_distinguishes_positions() {
        let a = TicTacToe::from_cells(&[0, 1]);
        let b = TicTacToe::from_cells(&[1, 0]);
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), TicTacToe::from_cells(&[0, 1]).hash());
    }

    #[test]
    fn test_encode_shape() {
        let planes = TicTacToe::new().encode();
        assert_eq!(planes.len(), 19);
        assert_eq!(planes[18], 1.0);
    }

    #[test]
    fn test_validate_rejects_impossible_counts() {
        let mut pos = TicTacToe::new();
        pos.board = [2, 2, 0, 0, 0, 0, 0, 0, 0];
        assert!(pos.validate().is_err());
    }
}
