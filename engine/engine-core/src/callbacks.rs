//! Callbacks from the search core to the host protocol loop.

use std::sync::Arc;

use crate::moves::{Move, MoveList};

/// Final move announcement. Fires exactly once per search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BestMoveInfo {
    /// The chosen move, or the null move when no move exists.
    pub best: Move,
    /// The expected reply, or the null move when unknown.
    pub ponder: Move,
}

/// Periodic progress report. Fires zero or more times before the final
/// announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct ThinkingInfo {
    /// Length of the principal variation.
    pub depth: u32,
    /// Deepest ply reached by any playout.
    pub seldepth: u32,
    /// Wall-clock time since the search started.
    pub time_ms: i64,
    /// Root visits accumulated this search.
    pub nodes: u64,
    /// Nodes per second since the search started.
    pub nps: u64,
    /// Root evaluation in centipawn-equivalent units.
    pub score_cp: i32,
    /// Principal variation, most-visited first.
    pub pv: MoveList,
}

pub type BestMoveCallback = Arc<dyn Fn(BestMoveInfo) + Send + Sync>;
pub type InfoCallback = Arc<dyn Fn(ThinkingInfo) + Send + Sync>;

/// Map a Q value in [-1, 1] to centipawn-equivalent units.
pub fn q_to_centipawns(q: f32) -> i32 {
    (290.680623072 * (1.548090806 * q as f64).tan()).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_centipawn_mapping() {
        assert_eq!(q_to_centipawns(0.0), 0);
        assert!(q_to_centipawns(0.5) > 200);
        assert_eq!(q_to_centipawns(0.5), -q_to_centipawns(-0.5));
        // Saturating toward a decided game, the scale grows rapidly.
        assert!(q_to_centipawns(0.99) > 5000);
    }
}
