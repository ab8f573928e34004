//! Search limits handed down from the host protocol loop.

use crate::moves::MoveList;

/// Resource bounds for one search. A negative value means the axis is
/// unbounded; `infinite` masks every bound except an external stop.
#[derive(Debug, Clone)]
pub struct SearchLimits {
    /// Stop once the root has accumulated this many new visits.
    pub visits: i64,
    /// Stop once this many playouts have completed.
    pub playouts: i64,
    /// Stop after this much wall-clock time.
    pub time_ms: i64,
    /// Search until explicitly stopped.
    pub infinite: bool,
    /// Restrict root exploration to these moves (empty = all legal moves).
    pub searchmoves: MoveList,
}

impl Default for SearchLimits {
    fn default() -> Self {
        SearchLimits {
            visits: -1,
            playouts: -1,
            time_ms: -1,
            infinite: false,
            searchmoves: Vec::new(),
        }
    }
}

impl SearchLimits {
    /// True when no axis bounds the search and `infinite` was not requested.
    /// The controller treats such limits as infinite, with a warning.
    pub fn is_malformed(&self) -> bool {
        !self.infinite && self.visits < 0 && self.playouts < 0 && self.time_ms < 0
    }

    pub fn visits(mut self, visits: i64) -> Self {
        self.visits = visits;
        self
    }

    pub fn playouts(mut self, playouts: i64) -> Self {
        self.playouts = playouts;
        self
    }

    pub fn time_ms(mut self, time_ms: i64) -> Self {
        self.time_ms = time_ms;
        self
    }

    pub fn infinite(mut self) -> Self {
        self.infinite = true;
        self
    }
}
