//! Core interfaces for a neural-network-guided Chinese Chess engine.
//!
//! This crate defines the seams between the parallel MCTS search core and
//! its collaborators: the opaque position model, search limits, and the
//! callbacks through which the core reports progress and its final move.
//! The search itself lives in the `mcts` crate; network evaluation in
//! `neural`.

pub mod callbacks;
pub mod limits;
pub mod moves;
pub mod position;

pub use callbacks::{
    q_to_centipawns, BestMoveCallback, BestMoveInfo, InfoCallback, ThinkingInfo,
};
pub use limits::SearchLimits;
pub use moves::{Move, MoveList, ParseMoveError, Square, BOARD_FILES, BOARD_RANKS, BOARD_SQUARES};
pub use position::{GameOutcome, Position, PositionHistory};
