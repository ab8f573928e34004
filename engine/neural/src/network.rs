//! The batched evaluator seam.
//!
//! A network maps a batch of encoded positions to (policy over the supplied
//! legal moves, scalar value). Backends register through the factory; the
//! search core only ever sees `Arc<dyn Network>`.

use engine_core::MoveList;
use thiserror::Error;

/// Errors surfaced by a network backend.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("computation failed: {0}")]
    ComputationFailed(String),

    #[error("backend returned {actual} outputs for a batch of {expected}")]
    OutputMismatch { expected: usize, actual: usize },
}

/// One encoded position plus the legal moves the policy head must score.
#[derive(Debug, Clone)]
pub struct NetworkInput {
    /// Input planes from `Position::encode`.
    pub planes: Vec<f32>,
    /// Legal moves, in the position's move-generation order.
    pub moves: MoveList,
}

/// Raw network output for one input.
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    /// `policy[i]` scores `input.moves[i]`; non-negative, summing to ~1.
    pub policy: Vec<f32>,
    /// Expected outcome in [-1, 1] from the input side to move's view.
    pub value: f32,
}

/// A batched position evaluator.
pub trait Network: Send + Sync + std::fmt::Debug {
    /// Backend name, as registered with the factory.
    fn name(&self) -> &str;

    /// Evaluate a whole batch in one call. Must return exactly one output
    /// per input, in order.
    fn compute(&self, batch: &[NetworkInput]) -> Result<Vec<NetworkOutput>, NetworkError>;
}
