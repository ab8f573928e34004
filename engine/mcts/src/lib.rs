//! Parallel Monte Carlo Tree Search for a neural-guided Chinese Chess
//! engine.
//!
//! The search grows a shared tree by PUCT-guided playouts, evaluating
//! leaves in minibatches through a caching network computation
//! (`neural::CachingComputation`). Any number of workers iterate the same
//! pipeline against one controller:
//!
//! 1. **Gather**: walk from the root by PUCT, installing virtual loss, and
//!    claim up to `mini_batch_size` frontier leaves
//! 2. **Prefetch**: spend leftover batch budget warming the evaluation
//!    cache along promising lines
//! 3. **Compute**: one batched network call
//! 4. **Fetch**: extend the claimed leaves with moves and priors
//! 5. **Backup**: propagate values to the root, sign-flipping per ply
//! 6. **Counters**: progress reports and the stop-condition ladder
//!
//! The controller (`Search`) owns the lifecycle: `start_threads`, `stop`
//! (announces a best move), `abort` (does not), `wait`, and tree reuse via
//! `SearchTree::promote_root`.

pub mod node;
pub mod params;
pub mod search;
pub mod tree;

mod worker;

pub use node::{Edge, Node, NodeId};
pub use params::{SearchParams, DIRICHLET_ALPHA, DIRICHLET_EPSILON};
pub use search::{Search, SearchError};
pub use tree::{SearchTree, TreeError};
