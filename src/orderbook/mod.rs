//! Order book state maintained from snapshots and deltas.

pub mod merger;
pub mod types;

pub use merger::DeltaMerger;
pub use types::{LevelOp, LevelOperation, OrderBookLevel, OrderBookState, Side};
