//! Market-wide data: per-market summaries.

pub mod summary;

pub use summary::{MarketSummary, SummaryBoard};
