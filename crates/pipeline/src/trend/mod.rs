//! Trend reporting over a subject's observations in a calendar-day window.

mod cache;
mod report;
mod stats;

pub use cache::TrendCache;
pub use report::{TrendAggregator, TrendReport, TrendStatus};
pub use stats::{TrendEntry, WindowStats};
