pub mod analyzer;
pub mod histogram;
pub mod nomination;

pub use analyzer::{GraphAnalyzer, Traversal};
pub use histogram::{Histogram, HistogramEntry};
pub use nomination::nominate;
