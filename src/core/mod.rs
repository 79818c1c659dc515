//! Core domain types, pure analytics and the seams between tiers

pub mod analytics;
pub mod bar;
pub mod cache;
pub mod config;
pub mod error;
pub mod log;
pub mod provider;
pub mod store;

// Re-export main types for cleaner imports
pub use bar::{
    Allocation, Bar, CorrelationMatrix, CorrelationRow, DataSource, DateRange,
    PortfolioReturnSeries, Quote, TickerSeries, WeightUnit,
};
pub use error::PipelineError;
pub use provider::{AggregationProvider, BarProvider, QuoteProvider};
pub use store::{BarStore, CorrelationStore};
