mod interval;
mod models;
mod ticker;
mod timestamp;

pub use interval::{Interval, LookbackWindow};
pub use models::{
    Bar, CompanyMetadata, DerivedMetrics, FundamentalsSnapshot, Metric, PriceSeries,
};
pub use ticker::Ticker;
pub use timestamp::UtcDateTime;
