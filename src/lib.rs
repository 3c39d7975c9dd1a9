pub mod aggregate;
pub mod baseline;
pub mod calendar;
pub mod cleanup;
pub mod curves;
pub mod error;
pub mod excess;
pub mod fetch;
pub mod interpolate;
pub mod output;
pub mod pipeline;
pub mod records;
pub mod settings;
pub mod spline;
pub mod stats;
