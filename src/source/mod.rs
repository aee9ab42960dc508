//! Where candidates come from: ClickHouse queries and local list files.

pub mod clickhouse;
pub mod files;
pub mod queries;

pub use clickhouse::{ClickHouseConfig, ClickHouseSource};
