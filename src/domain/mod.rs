//! Domain types and freshness rules.

pub mod staleness;
pub mod types;
