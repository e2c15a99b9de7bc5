//! Export Dia diagrams to PNG with an on-disk cache, per-density fan-out and
//! coalesced regeneration.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
