//! Export cache: key derivation, on-disk layout, per-key coordination.
//!
//! - [`keys`]: cache keys, on-disk paths and the export address scheme
//! - [`flight`]: single-flight map guaranteeing one regeneration per key
//! - [`dirs`]: cache root and idempotent directory creation
//! - [`dimensions`]: PNG size lookups cached by modification time

mod dimensions;
mod dirs;
mod flight;
mod keys;

pub use dimensions::{ImageSizeCache, ImageSizeError};
pub use dirs::CacheDirectory;
pub use flight::SingleFlight;
pub use keys::{
    AddressError, CacheKey, DIMENSION_SEPARATOR, EMPTY_SIZE, ExportAddress, PNG_EXTENSION,
    SIZE_SEPARATOR, strip_source_extension,
};
