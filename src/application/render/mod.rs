//! Diagram export pipeline.
//!
//! Sources are resolved through a [`SourceStore`](crate::domain::types::SourceStore),
//! exported to PNG by an external `dia` process and cached on disk. Concurrent requests
//! for the same export share a single conversion.

mod converter;
mod placeholder;
mod service;
mod types;

pub use converter::{ConvertRequest, DiaConverter, SuccessCriterion, size_argument};
pub use placeholder::{
    DEFAULT_WIDTH, DisplaySize, MISSING_IMAGE_HEIGHT, MISSING_IMAGE_PATH, MISSING_IMAGE_WIDTH,
    effective_base_size,
};
pub use service::{
    DEFAULT_NAMESPACE, DiagramRenderer, PIXEL_DENSITIES, RendererConfig, scaled_size,
};
pub use types::{ConvertError, RenderError};
