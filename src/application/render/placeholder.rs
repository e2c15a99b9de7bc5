use serde::Serialize;

use crate::domain::types::RenderedDiagram;

/// Image shown when a diagram cannot be exported.
pub const MISSING_IMAGE_PATH: &str = "/images/broken-chain-640x480.jpg";
pub const MISSING_IMAGE_WIDTH: u32 = 640;
pub const MISSING_IMAGE_HEIGHT: u32 = 480;

/// Width used when a request specifies neither width nor height.
pub const DEFAULT_WIDTH: u32 = 200;

/// Size at which an export (or its placeholder) should be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DisplaySize {
    pub width: u32,
    pub height: u32,
}

impl DisplaySize {
    /// Display size of the default-density export, in CSS pixels.
    pub fn of_export(export: &RenderedDiagram, base_density: u32) -> Self {
        let density = base_density.max(1);
        Self {
            width: export.width / density,
            height: export.height / density,
        }
    }

    /// Placeholder size for a request of `width` x `height`, where `0` means unspecified.
    ///
    /// A missing dimension is derived from the other one using the placeholder's aspect
    /// ratio.
    pub fn placeholder(width: u32, height: u32) -> Self {
        let scale = |value: u32, numerator: u32, denominator: u32| {
            (u64::from(numerator) * u64::from(value) / u64::from(denominator)) as u32
        };
        Self {
            width: if width != 0 {
                width
            } else {
                scale(height, MISSING_IMAGE_WIDTH, MISSING_IMAGE_HEIGHT)
            },
            height: if height != 0 {
                height
            } else {
                scale(width, MISSING_IMAGE_HEIGHT, MISSING_IMAGE_WIDTH)
            },
        }
    }

    /// Display size for the outcome of a fan-out, falling back to the placeholder.
    pub fn resolve(
        default_export: Option<&RenderedDiagram>,
        base_density: u32,
        width: u32,
        height: u32,
    ) -> Self {
        match default_export {
            Some(export) => Self::of_export(export, base_density),
            None => Self::placeholder(width, height),
        }
    }
}

/// Apply the default width when neither dimension was requested.
pub fn effective_base_size(width: u32, height: u32) -> (u32, u32) {
    if width == 0 && height == 0 {
        (DEFAULT_WIDTH, 0)
    } else {
        (width, height)
    }
}
