use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use dashmap::DashMap;
use thiserror::Error;

use crate::domain::types::Dimensions;

#[derive(Debug, Clone, Error)]
#[error("failed to read image size of {path}: {message}")]
pub struct ImageSizeError {
    pub path: PathBuf,
    pub message: String,
}

/// Remembers PNG dimensions per file and modification time.
///
/// An entry is reused only while the file's modification time is unchanged.
#[derive(Debug, Default)]
pub struct ImageSizeCache {
    entries: DashMap<PathBuf, (SystemTime, Dimensions)>,
}

impl ImageSizeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dimensions(
        &self,
        path: &Path,
        modified: Option<SystemTime>,
    ) -> Result<Dimensions, ImageSizeError> {
        let cached = modified.and_then(|modified| {
            self.entries
                .get(path)
                .filter(|entry| entry.0 == modified)
                .map(|entry| entry.1)
        });
        if let Some(dimensions) = cached {
            return Ok(dimensions);
        }

        let dimensions = read_dimensions(path)?;
        if let Some(modified) = modified {
            self.entries
                .insert(path.to_path_buf(), (modified, dimensions));
        }
        Ok(dimensions)
    }
}

fn read_dimensions(path: &Path) -> Result<Dimensions, ImageSizeError> {
    let error = |message: String| ImageSizeError {
        path: path.to_path_buf(),
        message,
    };
    let size = imagesize::size(path).map_err(|err| error(err.to_string()))?;
    let width = u32::try_from(size.width).map_err(|_| error("width out of range".into()))?;
    let height = u32::try_from(size.height).map_err(|_| error("height out of range".into()))?;
    Ok(Dimensions { width, height })
}
