use std::{io, path::PathBuf, time::SystemTime};

use async_trait::async_trait;
use serde::Serialize;

/// File extension carried by diagram sources.
pub const DIA_EXTENSION: &str = ".dia";

/// Logical reference to a diagram: the book it belongs to and its path inside that book.
///
/// Book prefixes are either empty (the root book) or start with `/` and carry no
/// trailing slash. Paths always start with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceRef {
    book: String,
    path: String,
}

impl SourceRef {
    pub fn new(book: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            book: book.into(),
            path: path.into(),
        }
    }

    pub fn book(&self) -> &str {
        &self.book
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Book prefix joined with the in-book path, as used by the export address scheme.
    pub fn combined(&self) -> String {
        format!("{}{}", self.book, self.path)
    }
}

/// A resolved diagram source on the local filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceArtifact {
    pub file: PathBuf,
    /// `None` when the backing store cannot report a modification time.
    pub modified: Option<SystemTime>,
}

/// Width and height requested from the converter. `None` means "let the converter decide".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct RequestedSize {
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl RequestedSize {
    pub fn new(width: Option<u32>, height: Option<u32>) -> Self {
        Self { width, height }
    }
}

/// Pixel dimensions of a rendered PNG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Result of a successful export: where the PNG lives and how large it actually is.
///
/// The actual size may differ from the requested one since the converter keeps the
/// diagram's aspect ratio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedDiagram {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub requested: RequestedSize,
    #[serde(skip)]
    pub modified: Option<SystemTime>,
}

/// Resolves logical diagram references to readable files.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Book prefixes this store can resolve.
    fn book_prefixes(&self) -> Vec<String>;

    /// Resolve a diagram, returning `Ok(None)` when the book or file does not exist
    /// or the store is currently unavailable.
    async fn resolve(&self, source: &SourceRef) -> io::Result<Option<SourceArtifact>>;

    /// Split a combined path into book and in-book path using the longest matching prefix.
    fn locate(&self, combined: &str) -> Option<SourceRef> {
        self.book_prefixes()
            .into_iter()
            .filter(|prefix| {
                combined
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(String::len)
            .map(|prefix| {
                let path = combined[prefix.len()..].to_string();
                SourceRef::new(prefix, path)
            })
    }
}
