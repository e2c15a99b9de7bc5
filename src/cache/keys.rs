//! Cache key derivation and the export address scheme.
//!
//! A cache key is `(namespace, book, stripped path, width, height)`. On disk it maps to
//! `<root>/<namespace>/<book dir>/<path segments>-<w|_>x<h|_>.png`. The externally
//! visible address drops the namespace and uses `<book><stripped path>-<w|_>x<h|_>.png`.

use std::path::{Path, PathBuf};

use thiserror::Error;
use url::form_urlencoded;

use crate::domain::types::{DIA_EXTENSION, RequestedSize, SourceRef};

pub const PNG_EXTENSION: &str = ".png";
pub const SIZE_SEPARATOR: char = '-';
pub const DIMENSION_SEPARATOR: char = 'x';
pub const EMPTY_SIZE: char = '_';

const BOOK_DIR_PREFIX: &str = "book";

/// Remove a trailing `.dia` (any case) so exports are not named `flow.dia-200x_.png`.
pub fn strip_source_extension(path: &str) -> &str {
    let split = path.len().saturating_sub(DIA_EXTENSION.len());
    match (path.get(..split), path.get(split..)) {
        (Some(stem), Some(ext)) if ext.eq_ignore_ascii_case(DIA_EXTENSION) => stem,
        _ => path,
    }
}

/// Identifies one cached export.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    book: String,
    stem: String,
    size: RequestedSize,
}

impl CacheKey {
    pub fn derive(namespace: &str, source: &SourceRef, size: RequestedSize) -> Self {
        Self {
            namespace: namespace.to_string(),
            book: source.book().to_string(),
            stem: strip_source_extension(source.path()).to_string(),
            size,
        }
    }

    pub fn size(&self) -> RequestedSize {
        self.size
    }

    /// File name of the export: `<last segment>-<w|_>x<h|_>.png`.
    ///
    /// The last segment may be empty, as for a hidden `/a/.dia` source.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.split_stem().1, size_suffix(self.size))
    }

    fn split_stem(&self) -> (&str, &str) {
        self.stem.rsplit_once('/').unwrap_or(("", &self.stem))
    }

    /// Location of the export beneath `root`.
    ///
    /// The book prefix is folded into one form-urlencoded directory name so that book
    /// boundaries stay distinguishable from in-book directories.
    pub fn to_path(&self, root: &Path) -> PathBuf {
        let mut path = root.join(&self.namespace).join(book_dir_name(&self.book));
        let (directories, _) = self.split_stem();
        for segment in directories
            .split('/')
            .filter(|segment| !matches!(*segment, "" | "." | ".."))
        {
            path.push(segment);
        }
        path.push(self.file_name());
        path
    }
}

fn book_dir_name(book: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(book.as_bytes()).collect();
    format!("{BOOK_DIR_PREFIX}{encoded}")
}

fn size_suffix(size: RequestedSize) -> String {
    format!(
        "{SIZE_SEPARATOR}{}{DIMENSION_SEPARATOR}{}{PNG_EXTENSION}",
        dimension_field(size.width),
        dimension_field(size.height),
    )
}

fn dimension_field(value: Option<u32>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => EMPTY_SIZE.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("export address must end with .png")]
    MissingExtension,
    #[error("export address lacks a `{0}` separator")]
    MissingSeparator(char),
    #[error("invalid dimension `{0}`")]
    InvalidDimension(String),
    #[error("export address specifies neither width nor height")]
    NoDimensions,
    #[error("invalid diagram path `{0}`")]
    InvalidPath(String),
}

/// Decoded export address: which diagram and which size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportAddress {
    /// Book prefix plus in-book path, including the `.dia` extension.
    pub combined_path: String,
    pub size: RequestedSize,
}

impl ExportAddress {
    /// Build the address for an export of `source` at `size`.
    pub fn encode(source: &SourceRef, size: RequestedSize) -> Result<String, AddressError> {
        let path = source.path();
        let stem = path
            .strip_suffix(DIA_EXTENSION)
            .ok_or_else(|| AddressError::InvalidPath(path.to_string()))?;
        Ok(format!("{}{stem}{}", source.book(), size_suffix(size)))
    }

    /// Parse an address of the form `<combined stem>-<w|_>x<h|_>.png`.
    ///
    /// The height follows the last `x` before the extension, the width the last `-`
    /// before that.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let body = address
            .strip_suffix(PNG_EXTENSION)
            .ok_or(AddressError::MissingExtension)?;

        let dim_sep = body
            .rfind(DIMENSION_SEPARATOR)
            .ok_or(AddressError::MissingSeparator(DIMENSION_SEPARATOR))?;
        let height = parse_dimension(&body[dim_sep + 1..])?;

        let size_sep = body[..dim_sep]
            .rfind(SIZE_SEPARATOR)
            .ok_or(AddressError::MissingSeparator(SIZE_SEPARATOR))?;
        let width = parse_dimension(&body[size_sep + 1..dim_sep])?;

        if width.is_none() && height.is_none() {
            return Err(AddressError::NoDimensions);
        }

        let stem = &body[..size_sep];
        if !is_clean_path(stem) {
            return Err(AddressError::InvalidPath(stem.to_string()));
        }

        Ok(Self {
            combined_path: format!("{stem}{DIA_EXTENSION}"),
            size: RequestedSize::new(width, height),
        })
    }
}

fn parse_dimension(field: &str) -> Result<Option<u32>, AddressError> {
    if field.len() == 1 && field.starts_with(EMPTY_SIZE) {
        return Ok(None);
    }
    match field.parse::<u32>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(AddressError::InvalidDimension(field.to_string())),
    }
}

fn is_clean_path(stem: &str) -> bool {
    let Some(rest) = stem.strip_prefix('/') else {
        return false;
    };
    rest.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}
