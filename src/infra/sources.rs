//! Filesystem-backed diagram sources organised into books.

use std::{
    io::{self, ErrorKind},
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::{
    config::BookSettings,
    domain::types::{SourceArtifact, SourceRef, SourceStore},
};

/// One book: a path prefix mapped onto a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookRoot {
    pub prefix: String,
    pub root: PathBuf,
}

impl From<&BookSettings> for BookRoot {
    fn from(settings: &BookSettings) -> Self {
        Self {
            prefix: settings.prefix.clone(),
            root: settings.root.clone(),
        }
    }
}

/// Resolves diagrams to files below each book's root directory.
#[derive(Debug, Clone, Default)]
pub struct DirectorySourceStore {
    books: Vec<BookRoot>,
}

impl DirectorySourceStore {
    pub fn new(books: Vec<BookRoot>) -> Self {
        Self { books }
    }

    pub fn from_settings(books: &[BookSettings]) -> Self {
        Self::new(books.iter().map(BookRoot::from).collect())
    }

    fn book(&self, prefix: &str) -> Option<&BookRoot> {
        self.books.iter().find(|book| book.prefix == prefix)
    }
}

#[async_trait]
impl SourceStore for DirectorySourceStore {
    fn book_prefixes(&self) -> Vec<String> {
        self.books.iter().map(|book| book.prefix.clone()).collect()
    }

    async fn resolve(&self, source: &SourceRef) -> io::Result<Option<SourceArtifact>> {
        let Some(book) = self.book(source.book()) else {
            return Ok(None);
        };
        let Some(file) = join_relative(&book.root, source.path()) else {
            debug!(
                target = "infra::sources",
                op = "resolve",
                result = "rejected",
                path = %source.path(),
                "Diagram path escapes its book"
            );
            return Ok(None);
        };

        match fs::metadata(&file).await {
            Ok(meta) if meta.is_file() => Ok(Some(SourceArtifact {
                file,
                modified: meta.modified().ok(),
            })),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Join an in-book path onto a root, refusing anything but plain names.
fn join_relative(root: &Path, path: &str) -> Option<PathBuf> {
    let relative = Path::new(path.trim_start_matches('/'));
    if relative.as_os_str().is_empty()
        || relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

#[cfg(test)]
mod tests {
    use std::fs as std_fs;

    use tempfile::TempDir;

    use super::*;

    fn store_with(dir: &TempDir) -> DirectorySourceStore {
        DirectorySourceStore::new(vec![
            BookRoot {
                prefix: "/docs".into(),
                root: dir.path().join("docs"),
            },
            BookRoot {
                prefix: "/docs/api".into(),
                root: dir.path().join("api"),
            },
        ])
    }

    #[tokio::test]
    async fn resolves_existing_file_with_mtime() {
        let dir = TempDir::new().expect("temp dir");
        std_fs::create_dir_all(dir.path().join("docs/figures")).expect("mkdir");
        std_fs::write(dir.path().join("docs/figures/flow.dia"), b"<dia/>").expect("write");

        let store = store_with(&dir);
        let artifact = store
            .resolve(&SourceRef::new("/docs", "/figures/flow.dia"))
            .await
            .expect("resolve")
            .expect("artifact");

        assert_eq!(artifact.file, dir.path().join("docs/figures/flow.dia"));
        assert!(artifact.modified.is_some());
    }

    #[tokio::test]
    async fn missing_files_and_books_resolve_to_none() {
        let dir = TempDir::new().expect("temp dir");
        std_fs::create_dir_all(dir.path().join("docs")).expect("mkdir");
        let store = store_with(&dir);

        let missing = store
            .resolve(&SourceRef::new("/docs", "/nope.dia"))
            .await
            .expect("resolve");
        assert!(missing.is_none());

        let unknown_book = store
            .resolve(&SourceRef::new("/other", "/flow.dia"))
            .await
            .expect("resolve");
        assert!(unknown_book.is_none());

        let directory = store
            .resolve(&SourceRef::new("/docs", "/"))
            .await
            .expect("resolve");
        assert!(directory.is_none());
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let dir = TempDir::new().expect("temp dir");
        std_fs::create_dir_all(dir.path().join("docs")).expect("mkdir");
        std_fs::write(dir.path().join("secret.dia"), b"<dia/>").expect("write");
        let store = store_with(&dir);

        let escaped = store
            .resolve(&SourceRef::new("/docs", "/../secret.dia"))
            .await
            .expect("resolve");
        assert!(escaped.is_none());
    }

    #[test]
    fn locate_prefers_longest_book() {
        let dir = TempDir::new().expect("temp dir");
        let store = store_with(&dir);

        let source = store.locate("/docs/api/flow.dia").expect("located");
        assert_eq!(source, SourceRef::new("/docs/api", "/flow.dia"));

        let source = store.locate("/docs/apiary/flow.dia").expect("located");
        assert_eq!(source, SourceRef::new("/docs", "/apiary/flow.dia"));

        assert!(store.locate("/elsewhere/flow.dia").is_none());
    }
}
