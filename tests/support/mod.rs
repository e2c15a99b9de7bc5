#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use diarender::{
    application::render::{
        DEFAULT_NAMESPACE, DiaConverter, DiagramRenderer, RendererConfig, SuccessCriterion,
    },
    infra::sources::{BookRoot, DirectorySourceStore},
};
use tempfile::TempDir;

pub const BOOK: &str = "/docs";

/// Widths the fake converter has canned PNGs for. `auto` is used when no width is requested.
const FIXTURE_WIDTHS: [&str; 6] = ["auto", "100", "200", "400", "600", "800"];

pub fn png_header(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&width.to_be_bytes());
    bytes.extend_from_slice(&height.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0, 0, 0, 0, 0]);
    bytes
}

/// Body of a converter that behaves like Dia: copies a canned PNG matching the requested
/// width and confirms the export on stderr.
pub fn confirming_converter(delay_secs: &str) -> String {
    format!(
        r#"
echo run >> "$CALLS"
sleep {delay_secs}
out=""
size=""
for arg in "$@"; do
  case "$arg" in
    --export=*) out="${{arg#--export=}}" ;;
    --size=*) size="${{arg#--size=}}" ;;
  esac
  src="$arg"
done
width="${{size%%x*}}"
[ -n "$width" ] || width=auto
cp "$FIXTURES/$width.png" "$out"
echo "$src --> $out" >&2
"#
    )
}

pub const FAILING_CONVERTER: &str = r#"
echo run >> "$CALLS"
echo "dia: could not open diagram" >&2
exit 2
"#;

/// Fails like [`FAILING_CONVERTER`], but only after a pause long enough for callers to pile up.
pub const SLOW_FAILING_CONVERTER: &str = r#"
echo run >> "$CALLS"
sleep 0.3
echo "dia: could not open diagram" >&2
exit 2
"#;

pub struct Fixture {
    pub dir: TempDir,
    pub renderer: Arc<DiagramRenderer>,
    calls: PathBuf,
}

impl Fixture {
    pub fn new(converter_body: &str) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let fixtures = dir.path().join("fixtures");
        fs::create_dir_all(&fixtures).expect("fixtures dir");
        for width in FIXTURE_WIDTHS {
            let (w, h) = match width.parse::<u32>() {
                Ok(w) => (w, w / 2),
                Err(_) => (320, 160),
            };
            fs::write(fixtures.join(format!("{width}.png")), png_header(w, h))
                .expect("write fixture");
        }

        let calls = dir.path().join("calls");
        let script = dir.path().join("fake-dia");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\nCALLS='{}'\nFIXTURES='{}'\n{converter_body}",
                calls.display(),
                fixtures.display()
            ),
        )
        .expect("write converter");
        let mut perms = fs::metadata(&script).expect("metadata").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script, perms).expect("set perms");

        let book_root = dir.path().join("book");
        fs::create_dir_all(&book_root).expect("book dir");
        let sources = DirectorySourceStore::new(vec![BookRoot {
            prefix: BOOK.to_string(),
            root: book_root,
        }]);

        let renderer = DiagramRenderer::new(
            RendererConfig {
                converter: DiaConverter::new(
                    script,
                    SuccessCriterion::VerifyDiagnostics,
                    Duration::from_secs(10),
                ),
                cache_root: dir.path().join("cache"),
                namespace: DEFAULT_NAMESPACE.to_string(),
                pixel_densities: vec![1, 2, 3, 4],
            },
            Arc::new(sources),
        );

        Self {
            dir,
            renderer: Arc::new(renderer),
            calls,
        }
    }

    /// Write a diagram source into the book and return its file path.
    pub fn write_source(&self, path_in_book: &str) -> PathBuf {
        let file = self
            .dir
            .path()
            .join("book")
            .join(path_in_book.trim_start_matches('/'));
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent).expect("source dir");
        }
        fs::write(&file, "<dia:diagram/>").expect("write source");
        file
    }

    pub fn cache_root(&self) -> PathBuf {
        self.dir.path().join("cache")
    }

    /// Number of converter invocations so far.
    pub fn calls(&self) -> usize {
        fs::read_to_string(&self.calls)
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }
}

/// Push a file's modification time forward.
pub fn touch_later(path: &Path, by: Duration) {
    let modified = fs::metadata(path)
        .and_then(|meta| meta.modified())
        .expect("mtime");
    let file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .expect("open for touch");
    file.set_modified(modified + by).expect("set mtime");
}
