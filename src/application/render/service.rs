use std::{path::PathBuf, sync::Arc, time::Instant};

use futures::future::try_join_all;
use metrics::{counter, histogram};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    cache::{CacheDirectory, CacheKey, ExportAddress, ImageSizeCache, SingleFlight},
    domain::{
        staleness::is_stale,
        types::{RenderedDiagram, RequestedSize, SourceArtifact, SourceRef, SourceStore},
    },
};

use super::{
    converter::{ConvertRequest, DiaConverter},
    placeholder::effective_base_size,
    types::RenderError,
};

/// Namespace directory for exports beneath the cache root.
pub const DEFAULT_NAMESPACE: &str = "diagram-export";

/// Supported pixel densities, lowest first. The first entry is the default.
pub const PIXEL_DENSITIES: [u32; 4] = [1, 2, 3, 4];

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub converter: DiaConverter,
    pub cache_root: PathBuf,
    pub namespace: String,
    pub pixel_densities: Vec<u32>,
}

impl From<&crate::config::RenderSettings> for RendererConfig {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            converter: DiaConverter::new(
                settings.converter_path.clone(),
                settings.success_criterion,
                settings.converter_timeout,
            ),
            cache_root: settings.cache_dir.clone(),
            namespace: settings.namespace.clone(),
            pixel_densities: settings.pixel_densities.clone(),
        }
    }
}

/// Exports diagrams to PNG, reusing fresh cached exports and coalescing concurrent
/// regenerations of the same export.
pub struct DiagramRenderer {
    sources: Arc<dyn SourceStore>,
    converter: DiaConverter,
    cache: CacheDirectory,
    namespace: String,
    densities: Vec<u32>,
    flights: SingleFlight<CacheKey, RenderedDiagram, RenderError>,
    image_sizes: Arc<ImageSizeCache>,
}

impl DiagramRenderer {
    pub fn new(config: RendererConfig, sources: Arc<dyn SourceStore>) -> Self {
        Self {
            sources,
            converter: config.converter,
            cache: CacheDirectory::new(config.cache_root),
            namespace: config.namespace,
            densities: config.pixel_densities,
            flights: SingleFlight::new(),
            image_sizes: Arc::new(ImageSizeCache::new()),
        }
    }

    pub fn densities(&self) -> &[u32] {
        &self.densities
    }

    pub fn sources(&self) -> &Arc<dyn SourceStore> {
        &self.sources
    }

    /// Number of exports currently being regenerated.
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Cache key for `source` at `size`.
    pub fn cache_key(&self, source: &SourceRef, size: RequestedSize) -> CacheKey {
        CacheKey::derive(&self.namespace, source, size)
    }

    pub async fn resolve(&self, source: &SourceRef) -> Result<Option<SourceArtifact>, RenderError> {
        self.sources
            .resolve(source)
            .await
            .map_err(|err| RenderError::io("resolving diagram source", err))
    }

    /// Export `source` at a single size.
    pub async fn export(
        &self,
        source: &SourceRef,
        size: RequestedSize,
    ) -> Result<RenderedDiagram, RenderError> {
        let artifact = self
            .resolve(source)
            .await?
            .ok_or_else(|| RenderError::not_found(source.combined()))?;
        self.export_resolved(source, &artifact, size).await
    }

    /// Export an already resolved source at a single size.
    pub async fn export_resolved(
        &self,
        source: &SourceRef,
        artifact: &SourceArtifact,
        size: RequestedSize,
    ) -> Result<RenderedDiagram, RenderError> {
        let key = self.cache_key(source, size);
        let output = self.cache.path_for(&key);
        self.cache
            .ensure_parent(&output)
            .await
            .map_err(|err| RenderError::io("creating cache directory", err))?;

        let job = ExportJob {
            converter: self.converter.clone(),
            image_sizes: Arc::clone(&self.image_sizes),
            artifact: artifact.clone(),
            output,
            size,
        };
        self.flights.obtain(key, move || job.run()).await
    }

    /// Export `source` once per density, all densities concurrently.
    ///
    /// `width`/`height` of `0` mean unspecified. Returns `Ok(None)` when the source does
    /// not exist, without invoking the converter. Results are in `densities` order; the
    /// first failure is returned as the error.
    pub async fn render_all(
        &self,
        source: &SourceRef,
        width: u32,
        height: u32,
        densities: &[u32],
    ) -> Result<Option<Vec<RenderedDiagram>>, RenderError> {
        let Some(artifact) = self.resolve(source).await? else {
            debug!(
                target = "application::render::service",
                op = "renderer::render_all",
                result = "missing_source",
                source = %source.combined(),
                "Diagram source unavailable"
            );
            return Ok(None);
        };

        let sizes = densities
            .iter()
            .map(|&density| scaled_size(width, height, density))
            .collect::<Result<Vec<_>, _>>()?;

        let exports = try_join_all(
            sizes
                .into_iter()
                .map(|size| self.export_resolved(source, &artifact, size)),
        )
        .await?;

        Ok(Some(exports))
    }

    /// Fan out over the configured densities, defaulting the width when neither
    /// dimension is given.
    pub async fn render(
        &self,
        source: &SourceRef,
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<RenderedDiagram>>, RenderError> {
        let (width, height) = effective_base_size(width, height);
        self.render_all(source, width, height, &self.densities).await
    }

    /// Resolve and export the diagram named by an export address.
    ///
    /// Malformed addresses, unknown books and missing sources all yield `Ok(None)`.
    pub async fn export_address(
        &self,
        address: &str,
    ) -> Result<Option<RenderedDiagram>, RenderError> {
        let parsed = match ExportAddress::parse(address) {
            Ok(parsed) => parsed,
            Err(err) => {
                debug!(
                    target = "application::render::service",
                    op = "renderer::export_address",
                    result = "malformed",
                    address = %address,
                    error = %err,
                    "Rejected export address"
                );
                return Ok(None);
            }
        };
        let Some(source) = self.sources.locate(&parsed.combined_path) else {
            return Ok(None);
        };

        match self.export(&source, parsed.size).await {
            Ok(export) => Ok(Some(export)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}

/// Requested size for one density; `0` stays unspecified.
pub fn scaled_size(width: u32, height: u32, density: u32) -> Result<RequestedSize, RenderError> {
    let scale = |dimension: u32| -> Result<Option<u32>, RenderError> {
        if dimension == 0 {
            return Ok(None);
        }
        dimension
            .checked_mul(density)
            .map(Some)
            .ok_or(RenderError::SizeOverflow { dimension, density })
    };
    Ok(RequestedSize::new(scale(width)?, scale(height)?))
}

/// Freshness check plus conversion for one cache key. Runs at most once at a time per key.
struct ExportJob {
    converter: DiaConverter,
    image_sizes: Arc<ImageSizeCache>,
    artifact: SourceArtifact,
    output: PathBuf,
    size: RequestedSize,
}

impl ExportJob {
    async fn run(self) -> Result<RenderedDiagram, RenderError> {
        let started_at = Instant::now();
        let cached_modified = cached_modified(&self.output).await?;

        if is_stale(self.artifact.modified, cached_modified) {
            let converted = self
                .converter
                .convert(ConvertRequest {
                    source: &self.artifact.file,
                    output: &self.output,
                    size: self.size,
                    source_modified: self.artifact.modified,
                })
                .await;
            histogram!("diarender_convert_ms").record(started_at.elapsed().as_millis() as f64);
            if let Err(err) = converted {
                counter!("diarender_export_failed_total").increment(1);
                warn!(
                    target = "application::render::service",
                    op = "export::run",
                    result = "error",
                    output = %self.output.display(),
                    error = %err,
                    "Diagram export failed"
                );
                return Err(err.into());
            }
            counter!("diarender_export_converted_total").increment(1);
            info!(
                target = "application::render::service",
                op = "export::run",
                result = "converted",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                output = %self.output.display(),
                "Diagram export regenerated"
            );
        } else {
            counter!("diarender_export_fresh_total").increment(1);
            debug!(
                target = "application::render::service",
                op = "export::run",
                result = "fresh",
                output = %self.output.display(),
                "Cached diagram export is fresh"
            );
        }

        let modified = cached_modified_required(&self.output).await?;
        let dimensions = self.image_sizes.dimensions(&self.output, modified)?;

        Ok(RenderedDiagram {
            path: self.output,
            width: dimensions.width,
            height: dimensions.height,
            requested: self.size,
            modified,
        })
    }
}

async fn cached_modified(
    output: &std::path::Path,
) -> Result<Option<std::time::SystemTime>, RenderError> {
    match fs::metadata(output).await {
        Ok(meta) => Ok(meta.modified().ok()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(RenderError::io("reading cached export metadata", err)),
    }
}

async fn cached_modified_required(
    output: &std::path::Path,
) -> Result<Option<std::time::SystemTime>, RenderError> {
    let meta = fs::metadata(output)
        .await
        .map_err(|err| RenderError::io("reading exported diagram metadata", err))?;
    Ok(meta.modified().ok())
}
