mod export;
mod middleware;

pub use export::{EXPORT_ROUTE_PREFIX, ExportState, build_export_router, export_url};
pub use middleware::RequestContext;
