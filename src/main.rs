use std::{future::IntoFuture, process, sync::Arc};

use diarender::{
    application::{
        error::AppError,
        render::{DiagramRenderer, DisplaySize, MISSING_IMAGE_PATH, RendererConfig},
    },
    config,
    domain::types::SourceStore,
    infra::{
        error::InfraError,
        http::{self, ExportState, export_url},
        sources::DirectorySourceStore,
        telemetry,
    },
};
use serde_json::json;
use tokio::sync::Notify;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    let renderer = Arc::new(build_renderer(&settings));

    match command {
        config::Command::Serve(_) => run_serve(&settings, renderer).await,
        config::Command::Render(args) => run_render(renderer, args).await,
        config::Command::Fetch(args) => run_fetch(renderer, args).await,
    }
}

fn build_renderer(settings: &config::Settings) -> DiagramRenderer {
    let sources: Arc<dyn SourceStore> =
        Arc::new(DirectorySourceStore::from_settings(&settings.sources.books));
    info!(
        target = "diarender::bootstrap",
        books = settings.sources.books.len(),
        converter = %settings.render.converter_path.display(),
        cache_dir = %settings.render.cache_dir.display(),
        "Diagram renderer configured"
    );
    DiagramRenderer::new(RendererConfig::from(&settings.render), sources)
}

async fn run_serve(
    settings: &config::Settings,
    renderer: Arc<DiagramRenderer>,
) -> Result<(), AppError> {
    let router = http::build_export_router(ExportState { renderer });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "diarender::bootstrap",
        addr = %settings.server.addr,
        "Serving diagram exports"
    );

    let draining = Arc::new(Notify::new());
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown({
            let draining = Arc::clone(&draining);
            async move {
                shutdown_signal().await;
                draining.notify_one();
            }
        })
        .into_future();
    let grace = settings.server.graceful_shutdown;

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = async {
            draining.notified().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "diarender::bootstrap",
                grace_secs = grace.as_secs(),
                "Graceful shutdown timed out; dropping open connections"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(
            target = "diarender::bootstrap",
            error = %err,
            "failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(target = "diarender::bootstrap", "Shutdown requested");
}

async fn run_render(
    renderer: Arc<DiagramRenderer>,
    args: config::RenderArgs,
) -> Result<(), AppError> {
    let source = renderer
        .sources()
        .locate(&args.source)
        .ok_or_else(|| AppError::NotFound(format!("no book contains `{}`", args.source)))?;

    let exports = renderer.render(&source, args.width, args.height).await?;
    let base_density = renderer.densities().first().copied().unwrap_or(1);
    let display = DisplaySize::resolve(
        exports.as_ref().and_then(|exports| exports.first()),
        base_density,
        args.width,
        args.height,
    );

    let descriptor = match exports {
        Some(exports) => {
            let exports: Vec<_> = exports
                .iter()
                .map(|export| {
                    json!({
                        "url": export_url(&source, export.requested).ok(),
                        "export": export,
                    })
                })
                .collect();
            json!({
                "source": source.combined(),
                "display": display,
                "exports": exports,
            })
        }
        None => json!({
            "source": source.combined(),
            "display": display,
            "placeholder": MISSING_IMAGE_PATH,
            "exports": [],
        }),
    };

    let rendered = serde_json::to_string_pretty(&descriptor)
        .map_err(|err| AppError::unexpected(format!("failed to encode descriptor: {err}")))?;
    println!("{rendered}");
    Ok(())
}

async fn run_fetch(renderer: Arc<DiagramRenderer>, args: config::FetchArgs) -> Result<(), AppError> {
    let export = renderer
        .export_address(&args.address)
        .await?
        .ok_or_else(|| AppError::NotFound(args.address.clone()))?;

    tokio::fs::copy(&export.path, &args.output)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "diarender::fetch",
        address = %args.address,
        output = %args.output.display(),
        width = export.width,
        height = export.height,
        "Diagram written"
    );
    Ok(())
}
