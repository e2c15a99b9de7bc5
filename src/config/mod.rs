//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{collections::HashSet, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::{DEFAULT_NAMESPACE, PIXEL_DENSITIES, SuccessCriterion};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "diarender";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CONVERTER_TIMEOUT_SECS: u64 = 60;
pub(crate) const DEFAULT_CACHE_DIR: &str = "/tmp/diarender";

#[cfg(windows)]
pub(crate) const DEFAULT_CONVERTER_PATH: &str = r"C:\Program Files (x86)\Dia\bin\dia.exe";
#[cfg(not(windows))]
pub(crate) const DEFAULT_CONVERTER_PATH: &str = "/usr/bin/dia";

/// Command-line arguments for the diarender binary.
#[derive(Debug, Parser)]
#[command(name = "diarender", version, about = "Dia diagram export service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "DIARENDER_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve exported diagrams over HTTP.
    Serve(Box<ServeArgs>),
    /// Export a diagram at every configured pixel density and print the results as JSON.
    Render(RenderArgs),
    /// Export the diagram named by an export address and copy the PNG to a file.
    Fetch(FetchArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RenderOverrides {
    /// Override the dia executable used for exports.
    #[arg(long = "render-converter-path", value_name = "PATH")]
    pub converter_path: Option<PathBuf>,

    /// Override the directory holding cached exports.
    #[arg(long = "render-cache-dir", value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Override the converter timeout.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Override how converter success is judged (auto|exit-code|diagnostics).
    #[arg(long = "render-success-criterion", value_name = "MODE")]
    pub success_criterion: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub render: RenderOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Diagram path including its book prefix, e.g. `/docs/figures/flow.dia`.
    #[arg(value_name = "SOURCE")]
    pub source: String,

    /// Requested width in pixels; 0 leaves it unspecified.
    #[arg(long, default_value_t = 0)]
    pub width: u32,

    /// Requested height in pixels; 0 leaves it unspecified.
    #[arg(long, default_value_t = 0)]
    pub height: u32,
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    #[command(flatten)]
    pub overrides: RenderOverrides,

    /// Export address, e.g. `/docs/figures/flow-200x_.png`.
    #[arg(value_name = "ADDRESS")]
    pub address: String,

    /// File to write the PNG to.
    #[arg(long, short, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub render: RenderSettings,
    pub sources: SourceSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub converter_path: PathBuf,
    pub cache_dir: PathBuf,
    pub namespace: String,
    pub converter_timeout: Duration,
    pub success_criterion: SuccessCriterion,
    pub pixel_densities: Vec<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceSettings {
    pub books: Vec<BookSettings>,
}

/// A book: a directory of diagram sources published under a path prefix.
///
/// The prefix is either empty (the root book) or starts with `/` without a trailing one.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookSettings {
    pub prefix: String,
    pub root: PathBuf,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("DIARENDER").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_render_overrides(&args.overrides),
        Some(Command::Fetch(args)) => raw.apply_render_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    render: RawRenderSettings,
    sources: RawSourceSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }

        self.apply_render_overrides(&overrides.render);
    }

    fn apply_render_overrides(&mut self, overrides: &RenderOverrides) {
        if let Some(path) = overrides.converter_path.as_ref() {
            self.render.converter_path = Some(path.clone());
        }
        if let Some(dir) = overrides.cache_dir.as_ref() {
            self.render.cache_dir = Some(dir.clone());
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
        if let Some(mode) = overrides.success_criterion.as_ref() {
            self.render.success_criterion = Some(mode.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            render,
            sources,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let render = build_render_settings(render)?;
        let sources = build_source_settings(sources)?;

        Ok(Self {
            server,
            logging,
            render,
            sources,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let converter_path = render
        .converter_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONVERTER_PATH));
    if converter_path.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.converter_path",
            "path must not be empty",
        ));
    }

    let cache_dir = render
        .cache_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if cache_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "render.cache_dir",
            "path must not be empty",
        ));
    }

    let namespace = render
        .namespace
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
    if namespace.is_empty() || namespace.contains(['/', '\\']) || namespace.starts_with('.') {
        return Err(LoadError::invalid(
            "render.namespace",
            "must be a single non-hidden directory name",
        ));
    }

    let timeout_secs = render
        .timeout_seconds
        .unwrap_or(DEFAULT_CONVERTER_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "render.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let success_criterion = match render.success_criterion.as_deref() {
        None | Some("auto") => SuccessCriterion::for_platform(),
        Some("exit-code") => SuccessCriterion::TrustExitCode,
        Some("diagnostics") => SuccessCriterion::VerifyDiagnostics,
        Some(other) => {
            return Err(LoadError::invalid(
                "render.success_criterion",
                format!("unknown mode `{other}`; expected auto, exit-code or diagnostics"),
            ));
        }
    };

    let pixel_densities = render
        .pixel_densities
        .unwrap_or_else(|| PIXEL_DENSITIES.to_vec());
    validate_densities(&pixel_densities)?;

    Ok(RenderSettings {
        converter_path,
        cache_dir,
        namespace,
        converter_timeout: Duration::from_secs(timeout_secs),
        success_criterion,
        pixel_densities,
    })
}

fn validate_densities(densities: &[u32]) -> Result<(), LoadError> {
    if densities.is_empty() {
        return Err(LoadError::invalid(
            "render.pixel_densities",
            "at least one density is required",
        ));
    }
    if densities.contains(&0) {
        return Err(LoadError::invalid(
            "render.pixel_densities",
            "densities must be greater than zero",
        ));
    }
    if densities.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(LoadError::invalid(
            "render.pixel_densities",
            "densities must be strictly ascending",
        ));
    }
    Ok(())
}

fn build_source_settings(sources: RawSourceSettings) -> Result<SourceSettings, LoadError> {
    let mut seen = HashSet::new();
    for book in &sources.books {
        if !book.prefix.is_empty() && !book.prefix.starts_with('/') {
            return Err(LoadError::invalid(
                "sources.books",
                format!("prefix `{}` must start with `/`", book.prefix),
            ));
        }
        if book.prefix.ends_with('/') {
            return Err(LoadError::invalid(
                "sources.books",
                format!("prefix `{}` must not end with `/`", book.prefix),
            ));
        }
        if book.root.as_os_str().is_empty() {
            return Err(LoadError::invalid(
                "sources.books",
                format!("root of `{}` must not be empty", book.prefix),
            ));
        }
        if !seen.insert(book.prefix.as_str()) {
            return Err(LoadError::invalid(
                "sources.books",
                format!("prefix `{}` is configured twice", book.prefix),
            ));
        }
    }

    Ok(SourceSettings {
        books: sources.books,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    converter_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
    namespace: Option<String>,
    timeout_seconds: Option<u64>,
    success_criterion: Option<String>,
    pixel_densities: Option<Vec<u32>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSourceSettings {
    books: Vec<BookSettings>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
