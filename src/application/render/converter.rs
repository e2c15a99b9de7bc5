use std::{
    ffi::OsString,
    fs::OpenOptions,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
    time::{Duration, Instant, SystemTime},
};

use tokio::{fs, process::Command};
use tracing::{info, warn};

use crate::domain::types::RequestedSize;

use super::types::ConvertError;

/// How a zero exit status is confirmed as a successful conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuccessCriterion {
    /// The exit status alone is authoritative.
    TrustExitCode,
    /// Dia on Unix exits with zero even on failure; a zero exit only counts when the
    /// diagnostics contain the line `<source> --> <output>`.
    VerifyDiagnostics,
}

impl SuccessCriterion {
    /// Criterion matching the converter behaviour of the current platform.
    pub fn for_platform() -> Self {
        if cfg!(windows) {
            SuccessCriterion::TrustExitCode
        } else {
            SuccessCriterion::VerifyDiagnostics
        }
    }

    fn confirm(self, program: &str, diagnostics: &str, expected_line: &str) -> Result<(), ConvertError> {
        match self {
            SuccessCriterion::TrustExitCode => Ok(()),
            SuccessCriterion::VerifyDiagnostics => {
                if diagnostics.lines().any(|line| line == expected_line) {
                    Ok(())
                } else {
                    Err(ConvertError::Unconfirmed {
                        program: program.to_string(),
                        diagnostics: diagnostics.to_string(),
                    })
                }
            }
        }
    }
}

/// Value of the converter's `--size` option, absent when neither dimension is requested.
pub fn size_argument(size: RequestedSize) -> Option<String> {
    match (size.width, size.height) {
        (None, None) => None,
        (Some(width), None) => Some(format!("{width}x")),
        (None, Some(height)) => Some(format!("x{height}")),
        (Some(width), Some(height)) => Some(format!("{width}x{height}")),
    }
}

/// One conversion: render `source` into `output` at `size`.
#[derive(Debug, Clone, Copy)]
pub struct ConvertRequest<'a> {
    pub source: &'a Path,
    pub output: &'a Path,
    pub size: RequestedSize,
    /// Applied to the output so later staleness checks compare against the source.
    pub source_modified: Option<SystemTime>,
}

/// Runs the Dia command line exporter.
#[derive(Debug, Clone)]
pub struct DiaConverter {
    program: PathBuf,
    criterion: SuccessCriterion,
    timeout: Duration,
}

impl DiaConverter {
    pub fn new(program: PathBuf, criterion: SuccessCriterion, timeout: Duration) -> Self {
        Self {
            program,
            criterion,
            timeout,
        }
    }

    /// Arguments passed to the converter, in order.
    pub fn command_args(&self, source: &Path, output: &Path, size: RequestedSize) -> Vec<OsString> {
        let mut export = OsString::from("--export=");
        export.push(output.as_os_str());

        let mut args = vec![export, OsString::from("--filter=png")];
        if let Some(size) = size_argument(size) {
            args.push(OsString::from(format!("--size={size}")));
        }
        args.push(OsString::from("--log-to-stderr"));
        args.push(source.as_os_str().to_os_string());
        args
    }

    /// Convert into a staging file beside the output and rename it into place only after
    /// the conversion is confirmed, so a failed run never leaves a complete-looking file.
    pub async fn convert(&self, request: ConvertRequest<'_>) -> Result<(), ConvertError> {
        let started_at = Instant::now();
        let program = self.program.display().to_string();

        let source = fs::canonicalize(request.source)
            .await
            .map_err(|err| ConvertError::staging(request.source, err))?;
        let output_dir = request.output.parent().unwrap_or_else(|| Path::new("."));
        let output_dir = fs::canonicalize(output_dir)
            .await
            .map_err(|err| ConvertError::staging(output_dir, err))?;

        let staged = tempfile::Builder::new()
            .prefix(".export-")
            .suffix(".png")
            .tempfile_in(&output_dir)
            .map_err(|err| ConvertError::staging(&output_dir, err))?;
        let staged_path = staged.path().to_path_buf();

        let cli_started_at = Instant::now();
        let mut command = Command::new(&self.program);
        command
            .args(self.command_args(&source, &staged_path, request.size))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                warn!(
                    target = "application::render::converter",
                    op = "converter::convert",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_cli",
                    program = %program,
                    error = %err,
                    "Failed to spawn diagram converter"
                );
                return Err(ConvertError::Spawn {
                    program,
                    source: Arc::new(err),
                });
            }
            Err(_) => {
                warn!(
                    target = "application::render::converter",
                    op = "converter::convert",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "timeout",
                    program = %program,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Diagram converter timed out"
                );
                return Err(ConvertError::TimedOut {
                    program,
                    timeout: self.timeout,
                });
            }
        };

        let diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        if !output.status.success() {
            let exit_code = output.status.code();
            warn!(
                target = "application::render::converter",
                op = "converter::convert",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                cli_elapsed_ms = cli_started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "exit_status",
                stderr = %diagnostics,
                "Diagram converter failed"
            );
            return Err(ConvertError::ExitStatus {
                program,
                exit_code,
                diagnostics,
            });
        }

        let expected_line = format!("{} --> {}", source.display(), staged_path.display());
        if let Err(err) = self.criterion.confirm(&program, &diagnostics, &expected_line) {
            warn!(
                target = "application::render::converter",
                op = "converter::convert",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                cli_elapsed_ms = cli_started_at.elapsed().as_millis() as u64,
                error_code = "unconfirmed",
                stderr = %diagnostics,
                "Diagram converter exited cleanly without confirming the export"
            );
            return Err(err);
        }

        if let Some(modified) = request.source_modified {
            set_modified(&staged_path, modified)
                .map_err(|err| ConvertError::staging(&staged_path, err))?;
        }

        staged
            .persist(request.output)
            .map_err(|err| ConvertError::staging(request.output, err.error))?;

        info!(
            target = "application::render::converter",
            op = "converter::convert",
            result = "converted",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            cli_elapsed_ms = cli_started_at.elapsed().as_millis() as u64,
            output = %request.output.display(),
            "Diagram exported"
        );

        Ok(())
    }
}

// The converter may replace the staged file rather than write through our handle, so
// reopen by path.
fn set_modified(path: &Path, modified: SystemTime) -> std::io::Result<()> {
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_modified(modified)
}
