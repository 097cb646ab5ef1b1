//! PDF compilation with `pdflatex`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::errors::AdapterError;
use crate::stages::ports::{BinaryArtifact, BinaryCompiler, TypesetArtifact};

/// Default wall-clock limit for a single `pdflatex` pass.
pub const DEFAULT_PASS_TIMEOUT: Duration = Duration::from_secs(120);

/// Compiles LaTeX by running `pdflatex` in the source directory.
///
/// Two passes by default so that references and `lastpage` resolve. A
/// missing binary or a LaTeX error is permanent; a pass that exceeds the
/// timeout is reported as a timeout.
#[derive(Debug, Clone)]
pub struct PdfLatexCompiler {
    program: String,
    passes: u32,
    pass_timeout: Duration,
}

impl Default for PdfLatexCompiler {
    fn default() -> Self {
        Self {
            program: "pdflatex".to_string(),
            passes: 2,
            pass_timeout: DEFAULT_PASS_TIMEOUT,
        }
    }
}

impl PdfLatexCompiler {
    /// Creates a compiler using `pdflatex` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses a different executable.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the number of passes (at least one).
    #[must_use]
    pub fn with_passes(mut self, passes: u32) -> Self {
        self.passes = passes.max(1);
        self
    }

    /// Sets the per-pass timeout.
    #[must_use]
    pub fn with_pass_timeout(mut self, timeout: Duration) -> Self {
        self.pass_timeout = timeout;
        self
    }

    async fn pass(&self, dir: &Path, file: &str, pass: u32) -> Result<(), AdapterError> {
        let output = Command::new(&self.program)
            .args(["--interaction=nonstopmode", file])
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.pass_timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AdapterError::not_found(format!("{} is not installed", self.program)));
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(AdapterError::timeout(format!(
                    "{} pass {pass} exceeded {}s",
                    self.program,
                    self.pass_timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            // pdflatex reports errors on stdout; keep the tail for the run report.
            let log = String::from_utf8_lossy(&output.stdout);
            let tail: Vec<&str> = log.lines().rev().take(5).collect();
            warn!(program = %self.program, pass, status = ?output.status.code(), "LaTeX compilation failed");
            return Err(AdapterError::invalid_input(format!(
                "{} pass {pass} failed: {}",
                self.program,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }
        debug!(pass, "pdflatex pass complete");
        Ok(())
    }
}

#[async_trait]
impl BinaryCompiler for PdfLatexCompiler {
    async fn compile(&self, source: &TypesetArtifact) -> Result<BinaryArtifact, AdapterError> {
        let dir = source
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file = source
            .path
            .file_name()
            .and_then(|f| f.to_str())
            .ok_or_else(|| AdapterError::invalid_input(format!("bad LaTeX path {}", source.path.display())))?;

        if !tokio::fs::try_exists(&source.path).await? {
            return Err(AdapterError::not_found(format!("{} does not exist", source.path.display())));
        }

        for pass in 1..=self.passes {
            self.pass(dir, file, pass).await?;
        }

        let pdf = source.path.with_extension("pdf");
        if !tokio::fs::try_exists(&pdf).await? {
            return Err(AdapterError::other(format!(
                "{} finished but {} is missing",
                self.program,
                pdf.display()
            )));
        }
        info!(path = %pdf.display(), "Compiled PDF");
        Ok(BinaryArtifact { path: pdf })
    }
}
