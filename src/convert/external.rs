//! External converter subprocess (Calibre's `ebook-convert` by default).

use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

pub const DEFAULT_CONVERTER: &str = "ebook-convert";

/// Failure of one converter invocation. Carries the captured output for reporting.
#[derive(Debug, Error)]
pub enum ConverterError {
    #[error("Could not run {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} exited with {status}, output: {output}", program.display())]
    Failed {
        program: PathBuf,
        status: String,
        output: String,
    },

    #[error("{} reported success but did not write {}", program.display(), output_path.display())]
    MissingOutput {
        program: PathBuf,
        output_path: PathBuf,
    },
}

/// A converter executable invoked as `<program> <input> <output>`.
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    program: PathBuf,
}

impl ExternalConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Look the program up on PATH (or check an explicit path). None when not installed.
    pub fn detect(name: &str) -> Option<Self> {
        match which::which(name) {
            Ok(program) => {
                tracing::debug!(program = %program.display(), "Found external converter");
                Some(Self { program })
            }
            Err(e) => {
                tracing::debug!("External converter {} not available: {}", name, e);
                None
            }
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Run the conversion. Success means exit status 0 and an output file on disk.
    pub fn run(&self, input: &Path, output: &Path) -> Result<(), ConverterError> {
        tracing::info!(
            program = %self.program.display(),
            input = %input.display(),
            output = %output.display(),
            "Running external converter"
        );
        let result = Command::new(&self.program)
            .arg(input)
            .arg(output)
            .output()
            .map_err(|e| ConverterError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;
        if !result.status.success() {
            let mut combined = String::from_utf8_lossy(&result.stdout).into_owned();
            combined.push_str(&String::from_utf8_lossy(&result.stderr));
            return Err(ConverterError::Failed {
                program: self.program.clone(),
                status: result.status.to_string(),
                output: combined.trim().to_string(),
            });
        }
        if !output.exists() {
            return Err(ConverterError::MissingOutput {
                program: self.program.clone(),
                output_path: output.to_path_buf(),
            });
        }
        Ok(())
    }
}
