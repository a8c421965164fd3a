use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use taxsale_core::error::AppError;
use taxsale_core::models::{DocumentHints, RawRow};
use taxsale_core::traits::CustomProfileRunner;
use tokio::process::Command;

/// What an extractor script prints on stdout.
#[derive(Debug, Deserialize)]
struct ScriptOutput {
    #[serde(default)]
    rows: Vec<RawRow>,
    #[serde(default)]
    error: Option<String>,
}

/// Custom-profile collaborator that shells out to a jurisdiction extractor.
///
/// The command is invoked as `<program> <args..> --location <location>
/// --hints <json>` and must print `{"rows": [[...], ...]}` in canonical
/// column order, or `{"error": "..."}` when it found nothing to extract.
#[derive(Debug, Clone)]
pub struct ScriptRunner {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl ScriptRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(90),
        }
    }

    /// Parses a whitespace-separated command line such as `python3 extract.py`.
    pub fn from_command_line(command: &str) -> Result<Self, AppError> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| AppError::ConfigError("Custom extractor command is empty".into()))?;
        Ok(Self {
            args: parts.collect(),
            ..Self::new(program)
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CustomProfileRunner for ScriptRunner {
    async fn generate_and_run_extractor(
        &self,
        hints: &DocumentHints,
    ) -> Result<Vec<RawRow>, AppError> {
        let hints_json = serde_json::to_string(hints)?;
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(["--location", &hints.location, "--hints", &hints_json])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %self.program, document_id = %hints.document_id, "Running extractor script");
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| AppError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| AppError::Generic(format!("Failed to run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(program = %self.program, %stderr, "Extractor script failed");
            return Err(AppError::Generic(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let parsed: ScriptOutput = serde_json::from_slice(&output.stdout)?;
        if let Some(error) = parsed.error {
            return Err(AppError::NoExtractableContent(error));
        }
        Ok(parsed.rows)
    }
}
