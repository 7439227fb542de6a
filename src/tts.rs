use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{PipelineError, Result};
use crate::orchestrator::CancelSignal;

#[async_trait]
pub trait NarrationSynthesizer: Send + Sync {
    /// Renders `text` to a WAV file at `out_path` and returns that path.
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        out_path: &Path,
        cancel: CancelSignal,
    ) -> Result<PathBuf>;
}

/// Runs the `piper` binary with the text on stdin.
#[derive(Debug, Clone)]
pub struct PiperSynthesizer {
    binary: PathBuf,
    model: PathBuf,
}

impl PiperSynthesizer {
    pub fn new(binary: impl Into<PathBuf>, model: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl NarrationSynthesizer for PiperSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        voice: Option<&str>,
        out_path: &Path,
        mut cancel: CancelSignal,
    ) -> Result<PathBuf> {
        if !self.model.exists() {
            return Err(PipelineError::Configuration(format!(
                "piper model not found: {}",
                self.model.display()
            )));
        }
        if let Some(parent) = out_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::io("creating audio output dir", e))?;
        }

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(out_path);
        if let Some(speaker) = voice {
            cmd.args(["--speaker", speaker]);
        }
        info!("Calling Piper TTS for output file {}", out_path.display());

        // Dropping the child (on cancellation) kills the process.
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::io("spawning piper", e))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| PipelineError::external("piper", "stdin was not captured"))?;
            stdin
                .write_all(text.as_bytes())
                .await
                .map_err(|e| PipelineError::io("writing text to piper", e))?;
        }

        let status = tokio::select! {
            status = child.wait() => status.map_err(|e| PipelineError::io("waiting for piper", e))?,
            _ = cancel.cancelled() => {
                info!("Narration cancelled; stopping piper");
                return Err(PipelineError::Cancelled("narration"));
            }
        };
        if !status.success() {
            error!("Piper TTS command failed for {}", out_path.display());
            return Err(PipelineError::external(
                "piper",
                format!("command returned {}", status),
            ));
        }

        info!("Piper TTS audio generated successfully: {}", out_path.display());
        Ok(out_path.to_path_buf())
    }
}

/// Markdown emphasis from the text generator would be read out literally.
pub fn clean_for_speech(text: &str) -> String {
    text.replace('*', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_for_speech_strips_asterisks() {
        assert_eq!(
            clean_for_speech("The **okapi** is *shy*."),
            "The okapi is shy."
        );
    }

    #[tokio::test]
    async fn test_missing_model_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let piper = PiperSynthesizer::new("piper", dir.path().join("missing.onnx"));
        let (_tx, rx) = tokio::sync::watch::channel(false);
        let err = piper
            .synthesize("hello", None, &dir.path().join("out.wav"), CancelSignal::from_receiver(rx))
            .await
            .unwrap_err();
        assert!(err.is_fatal_config());
    }
}
