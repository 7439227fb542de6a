use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{PipelineError, Result};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Container duration in seconds as reported by ffprobe.
pub async fn probe_duration_seconds(ffprobe: &Path, path: &Path) -> Result<f64> {
    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0"])
        .arg(path)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();
    let output = tokio::time::timeout(PROBE_TIMEOUT, output)
        .await
        .map_err(|_| PipelineError::external("ffprobe", format!("timed out on {}", path.display())))?
        .map_err(|e| PipelineError::io("running ffprobe", e))?;
    if !output.status.success() {
        return Err(PipelineError::external(
            "ffprobe",
            format!("{} on {}", output.status, path.display()),
        ));
    }
    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(stdout: &str) -> Result<f64> {
    let duration = stdout
        .trim()
        .parse::<f64>()
        .map_err(|e| PipelineError::external("ffprobe", format!("unparseable duration {:?}: {}", stdout.trim(), e)))?;
    if !duration.is_finite() {
        return Err(PipelineError::external(
            "ffprobe",
            format!("non-finite duration {:?}", stdout.trim()),
        ));
    }
    Ok(duration)
}

/// Hard gate: artifacts shorter than `min_seconds` abort the run.
pub fn ensure_min_duration(kind: &str, path: &Path, duration: f64, min_seconds: f64) -> Result<()> {
    info!("{} {} duration: {:.2} seconds", kind, path.display(), duration);
    if !duration.is_finite() || duration < min_seconds {
        error!(
            "Generated {} {} is shorter than {} seconds",
            kind,
            path.display(),
            min_seconds
        );
        return Err(PipelineError::validation(format!(
            "{} {} is {:.2}s, below the {}s minimum",
            kind,
            path.display(),
            duration,
            min_seconds
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("31.416000\n").unwrap(), 31.416);
        assert!(parse_duration("N/A").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("nan\n").is_err());
        assert!(parse_duration("inf").is_err());
    }

    #[test]
    fn test_duration_gate() {
        let path = Path::new("out/lion.mp4");
        assert!(ensure_min_duration("video", path, 30.0, 30.0).is_ok());
        assert!(ensure_min_duration("video", path, 45.2, 30.0).is_ok());
        assert!(matches!(
            ensure_min_duration("audio", path, 29.9, 30.0),
            Err(PipelineError::Validation(_))
        ));
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(matches!(
                ensure_min_duration("video", path, bad, 30.0),
                Err(PipelineError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_missing_ffprobe_binary_is_io_error() {
        let err = probe_duration_seconds(Path::new("/no/such/ffprobe"), Path::new("x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io { .. }));
    }
}
