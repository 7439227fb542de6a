use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use serde_json::json;
use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::retry::{AttemptError, RetryingOperation};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    data: Option<UploadData>,
}

#[derive(Debug, Deserialize)]
struct UploadData {
    #[serde(default)]
    url: String,
}

/// Turns a file host page URL into its direct download form by inserting
/// `dl` right after the host: `https://host/123/v.mp4` -> `https://host/dl/123/v.mp4`.
fn direct_download_url(page_url: &str) -> Option<String> {
    let mut parts: Vec<&str> = page_url.trim().split('/').collect();
    if parts.len() < 4 || parts[2].is_empty() {
        return None;
    }
    parts.insert(3, "dl");
    Some(parts.join("/"))
}

fn parse_upload(body: &str) -> Option<String> {
    let parsed: UploadResponse = serde_json::from_str(body).ok()?;
    direct_download_url(&parsed.data?.url)
}

/// Uploads a video to a temporary file host and hands the download link to a
/// local WhatsApp HTTP bridge.
pub struct WhatsAppBridge {
    client: reqwest::Client,
    upload_url: String,
    send_url: String,
    retry: RetryingOperation,
}

impl WhatsAppBridge {
    pub fn new(
        upload_url: impl Into<String>,
        send_url: impl Into<String>,
        retry: RetryingOperation,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PipelineError::Configuration(format!("building delivery client: {}", e)))?;
        Ok(Self {
            client,
            upload_url: upload_url.into(),
            send_url: send_url.into(),
            retry,
        })
    }

    /// Best effort; `false` once retries are exhausted or the file is gone.
    pub async fn deliver(&self, video: &Path, chat_id: &str) -> bool {
        info!(
            "Delivering {} to chat {} (up to {} attempts)",
            video.display(),
            chat_id,
            self.retry.max_attempts()
        );
        self.retry
            .execute("video delivery", |_| self.deliver_once(video, chat_id))
            .await
    }

    async fn deliver_once(&self, video: &Path, chat_id: &str) -> std::result::Result<(), AttemptError> {
        let bytes = tokio::fs::read(video).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => AttemptError::MissingInput(format!("{} does not exist", video.display())),
            _ => AttemptError::Transient(format!("reading {}: {}", video.display(), e)),
        })?;
        let file_name = video
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("video/mp4")
            .map_err(|e| AttemptError::Transient(e.to_string()))?;
        let res = self
            .client
            .post(&self.upload_url)
            .multipart(Form::new().part("file", part))
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("upload: {}", e)))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| AttemptError::Transient(format!("upload body: {}", e)))?;
        if !status.is_success() {
            return Err(AttemptError::Transient(format!("upload returned {}: {}", status, body)));
        }
        let video_url = parse_upload(&body)
            .ok_or_else(|| AttemptError::Transient(format!("upload response had no url: {}", body)))?;
        info!("Video uploaded successfully. URL: {}", video_url);

        let payload = json!({
            "chatId": chat_id,
            "contentType": "MessageMediaFromURL",
            "content": video_url,
        });
        debug!("Sending video link to chat {}", chat_id);
        let res = self
            .client
            .post(&self.send_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| AttemptError::Transient(format!("send: {}", e)))?;
        let status = res.status();
        if status != reqwest::StatusCode::OK {
            let body = res.text().await.unwrap_or_default();
            return Err(AttemptError::Transient(format!("send returned {}: {}", status, body)));
        }
        info!("Video sent successfully to chat {}", chat_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubServer;

    const UPLOADED: &[u8] = br#"{"status":"success","data":{"url":"http://tmpfiles.test/77/lion.mp4"}}"#;

    fn fast_retry() -> RetryingOperation {
        RetryingOperation::new(3).with_base_delay(Duration::from_millis(1))
    }

    fn video_file(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("lion.mp4");
        std::fs::write(&path, b"fake mp4 bytes").unwrap();
        path
    }

    #[test]
    fn test_direct_download_url() {
        assert_eq!(
            direct_download_url("https://tmpfiles.org/4521/lion.mp4").as_deref(),
            Some("https://tmpfiles.org/dl/4521/lion.mp4")
        );
        assert_eq!(direct_download_url(""), None);
        assert_eq!(direct_download_url("https://tmpfiles.org"), None);
    }

    #[test]
    fn test_parse_upload() {
        let body = r#"{"status":"success","data":{"url":"http://tmpfiles.org/77/okapi.mp4"}}"#;
        assert_eq!(parse_upload(body).as_deref(), Some("http://tmpfiles.org/dl/77/okapi.mp4"));
        assert_eq!(parse_upload(r#"{"status":"error"}"#), None);
        assert_eq!(parse_upload("<html>502</html>"), None);
    }

    #[tokio::test]
    async fn test_missing_video_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let bridge = WhatsAppBridge::new(
            "http://127.0.0.1:9/upload",
            "http://127.0.0.1:9/send",
            RetryingOperation::new(3),
        )
        .unwrap();
        let started = std::time::Instant::now();
        assert!(!bridge.deliver(&dir.path().join("gone.mp4"), "123@c.us").await);
        // no backoff sleeps happened
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_missing_video_attempt_is_missing_input() {
        let bridge = WhatsAppBridge::new("http://127.0.0.1:9/u", "http://127.0.0.1:9/s", RetryingOperation::new(1))
            .unwrap();
        let err = bridge
            .deliver_once(Path::new("/definitely/not/here.mp4"), "123@c.us")
            .await
            .unwrap_err();
        assert!(matches!(err, AttemptError::MissingInput(_)));
    }

    #[tokio::test]
    async fn test_failed_upload_never_sends() {
        let server = StubServer::start(|path, _| match path {
            "/upload" => (500, b"{}".to_vec()),
            _ => (200, b"{}".to_vec()),
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let bridge = WhatsAppBridge::new(server.url("/upload"), server.url("/send"), fast_retry()).unwrap();

        assert!(!bridge.deliver(&video_file(dir.path()), "123@c.us").await);
        assert_eq!(server.hits("/upload"), 3);
        assert_eq!(server.hits("/send"), 0);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_sent() {
        let server = StubServer::start(|path, n| match (path, n) {
            ("/upload", 0) => (503, b"busy".to_vec()),
            ("/upload", _) => (200, UPLOADED.to_vec()),
            ("/send", 0) => (500, b"bridge down".to_vec()),
            _ => (200, b"{\"success\":true}".to_vec()),
        })
        .await;
        let dir = tempfile::tempdir().unwrap();
        let bridge = WhatsAppBridge::new(server.url("/upload"), server.url("/send"), fast_retry()).unwrap();

        assert!(bridge.deliver(&video_file(dir.path()), "123@c.us").await);
        assert_eq!(server.hits("/upload"), 3);
        assert_eq!(server.hits("/send"), 2);
    }
}
