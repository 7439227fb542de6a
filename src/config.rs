use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::args::Args;
use crate::render::Resolution;
use crate::retry::RetryingOperation;

/// Resolved run configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub subject: Option<String>,
    pub speaker: Option<String>,
    pub resolution: Resolution,
    pub fps: u32,
    pub piper_bin: PathBuf,
    pub piper_model: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    pub names_file: PathBuf,
    pub used_file: PathBuf,
    pub image_dir: PathBuf,
    pub audio_dir: PathBuf,
    pub video_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub concurrency: usize,
    pub min_duration: f64,
    pub model: String,
    pub delivery_attempts: u32,
    pub retry_base_delay: Duration,
    pub clear_cache: bool,
    pub openrouter_api_key: Option<String>,
    pub unsplash_access_key: Option<String>,
    pub whatsapp_chat_id: Option<String>,
    pub upload_url: String,
    pub bridge_url: String,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl From<Args> for Settings {
    fn from(args: Args) -> Self {
        let resolution = args.output_resolution.parse().unwrap_or_else(|e| {
            warn!(
                "Invalid --output-resolution: {}, using default. Error: {}",
                args.output_resolution, e
            );
            Resolution::default()
        });
        Self {
            subject: non_blank(args.subject),
            speaker: non_blank(args.speaker),
            resolution,
            fps: args.fps.max(1),
            piper_bin: args.piper_bin.into(),
            piper_model: args.piper_model.into(),
            ffmpeg_bin: args.ffmpeg_bin.into(),
            ffprobe_bin: args.ffprobe_bin.into(),
            names_file: args.names_file.into(),
            used_file: args.used_file.into(),
            image_dir: args.image_dir.into(),
            audio_dir: args.audio_dir.into(),
            video_dir: args.video_dir.into(),
            cache_dir: args.cache_dir.into(),
            concurrency: args.concurrency.max(1),
            min_duration: args.min_duration,
            model: args.model,
            delivery_attempts: args.delivery_attempts,
            retry_base_delay: Duration::try_from_secs_f64(args.retry_base_delay).unwrap_or_else(|_| {
                warn!("Invalid --retry-base-delay: {}, using default", args.retry_base_delay);
                RetryingOperation::BASE_DELAY
            }),
            clear_cache: args.clear_cache,
            openrouter_api_key: non_blank(args.openrouter_api_key),
            unsplash_access_key: non_blank(args.unsplash_access_key),
            whatsapp_chat_id: non_blank(args.whatsapp_chat_id),
            upload_url: args.upload_url,
            bridge_url: args.bridge_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_defaults() {
        let settings = Settings::from(Args::parse_from(["animalshorts"]));
        assert_eq!(settings.subject, None);
        assert_eq!(settings.resolution, Resolution::default());
        assert_eq!(settings.fps, 15);
        assert_eq!(settings.concurrency, 8);
        assert_eq!(settings.min_duration, 30.0);
        assert_eq!(settings.image_dir, PathBuf::from("output_images"));
        assert_eq!(settings.retry_base_delay, Duration::from_secs(1));
        assert!(!settings.clear_cache);
    }

    #[test]
    fn test_subject_and_resolution_override() {
        let settings = Settings::from(Args::parse_from([
            "animalshorts",
            "  Snow leopard ",
            "--output-resolution",
            "1080x1920",
            "--concurrency",
            "0",
        ]));
        assert_eq!(settings.subject.as_deref(), Some("Snow leopard"));
        assert_eq!(
            settings.resolution,
            Resolution {
                width: 1080,
                height: 1920
            }
        );
        assert_eq!(settings.concurrency, 1);
    }

    #[test]
    fn test_negative_retry_delay_falls_back() {
        let settings = Settings::from(Args::parse_from(["animalshorts", "--retry-base-delay=-2"]));
        assert_eq!(settings.retry_base_delay, RetryingOperation::BASE_DELAY);
    }

    #[test]
    fn test_invalid_resolution_falls_back() {
        let settings = Settings::from(Args::parse_from(["animalshorts", "--output-resolution", "huge"]));
        assert_eq!(settings.resolution, Resolution::default());
    }
}
