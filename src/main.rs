mod args;
mod audio;
mod cache;
mod config;
mod delivery;
mod description;
mod error;
mod images;
mod layout;
mod media;
mod orchestrator;
mod render;
mod retry;
mod subject;
mod subtitle;
#[cfg(test)]
mod test_support;
mod timing;
mod tts;
mod utils;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::args::Args;
use crate::audio::{decode_signal, wav_duration_seconds};
use crate::cache::CacheStore;
use crate::config::Settings;
use crate::delivery::WhatsAppBridge;
use crate::description::{OpenRouterClient, describe_cached};
use crate::error::PipelineError;
use crate::images::{
    ImageDownloader, ImageSource, UnsplashSource, WikimediaSource, find_image_urls, sanitize_file_name,
};
use crate::layout::{CaptionLayoutAssembler, LayoutConfig};
use crate::media::{ensure_min_duration, probe_duration_seconds};
use crate::orchestrator::{CancelSignal, GenerationOrchestrator};
use crate::render::FfmpegRenderer;
use crate::retry::RetryingOperation;
use crate::subject::{pick_subject, record_used_subject};
use crate::timing::{TimingEstimator, Transcript};
use crate::tts::{NarrationSynthesizer, PiperSynthesizer, clean_for_speech};
use crate::utils::timed;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Output of the narration task.
#[derive(Debug)]
struct NarrationArtifact {
    audio_path: PathBuf,
    duration: f64,
    transcript: Transcript,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting animal short video generation pipeline");
    let settings = Settings::from(Args::parse());

    let cache = Arc::new(CacheStore::open(&settings.cache_dir));
    if settings.clear_cache {
        cache.clear();
        info!("Cleared cache at {}", cache.dir().display());
    }
    let http = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;

    let subject = match &settings.subject {
        Some(subject) => subject.clone(),
        None => pick_subject(&settings.names_file, &settings.used_file)?,
    };
    info!("Animal: {}", subject);

    let describer = OpenRouterClient::new(http.clone(), settings.openrouter_api_key.clone(), &settings.model);
    let description = timed("description", describe_cached(&describer, &cache, &subject)).await?;
    let narration_text = clean_for_speech(&description);
    if narration_text.trim().is_empty() {
        return Err(PipelineError::validation(format!("description of {} is empty", subject)).into());
    }
    info!("Description (short preview): {:.200}", narration_text);

    let file_stem = sanitize_file_name(&subject);
    let audio_path = settings.audio_dir.join(format!("{}.wav", file_stem));
    let synthesizer: Arc<dyn NarrationSynthesizer> =
        Arc::new(PiperSynthesizer::new(&settings.piper_bin, &settings.piper_model));

    let mut sources: Vec<Box<dyn ImageSource>> = vec![Box::new(WikimediaSource::new(http.clone()))];
    if settings.unsplash_access_key.is_some() {
        sources.push(Box::new(UnsplashSource::new(
            http.clone(),
            settings.unsplash_access_key.clone(),
        )));
    }
    let downloader = ImageDownloader::new(http.clone(), &settings.image_dir, settings.concurrency);

    let narration_job = {
        let text = narration_text.clone();
        let speaker = settings.speaker.clone();
        let min_duration = settings.min_duration;
        move |cancel: CancelSignal| async move {
            let audio_path = synthesizer
                .synthesize(&text, speaker.as_deref(), &audio_path, cancel)
                .await?;
            let duration = wav_duration_seconds(&audio_path)?;
            ensure_min_duration("audio", &audio_path, duration, min_duration)?;

            let transcript = TimingEstimator::default().estimate_with_sidecar(&text, &audio_path, duration, || {
                match decode_signal(&audio_path) {
                    Ok(signal) => {
                        debug!("Decoded {:.2}s of audio at {} Hz", signal.duration_seconds(), signal.sample_rate);
                        Some(signal)
                    }
                    Err(e) => {
                        warn!("Could not decode {} for segmentation: {}", audio_path.display(), e);
                        None
                    }
                }
            });
            Ok::<_, PipelineError>(NarrationArtifact {
                audio_path,
                duration,
                transcript,
            })
        }
    };

    let image_job = {
        let cache = Arc::clone(&cache);
        let subject = subject.clone();
        move |cancel: CancelSignal| async move {
            let urls = find_image_urls(&sources, &cache, &subject).await?;
            let paths = downloader.download_all(&urls, &subject, &cancel).await?;
            if paths.is_empty() {
                return Err(PipelineError::validation(format!("no images downloaded for {}", subject)));
            }
            Ok::<_, PipelineError>(paths)
        }
    };

    let (narration, image_paths) =
        timed("narration and image generation", GenerationOrchestrator::run(narration_job, image_job)).await?;

    let layout = CaptionLayoutAssembler::new(LayoutConfig::default()).assemble(
        &narration.transcript,
        &image_paths,
        narration.duration,
    );

    let renderer = FfmpegRenderer::new(&settings.ffmpeg_bin, settings.resolution, settings.fps);
    let video_path = settings.video_dir.join(format!("{}.mp4", file_stem));
    let video_path = timed(
        "video rendering",
        renderer.render(&layout.slots, &layout.captions, &narration.audio_path, &video_path),
    )
    .await?;
    let video_duration = probe_duration_seconds(&settings.ffprobe_bin, &video_path).await?;
    ensure_min_duration("video", &video_path, video_duration, settings.min_duration)?;

    match &settings.whatsapp_chat_id {
        Some(chat_id) => {
            let bridge = WhatsAppBridge::new(
                &settings.upload_url,
                &settings.bridge_url,
                RetryingOperation::new(settings.delivery_attempts).with_base_delay(settings.retry_base_delay),
            )?;
            if !bridge.deliver(&video_path, chat_id).await {
                warn!("Video {} was not delivered", video_path.display());
            }
        }
        None => warn!("WHATSAPP_CHAT_ID is not set; skipping delivery"),
    }

    record_used_subject(&settings.used_file, &subject)?;
    info!("Process complete.");
    Ok(())
}
