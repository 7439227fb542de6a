use hound::{SampleFormat, WavReader};
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::timing::AudioSignal;

fn open(path: &Path) -> Result<WavReader<std::io::BufReader<std::fs::File>>> {
    WavReader::open(path).map_err(|e| match e {
        hound::Error::IoError(io) => PipelineError::io("opening narration WAV", io),
        other => PipelineError::validation(format!("{}: {}", path.display(), other)),
    })
}

pub fn wav_duration_seconds(path: &Path) -> Result<f64> {
    let reader = open(path)?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        return Err(PipelineError::validation(format!(
            "{}: header declares {} Hz, {} channels",
            path.display(),
            spec.sample_rate,
            spec.channels
        )));
    }
    let samples = reader.len();
    let frames = samples as f64 / spec.channels as f64;
    let duration = frames / spec.sample_rate as f64;
    Ok(duration)
}

/// Decodes a WAV file into a mono signal, averaging channels.
pub fn decode_signal(path: &Path) -> Result<AudioSignal> {
    let mut reader = open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>(),
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
        }
    }
    .map_err(|e| PipelineError::validation(format!("decoding {}: {}", path.display(), e)))?;

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok(AudioSignal {
        samples,
        sample_rate: spec.sample_rate,
    })
}
