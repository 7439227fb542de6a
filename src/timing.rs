//! Per-word timing for narration audio.
//!
//! Without a forced aligner the best we can do is estimate where each word
//! sits inside the synthesized audio. Estimation runs through an ordered list
//! of strategies: the first whose precondition holds and which produces a
//! result wins. The duration-based strategy has no precondition, so the
//! estimator always returns something (possibly an empty transcript).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};

const FRAME_SAMPLES: usize = 512;
const SILENCE_PERCENTILE: f64 = 20.0;
const BASE_WORD_SECONDS: f64 = 0.4;
const SENTENCE_PAUSE: f64 = 0.3;
const CLAUSE_PAUSE: f64 = 0.2;
const START_EPSILON: f64 = 1e-6;

static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Ordered word timings covering a whole narration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    words: Vec<WordTiming>,
}

impl Transcript {
    pub fn new(words: Vec<WordTiming>) -> Self {
        Self { words }
    }

    pub fn words(&self) -> &[WordTiming] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Non-negative intervals with non-decreasing starts.
    pub fn is_consistent(&self) -> bool {
        self.words
            .iter()
            .all(|w| w.start >= 0.0 && w.start <= w.end)
            && self.words.windows(2).all(|p| p[0].start <= p[1].start)
    }

    /// True when these timings were estimated from `text` and end within
    /// `total_duration`.
    pub fn fits(&self, text: &str, total_duration: f64) -> bool {
        let tokens = tokenize(text);
        !self.words.is_empty()
            && self.words.len() == tokens.len()
            && self.words.iter().zip(&tokens).all(|(w, t)| w.word == t.text)
            && self
                .words
                .last()
                .is_some_and(|w| w.end <= total_duration + START_EPSILON)
    }

    /// Writes the sidecar next to `audio_path` and returns its location.
    pub fn save(&self, audio_path: &Path) -> Result<PathBuf> {
        let path = sidecar_path(audio_path);
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::io("serializing timing sidecar", e.into()))?;
        fs::write(&path, data).map_err(|e| PipelineError::io("writing timing sidecar", e))?;
        info!("Word timings saved to {}", path.display());
        Ok(path)
    }

    /// Loads the sidecar for `audio_path`. Missing or unreadable sidecars
    /// yield an empty transcript, which callers treat as "recompute".
    pub fn load(audio_path: &Path) -> Transcript {
        let path = sidecar_path(audio_path);
        let data = match fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) => {
                debug!("No timing sidecar at {}: {}", path.display(), e);
                return Transcript::default();
            }
        };
        match serde_json::from_str::<Transcript>(&data) {
            Ok(transcript) if transcript.is_consistent() => transcript,
            Ok(_) => {
                warn!("Timing sidecar {} is out of order; ignoring it", path.display());
                Transcript::default()
            }
            Err(e) => {
                warn!("Error loading word timings from {}: {}", path.display(), e);
                Transcript::default()
            }
        }
    }
}

/// `out/lion.wav` -> `out/lion_timings.json`
pub fn sidecar_path(audio_path: &Path) -> PathBuf {
    let stem = audio_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    audio_path.with_file_name(format!("{}_timings.json", stem))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    None,
    Clause,
    Sentence,
}

impl Boundary {
    fn of_punctuation(punct: &str) -> Self {
        if punct.contains(['.', '!', '?']) {
            Boundary::Sentence
        } else if punct.contains(',') {
            Boundary::Clause
        } else {
            Boundary::None
        }
    }

    /// Classifies a display word by its trailing punctuation.
    pub fn of_word(word: &str) -> Self {
        let core = word.trim_end_matches(|c: char| !(c.is_alphanumeric() || c == '_'));
        Self::of_punctuation(&word[core.len()..])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    /// Alphanumeric run plus punctuation directly after it, when that
    /// punctuation ends the token (is followed by whitespace or end of text).
    pub text: String,
    /// Character count of the alphanumeric run alone.
    pub len: usize,
    pub boundary: Boundary,
}

pub(crate) fn tokenize(text: &str) -> Vec<Token> {
    let runs: Vec<_> = WORD_RE.find_iter(text).collect();
    runs.iter()
        .enumerate()
        .map(|(i, run)| {
            let next_start = runs.get(i + 1).map(|n| n.start()).unwrap_or(text.len());
            let gap = &text[run.end()..next_start];
            let at_break = i + 1 == runs.len() || gap.contains(char::is_whitespace);
            let punct = if at_break {
                gap.split(char::is_whitespace).next().unwrap_or("")
            } else {
                ""
            };
            Token {
                text: format!("{}{}", run.as_str(), punct),
                len: run.as_str().chars().count(),
                boundary: Boundary::of_punctuation(punct),
            }
        })
        .collect()
}

/// Decoded mono PCM, samples in [-1, 1].
#[derive(Debug, Clone)]
pub struct AudioSignal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioSignal {
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

struct TimingInput<'a> {
    tokens: &'a [Token],
    total_duration: f64,
    signal: Option<&'a AudioSignal>,
}

trait TimingStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn applies(&self, input: &TimingInput<'_>) -> bool;

    /// `None` means the strategy declined and the next one should run.
    fn estimate(&self, input: &TimingInput<'_>) -> Option<Vec<WordTiming>>;
}

/// Places words inside the speech regions of the energy envelope.
struct SignalSegmentation;

impl TimingStrategy for SignalSegmentation {
    fn name(&self) -> &'static str {
        "signal segmentation"
    }

    fn applies(&self, input: &TimingInput<'_>) -> bool {
        input
            .signal
            .is_some_and(|s| s.sample_rate > 0 && !s.samples.is_empty())
    }

    fn estimate(&self, input: &TimingInput<'_>) -> Option<Vec<WordTiming>> {
        let signal = input.signal?;
        let rms = frame_rms(&signal.samples);
        let threshold = percentile(&rms, SILENCE_PERCENTILE);
        let frame_seconds = FRAME_SAMPLES as f64 / signal.sample_rate as f64;

        let boundaries = speech_boundaries(&rms, threshold, frame_seconds);
        if boundaries.len() < 2 {
            debug!("Only {} speech boundaries found", boundaries.len());
            return None;
        }
        let segments: Vec<(f64, f64)> = boundaries.chunks_exact(2).map(|p| (p[0], p[1])).collect();
        let total_speech: f64 = segments.iter().map(|(s, e)| e - s).sum();
        let first_start = segments[0].0;
        if total_speech <= 0.0 || first_start > input.total_duration + START_EPSILON {
            return None;
        }
        debug!(
            "{} speech segments, {:.2}s of speech starting at {:.2}s",
            segments.len(),
            total_speech,
            first_start
        );

        let weights: Vec<f64> = input
            .tokens
            .iter()
            .map(|t| 0.8 + 0.4 * (t.len as f64 / 8.0))
            .collect();
        let total_weight: f64 = weights.iter().sum();

        let mut cursor = first_start;
        let words = input
            .tokens
            .iter()
            .zip(&weights)
            .map(|(token, w)| {
                let start = cursor;
                cursor += total_speech * w / total_weight;
                WordTiming {
                    word: token.text.clone(),
                    start,
                    end: cursor,
                }
            })
            .collect();
        Some(words)
    }
}

fn frame_rms(samples: &[f32]) -> Vec<f64> {
    samples
        .chunks(FRAME_SAMPLES)
        .map(|frame| {
            let energy: f64 = frame.iter().map(|s| (*s as f64).powi(2)).sum();
            (energy / frame.len() as f64).sqrt()
        })
        .collect()
}

/// Linear-interpolated percentile; `values` must be non-empty.
fn percentile(values: &[f64], pct: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

/// Alternating speech-start / speech-end timestamps. A segment still open at
/// the end of the signal is closed at the last frame.
fn speech_boundaries(rms: &[f64], threshold: f64, frame_seconds: f64) -> Vec<f64> {
    let mut boundaries = Vec::new();
    let mut in_speech = false;
    for (i, energy) in rms.iter().enumerate() {
        let is_speech = *energy > threshold;
        if is_speech != in_speech {
            boundaries.push(i as f64 * frame_seconds);
            in_speech = is_speech;
        }
    }
    if in_speech {
        boundaries.push((rms.len() - 1) as f64 * frame_seconds);
    }
    boundaries
}

/// Spreads the total duration over words by length and punctuation pauses.
struct DurationEstimate;

impl TimingStrategy for DurationEstimate {
    fn name(&self) -> &'static str {
        "duration estimate"
    }

    fn applies(&self, _input: &TimingInput<'_>) -> bool {
        true
    }

    fn estimate(&self, input: &TimingInput<'_>) -> Option<Vec<WordTiming>> {
        let durations: Vec<f64> = input
            .tokens
            .iter()
            .map(|t| {
                let base = BASE_WORD_SECONDS * (t.len as f64 / 8.0).max(0.1);
                match t.boundary {
                    Boundary::Sentence => base + SENTENCE_PAUSE,
                    Boundary::Clause => base + CLAUSE_PAUSE,
                    Boundary::None => base,
                }
            })
            .collect();
        let estimated: f64 = durations.iter().sum();
        let scale = if estimated > 0.0 {
            input.total_duration / estimated
        } else {
            1.0
        };

        let mut cursor = 0.0;
        let words = input
            .tokens
            .iter()
            .zip(durations)
            .map(|(token, d)| {
                let start = cursor;
                cursor += d * scale;
                WordTiming {
                    word: token.text.clone(),
                    start,
                    end: cursor,
                }
            })
            .collect();
        Some(words)
    }
}

pub struct TimingEstimator {
    strategies: Vec<Box<dyn TimingStrategy>>,
}

impl Default for TimingEstimator {
    fn default() -> Self {
        Self {
            strategies: vec![Box::new(SignalSegmentation), Box::new(DurationEstimate)],
        }
    }
}

impl TimingEstimator {
    /// Estimator that ignores any audio signal.
    #[cfg(test)]
    pub(crate) fn duration_only() -> Self {
        Self {
            strategies: vec![Box::new(DurationEstimate)],
        }
    }

    pub fn estimate(
        &self,
        text: &str,
        total_duration: f64,
        signal: Option<&AudioSignal>,
    ) -> Transcript {
        if !total_duration.is_finite() || total_duration <= 0.0 {
            warn!("Audio duration {} is degenerate; no word timings", total_duration);
            return Transcript::default();
        }
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Transcript::default();
        }

        let input = TimingInput {
            tokens: &tokens,
            total_duration,
            signal,
        };
        for strategy in &self.strategies {
            if !strategy.applies(&input) {
                debug!("Skipping {}: precondition not met", strategy.name());
                continue;
            }
            match strategy.estimate(&input) {
                Some(words) => {
                    info!("Estimated {} word timings using {}", words.len(), strategy.name());
                    return Transcript::new(words);
                }
                None => debug!("{} declined; trying next strategy", strategy.name()),
            }
        }
        warn!("No timing strategy produced a result");
        Transcript::default()
    }

    /// Timings for freshly synthesized audio at `audio_path`. A sidecar left
    /// by an earlier run is reused only if it matches `text` and fits the
    /// audio; otherwise the timings are estimated (decoding the signal via
    /// `signal`) and the sidecar is rewritten. A failed write is logged.
    pub fn estimate_with_sidecar<F>(
        &self,
        text: &str,
        audio_path: &Path,
        total_duration: f64,
        signal: F,
    ) -> Transcript
    where
        F: FnOnce() -> Option<AudioSignal>,
    {
        let saved = Transcript::load(audio_path);
        if saved.fits(text, total_duration) {
            info!("Reusing {} saved word timings", saved.len());
            return saved;
        }
        if !saved.is_empty() {
            warn!(
                "Saved word timings for {} do not match the new narration; re-estimating",
                audio_path.display()
            );
        }

        let signal = signal();
        let transcript = self.estimate(text, total_duration, signal.as_ref());
        if let Err(e) = transcript.save(audio_path) {
            warn!("Could not save word timings for {}: {}", audio_path.display(), e);
        }
        transcript
    }
}
