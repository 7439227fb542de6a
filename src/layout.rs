//! Turns word timings and downloaded images into what the renderer needs:
//! on-screen caption groups and the time slot each image occupies.

use std::path::PathBuf;
use tracing::{debug, info};

use crate::timing::{Boundary, Transcript};

#[derive(Debug, Clone, PartialEq)]
pub struct CaptionGroup {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageSlot {
    pub path: PathBuf,
    pub start: f64,
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutConfig {
    /// Shortest time an image may stay on screen; limits how many are used.
    pub min_image_duration: f64,
    pub max_group_words: usize,
    /// A comma only closes a caption once it holds at least this many words.
    pub min_group_words_before_clause_break: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            min_image_duration: 1.5,
            max_group_words: 25,
            min_group_words_before_clause_break: 15,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Layout {
    pub captions: Vec<CaptionGroup>,
    pub slots: Vec<ImageSlot>,
}

pub struct CaptionLayoutAssembler {
    config: LayoutConfig,
}

impl CaptionLayoutAssembler {
    pub fn new(config: LayoutConfig) -> Self {
        Self { config }
    }

    pub fn assemble(&self, transcript: &Transcript, images: &[PathBuf], total_duration: f64) -> Layout {
        let layout = Layout {
            captions: self.group_captions(transcript),
            slots: self.slot_images(images, total_duration),
        };
        info!(
            "Layout: {} caption groups, {} of {} images over {:.2}s",
            layout.captions.len(),
            layout.slots.len(),
            images.len(),
            total_duration
        );
        layout
    }

    fn slot_images(&self, images: &[PathBuf], total_duration: f64) -> Vec<ImageSlot> {
        if images.is_empty() {
            return Vec::new();
        }
        let total = total_duration.max(0.0);
        let fit = if self.config.min_image_duration > 0.0 {
            ((total / self.config.min_image_duration).floor() as usize).max(1)
        } else {
            images.len()
        };
        let kept = fit.min(images.len());
        if kept < images.len() {
            debug!("Dropping {} images that would be on screen too briefly", images.len() - kept);
        }

        let slice = total / kept as f64;
        images[..kept]
            .iter()
            .enumerate()
            .map(|(i, path)| ImageSlot {
                path: path.clone(),
                start: i as f64 * slice,
                end: if i + 1 == kept {
                    total
                } else {
                    (i + 1) as f64 * slice
                },
            })
            .collect()
    }

    fn group_captions(&self, transcript: &Transcript) -> Vec<CaptionGroup> {
        let words = transcript.words();
        let mut groups = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut group_start = 0.0;

        for (i, word) in words.iter().enumerate() {
            if current.is_empty() {
                group_start = word.start;
            }
            current.push(&word.word);

            let boundary = Boundary::of_word(&word.word);
            let close = boundary == Boundary::Sentence
                || current.len() >= self.config.max_group_words
                || (boundary == Boundary::Clause
                    && current.len() >= self.config.min_group_words_before_clause_break)
                || i + 1 == words.len();
            if close {
                groups.push(CaptionGroup {
                    text: current.join(" "),
                    start: group_start,
                    end: word.end,
                });
                current.clear();
            }
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::WordTiming;

    fn transcript_of(words: &[&str]) -> Transcript {
        Transcript::new(
            words
                .iter()
                .enumerate()
                .map(|(i, w)| WordTiming {
                    word: w.to_string(),
                    start: i as f64 * 0.5,
                    end: i as f64 * 0.5 + 0.4,
                })
                .collect(),
        )
    }

    fn images(n: usize) -> Vec<PathBuf> {
        (0..n).map(|i| PathBuf::from(format!("img_{}.jpg", i))).collect()
    }

    fn assembler() -> CaptionLayoutAssembler {
        CaptionLayoutAssembler::new(LayoutConfig::default())
    }

    #[test]
    fn test_thirty_plain_words_make_groups_of_25_and_5() {
        let words: Vec<String> = (0..30).map(|i| format!("word{}", i)).collect();
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let layout = assembler().assemble(&transcript_of(&refs), &images(1), 15.0);

        assert_eq!(layout.captions.len(), 2);
        assert_eq!(layout.captions[0].text.split(' ').count(), 25);
        assert_eq!(layout.captions[1].text.split(' ').count(), 5);
        assert_eq!(layout.captions[0].start, 0.0);
        assert_eq!(layout.captions[0].end, 24.0 * 0.5 + 0.4);
        assert_eq!(layout.captions[1].start, 25.0 * 0.5);
    }

    #[test]
    fn test_sentence_end_closes_group() {
        let layout = assembler().assemble(
            &transcript_of(&["Lions", "roar.", "Cubs", "play!", "Why?"]),
            &[],
            5.0,
        );
        let texts: Vec<&str> = layout.captions.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["Lions roar.", "Cubs play!", "Why?"]);
    }

    #[test]
    fn test_comma_closes_group_only_when_long_enough() {
        let mut words: Vec<String> = (0..14).map(|i| format!("w{}", i)).collect();
        words[2] = "early,".into();
        words.push("late,".into());
        words.push("tail".into());
        let refs: Vec<&str> = words.iter().map(String::as_str).collect();
        let layout = assembler().assemble(&transcript_of(&refs), &[], 10.0);

        assert_eq!(layout.captions.len(), 2);
        assert!(layout.captions[0].text.ends_with("late,"));
        assert_eq!(layout.captions[0].text.split(' ').count(), 15);
        assert_eq!(layout.captions[1].text, "tail");
    }

    #[test]
    fn test_empty_transcript_has_no_captions() {
        let layout = assembler().assemble(&Transcript::default(), &images(3), 9.0);
        assert!(layout.captions.is_empty());
        assert_eq!(layout.slots.len(), 3);
    }

    #[test]
    fn test_image_count_capped_by_minimum_duration() {
        let layout = assembler().assemble(&Transcript::default(), &images(10), 10.0);
        assert_eq!(layout.slots.len(), 6);
        for (i, slot) in layout.slots.iter().enumerate() {
            assert_eq!(slot.path, PathBuf::from(format!("img_{}.jpg", i)));
            assert!((slot.end - slot.start - 10.0 / 6.0).abs() < 1e-9);
        }
        assert_eq!(layout.slots[0].start, 0.0);
        for pair in layout.slots.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(layout.slots.last().unwrap().end, 10.0);
    }

    #[test]
    fn test_single_image_spans_everything() {
        let layout = assembler().assemble(&Transcript::default(), &images(1), 42.0);
        assert_eq!(layout.slots.len(), 1);
        assert_eq!(layout.slots[0].start, 0.0);
        assert_eq!(layout.slots[0].end, 42.0);
    }

    #[test]
    fn test_short_audio_keeps_at_least_one_image() {
        let layout = assembler().assemble(&Transcript::default(), &images(4), 1.0);
        assert_eq!(layout.slots.len(), 1);
        assert_eq!(layout.slots[0].path, PathBuf::from("img_0.jpg"));
    }

    #[test]
    fn test_fewer_images_than_fit_uses_all() {
        let layout = assembler().assemble(&Transcript::default(), &images(3), 60.0);
        assert_eq!(layout.slots.len(), 3);
        assert_eq!(layout.slots[1].start, 20.0);
    }

    #[test]
    fn test_no_images_no_slots() {
        let layout = assembler().assemble(&transcript_of(&["hi."]), &[], 3.0);
        assert!(layout.slots.is_empty());
        assert_eq!(layout.captions.len(), 1);
    }
}
