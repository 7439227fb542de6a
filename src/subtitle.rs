use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::layout::CaptionGroup;

/// Characters per subtitle line; sized for a 9:16 frame.
pub const LINE_WIDTH: usize = 32;

pub fn write_srt(path: &Path, captions: &[CaptionGroup]) -> Result<()> {
    let file = File::create(path).map_err(|e| PipelineError::io("creating subtitle file", e))?;
    let mut f = BufWriter::new(file);
    write_entries(&mut f, captions).map_err(|e| PipelineError::io("writing subtitle file", e))
}

fn write_entries(f: &mut impl Write, captions: &[CaptionGroup]) -> std::io::Result<()> {
    for (i, caption) in captions.iter().enumerate() {
        writeln!(f, "{}", i + 1)?;
        writeln!(
            f,
            "{} --> {}",
            format_srt_time(caption.start),
            format_srt_time(caption.end)
        )?;
        for line in wrap_text(&caption.text, LINE_WIDTH) {
            writeln!(f, "{}", line)?;
        }
        writeln!(f)?;
    }
    f.flush()
}

fn format_srt_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_sec = total_ms / 1000;
    let s = total_sec % 60;
    let total_min = total_sec / 60;
    let m = total_min % 60;
    let h = total_min / 60;
    format!("{:02}:{:02}:{:02},{:03}", h, m, s, ms)
}

fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in s.split_whitespace() {
        if current.len() + word.len() + 1 > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_srt_time() {
        assert_eq!(format_srt_time(0.0), "00:00:00,000");
        assert_eq!(format_srt_time(61.25), "00:01:01,250");
        assert_eq!(format_srt_time(3723.0), "01:02:03,000");
        assert_eq!(format_srt_time(-0.5), "00:00:00,000");
    }

    #[test]
    fn test_wrap_text() {
        let lines = wrap_text("the quick brown fox jumps over the lazy dog", 15);
        assert_eq!(lines, vec!["the quick brown", "fox jumps over", "the lazy dog"]);
        assert!(wrap_text("", 10).is_empty());
        assert_eq!(wrap_text("Hippopotamuses", 5), vec!["Hippopotamuses"]);
    }

    #[test]
    fn test_write_srt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subs.srt");
        let captions = vec![
            CaptionGroup {
                text: "Okapis live in the Congo.".into(),
                start: 0.0,
                end: 1.75,
            },
            CaptionGroup {
                text: "They eat leaves.".into(),
                start: 1.75,
                end: 3.0,
            },
        ];
        write_srt(&path, &captions).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            written,
            "1\n00:00:00,000 --> 00:00:01,750\nOkapis live in the Congo.\n\n\
             2\n00:00:01,750 --> 00:00:03,000\nThey eat leaves.\n\n"
        );
    }
}
