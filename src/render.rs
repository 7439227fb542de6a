use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};

use crate::error::{PipelineError, Result};
use crate::layout::{CaptionGroup, ImageSlot};
use crate::subtitle::write_srt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 720,
            height: 1280,
        }
    }
}

impl std::str::FromStr for Resolution {
    type Err = String;

    /// Parses `WIDTHxHEIGHT`, e.g. `1080x1920`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (w, h) = s
            .to_ascii_lowercase()
            .split_once('x')
            .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
        let width: u32 = w.parse().map_err(|e| format!("bad width {:?}: {}", w, e))?;
        let height: u32 = h.parse().map_err(|e| format!("bad height {:?}: {}", h, e))?;
        if width == 0 || height == 0 {
            return Err(format!("resolution must be non-zero, got {:?}", s));
        }
        Ok(Self { width, height })
    }
}

/// Fit inside the frame keeping aspect, pad with black, crop to exact size.
fn frame_filter(res: Resolution) -> String {
    let (w, h) = (res.width, res.height);
    let aspect = w as f64 / h as f64;
    format!(
        "scale='if(gt(a,{a}),{w},-2)':'if(gt(a,{a}),-2,{h})',pad={w}:{h}:({w}-iw)/2:({h}-ih)/2:black,crop={w}:{h}",
        a = aspect,
        w = w,
        h = h
    )
}

fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "\\\\")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

fn concat_quote(path: &Path) -> String {
    path.to_string_lossy().replace('\'', "'\\''")
}

/// ffmpeg concat-demuxer script; the last image is repeated so its duration
/// is honoured.
fn concat_script(slots: &[ImageSlot]) -> String {
    let mut script = String::new();
    for slot in slots {
        let _ = writeln!(script, "file '{}'", concat_quote(&slot.path));
        let _ = writeln!(script, "duration {:.6}", slot.end - slot.start);
    }
    if let Some(last) = slots.last() {
        let _ = writeln!(script, "file '{}'", concat_quote(&last.path));
    }
    script
}

pub struct FfmpegRenderer {
    binary: PathBuf,
    resolution: Resolution,
    fps: u32,
}

impl FfmpegRenderer {
    pub fn new(binary: impl Into<PathBuf>, resolution: Resolution, fps: u32) -> Self {
        Self {
            binary: binary.into(),
            resolution,
            fps,
        }
    }

    /// Renders the slideshow with narration and burned-in captions to `out`.
    /// Intermediate files (concat list, subtitles) are written next to `out`.
    pub async fn render(
        &self,
        slots: &[ImageSlot],
        captions: &[CaptionGroup],
        audio: &Path,
        out: &Path,
    ) -> Result<PathBuf> {
        if slots.is_empty() {
            return Err(PipelineError::validation("no image slots to render"));
        }
        let work_dir = out.parent().unwrap_or(Path::new("."));
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|e| PipelineError::io("creating video output dir", e))?;
        let stem = out
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());

        let absolute: Vec<ImageSlot> = slots
            .iter()
            .map(|s| {
                let path = std::path::absolute(&s.path).unwrap_or_else(|_| s.path.clone());
                ImageSlot { path, ..s.clone() }
            })
            .collect();
        let list_path = work_dir.join(format!("{}_images.txt", stem));
        tokio::fs::write(&list_path, concat_script(&absolute))
            .await
            .map_err(|e| PipelineError::io("writing ffmpeg concat list", e))?;
        info!("Created concat list file {}", list_path.display());

        let mut vf = frame_filter(self.resolution);
        if !captions.is_empty() {
            let srt_path = work_dir.join(format!("{}.srt", stem));
            write_srt(&srt_path, captions)?;
            info!("Writing subtitles to {}", srt_path.display());
            let _ = write!(
                vf,
                ",subtitles={}:force_style='Fontsize=18,Alignment=2,MarginV=60,OutlineColour=&H000000&,Outline=2,Shadow=0'",
                escape_filter_path(&srt_path)
            );
        }

        info!("Merging images, narration and captions into {}", out.display());
        let output = Command::new(&self.binary)
            .args(["-y", "-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .arg("-i")
            .arg(audio)
            .args(["-vf", &vf, "-c:v", "libx264", "-c:a", "aac", "-r"])
            .arg(self.fps.to_string())
            .arg("-shortest")
            .arg(out)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| PipelineError::io("running ffmpeg", e))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Error running ffmpeg: {}", stderr.trim());
            return Err(PipelineError::external(
                "ffmpeg",
                format!("{}: {}", output.status, last_line(&stderr)),
            ));
        }
        info!("Final video written to {}", out.display());
        Ok(out.to_path_buf())
    }
}

fn last_line(s: &str) -> &str {
    s.trim().lines().last().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resolution() {
        assert_eq!(
            "1080x1920".parse::<Resolution>().unwrap(),
            Resolution {
                width: 1080,
                height: 1920
            }
        );
        assert_eq!("720X1280".parse::<Resolution>().unwrap(), Resolution::default());
        assert!("1080".parse::<Resolution>().is_err());
        assert!("0x100".parse::<Resolution>().is_err());
        assert!("ax100".parse::<Resolution>().is_err());
    }

    #[test]
    fn test_frame_filter() {
        assert_eq!(
            frame_filter(Resolution::default()),
            "scale='if(gt(a,0.5625),720,-2)':'if(gt(a,0.5625),-2,1280)',\
             pad=720:1280:(720-iw)/2:(1280-ih)/2:black,crop=720:1280"
        );
    }

    #[test]
    fn test_concat_script_repeats_last_image() {
        let slots = vec![
            ImageSlot {
                path: PathBuf::from("/img/a.jpg"),
                start: 0.0,
                end: 2.5,
            },
            ImageSlot {
                path: PathBuf::from("/img/it's.png"),
                start: 2.5,
                end: 5.0,
            },
        ];
        assert_eq!(
            concat_script(&slots),
            "file '/img/a.jpg'\nduration 2.500000\n\
             file '/img/it'\\''s.png'\nduration 2.500000\n\
             file '/img/it'\\''s.png'\n"
        );
    }

    #[test]
    fn test_escape_filter_path() {
        assert_eq!(escape_filter_path(Path::new("C:\\out\\a.srt")), "C\\:\\\\out\\\\a.srt");
        assert_eq!(escape_filter_path(Path::new("out/lion.srt")), "out/lion.srt");
    }

    #[tokio::test]
    async fn test_render_without_slots_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = FfmpegRenderer::new("ffmpeg", Resolution::default(), 15);
        let err = renderer
            .render(&[], &[], Path::new("a.wav"), &dir.path().join("v.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
