//! Brightness / contrast / sharpness collaborators for PGM artifacts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::Graymap;
use crate::collaborator::{ArtifactRef, Assessor, Finalizer, Improvement, Improver};
use crate::state::{round3, Assessment, MetricScore};
use crate::Result;

/// Ideal mean-intensity band.
pub const BRIGHTNESS_LOW: f64 = 100.0;
/// Upper edge of the ideal mean-intensity band.
pub const BRIGHTNESS_HIGH: f64 = 180.0;
/// Standard deviation that earns a full contrast score.
pub const CONTRAST_TARGET: f64 = 50.0;
/// Edge variance that earns a full sharpness score.
pub const SHARPNESS_TARGET: f64 = 30.0;
/// Scale of each corrective boost: `1 + BOOST_STEP * (1 - score)`.
pub const BOOST_STEP: f64 = 0.4;
/// Zoom of the first frame of the final clip.
pub const ZOOM_START: f64 = 1.0;
/// Zoom reached at the end of the final clip.
pub const ZOOM_END: f64 = 1.2;
/// Length of the final clip.
pub const CLIP_DURATION: Duration = Duration::from_secs(5);
/// Frame rate of the final clip.
pub const CLIP_FPS: u32 = 24;
/// Frames in a default clip: `CLIP_DURATION * CLIP_FPS`.
pub const CLIP_FRAMES: usize = 120;

/// Metric name for mean intensity.
pub const BRIGHTNESS: &str = "brightness";
/// Metric name for intensity spread.
pub const CONTRAST: &str = "contrast";
/// Metric name for edge energy.
pub const SHARPNESS: &str = "sharpness";

async fn load(artifact: &ArtifactRef) -> Result<Graymap> {
    let bytes = tokio::fs::read(artifact.path()).await?;
    Graymap::decode(&bytes)
}

async fn store(path: &Path, bytes: Vec<u8>) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}

/// File stem with any `_iter<N>` or `_iter<N>_<M>` suffix from earlier
/// improvements removed.
fn base_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string());
    let numbered = |n: &str| {
        n.split('_')
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
    };
    match stem.rsplit_once("_iter") {
        Some((base, n)) if numbered(n) => base.to_string(),
        _ => stem,
    }
}

/// Whether `a` and `b` name the same file, lexically or after resolving links.
async fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn brightness_score(raw: f64) -> f64 {
    if (BRIGHTNESS_LOW..=BRIGHTNESS_HIGH).contains(&raw) {
        1.0
    } else if raw < BRIGHTNESS_LOW {
        raw / BRIGHTNESS_LOW
    } else {
        (255.0 - raw) / (255.0 - BRIGHTNESS_HIGH)
    }
}

/// Scores a graymap on brightness, contrast and sharpness.
#[derive(Debug, Default, Clone, Copy)]
pub struct LevelsAssessor;

impl LevelsAssessor {
    /// Score an in-memory image.
    pub fn score(img: &Graymap) -> BTreeMap<String, MetricScore> {
        let brightness = img.mean();
        let contrast = img.stddev();
        let sharpness = img.edge_variance();

        BTreeMap::from([
            (
                BRIGHTNESS.to_string(),
                MetricScore::new(round2(brightness), round3(brightness_score(brightness))),
            ),
            (
                CONTRAST.to_string(),
                MetricScore::new(round2(contrast), round3(contrast / CONTRAST_TARGET)),
            ),
            (
                SHARPNESS.to_string(),
                MetricScore::new(round2(sharpness), round3(sharpness / SHARPNESS_TARGET)),
            ),
        ])
    }
}

#[async_trait]
impl Assessor for LevelsAssessor {
    async fn assess(&self, artifact: &ArtifactRef) -> Result<BTreeMap<String, MetricScore>> {
        let img = load(artifact).await?;
        Ok(Self::score(&img))
    }
}

/// Applies corrective brightness, contrast and sharpness boosts.
///
/// Output goes to `<dir>/<stem>_iter<N>.pgm`, where `<dir>` is the configured
/// directory or `enhanced/` next to the input.
#[derive(Debug, Default, Clone)]
pub struct LevelsImprover {
    output_dir: Option<PathBuf>,
}

impl LevelsImprover {
    /// Write improved artifacts into `enhanced/` beside each input.
    pub fn beside_input() -> Self {
        Self { output_dir: None }
    }

    /// Write improved artifacts into `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: Some(dir.into()),
        }
    }

    /// Where iteration `iteration` of `input` is written. Never the input itself.
    async fn output_path(&self, input: &Path, iteration: u32) -> PathBuf {
        let dir = match &self.output_dir {
            Some(dir) => dir.clone(),
            None => {
                let parent = input.parent().unwrap_or_else(|| Path::new("."));
                // later iterations already live in the enhanced directory
                if parent.file_name().is_some_and(|name| name == "enhanced") {
                    parent.to_path_buf()
                } else {
                    parent.join("enhanced")
                }
            }
        };
        let stem = base_stem(input);
        let mut candidate = dir.join(format!("{stem}_iter{iteration}.pgm"));
        let mut attempt = 1;
        while same_file(&candidate, input).await {
            attempt += 1;
            candidate = dir.join(format!("{stem}_iter{iteration}_{attempt}.pgm"));
        }
        candidate
    }

    /// Apply the corrections for `assessment` to an in-memory image.
    pub fn enhance(img: &Graymap, assessment: &Assessment) -> (Graymap, Vec<String>) {
        let mut out = img.clone();
        let mut applied = Vec::new();
        let boost = |score: f64| 1.0 + BOOST_STEP * (1.0 - score);

        if let Some(m) = assessment.metrics.get(BRIGHTNESS).filter(|m| m.score < 1.0) {
            let mut factor = boost(m.score);
            if m.raw > BRIGHTNESS_HIGH {
                factor = 1.0 / factor;
            }
            out = out.map(|p| p * factor);
            applied.push(format!("Brightness x{factor:.2}"));
        }

        if let Some(m) = assessment.metrics.get(CONTRAST).filter(|m| m.score < 1.0) {
            let factor = boost(m.score);
            let mean = out.mean();
            out = out.map(|p| mean + (p - mean) * factor);
            applied.push(format!("Contrast x{factor:.2}"));
        }

        if let Some(m) = assessment.metrics.get(SHARPNESS).filter(|m| m.score < 1.0) {
            let factor = boost(m.score);
            out = out.blend_from(&out.smoothed(), factor);
            applied.push(format!("Sharpness x{factor:.2}"));
        }

        if applied.is_empty() {
            applied.push("No adjustment".to_string());
        }
        (out, applied)
    }
}

#[async_trait]
impl Improver for LevelsImprover {
    async fn improve(
        &self,
        artifact: &ArtifactRef,
        assessment: &Assessment,
        iteration: u32,
    ) -> Result<Improvement> {
        let img = load(artifact).await?;
        let (enhanced, applied) = Self::enhance(&img, assessment);

        let path = self.output_path(artifact.path(), iteration).await;
        store(&path, enhanced.encode()).await?;
        debug!(path = %path.display(), ?applied, "wrote improved artifact");

        Ok(Improvement {
            artifact: ArtifactRef::new(path),
            applied,
        })
    }
}

/// Renders the final artifact as a slow centred zoom clip.
///
/// Frame `k` is shown at `t = k / fps` and crops the centre `1 / scale` of the
/// image, where `scale = ZOOM_START + (ZOOM_END - ZOOM_START) * t / duration`,
/// then scales the crop back to full size. The frames are written back to back
/// as one multi-image PGM stream at `<output_dir>/<stem>_final.pgm`.
#[derive(Debug, Clone)]
pub struct ZoomFinalizer {
    output_dir: PathBuf,
    duration: Duration,
    fps: u32,
}

impl ZoomFinalizer {
    /// A finalizer rendering [`CLIP_FRAMES`] frames into `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            duration: CLIP_DURATION,
            fps: CLIP_FPS,
        }
    }

    /// Use a different clip length and frame rate.
    pub fn with_clip(mut self, duration: Duration, fps: u32) -> Self {
        self.duration = duration;
        self.fps = fps.max(1);
        self
    }

    /// Number of frames in the clip, at least one.
    pub fn frame_count(&self) -> usize {
        let frames = (self.duration.as_secs_f64() * self.fps as f64).round() as usize;
        frames.max(1)
    }

    /// Zoom of frame `frame`.
    pub fn zoom_at(&self, frame: usize) -> f64 {
        let seconds = self.duration.as_secs_f64();
        if seconds == 0.0 {
            return ZOOM_START;
        }
        let t = frame as f64 / self.fps as f64;
        ZOOM_START + (ZOOM_END - ZOOM_START) * (t / seconds).min(1.0)
    }

    /// Every frame of the clip for `img`.
    pub fn render_clip(&self, img: &Graymap) -> Vec<Graymap> {
        (0..self.frame_count())
            .map(|frame| Self::render(img, self.zoom_at(frame)))
            .collect()
    }

    /// Crop the centre `1/zoom` of the image and scale it back to full size.
    pub fn render(img: &Graymap, zoom: f64) -> Graymap {
        let (w, h) = (img.width(), img.height());
        let crop_w = ((w as f64 / zoom) as usize).clamp(1, w);
        let crop_h = ((h as f64 / zoom) as usize).clamp(1, h);
        let x0 = (w - crop_w) / 2;
        let y0 = (h - crop_h) / 2;

        let mut out = img.clone();
        for y in 0..h {
            for x in 0..w {
                let sx = x0 + x * crop_w / w;
                let sy = y0 + y * crop_h / h;
                out.set(x, y, img.get(sx, sy));
            }
        }
        out
    }
}

#[async_trait]
impl Finalizer for ZoomFinalizer {
    async fn finalize(&self, artifact: &ArtifactRef) -> Result<ArtifactRef> {
        let img = load(artifact).await?;
        let frames = self.render_clip(&img);
        let path = self
            .output_dir
            .join(format!("{}_final.pgm", base_stem(artifact.path())));
        store(&path, Graymap::encode_stream(&frames)).await?;
        debug!(path = %path.display(), frames = frames.len(), fps = self.fps, "wrote final clip");
        Ok(ArtifactRef::new(path))
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pgm::synth;
    use crate::Error;

    #[test]
    fn test_base_stem_strips_iteration_suffix() {
        assert_eq!(base_stem(Path::new("/a/photo_iter3.pgm")), "photo");
        assert_eq!(base_stem(Path::new("/a/photo_iterx.pgm")), "photo_iterx");
        assert_eq!(base_stem(Path::new("scan.pgm")), "scan");
        assert_eq!(base_stem(Path::new("/a/photo_iter1_2.pgm")), "photo");
        assert_eq!(base_stem(Path::new("/a/photo_iter1_.pgm")), "photo_iter1_");
    }

    #[test]
    fn test_brightness_band() {
        assert_eq!(brightness_score(140.0), 1.0);
        assert_eq!(brightness_score(50.0), 0.5);
        assert_eq!(brightness_score(255.0), 0.0);
    }

    #[test]
    fn test_flat_image_scores_low() {
        let scores = LevelsAssessor::score(&Graymap::filled(32, 32, 60).unwrap());
        let assessment = Assessment::from_metrics(scores);
        assert_eq!(assessment.score(BRIGHTNESS), Some(0.6));
        assert_eq!(assessment.score(CONTRAST), Some(0.0));
        assert_eq!(assessment.score(SHARPNESS), Some(0.0));
        assert!(assessment.overall < 0.6);
    }

    #[test]
    fn test_enhance_raises_dark_image() {
        let img = synth::scene(64, 48, 0, false);
        let assessment = Assessment::from_metrics(LevelsAssessor::score(&img));
        let (out, applied) = LevelsImprover::enhance(&img, &assessment);

        assert!(applied[0].starts_with("Brightness x"));
        assert!(out.mean() > img.mean());
    }

    #[test]
    fn test_render_keeps_dimensions() {
        let img = synth::scene(40, 30, 3, false);
        let out = ZoomFinalizer::render(&img, ZOOM_END);
        assert_eq!((out.width(), out.height()), (40, 30));
        assert_eq!(ZoomFinalizer::render(&img, ZOOM_START), img);
        let tiny = Graymap::filled(1, 1, 9).unwrap();
        assert_eq!(ZoomFinalizer::render(&tiny, ZOOM_END), tiny);
    }

    #[test]
    fn test_clip_zoom_ramps_over_duration() {
        let finalizer = ZoomFinalizer::new("out");
        assert_eq!(finalizer.frame_count(), CLIP_FRAMES);
        assert_eq!(
            CLIP_FRAMES,
            (CLIP_DURATION.as_secs() as usize) * CLIP_FPS as usize
        );
        assert_eq!(finalizer.zoom_at(0), ZOOM_START);
        // t = 60 / 24 = 2.5 s, half of the clip
        assert!((finalizer.zoom_at(60) - 1.1).abs() < 1e-9);
        assert!(finalizer.zoom_at(CLIP_FRAMES - 1) < ZOOM_END);
        assert!((finalizer.zoom_at(CLIP_FRAMES) - ZOOM_END).abs() < 1e-9);

        let still = ZoomFinalizer::new("out").with_clip(Duration::ZERO, 24);
        assert_eq!(still.frame_count(), 1);
        assert_eq!(still.zoom_at(0), ZOOM_START);
    }

    #[tokio::test]
    async fn test_finalizer_writes_zoom_clip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("scene_iter2.pgm");
        let img = synth::scene(48, 36, 4, false);
        std::fs::write(&input, img.encode()).unwrap();

        let finalizer =
            ZoomFinalizer::new(dir.path().join("final")).with_clip(Duration::from_secs(1), 6);
        let output = finalizer.finalize(&ArtifactRef::new(&input)).await.unwrap();
        assert_eq!(output.path(), dir.path().join("final").join("scene_final.pgm"));

        let frames = Graymap::decode_stream(&std::fs::read(output.path()).unwrap()).unwrap();
        assert_eq!(frames.len(), 6);
        assert_eq!(frames[0], img);
        for (k, frame) in frames.iter().enumerate() {
            assert_eq!((frame.width(), frame.height()), (48, 36));
            assert_eq!(*frame, ZoomFinalizer::render(&img, finalizer.zoom_at(k)));
        }
        assert_ne!(frames[5], frames[0]);
    }

    #[tokio::test]
    async fn test_improver_writes_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("dark.pgm");
        std::fs::write(&input, synth::scene(32, 32, 0, false).encode()).unwrap();
        let artifact = ArtifactRef::new(&input);

        let scores = LevelsAssessor.assess(&artifact).await.unwrap();
        let assessment = Assessment::from_metrics(scores);
        let improvement = LevelsImprover::beside_input()
            .improve(&artifact, &assessment, 1)
            .await
            .unwrap();

        assert_eq!(
            improvement.artifact.path(),
            dir.path().join("enhanced").join("dark_iter1.pgm")
        );
        assert!(improvement.artifact.path().exists());

        let second = LevelsImprover::beside_input()
            .improve(&improvement.artifact, &assessment, 2)
            .await
            .unwrap();
        assert_eq!(
            second.artifact.path(),
            dir.path().join("enhanced").join("dark_iter2.pgm")
        );
        assert_eq!(
            std::fs::read(&input).unwrap(),
            synth::scene(32, 32, 0, false).encode()
        );
    }

    #[tokio::test]
    async fn test_improver_never_overwrites_its_input() {
        let dir = tempfile::tempdir().unwrap();
        let enhanced = dir.path().join("enhanced");
        std::fs::create_dir_all(&enhanced).unwrap();
        let input = enhanced.join("sample_iter1.pgm");
        let original = synth::scene(32, 32, 0, false).encode();
        std::fs::write(&input, &original).unwrap();
        let artifact = ArtifactRef::new(&input);

        let assessment = Assessment::from_metrics(LevelsAssessor.assess(&artifact).await.unwrap());
        let improvement = LevelsImprover::beside_input()
            .improve(&artifact, &assessment, 1)
            .await
            .unwrap();

        assert_eq!(improvement.artifact.path(), enhanced.join("sample_iter1_2.pgm"));
        assert!(improvement.artifact.path().exists());
        assert_eq!(std::fs::read(&input).unwrap(), original);

        // a configured directory that already holds the input
        let again = LevelsImprover::new(enhanced.clone())
            .improve(&artifact, &assessment, 1)
            .await
            .unwrap();
        assert_eq!(again.artifact.path(), enhanced.join("sample_iter1_2.pgm"));
        assert_eq!(std::fs::read(&input).unwrap(), original);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let err = LevelsAssessor
            .assess(&ArtifactRef::new("/definitely/not/here.pgm"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
