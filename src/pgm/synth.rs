//! Deterministic synthetic artifacts for demos, bulk runs and fixtures.

use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Graymap;
use crate::collaborator::ArtifactRef;
use crate::Result;

/// Default sample dimensions.
pub const SAMPLE_WIDTH: usize = 160;
/// Default sample dimensions.
pub const SAMPLE_HEIGHT: usize = 120;

/// (background, foreground) levels. Each palette misses a different target.
const PALETTES: [(u8, u8); 5] = [
    (30, 70),   // dark
    (215, 245), // washed out
    (110, 130), // flat
    (20, 230),  // harsh
    (90, 170),  // balanced
];

/// `len` pseudo-random bytes, reproducible for a given `seed`.
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen::<u8>()).collect()
}

/// A rectangle and a disc over a lightly textured background.
///
/// `variant` picks the palette (wrapping), `blur` softens edges so the
/// sharpness metric has something to fix.
pub fn scene(width: usize, height: usize, variant: usize, blur: bool) -> Graymap {
    let (width, height) = (width.max(1), height.max(1));
    let (bg, fg) = PALETTES[variant % PALETTES.len()];
    let mut rng = StdRng::seed_from_u64(variant as u64);

    let (cx, cy) = (width as f64 * 0.68, height as f64 * 0.5);
    let radius = height.min(width) as f64 / 5.0;

    let mut pixels = Vec::with_capacity(width * height);
    for y in 0..height {
        for x in 0..width {
            let in_rect =
                (width / 6..width / 2).contains(&x) && (height / 4..height * 3 / 4).contains(&y);
            let (dx, dy) = (x as f64 - cx, y as f64 - cy);
            let in_disc = dx * dx + dy * dy <= radius * radius;
            let base = if in_rect || in_disc { fg } else { bg };
            let jitter: i16 = rng.gen_range(-8..=8);
            pixels.push((base as i16 + jitter).clamp(0, 255) as u8);
        }
    }

    let img = Graymap {
        width,
        height,
        pixels,
    };
    if blur {
        img.smoothed().smoothed()
    } else {
        img
    }
}

/// Write a default-sized sample to `path`.
pub async fn write_sample(path: &Path, variant: usize, blur: bool) -> Result<ArtifactRef> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let img = scene(SAMPLE_WIDTH, SAMPLE_HEIGHT, variant, blur);
    tokio::fs::write(path, img.encode()).await?;
    Ok(ArtifactRef::new(path))
}
