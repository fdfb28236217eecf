//! Binary PGM (`P5`) images and the collaborators built on them.
//!
//! The format is a short ASCII header followed by raw 8-bit samples:
//!
//! ```text
//! P5
//! # optional comments
//! <width> <height>
//! <maxval>
//! <width * height bytes>
//! ```
//!
//! Only `maxval` up to 255 (one byte per sample) is supported.

use crate::{Error, Result};

pub mod levels;
pub mod synth;

pub use levels::{LevelsAssessor, LevelsImprover, ZoomFinalizer};

/// An 8-bit grayscale image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graymap {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Graymap {
    /// Build an image from row-major pixels.
    pub fn new(width: usize, height: usize, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Artifact(format!("invalid dimensions {width}x{height}")));
        }
        if pixels.len() != width * height {
            return Err(Error::Artifact(format!(
                "expected {} pixels for {width}x{height}, got {}",
                width * height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A uniformly filled image.
    pub fn filled(width: usize, height: usize, value: u8) -> Result<Self> {
        Self::new(width, height, vec![value; width * height])
    }

    /// Image width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Image height.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Row-major pixels.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at `(x, y)`. Panics when out of bounds.
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.pixels[y * self.width + x]
    }

    /// Set the pixel at `(x, y)`. Panics when out of bounds.
    pub fn set(&mut self, x: usize, y: usize, value: u8) {
        self.pixels[y * self.width + x] = value;
    }

    /// Map every pixel through `f`, clamping to 0..=255.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            width: self.width,
            height: self.height,
            pixels: self.pixels.iter().map(|&p| clamp_u8(f(p as f64))).collect(),
        }
    }

    /// Decode a binary PGM file. Bytes after the first raster are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_prefix(bytes).map(|(img, _)| img)
    }

    /// Decode every image of a multi-image PGM stream, in order.
    pub fn decode_stream(bytes: &[u8]) -> Result<Vec<Self>> {
        let mut images = Vec::new();
        let mut rest = bytes;
        loop {
            let (img, used) = Self::decode_prefix(rest)?;
            images.push(img);
            rest = &rest[used..];
            let gap = rest.iter().take_while(|b| b.is_ascii_whitespace()).count();
            rest = &rest[gap..];
            if rest.is_empty() {
                return Ok(images);
            }
        }
    }

    /// Encode `frames` back to back as one multi-image PGM stream.
    pub fn encode_stream(frames: &[Graymap]) -> Vec<u8> {
        frames.iter().flat_map(Graymap::encode).collect()
    }

    /// Decode one image and report how many bytes it occupied.
    fn decode_prefix(bytes: &[u8]) -> Result<(Self, usize)> {
        if bytes.is_empty() {
            return Err(Error::Artifact("empty file".into()));
        }
        if !bytes.starts_with(b"P5") {
            return Err(Error::Artifact("not a binary PGM (missing P5 magic)".into()));
        }

        let mut header = HeaderReader { bytes, pos: 2 };
        let width = header.number("width")?;
        let height = header.number("height")?;
        let maxval = header.number("maxval")?;
        if maxval == 0 || maxval > 255 {
            return Err(Error::Artifact(format!("unsupported maxval {maxval}")));
        }
        // exactly one whitespace byte separates the header from the raster
        match bytes.get(header.pos) {
            Some(b) if b.is_ascii_whitespace() => header.pos += 1,
            _ => return Err(Error::Artifact("header not terminated".into())),
        }

        let expected = width
            .checked_mul(height)
            .ok_or_else(|| Error::Artifact(format!("dimensions {width}x{height} overflow")))?;
        let raster = &bytes[header.pos..];
        if raster.len() < expected {
            return Err(Error::Artifact(format!(
                "truncated raster: expected {expected} bytes, found {}",
                raster.len()
            )));
        }

        let pixels = if maxval == 255 {
            raster[..expected].to_vec()
        } else {
            raster[..expected]
                .iter()
                .map(|&v| ((v.min(maxval as u8) as usize * 255) / maxval) as u8)
                .collect()
        };
        Ok((Self::new(width, height, pixels)?, header.pos + expected))
    }

    /// Encode as binary PGM with `maxval` 255.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = format!("P5\n{} {}\n255\n", self.width, self.height).into_bytes();
        out.extend_from_slice(&self.pixels);
        out
    }

    /// Mean intensity.
    pub fn mean(&self) -> f64 {
        self.pixels.iter().map(|&p| p as f64).sum::<f64>() / self.pixels.len() as f64
    }

    /// Standard deviation of intensity.
    pub fn stddev(&self) -> f64 {
        let mean = self.mean();
        let var = self
            .pixels
            .iter()
            .map(|&p| (p as f64 - mean).powi(2))
            .sum::<f64>()
            / self.pixels.len() as f64;
        var.sqrt()
    }

    /// Variance of the absolute 4-neighbour Laplacian over interior pixels.
    ///
    /// Images narrower or shorter than 3 pixels have no interior and score 0.
    pub fn edge_variance(&self) -> f64 {
        if self.width < 3 || self.height < 3 {
            return 0.0;
        }
        let mut edges = Vec::with_capacity((self.width - 2) * (self.height - 2));
        for y in 1..self.height - 1 {
            for x in 1..self.width - 1 {
                let c = 4 * self.get(x, y) as i32;
                let n = self.get(x, y - 1) as i32
                    + self.get(x, y + 1) as i32
                    + self.get(x - 1, y) as i32
                    + self.get(x + 1, y) as i32;
                edges.push((c - n).unsigned_abs().min(255) as f64);
            }
        }
        let mean = edges.iter().sum::<f64>() / edges.len() as f64;
        edges.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / edges.len() as f64
    }

    /// 3×3 box blur, edges clamped.
    pub fn smoothed(&self) -> Self {
        let mut out = self.clone();
        for y in 0..self.height {
            for x in 0..self.width {
                let mut sum = 0u32;
                let mut count = 0u32;
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let nx = x as i64 + dx;
                        let ny = y as i64 + dy;
                        let inside = (0..self.width as i64).contains(&nx)
                            && (0..self.height as i64).contains(&ny);
                        if inside {
                            sum += self.get(nx as usize, ny as usize) as u32;
                            count += 1;
                        }
                    }
                }
                out.set(x, y, (sum / count) as u8);
            }
        }
        out
    }

    /// Blend towards `base` by `factor`: `base + (self - base) * factor`.
    pub fn blend_from(&self, base: &Graymap, factor: f64) -> Self {
        let pixels = self
            .pixels
            .iter()
            .zip(&base.pixels)
            .map(|(&p, &b)| clamp_u8(b as f64 + (p as f64 - b as f64) * factor))
            .collect();
        Self {
            width: self.width,
            height: self.height,
            pixels,
        }
    }
}

struct HeaderReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl HeaderReader<'_> {
    fn skip_separators(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else if b == b'#' {
                while let Some(&c) = self.bytes.get(self.pos) {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn number(&mut self, field: &str) -> Result<usize> {
        self.skip_separators();
        let start = self.pos;
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_digit) {
            self.pos += 1;
        }
        if start == self.pos {
            return Err(Error::Artifact(format!("missing {field} in header")));
        }
        std::str::from_utf8(&self.bytes[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::Artifact(format!("{field} out of range")))
    }
}

pub(crate) fn clamp_u8(v: f64) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}
