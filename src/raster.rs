// src/raster.rs - Intensity mask sampled while cutting
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Raster mask must have at least one pixel")]
    Empty,
    #[error("Raster rows must all have the same width")]
    Ragged,
    #[error("Raster resolution must be a positive number of dots per mm, got {0}")]
    InvalidDpmm(f64),
}

/// Immutable 2D intensity grid. Row 0 lies at machine y = 0, column 0 at x = 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterMask {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl RasterMask {
    /// A mask of one pixel at the given intensity.
    pub fn uniform(intensity: u8) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: vec![intensity],
        }
    }

    pub fn from_rows(rows: Vec<Vec<u8>>) -> Result<Self, RasterError> {
        let width = rows.first().map(Vec::len).unwrap_or(0);
        if width == 0 {
            return Err(RasterError::Empty);
        }
        if rows.iter().any(|row| row.len() != width) {
            return Err(RasterError::Ragged);
        }
        let height = rows.len();
        Ok(Self {
            width,
            height,
            pixels: rows.into_iter().flatten().collect(),
        })
    }

    /// Load an image file as a greyscale mask.
    ///
    /// The picture is flipped so its top edge lands at the far end of the bed.
    /// With `invert`, dark pixels become high intensity (they burn).
    pub fn from_image(path: impl AsRef<Path>, invert: bool) -> Result<Self, RasterError> {
        let path = path.as_ref();
        tracing::info!("Loading raster mask from {}", path.display());
        let img = image::open(path)?;
        let mut gray = img.to_luma8();
        image::imageops::flip_vertical_in_place(&mut gray);
        if invert {
            image::imageops::invert(&mut gray);
        }
        let (width, height) = (gray.width() as usize, gray.height() as usize);
        if width == 0 || height == 0 {
            return Err(RasterError::Empty);
        }
        Ok(Self {
            width,
            height,
            pixels: gray.into_raw(),
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Pixel lookup; `None` outside the grid.
    pub fn get(&self, col: usize, row: usize) -> Option<u8> {
        if col < self.width && row < self.height {
            self.pixels.get(row * self.width + col).copied()
        } else {
            None
        }
    }
}

/// A mask plus its spatial resolution.
///
/// The mask sits behind an `Arc`: replacing the raster swaps the whole pair,
/// and a plan that cloned the old one keeps sampling it.
#[derive(Debug, Clone)]
pub struct Raster {
    mask: Arc<RasterMask>,
    dpmm: f64,
}

impl Raster {
    pub fn new(mask: RasterMask, dpmm: f64) -> Result<Self, RasterError> {
        if !dpmm.is_finite() || dpmm <= 0.0 {
            return Err(RasterError::InvalidDpmm(dpmm));
        }
        Ok(Self {
            mask: Arc::new(mask),
            dpmm,
        })
    }

    /// Replace mask and resolution together.
    pub fn set(&mut self, mask: RasterMask, dpmm: f64) -> Result<(), RasterError> {
        *self = Self::new(mask, dpmm)?;
        Ok(())
    }

    /// Nearest-pixel intensity at a bed position; positions off the mask are 0.
    pub fn sample(&self, x_mm: f64, y_mm: f64) -> u8 {
        let col = (x_mm * self.dpmm).floor();
        let row = (y_mm * self.dpmm).floor();
        if !(col >= 0.0 && row >= 0.0) {
            return 0;
        }
        self.mask.get(col as usize, row as usize).unwrap_or(0)
    }

    pub fn dpmm(&self) -> f64 {
        self.dpmm
    }

    pub fn mask(&self) -> &Arc<RasterMask> {
        &self.mask
    }
}

impl Default for Raster {
    /// One full-intensity pixel stretched over the whole bed.
    fn default() -> Self {
        Self {
            mask: Arc::new(RasterMask::uniform(255)),
            dpmm: 0.00001,
        }
    }
}
