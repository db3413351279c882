// src/scan.rs - Camera tiling of the bed
use async_trait::async_trait;
use image::GrayImage;
use serde::Serialize;
use thiserror::Error;

use crate::config::ScanConfig;
use crate::hardware::HardwareDriver;
use crate::session::{Session, SessionError};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid scan area: {0}")]
    InvalidArea(String),
    #[error("Camera error: {0}")]
    Camera(String),
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Region of the bed to photograph, mm.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanArea {
    /// Square from the origin.
    Square(f64),
    /// Width x height from the origin.
    Size { width: f64, height: f64 },
    Bounds { xmin: f64, ymin: f64, xmax: f64, ymax: f64 },
}

impl ScanArea {
    /// `(xmin, ymin, xmax, ymax)`
    pub fn bounds(&self) -> Result<(f64, f64, f64, f64), ScanError> {
        let bounds = match *self {
            ScanArea::Square(side) => (0.0, 0.0, side, side),
            ScanArea::Size { width, height } => (0.0, 0.0, width, height),
            ScanArea::Bounds { xmin, ymin, xmax, ymax } => (xmin, ymin, xmax, ymax),
        };
        let (xmin, ymin, xmax, ymax) = bounds;
        let finite = [xmin, ymin, xmax, ymax].iter().all(|v| v.is_finite());
        if !finite || xmax < xmin || ymax < ymin {
            return Err(ScanError::InvalidArea(format!("{:?}", self)));
        }
        Ok(bounds)
    }
}

/// One camera position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Tile {
    pub row: usize,
    pub col: usize,
    /// Head target, mm.
    pub x: f64,
    pub y: f64,
}

/// Tile centres covering an area, row by row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanPlan {
    pub rows: usize,
    pub cols: usize,
    pub tiles: Vec<Tile>,
}

impl ScanPlan {
    /// Neighbouring tiles are `fov * (1 - overlap)` apart; the last row and
    /// column may run past the far edge of the area.
    pub fn new(area: ScanArea, config: &ScanConfig) -> Result<Self, ScanError> {
        let (xmin, ymin, xmax, ymax) = area.bounds()?;
        let pitch_x = config.fov.0 * (1.0 - config.overlap.0);
        let pitch_y = config.fov.1 * (1.0 - config.overlap.1);
        if !(pitch_x > 0.0 && pitch_y > 0.0) {
            return Err(ScanError::InvalidArea(format!(
                "tile pitch {} x {} mm is not positive",
                pitch_x, pitch_y
            )));
        }
        let cols = ((xmax - xmin) / pitch_x) as usize + 1;
        let rows = ((ymax - ymin) / pitch_y) as usize + 1;
        let tiles = (0..rows)
            .flat_map(|row| {
                (0..cols).map(move |col| Tile {
                    row,
                    col,
                    x: xmin + (col as f64 + 0.5) * pitch_x,
                    y: ymin + (row as f64 + 0.5) * pitch_y,
                })
            })
            .collect();
        Ok(Self { rows, cols, tiles })
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}

/// Image source mounted on the head.
#[async_trait]
pub trait Camera: Send {
    async fn capture(&mut self) -> Result<GrayImage, ScanError>;
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub tile: Tile,
    /// Where the camera centre was, head position plus camera offset.
    pub camera_centre: (f64, f64),
    pub image: GrayImage,
}

/// Home if needed, then visit every tile and capture a frame there.
pub async fn scan_bed<D, C>(
    session: &mut Session<D>,
    area: ScanArea,
    config: &ScanConfig,
    camera: &mut C,
) -> Result<Vec<Frame>, ScanError>
where
    D: HardwareDriver,
    C: Camera + ?Sized,
{
    let plan = ScanPlan::new(area, config)?;
    tracing::info!("Scanning {} x {} tiles", plan.cols, plan.rows);
    if !session.is_homed() {
        session.home().await?;
    }
    session.set_absolute_mode();

    let mut frames = Vec::with_capacity(plan.len());
    for tile in plan.tiles {
        session.move_to(tile.x, tile.y, Some(config.feedrate)).await?;
        let image = camera.capture().await?;
        tracing::debug!("Captured tile ({}, {}) at X:{:.2} Y:{:.2}", tile.row, tile.col, tile.x, tile.y);
        frames.push(Frame {
            tile,
            camera_centre: (tile.x + config.offset.0, tile.y + config.offset.1),
            image,
        });
    }
    Ok(frames)
}
