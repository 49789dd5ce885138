//! Fixed-grid collage compositing.
//!
//! | images | grid (cols x rows) |
//! |--------|--------------------|
//! | 1      | 1 x 1              |
//! | 2      | 2 x 1              |
//! | 3, 4   | 2 x 2              |
//!
//! Anything past the fourth image is dropped without error.

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use thiserror::Error;

pub const CELL_SIZE: u32 = 512;
pub const MAX_COLLAGE_IMAGES: usize = 4;

#[derive(Debug, Error)]
pub enum CollageError {
    #[error("collage needs at least one image")]
    Empty,
    #[error("source image {index} could not be decoded: {source}")]
    Decode {
        index: usize,
        #[source]
        source: image::ImageError,
    },
    #[error("collage PNG encoding failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// Grid shape `(columns, rows)` for `count` images, after truncation to four.
pub fn grid_for(count: usize) -> (u32, u32) {
    match count.min(MAX_COLLAGE_IMAGES) {
        0 | 1 => (1, 1),
        2 => (2, 1),
        _ => (2, 2),
    }
}

/// Composites and encodes the collage as PNG.
pub fn composite(images: &[Vec<u8>]) -> Result<Vec<u8>, CollageError> {
    let canvas = composite_canvas(images)?;
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(canvas)
        .write_to(&mut out, ImageFormat::Png)
        .map_err(CollageError::Encode)?;
    Ok(out.into_inner())
}

/// Builds the collage canvas. Every source is decoded before anything is
/// drawn, so one bad image fails the whole collage.
pub fn composite_canvas(images: &[Vec<u8>]) -> Result<RgbaImage, CollageError> {
    if images.is_empty() {
        return Err(CollageError::Empty);
    }
    let placed = &images[..images.len().min(MAX_COLLAGE_IMAGES)];
    let cells = placed
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            image::load_from_memory(raw)
                .map(|decoded| {
                    imageops::resize(&decoded.to_rgba8(), CELL_SIZE, CELL_SIZE, FilterType::Triangle)
                })
                .map_err(|source| CollageError::Decode { index, source })
        })
        .collect::<Result<Vec<RgbaImage>, CollageError>>()?;

    let (cols, rows) = grid_for(cells.len());
    let mut canvas = RgbaImage::from_pixel(
        cols * CELL_SIZE,
        rows * CELL_SIZE,
        Rgba([255, 255, 255, 255]),
    );
    for (idx, cell) in cells.iter().enumerate() {
        let col = idx as u32 % cols;
        let row = idx as u32 / cols;
        imageops::overlay(
            &mut canvas,
            cell,
            i64::from(col * CELL_SIZE),
            i64::from(row * CELL_SIZE),
        );
    }
    Ok(canvas)
}
