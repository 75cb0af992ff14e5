//! Captured frames and raw buffer conversion.

use image::{DynamicImage, GrayImage};

/// Pixel value below which a pixel counts as dark.
const DARK_PIXEL: u8 = 32;
/// Share of dark pixels above which the whole frame is considered dark.
pub const DARK_FRAME_RATIO: f32 = 0.95;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("buffer too short for {format}: expected {expected} bytes, got {actual}")]
    ShortBuffer {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// One grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Row-major luma, `width * height` bytes.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u32,
    pub is_dark: bool,
}

impl Frame {
    /// Build a frame from grayscale bytes, classifying brightness.
    pub fn from_gray(data: Vec<u8>, width: u32, height: u32, sequence: u32) -> Self {
        let is_dark = is_dark_frame(&data, DARK_FRAME_RATIO);
        Self {
            data,
            width,
            height,
            sequence,
            is_dark,
        }
    }

    /// Hand the pixels to the image stack. `None` if the buffer does not
    /// match the stated dimensions.
    pub fn into_image(self) -> Option<DynamicImage> {
        GrayImage::from_raw(self.width, self.height, self.data).map(DynamicImage::ImageLuma8)
    }
}

fn ensure_len(format: &'static str, buf: &[u8], expected: usize) -> Result<(), FrameError> {
    if buf.len() < expected {
        return Err(FrameError::ShortBuffer {
            format,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// YUYV 4:2:2 packs two pixels in `[Y0, U, Y1, V]`; luma is every even byte.
pub fn yuyv_to_gray(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    ensure_len("YUYV", buf, expected)?;
    Ok(buf[..expected].iter().step_by(2).copied().collect())
}

/// Y16 little-endian; keep the high byte.
pub fn y16_to_gray(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize * 2;
    ensure_len("Y16", buf, expected)?;
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

pub fn grey_to_gray(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = width as usize * height as usize;
    ensure_len("GREY", buf, expected)?;
    Ok(buf[..expected].to_vec())
}

/// True when more than `ratio` of the pixels are nearly black.
/// Covered lenses and cameras still settling produce these.
pub fn is_dark_frame(gray: &[u8], ratio: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_PIXEL).count();
    (dark as f32 / gray.len() as f32) > ratio
}
