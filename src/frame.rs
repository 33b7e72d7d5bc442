//! RGBA video frames
//!
//! A `Frame` is the raster every video feed produces and the compositor draws
//! into. Pixels are stored row-major, four bytes per pixel.

use crate::utils::error::{RecorderError, RecorderResult};

/// An RGBA raster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Opaque black frame
    pub fn new(width: u32, height: u32) -> Self {
        Self::solid(width, height, [0, 0, 0, 255])
    }

    /// Frame filled with a single color
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Wrap existing RGBA bytes. Returns `None` if the length does not match.
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        if data.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Raw RGBA bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn index(&self, x: u32, y: u32) -> usize {
        ((y as usize * self.width as usize) + x as usize) * 4
    }

    /// Read a pixel. Out-of-bounds reads return `None`.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = self.index(x, y);
        let mut rgba = [0u8; 4];
        rgba.copy_from_slice(&self.data[idx..idx + 4]);
        Some(rgba)
    }

    /// Write a pixel. Out-of-bounds writes are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let idx = self.index(x, y);
        self.data[idx..idx + 4].copy_from_slice(&rgba);
    }

    /// Fill a rectangle, clipped to the frame
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgba: [u8; 4]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for py in y..y_end {
            for px in x..x_end {
                let idx = self.index(px, py);
                self.data[idx..idx + 4].copy_from_slice(&rgba);
            }
        }
    }

    /// Draw `src` scaled into the destination rectangle using nearest-neighbor
    /// sampling. Pixels falling outside this frame are clipped. Drawn pixels
    /// are always opaque.
    pub fn draw_scaled(&mut self, src: &Frame, dest_x: u32, dest_y: u32, dest_width: u32, dest_height: u32) {
        if src.width == 0 || src.height == 0 || dest_width == 0 || dest_height == 0 {
            return;
        }

        // Same size at the origin is a straight copy
        if dest_x == 0
            && dest_y == 0
            && src.dimensions() == (dest_width, dest_height)
            && self.dimensions() == (dest_width, dest_height)
        {
            self.data.copy_from_slice(&src.data);
            for pixel in self.data.chunks_exact_mut(4) {
                pixel[3] = 255;
            }
            return;
        }

        for dy in 0..dest_height {
            let frame_y = dest_y + dy;
            if frame_y >= self.height {
                break;
            }
            let src_y = ((dy as u64 * src.height as u64) / dest_height as u64) as u32;
            let src_y = src_y.min(src.height - 1);

            for dx in 0..dest_width {
                let frame_x = dest_x + dx;
                if frame_x >= self.width {
                    break;
                }
                let src_x = ((dx as u64 * src.width as u64) / dest_width as u64) as u32;
                let src_x = src_x.min(src.width - 1);

                let src_idx = src.index(src_x, src_y);
                let dest_idx = self.index(frame_x, frame_y);
                self.data[dest_idx..dest_idx + 3].copy_from_slice(&src.data[src_idx..src_idx + 3]);
                self.data[dest_idx + 3] = 255;
            }
        }
    }

    /// Encode the frame as a PNG image (used for preview snapshots)
    pub fn encode_png(&self) -> RecorderResult<Vec<u8>> {
        let mut out = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut out, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder
                .write_header()
                .map_err(|e| RecorderError::EncodingFailure(format!("PNG header: {e}")))?;
            writer
                .write_image_data(&self.data)
                .map_err(|e| RecorderError::EncodingFailure(format!("PNG data: {e}")))?;
        }
        Ok(out)
    }
}
