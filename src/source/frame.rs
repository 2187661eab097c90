use serde::{Deserialize, Serialize};

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
    Rgb8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }

    /// Byte offsets of the red, green and blue channels within one pixel.
    fn rgb_offsets(self) -> (usize, usize, usize) {
        match self {
            PixelFormat::Rgba8 | PixelFormat::Rgb8 => (0, 1, 2),
            PixelFormat::Bgra8 => (2, 1, 0),
        }
    }
}

/// Per-channel means over a region, on the 0..255 scale.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RgbMean {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

/// One camera frame, borrowed from the producing callback.
///
/// Frames never outlive the callback; anything the session keeps is reduced
/// to scalars first.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    width: usize,
    height: usize,
    stride: usize,
    format: PixelFormat,
    pixels: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn new(
        width: usize,
        height: usize,
        stride: usize,
        format: PixelFormat,
        pixels: &'a [u8],
    ) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty { width, height });
        }
        let bytes_per_pixel = format.bytes_per_pixel();
        // Geometry comes from the driver; overflow means no buffer can hold it.
        let overflow = || FrameError::BufferTooSmall {
            expected: usize::MAX,
            actual: pixels.len(),
        };
        let row_bytes = width.checked_mul(bytes_per_pixel).ok_or_else(overflow)?;
        if stride < row_bytes {
            return Err(FrameError::StrideTooSmall {
                stride,
                width,
                bytes_per_pixel,
            });
        }
        // The last row only needs to hold its pixels, not a full stride.
        let expected = stride
            .checked_mul(height - 1)
            .and_then(|bytes| bytes.checked_add(row_bytes))
            .ok_or_else(overflow)?;
        if pixels.len() < expected {
            return Err(FrameError::BufferTooSmall {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            pixels,
        })
    }

    /// Tightly packed frame (`stride = width * bytes_per_pixel`).
    pub fn packed(
        width: usize,
        height: usize,
        format: PixelFormat,
        pixels: &'a [u8],
    ) -> Result<Self, FrameError> {
        let stride = width.saturating_mul(format.bytes_per_pixel());
        Self::new(width, height, stride, format, pixels)
    }

    /// Mean R, G, B over a centered square of side `min(side, width, height)`.
    pub fn center_mean(&self, side: usize) -> RgbMean {
        let side = side.min(self.width).min(self.height).max(1);
        let x0 = (self.width - side) / 2;
        let y0 = (self.height - side) / 2;
        let bpp = self.format.bytes_per_pixel();
        let (ro, go, bo) = self.format.rgb_offsets();

        let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
        for y in y0..y0 + side {
            let row_start = y * self.stride + x0 * bpp;
            let row = &self.pixels[row_start..row_start + side * bpp];
            for px in row.chunks_exact(bpp) {
                r += u64::from(px[ro]);
                g += u64::from(px[go]);
                b += u64::from(px[bo]);
            }
        }

        let count = (side * side) as f64;
        RgbMean {
            r: r as f64 / count,
            g: g as f64 / count,
            b: b as f64 / count,
        }
    }
}

/// Owned pixel storage for sources that synthesize or decode frames.
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub width: usize,
    pub height: usize,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl FrameBuffer {
    /// Uniformly colored frame.
    pub fn filled(width: usize, height: usize, format: PixelFormat, rgb: [u8; 3]) -> Self {
        let bpp = format.bytes_per_pixel();
        let (ro, go, bo) = format.rgb_offsets();
        let mut px = vec![255u8; bpp];
        px[ro] = rgb[0];
        px[go] = rgb[1];
        px[bo] = rgb[2];
        Self {
            width,
            height,
            format,
            pixels: px.repeat(width * height),
        }
    }

    pub fn as_frame(&self) -> Result<Frame<'_>, FrameError> {
        Frame::packed(self.width, self.height, self.format, &self.pixels)
    }
}

impl From<image::RgbaImage> for FrameBuffer {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            format: PixelFormat::Rgba8,
            pixels: img.into_raw(),
        }
    }
}
