//! Frame buffers and pixel formats

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiphonRLError};

/// Pixel format of a captured frame
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// Blue/green/red interleaved, the siphon capture format after alpha drop
    Bgr8,
    Rgb8,
    Gray8,
}

impl PixelFormat {
    /// Channels per pixel
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::Bgr8 | PixelFormat::Rgb8 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Shape/dtype contract for a frame: width, height and pixel format.
/// Samples are always `u8`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrameSpec {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameSpec {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// Expected buffer length in bytes (height x width x channels)
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.format.channels()
    }
}

/// One captured image: interleaved `u8` samples in row-major
/// (height, width, channels) order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Frame {
    /// Builds a frame, rejecting buffers whose length does not match the
    /// declared shape.
    pub fn new(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Result<Self> {
        let expected = FrameSpec::new(width, height, format).byte_len();
        if data.len() != expected {
            return Err(SiphonRLError::Protocol(format!(
                "frame buffer is {} bytes, expected {} for {}x{} {:?}",
                data.len(),
                expected,
                width,
                height,
                format
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// Uniform frame filled with one sample value
    pub fn filled(width: u32, height: u32, format: PixelFormat, value: u8) -> Self {
        let len = FrameSpec::new(width, height, format).byte_len();
        Self {
            width,
            height,
            format,
            data: vec![value; len],
        }
    }

    pub fn spec(&self) -> FrameSpec {
        FrameSpec::new(self.width, self.height, self.format)
    }

    /// Deterministic area resampling (pixel mixing) to the target size.
    /// Every destination sample is the coverage-weighted mean of the source
    /// region it maps onto, for both down- and upscaling.
    pub fn resize_area(&self, width: u32, height: u32) -> Result<Frame> {
        if width == 0 || height == 0 {
            return Err(SiphonRLError::InvalidConfiguration(format!(
                "resize target must be non-zero, got {width}x{height}"
            )));
        }
        let (sw, sh) = (self.width as usize, self.height as usize);
        let (tw, th) = (width as usize, height as usize);
        let channels = self.format.channels();
        let x_scale = sw as f64 / tw as f64;
        let y_scale = sh as f64 / th as f64;
        let mut out = vec![0u8; tw * th * channels];

        for ty in 0..th {
            let y0 = ty as f64 * y_scale;
            let y1 = (ty + 1) as f64 * y_scale;
            for tx in 0..tw {
                let x0 = tx as f64 * x_scale;
                let x1 = (tx + 1) as f64 * x_scale;
                for ch in 0..channels {
                    let mut acc = 0.0f64;
                    let mut area = 0.0f64;
                    let mut sy = y0.floor() as usize;
                    while (sy as f64) < y1 && sy < sh {
                        let wy = (y1.min((sy + 1) as f64) - y0.max(sy as f64)).max(0.0);
                        let mut sx = x0.floor() as usize;
                        while (sx as f64) < x1 && sx < sw {
                            let wx = (x1.min((sx + 1) as f64) - x0.max(sx as f64)).max(0.0);
                            let weight = wx * wy;
                            acc += self.data[(sy * sw + sx) * channels + ch] as f64 * weight;
                            area += weight;
                            sx += 1;
                        }
                        sy += 1;
                    }
                    let value = if area > 0.0 { acc / area } else { 0.0 };
                    out[(ty * tw + tx) * channels + ch] = value.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        Ok(Frame {
            width,
            height,
            format: self.format,
            data: out,
        })
    }

    /// Collapses the channel axis to one using Rec.601 luminance weights
    /// (0.299 R + 0.587 G + 0.114 B), honoring the source channel order.
    /// Single-channel frames pass through unchanged.
    pub fn to_grayscale(&self) -> Frame {
        let (r_idx, g_idx, b_idx) = match self.format {
            PixelFormat::Gray8 => return self.clone(),
            PixelFormat::Rgb8 => (0, 1, 2),
            PixelFormat::Bgr8 => (2, 1, 0),
        };
        let channels = self.format.channels();
        let pixels = self.width as usize * self.height as usize;
        let mut out = vec![0u8; pixels];
        for p in 0..pixels {
            let base = p * channels;
            let luma = 0.299 * self.data[base + r_idx] as f64
                + 0.587 * self.data[base + g_idx] as f64
                + 0.114 * self.data[base + b_idx] as f64;
            out[p] = luma.round().clamp(0.0, 255.0) as u8;
        }
        Frame {
            width: self.width,
            height: self.height,
            format: PixelFormat::Gray8,
            data: out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_length_mismatch() {
        let result = Frame::new(2, 2, PixelFormat::Rgb8, vec![0u8; 5]);
        assert!(result.is_err());
    }

    #[test]
    fn resize_averages_source_region() {
        // 2x2 grayscale block downscaled to 1x1 is the mean of all four
        let frame = Frame::new(2, 2, PixelFormat::Gray8, vec![0, 100, 100, 200]).unwrap();
        let resized = frame.resize_area(1, 1).unwrap();
        assert_eq!(resized.data, vec![100]);
        assert_eq!(resized.spec(), FrameSpec::new(1, 1, PixelFormat::Gray8));
    }

    #[test]
    fn resize_upscale_replicates() {
        let frame = Frame::new(1, 1, PixelFormat::Gray8, vec![42]).unwrap();
        let resized = frame.resize_area(2, 2).unwrap();
        assert_eq!(resized.data, vec![42, 42, 42, 42]);
    }

    #[test]
    fn resize_rejects_zero_target() {
        let frame = Frame::filled(4, 4, PixelFormat::Rgb8, 0);
        assert!(frame.resize_area(0, 4).is_err());
        assert!(frame.resize_area(4, 0).is_err());
    }

    #[test]
    fn grayscale_honors_channel_order() {
        // Pure red: RGB sees R=255, BGR sees B=255
        let rgb = Frame::new(1, 1, PixelFormat::Rgb8, vec![255, 0, 0]).unwrap();
        assert_eq!(rgb.to_grayscale().data, vec![76]); // 0.299 * 255

        let bgr = Frame::new(1, 1, PixelFormat::Bgr8, vec![255, 0, 0]).unwrap();
        assert_eq!(bgr.to_grayscale().data, vec![29]); // 0.114 * 255
    }

    #[test]
    fn grayscale_is_idempotent() {
        let frame = Frame::new(2, 1, PixelFormat::Bgr8, vec![10, 20, 30, 40, 50, 60]).unwrap();
        let once = frame.to_grayscale();
        let twice = once.to_grayscale();
        assert_eq!(once, twice);
        assert_eq!(once.format, PixelFormat::Gray8);
    }
}
