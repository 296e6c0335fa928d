//! Image primitives and utilities.
//!
//! Frames are held in a lightweight owned RGB image type (`OwnedImage`) that is
//! cheap to crop. Detectors borrow a view (`Image<'a>`) instead of copying
//! pixels; grayscale and HSV renditions are derived once per cycle and handed
//! to whichever detector needs them.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Owned RGB image (no alpha). One captured frame of the driven interface.
#[derive(Clone, Debug)]
pub struct OwnedImage {
    width: u32,
    height: u32,
    data: Vec<Color>,
}

impl OwnedImage {
    /// Build an `OwnedImage` from RGBA bytes (alpha is discarded).
    ///
    /// The buffer is expected to be tightly packed: `width * height * 4` bytes.
    pub fn from_rgba(width: usize, bytes: &[u8]) -> Self {
        let height = bytes.len() / width.max(1) / 4;
        let data = bytes
            .chunks_exact(4)
            .take(width * height)
            .map(|v| Color::new(v[0], v[1], v[2]))
            .collect::<Vec<_>>();

        Self {
            width: width as u32,
            height: height as u32,
            data,
        }
    }

    pub fn from_rgb_image(img: &image::RgbImage) -> Self {
        let (width, height) = img.dimensions();
        let data = img
            .pixels()
            .map(|p| Color::new(p.0[0], p.0[1], p.0[2]))
            .collect();

        Self {
            width,
            height,
            data,
        }
    }

    /// Create an RGB `OwnedImage` from a grayscale image (each pixel repeated into RGB).
    pub fn from_gray_as_rgb(gray: &image::GrayImage) -> Self {
        let (w, h) = gray.dimensions();
        let mut data = Vec::with_capacity((w * h) as usize);
        for p in gray.pixels() {
            let v = p.0[0];
            data.push(Color::new(v, v, v));
        }
        Self {
            width: w,
            height: h,
            data,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Resize this image to the given height (preserving aspect ratio).
    ///
    /// Uses `fast_image_resize` (SIMD-optimized) and keeps output in `Vec<Color>`.
    pub fn resize_h(&mut self, height: u32) -> Result<()> {
        if self.height == height {
            return Ok(());
        }

        let height = height.max(1);
        let width = ((self.width as u64 * height as u64 / self.height.max(1) as u64) as u32).max(1);

        // SAFETY: `Color` is `#[repr(C)]` with 3 x `u8`, so it is layout-compatible
        // with `fast_image_resize::pixels::U8x3` (alignment 1).
        let src_pixels = unsafe {
            std::slice::from_raw_parts(
                self.data.as_ptr() as *const fast_image_resize::pixels::U8x3,
                self.data.len(),
            )
        };

        let src = fast_image_resize::images::ImageRef::from_pixels(self.width, self.height, src_pixels)
            .context("fast_image_resize: ImageRef::from_pixels failed")?;

        let mut dst = fast_image_resize::images::Image::new(width, height, fast_image_resize::PixelType::U8x3);

        let mut resizer = fast_image_resize::Resizer::new();
        let options = fast_image_resize::ResizeOptions::new().resize_alg(
            fast_image_resize::ResizeAlg::Interpolation(fast_image_resize::FilterType::CatmullRom),
        );

        resizer
            .resize(&src, &mut dst, &Some(options))
            .context("fast_image_resize: resize failed")?;

        let bytes: Vec<u8> = dst.into_vec();
        self.data = bytes
            .chunks_exact(3)
            .map(|px| Color::new(px[0], px[1], px[2]))
            .collect();
        self.width = width;
        self.height = height;
        Ok(())
    }

    #[inline]
    pub fn resized_h(mut self, height: u32) -> Result<Self> {
        self.resize_h(height)?;
        Ok(self)
    }

    /// Create a borrowed view of this entire image.
    pub fn as_image<'a>(&'a self) -> Image<'a> {
        Image {
            x1: 0,
            y1: 0,
            x2: self.width,
            y2: self.height,
            true_width: self.width,
            data: &self.data,
        }
    }
}

// ----------

/// Borrowed image view into an `OwnedImage`.
///
/// Coordinates passed to and returned from a view are relative to its own
/// top-left corner; `origin` maps them back to the owning frame.
#[derive(Clone, Copy)]
pub struct Image<'a> {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
    true_width: u32,
    data: &'a [Color],
}

impl<'a> Image<'a> {
    #[inline(always)]
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    #[inline(always)]
    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    /// Top-left corner of this view in the owning image.
    #[inline]
    pub fn origin(&self) -> (u32, u32) {
        (self.x1, self.y1)
    }

    #[inline(always)]
    fn pixel(&self, x: u32, y: u32) -> &Color {
        &self.data[(x + y * self.true_width) as usize]
    }

    /// Pixel at view-relative coordinates.
    pub fn pixel_at(&self, x: u32, y: u32) -> Option<Color> {
        if x >= self.width() || y >= self.height() {
            return None;
        }
        Some(*self.pixel(self.x1 + x, self.y1 + y))
    }

    pub fn get_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; (self.width() * self.height() * 3) as usize];
        let mut i = 0;
        for y in self.y1..self.y2 {
            for x in self.x1..self.x2 {
                let clr = self.pixel(x, y);
                bytes[i] = clr.r;
                bytes[i + 1] = clr.g;
                bytes[i + 2] = clr.b;
                i += 3;
            }
        }
        bytes
    }

    pub fn save_png<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let bytes = self.get_bytes();
        let img = image::RgbImage::from_raw(self.width(), self.height(), bytes)
            .context("RgbImage::from_raw failed")?;
        img.save_with_format(path, image::ImageFormat::Png)
            .context("save png")?;
        Ok(())
    }

    /// Gets a subimage with the same height and provided width aligned to the left with the right side trimmed.
    pub fn trimmed_left(&self, width: u32) -> Self {
        let size = width.min(self.width());

        Self {
            x1: self.x1,
            y1: self.y1,
            x2: self.x1 + size,
            y2: self.y2,
            true_width: self.true_width,
            data: self.data,
        }
    }

    /// Create an arbitrary subimage (relative coordinates).
    pub fn sub_image(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
        let x = x.min(self.width());
        let y = y.min(self.height());
        let width = width.min(self.width() - x);
        let height = height.min(self.height() - y);

        Self {
            x1: self.x1 + x,
            y1: self.y1 + y,
            x2: self.x1 + x + width,
            y2: self.y1 + y + height,
            true_width: self.true_width,
            data: self.data,
        }
    }

    /// Convert to a grayscale `GrayImage` (luma).
    pub fn to_gray_image(&self) -> image::GrayImage {
        let mut out = image::GrayImage::new(self.width(), self.height());
        for (x, y, p) in out.enumerate_pixels_mut() {
            p.0[0] = self.pixel(self.x1 + x, self.y1 + y).luma();
        }
        out
    }

    /// Convert to HSV using the OpenCV 8-bit convention.
    pub fn to_hsv(&self) -> HsvImage {
        let mut data = Vec::with_capacity((self.width() * self.height()) as usize);
        for y in self.y1..self.y2 {
            for x in self.x1..self.x2 {
                data.push(self.pixel(x, y).to_hsv());
            }
        }
        HsvImage {
            width: self.width(),
            height: self.height(),
            data,
        }
    }
}

// ----------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[repr(C)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Self = Self::new(0, 0, 0);

    #[inline]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Compute luma (grayscale intensity).
    pub fn luma(&self) -> u8 {
        let r = self.r as u32;
        let g = self.g as u32;
        let b = self.b as u32;
        ((299 * r + 587 * g + 114 * b) / 1000) as u8
    }

    /// HSV with hue halved into `0..180` and saturation/value in `0..=255`,
    /// matching the ranges the colour bands are written in.
    pub fn to_hsv(&self) -> Hsv {
        let r = self.r as i32;
        let g = self.g as i32;
        let b = self.b as i32;
        let v = r.max(g).max(b);
        let min = r.min(g).min(b);
        let diff = v - min;

        let s = if v == 0 { 0 } else { (255 * diff + v / 2) / v };

        let h = if diff == 0 {
            0.0
        } else {
            let diff = diff as f32;
            let deg = if v == r {
                60.0 * (g - b) as f32 / diff
            } else if v == g {
                120.0 + 60.0 * (b - r) as f32 / diff
            } else {
                240.0 + 60.0 * (r - g) as f32 / diff
            };
            if deg < 0.0 { deg + 360.0 } else { deg }
        };

        Hsv {
            h: ((h / 2.0).round() as u32 % 180) as u8,
            s: s as u8,
            v: v as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

/// Inclusive HSV range, `[h, s, v]` for each bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct HsvBand {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HsvBand {
    pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }

    #[inline]
    pub fn contains(&self, hsv: Hsv) -> bool {
        (self.lower[0]..=self.upper[0]).contains(&hsv.h)
            && (self.lower[1]..=self.upper[1]).contains(&hsv.s)
            && (self.lower[2]..=self.upper[2]).contains(&hsv.v)
    }
}

/// HSV rendition of a view; same dimensions and coordinates as its source.
#[derive(Clone, Debug)]
pub struct HsvImage {
    width: u32,
    height: u32,
    data: Vec<Hsv>,
}

impl HsvImage {
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn get(&self, x: u32, y: u32) -> Option<Hsv> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[(x + y * self.width) as usize])
    }

    /// Binary mask: 255 where the pixel lies inside `band`, 0 elsewhere.
    pub fn in_range(&self, band: &HsvBand) -> image::GrayImage {
        let mut out = image::GrayImage::new(self.width, self.height);
        for (p, hsv) in out.pixels_mut().zip(&self.data) {
            if band.contains(*hsv) {
                p.0[0] = 255;
            }
        }
        out
    }
}

/// Pixel-wise OR of two equally sized masks.
pub fn mask_union(a: &image::GrayImage, b: &image::GrayImage) -> image::GrayImage {
    let mut out = a.clone();
    for (p, q) in out.pixels_mut().zip(b.pixels()) {
        p.0[0] = p.0[0].max(q.0[0]);
    }
    out
}
