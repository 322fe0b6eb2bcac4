//! Drawable images and the packed RGB565 pixel format
//!
//! [`DrawImage`] is the contract every surface handed out by this crate
//! satisfies: bounds, color model, read a pixel, write a pixel. The only
//! encoding implemented today is [`Rgb565Image`], two bytes per pixel with
//! green split across both bytes:
//!
//! ```text
//! byte0 = GGGBBBBB   (blue bits 3-7, green bits 2-4)
//! byte1 = RRRRRGGG   (green bits 5-7, red bits 3-7)
//! ```

use crate::DrmError;

/// Canonical color: 8 bits per channel, not alpha-premultiplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Nrgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Nrgba {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Fully opaque color
    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }
}

/// Alpha-premultiplied color, each channel already scaled by `a / 255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

/// Opaque grayscale color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Gray(pub u8);

/// Anything that can be converted to the canonical [`Nrgba`] form.
pub trait Color {
    fn to_nrgba(&self) -> Nrgba;
}

impl Color for Nrgba {
    fn to_nrgba(&self) -> Nrgba {
        *self
    }
}

impl Color for Rgba {
    fn to_nrgba(&self) -> Nrgba {
        match self.a {
            0 => Nrgba::default(),
            255 => Nrgba::new(self.r, self.g, self.b, 255),
            a => {
                let unpremultiply = |c: u8| ((c as u32 * 255) / a as u32).min(255) as u8;
                Nrgba::new(
                    unpremultiply(self.r),
                    unpremultiply(self.g),
                    unpremultiply(self.b),
                    a,
                )
            }
        }
    }
}

impl Color for Gray {
    fn to_nrgba(&self) -> Nrgba {
        Nrgba::opaque(self.0, self.0, self.0)
    }
}

/// Color model advertised by an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorModel {
    /// Non-premultiplied 8-bit RGBA
    Nrgba,
}

impl ColorModel {
    /// Convert any color into this model
    pub fn convert(&self, color: &dyn Color) -> Nrgba {
        match self {
            ColorModel::Nrgba => color.to_nrgba(),
        }
    }
}

/// Integer point in image space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Half-open rectangle: contains `min`, excludes `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub min: Point,
    pub max: Point,
}

impl Rect {
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self {
            min: Point::new(x0, y0),
            max: Point::new(x1, y1),
        }
    }

    /// Rectangle from the origin with the given size
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn width(&self) -> i32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> i32 {
        self.max.y - self.min.y
    }

    pub fn is_empty(&self) -> bool {
        self.min.x >= self.max.x || self.min.y >= self.max.y
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.min.x <= x && x < self.max.x && self.min.y <= y && y < self.max.y
    }
}

/// A readable and writable image.
///
/// Writes outside [`DrawImage::bounds`] are dropped and reads outside it
/// return the zero color; neither is an error.
pub trait DrawImage {
    fn bounds(&self) -> Rect;

    fn color_model(&self) -> ColorModel;

    fn at(&self, x: i32, y: i32) -> Nrgba;

    fn set(&mut self, x: i32, y: i32, color: &dyn Color);

    /// Set every pixel inside the bounds to `color`
    fn fill(&mut self, color: &dyn Color) {
        let bounds = self.bounds();
        let color = self.color_model().convert(color);
        for y in bounds.min.y..bounds.max.y {
            for x in bounds.min.x..bounds.max.x {
                self.set(x, y, &color);
            }
        }
    }
}

/// Pack a canonical color into its two on-device bytes. Alpha is dropped.
pub fn pack_rgb565(c: Nrgba) -> [u8; 2] {
    [
        (c.b >> 3) | ((c.g >> 2) << 5),
        (c.g >> 5) | ((c.r >> 3) << 3),
    ]
}

/// Inverse of [`pack_rgb565`]. Low-order bits come back zeroed and alpha is
/// always 255.
pub fn unpack_rgb565(px: [u8; 2]) -> Nrgba {
    Nrgba {
        r: (px[1] >> 3) << 3,
        g: (px[1] << 5) | ((px[0] >> 5) << 2),
        b: px[0] << 3,
        a: 255,
    }
}

/// Packed 16-bit image over a caller-provided byte store
#[derive(Debug)]
pub struct Rgb565Image<B> {
    pix: B,
    stride: usize,
    rect: Rect,
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> Rgb565Image<B> {
    pub const BYTES_PER_PIXEL: usize = 2;

    /// Wrap `pix` as a `width` x `height` image with `stride` bytes per row.
    ///
    /// The store must hold `stride * height` bytes and a row must fit in
    /// `stride`; padding past `width * 2` is left untouched.
    pub fn new(pix: B, stride: usize, width: u32, height: u32) -> Result<Self, DrmError> {
        if width > i32::MAX as u32 || height > i32::MAX as u32 {
            return Err(DrmError::InvalidSurface(format!(
                "{}x{} exceeds the addressable range",
                width, height
            )));
        }

        let row_bytes = width as usize * Self::BYTES_PER_PIXEL;
        if stride < row_bytes {
            return Err(DrmError::InvalidSurface(format!(
                "stride {} is shorter than a {}-pixel row ({} bytes)",
                stride, width, row_bytes
            )));
        }

        let required = stride.saturating_mul(height as usize);
        let len = pix.as_ref().len();
        if len < required {
            return Err(DrmError::InvalidSurface(format!(
                "pixel store holds {} bytes, {} required for {}x{} at stride {}",
                len, required, width, height, stride
            )));
        }

        Ok(Self {
            pix,
            stride,
            rect: Rect::from_size(width, height),
        })
    }

    /// Byte offset of pixel `(x, y)`, or `None` outside the bounds
    pub fn pix_offset(&self, x: i32, y: i32) -> Option<usize> {
        self.rect
            .contains(x, y)
            .then(|| self.offset_unchecked(x, y))
    }

    // Callers must have checked `self.rect.contains(x, y)`
    fn offset_unchecked(&self, x: i32, y: i32) -> usize {
        y as usize * self.stride + x as usize * Self::BYTES_PER_PIXEL
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Raw backing bytes
    pub fn pixels(&self) -> &[u8] {
        self.pix.as_ref()
    }

    /// Backing store
    pub fn store(&self) -> &B {
        &self.pix
    }

    /// Consume the image and return its backing store
    pub fn into_inner(self) -> B {
        self.pix
    }
}

impl<B: AsRef<[u8]> + AsMut<[u8]>> DrawImage for Rgb565Image<B> {
    fn bounds(&self) -> Rect {
        self.rect
    }

    fn color_model(&self) -> ColorModel {
        ColorModel::Nrgba
    }

    fn at(&self, x: i32, y: i32) -> Nrgba {
        let Some(i) = self.pix_offset(x, y) else {
            return Nrgba::default();
        };
        let pix = self.pix.as_ref();
        unpack_rgb565([pix[i], pix[i + 1]])
    }

    fn set(&mut self, x: i32, y: i32, color: &dyn Color) {
        let Some(i) = self.pix_offset(x, y) else {
            return;
        };
        let packed = pack_rgb565(ColorModel::Nrgba.convert(color));
        self.pix.as_mut()[i..i + 2].copy_from_slice(&packed);
    }
}
