//! Fixed-size palette-indexed pixel buffers.

use crate::palette::TRANSPARENT;

/// Side length of a map canvas in pixels.
pub const MAP_SIZE: usize = 128;

/// A row-major grid of palette indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl Canvas {
    /// A fully transparent canvas.
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![TRANSPARENT; width * height],
        }
    }

    /// A fully transparent map-sized canvas.
    pub fn map() -> Self {
        Self::new(MAP_SIZE, MAP_SIZE)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Pixel at `(x, y)`; out-of-range reads are transparent.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x]
        } else {
            TRANSPARENT
        }
    }

    /// Set pixel `(x, y)`; out-of-range writes are dropped.
    #[inline]
    pub fn set(&mut self, x: usize, y: usize, color: u8) {
        if x < self.width && y < self.height {
            self.pixels[y * self.width + x] = color;
        }
    }

    /// Signed variant of [`Canvas::set`] for callers projecting world
    /// coordinates.
    #[inline]
    pub fn set_signed(&mut self, x: i32, y: i32, color: u8) {
        if x >= 0 && y >= 0 {
            self.set(x as usize, y as usize, color);
        }
    }

    pub fn fill(&mut self, color: u8) {
        self.pixels.fill(color);
    }

    /// True if no pixel is opaque.
    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&p| p == TRANSPARENT)
    }

    /// Number of opaque pixels.
    pub fn opaque_count(&self) -> usize {
        self.pixels.iter().filter(|&&p| p != TRANSPARENT).count()
    }

    /// Copy the opaque pixels of `other` onto this canvas with its top-left
    /// corner at `(x, y)`. Transparent source pixels leave the destination
    /// untouched.
    pub fn overlay(&mut self, other: &Canvas, x: i32, y: i32) {
        for sy in 0..other.height {
            for sx in 0..other.width {
                let color = other.pixels[sy * other.width + sx];
                if color != TRANSPARENT {
                    self.set_signed(x + sx as i32, y + sy as i32, color);
                }
            }
        }
    }
}
