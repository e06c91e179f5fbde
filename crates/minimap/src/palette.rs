//! Map colour palette.
//!
//! A palette index is `base * 4 + shade`. Base 0 is transparent, so indices
//! `0..=3` never draw anything.

use serde::{Deserialize, Serialize};

/// Palette index that leaves the underlying pixel untouched.
pub const TRANSPARENT: u8 = 0;

/// Shade multipliers (out of 255) for shades 0..=3.
const SHADE_MULTIPLIERS: [u32; 4] = [180, 220, 255, 135];

/// Base map colours.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapColor {
    None = 0,
    Grass,
    Sand,
    Wool,
    Fire,
    Ice,
    Metal,
    Plant,
    Snow,
    Clay,
    Dirt,
    Stone,
    Water,
    Wood,
    Quartz,
    Orange,
    Magenta,
    LightBlue,
    Yellow,
    LightGreen,
    Pink,
    Gray,
    LightGray,
    Cyan,
    Purple,
    Blue,
    Brown,
    Green,
    Red,
    Black,
    Gold,
    Diamond,
    Lapis,
    Emerald,
    Podzol,
    Nether,
}

/// Base RGB for each [`MapColor`], indexed by discriminant.
const BASE_RGB: [[u8; 3]; 36] = [
    [0, 0, 0],
    [127, 178, 56],
    [247, 233, 163],
    [199, 199, 199],
    [255, 0, 0],
    [160, 160, 255],
    [167, 167, 167],
    [0, 124, 0],
    [255, 255, 255],
    [164, 168, 184],
    [151, 109, 77],
    [112, 112, 112],
    [64, 64, 255],
    [143, 119, 72],
    [255, 252, 245],
    [216, 127, 51],
    [178, 76, 216],
    [102, 153, 216],
    [229, 229, 51],
    [127, 204, 25],
    [242, 127, 165],
    [76, 76, 76],
    [153, 153, 153],
    [76, 127, 153],
    [127, 63, 178],
    [51, 76, 178],
    [102, 76, 51],
    [102, 127, 51],
    [153, 51, 51],
    [25, 25, 25],
    [250, 238, 77],
    [92, 219, 213],
    [74, 128, 255],
    [0, 217, 58],
    [129, 86, 49],
    [112, 2, 0],
];

/// Brightness variant of a base colour.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shade {
    Dark = 0,
    Normal = 1,
    Bright = 2,
    Darkest = 3,
}

impl MapColor {
    /// Palette index of this colour in the given shade.
    #[inline]
    pub const fn shaded(self, shade: Shade) -> u8 {
        (self as u8) * 4 + shade as u8
    }
}

/// RGB value of a palette index, `None` for transparent indices.
pub fn rgb(index: u8) -> Option<[u8; 3]> {
    let base = (index / 4) as usize;
    if base == 0 || base >= BASE_RGB.len() {
        return None;
    }
    let mul = SHADE_MULTIPLIERS[(index % 4) as usize];
    let [r, g, b] = BASE_RGB[base];
    Some([
        (r as u32 * mul / 255) as u8,
        (g as u32 * mul / 255) as u8,
        (b as u32 * mul / 255) as u8,
    ])
}

/// Quantize an RGBA colour to the nearest opaque palette index.
///
/// Alpha below 128 maps to [`TRANSPARENT`].
pub fn quantize([r, g, b, a]: [u8; 4]) -> u8 {
    if a < 128 {
        return TRANSPARENT;
    }
    let mut best = TRANSPARENT;
    let mut best_dist = u32::MAX;
    for index in 4..(BASE_RGB.len() * 4) as u8 {
        let Some([pr, pg, pb]) = rgb(index) else {
            continue;
        };
        let dr = pr as i32 - r as i32;
        let dg = pg as i32 - g as i32;
        let db = pb as i32 - b as i32;
        let dist = (dr * dr + dg * dg + db * db) as u32;
        if dist < best_dist {
            best_dist = dist;
            best = index;
        }
    }
    best
}
