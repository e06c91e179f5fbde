//! Vanilla-style renderer.
//!
//! Land is shaded against the column to the north, with a checkerboard
//! dither; water is shaded by depth.

use super::{Block, BlockColors, BlockSource, RegionKey, WorldRenderer, REGION_SIZE};
use crate::canvas::Canvas;
use crate::palette::{MapColor, Shade, TRANSPARENT};

/// Deepest water column that still changes the shade.
const MAX_WATER_DEPTH: i32 = 10;

pub struct VanillaRenderer {
    colors: BlockColors,
}

impl VanillaRenderer {
    pub fn new(colors: BlockColors) -> Self {
        Self { colors }
    }

    fn water_depth(blocks: &dyn BlockSource, region: RegionKey, x: i32, top: i32, z: i32) -> i32 {
        let (min, _) = blocks.height_range(region.world);
        let mut depth = 0;
        let mut y = top;
        while y >= min && depth < MAX_WATER_DEPTH && blocks.block_at(region.world, x, y, z) == Block::Water {
            depth += 1;
            y -= 1;
        }
        depth
    }

    fn shade_column(&self, blocks: &dyn BlockSource, region: RegionKey, x: i32, z: i32) -> u8 {
        let Some((y, block)) = blocks.top_block(region.world, x, z) else {
            return TRANSPARENT;
        };
        let color = self.colors.color(block);
        if color == MapColor::None {
            return TRANSPARENT;
        }

        let dither = ((x + z) & 1) as f64;
        let shade = if block == Block::Water {
            let depth = Self::water_depth(blocks, region, x, y, z);
            let d = depth as f64 * 0.1 + dither * 0.2;
            if d < 0.5 {
                Shade::Bright
            } else if d > 0.9 {
                Shade::Dark
            } else {
                Shade::Normal
            }
        } else {
            let north = blocks
                .top_block(region.world, x, z - 1)
                .map(|(ny, _)| ny)
                .unwrap_or(y);
            let d = (y - north) as f64 * 4.0 / 5.0 + (dither - 0.5) * 0.4;
            if d > 0.6 {
                Shade::Bright
            } else if d < -0.6 {
                Shade::Dark
            } else {
                Shade::Normal
            }
        };
        color.shaded(shade)
    }
}

impl WorldRenderer for VanillaRenderer {
    fn name(&self) -> &'static str {
        "vanilla"
    }

    fn render_region(&self, blocks: &dyn BlockSource, region: RegionKey) -> Canvas {
        let size = REGION_SIZE as usize;
        let mut tile = Canvas::new(size, size);
        for lz in 0..REGION_SIZE {
            for lx in 0..REGION_SIZE {
                let color = self.shade_column(blocks, region, region.min_x() + lx, region.min_z() + lz);
                tile.set(lx as usize, lz as usize, color);
            }
        }
        tile
    }
}
