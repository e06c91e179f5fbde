//! Flat renderer: top block colour, no relief shading.

use super::{BlockColors, BlockSource, RegionKey, WorldRenderer, REGION_SIZE};
use crate::canvas::Canvas;
use crate::palette::{MapColor, Shade, TRANSPARENT};

pub struct FlatRenderer {
    colors: BlockColors,
}

impl FlatRenderer {
    pub fn new(colors: BlockColors) -> Self {
        Self { colors }
    }
}

impl WorldRenderer for FlatRenderer {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn render_region(&self, blocks: &dyn BlockSource, region: RegionKey) -> Canvas {
        let size = REGION_SIZE as usize;
        let mut tile = Canvas::new(size, size);
        for lz in 0..REGION_SIZE {
            for lx in 0..REGION_SIZE {
                let x = region.min_x() + lx;
                let z = region.min_z() + lz;
                let color = match blocks.top_block(region.world, x, z) {
                    Some((_, block)) => match self.colors.color(block) {
                        MapColor::None => TRANSPARENT,
                        color => color.shaded(Shade::Normal),
                    },
                    None => TRANSPARENT,
                };
                tile.set(lx as usize, lz as usize, color);
            }
        }
        tile
    }
}
