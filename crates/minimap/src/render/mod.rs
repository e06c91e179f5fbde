//! World rendering.
//!
//! Renderers turn the blocks of one chunk column (a [`RegionKey`]) into a
//! 16x16 tile; full map canvases are assembled from tiles around the viewer.
//! [`cache::CachedWorldRenderer`] keeps tiles until a block change
//! invalidates them.

pub mod block;
pub mod cache;
pub mod flat;
pub mod vanilla;

use std::collections::HashMap;
use std::sync::Arc;

use crate::canvas::{Canvas, MAP_SIZE};
use crate::WorldId;

pub use block::{Block, BlockColors};
pub use cache::{CachedWorldRenderer, RenderCache};

/// Side length of a region (chunk column) in blocks.
pub const REGION_SIZE: i32 = 16;

/// Read access to world blocks.
pub trait BlockSource {
    fn block_at(&self, world: WorldId, x: i32, y: i32, z: i32) -> Block;

    /// Half-open vertical range `[min, max)` of the world.
    fn height_range(&self, _world: WorldId) -> (i32, i32) {
        (-64, 320)
    }

    /// Highest block the map can see at column `(x, z)`.
    fn top_block(&self, world: WorldId, x: i32, z: i32) -> Option<(i32, Block)> {
        let (min, max) = self.height_range(world);
        (min..max).rev().find_map(|y| {
            let block = self.block_at(world, x, y, z);
            (!block.is_transparent()).then_some((y, block))
        })
    }
}

/// Identity of a chunk column, the cache and invalidation granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionKey {
    pub world: WorldId,
    pub chunk_x: i32,
    pub chunk_z: i32,
}

impl RegionKey {
    pub const fn new(world: WorldId, chunk_x: i32, chunk_z: i32) -> Self {
        Self { world, chunk_x, chunk_z }
    }

    /// Region containing block column `(x, z)`.
    #[inline]
    pub const fn containing(world: WorldId, x: i32, z: i32) -> Self {
        Self::new(world, x >> 4, z >> 4)
    }

    #[inline]
    pub const fn min_x(&self) -> i32 {
        self.chunk_x * REGION_SIZE
    }

    #[inline]
    pub const fn min_z(&self) -> i32 {
        self.chunk_z * REGION_SIZE
    }
}

/// A world renderer variant.
pub trait WorldRenderer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Render one region into a `REGION_SIZE`-square tile.
    fn render_region(&self, blocks: &dyn BlockSource, region: RegionKey) -> Canvas;

    /// Render a map canvas centered on `(center_x, center_z)` without any
    /// caching. A pure function of block state at call time.
    fn render(
        &self,
        blocks: &dyn BlockSource,
        world: WorldId,
        center_x: i32,
        center_z: i32,
        zoom: u8,
    ) -> Canvas {
        let mut tiles: HashMap<RegionKey, Arc<Canvas>> = HashMap::new();
        assemble(world, center_x, center_z, zoom, |key| {
            tiles
                .entry(key)
                .or_insert_with(|| Arc::new(self.render_region(blocks, key)))
                .clone()
        })
    }
}

/// Build a map canvas around `(center_x, center_z)` from region tiles.
///
/// Pixel `(px, pz)` shows world column
/// `(center + (p - MAP_SIZE / 2) * 2^zoom)`, so the viewer sits on pixel
/// `(64, 64)`.
pub fn assemble(
    world: WorldId,
    center_x: i32,
    center_z: i32,
    zoom: u8,
    mut tile_for: impl FnMut(RegionKey) -> Arc<Canvas>,
) -> Canvas {
    let scale = 1i32 << zoom;
    let half = MAP_SIZE as i32 / 2;
    let mut canvas = Canvas::map();
    let mut current: Option<(RegionKey, Arc<Canvas>)> = None;

    for pz in 0..MAP_SIZE {
        let wz = center_z + (pz as i32 - half) * scale;
        for px in 0..MAP_SIZE {
            let wx = center_x + (px as i32 - half) * scale;
            let key = RegionKey::containing(world, wx, wz);
            if current.as_ref().map(|(k, _)| *k) != Some(key) {
                current = Some((key, tile_for(key)));
            }
            if let Some((_, tile)) = &current {
                let color = tile.get(
                    wx.rem_euclid(REGION_SIZE) as usize,
                    wz.rem_euclid(REGION_SIZE) as usize,
                );
                canvas.set(px, pz, color);
            }
        }
    }

    canvas
}

type RendererFactory = fn(BlockColors) -> Arc<dyn WorldRenderer>;

/// Name -> renderer factory table, resolved once at startup.
pub struct RendererRegistry {
    factories: HashMap<&'static str, RendererFactory>,
}

impl RendererRegistry {
    /// Registry with the builtin `vanilla` and `flat` renderers.
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("vanilla", |colors| Arc::new(vanilla::VanillaRenderer::new(colors)));
        registry.register("flat", |colors| Arc::new(flat::FlatRenderer::new(colors)));
        registry
    }

    pub fn register(&mut self, name: &'static str, factory: RendererFactory) {
        self.factories.insert(name, factory);
    }

    /// Instantiate the renderer registered under `name`.
    pub fn resolve(&self, name: &str, colors: BlockColors) -> Option<Arc<dyn WorldRenderer>> {
        self.factories.get(name).map(|factory| factory(colors))
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.factories.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for RendererRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
