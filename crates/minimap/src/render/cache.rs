//! Region tile cache.
//!
//! Invalidation is pushed by block-change events; the cache never polls the
//! world to find out whether a tile went stale.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use super::{assemble, BlockSource, RegionKey, WorldRenderer, REGION_SIZE};
use crate::canvas::Canvas;
use crate::WorldId;

#[derive(Debug)]
struct CacheEntry {
    tile: Arc<Canvas>,
    generation: u64,
}

/// Last rendered tile per region, stamped with the cache generation it was
/// rendered in.
#[derive(Debug, Default)]
pub struct RenderCache {
    entries: HashMap<RegionKey, CacheEntry>,
    generation: u64,
    hits: u64,
    misses: u64,
}

impl RenderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached tile for `key`, or render and store it.
    pub fn get_or_render(&mut self, key: RegionKey, render: impl FnOnce() -> Canvas) -> Arc<Canvas> {
        if let Some(entry) = self.entries.get(&key) {
            self.hits += 1;
            return entry.tile.clone();
        }
        self.misses += 1;
        let tile = Arc::new(render());
        self.entries.insert(
            key,
            CacheEntry {
                tile: tile.clone(),
                generation: self.generation,
            },
        );
        tile
    }

    /// Drop the tile for `key`. Returns true if one was cached.
    pub fn invalidate(&mut self, key: RegionKey) -> bool {
        self.generation += 1;
        self.entries.remove(&key).is_some()
    }

    /// Generation the tile for `key` was rendered in.
    pub fn entry_generation(&self, key: RegionKey) -> Option<u64> {
        self.entries.get(&key).map(|entry| entry.generation)
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

/// A renderer paired with the one cache shared by every minimap using it.
pub struct CachedWorldRenderer {
    renderer: Arc<dyn WorldRenderer>,
    cache: RenderCache,
}

impl CachedWorldRenderer {
    pub fn new(renderer: Arc<dyn WorldRenderer>) -> Self {
        Self {
            renderer,
            cache: RenderCache::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.renderer.name()
    }

    pub fn cache(&self) -> &RenderCache {
        &self.cache
    }

    /// Tile for `region`, rendered only if it is not cached.
    pub fn render_cached(&mut self, blocks: &dyn BlockSource, region: RegionKey) -> Arc<Canvas> {
        let renderer = &self.renderer;
        self.cache
            .get_or_render(region, || renderer.render_region(blocks, region))
    }

    /// Map canvas centered on `(center_x, center_z)`, built from cached tiles.
    pub fn render(
        &mut self,
        blocks: &dyn BlockSource,
        world: WorldId,
        center_x: i32,
        center_z: i32,
        zoom: u8,
    ) -> Canvas {
        let renderer = &self.renderer;
        let cache = &mut self.cache;
        assemble(world, center_x, center_z, zoom, |key| {
            cache.get_or_render(key, || renderer.render_region(blocks, key))
        })
    }

    pub fn invalidate(&mut self, region: RegionKey) -> bool {
        self.cache.invalidate(region)
    }

    /// Invalidate every tile whose pixels depend on block column `(x, z)`.
    ///
    /// Shading compares each column with its northern neighbour, so a change
    /// on the southern edge of a region also stales the first row of the
    /// region below it.
    pub fn on_block_change(&mut self, world: WorldId, x: i32, z: i32) {
        let key = RegionKey::containing(world, x, z);
        let mut dropped = self.cache.invalidate(key);
        if z.rem_euclid(REGION_SIZE) == REGION_SIZE - 1 {
            dropped |= self
                .cache
                .invalidate(RegionKey::new(world, key.chunk_x, key.chunk_z + 1));
        }
        if dropped {
            debug!("Invalidated region ({}, {}) in {}", key.chunk_x, key.chunk_z, world);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::tests::TestBlocks;
    use crate::render::{Block, BlockColors};
    use crate::render::flat::FlatRenderer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts `render_region` calls.
    struct CountingRenderer {
        inner: FlatRenderer,
        calls: Arc<AtomicUsize>,
    }

    impl WorldRenderer for CountingRenderer {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn render_region(&self, blocks: &dyn BlockSource, region: RegionKey) -> Canvas {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.render_region(blocks, region)
        }
    }

    fn counting() -> (CachedWorldRenderer, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let renderer = CountingRenderer {
            inner: FlatRenderer::new(BlockColors::default()),
            calls: calls.clone(),
        };
        (CachedWorldRenderer::new(Arc::new(renderer)), calls)
    }

    #[test]
    fn test_cached_render_is_idempotent() {
        let (mut renderer, calls) = counting();
        let blocks = TestBlocks::new();
        let key = RegionKey::new(WorldId(0), 2, -3);

        let first = renderer.render_cached(&blocks, key);
        let second = renderer.render_cached(&blocks, key);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.pixels(), second.pixels());
        assert_eq!(renderer.cache().stats(), (1, 1));
    }

    #[test]
    fn test_invalidate_rerenders_exactly_once() {
        let (mut renderer, calls) = counting();
        let mut blocks = TestBlocks::new();
        let key = RegionKey::new(WorldId(0), 0, 0);

        renderer.render_cached(&blocks, key);
        blocks.columns.insert((1, 1), (64, Block::Sand));
        // Not yet invalidated: stale tile is served.
        let stale = renderer.render_cached(&blocks, key);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(renderer.invalidate(key));
        let fresh = renderer.render_cached(&blocks, key);
        renderer.render_cached(&blocks, key);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_ne!(stale.get(1, 1), fresh.get(1, 1));
    }

    #[test]
    fn test_full_render_reuses_tiles() {
        let (mut renderer, calls) = counting();
        let blocks = TestBlocks::new();
        let world = WorldId(0);

        let a = renderer.render(&blocks, world, 0, 0, 0);
        // 128 / 16 = 8 regions per axis.
        assert_eq!(calls.load(Ordering::SeqCst), 64);
        let b = renderer.render(&blocks, world, 0, 0, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 64);
        assert_eq!(a, b);
    }

    #[test]
    fn test_southern_edge_change_invalidates_neighbour() {
        let (mut renderer, _) = counting();
        let blocks = TestBlocks::new();
        let world = WorldId(0);
        let upper = RegionKey::new(world, 0, 0);
        let lower = RegionKey::new(world, 0, 1);
        renderer.render_cached(&blocks, upper);
        renderer.render_cached(&blocks, lower);

        renderer.on_block_change(world, 4, 15);
        assert_eq!(renderer.cache().len(), 0);

        renderer.render_cached(&blocks, upper);
        renderer.render_cached(&blocks, lower);
        renderer.on_block_change(world, 4, 14);
        assert_eq!(renderer.cache().len(), 1);
        assert!(renderer.cache().entry_generation(lower).is_some());
    }
}
