//! The host's block world.
//!
//! Terrain is generated from the configured seed as a heightmap over a
//! square of chunks around the origin; everything outside it is void.
//! Player edits are stored on top of the generated terrain.

use std::collections::{BTreeMap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::WorldConfig;
use crate::render::{Block, BlockSource, REGION_SIZE};
use crate::WorldId;

/// Lowest block layer; falling below it is fatal.
pub const MIN_Y: i32 = -64;
/// One past the highest block layer.
pub const MAX_Y: i32 = 320;

/// Distance between coarse height samples.
const LATTICE: i32 = 32;
/// Distance between detail height samples.
const DETAIL: i32 = 8;

/// Blocks per chunk column.
const COLUMN_COUNT: usize = (REGION_SIZE * REGION_SIZE) as usize;

pub struct BlockWorld {
    id: WorldId,
    sea_level: i32,
    heights: HashMap<(i32, i32), Vec<i32>>,
    edits: HashMap<(i32, i32), BTreeMap<i32, Block>>,
}

impl BlockWorld {
    /// Generate terrain from `config`.
    pub fn generate(id: WorldId, config: &WorldConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let radius = config.radius_chunks.max(0);
        let span = radius * REGION_SIZE + LATTICE;

        let coarse = lattice(&mut rng, span, LATTICE, -14, 22);
        let detail = lattice(&mut rng, span, DETAIL, -2, 2);

        let mut heights = HashMap::new();
        for cz in -radius..=radius {
            for cx in -radius..=radius {
                let mut column = Vec::with_capacity(COLUMN_COUNT);
                for lz in 0..REGION_SIZE {
                    for lx in 0..REGION_SIZE {
                        let x = cx * REGION_SIZE + lx;
                        let z = cz * REGION_SIZE + lz;
                        let h = config.sea_level as f32
                            + sample(&coarse, LATTICE, x, z)
                            + sample(&detail, DETAIL, x, z);
                        column.push((h.round() as i32).clamp(MIN_Y + 1, MAX_Y - 1));
                    }
                }
                heights.insert((cx, cz), column);
            }
        }
        info!(
            "Generated {} with {} chunks (seed {})",
            id,
            heights.len(),
            config.seed
        );

        Self {
            id,
            sea_level: config.sea_level,
            heights,
            edits: HashMap::new(),
        }
    }

    #[inline]
    pub fn id(&self) -> WorldId {
        self.id
    }

    /// Terrain surface height at a column, if it is generated.
    pub fn surface(&self, x: i32, z: i32) -> Option<i32> {
        let column = self.heights.get(&(x >> 4, z >> 4))?;
        let index = (z.rem_euclid(REGION_SIZE) * REGION_SIZE + x.rem_euclid(REGION_SIZE)) as usize;
        column.get(index).copied()
    }

    /// Where players appear.
    pub fn spawn_point(&self) -> (f64, f64, f64) {
        let y = self
            .top_block(self.id, 0, 0)
            .map(|(y, _)| y + 1)
            .unwrap_or(self.sea_level + 1);
        (0.5, y as f64, 0.5)
    }

    /// Place a block. Returns false if `y` is outside the world.
    pub fn set_block(&mut self, x: i32, y: i32, z: i32, block: Block) -> bool {
        if !(MIN_Y..MAX_Y).contains(&y) {
            return false;
        }
        self.edits.entry((x, z)).or_default().insert(y, block);
        true
    }

    fn generated_block(&self, x: i32, y: i32, z: i32) -> Block {
        let Some(h) = self.surface(x, z) else {
            return Block::Air;
        };
        if y == MIN_Y {
            Block::Bedrock
        } else if y < h - 3 {
            Block::Stone
        } else if y < h {
            if h <= self.sea_level + 1 {
                Block::Sand
            } else {
                Block::Dirt
            }
        } else if y == h {
            if h <= self.sea_level + 1 {
                Block::Sand
            } else if h > self.sea_level + 18 {
                Block::Snow
            } else {
                Block::Grass
            }
        } else if y <= self.sea_level {
            Block::Water
        } else {
            Block::Air
        }
    }
}

impl BlockSource for BlockWorld {
    fn block_at(&self, world: WorldId, x: i32, y: i32, z: i32) -> Block {
        if world != self.id || !(MIN_Y..MAX_Y).contains(&y) {
            return Block::Air;
        }
        if let Some(block) = self.edits.get(&(x, z)).and_then(|column| column.get(&y)) {
            return *block;
        }
        self.generated_block(x, y, z)
    }

    fn height_range(&self, _world: WorldId) -> (i32, i32) {
        (MIN_Y, MAX_Y)
    }

    fn top_block(&self, world: WorldId, x: i32, z: i32) -> Option<(i32, Block)> {
        if world != self.id {
            return None;
        }
        let terrain = self.surface(x, z).map(|h| h.max(self.sea_level));
        let edited = self
            .edits
            .get(&(x, z))
            .and_then(|column| column.keys().next_back().copied());
        let ceiling = match (terrain, edited) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return None,
        };
        (MIN_Y..=ceiling).rev().find_map(|y| {
            let block = self.block_at(world, x, y, z);
            (!block.is_transparent()).then_some((y, block))
        })
    }
}

/// Random values on a square lattice covering `[-span, span]`.
fn lattice(rng: &mut StdRng, span: i32, step: i32, min: i32, max: i32) -> HashMap<(i32, i32), f32> {
    let cells = span / step + 1;
    let mut points = HashMap::new();
    for iz in -cells..=cells {
        for ix in -cells..=cells {
            points.insert((ix, iz), rng.random_range(min..=max) as f32);
        }
    }
    points
}

/// Smoothly interpolated lattice value at `(x, z)`.
fn sample(points: &HashMap<(i32, i32), f32>, step: i32, x: i32, z: i32) -> f32 {
    let ix = x.div_euclid(step);
    let iz = z.div_euclid(step);
    let fx = smooth(x.rem_euclid(step) as f32 / step as f32);
    let fz = smooth(z.rem_euclid(step) as f32 / step as f32);
    let at = |dx: i32, dz: i32| points.get(&(ix + dx, iz + dz)).copied().unwrap_or(0.0);
    let north = at(0, 0) + (at(1, 0) - at(0, 0)) * fx;
    let south = at(0, 1) + (at(1, 1) - at(0, 1)) * fx;
    north + (south - north) * fz
}

fn smooth(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> WorldConfig {
        WorldConfig {
            seed: 42,
            radius_chunks: 2,
            sea_level: 62,
        }
    }

    #[test]
    fn test_generation_is_deterministic() {
        let a = BlockWorld::generate(WorldId(0), &small());
        let b = BlockWorld::generate(WorldId(0), &small());
        for (x, z) in [(0, 0), (-17, 5), (30, -30)] {
            assert_eq!(a.surface(x, z), b.surface(x, z));
            assert_eq!(a.top_block(WorldId(0), x, z), b.top_block(WorldId(0), x, z));
        }
    }

    #[test]
    fn test_void_outside_radius() {
        let world = BlockWorld::generate(WorldId(0), &small());
        assert_eq!(world.surface(48, 0), None);
        assert_eq!(world.top_block(WorldId(0), 48, 0), None);
        assert_eq!(world.block_at(WorldId(0), 48, MIN_Y, 0), Block::Air);
        assert_eq!(world.block_at(WorldId(0), 47, MIN_Y, 0), Block::Bedrock);
    }

    #[test]
    fn test_edits_override_terrain() {
        let mut world = BlockWorld::generate(WorldId(0), &small());
        let w = world.id();
        let (top, _) = world.top_block(w, 3, 4).unwrap();

        assert!(world.set_block(3, top + 10, 4, Block::GoldBlock));
        assert_eq!(world.top_block(w, 3, 4), Some((top + 10, Block::GoldBlock)));

        assert!(world.set_block(3, top + 10, 4, Block::Air));
        assert_eq!(world.top_block(w, 3, 4).map(|(y, _)| y), Some(top));
        assert!(!world.set_block(3, MAX_Y, 4, Block::Stone));

        // Blocks can be placed in the void too.
        assert!(world.set_block(100, 70, 100, Block::Obsidian));
        assert_eq!(world.top_block(w, 100, 100), Some((70, Block::Obsidian)));
    }

    #[test]
    fn test_other_worlds_are_empty() {
        let world = BlockWorld::generate(WorldId(0), &small());
        assert_eq!(world.block_at(WorldId(1), 0, 60, 0), Block::Air);
        assert_eq!(world.top_block(WorldId(1), 0, 0), None);
    }
}
