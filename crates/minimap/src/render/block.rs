//! Block kinds and their map colours.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::palette::MapColor;

/// Block kinds known to the host world.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Block {
    Air = 0,
    Stone,
    Grass,
    Dirt,
    Cobblestone,
    Planks,
    Bedrock,
    Water,
    Lava,
    Sand,
    Gravel,
    Log,
    Leaves,
    Glass,
    Sandstone,
    Wool,
    Flower,
    TallGrass,
    Snow,
    Ice,
    Clay,
    Obsidian,
    GoldBlock,
    IronBlock,
    DiamondBlock,
    EmeraldBlock,
    LapisBlock,
    Podzol,
    Netherrack,
}

const ALL: [Block; 29] = [
    Block::Air,
    Block::Stone,
    Block::Grass,
    Block::Dirt,
    Block::Cobblestone,
    Block::Planks,
    Block::Bedrock,
    Block::Water,
    Block::Lava,
    Block::Sand,
    Block::Gravel,
    Block::Log,
    Block::Leaves,
    Block::Glass,
    Block::Sandstone,
    Block::Wool,
    Block::Flower,
    Block::TallGrass,
    Block::Snow,
    Block::Ice,
    Block::Clay,
    Block::Obsidian,
    Block::GoldBlock,
    Block::IronBlock,
    Block::DiamondBlock,
    Block::EmeraldBlock,
    Block::LapisBlock,
    Block::Podzol,
    Block::Netherrack,
];

impl Block {
    /// Numeric id used on the wire.
    #[inline]
    pub const fn id(self) -> u16 {
        self as u16
    }

    pub fn from_id(id: u16) -> Option<Self> {
        ALL.get(id as usize).copied()
    }

    /// Blocks the map looks straight through.
    #[inline]
    pub const fn is_transparent(self) -> bool {
        matches!(self, Block::Air | Block::Glass)
    }

    /// Default map colour of this block.
    pub const fn default_color(self) -> MapColor {
        match self {
            Block::Air | Block::Glass => MapColor::None,
            Block::Stone | Block::Cobblestone | Block::Bedrock => MapColor::Stone,
            Block::Grass => MapColor::Grass,
            Block::Dirt | Block::Gravel => MapColor::Dirt,
            Block::Planks | Block::Log => MapColor::Wood,
            Block::Water => MapColor::Water,
            Block::Lava => MapColor::Fire,
            Block::Sand | Block::Sandstone => MapColor::Sand,
            Block::Leaves | Block::Flower | Block::TallGrass => MapColor::Plant,
            Block::Wool => MapColor::Wool,
            Block::Snow => MapColor::Snow,
            Block::Ice => MapColor::Ice,
            Block::Clay => MapColor::Clay,
            Block::Obsidian => MapColor::Black,
            Block::GoldBlock => MapColor::Gold,
            Block::IronBlock => MapColor::Metal,
            Block::DiamondBlock => MapColor::Diamond,
            Block::EmeraldBlock => MapColor::Emerald,
            Block::LapisBlock => MapColor::Lapis,
            Block::Podzol => MapColor::Podzol,
            Block::Netherrack => MapColor::Nether,
        }
    }
}

/// Block colour table with configured overrides.
#[derive(Debug, Clone, Default)]
pub struct BlockColors {
    overrides: HashMap<Block, MapColor>,
}

impl BlockColors {
    pub fn new(overrides: HashMap<Block, MapColor>) -> Self {
        Self { overrides }
    }

    #[inline]
    pub fn color(&self, block: Block) -> MapColor {
        self.overrides
            .get(&block)
            .copied()
            .unwrap_or_else(|| block.default_color())
    }
}
