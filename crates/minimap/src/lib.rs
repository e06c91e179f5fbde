//! Client-illusion minimap engine.
//!
//! Renders a per-player minimap overlay purely through synthesized packets:
//! world tiles and markers are drawn into map canvases, each canvas is
//! hosted by a carrier entity that only the owning client knows about, and a
//! per-connection outbound filter keeps those carriers out of the passenger
//! updates the server sends on its own.

pub mod canvas;
pub mod compose;
pub mod config;
pub mod context;
pub mod error;
pub mod fetch;
pub mod fullscreen;
pub mod icon;
pub mod layer;
pub mod marker;
pub mod overlay;
pub mod palette;
pub mod render;
pub mod rewriter;
pub mod sender;
pub mod server;
pub mod store;
pub mod transport;
pub mod world;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use canvas::{Canvas, MAP_SIZE};
pub use config::Config;
pub use context::{AppContext, PlayerRef};
pub use error::MinimapError;
pub use overlay::{Minimap, ScreenPosition};
pub use server::run;

/// Stable player identity, independent of the live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct PlayerId(pub u128);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

impl FromStr for PlayerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.chars().filter(|&c| c != '-').collect();
        u128::from_str_radix(&hex, 16).map(PlayerId)
    }
}

impl From<PlayerId> for String {
    fn from(id: PlayerId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for PlayerId {
    type Error = std::num::ParseIntError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Identity of a loaded world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorldId(pub u32);

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "world#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_id_text_form() {
        let id = PlayerId(0x0011_2233_4455_6677_8899_aabb_ccdd_eeff);
        let text = id.to_string();
        assert_eq!(text, "00112233-4455-6677-8899-aabbccddeeff");
        assert_eq!(text.parse::<PlayerId>().unwrap(), id);
    }
}
