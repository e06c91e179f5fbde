//! Server and minimap configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::MinimapError;
use crate::overlay::{OverlayMode, ScreenPosition};
use crate::palette::MapColor;
use crate::render::{Block, BlockColors};

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub minimap: MinimapConfig,
    #[serde(default)]
    pub markers: MarkersConfig,
    #[serde(default)]
    pub fullscreen: FullscreenConfig,
    #[serde(default)]
    pub world: WorldConfig,
    /// Map colour overrides per block.
    #[serde(default)]
    pub blocks: HashMap<Block, MapColor>,
}

impl Config {
    /// Load configuration from `config.toml` or use defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new("config.toml"))
    }

    /// Load configuration from `path`, writing the defaults there if the
    /// file does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            info!("No {:?} found, creating default config", path);
            let default_config = Self::default();
            std::fs::write(path, toml::to_string_pretty(&default_config)?)?;
            Ok(default_config)
        }
    }

    /// Reject values the renderers cannot work with.
    pub fn validate(&self) -> Result<(), MinimapError> {
        if self.minimap.zoom > MAX_ZOOM {
            return Err(MinimapError::InvalidConfig(format!(
                "minimap.zoom is {}, at most {} is supported",
                self.minimap.zoom, MAX_ZOOM
            )));
        }
        let fullscreen = &self.fullscreen;
        for (key, value) in [("segments_x", fullscreen.segments_x), ("segments_z", fullscreen.segments_z)] {
            if !(1..=MAX_SEGMENTS).contains(&value) {
                return Err(MinimapError::InvalidConfig(format!(
                    "fullscreen.{} is {}, expected 1..={}",
                    key, value, MAX_SEGMENTS
                )));
            }
        }
        if !fullscreen.steer_speed.is_finite() || fullscreen.steer_speed <= 0.0 {
            return Err(MinimapError::InvalidConfig(format!(
                "fullscreen.steer_speed must be positive, got {}",
                fullscreen.steer_speed
            )));
        }
        Ok(())
    }

    pub fn block_colors(&self) -> BlockColors {
        BlockColors::new(self.blocks.clone())
    }

    pub fn icons_dir(&self) -> PathBuf {
        self.server.data_dir.join("icons")
    }

    pub fn skins_dir(&self) -> PathBuf {
        self.server.data_dir.join("skins")
    }
}

/// Server networking and general settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Maximum connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Tick interval in milliseconds.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Server name shown to clients.
    #[serde(default = "default_name")]
    pub name: String,
    /// Root of player records, icons and skins.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            max_connections: default_max_connections(),
            tick_interval_ms: default_tick_interval(),
            name: default_name(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_port() -> u16 {
    25580
}
fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_max_connections() -> usize {
    100
}
fn default_tick_interval() -> u64 {
    50
}
fn default_name() -> String {
    "Vanilla Minimaps".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// Largest supported `minimap.zoom` (16 blocks per pixel).
pub const MAX_ZOOM: u8 = 4;

/// Largest fullscreen grid side, in segments.
pub const MAX_SEGMENTS: u32 = 8;

/// Overlay settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MinimapConfig {
    /// Show the minimap to players that never toggled it.
    #[serde(default = "default_true")]
    pub enabled_by_default: bool,
    #[serde(default)]
    pub default_position: ScreenPosition,
    /// World renderer name (`vanilla` or `flat`).
    #[serde(default = "default_renderer")]
    pub default_renderer: String,
    #[serde(default)]
    pub mode: OverlayMode,
    /// Blocks per pixel as a power of two.
    #[serde(default)]
    pub zoom: u8,
    /// Ticks between minimap refreshes.
    #[serde(default = "default_update_interval")]
    pub update_interval_ticks: u32,
}

impl Default for MinimapConfig {
    fn default() -> Self {
        Self {
            enabled_by_default: true,
            default_position: ScreenPosition::default(),
            default_renderer: default_renderer(),
            mode: OverlayMode::default(),
            zoom: 0,
            update_interval_ticks: default_update_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_renderer() -> String {
    "vanilla".to_string()
}
fn default_update_interval() -> u32 {
    5
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MarkersConfig {
    #[serde(default)]
    pub death_marker: DeathMarkerConfig,
    #[serde(default)]
    pub custom_markers: CustomMarkersConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeathMarkerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub stick_to_border: bool,
}

impl Default for DeathMarkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stick_to_border: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CustomMarkersConfig {
    /// Maximum user markers per player.
    #[serde(default = "default_marker_limit")]
    pub limit: usize,
    #[serde(default = "default_true")]
    pub stick_to_border: bool,
}

impl Default for CustomMarkersConfig {
    fn default() -> Self {
        Self {
            limit: default_marker_limit(),
            stick_to_border: true,
        }
    }
}

fn default_marker_limit() -> usize {
    5
}

/// Fullscreen map. One segment is 128x128 pixels, i.e. 8x8 chunks.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FullscreenConfig {
    #[serde(default = "default_segments_x")]
    pub segments_x: u32,
    #[serde(default = "default_segments_z")]
    pub segments_z: u32,
    /// Blocks the view pans per block walked while it is open.
    #[serde(default = "default_steer_speed")]
    pub steer_speed: f64,
}

impl Default for FullscreenConfig {
    fn default() -> Self {
        Self {
            segments_x: default_segments_x(),
            segments_z: default_segments_z(),
            steer_speed: default_steer_speed(),
        }
    }
}

fn default_segments_x() -> u32 {
    5
}
fn default_segments_z() -> u32 {
    3
}
fn default_steer_speed() -> f64 {
    4.0
}

/// Generated host world.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorldConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Generated chunks in each direction from the origin.
    #[serde(default = "default_radius")]
    pub radius_chunks: i32,
    #[serde(default = "default_sea_level")]
    pub sea_level: i32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            radius_chunks: default_radius(),
            sea_level: default_sea_level(),
        }
    }
}

fn default_seed() -> u64 {
    0x5eed
}
fn default_radius() -> i32 {
    8
}
fn default_sea_level() -> i32 {
    62
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.minimap.enabled_by_default);
        assert_eq!(config.minimap.default_renderer, "vanilla");
        assert_eq!(config.minimap.update_interval_ticks, 5);
        assert_eq!(config.markers.custom_markers.limit, 5);
        assert!(config.markers.death_marker.enabled);
        assert_eq!(config.minimap.mode, OverlayMode::Layered);
        assert_eq!((config.fullscreen.segments_x, config.fullscreen.segments_z), (5, 3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        let mut config = Config::default();
        config.minimap.zoom = MAX_ZOOM;
        assert!(config.validate().is_ok());
        config.minimap.zoom = 32;
        assert!(matches!(config.validate(), Err(MinimapError::InvalidConfig(_))));

        let mut config = Config::default();
        config.fullscreen.segments_x = 0;
        assert!(matches!(config.validate(), Err(MinimapError::InvalidConfig(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[minimap]\nzoom = 9\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_partial_sections() {
        let config: Config = toml::from_str(
            r#"
            [minimap]
            default_position = "right"
            mode = "composited"

            [markers.custom_markers]
            limit = 2

            [blocks]
            sand = "snow"
            "#,
        )
        .unwrap();
        assert_eq!(config.minimap.default_position, ScreenPosition::Right);
        assert_eq!(config.minimap.mode, OverlayMode::Composited);
        assert_eq!(config.markers.custom_markers.limit, 2);
        assert!(config.markers.custom_markers.stick_to_border);
        assert_eq!(config.block_colors().color(Block::Sand), MapColor::Snow);
    }

    #[test]
    fn test_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        let again = Config::load_from(&path).unwrap();
        assert_eq!(again.server.port, config.server.port);
        assert_eq!(again.server.data_dir, config.server.data_dir);
    }
}
