//! Marker icons.
//!
//! Icons are fixed-size palette-indexed sprites. A handful are builtin; more
//! are loaded from PNG files in the icons directory at startup.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use image::imageops::FilterType;
use image::RgbaImage;
use thiserror::Error;
use tracing::{info, warn};

use crate::canvas::Canvas;
use crate::palette::{self, MapColor, Shade, TRANSPARENT};

/// Side length of an icon in pixels.
pub const ICON_SIZE: usize = 8;

/// Icon names reserved for system layers; never accepted for custom markers.
pub const SPECIAL_ICON_KEYS: [&str; 2] = ["player", "death"];

/// Why an icon could not be used.
#[derive(Debug, Error)]
pub enum IconError {
    #[error("Icon '{0}' is not registered")]
    NotRegistered(String),

    #[error("Icon '{name}' failed to load: {reason}")]
    LoadFailed { name: String, reason: String },
}

/// A fixed-size sprite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icon {
    canvas: Canvas,
}

impl Icon {
    /// Build an icon from rows of characters, one palette index per
    /// character via `legend`; unknown characters are transparent.
    pub fn from_pattern(rows: [&str; ICON_SIZE], legend: &[(char, u8)]) -> Self {
        let mut canvas = Canvas::new(ICON_SIZE, ICON_SIZE);
        for (y, row) in rows.iter().enumerate() {
            for (x, ch) in row.chars().take(ICON_SIZE).enumerate() {
                let color = legend
                    .iter()
                    .find(|(c, _)| *c == ch)
                    .map(|(_, color)| *color)
                    .unwrap_or(TRANSPARENT);
                canvas.set(x, y, color);
            }
        }
        Self { canvas }
    }

    /// Resize (nearest) and quantize an RGBA image.
    pub fn from_rgba(image: &RgbaImage) -> Self {
        let resized = if image.width() as usize == ICON_SIZE && image.height() as usize == ICON_SIZE {
            image.clone()
        } else {
            image::imageops::resize(image, ICON_SIZE as u32, ICON_SIZE as u32, FilterType::Nearest)
        };
        let mut canvas = Canvas::new(ICON_SIZE, ICON_SIZE);
        for (x, y, pixel) in resized.enumerate_pixels() {
            canvas.set(x as usize, y as usize, palette::quantize(pixel.0));
        }
        Self { canvas }
    }

    /// Decode an icon from PNG (or any enabled image format) bytes.
    pub fn decode(name: &str, bytes: &[u8]) -> Result<Self, IconError> {
        image::load_from_memory(bytes)
            .map(|img| Self::from_rgba(&img.to_rgba8()))
            .map_err(|e| IconError::LoadFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })
    }

    #[inline]
    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }
}

/// Icon lookup by name.
pub trait IconProvider: Send + Sync {
    fn get_icon(&self, name: &str) -> Option<Arc<Icon>>;

    /// Reason the icon registered under `name` failed to load, if it did.
    fn load_failure(&self, name: &str) -> Option<&str>;

    fn register_icon(&mut self, name: &str, icon: Icon);

    fn keys(&self) -> BTreeSet<String>;

    /// Look up an icon for a user marker, rejecting reserved names.
    fn marker_icon(&self, name: &str) -> Result<Arc<Icon>, IconError> {
        if SPECIAL_ICON_KEYS.contains(&name) {
            return Err(IconError::NotRegistered(name.to_string()));
        }
        if let Some(reason) = self.load_failure(name) {
            return Err(IconError::LoadFailed {
                name: name.to_string(),
                reason: reason.to_string(),
            });
        }
        self.get_icon(name)
            .ok_or_else(|| IconError::NotRegistered(name.to_string()))
    }
}

/// Builtin icons plus PNG files from a directory.
#[derive(Debug, Default)]
pub struct BuiltinIconProvider {
    icons: HashMap<String, Arc<Icon>>,
    failures: HashMap<String, String>,
}

impl BuiltinIconProvider {
    /// Only the builtin icons.
    pub fn new() -> Self {
        let mut provider = Self::default();
        for (name, icon) in builtin_icons() {
            provider.icons.insert(name.to_string(), Arc::new(icon));
        }
        provider
    }

    /// Builtins plus every `*.png` in `dir`, keyed by file stem.
    ///
    /// A file that fails to decode is remembered so lookups can report it
    /// as broken rather than missing.
    pub fn load(dir: &Path) -> std::io::Result<Self> {
        let mut provider = Self::new();
        std::fs::create_dir_all(dir)?;
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("png") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let result = std::fs::read(&path)
                .map_err(|e| IconError::LoadFailed {
                    name: name.clone(),
                    reason: e.to_string(),
                })
                .and_then(|bytes| Icon::decode(&name, &bytes));
            match result {
                Ok(icon) => {
                    provider.register_icon(&name, icon);
                    loaded += 1;
                }
                Err(e) => {
                    warn!("{}", e);
                    provider.failures.insert(name, e.to_string());
                }
            }
        }
        info!("Loaded {} icons from {:?}", loaded, dir);
        Ok(provider)
    }
}

impl IconProvider for BuiltinIconProvider {
    fn get_icon(&self, name: &str) -> Option<Arc<Icon>> {
        self.icons.get(name).cloned()
    }

    fn load_failure(&self, name: &str) -> Option<&str> {
        self.failures.get(name).map(String::as_str)
    }

    fn register_icon(&mut self, name: &str, icon: Icon) {
        self.failures.remove(name);
        self.icons.insert(name.to_string(), Arc::new(icon));
    }

    fn keys(&self) -> BTreeSet<String> {
        self.icons.keys().cloned().collect()
    }
}

fn builtin_icons() -> Vec<(&'static str, Icon)> {
    let white = MapColor::Snow.shaded(Shade::Bright);
    let black = MapColor::Black.shaded(Shade::Bright);
    let red = MapColor::Red.shaded(Shade::Bright);
    let gold = MapColor::Gold.shaded(Shade::Bright);
    let blue = MapColor::Blue.shaded(Shade::Bright);
    let wood = MapColor::Wood.shaded(Shade::Normal);
    let legend = [('#', black), ('w', white), ('r', red), ('g', gold), ('b', blue), ('o', wood)];

    vec![
        (
            "player",
            Icon::from_pattern(
                [
                    "...##...",
                    "..#ww#..",
                    ".#wwww#.",
                    "#wwwwww#",
                    "#wwwwww#",
                    ".#w##w#.",
                    ".##..##.",
                    "........",
                ],
                &legend,
            ),
        ),
        (
            "death",
            Icon::from_pattern(
                [
                    "r......r",
                    ".r....r.",
                    "..r..r..",
                    "...rr...",
                    "...rr...",
                    "..r..r..",
                    ".r....r.",
                    "r......r",
                ],
                &legend,
            ),
        ),
        (
            "flag",
            Icon::from_pattern(
                [
                    "#rrrr...",
                    "#rrrrrr.",
                    "#rrrr...",
                    "#.......",
                    "#.......",
                    "#.......",
                    "#.......",
                    "##......",
                ],
                &legend,
            ),
        ),
        (
            "house",
            Icon::from_pattern(
                [
                    "...##...",
                    "..#oo#..",
                    ".#oooo#.",
                    "########",
                    ".#wwww#.",
                    ".#w##w#.",
                    ".#w##w#.",
                    ".######.",
                ],
                &legend,
            ),
        ),
        (
            "star",
            Icon::from_pattern(
                [
                    "...gg...",
                    "...gg...",
                    "gggggggg",
                    ".gggggg.",
                    "..gggg..",
                    ".gg..gg.",
                    "gg....gg",
                    "........",
                ],
                &legend,
            ),
        ),
        (
            "waypoint",
            Icon::from_pattern(
                [
                    "..bbbb..",
                    ".bbwwbb.",
                    ".bwwwwb.",
                    ".bbwwbb.",
                    "..bbbb..",
                    "...bb...",
                    "...bb...",
                    "....b...",
                ],
                &legend,
            ),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_builtins_are_registered() {
        let provider = BuiltinIconProvider::new();
        for name in ["player", "death", "flag", "house", "star", "waypoint"] {
            let icon = provider.get_icon(name).unwrap();
            assert!(!icon.canvas().is_blank(), "{name} is blank");
        }
        assert_eq!(provider.keys().len(), 6);
    }

    #[test]
    fn test_marker_icon_distinguishes_failures() {
        let mut provider = BuiltinIconProvider::new();
        provider.failures.insert("broken".into(), "bad png".into());

        assert!(provider.marker_icon("flag").is_ok());
        assert!(matches!(provider.marker_icon("nope"), Err(IconError::NotRegistered(_))));
        assert!(matches!(provider.marker_icon("broken"), Err(IconError::LoadFailed { .. })));
        // Reserved for system layers.
        assert!(matches!(provider.marker_icon("death"), Err(IconError::NotRegistered(_))));
    }

    #[test]
    fn test_from_rgba_downscales_and_keeps_alpha() {
        let mut img = RgbaImage::from_pixel(16, 16, Rgba([255, 255, 255, 255]));
        for y in 0..16 {
            for x in 0..8 {
                img.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        let icon = Icon::from_rgba(&img);
        assert_eq!(icon.canvas().get(0, 0), TRANSPARENT);
        assert_eq!(icon.canvas().get(7, 7), MapColor::Snow.shaded(Shade::Bright));
    }

    #[test]
    fn test_load_directory_records_broken_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("broken.png"), b"not a png").unwrap();
        let img = RgbaImage::from_pixel(8, 8, Rgba([250, 238, 77, 255]));
        img.save(dir.path().join("coin.png")).unwrap();

        let provider = BuiltinIconProvider::load(dir.path()).unwrap();
        assert!(provider.get_icon("coin").is_some());
        assert!(provider.keys().contains("coin"));
        assert!(!provider.keys().contains("broken"));
        assert!(matches!(provider.marker_icon("broken"), Err(IconError::LoadFailed { .. })));
    }
}
