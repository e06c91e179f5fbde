//! Marker projection and icon drawing.
//!
//! World coordinates are projected onto the canvas by truncating integer
//! arithmetic, the same rule the world renderer uses to place the viewer.

use std::sync::Arc;

use crate::canvas::{Canvas, MAP_SIZE};
use crate::icon::{Icon, ICON_SIZE};

/// Project a world column onto canvas pixels relative to the viewer.
///
/// Returns `None` if the point is off-canvas and `stick_to_border` is off.
/// With `stick_to_border` each axis is clamped into `[0, MAP_SIZE - 1]`
/// independently.
pub fn project(
    world_x: i32,
    world_z: i32,
    viewer_x: i32,
    viewer_z: i32,
    zoom: u8,
    stick_to_border: bool,
) -> Option<(i32, i32)> {
    let scale = 1i64 << zoom;
    let half = (MAP_SIZE / 2) as i64;
    let max = (MAP_SIZE - 1) as i64;
    let px = (world_x as i64 - viewer_x as i64) / scale + half;
    let pz = (world_z as i64 - viewer_z as i64) / scale + half;

    if stick_to_border {
        Some((px.clamp(0, max) as i32, pz.clamp(0, max) as i32))
    } else if (0..=max).contains(&px) && (0..=max).contains(&pz) {
        Some((px as i32, pz as i32))
    } else {
        None
    }
}

/// Draw `icon` centered on the projection of `(world_x, world_z)`.
///
/// Returns false when nothing was drawn this frame.
pub fn draw(
    icon: &Icon,
    canvas: &mut Canvas,
    world_x: i32,
    world_z: i32,
    viewer_x: i32,
    viewer_z: i32,
    zoom: u8,
    stick_to_border: bool,
) -> bool {
    let Some((px, pz)) = project(world_x, world_z, viewer_x, viewer_z, zoom, stick_to_border) else {
        return false;
    };
    let half = (ICON_SIZE / 2) as i32;
    canvas.overlay(icon.canvas(), px - half, pz - half);
    true
}

/// Draws one named icon; the pixel source of a marker layer.
#[derive(Debug, Clone)]
pub struct IconRenderer {
    name: String,
    icon: Arc<Icon>,
}

impl IconRenderer {
    pub fn new(name: impl Into<String>, icon: Arc<Icon>) -> Self {
        Self {
            name: name.into(),
            icon,
        }
    }

    /// Name the icon is registered under.
    pub fn icon_name(&self) -> &str {
        &self.name
    }

    pub fn icon(&self) -> &Arc<Icon> {
        &self.icon
    }

    pub fn set_icon(&mut self, name: impl Into<String>, icon: Arc<Icon>) {
        self.name = name.into();
        self.icon = icon;
    }

    /// Render the icon for a viewer onto a fresh map canvas.
    pub fn render(
        &self,
        world_x: i32,
        world_z: i32,
        viewer_x: i32,
        viewer_z: i32,
        zoom: u8,
        stick_to_border: bool,
    ) -> Canvas {
        let mut canvas = Canvas::map();
        draw(&self.icon, &mut canvas, world_x, world_z, viewer_x, viewer_z, zoom, stick_to_border);
        canvas
    }
}
