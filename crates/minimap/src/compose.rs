//! Depth-ordered overwrite compositing.

use crate::canvas::{Canvas, MAP_SIZE};

/// Compose canvases into one, lowest depth first.
///
/// Equal depths keep their input order. An opaque pixel of a later layer
/// overwrites whatever is below it; transparent pixels leave it alone.
/// There is no blending.
pub fn compose<'a>(layers: impl IntoIterator<Item = (f32, &'a Canvas)>) -> Canvas {
    let mut ordered: Vec<(f32, &Canvas)> = layers.into_iter().collect();
    // Stable, so insertion order breaks ties.
    ordered.sort_by(|a, b| a.0.total_cmp(&b.0));

    let (width, height) = ordered
        .first()
        .map(|(_, c)| (c.width(), c.height()))
        .unwrap_or((MAP_SIZE, MAP_SIZE));
    let mut out = Canvas::new(width, height);
    for (_, canvas) in ordered {
        out.overlay(canvas, 0, 0);
    }
    out
}
