//! Height field smoothing and triangle mesh construction.

use serde::{Deserialize, Serialize};

use crate::color_scale::ColorScale;
use crate::linalg;
use crate::model::MeshModel;
use crate::stats;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SmoothingKernel {
    None,
    #[default]
    Gaussian,
    Box,
    Median,
}

impl SmoothingKernel {
    pub const ALL: [SmoothingKernel; 4] =
        [SmoothingKernel::None, SmoothingKernel::Gaussian, SmoothingKernel::Box, SmoothingKernel::Median];

    pub fn label(self) -> &'static str {
        match self {
            SmoothingKernel::None => "None",
            SmoothingKernel::Gaussian => "Gaussian",
            SmoothingKernel::Box => "Box",
            SmoothingKernel::Median => "Median",
        }
    }
}

const GAUSSIAN: [f64; 3] = [1.0, 2.0, 1.0];

/// The grid values after `iterations` passes of `kernel`.
pub fn build_height_field(values: &[f64], rows: usize, cols: usize, iterations: u32, kernel: SmoothingKernel) -> Vec<f64> {
    let mut field = values.to_vec();
    if kernel == SmoothingKernel::None {
        return field;
    }
    for _ in 0..iterations {
        field = smooth_once(&field, rows, cols, kernel);
    }
    field
}

/// One 3×3 pass. Non-finite cells are left as they are and never
/// contribute to their neighbors.
pub fn smooth_once(values: &[f64], rows: usize, cols: usize, kernel: SmoothingKernel) -> Vec<f64> {
    let mut out = values.to_vec();
    if kernel == SmoothingKernel::None {
        return out;
    }
    let mut window = Vec::with_capacity(9);
    for r in 0..rows {
        for c in 0..cols {
            let index = r * cols + c;
            if !values[index].is_finite() {
                continue;
            }
            window.clear();
            let mut sum = 0.0;
            let mut total = 0.0;
            for dr in 0..3 {
                for dc in 0..3 {
                    let (Some(nr), Some(nc)) = ((r + dr).checked_sub(1), (c + dc).checked_sub(1)) else {
                        continue;
                    };
                    if nr >= rows || nc >= cols {
                        continue;
                    }
                    let v = values[nr * cols + nc];
                    if !v.is_finite() {
                        continue;
                    }
                    let weight = if kernel == SmoothingKernel::Gaussian { GAUSSIAN[dr] * GAUSSIAN[dc] } else { 1.0 };
                    window.push(v);
                    sum += v * weight;
                    total += weight;
                }
            }
            out[index] = match kernel {
                SmoothingKernel::Median => stats::median(&window),
                _ if total > 0.0 => sum / total,
                _ => values[index],
            };
        }
    }
    out
}

/// Flat vertex streams ready for upload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SurfaceGeometry {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub colors: Vec<f32>,
    pub indices: Vec<u32>,
}

impl SurfaceGeometry {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Lays the grid out on a unit square in XZ centered on the origin, with
/// `heights * z_scale` as Y. Colors come from the unsmoothed grid values,
/// missing cells taking the grid mean.
pub fn build_geometry(model: &MeshModel, heights: &[f64], z_scale: f64, palette: &ColorScale) -> SurfaceGeometry {
    let (rows, cols) = (model.rows(), model.cols());
    if !model.has_data() || heights.len() != rows * cols {
        return SurfaceGeometry::default();
    }

    let stats = model.compute_stats();
    let (min, max) = stats.display_range();
    let fill = if stats.mean.is_finite() { stats.mean } else { 0.0 };
    let scale_x = 1.0 / (cols.max(2) - 1) as f64;
    let scale_z = 1.0 / (rows.max(2) - 1) as f64;

    let height = |r: usize, c: usize| heights[r * cols + c];
    let count = rows * cols;
    let mut geometry = SurfaceGeometry {
        positions: Vec::with_capacity(count * 3),
        normals: Vec::with_capacity(count * 3),
        colors: Vec::with_capacity(count * 3),
        indices: Vec::with_capacity(rows.saturating_sub(1) * cols.saturating_sub(1) * 6),
    };

    for r in 0..rows {
        for c in 0..cols {
            let center = height(r, c);
            let y = if center.is_finite() { center * z_scale } else { 0.0 };
            geometry.positions.extend([(c as f64 * scale_x - 0.5) as f32, y as f32, (r as f64 * scale_z - 0.5) as f32]);

            let left = if c > 0 { height(r, c - 1) } else { center };
            let right = if c + 1 < cols { height(r, c + 1) } else { center };
            let up = if r > 0 { height(r - 1, c) } else { center };
            let down = if r + 1 < rows { height(r + 1, c) } else { center };
            let dx = if left.is_finite() && right.is_finite() { right - left } else { 0.0 };
            let dz = if up.is_finite() && down.is_finite() { down - up } else { 0.0 };
            geometry.normals.extend(linalg::normalize([(-dx * z_scale) as f32, 2.0, (-dz * z_scale) as f32]));

            let raw = model.value(r, c);
            let rgb = palette.color(if raw.is_finite() { raw } else { fill }, min, max);
            geometry.colors.extend(rgb.map(|channel| channel as f32 / 255.0));
        }
    }

    for r in 0..rows.saturating_sub(1) {
        for c in 0..cols.saturating_sub(1) {
            let i0 = (r * cols + c) as u32;
            let i1 = i0 + 1;
            let i2 = i0 + cols as u32;
            let i3 = i2 + 1;
            // counter-clockwise seen from +Y
            geometry.indices.extend([i0, i2, i1, i1, i2, i3]);
        }
    }
    geometry
}
