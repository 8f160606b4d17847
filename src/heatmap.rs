//! 2D heatmap of the mesh with brush painting.
//!
//! Pointer handling is split from drawing: [`HeatmapView::pointer_down`],
//! [`HeatmapView::pointer_move`] and friends take already-resolved cells and
//! return [`HeatmapEvent`]s, so the gesture rules can be exercised without a
//! UI. [`HeatmapView::show`] feeds them from egui input and paints the grid.

use std::collections::HashSet;

use eframe::egui::{self, Color32, Pos2, Rect, Stroke, Vec2};
use serde::{Deserialize, Serialize};

use crate::color_scale::{self, ColorScale};
use crate::model::{CellState, MeshModel};

const MISSING_FILL: Color32 = Color32::from_rgba_premultiplied(14, 18, 27, 115);
const MISSING_MARK: [u8; 4] = [251, 191, 36, 230];
const IMPUTED_MARK: [u8; 4] = [34, 197, 94, 230];
const PREVIEW_TEAL: [u8; 4] = [34, 197, 187, 230];
const PREVIEW_MARK: [u8; 4] = [56, 189, 248, 230];
const HOVER_MARK: [u8; 4] = [59, 130, 246, 204];
const GRID_LINE: [u8; 4] = [148, 163, 184, 102];
const BACKGROUND: Color32 = Color32::from_rgb(15, 23, 42);

fn rgba(c: [u8; 4]) -> Color32 {
    Color32::from_rgba_unmultiplied(c[0], c[1], c[2], c[3])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub row: usize,
    pub col: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaintMode {
    /// Write the brush value.
    #[default]
    Paint,
    /// Mark cells missing.
    Erase,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HoverInfo {
    pub cell: Cell,
    pub value: f64,
    pub preview: Option<f64>,
}

impl HoverInfo {
    /// The value shown to the user: the preview when there is one.
    pub fn display_value(&self) -> f64 {
        self.preview.unwrap_or(self.value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum HeatmapEvent {
    Paint { cells: Vec<Cell>, mode: PaintMode, value: f64 },
    Hover(Option<HoverInfo>),
    CellClick(Cell),
}

/// Maps between screen positions and grid cells for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CellLayout {
    pub rect: Rect,
    pub rows: usize,
    pub cols: usize,
}

impl CellLayout {
    pub fn cell_size(&self) -> Vec2 {
        Vec2::new(self.rect.width() / self.cols.max(1) as f32, self.rect.height() / self.rows.max(1) as f32)
    }

    pub fn cell_at(&self, pos: Pos2) -> Option<Cell> {
        if self.rows == 0 || self.cols == 0 {
            return None;
        }
        let size = self.cell_size();
        let col = ((pos.x - self.rect.min.x) / size.x).floor();
        let row = ((pos.y - self.rect.min.y) / size.y).floor();
        if !(col >= 0.0 && row >= 0.0) {
            return None;
        }
        let (row, col) = (row as usize, col as usize);
        (row < self.rows && col < self.cols).then_some(Cell { row, col })
    }

    pub fn cell_rect(&self, cell: Cell) -> Rect {
        let size = self.cell_size();
        let min = self.rect.min + Vec2::new(cell.col as f32 * size.x, cell.row as f32 * size.y);
        Rect::from_min_size(min, size)
    }
}

/// Cells covered by a brush of `size` centered on `center`: a square of
/// radius `size - 1`, cut down to a diamond once `size > 2`.
pub fn brush_footprint(center: Cell, size: u32, rows: usize, cols: usize) -> Vec<Cell> {
    let radius = size.max(1) as isize - 1;
    let mut cells = Vec::new();
    for dr in -radius..=radius {
        for dc in -radius..=radius {
            if size > 2 && dr.abs() + dc.abs() > radius {
                continue;
            }
            let (Some(row), Some(col)) = (center.row.checked_add_signed(dr), center.col.checked_add_signed(dc))
            else {
                continue;
            };
            if row < rows && col < cols {
                cells.push(Cell { row, col });
            }
        }
    }
    cells
}

/// Fill color of one cell. A preview value replaces the cell value and is
/// drawn slightly transparent.
pub fn cell_fill(scale: &ColorScale, value: f64, preview: Option<f64>, min: f64, max: f64) -> Color32 {
    let shown = preview.unwrap_or(value);
    match (shown.is_finite(), preview.is_some()) {
        (true, false) => color_scale::to_color32(scale.color(shown, min, max)),
        (true, true) => {
            let [r, g, b] = scale.color(shown, min, max);
            Color32::from_rgba_unmultiplied(r, g, b, 204)
        }
        (false, true) => Color32::from_rgba_unmultiplied(34, 197, 187, 153),
        (false, false) => MISSING_FILL,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Overlay {
    None,
    Missing,
    Imputed { previewed: bool },
    Preview,
}

/// Which decoration a cell gets.
pub fn overlay_for(state: CellState, previewed: bool, show_imputed: bool) -> Overlay {
    if !show_imputed {
        return if previewed { Overlay::Preview } else { Overlay::None };
    }
    match state {
        CellState::Missing if !previewed => Overlay::Missing,
        CellState::Imputed => Overlay::Imputed { previewed },
        _ if previewed => Overlay::Preview,
        _ => Overlay::None,
    }
}

/// Largest brush size the editor offers.
pub const MAX_BRUSH_SIZE: u32 = 10;

pub struct HeatmapView {
    pub show_grid: bool,
    pub show_imputed: bool,
    mode: PaintMode,
    brush_value: f64,
    brush_size: u32,
    hover: Option<Cell>,
    painting: bool,
    seen: HashSet<Vec<Cell>>,
    backing: [u32; 2],
}

impl Default for HeatmapView {
    fn default() -> Self {
        Self {
            show_grid: true,
            show_imputed: true,
            mode: PaintMode::Paint,
            brush_value: 0.0,
            brush_size: 1,
            hover: None,
            painting: false,
            seen: HashSet::new(),
            backing: [0, 0],
        }
    }
}

impl HeatmapView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> PaintMode {
        self.mode
    }

    pub fn brush_value(&self) -> f64 {
        self.brush_value
    }

    pub fn brush_size(&self) -> u32 {
        self.brush_size
    }

    pub fn hover_cell(&self) -> Option<Cell> {
        self.hover
    }

    pub fn is_painting(&self) -> bool {
        self.painting
    }

    /// Updates the brush. Non-finite values and sizes are ignored; sizes
    /// are rounded and kept at 1 or more.
    pub fn set_paint_options(&mut self, mode: Option<PaintMode>, value: Option<f64>, size: Option<f64>) {
        if let Some(mode) = mode {
            self.mode = mode;
        }
        if let Some(value) = value.filter(|v| v.is_finite()) {
            self.brush_value = value;
        }
        if let Some(size) = size.filter(|s| s.is_finite()) {
            self.brush_size = size.round().clamp(1.0, MAX_BRUSH_SIZE as f64) as u32;
        }
    }

    /// Records the backing-store size in physical pixels; true when it changed.
    pub fn resize(&mut self, size: Vec2, pixels_per_point: f32) -> bool {
        let backing = [
            (size.x * pixels_per_point).floor().max(0.0) as u32,
            (size.y * pixels_per_point).floor().max(0.0) as u32,
        ];
        if backing == self.backing {
            return false;
        }
        log::debug!("heatmap resized to {}x{} px", backing[0], backing[1]);
        self.backing = backing;
        true
    }

    pub fn backing_size(&self) -> [u32; 2] {
        self.backing
    }

    fn paint_at(&mut self, model: &MeshModel, cell: Option<Cell>) -> Option<HeatmapEvent> {
        let cell = cell?;
        let cells = brush_footprint(cell, self.brush_size, model.rows(), model.cols());
        if !self.seen.insert(cells.clone()) {
            return None;
        }
        Some(HeatmapEvent::Paint { cells, mode: self.mode, value: self.brush_value })
    }

    fn hover_info(model: &MeshModel, cell: Cell) -> HoverInfo {
        HoverInfo {
            cell,
            value: model.value(cell.row, cell.col),
            preview: model.preview_value(cell.row, cell.col).map(|c| c.value),
        }
    }

    /// Starts a stroke and paints under the pointer.
    pub fn pointer_down(&mut self, model: &MeshModel, cell: Option<Cell>) -> Vec<HeatmapEvent> {
        if !model.has_data() {
            return Vec::new();
        }
        self.painting = true;
        self.seen.clear();
        self.paint_at(model, cell).into_iter().collect()
    }

    /// Reports the hovered cell, and paints while a stroke is active.
    pub fn pointer_move(&mut self, model: &MeshModel, cell: Option<Cell>) -> Vec<HeatmapEvent> {
        if !model.has_data() {
            return Vec::new();
        }
        self.hover = cell;
        let mut events = vec![HeatmapEvent::Hover(cell.map(|c| Self::hover_info(model, c)))];
        if self.painting {
            events.extend(self.paint_at(model, cell));
        }
        events
    }

    pub fn pointer_up(&mut self) {
        if self.painting {
            self.painting = false;
            self.seen.clear();
        }
    }

    pub fn pointer_leave(&mut self) -> HeatmapEvent {
        self.hover = None;
        HeatmapEvent::Hover(None)
    }

    pub fn click(&self, model: &MeshModel, cell: Option<Cell>) -> Option<HeatmapEvent> {
        if !model.has_data() {
            return None;
        }
        cell.map(HeatmapEvent::CellClick)
    }

    /// Draws the grid into the remaining space and returns this frame's events.
    pub fn show(&mut self, ui: &mut egui::Ui, model: &MeshModel, scale: &ColorScale) -> Vec<HeatmapEvent> {
        let (rect, response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
        self.resize(rect.size(), ui.ctx().pixels_per_point());
        let layout = CellLayout { rect, rows: model.rows(), cols: model.cols() };

        let mut events = Vec::new();
        let pointer = ui.input(|i| i.pointer.hover_pos());
        let cell = pointer.and_then(|p| layout.cell_at(p));

        if response.is_pointer_button_down_on() && !self.painting {
            let at = response.interact_pointer_pos().and_then(|p| layout.cell_at(p));
            events.extend(self.pointer_down(model, at));
        }
        if response.hovered() || self.painting {
            if ui.input(|i| i.pointer.is_moving()) || self.hover != cell {
                events.extend(self.pointer_move(model, cell));
            }
        } else if self.hover.is_some() {
            events.push(self.pointer_leave());
        }
        if self.painting && !ui.input(|i| i.pointer.primary_down()) {
            self.pointer_up();
        }
        if response.clicked() {
            let at = response.interact_pointer_pos().and_then(|p| layout.cell_at(p));
            events.extend(self.click(model, at));
        }

        self.paint(ui.painter_at(rect), &layout, model, scale);
        events
    }

    fn paint(&self, painter: egui::Painter, layout: &CellLayout, model: &MeshModel, scale: &ColorScale) {
        painter.rect_filled(layout.rect, 0.0, BACKGROUND);
        if !model.has_data() {
            painter.text(
                layout.rect.center(),
                egui::Align2::CENTER_CENTER,
                "No mesh loaded",
                egui::FontId::proportional(14.0),
                Color32::GRAY,
            );
            return;
        }

        let (min, max) = model.compute_stats().display_range();
        let size = layout.cell_size();
        for row in 0..model.rows() {
            for col in 0..model.cols() {
                let cell = Cell { row, col };
                let r = layout.cell_rect(cell);
                let preview = model.preview_value(row, col).map(|c| c.value);
                let fill = cell_fill(scale, model.value(row, col), preview, min, max);
                // overdraw by a pixel to hide seams
                painter.rect_filled(Rect::from_min_size(r.min, r.size() + Vec2::splat(1.0)), 0.0, fill);

                let state = model.state(row, col).unwrap_or_default();
                match overlay_for(state, preview.is_some(), self.show_imputed) {
                    Overlay::None => {}
                    Overlay::Missing => {
                        let inner = r.shrink(6.0);
                        let stroke = Stroke::new(2.0, rgba(MISSING_MARK));
                        if inner.is_positive() {
                            painter.line_segment([inner.left_top(), inner.right_bottom()], stroke);
                            painter.line_segment([inner.right_top(), inner.left_bottom()], stroke);
                        }
                    }
                    Overlay::Imputed { previewed } => {
                        let color = if previewed { PREVIEW_TEAL } else { IMPUTED_MARK };
                        painter.rect_stroke(r.shrink(4.0), 0.0, Stroke::new(2.0, rgba(color)));
                    }
                    Overlay::Preview => {
                        let b = r.shrink(3.0);
                        let outline = [b.left_top(), b.right_top(), b.right_bottom(), b.left_bottom(), b.left_top()];
                        painter.extend(egui::Shape::dashed_line(&outline, Stroke::new(2.0, rgba(PREVIEW_MARK)), 6.0, 4.0));
                    }
                }
            }
        }

        if self.show_grid {
            let stroke = Stroke::new(1.0, rgba(GRID_LINE));
            let rect = layout.rect;
            for col in 0..=model.cols() {
                let x = rect.min.x + col as f32 * size.x;
                painter.line_segment([Pos2::new(x, rect.min.y), Pos2::new(x, rect.max.y)], stroke);
            }
            for row in 0..=model.rows() {
                let y = rect.min.y + row as f32 * size.y;
                painter.line_segment([Pos2::new(rect.min.x, y), Pos2::new(rect.max.x, y)], stroke);
            }
        }

        if let Some(hover) = self.hover.filter(|c| model.contains(c.row, c.col)) {
            painter.rect_stroke(layout.cell_rect(hover).shrink(1.0), 0.0, Stroke::new(2.0, rgba(HOVER_MARK)));
        }
    }
}
