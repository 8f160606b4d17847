use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context as _;
use eframe::egui;
use rfd::AsyncFileDialog;

use crate::color_scale::{self, ColorScale};
use crate::heatmap::{Cell, HeatmapEvent, HeatmapView, HoverInfo, MAX_BRUSH_SIZE, PaintMode};
use crate::model::{Correction, MeshModel, UpdateOptions};
use crate::parsers::{self, ParseOptions, ParsedMesh};
use crate::prefs::Preferences;
use crate::renderer::geometry::SmoothingKernel;
use crate::renderer::{self, MeshRenderer, RendererPalette};
use crate::stats::format_stat;

/// A file picked on a helper thread (native) or future (web).
type PickedFile = (String, Vec<u8>);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Clone, Debug)]
struct Status {
    text: String,
    level: Level,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExportFormat {
    Json,
    Csv,
}

pub struct MeshViewerApp {
    model: MeshModel,
    heatmap: HeatmapView,
    renderer: MeshRenderer,
    palette_index: usize,
    show_stats: bool,
    auto_save: bool,
    prefs_dirty: bool,
    pending_corrections: Option<Vec<Correction>>,
    picked_file: Arc<Mutex<Option<PickedFile>>>,
    paste_text: String,
    report_text: String,
    report_transpose: bool,
    hover: Option<HoverInfo>,
    status: Option<Status>,
}

fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn level_color(level: Level) -> egui::Color32 {
    match level {
        Level::Info => egui::Color32::from_rgb(96, 165, 250),
        Level::Success => egui::Color32::from_rgb(74, 222, 128),
        Level::Warning => egui::Color32::from_rgb(251, 191, 36),
        Level::Error => egui::Color32::from_rgb(248, 113, 113),
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl MeshViewerApp {
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        let prefs = Preferences::load(cc.storage);
        let mut app = Self::with_preferences(&prefs);
        if cc.gl.is_none() {
            log::warn!("eframe started without a glow context");
        }
        app.status = Some(Status { text: "Import a mesh to begin (Ctrl+O)".into(), level: Level::Info });
        app
    }

    fn with_preferences(prefs: &Preferences) -> Self {
        let palettes = ColorScale::predefined();
        let palette_index = palettes.iter().position(|p| p.name() == prefs.palette).unwrap_or(0);
        let model = MeshModel::new();

        let mut heatmap = HeatmapView::new();
        heatmap.show_grid = prefs.grid;
        heatmap.show_imputed = prefs.show_imputed;
        heatmap.set_paint_options(Some(prefs.paint_mode), Some(prefs.brush_value), Some(prefs.brush_size as f64));

        let mut renderer = MeshRenderer::new(palettes[palette_index].clone());
        renderer.set_z_scale(prefs.z_scale, &model);
        renderer.set_smoothing(prefs.smoothing, &model);
        renderer.set_smoothing_kernel(prefs.smoothing_kernel, &model);
        renderer.set_renderer_palette(RendererPalette::from_name(&prefs.renderer_palette), &model);

        Self {
            model,
            heatmap,
            renderer,
            palette_index,
            show_stats: prefs.show_stats,
            auto_save: prefs.auto_save,
            prefs_dirty: false,
            pending_corrections: None,
            picked_file: Arc::new(Mutex::new(None)),
            paste_text: String::new(),
            report_text: String::new(),
            report_transpose: false,
            hover: None,
            status: None,
        }
    }

    fn palette(&self) -> &'static ColorScale {
        &ColorScale::predefined()[self.palette_index]
    }

    fn preferences(&self) -> Preferences {
        Preferences {
            palette: self.palette().name().to_owned(),
            grid: self.heatmap.show_grid,
            show_stats: self.show_stats,
            show_imputed: self.heatmap.show_imputed,
            brush_value: self.heatmap.brush_value(),
            brush_size: self.heatmap.brush_size(),
            paint_mode: self.heatmap.mode(),
            z_scale: self.renderer.z_scale(),
            smoothing: self.renderer.smoothing(),
            smoothing_kernel: self.renderer.smoothing_kernel(),
            renderer_palette: self.renderer.palette().name().to_owned(),
            auto_save: self.auto_save,
        }
    }

    fn notify(&mut self, level: Level, text: impl Into<String>) {
        let text = text.into();
        match level {
            Level::Error => log::error!("{text}"),
            Level::Warning => log::warn!("{text}"),
            _ => log::info!("{text}"),
        }
        self.status = Some(Status { text, level });
    }

    // ── import ──────────────────────────────────────────────────────────

    fn load(&mut self, parsed: ParsedMesh) -> anyhow::Result<()> {
        self.model.load_parsed(parsed)?;
        self.pending_corrections = None;
        self.hover = None;
        self.renderer.update_buffers(&self.model);
        let stats = self.model.compute_stats();
        self.notify(
            Level::Success,
            format!("Loaded {}×{} mesh ({} missing)", self.model.rows(), self.model.cols(), stats.missing),
        );
        Ok(())
    }

    fn import_text(&mut self, text: &str, source: Option<&str>) -> anyhow::Result<()> {
        let options = ParseOptions { source: source.map(str::to_owned), ..Default::default() };
        let parsed = parsers::parse(text, &options)?;
        self.load(parsed)
    }

    fn import_report(&mut self) -> anyhow::Result<()> {
        let options = ParseOptions { transpose: self.report_transpose, ..Default::default() };
        let parsed = parsers::parse_pronterface(&self.report_text, &options)?;
        self.load(parsed)?;
        self.report_text.clear();
        Ok(())
    }

    fn import_file(&mut self, name: &str, bytes: Vec<u8>) -> anyhow::Result<()> {
        let text = String::from_utf8(bytes).with_context(|| format!("{name} is not UTF-8 text"))?;
        self.import_text(&text, Some(name)).with_context(|| format!("could not import {name}"))
    }

    fn report<T>(&mut self, result: anyhow::Result<T>) {
        if let Err(e) = result {
            self.notify(Level::Error, format!("{e:#}"));
        }
    }

    fn poll_picked_file(&mut self) {
        let picked = lock(&self.picked_file).take();
        if let Some((name, bytes)) = picked {
            log::info!("picked {name} ({} bytes)", bytes.len());
            let result = self.import_file(&name, bytes);
            self.report(result);
        }
    }

    fn handle_paste(&mut self, ctx: &egui::Context) {
        if ctx.memory(|m| m.focused().is_some()) {
            return;
        }
        let pasted: Vec<String> = ctx.input(|i| {
            i.events
                .iter()
                .filter_map(|e| match e {
                    egui::Event::Paste(text) => Some(text.clone()),
                    _ => None,
                })
                .collect()
        });
        for text in pasted.iter().filter(|t| parsers::looks_like_mesh(t)) {
            let result = self.import_text(text, Some("clipboard"));
            self.report(result);
        }
    }

    // ── editing ─────────────────────────────────────────────────────────

    fn after_edit(&mut self) {
        self.renderer.update_buffers(&self.model);
    }

    fn apply_paint(&mut self, cells: &[Cell], mode: PaintMode, value: f64) {
        if !self.model.has_data() || (mode == PaintMode::Paint && !value.is_finite()) {
            return;
        }
        let erase = mode == PaintMode::Erase;
        let updates: Vec<Correction> = cells
            .iter()
            .map(|c| Correction { row: c.row, col: c.col, value: if erase { f64::NAN } else { value } })
            .collect();
        let options = UpdateOptions { imputed: !erase, mark_missing: erase, skip_history: false };
        match self.model.bulk_update(&updates, options) {
            Ok(()) => {
                self.pending_corrections = None;
                self.after_edit();
            }
            Err(e) => self.notify(Level::Error, e.to_string()),
        }
    }

    fn pick_value(&mut self, cell: Cell) {
        let value = self.model.value(cell.row, cell.col);
        if value.is_finite() {
            self.heatmap.set_paint_options(None, Some(value), None);
            self.prefs_dirty = true;
        }
    }

    fn handle_heatmap_events(&mut self, events: Vec<HeatmapEvent>) {
        for event in events {
            match event {
                HeatmapEvent::Paint { cells, mode, value } => self.apply_paint(&cells, mode, value),
                HeatmapEvent::Hover(info) => self.hover = info,
                HeatmapEvent::CellClick(cell) => self.pick_value(cell),
            }
        }
    }

    fn fill_missing(&mut self) {
        let value = self.heatmap.brush_value();
        match self.model.fill_missing(value) {
            Ok(0) => self.notify(Level::Info, "No missing cells to fill"),
            Ok(n) => {
                self.pending_corrections = None;
                self.after_edit();
                self.notify(Level::Info, format!("Filled {n} missing cells with {value:.3}"));
            }
            Err(e) => self.notify(Level::Error, e.to_string()),
        }
    }

    fn preview_corrections(&mut self) {
        let corrections = self.model.build_median_correction(false);
        if corrections.is_empty() {
            self.notify(Level::Info, "No correction needed: no missing cell has a valid neighbor");
            return;
        }
        let count = corrections.len();
        self.model.set_preview(corrections.clone());
        self.pending_corrections = Some(corrections);
        self.notify(Level::Info, format!("{count} corrections proposed, shown in teal"));
    }

    fn apply_corrections(&mut self) {
        let Some(corrections) = self.pending_corrections.take() else {
            return;
        };
        match self.model.apply_corrections(&corrections) {
            Ok(()) => {
                self.after_edit();
                self.notify(Level::Success, format!("Applied {} corrections", corrections.len()));
            }
            Err(e) => self.notify(Level::Error, e.to_string()),
        }
    }

    fn cancel_corrections(&mut self) {
        if self.pending_corrections.take().is_some() {
            self.model.clear_preview();
            self.notify(Level::Info, "Preview discarded");
        }
    }

    fn undo(&mut self) {
        if self.model.undo() {
            self.pending_corrections = None;
            self.after_edit();
        }
    }

    fn redo(&mut self) {
        if self.model.redo() {
            self.pending_corrections = None;
            self.after_edit();
        }
    }

    fn set_palette(&mut self, index: usize) {
        if index >= ColorScale::predefined().len() {
            return;
        }
        self.palette_index = index;
        self.renderer.set_color_scale(self.palette().clone(), &self.model);
        self.prefs_dirty = true;
    }

    // ── export ──────────────────────────────────────────────────────────

    fn export(&mut self, format: ExportFormat) -> anyhow::Result<()> {
        if !self.model.has_data() {
            self.notify(Level::Warning, "No mesh to export");
            return Ok(());
        }
        let stamp = chrono::Utc::now().timestamp_millis();
        let (name, mime, contents) = match format {
            ExportFormat::Json => {
                let json = serde_json::to_string_pretty(&self.model.to_export_payload())
                    .context("serializing mesh")?;
                (format!("mesh-{stamp}.json"), "application/json", json)
            }
            ExportFormat::Csv => (format!("mesh-{stamp}.csv"), "text/csv", self.model.to_csv()),
        };
        save_file(name.clone(), mime, contents)?;
        self.notify(Level::Success, format!("Exported {name}"));
        Ok(())
    }

    // ── shortcuts ───────────────────────────────────────────────────────

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        use egui::{Key, KeyboardShortcut, Modifiers};
        let open = KeyboardShortcut::new(Modifiers::COMMAND, Key::O);
        let redo_shift = KeyboardShortcut::new(Modifiers::COMMAND | Modifiers::SHIFT, Key::Z);
        let redo_y = KeyboardShortcut::new(Modifiers::COMMAND, Key::Y);
        let undo = KeyboardShortcut::new(Modifiers::COMMAND, Key::Z);

        let (open, redo, undo) = ctx.input_mut(|i| {
            let open = i.consume_shortcut(&open);
            // the shifted chord has to be taken before plain Cmd+Z
            let redo = i.consume_shortcut(&redo_shift) || i.consume_shortcut(&redo_y);
            let undo = i.consume_shortcut(&undo);
            (open, redo, undo)
        });
        if open {
            spawn_file_picker(Arc::clone(&self.picked_file));
        }
        if redo {
            self.redo();
        }
        if undo {
            self.undo();
        }
    }

    // ── panels ──────────────────────────────────────────────────────────

    fn import_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Import");
        if ui.button("Open file… (Ctrl+O)").clicked() {
            spawn_file_picker(Arc::clone(&self.picked_file));
        }
        ui.collapsing("Paste mesh data", |ui| {
            ui.add(
                egui::TextEdit::multiline(&mut self.paste_text)
                    .hint_text("JSON, CSV or whitespace separated rows")
                    .desired_rows(4)
                    .code_editor(),
            );
            if ui.add_enabled(!self.paste_text.trim().is_empty(), egui::Button::new("Import")).clicked() {
                let text = std::mem::take(&mut self.paste_text);
                let result = self.import_text(&text, Some("paste"));
                if result.is_err() {
                    self.paste_text = text;
                }
                self.report(result);
            }
        });
        ui.collapsing("Firmware report", |ui| {
            ui.add(
                egui::TextEdit::multiline(&mut self.report_text)
                    .hint_text("Bed mesh report (G29 / G81 output)")
                    .desired_rows(4)
                    .code_editor(),
            );
            ui.checkbox(&mut self.report_transpose, "Transpose");
            if ui.button("Parse report").clicked() {
                if self.report_text.trim().is_empty() {
                    self.notify(Level::Warning, "Paste a bed mesh report first");
                } else {
                    let result = self.import_report();
                    self.report(result);
                }
            }
        });
    }

    fn palette_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Palette");
        let mut chosen = None;
        for (index, palette) in ColorScale::predefined().iter().enumerate() {
            ui.horizontal(|ui| {
                let (rect, swatch) = ui.allocate_exact_size(egui::vec2(64.0, 14.0), egui::Sense::click());
                let stops = palette.preview_stops(8);
                let width = rect.width() / stops.len() as f32;
                for (i, hex) in stops.iter().enumerate() {
                    let color = color_scale::hex_to_rgb(hex).map(color_scale::to_color32).unwrap_or_default();
                    let min = rect.min + egui::vec2(i as f32 * width, 0.0);
                    ui.painter().rect_filled(egui::Rect::from_min_size(min, egui::vec2(width + 0.5, rect.height())), 0.0, color);
                }
                let label = ui.selectable_label(index == self.palette_index, capitalize(palette.name()));
                if swatch.clicked() || label.clicked() {
                    chosen = Some(index);
                }
            });
        }
        if let Some(index) = chosen.filter(|i| *i != self.palette_index) {
            self.set_palette(index);
        }
    }

    fn paint_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Brush");
        let mut mode = self.heatmap.mode();
        let mut value = self.heatmap.brush_value();
        let mut size = self.heatmap.brush_size();
        let mut changed = false;
        ui.horizontal(|ui| {
            changed |= ui.radio_value(&mut mode, PaintMode::Paint, "Paint").changed();
            changed |= ui.radio_value(&mut mode, PaintMode::Erase, "Erase").changed();
        });
        ui.horizontal(|ui| {
            ui.label("Value:");
            changed |= ui.add(egui::DragValue::new(&mut value).speed(0.005).fixed_decimals(3)).changed();
        });
        ui.horizontal(|ui| {
            ui.label("Size:");
            changed |= ui.add(egui::DragValue::new(&mut size).range(1..=MAX_BRUSH_SIZE)).changed();
        });
        if changed {
            self.heatmap.set_paint_options(Some(mode), Some(value), Some(size as f64));
            self.prefs_dirty = true;
        }

        let has_data = self.model.has_data();
        ui.horizontal_wrapped(|ui| {
            if ui.add_enabled(has_data, egui::Button::new("Fill missing")).clicked() {
                self.fill_missing();
            }
            let hovered = self.heatmap.hover_cell();
            if ui.add_enabled(hovered.is_some(), egui::Button::new("Pick hovered")).clicked() {
                if let Some(cell) = hovered {
                    self.pick_value(cell);
                }
            }
        });
    }

    fn correction_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Correction");
        let has_data = self.model.has_data();
        let pending = self.pending_corrections.is_some();
        ui.horizontal_wrapped(|ui| {
            if ui.add_enabled(has_data, egui::Button::new("Preview median")).clicked() {
                self.preview_corrections();
            }
            if ui.add_enabled(pending, egui::Button::new("Apply")).clicked() {
                self.apply_corrections();
            }
            if ui.add_enabled(pending, egui::Button::new("Cancel")).clicked() {
                self.cancel_corrections();
            }
        });
        ui.horizontal(|ui| {
            if ui.add_enabled(self.model.can_undo(), egui::Button::new("Undo")).clicked() {
                self.undo();
            }
            if ui.add_enabled(self.model.can_redo(), egui::Button::new("Redo")).clicked() {
                self.redo();
            }
        });
    }

    fn view_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("View");
        let before = (self.heatmap.show_grid, self.heatmap.show_imputed, self.show_stats);
        ui.checkbox(&mut self.heatmap.show_grid, "Grid");
        ui.checkbox(&mut self.heatmap.show_imputed, "Missing / imputed markers");
        ui.checkbox(&mut self.show_stats, "Statistics");
        if before != (self.heatmap.show_grid, self.heatmap.show_imputed, self.show_stats) {
            self.prefs_dirty = true;
        }
    }

    fn surface_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("3D surface");
        if !self.renderer.is_supported() {
            ui.colored_label(level_color(Level::Warning), "3D rendering is unavailable");
            return;
        }

        let mut z_scale = self.renderer.z_scale();
        let z = egui::Slider::new(&mut z_scale, renderer::MIN_Z_SCALE..=renderer::MAX_Z_SCALE)
            .text("Z scale")
            .custom_formatter(|v, _| format!("{v:.1}x"));
        if ui.add(z).changed() {
            self.renderer.set_z_scale(z_scale, &self.model);
            self.prefs_dirty = true;
        }

        let mut smoothing = self.renderer.smoothing();
        if ui.add(egui::Slider::new(&mut smoothing, 0..=renderer::MAX_SMOOTHING).text("Smoothing")).changed() {
            self.renderer.set_smoothing(smoothing, &self.model);
            self.prefs_dirty = true;
        }

        let mut kernel = self.renderer.smoothing_kernel();
        egui::ComboBox::from_label("Kernel")
            .selected_text(kernel.label())
            .show_ui(ui, |ui| {
                for option in SmoothingKernel::ALL {
                    ui.selectable_value(&mut kernel, option, option.label());
                }
            });
        if kernel != self.renderer.smoothing_kernel() {
            self.renderer.set_smoothing_kernel(kernel, &self.model);
            self.prefs_dirty = true;
        }

        let mut palette = self.renderer.palette().clone();
        egui::ComboBox::from_label("Surface palette")
            .selected_text(capitalize(palette.name()))
            .show_ui(ui, |ui| {
                ui.selectable_value(&mut palette, RendererPalette::Sync, "Sync with heatmap");
                for scale in ColorScale::renderer_palettes() {
                    let option = RendererPalette::Named(scale.name().to_owned());
                    ui.selectable_value(&mut palette, option, capitalize(scale.name()));
                }
            });
        if &palette != self.renderer.palette() {
            self.renderer.set_renderer_palette(palette, &self.model);
            self.prefs_dirty = true;
        }

        ui.horizontal(|ui| {
            if ui.button("Reset").clicked() {
                self.renderer.reset_camera();
            }
            if ui.button("Top").clicked() {
                self.renderer.top_camera();
            }
            if ui.button("Iso").clicked() {
                self.renderer.iso_camera();
            }
        });
    }

    fn export_section(&mut self, ui: &mut egui::Ui, frame: &mut eframe::Frame) {
        ui.heading("Export");
        let has_data = self.model.has_data();
        ui.horizontal(|ui| {
            if ui.add_enabled(has_data, egui::Button::new("JSON")).clicked() {
                let result = self.export(ExportFormat::Json);
                self.report(result);
            }
            if ui.add_enabled(has_data, egui::Button::new("CSV")).clicked() {
                let result = self.export(ExportFormat::Csv);
                self.report(result);
            }
        });

        ui.separator();
        if ui.checkbox(&mut self.auto_save, "Remember settings").changed() {
            // the switch itself is always persisted
            if let Some(storage) = frame.storage_mut() {
                self.preferences().save(storage);
            }
        }
        if ui.button("Reset preferences").clicked() {
            if let Some(storage) = frame.storage_mut() {
                Preferences::clear(storage);
            }
            self.auto_save = true;
            self.notify(Level::Success, "Preferences reset");
        }
    }

    fn stats_panel(&self, ui: &mut egui::Ui) {
        let stats = self.model.compute_stats();
        egui::Grid::new("mesh_stats").num_columns(2).spacing([12.0, 2.0]).show(ui, |ui| {
            ui.label("Size");
            ui.label(format!("{} × {}", self.model.rows(), self.model.cols()));
            ui.end_row();
            ui.label("Source");
            ui.label(self.model.source().unwrap_or("unknown"));
            ui.end_row();
            for (name, value) in [
                ("Min", stats.min),
                ("Max", stats.max),
                ("Mean", stats.mean),
                ("Median", stats.median),
                ("Std dev", stats.std),
            ] {
                ui.label(name);
                ui.monospace(format_stat(value, 3));
                ui.end_row();
            }
            ui.label("Imputed / missing");
            ui.label(format!("{} / {}", stats.imputed, stats.missing));
            ui.end_row();
        });
    }

    fn footer(&self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            if let Some(status) = &self.status {
                ui.colored_label(level_color(status.level), &status.text);
                ui.separator();
            }
            if let Some(hover) = &self.hover {
                let value = hover.display_value();
                let shown = if value.is_finite() { format!("{value:.3}") } else { "NaN".to_owned() };
                let preview = if hover.preview.is_some() { " (preview)" } else { "" };
                ui.label(format!("Cell [{}, {}] • Value: {shown}{preview}", hover.cell.row + 1, hover.cell.col + 1));
            } else if self.model.has_data() {
                let stats = self.model.compute_stats();
                ui.label(format!(
                    "Dimensions: {}×{} • Min: {} • Max: {} • Palette: {} • Z scale: {:.1}x",
                    self.model.rows(),
                    self.model.cols(),
                    format_stat(stats.min, 3),
                    format_stat(stats.max, 3),
                    self.palette().name(),
                    self.renderer.z_scale(),
                ));
            }
            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                if self.renderer.is_supported() {
                    let camera = self.renderer.camera_info();
                    let stats = self.renderer.stats();
                    ui.label(format!(
                        "Distance: {:.2} • Azimuth: {:.1}° • Elevation: {:.1}° • {} vertices / {} triangles",
                        camera.distance,
                        camera.azimuth.to_degrees(),
                        camera.elevation.to_degrees(),
                        stats.vertices,
                        stats.triangles,
                    ));
                }
            });
        });
    }
}

impl eframe::App for MeshViewerApp {
    fn update(&mut self, ctx: &egui::Context, frame: &mut eframe::Frame) {
        self.poll_picked_file();
        self.handle_shortcuts(ctx);
        self.handle_paste(ctx);

        // ── controls ────────────────────────────────────────────────────
        egui::SidePanel::left("controls")
            .resizable(true)
            .default_width(250.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    self.import_section(ui);
                    ui.separator();
                    self.palette_section(ui);
                    ui.separator();
                    self.paint_section(ui);
                    ui.separator();
                    self.correction_section(ui);
                    ui.separator();
                    self.view_section(ui);
                    ui.separator();
                    self.surface_section(ui);
                    ui.separator();
                    self.export_section(ui, frame);
                    if self.show_stats && self.model.has_data() {
                        ui.separator();
                        ui.heading("Statistics");
                        self.stats_panel(ui);
                    }
                });
            });

        egui::TopBottomPanel::bottom("footer").show(ctx, |ui| self.footer(ui));

        // ── views ───────────────────────────────────────────────────────
        let gl = frame.gl().cloned();
        egui::CentralPanel::default().show(ctx, |ui| {
            let scale = self.palette();
            let heatmap = &mut self.heatmap;
            let surface = &mut self.renderer;
            let model = &self.model;
            let mut events = Vec::new();
            ui.columns(2, |columns| {
                events = heatmap.show(&mut columns[0], model, scale);
                surface.show(&mut columns[1], gl.as_ref());
            });
            self.handle_heatmap_events(events);
        });

        if self.prefs_dirty && self.auto_save {
            if let Some(storage) = frame.storage_mut() {
                self.preferences().save(storage);
            }
        }
        self.prefs_dirty = false;
    }

    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        if self.auto_save {
            self.preferences().save(storage);
        }
    }

    fn on_exit(&mut self, gl: Option<&glow::Context>) {
        if let Some(gl) = gl {
            self.renderer.destroy(gl);
        }
    }
}

fn spawn_file_picker(target: Arc<Mutex<Option<PickedFile>>>) {
    crate::execute(async move {
        if let Some(handle) = AsyncFileDialog::new()
            .add_filter("Mesh data (json, csv, txt)", &["json", "csv", "txt", "log"])
            .pick_file()
            .await
        {
            let bytes = handle.read().await;
            *lock(&target) = Some((handle.file_name(), bytes));
        }
    });
}

#[cfg(not(target_arch = "wasm32"))]
fn save_file(name: String, _mime: &str, contents: String) -> anyhow::Result<()> {
    crate::execute(async move {
        let Some(handle) = AsyncFileDialog::new().set_file_name(&name).save_file().await else {
            return;
        };
        match std::fs::write(handle.path(), contents) {
            Ok(()) => log::info!("wrote {}", handle.path().display()),
            Err(e) => log::error!("could not write {}: {e}", handle.path().display()),
        }
    });
    Ok(())
}

#[cfg(target_arch = "wasm32")]
fn save_file(name: String, mime: &str, contents: String) -> anyhow::Result<()> {
    use wasm_bindgen::{JsCast as _, JsValue};

    let js = |e: JsValue| anyhow::anyhow!("{e:?}");
    let window = web_sys::window().context("no window")?;
    let document = window.document().context("no document")?;
    let body = document.body().context("no document body")?;

    let options = web_sys::BlobPropertyBag::new();
    options.set_type(mime);
    let parts = js_sys::Array::of1(&JsValue::from_str(&contents));
    let blob = web_sys::Blob::new_with_str_sequence_and_options(&parts, &options).map_err(js)?;
    let url = web_sys::Url::create_object_url_with_blob(&blob).map_err(js)?;

    let link: web_sys::HtmlAnchorElement = document.create_element("a").map_err(js)?.dyn_into().map_err(|_| anyhow::anyhow!("not an anchor"))?;
    link.set_href(&url);
    link.set_download(&name);
    body.append_child(&link).map_err(js)?;
    link.click();
    body.remove_child(&link).map_err(js)?;
    web_sys::Url::revoke_object_url(&url).map_err(js)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> MeshViewerApp {
        MeshViewerApp::with_preferences(&Preferences::default())
    }

    #[test]
    fn preferences_round_trip_through_app_state() {
        let prefs = Preferences {
            palette: "ember".into(),
            grid: false,
            brush_size: 3,
            z_scale: 2.5,
            renderer_palette: "forest".into(),
            ..Preferences::default()
        };
        let app = MeshViewerApp::with_preferences(&prefs);
        assert_eq!(app.preferences(), prefs);
    }

    #[test]
    fn unknown_palette_falls_back_to_first() {
        let prefs = Preferences { palette: "nope".into(), ..Preferences::default() };
        let app = MeshViewerApp::with_preferences(&prefs);
        assert_eq!(app.palette().name(), "viridis");
    }

    #[test]
    fn paint_and_erase_go_through_the_model() {
        let mut app = app();
        app.import_text("1 2\n3 4", None).unwrap();
        let cells = [Cell { row: 0, col: 1 }];
        app.apply_paint(&cells, PaintMode::Paint, 9.0);
        assert_eq!(app.model.value(0, 1), 9.0);
        app.apply_paint(&cells, PaintMode::Erase, 0.0);
        assert!(app.model.value(0, 1).is_nan());
        app.apply_paint(&cells, PaintMode::Paint, f64::NAN);
        assert!(app.model.value(0, 1).is_nan());
        app.undo();
        assert_eq!(app.model.value(0, 1), 9.0);
    }

    #[test]
    fn correction_workflow() {
        let mut app = app();
        app.import_text("1 2 3\n4 nan 6\n7 8 9", Some("test")).unwrap();
        app.preview_corrections();
        assert!(app.model.preview_value(1, 1).is_some());
        app.cancel_corrections();
        assert!(app.model.preview().is_none());

        app.preview_corrections();
        app.apply_corrections();
        assert_eq!(app.model.value(1, 1), 5.0);
        assert!(app.pending_corrections.is_none());
    }

    #[test]
    fn bad_import_keeps_previous_mesh() {
        let mut app = app();
        app.import_text("1 2\n3 4", None).unwrap();
        assert!(app.import_text("1 2\n3", None).is_err());
        assert_eq!(app.model.rows(), 2);
        assert!(app.import_file("bad.bin", vec![0xff, 0xfe]).is_err());
    }

    #[test]
    fn clicking_a_cell_picks_its_value() {
        let mut app = app();
        app.import_text("1.25 2\n3 nan", None).unwrap();
        app.handle_heatmap_events(vec![HeatmapEvent::CellClick(Cell { row: 0, col: 0 })]);
        assert_eq!(app.heatmap.brush_value(), 1.25);
        app.handle_heatmap_events(vec![HeatmapEvent::CellClick(Cell { row: 1, col: 1 })]);
        assert_eq!(app.heatmap.brush_value(), 1.25);
    }
}
