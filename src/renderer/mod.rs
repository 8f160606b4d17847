//! 3D surface view of the mesh, drawn with a raw glow program inside an
//! egui paint callback.

pub mod camera;
pub mod geometry;
pub mod gpu;

use std::sync::Arc;

use eframe::egui;

use crate::color_scale::ColorScale;
use crate::linalg;
use crate::model::MeshModel;
use camera::OrbitCamera;
use geometry::{SmoothingKernel, SurfaceGeometry};
use gpu::{FrameUniforms, GpuSurface};

pub const MIN_Z_SCALE: f64 = 0.1;
pub const MAX_Z_SCALE: f64 = 10.0;
pub const MAX_SMOOTHING: u32 = 10;

/// Which palette colors the surface.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum RendererPalette {
    /// Follow the heatmap palette.
    #[default]
    Sync,
    Named(String),
}

impl RendererPalette {
    pub fn from_name(name: &str) -> Self {
        if name.is_empty() || name.eq_ignore_ascii_case("sync") {
            RendererPalette::Sync
        } else {
            RendererPalette::Named(name.to_ascii_lowercase())
        }
    }

    pub fn name(&self) -> &str {
        match self {
            RendererPalette::Sync => "sync",
            RendererPalette::Named(name) => name,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub vertices: usize,
    pub triangles: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraInfo {
    pub distance: f32,
    pub azimuth: f32,
    pub elevation: f32,
}

pub struct MeshRenderer {
    camera: OrbitCamera,
    z_scale: f64,
    smoothing: u32,
    kernel: SmoothingKernel,
    color_scale: ColorScale,
    palette: RendererPalette,
    gpu: Option<Arc<GpuSurface>>,
    supported: bool,
    pending: Option<SurfaceGeometry>,
    stats: RenderStats,
    viewport: [u32; 2],
    needs_render: bool,
}

impl MeshRenderer {
    pub fn new(color_scale: ColorScale) -> Self {
        Self {
            camera: OrbitCamera::default(),
            z_scale: 1.0,
            smoothing: 0,
            kernel: SmoothingKernel::default(),
            color_scale,
            palette: RendererPalette::Sync,
            gpu: None,
            supported: true,
            pending: None,
            stats: RenderStats::default(),
            viewport: [0, 0],
            needs_render: true,
        }
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn needs_render(&self) -> bool {
        self.needs_render
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn z_scale(&self) -> f64 {
        self.z_scale
    }

    pub fn smoothing(&self) -> u32 {
        self.smoothing
    }

    pub fn smoothing_kernel(&self) -> SmoothingKernel {
        self.kernel
    }

    pub fn palette(&self) -> &RendererPalette {
        &self.palette
    }

    pub fn camera(&self) -> &OrbitCamera {
        &self.camera
    }

    pub fn camera_info(&self) -> CameraInfo {
        CameraInfo {
            distance: self.camera.distance,
            azimuth: self.camera.azimuth,
            elevation: self.camera.elevation,
        }
    }

    /// The scale the surface is actually colored with.
    pub fn active_palette(&self) -> &ColorScale {
        match &self.palette {
            RendererPalette::Sync => &self.color_scale,
            RendererPalette::Named(name) => ColorScale::renderer_palettes()
                .iter()
                .find(|scale| scale.name() == name)
                .unwrap_or(&self.color_scale),
        }
    }

    pub fn set_z_scale(&mut self, value: f64, model: &MeshModel) {
        if !value.is_finite() {
            return;
        }
        self.z_scale = value.clamp(MIN_Z_SCALE, MAX_Z_SCALE);
        self.update_buffers(model);
    }

    pub fn set_smoothing(&mut self, level: u32, model: &MeshModel) {
        self.smoothing = level.min(MAX_SMOOTHING);
        self.update_buffers(model);
    }

    pub fn set_smoothing_kernel(&mut self, kernel: SmoothingKernel, model: &MeshModel) {
        self.kernel = kernel;
        self.update_buffers(model);
    }

    pub fn set_color_scale(&mut self, scale: ColorScale, model: &MeshModel) {
        self.color_scale = scale;
        self.update_buffers(model);
    }

    pub fn set_renderer_palette(&mut self, palette: RendererPalette, model: &MeshModel) {
        if let RendererPalette::Named(name) = &palette {
            if !ColorScale::renderer_palettes().iter().any(|scale| scale.name() == name) {
                log::warn!("unknown surface palette '{name}', following the heatmap");
            }
        }
        self.palette = palette;
        self.update_buffers(model);
    }

    pub fn reset_camera(&mut self) {
        self.camera.reset();
        self.needs_render = self.supported;
    }

    pub fn top_camera(&mut self) {
        self.camera.top();
        self.needs_render = self.supported;
    }

    pub fn iso_camera(&mut self) {
        self.camera.iso();
        self.needs_render = self.supported;
    }

    /// Rebuilds the surface from `model`; the upload happens on the next
    /// [`Self::show`].
    pub fn update_buffers(&mut self, model: &MeshModel) {
        if !self.supported {
            return;
        }
        let geometry = if model.has_data() {
            let heights = geometry::build_height_field(
                model.values(),
                model.rows(),
                model.cols(),
                self.smoothing,
                self.kernel,
            );
            geometry::build_geometry(model, &heights, self.z_scale, self.active_palette())
        } else {
            SurfaceGeometry::default()
        };
        self.stats = RenderStats { vertices: geometry.vertex_count(), triangles: geometry.triangle_count() };
        log::debug!("surface rebuilt: {} vertices, {} triangles", self.stats.vertices, self.stats.triangles);
        self.pending = Some(geometry);
        self.needs_render = true;
    }

    fn handle_input(&mut self, ui: &egui::Ui, response: &egui::Response) {
        if response.dragged() {
            let delta = response.drag_delta();
            if delta != egui::Vec2::ZERO {
                self.camera.rotate(delta.x, delta.y);
                self.needs_render = true;
            }
        }
        if response.double_clicked() {
            self.reset_camera();
        }
        if response.hovered() {
            let scroll = ui.input(|i| i.raw_scroll_delta.y);
            if scroll != 0.0 {
                // wheel down moves the camera away
                self.camera.zoom(-scroll);
                self.needs_render = true;
            }
        }
    }

    fn measure(&mut self, rect: egui::Rect, pixels_per_point: f32) {
        let size = [
            (rect.width() * pixels_per_point).floor().max(0.0) as u32,
            (rect.height() * pixels_per_point).floor().max(0.0) as u32,
        ];
        if size != self.viewport {
            log::debug!("surface viewport {}x{}", size[0], size[1]);
            self.viewport = size;
            self.needs_render = true;
        }
    }

    fn ensure_gpu(&mut self, gl: &glow::Context) {
        if self.gpu.is_some() || !self.supported {
            return;
        }
        match unsafe { GpuSurface::new(gl) } {
            Ok(surface) => self.gpu = Some(Arc::new(surface)),
            Err(e) => {
                log::error!("3D view disabled: {e}");
                self.supported = false;
                self.pending = None;
            }
        }
    }

    fn upload_pending(&mut self, gl: &glow::Context) {
        let (Some(gpu_arc), Some(geometry)) = (&mut self.gpu, &self.pending) else {
            return;
        };
        // Only while the last frame's callback has released its handle.
        if let Some(gpu) = Arc::get_mut(gpu_arc) {
            unsafe { gpu.upload(gl, geometry) };
            self.pending = None;
        }
    }

    /// Draws the surface into the remaining space of `ui`.
    pub fn show(&mut self, ui: &mut egui::Ui, gl: Option<&Arc<glow::Context>>) -> egui::Response {
        let (rect, response) = ui.allocate_exact_size(ui.available_size(), egui::Sense::click_and_drag());
        self.handle_input(ui, &response);
        self.measure(rect, ui.ctx().pixels_per_point());

        if let Some(gl) = gl {
            self.ensure_gpu(gl);
        } else if self.supported {
            log::warn!("no GL context, 3D view disabled");
            self.supported = false;
        }

        if !self.supported {
            ui.painter().rect_filled(rect, 0.0, egui::Color32::from_rgb(10, 18, 28));
            ui.painter().text(
                rect.center(),
                egui::Align2::CENTER_CENTER,
                "3D view unavailable",
                egui::FontId::proportional(14.0),
                egui::Color32::GRAY,
            );
            return response;
        }

        if let Some(gl) = gl {
            self.upload_pending(gl);
        }

        if let Some(gpu) = &self.gpu {
            let gpu = Arc::clone(gpu);
            let camera = self.camera;
            let callback = egui_glow::CallbackFn::new(move |info, painter| {
                let viewport = info.viewport_in_pixels();
                let aspect = viewport.width_px as f32 / viewport.height_px.max(1) as f32;
                let view = camera.view();
                let model = linalg::identity();
                let uniforms = FrameUniforms {
                    projection: camera.projection(aspect),
                    view,
                    model,
                    normal: linalg::normal_matrix(&linalg::mul(&view, &model)),
                };
                unsafe { gpu.paint(painter.gl(), &uniforms) };
            });
            ui.painter().add(egui::PaintCallback { rect, callback: Arc::new(callback) });
        }

        if self.needs_render {
            // one more frame if the upload had to wait
            self.needs_render = self.pending.is_some();
            ui.ctx().request_repaint();
        }
        response
    }

    pub fn destroy(&mut self, gl: &glow::Context) {
        if let Some(gpu) = self.gpu.take() {
            unsafe { gpu.destroy(gl) };
        }
    }
}
