//! Bed-leveling mesh viewer: import, inspect, correct and export printer
//! bed meshes, with a 2D heatmap next to a shaded 3D surface.

pub mod app;
pub mod color_scale;
pub mod heatmap;
pub mod linalg;
pub mod model;
pub mod parsers;
pub mod prefs;
pub mod renderer;
pub mod stats;

pub use app::MeshViewerApp;

use std::future::Future;

// ── Web entry‑point ──
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub async fn start() -> Result<(), JsValue> {
    // Redirect `log` macros & panic messages to the browser console
    console_log::init_with_level(log::Level::Debug).ok();
    console_error_panic_hook::set_once();

    let canvas = web_sys::window()
        .and_then(|w| w.document())
        .and_then(|d| d.get_element_by_id("bedmesh_canvas"))
        .ok_or_else(|| JsValue::from_str("missing <canvas id=\"bedmesh_canvas\">"))?
        .dyn_into::<web_sys::HtmlCanvasElement>()?;

    let web_options = eframe::WebOptions { depth_buffer: 24, ..Default::default() };

    eframe::WebRunner::new()
        .start(canvas, web_options, Box::new(|cc| Ok(Box::new(MeshViewerApp::new(cc)))))
        .await?;

    Ok(())
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn execute<F: Future<Output = ()> + Send + 'static>(f: F) {
    std::thread::spawn(move || futures::executor::block_on(f));
}
#[cfg(target_arch = "wasm32")]
pub(crate) fn execute<F: Future<Output = ()> + 'static>(f: F) {
    wasm_bindgen_futures::spawn_local(f);
}
