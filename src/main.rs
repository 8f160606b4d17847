// ── Native entry‑point ──
#[cfg(not(target_arch = "wasm32"))]
fn main() -> eframe::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let options = eframe::NativeOptions { depth_buffer: 24, ..Default::default() };
    eframe::run_native(
        "Bed Mesh Viewer",
        options,
        Box::new(|cc| Ok(Box::new(bedmesh_ui::MeshViewerApp::new(cc)))),
    )
}

#[cfg(target_arch = "wasm32")]
fn main() {}
