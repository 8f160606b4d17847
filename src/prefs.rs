//! Viewer preferences persisted as one JSON blob.

use serde::Serialize;
use serde_json::Value;

use crate::heatmap::{MAX_BRUSH_SIZE, PaintMode};
use crate::renderer::geometry::SmoothingKernel;

pub const STORAGE_KEY: &str = "bedmesh.preferences";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    pub palette: String,
    pub grid: bool,
    pub show_stats: bool,
    pub show_imputed: bool,
    pub brush_value: f64,
    pub brush_size: u32,
    pub paint_mode: PaintMode,
    pub z_scale: f64,
    pub smoothing: u32,
    pub smoothing_kernel: SmoothingKernel,
    pub renderer_palette: String,
    pub auto_save: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            palette: "viridis".into(),
            grid: true,
            show_stats: true,
            show_imputed: true,
            brush_value: 0.0,
            brush_size: 1,
            paint_mode: PaintMode::Paint,
            z_scale: 1.0,
            smoothing: 0,
            smoothing_kernel: SmoothingKernel::Gaussian,
            renderer_palette: "sync".into(),
            auto_save: true,
        }
    }
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    parsed.filter(|v: &f64| v.is_finite())
}

fn text(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

impl Preferences {
    /// Reads a stored blob. Every key is taken on its own; missing,
    /// mistyped or out-of-range keys keep their defaults.
    pub fn from_json(raw: &str) -> Self {
        let mut prefs = Self::default();
        if raw.trim().is_empty() {
            return prefs;
        }
        let root = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => map,
            Ok(_) => {
                log::warn!("ignoring preferences: not a JSON object");
                return prefs;
            }
            Err(e) => {
                log::warn!("ignoring unreadable preferences: {e}");
                return prefs;
            }
        };
        let get = |key: &str| root.get(key);

        if let Some(v) = get("palette").and_then(text) {
            prefs.palette = v.to_owned();
        }
        if let Some(v) = get("grid").and_then(Value::as_bool) {
            prefs.grid = v;
        }
        if let Some(v) = get("showStats").and_then(Value::as_bool) {
            prefs.show_stats = v;
        }
        if let Some(v) = get("showImputed").and_then(Value::as_bool) {
            prefs.show_imputed = v;
        }
        if let Some(v) = get("brushValue").and_then(number) {
            prefs.brush_value = v;
        }
        if let Some(v) = get("brushSize").and_then(number).filter(|v| *v >= 1.0) {
            prefs.brush_size = v.round().min(MAX_BRUSH_SIZE as f64) as u32;
        }
        if let Some(v) = get("paintMode").cloned().and_then(|v| serde_json::from_value(v).ok()) {
            prefs.paint_mode = v;
        }
        if let Some(v) = get("zScale").and_then(number).filter(|v| *v > 0.0) {
            prefs.z_scale = v;
        }
        if let Some(v) = get("smoothing").and_then(number).filter(|v| *v >= 0.0) {
            prefs.smoothing = v.round().min(u32::MAX as f64) as u32;
        }
        if let Some(v) = get("smoothingKernel").cloned().and_then(|v| serde_json::from_value(v).ok()) {
            prefs.smoothing_kernel = v;
        }
        if let Some(v) = get("rendererPalette").and_then(text) {
            prefs.renderer_palette = v.to_owned();
        }
        if let Some(v) = get("autoSave").and_then(Value::as_bool) {
            prefs.auto_save = v;
        }
        prefs
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn load(storage: Option<&dyn eframe::Storage>) -> Self {
        storage
            .and_then(|s| s.get_string(STORAGE_KEY))
            .map(|raw| Self::from_json(&raw))
            .unwrap_or_default()
    }

    pub fn save(&self, storage: &mut dyn eframe::Storage) {
        storage.set_string(STORAGE_KEY, self.to_json());
    }

    /// Forgets the stored blob.
    pub fn clear(storage: &mut dyn eframe::Storage) {
        storage.set_string(STORAGE_KEY, String::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_blob_gives_defaults() {
        assert_eq!(Preferences::from_json(""), Preferences::default());
        assert_eq!(Preferences::from_json("not json"), Preferences::default());
        assert_eq!(Preferences::from_json("[1,2]"), Preferences::default());
    }

    #[test]
    fn keys_default_independently() {
        let prefs = Preferences::from_json(
            r#"{"grid": false, "brushSize": "3", "zScale": "oops", "paintMode": "erase", "smoothingKernel": "blur"}"#,
        );
        assert!(!prefs.grid);
        assert_eq!(prefs.brush_size, 3);
        assert_eq!(prefs.z_scale, 1.0);
        assert_eq!(prefs.paint_mode, PaintMode::Erase);
        assert_eq!(prefs.smoothing_kernel, SmoothingKernel::Gaussian);
        assert!(prefs.show_stats);
        assert_eq!(prefs.palette, "viridis");
    }

    #[test]
    fn out_of_range_numbers_are_ignored() {
        let prefs = Preferences::from_json(r#"{"brushSize": 0, "zScale": -2, "smoothing": -1, "brushValue": -0.25}"#);
        assert_eq!(prefs.brush_size, 1);
        assert_eq!(prefs.z_scale, 1.0);
        assert_eq!(prefs.smoothing, 0);
        assert_eq!(prefs.brush_value, -0.25);
    }

    #[test]
    fn brush_size_is_capped() {
        let prefs = Preferences::from_json(r#"{"brushSize": 4294967295}"#);
        assert_eq!(prefs.brush_size, MAX_BRUSH_SIZE);
    }

    #[test]
    fn saved_blob_uses_camel_case_and_reads_back() {
        let prefs = Preferences {
            palette: "ember".into(),
            show_stats: false,
            brush_size: 4,
            paint_mode: PaintMode::Erase,
            smoothing: 2,
            smoothing_kernel: SmoothingKernel::Median,
            renderer_palette: "ice".into(),
            auto_save: false,
            ..Preferences::default()
        };
        let json = prefs.to_json();
        assert!(json.contains(r#""showStats":false"#));
        assert!(json.contains(r#""smoothingKernel":"median""#));
        assert!(json.contains(r#""paintMode":"erase""#));
        assert_eq!(Preferences::from_json(&json), prefs);
    }
}
