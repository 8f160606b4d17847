//! Named color palettes mapping a scalar range onto RGB.
//!
//! A [`ColorScale`] is an ordered list of stops on `[0, 1]`; values are
//! normalized against a `min..max` range and linearly interpolated between
//! the two bracketing stops, one channel at a time.

use once_cell::sync::Lazy;

/// 8-bit RGB triple.
pub type Rgb = [u8; 3];

/// Color returned for non-finite inputs.
pub const NEUTRAL_GRAY: Rgb = [120, 120, 120];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorStop {
    pub position: f64,
    pub color: Rgb,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ColorScale {
    name: String,
    stops: Vec<ColorStop>,
}

const DEFAULT_STOPS: &[(f64, &str)] = &[
    (0.0, "#313695"),
    (0.25, "#4575b4"),
    (0.5, "#74add1"),
    (0.75, "#abd9e9"),
    (1.0, "#e0f3f8"),
];

static PREDEFINED: Lazy<Vec<ColorScale>> = Lazy::new(|| {
    vec![
        ColorScale::from_hex_stops(
            "viridis",
            &[(0.0, "#440154"), (0.25, "#31668d"), (0.5, "#35b779"), (0.75, "#90d743"), (1.0, "#fde725")],
        ),
        ColorScale::from_hex_stops(
            "thermal",
            &[(0.0, "#2c7bb6"), (0.25, "#abd9e9"), (0.5, "#ffffbf"), (0.75, "#fdae61"), (1.0, "#d7191c")],
        ),
        ColorScale::from_hex_stops(
            "blueprint",
            &[(0.0, "#0f172a"), (0.25, "#1d4ed8"), (0.5, "#60a5fa"), (0.75, "#bfdbfe"), (1.0, "#eff6ff")],
        ),
        ColorScale::from_hex_stops(
            "ember",
            &[(0.0, "#1b1b3a"), (0.25, "#6f1d1b"), (0.5, "#d00000"), (0.75, "#f48c06"), (1.0, "#ffba08")],
        ),
        ColorScale::from_hex_stops(
            "seafoam",
            &[(0.0, "#0f766e"), (0.25, "#14b8a6"), (0.5, "#2dd4bf"), (0.75, "#5eead4"), (1.0, "#f0fdfa")],
        ),
    ]
});

// Alternate palettes offered by the 3D view when it is not synced with the heatmap.
static RENDERER_PALETTES: Lazy<Vec<ColorScale>> = Lazy::new(|| {
    vec![
        ColorScale::from_hex_stops(
            "sunset",
            &[(0.0, "#0f172a"), (0.35, "#7f1d1d"), (0.7, "#fb923c"), (1.0, "#fde68a")],
        ),
        ColorScale::from_hex_stops(
            "ice",
            &[(0.0, "#0f172a"), (0.4, "#1e3a8a"), (0.7, "#38bdf8"), (1.0, "#e0f2fe")],
        ),
        ColorScale::from_hex_stops(
            "forest",
            &[(0.0, "#052e16"), (0.4, "#166534"), (0.7, "#4ade80"), (1.0, "#bbf7d0")],
        ),
    ]
});

impl Default for ColorScale {
    fn default() -> Self {
        Self::from_hex_stops("default", DEFAULT_STOPS)
    }
}

impl ColorScale {
    /// Builds a scale from explicit stops. Positions are clamped to `[0, 1]`
    /// and the stops sorted; an empty list yields the default stops.
    pub fn new(name: impl Into<String>, stops: impl IntoIterator<Item = ColorStop>) -> Self {
        let mut stops: Vec<ColorStop> = stops
            .into_iter()
            .map(|stop| ColorStop {
                position: if stop.position.is_nan() { 0.0 } else { stop.position.clamp(0.0, 1.0) },
                color: stop.color,
            })
            .collect();
        if stops.is_empty() {
            return Self { name: name.into(), ..Self::default() };
        }
        stops.sort_by(|a, b| a.position.total_cmp(&b.position));
        Self { name: name.into(), stops }
    }

    /// Builds a scale from `(position, "#rrggbb")` pairs. Unparseable hex
    /// strings become black.
    pub fn from_hex_stops(name: &str, stops: &[(f64, &str)]) -> Self {
        let stops = stops.iter().map(|&(position, hex)| {
            let color = hex_to_rgb(hex).unwrap_or_else(|| {
                log::warn!("palette '{name}': invalid color '{hex}', using black");
                [0, 0, 0]
            });
            ColorStop { position, color }
        });
        Self::new(name, stops)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    pub fn first_color(&self) -> Rgb {
        self.stops[0].color
    }

    pub fn last_color(&self) -> Rgb {
        self.stops[self.stops.len() - 1].color
    }

    /// Maps `value` within `min..=max` to a color.
    ///
    /// * non-finite `value` → [`NEUTRAL_GRAY`]
    /// * `min == max` → last stop (degenerate range)
    pub fn color(&self, value: f64, min: f64, max: f64) -> Rgb {
        if !value.is_finite() {
            return NEUTRAL_GRAY;
        }
        if min == max {
            return self.last_color();
        }

        let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
        for pair in self.stops.windows(2) {
            let (current, next) = (pair[0], pair[1]);
            if t >= current.position && t <= next.position {
                let range = next.position - current.position;
                let range = if range == 0.0 { 1.0 } else { range };
                let local = (t - current.position) / range;
                return [
                    lerp_channel(current.color[0], next.color[0], local),
                    lerp_channel(current.color[1], next.color[1], local),
                    lerp_channel(current.color[2], next.color[2], local),
                ];
            }
        }

        // t outside every bracket: single stop, stops not covering 0/1, or NaN range.
        if t < self.stops[0].position {
            self.first_color()
        } else {
            self.last_color()
        }
    }

    /// `count` evenly spaced colors across the scale, as hex strings.
    pub fn preview_stops(&self, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let t = if count > 1 { i as f64 / (count - 1) as f64 } else { 0.0 };
                rgb_to_hex(self.color(t, 0.0, 1.0))
            })
            .collect()
    }

    /// A copy of this scale with every channel multiplied by `factor`.
    pub fn adjusted(&self, factor: f64) -> Self {
        let stops = self.stops.iter().map(|stop| ColorStop {
            position: stop.position,
            color: stop.color.map(|c| (c as f64 * factor).round().clamp(0.0, 255.0) as u8),
        });
        Self::new(format!("{}-adjusted", self.name), stops)
    }

    /// The heatmap palette registry.
    pub fn predefined() -> &'static [ColorScale] {
        &PREDEFINED
    }

    /// Alternate palettes for the 3D surface.
    pub fn renderer_palettes() -> &'static [ColorScale] {
        &RENDERER_PALETTES
    }

    pub fn by_name(name: &str) -> Option<&'static ColorScale> {
        PREDEFINED
            .iter()
            .chain(RENDERER_PALETTES.iter())
            .find(|scale| scale.name.eq_ignore_ascii_case(name))
    }
}

fn lerp_channel(a: u8, b: u8, t: f64) -> u8 {
    let v = a as f64 + (b as f64 - a as f64) * t;
    v.round().clamp(0.0, 255.0) as u8
}

/// Parses `#rgb` or `#rrggbb` (the `#` is optional).
pub fn hex_to_rgb(hex: &str) -> Option<Rgb> {
    let digits = hex.trim().trim_start_matches('#');
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    match digits.len() {
        3 => {
            let v = u16::from_str_radix(digits, 16).ok()?;
            Some([
                ((v >> 8) & 0xf) as u8 * 17,
                ((v >> 4) & 0xf) as u8 * 17,
                (v & 0xf) as u8 * 17,
            ])
        }
        6 => {
            let v = u32::from_str_radix(digits, 16).ok()?;
            Some([(v >> 16) as u8, (v >> 8) as u8, v as u8])
        }
        _ => None,
    }
}

pub fn rgb_to_hex(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

pub fn to_color32(rgb: Rgb) -> egui::Color32 {
    egui::Color32::from_rgb(rgb[0], rgb[1], rgb[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn black_white() -> ColorScale {
        ColorScale::from_hex_stops("bw", &[(0.0, "#000000"), (1.0, "#ffffff")])
    }

    #[test]
    fn midpoint_of_single_segment_is_mid_gray() {
        assert_eq!(black_white().color(0.5, 0.0, 1.0), [128, 128, 128]);
    }

    #[test]
    fn endpoints_hit_first_and_last_stop_exactly() {
        for scale in ColorScale::predefined() {
            assert_eq!(scale.color(-3.0, -3.0, 7.5), scale.first_color(), "{}", scale.name());
            assert_eq!(scale.color(7.5, -3.0, 7.5), scale.last_color(), "{}", scale.name());
        }
    }

    #[test]
    fn degenerate_range_uses_last_stop() {
        let scale = &ColorScale::predefined()[1];
        for v in [-100.0, 0.0, 5.0, 1e9] {
            assert_eq!(scale.color(v, 5.0, 5.0), scale.last_color());
        }
    }

    #[test]
    fn non_finite_is_gray() {
        let scale = black_white();
        assert_eq!(scale.color(f64::NAN, 0.0, 1.0), NEUTRAL_GRAY);
        assert_eq!(scale.color(f64::INFINITY, 0.0, 1.0), NEUTRAL_GRAY);
    }

    #[test]
    fn out_of_range_values_clamp() {
        let scale = black_white();
        assert_eq!(scale.color(-5.0, 0.0, 1.0), [0, 0, 0]);
        assert_eq!(scale.color(5.0, 0.0, 1.0), [255, 255, 255]);
    }

    #[test]
    fn stops_are_clamped_and_sorted() {
        let scale = ColorScale::from_hex_stops("x", &[(1.7, "#ffffff"), (-0.2, "#000000")]);
        let positions: Vec<f64> = scale.stops().iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![0.0, 1.0]);
        assert_eq!(scale.first_color(), [0, 0, 0]);
    }

    #[test]
    fn hex_round_trips_six_digit_input() {
        for hex in ["#440154", "#fde725", "#000000", "#ffffff", "#0f766e"] {
            let rgb = hex_to_rgb(hex).unwrap();
            assert_eq!(rgb_to_hex(rgb), hex);
        }
    }

    #[test]
    fn short_hex_expands_each_nibble() {
        assert_eq!(hex_to_rgb("#fa0"), Some([255, 170, 0]));
        assert_eq!(hex_to_rgb("zzz"), None);
        assert_eq!(hex_to_rgb("#12345"), None);
    }

    #[test]
    fn preview_stops_sample_evenly() {
        let stops = black_white().preview_stops(3);
        assert_eq!(stops, vec!["#000000", "#808080", "#ffffff"]);
        assert_eq!(black_white().preview_stops(1), vec!["#000000"]);
    }

    #[test]
    fn registry_has_named_palettes() {
        assert!(ColorScale::predefined().len() >= 5);
        assert_eq!(ColorScale::by_name("Thermal").map(|s| s.name()), Some("thermal"));
        assert_eq!(ColorScale::by_name("ice").map(|s| s.name()), Some("ice"));
        assert!(ColorScale::by_name("nope").is_none());
    }

    #[test]
    fn adjusted_scales_channels() {
        let dim = black_white().adjusted(0.5);
        assert_eq!(dim.name(), "bw-adjusted");
        assert_eq!(dim.last_color(), [128, 128, 128]);
    }
}
