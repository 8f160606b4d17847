//! Aggregate statistics over a mesh grid.

use crate::model::CellState;

/// Summary of the valid (non-missing, finite) cells of a grid.
///
/// Every floating-point field is `NaN` when there are no valid cells.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MeshStats {
    pub count: usize,
    pub missing: usize,
    pub imputed: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub variance: f64,
    pub std: f64,
}

impl MeshStats {
    /// Single pass over `values`/`mask`. A cell counts as missing when its
    /// mask says so or its value is not finite; imputed cells are counted
    /// only among the valid ones.
    pub fn compute(values: &[f64], mask: &[CellState]) -> Self {
        let mut valid = Vec::with_capacity(values.len());
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut missing = 0;
        let mut imputed = 0;

        for (i, &v) in values.iter().enumerate() {
            let state = mask.get(i).copied().unwrap_or(CellState::Original);
            if state == CellState::Missing || !v.is_finite() {
                missing += 1;
                continue;
            }
            if state == CellState::Imputed {
                imputed += 1;
            }
            valid.push(v);
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }

        let count = valid.len();
        let mean = if count > 0 { sum / count as f64 } else { f64::NAN };
        let variance = population_variance(&valid, mean);

        Self {
            count,
            missing,
            imputed,
            min: if count > 0 { min } else { f64::NAN },
            max: if count > 0 { max } else { f64::NAN },
            mean,
            median: median(&valid),
            variance,
            std: variance.sqrt(),
        }
    }

    /// `min`/`max` for color mapping, falling back to `0..1` on an empty grid.
    pub fn display_range(&self) -> (f64, f64) {
        let min = if self.min.is_finite() { self.min } else { 0.0 };
        let max = if self.max.is_finite() { self.max } else { 1.0 };
        (min, max)
    }
}

/// Median of `values`; the mean of the two middle elements for an even
/// count, `NaN` when empty.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

fn population_variance(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() || !mean.is_finite() {
        return f64::NAN;
    }
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}

/// Fixed-point rendering for the statistics panel; `-` for undefined values.
pub fn format_stat(value: f64, digits: usize) -> String {
    if value.is_finite() {
        format!("{value:.digits$}")
    } else {
        "-".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CellState::*;

    #[test]
    fn missing_cells_are_excluded() {
        let values = [1.0, f64::NAN, 3.0, 100.0, 5.0];
        let mask = [Original, Missing, Original, Missing, Imputed];
        let stats = MeshStats::compute(&values, &mask);

        assert_eq!(stats.missing, 2);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.imputed, 1);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 5.0);
        assert!((stats.mean - 3.0).abs() < 1e-12);
        assert_eq!(stats.median, 3.0);
    }

    #[test]
    fn non_finite_value_counts_as_missing_even_if_mask_says_original() {
        let stats = MeshStats::compute(&[f64::INFINITY, 2.0], &[Original, Original]);
        assert_eq!(stats.missing, 1);
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn population_variance_divides_by_count() {
        let stats = MeshStats::compute(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], &[Original; 8]);
        assert!((stats.variance - 4.0).abs() < 1e-12);
        assert!((stats.std - 2.0).abs() < 1e-12);
        assert_eq!(stats.median, 4.5);
    }

    #[test]
    fn empty_input_reports_nan() {
        let stats = MeshStats::compute(&[], &[]);
        assert_eq!(stats.count, 0);
        assert!(stats.min.is_nan());
        assert!(stats.max.is_nan());
        assert!(stats.mean.is_nan());
        assert!(stats.median.is_nan());
        assert!(stats.std.is_nan());
        assert_eq!(stats.display_range(), (0.0, 1.0));
    }

    #[test]
    fn all_missing_reports_nan() {
        let stats = MeshStats::compute(&[f64::NAN, f64::NAN], &[Missing, Missing]);
        assert_eq!(stats.missing, 2);
        assert!(stats.mean.is_nan());
    }

    #[test]
    fn format_uses_dash_for_undefined() {
        assert_eq!(format_stat(1.23456, 3), "1.235");
        assert_eq!(format_stat(f64::NAN, 3), "-");
    }
}
