//! The live mesh grid, its edit history and the correction preview.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::parsers::ParsedMesh;
use crate::stats::{self, MeshStats};

/// Free-form key/value bag carried alongside a grid.
pub type Metadata = serde_json::Map<String, Value>;

/// Maximum number of undo snapshots kept.
pub const MAX_HISTORY: usize = 100;

/// Per-cell state, stored as `0/1/2` in exports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CellState {
    /// Measured by the probe.
    #[default]
    Original = 0,
    /// No sample; the value is `NaN`.
    Missing = 1,
    /// Filled in by correction or by hand.
    Imputed = 2,
}

impl From<u8> for CellState {
    fn from(code: u8) -> Self {
        match code {
            1 => CellState::Missing,
            2 => CellState::Imputed,
            _ => CellState::Original,
        }
    }
}

impl From<CellState> for u8 {
    fn from(state: CellState) -> Self {
        state as u8
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ModelError {
    #[error("mesh must have at least one row and one column")]
    Empty,
    #[error("expected {expected} values for the declared dimensions, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("cell ({row}, {col}) is outside the {rows}x{cols} mesh")]
    OutOfBounds { row: usize, col: usize, rows: usize, cols: usize },
}

/// One proposed or applied cell value.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub mask: Option<Vec<u8>>,
    pub metadata: Metadata,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateOptions {
    /// Mark written cells as imputed instead of original.
    pub imputed: bool,
    /// Ignore the value and mark the cells missing.
    pub mark_missing: bool,
    /// Do not record an undo step.
    pub skip_history: bool,
}

#[derive(Clone, Debug)]
struct Snapshot {
    values: Vec<f64>,
    mask: Vec<CellState>,
    metadata: Metadata,
}

#[derive(Clone, Debug)]
struct Preview {
    corrections: Vec<Correction>,
    by_index: HashMap<usize, usize>,
}

/// Serialized form of a grid for persistence and JSON export.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExportPayload {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<Option<f64>>,
    pub mask: Vec<u8>,
    pub metadata: Metadata,
}

#[derive(Clone, Debug, Default)]
pub struct MeshModel {
    rows: usize,
    cols: usize,
    values: Vec<f64>,
    mask: Vec<CellState>,
    metadata: Metadata,
    history: VecDeque<Snapshot>,
    future: VecDeque<Snapshot>,
    preview: Option<Preview>,
}

impl MeshModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the grid and forgets history and preview.
    ///
    /// A cell becomes missing when its value is not finite or the supplied
    /// mask says `1`; a supplied `2` on a finite value is kept as imputed.
    pub fn load(
        &mut self,
        rows: usize,
        cols: usize,
        values: Vec<f64>,
        options: LoadOptions,
    ) -> Result<(), ModelError> {
        if rows == 0 || cols == 0 {
            return Err(ModelError::Empty);
        }
        if values.len() != rows * cols {
            return Err(ModelError::DimensionMismatch { expected: rows * cols, actual: values.len() });
        }
        let supplied = options.mask.filter(|m| m.len() == values.len());

        let mut grid = values;
        let mut mask = vec![CellState::Original; grid.len()];
        for (i, value) in grid.iter_mut().enumerate() {
            let bit = supplied.as_ref().map(|m| CellState::from(m[i]));
            if bit == Some(CellState::Missing) || !value.is_finite() {
                *value = f64::NAN;
                mask[i] = CellState::Missing;
            } else if bit == Some(CellState::Imputed) {
                mask[i] = CellState::Imputed;
            }
        }

        self.rows = rows;
        self.cols = cols;
        self.values = grid;
        self.mask = mask;
        self.metadata = options.metadata;
        self.history.clear();
        self.future.clear();
        self.preview = None;
        log::info!("mesh loaded: {rows}x{cols}, source={}", self.source().unwrap_or("unknown"));
        Ok(())
    }

    pub fn load_parsed(&mut self, parsed: ParsedMesh) -> Result<(), ModelError> {
        self.load(
            parsed.rows,
            parsed.cols,
            parsed.values,
            LoadOptions { mask: Some(parsed.mask), metadata: parsed.metadata },
        )
    }

    pub fn has_data(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn mask(&self) -> &[CellState] {
        &self.mask
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }

    pub fn set_source(&mut self, source: &str) {
        self.metadata.insert("source".into(), Value::String(source.to_owned()));
    }

    #[inline]
    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    #[inline]
    pub fn coordinates(&self, index: usize) -> (usize, usize) {
        (index / self.cols, index % self.cols)
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row < self.rows && col < self.cols
    }

    /// Value at `(row, col)`; `NaN` outside the grid.
    pub fn value(&self, row: usize, col: usize) -> f64 {
        if self.contains(row, col) { self.values[self.index(row, col)] } else { f64::NAN }
    }

    pub fn state(&self, row: usize, col: usize) -> Option<CellState> {
        self.contains(row, col).then(|| self.mask[self.index(row, col)])
    }

    /// Row-of-rows copy of the values.
    pub fn matrix(&self) -> Vec<Vec<f64>> {
        if self.cols == 0 {
            return Vec::new();
        }
        self.values.chunks(self.cols).map(<[f64]>::to_vec).collect()
    }

    fn check_bounds(&self, row: usize, col: usize) -> Result<(), ModelError> {
        if self.contains(row, col) {
            Ok(())
        } else {
            Err(ModelError::OutOfBounds { row, col, rows: self.rows, cols: self.cols })
        }
    }

    fn write_cell(&mut self, index: usize, value: f64, options: UpdateOptions) {
        if options.mark_missing || !value.is_finite() {
            self.values[index] = f64::NAN;
            self.mask[index] = CellState::Missing;
        } else {
            self.values[index] = value;
            self.mask[index] = if options.imputed { CellState::Imputed } else { CellState::Original };
        }
    }

    pub fn set_value(
        &mut self,
        row: usize,
        col: usize,
        value: f64,
        options: UpdateOptions,
    ) -> Result<(), ModelError> {
        self.check_bounds(row, col)?;
        if !options.skip_history {
            self.push_history();
        }
        let index = self.index(row, col);
        self.write_cell(index, value, options);
        self.preview = None;
        Ok(())
    }

    /// Applies a batch as one undo step. All coordinates are checked before
    /// anything is written; an empty batch does nothing.
    pub fn bulk_update(&mut self, updates: &[Correction], options: UpdateOptions) -> Result<(), ModelError> {
        if updates.is_empty() {
            return Ok(());
        }
        for update in updates {
            self.check_bounds(update.row, update.col)?;
        }
        if !options.skip_history {
            self.push_history();
        }
        for update in updates {
            let index = self.index(update.row, update.col);
            self.write_cell(index, update.value, options);
        }
        self.preview = None;
        Ok(())
    }

    /// Sets every missing cell to `value`, marked imputed.
    pub fn fill_missing(&mut self, value: f64) -> Result<usize, ModelError> {
        let updates: Vec<Correction> = self
            .mask
            .iter()
            .enumerate()
            .filter(|(_, state)| **state == CellState::Missing)
            .map(|(index, _)| {
                let (row, col) = self.coordinates(index);
                Correction { row, col, value }
            })
            .collect();
        self.bulk_update(&updates, UpdateOptions { imputed: true, ..Default::default() })?;
        Ok(updates.len())
    }

    /// Finite-valued, non-missing cells among the 8 surrounding `(row, col)`.
    fn neighbor_values(&self, row: usize, col: usize) -> Vec<f64> {
        let mut out = Vec::with_capacity(8);
        for dr in -1isize..=1 {
            for dc in -1isize..=1 {
                if dr == 0 && dc == 0 {
                    continue;
                }
                let (Some(r), Some(c)) = (row.checked_add_signed(dr), col.checked_add_signed(dc)) else {
                    continue;
                };
                if !self.contains(r, c) {
                    continue;
                }
                let index = self.index(r, c);
                if self.mask[index] != CellState::Missing && self.values[index].is_finite() {
                    out.push(self.values[index]);
                }
            }
        }
        out
    }

    /// Proposes a value for each missing cell (and each imputed cell when
    /// `include_imputed`) from the median of its valid neighbors, falling
    /// back to their mean. Cells without neighbors are skipped. The grid is
    /// not modified.
    pub fn build_median_correction(&self, include_imputed: bool) -> Vec<Correction> {
        let mut corrections = Vec::new();
        for (index, state) in self.mask.iter().enumerate() {
            let wanted = *state == CellState::Missing || (include_imputed && *state == CellState::Imputed);
            if !wanted {
                continue;
            }
            let (row, col) = self.coordinates(index);
            let neighbors = self.neighbor_values(row, col);
            if neighbors.is_empty() {
                continue;
            }
            let median = stats::median(&neighbors);
            let candidate = if median.is_finite() {
                median
            } else {
                neighbors.iter().sum::<f64>() / neighbors.len() as f64
            };
            if candidate.is_finite() {
                corrections.push(Correction { row, col, value: candidate });
            }
        }
        corrections
    }

    /// Shows `corrections` without writing them. Entries outside the grid
    /// are dropped.
    pub fn set_preview(&mut self, corrections: Vec<Correction>) {
        let corrections: Vec<Correction> =
            corrections.into_iter().filter(|c| self.contains(c.row, c.col)).collect();
        let by_index = corrections
            .iter()
            .enumerate()
            .map(|(i, c)| (self.index(c.row, c.col), i))
            .collect();
        self.preview = Some(Preview { corrections, by_index });
    }

    pub fn clear_preview(&mut self) {
        self.preview = None;
    }

    pub fn preview(&self) -> Option<&[Correction]> {
        self.preview.as_ref().map(|p| p.corrections.as_slice())
    }

    pub fn preview_value(&self, row: usize, col: usize) -> Option<&Correction> {
        if !self.contains(row, col) {
            return None;
        }
        let preview = self.preview.as_ref()?;
        preview.by_index.get(&self.index(row, col)).map(|&i| &preview.corrections[i])
    }

    /// Commits corrections as imputed values and drops the preview.
    pub fn apply_corrections(&mut self, corrections: &[Correction]) -> Result<(), ModelError> {
        self.bulk_update(corrections, UpdateOptions { imputed: true, ..Default::default() })?;
        self.preview = None;
        Ok(())
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot { values: self.values.clone(), mask: self.mask.clone(), metadata: self.metadata.clone() }
    }

    fn restore(&mut self, snapshot: Snapshot) {
        self.values = snapshot.values;
        self.mask = snapshot.mask;
        self.metadata = snapshot.metadata;
        self.preview = None;
    }

    fn push_history(&mut self) {
        if !self.has_data() {
            return;
        }
        self.history.push_back(self.snapshot());
        if self.history.len() > MAX_HISTORY {
            self.history.pop_front();
        }
        self.future.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.history.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.history.pop_back() else {
            return false;
        };
        self.future.push_back(self.snapshot());
        self.restore(snapshot);
        true
    }

    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.future.pop_back() else {
            return false;
        };
        self.history.push_back(self.snapshot());
        self.restore(snapshot);
        true
    }

    pub fn compute_stats(&self) -> MeshStats {
        MeshStats::compute(&self.values, &self.mask)
    }

    /// JSON export form; metadata gets an ISO-8601 `updatedAt` stamp.
    pub fn to_export_payload(&self) -> ExportPayload {
        let mut metadata = self.metadata.clone();
        metadata.insert(
            "updatedAt".into(),
            Value::String(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
        );
        ExportPayload {
            rows: self.rows,
            cols: self.cols,
            values: self.values.iter().map(|v| v.is_finite().then_some(*v)).collect(),
            mask: self.mask.iter().map(|&s| u8::from(s)).collect(),
            metadata,
        }
    }

    /// CSV export: a `# rows=R, cols=C, source=S` header then one line per row.
    pub fn to_csv(&self) -> String {
        let header = format!(
            "# rows={}, cols={}, source={}",
            self.rows,
            self.cols,
            self.source().unwrap_or("unknown")
        );
        let lines = self.values.chunks(self.cols.max(1)).map(|row| {
            row.iter()
                .map(|v| if v.is_finite() { format!("{v:.5}") } else { "NaN".to_owned() })
                .collect::<Vec<_>>()
                .join(",")
        });
        std::iter::once(header).chain(lines).collect::<Vec<_>>().join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use CellState::*;

    fn grid(rows: usize, cols: usize, values: &[f64]) -> MeshModel {
        let mut model = MeshModel::new();
        model.load(rows, cols, values.to_vec(), LoadOptions::default()).unwrap();
        model
    }

    fn same_values(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
    }

    #[test]
    fn load_marks_non_finite_cells_missing() {
        let model = grid(2, 2, &[1.0, f64::NAN, f64::INFINITY, 4.0]);
        assert_eq!(model.mask(), &[Original, Missing, Missing, Original]);
        assert!(model.value(1, 0).is_nan());
    }

    #[test]
    fn load_respects_supplied_mask_asymmetrically() {
        let mut model = MeshModel::new();
        let options = LoadOptions { mask: Some(vec![1, 2, 2, 0]), metadata: Metadata::new() };
        model.load(2, 2, vec![1.0, 2.0, f64::NAN, 4.0], options).unwrap();
        // 1 on a finite value forces missing, 2 survives only on a finite value
        assert_eq!(model.mask(), &[Missing, Imputed, Missing, Original]);
        assert!(model.values()[0].is_nan());
    }

    #[test]
    fn load_rejects_bad_dimensions() {
        let mut model = MeshModel::new();
        assert_eq!(
            model.load(2, 2, vec![1.0], LoadOptions::default()),
            Err(ModelError::DimensionMismatch { expected: 4, actual: 1 })
        );
        assert_eq!(model.load(0, 3, vec![], LoadOptions::default()), Err(ModelError::Empty));
    }

    #[test]
    fn load_resets_history_and_preview() {
        let mut model = grid(1, 2, &[1.0, 2.0]);
        model.set_value(0, 0, 5.0, UpdateOptions::default()).unwrap();
        model.set_preview(vec![Correction { row: 0, col: 1, value: 3.0 }]);
        model.load(1, 1, vec![9.0], LoadOptions::default()).unwrap();
        assert!(!model.can_undo());
        assert!(model.preview().is_none());
    }

    #[test]
    fn set_value_modes() {
        let mut model = grid(1, 3, &[1.0, 2.0, 3.0]);
        model.set_value(0, 0, 7.0, UpdateOptions { imputed: true, ..Default::default() }).unwrap();
        model.set_value(0, 1, 8.0, UpdateOptions { mark_missing: true, ..Default::default() }).unwrap();
        model.set_value(0, 2, f64::NAN, UpdateOptions::default()).unwrap();
        assert_eq!(model.mask(), &[Imputed, Missing, Missing]);
        assert_eq!(model.value(0, 0), 7.0);
        assert!(model.value(0, 1).is_nan());
    }

    #[test]
    fn set_value_out_of_bounds_leaves_state_alone() {
        let mut model = grid(1, 1, &[1.0]);
        assert!(matches!(
            model.set_value(3, 0, 1.0, UpdateOptions::default()),
            Err(ModelError::OutOfBounds { .. })
        ));
        assert!(!model.can_undo());
    }

    #[test]
    fn skip_history_does_not_record() {
        let mut model = grid(1, 1, &[1.0]);
        model.set_value(0, 0, 2.0, UpdateOptions { skip_history: true, ..Default::default() }).unwrap();
        assert!(!model.can_undo());
    }

    #[test]
    fn bulk_update_is_one_undo_step() {
        let mut model = grid(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let updates = [
            Correction { row: 0, col: 0, value: 10.0 },
            Correction { row: 1, col: 1, value: 40.0 },
        ];
        model.bulk_update(&updates, UpdateOptions::default()).unwrap();
        assert_eq!(model.values(), &[10.0, 2.0, 3.0, 40.0]);
        assert!(model.undo());
        assert_eq!(model.values(), &[1.0, 2.0, 3.0, 4.0]);
        assert!(!model.undo());
    }

    #[test]
    fn bulk_update_rejects_partial_batches() {
        let mut model = grid(1, 2, &[1.0, 2.0]);
        let updates = [Correction { row: 0, col: 0, value: 5.0 }, Correction { row: 0, col: 9, value: 5.0 }];
        assert!(model.bulk_update(&updates, UpdateOptions::default()).is_err());
        assert_eq!(model.values(), &[1.0, 2.0]);
    }

    #[test]
    fn undo_redo_restore_exact_state() {
        let mut model = grid(2, 2, &[1.0, f64::NAN, 3.0, 4.0]);
        let before = (model.values().to_vec(), model.mask().to_vec());
        model.set_value(0, 1, 2.5, UpdateOptions { imputed: true, ..Default::default() }).unwrap();
        let after = (model.values().to_vec(), model.mask().to_vec());

        assert!(model.undo());
        assert!(same_values(model.values(), &before.0));
        assert_eq!(model.mask(), before.1.as_slice());

        assert!(model.redo());
        assert!(same_values(model.values(), &after.0));
        assert_eq!(model.mask(), after.1.as_slice());
        assert!(!model.redo());
    }

    #[test]
    fn new_edit_clears_redo() {
        let mut model = grid(1, 1, &[1.0]);
        model.set_value(0, 0, 2.0, UpdateOptions::default()).unwrap();
        model.undo();
        assert!(model.can_redo());
        model.set_value(0, 0, 3.0, UpdateOptions::default()).unwrap();
        assert!(!model.can_redo());
    }

    #[test]
    fn history_is_bounded() {
        let mut model = grid(1, 1, &[0.0]);
        for i in 0..(MAX_HISTORY + 20) {
            model.set_value(0, 0, i as f64, UpdateOptions::default()).unwrap();
        }
        let mut undone = 0;
        while model.undo() {
            undone += 1;
        }
        assert_eq!(undone, MAX_HISTORY);
        assert_eq!(model.value(0, 0), 19.0);
    }

    #[test]
    fn undo_on_empty_stack_is_noop() {
        let mut model = MeshModel::new();
        assert!(!model.undo());
        assert!(!model.redo());
    }

    #[test]
    fn fill_missing_marks_imputed() {
        let mut model = grid(2, 2, &[1.0, 2.0, 3.0, f64::NAN]);
        assert_eq!(model.fill_missing(0.5).unwrap(), 1);
        assert_eq!(model.mask(), &[Original, Original, Original, Imputed]);
        assert_eq!(model.value(1, 1), 0.5);
    }

    #[test]
    fn median_correction_uses_valid_neighbors() {
        let nan = f64::NAN;
        let model = grid(3, 3, &[1.0, 2.0, 3.0, 4.0, nan, 6.0, 7.0, 8.0, 9.0]);
        let corrections = model.build_median_correction(false);
        assert_eq!(corrections, vec![Correction { row: 1, col: 1, value: 5.0 }]);
        assert!(model.preview().is_none());
        assert!(model.value(1, 1).is_nan());
    }

    #[test]
    fn median_correction_skips_isolated_cells_and_respects_scope() {
        let nan = f64::NAN;
        let mut model = grid(1, 3, &[nan, nan, 4.0]);
        model.set_value(0, 2, 4.0, UpdateOptions { imputed: true, ..Default::default() }).unwrap();
        // (0,0) only touches another missing cell
        let corrections = model.build_median_correction(false);
        assert_eq!(corrections, vec![Correction { row: 0, col: 1, value: 4.0 }]);

        let mut model = grid(2, 2, &[1.0, 3.0, 5.0, 7.0]);
        model.set_value(0, 0, 1.0, UpdateOptions { imputed: true, ..Default::default() }).unwrap();
        assert!(model.build_median_correction(false).is_empty());
        let corrections = model.build_median_correction(true);
        assert_eq!(corrections, vec![Correction { row: 0, col: 0, value: 5.0 }]);
    }

    #[test]
    fn median_correction_corner_cell_uses_three_neighbors() {
        let nan = f64::NAN;
        let model = grid(2, 2, &[nan, 1.0, 2.0, 10.0]);
        let corrections = model.build_median_correction(false);
        assert_eq!(corrections, vec![Correction { row: 0, col: 0, value: 2.0 }]);
    }

    #[test]
    fn preview_lifecycle() {
        let mut model = grid(1, 2, &[1.0, f64::NAN]);
        let corrections = model.build_median_correction(false);
        model.set_preview(corrections.clone());
        assert_eq!(model.preview_value(0, 1).map(|c| c.value), Some(1.0));
        assert!(model.preview_value(0, 0).is_none());

        model.clear_preview();
        assert!(model.preview_value(0, 1).is_none());

        model.set_preview(corrections.clone());
        model.apply_corrections(&corrections).unwrap();
        assert!(model.preview().is_none());
        assert_eq!(model.state(0, 1), Some(Imputed));
    }

    #[test]
    fn preview_drops_corrections_outside_the_grid() {
        let mut model = grid(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, f64::NAN]);
        model.set_preview(vec![
            Correction { row: 0, col: 5, value: 9.0 },
            Correction { row: 1, col: 2, value: 4.5 },
        ]);
        assert_eq!(model.preview().map(<[Correction]>::len), Some(1));
        assert_eq!(model.preview_value(1, 2).map(|c| c.value), Some(4.5));
    }

    #[test]
    fn export_payload_maps_nan_to_null() {
        let mut model = MeshModel::new();
        let mut metadata = Metadata::new();
        metadata.insert("source".into(), Value::String("probe".into()));
        model.load(1, 2, vec![0.25, f64::NAN], LoadOptions { mask: None, metadata }).unwrap();

        let payload = model.to_export_payload();
        assert_eq!(payload.values, vec![Some(0.25), None]);
        assert_eq!(payload.mask, vec![0, 1]);
        let stamp = payload.metadata.get("updatedAt").and_then(Value::as_str).unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
        assert!(stamp.ends_with('Z'));
        assert_eq!(payload.metadata.get("source"), Some(&Value::String("probe".into())));
    }

    #[test]
    fn csv_export_format() {
        let mut model = grid(2, 2, &[1.0, f64::NAN, -0.123456, 4.0]);
        model.set_source("probe");
        assert_eq!(
            model.to_csv(),
            "# rows=2, cols=2, source=probe\n1.00000,NaN\n-0.12346,4.00000"
        );
        assert!(MeshModel::new().to_csv().starts_with("# rows=0, cols=0, source=unknown"));
    }

    #[test]
    fn cell_state_codes() {
        assert_eq!(CellState::from(2), Imputed);
        assert_eq!(CellState::from(7), Original);
        assert_eq!(u8::from(Missing), 1);
    }
}
