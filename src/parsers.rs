//! Converters from raw text into a rectangular mesh grid.
//!
//! Supported inputs:
//! * JSON array of arrays
//! * JSON object `{rows, cols, values, mask?, metadata?}`
//! * JSON object `{matrix, metadata?}`
//! * delimited text (comma, or whitespace / `;` / tab / `|` separated)
//! * firmware bed reports (`G29` / `G81` output as printed by Pronterface)
//!
//! Every path ends in [`matrix_from_rows`], which checks rectangularity and
//! builds the missing-cell mask.

use serde_json::Value;

use crate::model::{CellState, Metadata};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParseError {
    #[error("input is empty")]
    Empty,
    #[error("invalid JSON mesh: {0}")]
    InvalidJson(String),
    #[error("unrecognized JSON mesh layout")]
    UnrecognizedJson,
    #[error("values length {len} does not match declared dimensions {rows}x{cols}")]
    DimensionMismatch { rows: usize, cols: usize, len: usize },
    #[error("rows must have equal length")]
    RaggedRows,
    #[error("mesh must be rectangular")]
    NotRectangular,
    #[error("mesh must be a non-empty 2D array")]
    EmptyMatrix,
    #[error("no numeric rows found in input")]
    NoNumericRows,
}

#[derive(Clone, Debug, Default)]
pub struct ParseOptions {
    /// Overrides the `source` tag of text imports.
    pub source: Option<String>,
    /// Swap rows and columns of firmware reports.
    pub transpose: bool,
}

/// A parsed grid, flat and row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedMesh {
    pub rows: usize,
    pub cols: usize,
    pub values: Vec<f64>,
    pub mask: Vec<u8>,
    pub metadata: Metadata,
}

impl ParsedMesh {
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// Sniffs the format from the first non-blank character and dispatches.
pub fn parse(text: &str, options: &ParseOptions) -> Result<ParsedMesh, ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ParseError::Empty);
    }
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return parse_json(trimmed);
    }
    if has_row_labels(data_lines(trimmed)) {
        log::debug!("row-labeled report detected, using firmware report parser");
        let mut parsed = parse_pronterface(trimmed, options)?;
        if let Some(source) = &options.source {
            parsed.metadata.insert("source".into(), Value::String(source.clone()));
        }
        return Ok(parsed);
    }
    parse_delimited(trimmed, options)
}

pub fn parse_json(text: &str) -> Result<ParsedMesh, ParseError> {
    let payload: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    match payload {
        Value::Array(rows) => {
            let rows = json_rows(&rows)?;
            matrix_from_rows(rows, "json-array", Metadata::new())
        }
        Value::Object(object) => {
            if let (Some(Value::Array(values)), Some(rows), Some(cols)) = (
                object.get("values"),
                object.get("rows").and_then(Value::as_u64),
                object.get("cols").and_then(Value::as_u64),
            ) {
                let (rows, cols) = (rows as usize, cols as usize);
                if rows.checked_mul(cols) != Some(values.len()) {
                    return Err(ParseError::DimensionMismatch { rows, cols, len: values.len() });
                }
                let grid = values
                    .chunks(cols.max(1))
                    .map(|chunk| chunk.iter().map(json_number).collect())
                    .collect();
                let mut metadata = metadata_of(&object);
                metadata
                    .entry("source")
                    .or_insert_with(|| Value::String("json-object".into()));
                let source = metadata
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or("json-object")
                    .to_owned();
                let mut parsed = matrix_from_rows(grid, &source, metadata)?;
                if let Some(Value::Array(mask)) = object.get("mask") {
                    if mask.len() == rows * cols {
                        merge_supplied_mask(&mut parsed, mask);
                    }
                }
                return Ok(parsed);
            }

            if let Some(Value::Array(matrix)) = object.get("matrix") {
                let source = object
                    .get("source")
                    .and_then(Value::as_str)
                    .unwrap_or("json-matrix")
                    .to_owned();
                return matrix_from_rows(json_rows(matrix)?, &source, metadata_of(&object));
            }

            Err(ParseError::UnrecognizedJson)
        }
        _ => Err(ParseError::UnrecognizedJson),
    }
}

pub fn parse_delimited(text: &str, options: &ParseOptions) -> Result<ParsedMesh, ParseError> {
    let mut grid: Vec<Vec<Option<f64>>> = Vec::new();

    for line in data_lines(text) {
        let tokens: Vec<&str> = if line.contains(',') {
            line.split(',').collect()
        } else {
            line.split(|c: char| c.is_whitespace() || c == ';' || c == '|').collect()
        };
        let row: Vec<Option<f64>> = tokens
            .into_iter()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| {
                if t.eq_ignore_ascii_case("nan") || t == "-" {
                    None
                } else {
                    parse_number(t)
                }
            })
            .collect();

        if row.is_empty() {
            continue;
        }
        if let Some(first) = grid.first() {
            if first.len() != row.len() {
                return Err(ParseError::RaggedRows);
            }
        }
        grid.push(row);
    }

    if grid.is_empty() {
        return Err(ParseError::NoNumericRows);
    }
    let source = options.source.as_deref().unwrap_or("delimited");
    matrix_from_rows(grid, source, Metadata::new())
}

/// Parses the bed topography printed by `G29`/`G81` through Pronterface.
///
/// Columns are pipe separated. When every line carries a consecutive
/// integer row label before the first `|` the label is dropped; `G29`/`G81`
/// prefixes and axis letters are always stripped.
pub fn parse_pronterface(text: &str, options: &ParseOptions) -> Result<ParsedMesh, ParseError> {
    let mut grid: Vec<Vec<Option<f64>>> = Vec::new();
    let labeled = has_row_labels(data_lines(text).filter(|l| l.contains('|')));

    for line in data_lines(text) {
        let mut columns: Vec<&str> = line.split('|').map(str::trim).collect();
        if labeled && columns.len() > 1 && is_row_label(columns[0]) {
            columns.remove(0);
        }

        let cleaned = columns
            .iter()
            .map(|col| strip_axis_letters(strip_gcode_prefix(&collapse_whitespace(col))))
            .collect::<Vec<_>>()
            .join(" ");

        let mut numeric = false;
        let row: Vec<Option<f64>> = cleaned
            .split_whitespace()
            .map(|token| {
                if token == "---" || token.eq_ignore_ascii_case("nan") {
                    return None;
                }
                let value = parse_number(token);
                numeric |= value.is_some();
                value
            })
            .collect();

        // Banner lines ("Bilinear Leveling Grid:") carry no numbers at all.
        if !row.is_empty() && numeric {
            grid.push(row);
        }
    }

    if grid.is_empty() {
        return Err(ParseError::NoNumericRows);
    }
    let width = grid[0].len();
    if grid.iter().any(|row| row.len() != width) {
        return Err(ParseError::RaggedRows);
    }
    let grid = if options.transpose { transpose(&grid) } else { grid };
    matrix_from_rows(grid, "pronterface", Metadata::new())
}

/// Validates a row-of-rows matrix and flattens it.
///
/// `None` cells become `NaN` with mask `1`. `metadata` entries win over the
/// `source` default.
pub fn matrix_from_rows(
    grid: Vec<Vec<Option<f64>>>,
    source: &str,
    metadata: Metadata,
) -> Result<ParsedMesh, ParseError> {
    let rows = grid.len();
    let cols = grid.first().map_or(0, Vec::len);
    if rows == 0 || cols == 0 {
        return Err(ParseError::EmptyMatrix);
    }

    let mut values = Vec::with_capacity(rows * cols);
    let mut mask = Vec::with_capacity(rows * cols);
    for row in &grid {
        if row.len() != cols {
            return Err(ParseError::NotRectangular);
        }
        for cell in row {
            match cell.filter(|v| v.is_finite()) {
                Some(v) => {
                    values.push(v);
                    mask.push(CellState::Original as u8);
                }
                None => {
                    values.push(f64::NAN);
                    mask.push(CellState::Missing as u8);
                }
            }
        }
    }

    let mut stamped = Metadata::new();
    stamped.insert("source".into(), Value::String(source.to_owned()));
    stamped.extend(metadata);

    Ok(ParsedMesh { rows, cols, values, mask, metadata: stamped })
}

pub fn transpose(grid: &[Vec<Option<f64>>]) -> Vec<Vec<Option<f64>>> {
    let cols = grid.first().map_or(0, Vec::len);
    (0..cols)
        .map(|c| grid.iter().map(|row| row.get(c).copied().flatten()).collect())
        .collect()
}

/// Cheap check used by clipboard import before attempting a parse.
pub fn looks_like_mesh(text: &str) -> bool {
    text.trim()
        .lines()
        .take(5)
        .any(|line| line.chars().any(|c| c.is_ascii_digit()))
}

fn data_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with("//"))
}

// Every line starts with `N|` and the labels count up or down by one.
fn has_row_labels<'a>(lines: impl Iterator<Item = &'a str>) -> bool {
    let labels: Option<Vec<i64>> = lines
        .map(|line| {
            let (label, _) = line.split_once('|')?;
            let label = label.trim();
            if is_row_label(label) { label.parse().ok() } else { None }
        })
        .collect();
    let Some(labels) = labels else {
        return false;
    };
    if labels.len() < 2 {
        return false;
    }
    let step = labels[1] - labels[0];
    (step == 1 || step == -1) && labels.windows(2).all(|w| w[1] - w[0] == step)
}

fn is_row_label(token: &str) -> bool {
    !token.is_empty() && token.chars().all(|c| c.is_ascii_digit())
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_gcode_prefix(s: &str) -> &str {
    for prefix in ["G29", "G81"] {
        if s.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)) {
            return s[prefix.len()..].trim_start();
        }
    }
    s
}

fn strip_axis_letters(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if matches!(c.to_ascii_uppercase(), 'X' | 'Y' | 'Z') {
            if chars.peek() == Some(&':') {
                chars.next();
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Parses a float, accepting a comma decimal separator. Non-finite results
/// are treated as missing.
fn parse_number(token: &str) -> Option<f64> {
    token
        .trim()
        .replacen(',', ".", 1)
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

fn json_rows(rows: &[Value]) -> Result<Vec<Vec<Option<f64>>>, ParseError> {
    rows.iter()
        .map(|row| match row {
            Value::Array(cells) => Ok(cells.iter().map(json_number).collect()),
            _ => Err(ParseError::NotRectangular),
        })
        .collect()
}

fn metadata_of(object: &serde_json::Map<String, Value>) -> Metadata {
    match object.get("metadata") {
        Some(Value::Object(meta)) => meta.clone(),
        _ => Metadata::new(),
    }
}

// Imported masks may flag cells as already imputed (2) or as missing (1).
fn merge_supplied_mask(parsed: &mut ParsedMesh, supplied: &[Value]) {
    for (i, bit) in supplied.iter().enumerate() {
        match bit.as_u64() {
            Some(1) => {
                parsed.values[i] = f64::NAN;
                parsed.mask[i] = CellState::Missing as u8;
            }
            Some(2) if parsed.values[i].is_finite() => {
                parsed.mask[i] = CellState::Imputed as u8;
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> ParseOptions {
        ParseOptions::default()
    }

    fn assert_values(actual: &[f64], expected: &[f64]) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            if e.is_nan() {
                assert!(a.is_nan(), "expected NaN, got {a}");
            } else {
                assert!((a - e).abs() < 1e-12, "expected {e}, got {a}");
            }
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(parse("   \n\t ", &opts()), Err(ParseError::Empty));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(parse("[[1, 2]", &opts()), Err(ParseError::InvalidJson(_))));
    }

    #[test]
    fn json_array_of_arrays() {
        let parsed = parse("[[1, 2], [null, 4]]", &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (2, 2));
        assert_eq!(parsed.mask, vec![0, 0, 1, 0]);
        assert_eq!(parsed.source(), Some("json-array"));
    }

    #[test]
    fn json_object_with_dimensions() {
        let text = r#"{"rows":2,"cols":2,"values":[1,null,3,4],"mask":[0,1,2,0],"metadata":{"machine":"m1"}}"#;
        let parsed = parse(text, &opts()).unwrap();
        assert_values(&parsed.values, &[1.0, f64::NAN, 3.0, 4.0]);
        assert_eq!(parsed.mask, vec![0, 1, 2, 0]);
        assert_eq!(parsed.source(), Some("json-object"));
        assert_eq!(parsed.metadata.get("machine"), Some(&Value::String("m1".into())));
    }

    #[test]
    fn json_object_dimension_mismatch() {
        let err = parse(r#"{"rows":2,"cols":3,"values":[1,2,3]}"#, &opts()).unwrap_err();
        assert_eq!(err, ParseError::DimensionMismatch { rows: 2, cols: 3, len: 3 });
    }

    #[test]
    fn json_matrix_object() {
        let parsed = parse(r#"{"matrix":[[1,2,3]],"metadata":{"source":"probe"}}"#, &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (1, 3));
        assert_eq!(parsed.source(), Some("probe"));
    }

    #[test]
    fn unrecognized_json_object() {
        assert_eq!(parse(r#"{"foo": 1}"#, &opts()), Err(ParseError::UnrecognizedJson));
    }

    #[test]
    fn ragged_json_is_rejected() {
        assert_eq!(parse("[[1,2],[3]]", &opts()), Err(ParseError::NotRectangular));
    }

    #[test]
    fn delimited_comma_and_whitespace() {
        let text = "# probe run\n// exported\n1,2,3\n4,nan,6\n\n";
        let parsed = parse(text, &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (2, 3));
        assert_eq!(parsed.mask, vec![0, 0, 0, 0, 1, 0]);
        assert_eq!(parsed.source(), Some("delimited"));

        let parsed = parse("0.1 0.2;0.3\n-  0.5\t0.6", &opts()).unwrap();
        assert_values(&parsed.values, &[0.1, 0.2, 0.3, f64::NAN, 0.5, 0.6]);
    }

    #[test]
    fn comma_takes_precedence_over_other_separators() {
        let parsed = parse("0 ,5\n1 ,5", &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (2, 2));
        assert_values(&parsed.values, &[0.0, 5.0, 1.0, 5.0]);

        let parsed = parse("0;5 1|5", &opts()).unwrap();
        assert_eq!(parsed.cols, 4);
    }

    #[test]
    fn pipe_grid_without_row_labels_stays_delimited() {
        let parsed = parse("1|2|3\n4|5|6", &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (2, 3));
        assert_eq!(parsed.source(), Some("delimited"));
    }

    #[test]
    fn ragged_delimited_rows_are_rejected() {
        let err = parse("1 2 3\n4 5", &opts()).unwrap_err();
        assert_eq!(err, ParseError::RaggedRows);
        assert_eq!(err.to_string(), "rows must have equal length");
    }

    #[test]
    fn comment_only_text_has_no_rows() {
        assert_eq!(parse("# nothing\n// here", &opts()), Err(ParseError::NoNumericRows));
    }

    #[test]
    fn source_option_overrides_delimited_tag() {
        let options = ParseOptions { source: Some("clipboard".into()), transpose: false };
        assert_eq!(parse("1 2", &options).unwrap().source(), Some("clipboard"));
    }

    #[test]
    fn row_labeled_report_drops_labels() {
        let parsed = parse("0|1.0 2.0\n1|3.0 .\n", &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (2, 2));
        assert_eq!(parsed.mask, vec![0, 0, 0, 1]);
        assert_values(&parsed.values, &[1.0, 2.0, 3.0, f64::NAN]);
    }

    #[test]
    fn pronterface_report_strips_noise() {
        let text = "Bilinear Leveling Grid:\n\
                    G29 X: 0.10 | Y: 0.20 | Z: 0.30\n\
                    0.40 | --- | 0.60\n";
        let parsed = parse_pronterface(text, &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (2, 3));
        assert_values(&parsed.values, &[0.1, 0.2, 0.3, 0.4, f64::NAN, 0.6]);
        assert_eq!(parsed.source(), Some("pronterface"));
    }

    #[test]
    fn pronterface_labels_after_banner() {
        let text = "Bilinear Leveling Grid:\n 1 | +0.10 +0.20\n 0 | -0.05 nan\n";
        let parsed = parse_pronterface(text, &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (2, 2));
        assert_values(&parsed.values, &[0.1, 0.2, -0.05, f64::NAN]);
    }

    #[test]
    fn pronterface_transpose() {
        let options = ParseOptions { source: None, transpose: true };
        let parsed = parse_pronterface("1 | 2 | 3\n4 | 5 | 6", &options).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (3, 2));
        assert_values(&parsed.values, &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn pronterface_ragged_rows_fail_with_or_without_transpose() {
        let text = "1 | 2 | 3\n4 | 5\n";
        assert_eq!(parse_pronterface(text, &opts()), Err(ParseError::RaggedRows));
        let options = ParseOptions { source: None, transpose: true };
        assert_eq!(parse_pronterface(text, &options), Err(ParseError::RaggedRows));
    }

    #[test]
    fn labeled_report_ignores_comment_lines() {
        let parsed = parse("# bed run 3\n// 2 probes\n0|1.0 2.0\n1|3.0 4.0\n", &opts()).unwrap();
        assert_eq!((parsed.rows, parsed.cols), (2, 2));
        assert_values(&parsed.values, &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn json_dimensions_that_overflow_are_rejected() {
        let err = parse(r#"{"rows":4294967296,"cols":4294967296,"values":[]}"#, &opts()).unwrap_err();
        assert!(matches!(err, ParseError::DimensionMismatch { len: 0, .. }));
    }

    #[test]
    fn pronterface_without_numbers_fails() {
        assert_eq!(parse_pronterface("hello\nworld", &opts()), Err(ParseError::NoNumericRows));
    }

    #[test]
    fn matrix_from_rows_rejects_empty() {
        assert_eq!(matrix_from_rows(vec![], "x", Metadata::new()), Err(ParseError::EmptyMatrix));
        assert_eq!(matrix_from_rows(vec![vec![]], "x", Metadata::new()), Err(ParseError::EmptyMatrix));
    }

    #[test]
    fn mesh_like_detection() {
        assert!(looks_like_mesh("0.1 0.2\n0.3 0.4"));
        assert!(!looks_like_mesh("hello world"));
    }
}
