use crate::error::Result;
use crate::types::{Series, SeriesHeader, NONE_SENTINEL};
use log::info;
use std::fmt;
use std::path::Path;

/// Column the series label is padded to
const LABEL_WIDTH: usize = 75;

/// Tab-separated series list written next to the case outputs
///
/// One line per series: the padded label followed by slice thickness,
/// acquisition matrix, rows x columns, image count, acquisition time and
/// contrast agent.
pub struct SeriesManifest<'a> {
    series: &'a [Series],
}

impl<'a> SeriesManifest<'a> {
    pub fn new(series: &'a [Series]) -> Self {
        Self { series }
    }
}

impl<'a> fmt::Display for SeriesManifest<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for series in self.series {
            let h = &series.header;
            write!(f, "{:<width$}", series.label, width = LABEL_WIDTH)?;
            write!(f, "\tslthick={}", slice_thickness(h))?;
            write!(f, "\tacqmtx={}", acquisition_matrix(h))?;
            write!(f, "\trowcol={}", rows_columns(h))?;
            write!(f, "\tslices={}", or_none(h.images_in_acquisition))?;
            write!(f, "\tacqtime={}", acquisition_time(h))?;
            writeln!(f, "\tcontrast={}", contrast(h))?;
        }
        Ok(())
    }
}

/// Writes the manifest unless it already exists and `repeat` is false
///
/// Returns whether the file was written.
pub fn write_manifest(series: &[Series], path: &Path, repeat: bool) -> Result<bool> {
    if path.is_file() && !repeat {
        info!("- Series list already exists at {}", path.display());
        return Ok(false);
    }
    std::fs::write(path, SeriesManifest::new(series).to_string())?;
    info!("- Wrote series list to {}", path.display());
    Ok(true)
}

fn or_none<T: ToString>(value: Option<T>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| NONE_SENTINEL.to_string())
}

/// Float text with at least one decimal place (`3.0`, `1.25`)
fn float_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}", value)
    }
}

fn slice_thickness(h: &SeriesHeader) -> String {
    or_none(
        h.slice_thickness
            .map(|t| float_text((t * 1000.0).round() / 1000.0)),
    )
}

fn acquisition_matrix(h: &SeriesHeader) -> String {
    match &h.acquisition_matrix {
        Some(values) => {
            let shown: Vec<String> = values.iter().take(4).map(u16::to_string).collect();
            format!("[{}]", shown.join(", "))
        }
        None => format!("{}\t", NONE_SENTINEL),
    }
}

fn rows_columns(h: &SeriesHeader) -> String {
    match (h.rows, h.columns) {
        (Some(rows), Some(columns)) => {
            let text = format!("{}x{}", rows, columns);
            if text.len() <= 7 {
                text
            } else {
                ">1Kx1K".to_string()
            }
        }
        _ => NONE_SENTINEL.to_string(),
    }
}

fn acquisition_time(h: &SeriesHeader) -> String {
    or_none(h.acquisition_time_value().map(|t| t.round() as i64))
}

fn contrast(h: &SeriesHeader) -> String {
    or_none(
        h.contrast_agent
            .as_deref()
            .map(|agent| agent.split_whitespace().collect::<Vec<_>>().join(" ")),
    )
}
