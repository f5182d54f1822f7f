//! Static SVG figures for training curves and distance-matrix comparisons.
use anyhow::Result;
use itertools::Itertools;
use ndarray::{s, ArrayView2, ArrayView3};
use std::path::Path;
use svg::node::element::{Group, Line, Path as SvgPath, Rectangle, Text};
use svg::Document;
use thiserror::Error;
use tracing::info;

const CURVE_WIDTH: f64 = 600.0;
const CURVE_HEIGHT: f64 = 400.0;
const MARGIN: f64 = 50.0;
const PANEL_SIZE: f64 = 400.0;
const TITLE_HEIGHT: f64 = 30.0;

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("{pred} predictions but {gt} ground truth matrices")]
    BatchMismatch { pred: usize, gt: usize },
    #[error("expected {expected} {what}, got {got}")]
    LabelMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("length {len} for {name} exceeds the matrix size {max_len}")]
    LengthOutOfRange {
        name: String,
        len: usize,
        max_len: usize,
    },
}

/// Formats like C's `%g`: `digits` significant figures, no trailing zeros, exponent
/// notation for very small or large magnitudes.
pub fn format_significant(value: f64, digits: usize) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{value}");
    }
    let digits = digits.max(1);
    let trim = |s: String| -> String {
        if s.contains('.') {
            s.trim_end_matches('0').trim_end_matches('.').to_string()
        } else {
            s
        }
    };

    let scientific = format!("{:.*e}", digits - 1, value);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((scientific.as_str(), "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= digits as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{}{:02}",
            trim(mantissa.to_string()),
            sign,
            exponent.abs()
        )
    } else {
        let decimals = (digits as i32 - 1 - exponent).max(0) as usize;
        trim(format!("{:.*}", decimals, value))
    }
}

fn text(x: f64, y: f64, content: &str, size: f64) -> Text {
    Text::new(content)
        .set("x", x)
        .set("y", y)
        .set("font-family", "sans-serif")
        .set("font-size", size)
        .set("text-anchor", "middle")
}

fn polyline(points: &[(f64, f64)], color: &str) -> Option<SvgPath> {
    let (first, rest) = points.split_first()?;
    let mut data = format!("M {} {}", first.0, first.1);
    for (x, y) in rest {
        data.push_str(&format!(" L {x} {y}"));
    }
    Some(
        SvgPath::new()
            .set("fill", "none")
            .set("stroke", color)
            .set("stroke-width", 2)
            .set("d", data),
    )
}

/// Plots train (green) and validation (blue) curves against epoch.
pub fn plot_train_val(
    train: &[f32],
    val: &[f32],
    title: Option<&str>,
    savepath: impl AsRef<Path>,
) -> Result<()> {
    let (lo, hi) = match train.iter().chain(val.iter()).copied().minmax().into_option() {
        Some((lo, hi)) if hi > lo => (lo as f64, hi as f64),
        Some((v, _)) => (v as f64 - 1.0, v as f64 + 1.0),
        None => (0.0, 1.0),
    };
    let epochs = train.len().max(val.len()).max(2) - 1;

    let plot_w = CURVE_WIDTH - 2.0 * MARGIN;
    let plot_h = CURVE_HEIGHT - 2.0 * MARGIN;
    let project = |idx: usize, value: f32| -> (f64, f64) {
        let x = MARGIN + plot_w * idx as f64 / epochs as f64;
        let y = MARGIN + plot_h * (1.0 - (value as f64 - lo) / (hi - lo));
        (x, y)
    };
    let points = |values: &[f32]| -> Vec<(f64, f64)> {
        values
            .iter()
            .enumerate()
            .map(|(idx, value)| project(idx, *value))
            .collect()
    };

    let axes = Group::new()
        .add(
            Line::new()
                .set("x1", MARGIN)
                .set("y1", CURVE_HEIGHT - MARGIN)
                .set("x2", CURVE_WIDTH - MARGIN)
                .set("y2", CURVE_HEIGHT - MARGIN)
                .set("stroke", "black"),
        )
        .add(
            Line::new()
                .set("x1", MARGIN)
                .set("y1", MARGIN)
                .set("x2", MARGIN)
                .set("y2", CURVE_HEIGHT - MARGIN)
                .set("stroke", "black"),
        )
        .add(text(MARGIN, CURVE_HEIGHT - MARGIN + 20.0, "0", 12.0))
        .add(text(
            CURVE_WIDTH - MARGIN,
            CURVE_HEIGHT - MARGIN + 20.0,
            &epochs.to_string(),
            12.0,
        ))
        .add(text(MARGIN - 25.0, MARGIN, &format_significant(hi, 3), 12.0))
        .add(text(
            MARGIN - 25.0,
            CURVE_HEIGHT - MARGIN,
            &format_significant(lo, 3),
            12.0,
        ));

    let mut legend = Group::new().set("class", "legend");
    for (row, (label, color)) in [("train", "green"), ("val", "blue")].iter().enumerate() {
        let y = MARGIN + 15.0 + 20.0 * row as f64;
        let x = CURVE_WIDTH - MARGIN - 90.0;
        legend = legend
            .add(
                Line::new()
                    .set("x1", x)
                    .set("y1", y)
                    .set("x2", x + 25.0)
                    .set("y2", y)
                    .set("stroke", *color)
                    .set("stroke-width", 2),
            )
            .add(text(x + 50.0, y + 4.0, label, 12.0));
    }

    let mut document = Document::new()
        .set("width", CURVE_WIDTH)
        .set("height", CURVE_HEIGHT)
        .set("viewBox", (0.0, 0.0, CURVE_WIDTH, CURVE_HEIGHT))
        .add(axes)
        .add(legend);
    if let Some(curve) = polyline(&points(train), "green") {
        document = document.add(curve.set("class", "train"));
    }
    if let Some(curve) = polyline(&points(val), "blue") {
        document = document.add(curve.set("class", "val"));
    }
    if let Some(title) = title {
        document = document.add(text(CURVE_WIDTH / 2.0, MARGIN / 2.0, title, 16.0));
    }

    svg::save(savepath.as_ref(), &document)?;
    info!(path = %savepath.as_ref().display(), "saved training curve");
    Ok(())
}

/// Maps `t` in `[0, 1]` onto a blue-green-yellow ramp.
fn heat_color(t: f64) -> String {
    let t = t.clamp(0.0, 1.0);
    let stops = [(68.0, 1.0, 84.0), (33.0, 145.0, 140.0), (253.0, 231.0, 37.0)];
    let (lower, upper, frac) = if t < 0.5 {
        (stops[0], stops[1], t * 2.0)
    } else {
        (stops[1], stops[2], (t - 0.5) * 2.0)
    };
    let lerp = |a: f64, b: f64| (a + (b - a) * frac).round() as u8;
    format!(
        "rgb({},{},{})",
        lerp(lower.0, upper.0),
        lerp(lower.1, upper.1),
        lerp(lower.2, upper.2)
    )
}

fn heatmap(matrix: ArrayView2<f32>, x: f64, y: f64, title: &str) -> Group {
    let (rows, cols) = matrix.dim();
    let (lo, hi) = matrix
        .iter()
        .copied()
        .minmax()
        .into_option()
        .map_or((0.0, 1.0), |(lo, hi)| (lo as f64, hi as f64));
    let span = if hi > lo { hi - lo } else { 1.0 };
    let cell_w = PANEL_SIZE / cols.max(1) as f64;
    let cell_h = PANEL_SIZE / rows.max(1) as f64;

    let group = Group::new().add(text(x + PANEL_SIZE / 2.0, y + TITLE_HEIGHT / 2.0, title, 14.0));
    matrix
        .indexed_iter()
        .fold(group, |group, ((row, col), value)| {
            group.add(
                Rectangle::new()
                    .set("x", x + col as f64 * cell_w)
                    .set("y", y + TITLE_HEIGHT + row as f64 * cell_h)
                    .set("width", cell_w)
                    .set("height", cell_h)
                    .set("fill", heat_color((*value as f64 - lo) / span)),
            )
        })
}

/// Side-by-side heatmaps: predictions on the top row, ground truth below, each cropped
/// to its protein length.
pub fn plot_dist_matrix(
    pred: ArrayView3<f32>,
    gt: ArrayView3<f32>,
    protein_names: &[String],
    lengths: &[usize],
    scores: &[f32],
    savepath: impl AsRef<Path>,
) -> Result<()> {
    let batch = pred.shape()[0];
    if batch != gt.shape()[0] {
        return Err(PlotError::BatchMismatch {
            pred: batch,
            gt: gt.shape()[0],
        }
        .into());
    }
    for (what, got) in [
        ("protein names", protein_names.len()),
        ("lengths", lengths.len()),
        ("scores", scores.len()),
    ] {
        if got != batch {
            return Err(PlotError::LabelMismatch {
                what,
                expected: batch,
                got,
            }
            .into());
        }
    }

    let panel = PANEL_SIZE + TITLE_HEIGHT;
    let mut document = Document::new()
        .set("width", panel * batch as f64)
        .set("height", 2.0 * panel)
        .set("viewBox", (0.0, 0.0, panel * batch as f64, 2.0 * panel));

    for (i, ((name, &len), score)) in protein_names
        .iter()
        .zip(lengths.iter())
        .zip(scores.iter())
        .enumerate()
    {
        let max_len = pred.shape()[1].min(gt.shape()[1]);
        if len > max_len {
            return Err(PlotError::LengthOutOfRange {
                name: name.clone(),
                len,
                max_len,
            }
            .into());
        }
        let x = i as f64 * panel;
        let title = format!("{name} prediction ({})", format_significant(*score as f64, 4));
        document = document
            .add(heatmap(pred.slice(s![i, ..len, ..len]), x, 0.0, &title))
            .add(heatmap(
                gt.slice(s![i, ..len, ..len]),
                x,
                panel,
                &format!("{name} ground truth"),
            ));
    }

    svg::save(savepath.as_ref(), &document)?;
    info!(path = %savepath.as_ref().display(), proteins = batch, "saved distance matrix plot");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use std::fs;

    #[test]
    fn test_format_significant() {
        assert_eq!(format_significant(1.23456, 4), "1.235");
        assert_eq!(format_significant(0.5, 4), "0.5");
        assert_eq!(format_significant(12345.6, 4), "1.235e+04");
        assert_eq!(format_significant(0.00001234, 4), "1.234e-05");
        assert_eq!(format_significant(100.0, 4), "100");
        assert_eq!(format_significant(0.0, 4), "0");
    }

    #[test]
    fn test_heat_color_endpoints() {
        assert_eq!(heat_color(0.0), "rgb(68,1,84)");
        assert_eq!(heat_color(1.0), "rgb(253,231,37)");
        assert_eq!(heat_color(7.0), heat_color(1.0));
    }

    #[test]
    fn test_plot_train_val() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("curve.svg");
        plot_train_val(&[3.0, 2.0, 1.5], &[3.5, 2.5, 2.0], Some("dRMSD"), &path)?;
        let content = fs::read_to_string(&path)?;
        assert!(content.contains("dRMSD"));
        assert!(content.contains("stroke=\"green\""));
        assert!(content.contains("stroke=\"blue\""));
        Ok(())
    }

    #[test]
    fn test_plot_train_val_handles_flat_and_empty_curves() -> Result<()> {
        let dir = tempfile::tempdir()?;
        plot_train_val(&[1.0, 1.0], &[], None, dir.path().join("flat.svg"))?;
        plot_train_val(&[], &[], None, dir.path().join("empty.svg"))?;
        Ok(())
    }

    #[test]
    fn test_plot_dist_matrix() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dist.svg");
        let pred = Array3::<f32>::from_shape_fn((2, 4, 4), |(b, i, j)| (b + i + j) as f32);
        let gt = Array3::<f32>::zeros((2, 4, 4));
        let names = vec!["T0949".to_string(), "T0951".to_string()];
        plot_dist_matrix(
            pred.view(),
            gt.view(),
            &names,
            &[3, 2],
            &[1.23456, 0.5],
            &path,
        )?;
        let content = fs::read_to_string(&path)?;
        assert!(content.contains("T0949 prediction (1.235)"));
        assert!(content.contains("T0951 ground truth"));
        // 9 + 4 cells per row, two rows
        assert_eq!(content.matches("<rect").count(), 26);
        Ok(())
    }

    #[test]
    fn test_plot_dist_matrix_rejects_mismatched_batches() {
        let pred = Array3::<f32>::zeros((2, 3, 3));
        let gt = Array3::<f32>::zeros((1, 3, 3));
        let names = vec!["a".to_string(), "b".to_string()];
        let err = plot_dist_matrix(pred.view(), gt.view(), &names, &[3, 3], &[0., 0.], "x.svg")
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PlotError>(),
            Some(PlotError::BatchMismatch { pred: 2, gt: 1 })
        ));
    }
}
