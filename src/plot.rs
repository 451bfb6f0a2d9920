use plotters::prelude::*;

use crate::slowness::{PowerMap, SlownessGrid};
use crate::utils::{power_to_db, DynError};

const PLOT_FONT_SCALE: f64 = 1.2;

fn scaled_font_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

fn scaled_area_size(base: i32) -> i32 {
    ((base as f64) * PLOT_FONT_SCALE).round() as i32
}

/// Blue -> cyan -> yellow -> red ramp over t in [0, 1].
fn ramp_color(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let (r, g, b) = if t < 1.0 / 3.0 {
        let u = t * 3.0;
        (0.0, u, 1.0)
    } else if t < 2.0 / 3.0 {
        let u = (t - 1.0 / 3.0) * 3.0;
        (u, 1.0, 1.0 - u)
    } else {
        let u = (t - 2.0 / 3.0) * 3.0;
        (1.0, 1.0 - u, 0.0)
    };
    RGBColor(
        (r * 255.0).round() as u8,
        (g * 255.0).round() as u8,
        (b * 255.0).round() as u8,
    )
}

/// Slowness-plane heatmap of one channel's power map, in dB relative to the
/// map peak with values below `min_db` clipped to the floor color.
pub fn plot_power_map(
    map: &PowerMap,
    grid: &SlownessGrid,
    title: &str,
    filename: &str,
    min_db: f64,
) -> Result<(), DynError> {
    let nk = grid.nk();
    if nk == 0 || map.nk() != nk {
        return Err("Power map and slowness grid sizes do not match".into());
    }
    if min_db >= 0.0 {
        return Err("min_db must be negative (dB relative to the peak)".into());
    }
    let peak = map.max_value();
    if !(peak.is_finite() && peak > 0.0) {
        return Err("Power map has no positive values to plot".into());
    }

    let root = BitMapBackend::new(filename, (900, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let half = grid.sinc() * 0.5;
    let s_lo = grid.smin() - half;
    let s_hi = grid.smax_effective() + half;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", scaled_font_size(28)).into_font())
        .margin(10)
        .x_label_area_size(scaled_area_size(40))
        .y_label_area_size(scaled_area_size(60))
        .build_cartesian_2d(s_lo..s_hi, s_lo..s_hi)?;

    chart
        .configure_mesh()
        .x_desc("sx [s/deg]")
        .y_desc("sy [s/deg]")
        .label_style(("sans-serif", scaled_font_size(20)).into_font())
        .axis_desc_style(("sans-serif", scaled_font_size(24)).into_font())
        .light_line_style(WHITE.mix(0.0))
        .draw()?;

    chart.draw_series((0..nk).flat_map(|row| {
        let sy = grid.value(row);
        (0..nk).map(move |col| (row, col, sy))
    }).map(|(row, col, sy)| {
        let sx = grid.value(col);
        let db = power_to_db(map.at(row, col) / peak).max(min_db);
        // 0 dB at the peak maps to 1.0, min_db to 0.0.
        let t = 1.0 - db / min_db;
        Rectangle::new(
            [(sx - half, sy - half), (sx + half, sy + half)],
            ramp_color(t).filled(),
        )
    }))?;

    root.present()?;
    println!("[plot] Wrote slowness power map to {}", filename);
    Ok(())
}

/// Scatter of CLEAN removal targets in the slowness plane, marker size
/// scaled by removed power.
pub fn plot_clean_history(
    points: &[(f64, f64, f64)],
    grid: &SlownessGrid,
    title: &str,
    filename: &str,
) -> Result<(), DynError> {
    if points.is_empty() {
        return Err("No removal history to plot".into());
    }
    let max_power = points
        .iter()
        .map(|&(_, _, p)| p)
        .fold(f64::NEG_INFINITY, f64::max);
    if !(max_power.is_finite() && max_power > 0.0) {
        return Err("Removal history has no positive power".into());
    }

    let root = BitMapBackend::new(filename, (900, 800)).into_drawing_area();
    root.fill(&WHITE)?;

    let s_lo = grid.smin();
    let s_hi = grid.smax_effective();
    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", scaled_font_size(28)).into_font())
        .margin(10)
        .x_label_area_size(scaled_area_size(40))
        .y_label_area_size(scaled_area_size(60))
        .build_cartesian_2d(s_lo..s_hi, s_lo..s_hi)?;

    chart
        .configure_mesh()
        .x_desc("sx [s/deg]")
        .y_desc("sy [s/deg]")
        .label_style(("sans-serif", scaled_font_size(20)).into_font())
        .axis_desc_style(("sans-serif", scaled_font_size(24)).into_font())
        .light_line_style(WHITE.mix(0.0))
        .draw()?;

    chart.draw_series(points.iter().map(|&(sx, sy, power)| {
        let radius = 2 + (8.0 * (power / max_power).sqrt()).round() as i32;
        Circle::new((sx, sy), radius, RED.mix(0.5).filled())
    }))?;

    root.present()?;
    println!("[plot] Wrote removal history to {}", filename);
    Ok(())
}
