mod args;
mod capon;
mod clean;
mod csdm;
mod error;
mod geom;
mod plot;
mod refine;
mod sac;
mod slowness;
mod synth;
mod utils;
mod window;

use std::collections::BTreeMap;
use std::path::Path;

use clap::{CommandFactory, Parser};

use clean::{run_clean_capon, CleanOutcome};
use geom::ArrayGeometry;
use plot::{plot_clean_history, plot_power_map};
use sac::{read_sac, SacTrace};
use slowness::Channel;
use synth::{plane_wave_data, SyntheticSource};
use utils::{power_to_db, DynError};
use window::ArrayData;

/// Traces for one station, filled component by component as SAC files are
/// matched against the three suffixes.
#[derive(Default)]
struct StationTraces {
    components: [Option<SacTrace>; 3],
}

fn match_component(file_stem: &str, args: &args::Args) -> Option<usize> {
    let stem = file_stem.to_ascii_lowercase();
    for (c, suffix) in [&args.suffix_z, &args.suffix_h1, &args.suffix_h2]
        .iter()
        .enumerate()
    {
        if stem.ends_with(&suffix.to_ascii_lowercase()) {
            return Some(c);
        }
    }
    None
}

fn load_sac_directory(
    dir: &Path,
    args: &args::Args,
) -> Result<(ArrayGeometry, ArrayData), DynError> {
    let mut stations: BTreeMap<String, StationTraces> = BTreeMap::new();
    let mut skipped = 0usize;
    for entry in std::fs::read_dir(dir)
        .map_err(|e| format!("failed to read data directory {}: {e}", dir.display()))?
    {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(component) = match_component(stem, args) else {
            skipped += 1;
            continue;
        };
        let trace = read_sac(&path)
            .map_err(|e| format!("failed to parse {}: {e}", path.display()))?;
        let key = if trace.station.is_empty() {
            stem.to_string()
        } else {
            trace.station.clone()
        };
        let slot = &mut stations.entry(key.clone()).or_default().components[component];
        if slot.is_some() {
            return Err(format!(
                "duplicate {} component for station {key} ({})",
                Channel::ALL[component].label(),
                path.display()
            )
            .into());
        }
        *slot = Some(trace);
    }
    if skipped > 0 {
        println!("[info] Skipped {skipped} file(s) not matching any component suffix.");
    }
    if stations.is_empty() {
        return Err(format!("no SAC files matched in {}", dir.display()).into());
    }

    // BTreeMap keeps stations in name order; the first becomes the
    // geometric reference.
    let mut names = Vec::new();
    let mut lats = Vec::new();
    let mut lons = Vec::new();
    let mut vertical = Vec::new();
    let mut horizontal1 = Vec::new();
    let mut horizontal2 = Vec::new();
    let mut dt: Option<f64> = None;
    let mut min_npts = usize::MAX;

    for (name, traces) in stations {
        let [z, h1, h2] = traces.components;
        let (Some(z), Some(h1), Some(h2)) = (z, h1, h2) else {
            return Err(format!("station {name} is missing one or more components").into());
        };
        for trace in [&z, &h1, &h2] {
            match dt {
                None => dt = Some(trace.delta),
                Some(reference) => {
                    if (trace.delta - reference).abs() > 1e-9 * reference {
                        return Err(format!(
                            "sampling interval mismatch at station {name}: {} vs {reference}",
                            trace.delta
                        )
                        .into());
                    }
                }
            }
            min_npts = min_npts.min(trace.data.len());
        }
        for horizontal in [&h1, &h2] {
            if (z.stla - horizontal.stla).abs() > 1e-6
                || (z.stlo - horizontal.stlo).abs() > 1e-6
            {
                return Err(format!("station {name} components disagree on coordinates").into());
            }
        }
        names.push(name);
        lats.push(z.stla);
        lons.push(z.stlo);
        vertical.push(z.data);
        horizontal1.push(h1.data);
        horizontal2.push(h2.data);
    }
    let Some(dt) = dt else {
        return Err("no traces loaded".into());
    };

    for component in [&mut vertical, &mut horizontal1, &mut horizontal2] {
        for trace in component.iter_mut() {
            trace.truncate(min_npts);
        }
    }

    println!(
        "[info] Loaded {} station(s): {}",
        names.len(),
        names.join(" ")
    );
    println!(
        "[info] Common record length {min_npts} samples at dt = {dt} s (traces truncated to the shortest)."
    );

    let geometry = ArrayGeometry::from_latlon_deg(&lats, &lons)?;
    let data = ArrayData::new(vertical, horizontal1, horizontal2, dt)?;
    Ok((geometry, data))
}

/// Built-in two-source demo used by --synth, sized so the default grid and
/// frequency settings resolve both arrivals.
fn synthetic_dataset(cfg: &clean::CleanConfig) -> Result<(ArrayGeometry, ArrayData), DynError> {
    let geometry = ArrayGeometry::from_offsets_deg(
        vec![0.0, 0.21, -0.17, 0.08, -0.29, 0.25, -0.11],
        vec![0.0, -0.12, 0.25, 0.31, -0.06, 0.18, -0.27],
    )?;
    let dt = 0.05;
    let sources = [
        SyntheticSource {
            sx: 12.0,
            sy: -8.0,
            frequency_hz: (cfg.find.saturating_sub(1)) as f64 / (cfg.nsamp as f64 * dt),
            amplitude: [1.0, 0.7, 0.5],
            phase: 0.4,
        },
        SyntheticSource {
            sx: -15.0,
            sy: 6.0,
            frequency_hz: (cfg.find + 1) as f64 / (cfg.nsamp as f64 * dt),
            amplitude: [0.7, 0.9, 0.6],
            phase: 1.9,
        },
    ];
    println!("[info] Synthetic mode: two plane waves at (12, -8) and (-15, 6) s/deg.");
    // Coherence shorter than a subwindow keeps sources and components
    // mutually incoherent across the estimation windows.
    let coherence = cfg.nsamp as f64 * dt / 8.0;
    let data = plane_wave_data(&geometry, &sources, dt, 8 * cfg.nsamp, 0.01, coherence, 20260826)?;
    Ok((geometry, data))
}

fn report_outcome(outcome: &CleanOutcome, args: &args::Args) {
    println!(
        "[info] Analysed {} subwindow(s) at {:.6} Hz (+/- {:.6} Hz averaging band).",
        outcome.subwindows, outcome.frequency_hz, outcome.bandwidth_hz
    );
    println!(
        "[info] Vertical auto-power before deconvolution: {:.2} dB",
        power_to_db(outcome.vertical_auto_power)
    );
    if outcome.removals_done > 0 {
        println!(
            "[info] CLEAN performed {} removal pass(es).",
            outcome.removals_done
        );
        for channel in Channel::ALL {
            let c = channel.index();
            let total = outcome.deconvolved[c].sum();
            let (row, col, peak) = outcome.deconvolved[c].argmax();
            if peak > 0.0 {
                println!(
                    "[info] {}: deconvolved total {:.2} dB, strongest source {:.2} dB at ({}, {}) s/deg",
                    channel.label(),
                    power_to_db(total),
                    power_to_db(peak),
                    outcome.grid.value(col),
                    outcome.grid.value(row)
                );
            }
        }
    }
    if args.show_peak_info {
        for channel in Channel::ALL {
            let peak = outcome.final_peaks[channel.index()];
            println!(
                "[info] {} residual peak: sx = {:.4}, sy = {:.4} s/deg, power = {:.6e}",
                channel.label(),
                peak.sx,
                peak.sy,
                peak.power
            );
        }
    }
    if args.show_clean_hist {
        for removal in &outcome.history {
            println!(
                "[info]   iter {:3} {}: ({:.4}, {:.4}) s/deg, removed {:.6e}",
                removal.iteration,
                removal.channel.label(),
                removal.sx,
                removal.sy,
                removal.removed_power
            );
        }
    }
    if outcome.flags.regularized {
        println!("[warn] Diagonal loading was applied to invert an ill-conditioned CSDM.");
    }
    if outcome.flags.aborted {
        println!(
            "[warn] CSDM became uninvertible after {} removal pass(es); remaining iterations skipped.",
            outcome.removals_done
        );
    }
    if outcome.flags.refinement_collapsed {
        println!("[warn] Peak refinement hit the increment floor before the configured depth.");
    }
    if outcome.flags.trace_increased {
        println!("[warn] CSDM trace increased during CLEAN; results are suspect.");
    }
}

fn write_plots(outcome: &CleanOutcome, args: &args::Args) -> Result<(), DynError> {
    std::fs::create_dir_all(&args.outdir)
        .map_err(|e| format!("failed to create {}: {e}", args.outdir.display()))?;
    for channel in Channel::ALL {
        let c = channel.index();
        let residual_file = args
            .outdir
            .join(format!("residual_{}.png", channel.label().to_ascii_lowercase()));
        plot_power_map(
            &outcome.residual[c],
            &outcome.grid,
            &format!("Residual Capon power ({})", channel.label()),
            &residual_file.to_string_lossy(),
            args.min_db,
        )?;
        if outcome.removals_done > 0 && outcome.deconvolved[c].max_value() > 0.0 {
            let clean_file = args
                .outdir
                .join(format!("clean_{}.png", channel.label().to_ascii_lowercase()));
            plot_power_map(
                &outcome.deconvolved[c],
                &outcome.grid,
                &format!("Deconvolved power ({})", channel.label()),
                &clean_file.to_string_lossy(),
                args.min_db,
            )?;
        }
    }
    if !outcome.history.is_empty() {
        let points: Vec<(f64, f64, f64)> = outcome
            .history
            .iter()
            .map(|r| (r.sx, r.sy, r.removed_power))
            .collect();
        let history_file = args.outdir.join("clean_history.png");
        plot_clean_history(
            &points,
            &outcome.grid,
            "CLEAN removal history",
            &history_file.to_string_lossy(),
        )?;
    }
    Ok(())
}

fn main() -> Result<(), DynError> {
    if std::env::args_os().len() == 1 {
        args::Args::command().print_help()?;
        println!();
        return Ok(());
    }

    let args = args::Args::parse();
    if args.cpu == 0 {
        return Err("--cpu must be at least 1".into());
    }
    let available_cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if args.cpu > available_cores {
        return Err(format!(
            "--cpu value ({}) exceeds the number of available cores ({available_cores})",
            args.cpu
        )
        .into());
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(args.cpu)
        .build_global()?;

    let cfg = args.build_config()?;

    // Capon against a finite-snapshot CSDM estimate resolves direction well
    // but biases absolute power low; treat the dB levels as relative.
    println!("[info] Power levels are relative; Capon underestimates absolute source power.");

    let (geometry, mut data) = if let Some(dir) = &args.data {
        load_sac_directory(dir, &args)?
    } else if args.synth {
        synthetic_dataset(&cfg)?
    } else {
        return Err("either --data <dir> or --synth is required".into());
    };
    if let Some(gain) = args.gain {
        data.remove_gain(gain)?;
    }

    println!(
        "[info] Array aperture {:.4} deg, {} station(s); slowness grid [{}, {}] step {} ({} x {} points).",
        geometry.aperture_deg(),
        geometry.station_count(),
        args.smin,
        args.smax,
        args.sinc,
        cfg.grid()?.nk(),
        cfg.grid()?.nk()
    );
    println!(
        "[info] nsamp = {}, find = {}, fave = {}, control = {}, iterations = {}.",
        cfg.nsamp, cfg.find, cfg.fave, cfg.control, cfg.iterations
    );

    let outcome = run_clean_capon(&geometry, &data, &cfg)?;
    report_outcome(&outcome, &args);

    if args.plot {
        write_plots(&outcome, &args)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sac_bytes(station: &str, delta: f32, stla: f32, stlo: f32, npts: usize) -> Vec<u8> {
        let mut buf = vec![0u8; 632 + 4 * npts];
        buf[0..4].copy_from_slice(&delta.to_le_bytes());
        buf[124..128].copy_from_slice(&stla.to_le_bytes());
        buf[128..132].copy_from_slice(&stlo.to_le_bytes());
        buf[304..308].copy_from_slice(&6i32.to_le_bytes());
        buf[316..320].copy_from_slice(&(npts as i32).to_le_bytes());
        let mut kstnm = [b' '; 8];
        kstnm[..station.len()].copy_from_slice(station.as_bytes());
        buf[440..448].copy_from_slice(&kstnm);
        buf
    }

    #[test]
    fn mismatched_station_coordinates_are_rejected() {
        let dir = std::env::temp_dir().join(format!("cc_sac_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let write = |name: &str, bytes: Vec<u8>| {
            std::fs::write(dir.join(name), bytes).unwrap();
        };
        write("sta1z.sac", sac_bytes("STA1", 0.05, 10.0, 20.0, 4));
        write("sta1n.sac", sac_bytes("STA1", 0.05, 10.0, 20.0, 4));
        write("sta1e.sac", sac_bytes("STA1", 0.05, 10.0, 20.0, 4));
        write("sta2z.sac", sac_bytes("STA2", 0.05, 10.0, 20.5, 4));
        write("sta2n.sac", sac_bytes("STA2", 0.05, 10.0, 20.5, 4));
        // H2 disagrees with Z on latitude only; every coordinate of every
        // horizontal must be checked against the vertical.
        write("sta2e.sac", sac_bytes("STA2", 0.05, 10.5, 20.5, 4));

        let args = args::Args::parse_from(["clean_capon", "--data", dir.to_str().unwrap()]);
        let err = load_sac_directory(&dir, &args).unwrap_err();
        assert!(
            err.to_string().contains("coordinates"),
            "unexpected error: {err}"
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
