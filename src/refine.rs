use crate::capon::{channel_power, steering_phases};
use crate::csdm::CsdMatrix;
use crate::geom::ArrayGeometry;
use crate::slowness::{Channel, GridPeak};

/// Refinement increments below this are numerically meaningless for
/// slowness in s/deg; the search stops early and flags the collapse.
const INCREMENT_FLOOR: f64 = 1e-12;

#[derive(Debug, Clone, Copy)]
pub struct RefinedPeak {
    pub sx: f64,
    pub sy: f64,
    pub power: f64,
    pub collapsed: bool,
}

impl From<GridPeak> for RefinedPeak {
    fn from(peak: GridPeak) -> Self {
        Self {
            sx: peak.sx,
            sy: peak.sy,
            power: peak.power,
            collapsed: false,
        }
    }
}

/// Nested local grid search around a coarse peak.
///
/// Each pass spans +/- the parent increment around the current best
/// estimate with the increment divided by `factor`, i.e. a
/// (2*factor + 1)^2 local grid, and re-evaluates the Capon power only
/// there. After `depth` passes the effective resolution is
/// `coarse_inc / factor^depth`. Ties resolve to the lowest row-major
/// local index, like the full-grid peak extraction.
pub fn refine_peak(
    icsdm: &CsdMatrix,
    geometry: &ArrayGeometry,
    freq: f64,
    channel: Channel,
    coarse: GridPeak,
    coarse_inc: f64,
    depth: usize,
    factor: usize,
) -> RefinedPeak {
    let nr = geometry.station_count();
    let mut best = RefinedPeak::from(coarse);
    let mut parent_inc = coarse_inc;

    for _ in 0..depth {
        let local_inc = parent_inc / factor as f64;
        if local_inc < INCREMENT_FLOOR {
            best.collapsed = true;
            break;
        }
        let span = factor as isize;
        let (cx, cy) = (best.sx, best.sy);
        for iy in -span..=span {
            let sy = cy + iy as f64 * local_inc;
            for ix in -span..=span {
                let sx = cx + ix as f64 * local_inc;
                let phases = steering_phases(geometry, freq, sx, sy);
                let power = channel_power(icsdm, nr, channel, &phases);
                if power > best.power {
                    best = RefinedPeak {
                        sx,
                        sy,
                        power,
                        collapsed: best.collapsed,
                    };
                }
            }
        }
        parent_inc = local_inc;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::refine_peak;
    use crate::capon::{polarization_maps, steering_phases};
    use crate::csdm::{CsdMatrix, CsdmInverter, LoadedInverter};
    use crate::geom::ArrayGeometry;
    use crate::slowness::{extract_peak, Channel, SlownessGrid};
    use num_complex::Complex;
    use std::f64::consts::PI;

    fn geometry() -> ArrayGeometry {
        ArrayGeometry::from_offsets_deg(
            vec![0.0, 0.21, -0.17, 0.08, -0.29],
            vec![0.0, -0.12, 0.25, 0.31, -0.06],
        )
        .unwrap()
    }

    fn plane_wave_inverse(geometry: &ArrayGeometry, freq: f64, sx: f64, sy: f64) -> CsdMatrix {
        let nr = geometry.station_count();
        let phases = steering_phases(geometry, freq, sx, sy);
        // Orthogonal per-component rotations over 12 snapshots zero the
        // cross-component blocks of the averaged CSDM, as for mutually
        // incoherent components.
        let snapshots: Vec<Vec<Complex<f64>>> = (0..12)
            .map(|k| {
                let mut snap = vec![Complex::new(0.0, 0.0); 3 * nr];
                for c in 0..3 {
                    let rot =
                        Complex::from_polar(1.0, 1.1 * k as f64 + 2.0 * PI * (k * c) as f64 / 3.0);
                    for s in 0..nr {
                        snap[c * nr + s] = phases[s] * rot;
                    }
                }
                snap
            })
            .collect();
        let csdm = CsdMatrix::from_snapshots(&snapshots).unwrap();
        LoadedInverter::new(1e-6).invert(&csdm).unwrap().matrix
    }

    #[test]
    fn refinement_recovers_off_grid_slowness() {
        let geometry = geometry();
        let freq = 0.2;
        // Deliberately between the 2 s/deg grid nodes.
        let (sx0, sy0) = (13.4, -6.7);
        let inv = plane_wave_inverse(&geometry, freq, sx0, sy0);
        let icsdms = [inv.clone(), inv.clone(), inv.clone()];

        let grid = SlownessGrid::new(-20.0, 20.0, 2.0).unwrap();
        let maps = polarization_maps(&icsdms, &geometry, &grid, freq);
        let coarse = extract_peak(&maps[0], &grid);
        let coarse_err = (coarse.sx - sx0).abs().max((coarse.sy - sy0).abs());
        assert!(coarse_err <= grid.sinc());

        let depth = 3;
        let factor = 5;
        let refined = refine_peak(
            &inv,
            &geometry,
            freq,
            Channel::Vertical,
            coarse,
            grid.sinc(),
            depth,
            factor,
        );
        assert!(!refined.collapsed);
        let tol = grid.sinc() / (factor as f64).powi(depth as i32) * 1.5;
        assert!(
            (refined.sx - sx0).abs() < tol && (refined.sy - sy0).abs() < tol,
            "refined to ({}, {}), expected ({sx0}, {sy0}) within {tol}",
            refined.sx,
            refined.sy
        );
        assert!(refined.power >= coarse.power);
    }

    #[test]
    fn collapsing_increment_sets_the_degenerate_flag() {
        let geometry = geometry();
        let freq = 0.2;
        let inv = plane_wave_inverse(&geometry, freq, 8.0, 0.0);
        let grid = SlownessGrid::new(-40.0, 40.0, 4.0).unwrap();
        let maps = polarization_maps(
            &[inv.clone(), inv.clone(), inv.clone()],
            &geometry,
            &grid,
            freq,
        );
        let coarse = extract_peak(&maps[0], &grid);
        let refined = refine_peak(
            &inv,
            &geometry,
            freq,
            Channel::Vertical,
            coarse,
            grid.sinc(),
            40,
            10,
        );
        assert!(refined.collapsed);
        // Still returns the best estimate found so far.
        assert!((refined.sx - 8.0).abs() < grid.sinc());
    }
}
