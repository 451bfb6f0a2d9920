use std::f64::consts::PI;

use num_complex::Complex;
use rayon::prelude::*;

use crate::csdm::CsdMatrix;
use crate::geom::ArrayGeometry;
use crate::slowness::{Channel, PowerMap, SlownessGrid, CHANNEL_COUNT};

/// Per-station steering phases `exp(i * 2*pi*freq * (sx*rx + sy*ry))`,
/// length N. The phases are identical for every channel; only the block
/// they occupy in the 3N vector differs.
pub fn steering_phases(
    geometry: &ArrayGeometry,
    freq: f64,
    sx: f64,
    sy: f64,
) -> Vec<Complex<f64>> {
    let k = 2.0 * PI * freq;
    geometry
        .rx()
        .iter()
        .zip(geometry.ry().iter())
        .map(|(&rx, &ry)| Complex::from_polar(1.0, k * (sx * rx + sy * ry)))
        .collect()
}

/// Full 3N steering vector for one channel: the station phases in the
/// channel's block, zero elsewhere.
pub fn steering_vector(
    geometry: &ArrayGeometry,
    freq: f64,
    sx: f64,
    sy: f64,
    channel: Channel,
) -> Vec<Complex<f64>> {
    let nr = geometry.station_count();
    let phases = steering_phases(geometry, freq, sx, sy);
    let mut a = vec![Complex::new(0.0, 0.0); 3 * nr];
    let base = channel.index() * nr;
    a[base..base + nr].copy_from_slice(&phases);
    a
}

/// Capon power for one channel from precomputed station phases:
/// `P = 1 / Re(a^H R^-1 a)` on the channel's diagonal block of the full
/// inverse. An indefinite residual (possible after aggressive CLEAN
/// removal) would make the form non-positive; that maps to zero power.
pub fn channel_power(
    icsdm: &CsdMatrix,
    nr: usize,
    channel: Channel,
    phases: &[Complex<f64>],
) -> f64 {
    let denom = icsdm
        .block_quadratic_form(channel.index(), nr, phases)
        .re;
    if denom <= 0.0 {
        0.0
    } else {
        1.0 / denom
    }
}

/// Capon power at a single slowness for one channel.
#[allow(dead_code)]
pub fn power_at(
    icsdm: &CsdMatrix,
    geometry: &ArrayGeometry,
    freq: f64,
    channel: Channel,
    sx: f64,
    sy: f64,
) -> f64 {
    let phases = steering_phases(geometry, freq, sx, sy);
    channel_power(icsdm, geometry.station_count(), channel, &phases)
}

/// Full-grid power maps for the three channels from the inverted CSDMs.
///
/// Grid points are independent and read-only over the inverses, so rows are
/// distributed across the rayon pool; the steering phases for a point are
/// computed once and shared by all three channels.
pub fn polarization_maps(
    icsdms: &[CsdMatrix; CHANNEL_COUNT],
    geometry: &ArrayGeometry,
    grid: &SlownessGrid,
    freq: f64,
) -> [PowerMap; CHANNEL_COUNT] {
    let nk = grid.nk();
    let nr = geometry.station_count();
    let mut maps = [
        PowerMap::zeros(nk),
        PowerMap::zeros(nk),
        PowerMap::zeros(nk),
    ];

    // Split into per-channel row slices so each channel's map can be filled
    // from the shared per-point phases in one pass.
    let [map_z, map_h1, map_h2] = &mut maps;
    map_z
        .values_mut()
        .par_chunks_mut(nk)
        .zip(map_h1.values_mut().par_chunks_mut(nk))
        .zip(map_h2.values_mut().par_chunks_mut(nk))
        .enumerate()
        .for_each(|(row, ((out_z, out_h1), out_h2))| {
            let sy = grid.value(row);
            for col in 0..nk {
                let sx = grid.value(col);
                let phases = steering_phases(geometry, freq, sx, sy);
                out_z[col] = channel_power(&icsdms[0], nr, Channel::Vertical, &phases);
                out_h1[col] = channel_power(&icsdms[1], nr, Channel::Horizontal1, &phases);
                out_h2[col] = channel_power(&icsdms[2], nr, Channel::Horizontal2, &phases);
            }
        });
    maps
}

#[cfg(test)]
mod tests {
    use super::{polarization_maps, power_at, steering_phases, steering_vector};
    use crate::csdm::{CsdMatrix, CsdmInverter, LoadedInverter};
    use crate::geom::ArrayGeometry;
    use crate::slowness::{extract_peak, Channel, SlownessGrid};
    use num_complex::Complex;

    pub(crate) fn test_geometry() -> ArrayGeometry {
        ArrayGeometry::from_offsets_deg(
            vec![0.0, 0.21, -0.17, 0.08, -0.29],
            vec![0.0, -0.12, 0.25, 0.31, -0.06],
        )
        .unwrap()
    }

    /// CSDM of a single plane wave present on all three components, with
    /// snapshot-to-snapshot phase rotation as between overlapping windows.
    fn plane_wave_csdm(
        geometry: &ArrayGeometry,
        freq: f64,
        sx: f64,
        sy: f64,
        amplitude: f64,
    ) -> CsdMatrix {
        let nr = geometry.station_count();
        let phases = steering_phases(geometry, freq, sx, sy);
        let snapshots: Vec<Vec<Complex<f64>>> = (0..12)
            .map(|k| {
                let rot = Complex::from_polar(amplitude, 0.61803 * k as f64);
                let mut snap = vec![Complex::new(0.0, 0.0); 3 * nr];
                for c in 0..3 {
                    for s in 0..nr {
                        snap[c * nr + s] = phases[s] * rot;
                    }
                }
                snap
            })
            .collect();
        CsdMatrix::from_snapshots(&snapshots).unwrap()
    }

    #[test]
    fn steering_is_all_ones_at_zero_slowness() {
        let geometry = test_geometry();
        let phases = steering_phases(&geometry, 0.5, 0.0, 0.0);
        for p in &phases {
            assert!((p - Complex::new(1.0, 0.0)).norm() < 1e-12);
        }
    }

    #[test]
    fn steering_vector_occupies_only_the_channel_block() {
        let geometry = test_geometry();
        let a = steering_vector(&geometry, 0.5, 3.0, -2.0, Channel::Horizontal1);
        assert_eq!(a.len(), 15);
        for (i, v) in a.iter().enumerate() {
            if (5..10).contains(&i) {
                assert!((v.norm() - 1.0).abs() < 1e-12);
            } else {
                assert_eq!(v.norm(), 0.0);
            }
        }
    }

    #[test]
    fn identity_csdm_gives_uniform_power_one_over_n() {
        let geometry = test_geometry();
        let nr = geometry.station_count();
        let mut identity = CsdMatrix::zeros(3 * nr);
        for i in 0..3 * nr {
            identity.set(i, i, Complex::new(1.0, 0.0));
        }
        // inverse of I is I
        for channel in Channel::ALL {
            let p = power_at(&identity, &geometry, 0.5, channel, 7.0, -3.0);
            assert!((p - 1.0 / nr as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn single_plane_wave_peaks_within_one_grid_increment() {
        let geometry = test_geometry();
        let freq = 0.2;
        let (sx0, sy0) = (12.0, -8.0);
        let csdm = plane_wave_csdm(&geometry, freq, sx0, sy0, 1.0);
        let inv = LoadedInverter::new(1e-6).invert(&csdm).unwrap().matrix;
        let icsdms = [inv.clone(), inv.clone(), inv];

        let grid = SlownessGrid::new(-40.0, 40.0, 4.0).unwrap();
        let maps = polarization_maps(&icsdms, &geometry, &grid, freq);
        for (channel, map) in Channel::ALL.iter().zip(maps.iter()) {
            let peak = extract_peak(map, &grid);
            assert!(
                (peak.sx - sx0).abs() <= grid.sinc() && (peak.sy - sy0).abs() <= grid.sinc(),
                "{} peak at ({}, {}), expected near ({sx0}, {sy0})",
                channel.label(),
                peak.sx,
                peak.sy
            );
        }
    }
}
