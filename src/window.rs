use num_complex::Complex;

use crate::error::BeamError;
use crate::utils::{hanning_window, remove_mean, FftHelper};

/// Synchronised three-component recordings for the whole array.
///
/// Outer index is the station (same order as the geometry, reference
/// station first), inner index is the sample. All traces share one sampling
/// interval and sample count; the constructor enforces the input contract
/// so the numerical pipeline never has to re-check it.
#[derive(Debug, Clone)]
pub struct ArrayData {
    vertical: Vec<Vec<f64>>,
    horizontal1: Vec<Vec<f64>>,
    horizontal2: Vec<Vec<f64>>,
    dt: f64,
}

impl ArrayData {
    pub fn new(
        vertical: Vec<Vec<f64>>,
        horizontal1: Vec<Vec<f64>>,
        horizontal2: Vec<Vec<f64>>,
        dt: f64,
    ) -> Result<Self, BeamError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(BeamError::config("sampling interval dt must be positive"));
        }
        let nr = vertical.len();
        if nr == 0 {
            return Err(BeamError::config("no stations in dataset"));
        }
        if horizontal1.len() != nr || horizontal2.len() != nr {
            return Err(BeamError::config(format!(
                "component datasets reference different station counts: Z={nr}, H1={}, H2={}",
                horizontal1.len(),
                horizontal2.len()
            )));
        }
        let npts = vertical[0].len();
        for (label, component) in [
            ("Z", &vertical),
            ("H1", &horizontal1),
            ("H2", &horizontal2),
        ] {
            for (station, trace) in component.iter().enumerate() {
                if trace.len() != npts {
                    return Err(BeamError::config(format!(
                        "{label} trace at station {station} has {} samples, expected {npts}",
                        trace.len()
                    )));
                }
            }
        }
        Ok(Self {
            vertical,
            horizontal1,
            horizontal2,
            dt,
        })
    }

    pub fn station_count(&self) -> usize {
        self.vertical.len()
    }

    pub fn samples(&self) -> usize {
        self.vertical[0].len()
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn component(&self, c: usize) -> &[Vec<f64>] {
        match c {
            0 => &self.vertical,
            1 => &self.horizontal1,
            _ => &self.horizontal2,
        }
    }

    /// Flat gain correction applied uniformly to every trace.
    pub fn remove_gain(&mut self, gain: f64) -> Result<(), BeamError> {
        if !(gain.is_finite() && gain != 0.0) {
            return Err(BeamError::config("gain must be finite and non-zero"));
        }
        let scale = 1.0 / gain;
        for component in [
            &mut self.vertical,
            &mut self.horizontal1,
            &mut self.horizontal2,
        ] {
            for trace in component.iter_mut() {
                for value in trace.iter_mut() {
                    *value *= scale;
                }
            }
        }
        Ok(())
    }
}

/// Complex Fourier coefficients per subwindow and retained frequency bin,
/// stacked into length-3N vectors with layout `component * N + station`.
#[derive(Debug)]
pub struct SpectralSnapshots {
    pub snapshots: Vec<Vec<Complex<f64>>>,
    pub subwindow_count: usize,
    pub bin_count: usize,
}

/// Number of 50%-overlap subwindows of length `nsamp` in `total` samples.
pub fn subwindow_count(total: usize, nsamp: usize) -> isize {
    2 * (total / nsamp) as isize - 1
}

/// Slice, demean, Hann-taper and Fourier-transform every trace, keeping the
/// coefficients at bins `find - fave ..= find + fave`.
pub fn estimate_snapshots(
    data: &ArrayData,
    nsamp: usize,
    find: usize,
    fave: usize,
) -> Result<SpectralSnapshots, BeamError> {
    let nr = data.station_count();
    let total = data.samples();
    if nsamp == 0 {
        return Err(BeamError::config("subwindow length must be positive"));
    }
    if total < nsamp {
        return Err(BeamError::config(format!(
            "time series too short: {total} samples yield zero subwindows of length {nsamp}"
        )));
    }
    let nwin = subwindow_count(total, nsamp);
    if nwin < 2 {
        return Err(BeamError::insufficient(format!(
            "{nwin} subwindow(s) available, at least 2 required for a stable CSDM estimate"
        )));
    }
    let nwin = nwin as usize;
    let half_len = nsamp / 2 + 1;
    // The averaging band must sit inside the half spectrum and clear of DC.
    if find <= fave || find + fave >= half_len {
        return Err(BeamError::config(format!(
            "frequency bins {}..={} fall outside the half spectrum 0..{}",
            find.saturating_sub(fave),
            find + fave,
            half_len - 1
        )));
    }
    let bin_lo = find - fave;
    let bin_hi = find + fave;
    let bin_count = bin_hi - bin_lo + 1;

    let helper = FftHelper::new(nsamp);
    let taper = hanning_window(nsamp);
    let stride = nsamp / 2;

    let mut snapshots = vec![vec![Complex::new(0.0, 0.0); 3 * nr]; nwin * bin_count];
    let mut buffer = vec![0.0; nsamp];
    let mut spectrum = vec![Complex::new(0.0, 0.0); half_len];

    for component in 0..3 {
        let traces = data.component(component);
        for (station, trace) in traces.iter().enumerate() {
            let flat = component * nr + station;
            for win in 0..nwin {
                let start = win * stride;
                buffer.copy_from_slice(&trace[start..start + nsamp]);
                remove_mean(&mut buffer);
                for (value, w) in buffer.iter_mut().zip(taper.iter()) {
                    *value *= w;
                }
                helper
                    .forward_r2c_process(&mut buffer, &mut spectrum)
                    .map_err(|e| BeamError::config(format!("FFT failed: {e}")))?;
                for (slot, bin) in (bin_lo..=bin_hi).enumerate() {
                    snapshots[win * bin_count + slot][flat] = spectrum[bin];
                }
            }
        }
    }

    Ok(SpectralSnapshots {
        snapshots,
        subwindow_count: nwin,
        bin_count,
    })
}

#[cfg(test)]
mod tests {
    use super::{estimate_snapshots, subwindow_count, ArrayData};
    use std::f64::consts::PI;

    fn tone_data(nr: usize, npts: usize, bin: usize, nsamp: usize, delays: &[f64]) -> ArrayData {
        let dt = 0.05;
        let freq = bin as f64 / (nsamp as f64 * dt);
        let make = |delay: f64| -> Vec<f64> {
            (0..npts)
                .map(|i| (2.0 * PI * freq * (i as f64 * dt - delay)).cos())
                .collect()
        };
        let traces: Vec<Vec<f64>> = delays.iter().map(|&d| make(d)).collect();
        ArrayData::new(traces.clone(), traces.clone(), traces, dt).unwrap()
    }

    #[test]
    fn overlap_window_count_matches_formula() {
        assert_eq!(subwindow_count(4 * 800, 800), 7);
        assert_eq!(subwindow_count(800, 800), 1);
        assert_eq!(subwindow_count(799, 800), -1);
    }

    #[test]
    fn too_short_series_is_a_configuration_error() {
        let data = tone_data(2, 256, 8, 512, &[0.0, 0.0]);
        let err = estimate_snapshots(&data, 512, 8, 0).unwrap_err();
        assert!(matches!(err, crate::error::BeamError::Configuration(_)));
    }

    #[test]
    fn single_subwindow_is_insufficient_data() {
        let data = tone_data(2, 512, 8, 512, &[0.0, 0.0]);
        let err = estimate_snapshots(&data, 512, 8, 0).unwrap_err();
        assert!(matches!(err, crate::error::BeamError::InsufficientData(_)));
    }

    #[test]
    fn snapshot_layout_is_component_major() {
        let data = tone_data(3, 2048, 16, 512, &[0.0, 0.0, 0.0]);
        let spectra = estimate_snapshots(&data, 512, 16, 1).unwrap();
        assert_eq!(spectra.subwindow_count, 7);
        assert_eq!(spectra.bin_count, 3);
        assert_eq!(spectra.snapshots.len(), 21);
        assert_eq!(spectra.snapshots[0].len(), 9);
    }

    #[test]
    fn inter_station_phase_tracks_the_delay() {
        let nsamp = 512;
        let bin = 16;
        let dt = 0.05;
        let freq = bin as f64 / (nsamp as f64 * dt);
        let delay = 0.4;
        let data = tone_data(2, 2048, bin, nsamp, &[0.0, delay]);
        let spectra = estimate_snapshots(&data, nsamp, bin, 0).unwrap();
        let snap = &spectra.snapshots[0];
        // Delayed trace picks up exp(-i 2 pi f tau) relative to the reference.
        let ratio = snap[1] / snap[0];
        let expected = -2.0 * PI * freq * delay;
        let mut diff = ratio.arg() - expected;
        while diff > PI {
            diff -= 2.0 * PI;
        }
        while diff < -PI {
            diff += 2.0 * PI;
        }
        assert!(diff.abs() < 0.05, "phase mismatch: {diff}");
    }
}
