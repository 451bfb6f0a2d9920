use rayon::prelude::*;

use crate::capon::{polarization_maps, steering_vector};
use crate::csdm::{CsdMatrix, CsdmInverter, Inversion, LoadedInverter};
use crate::error::BeamError;
use crate::geom::ArrayGeometry;
use crate::refine::{refine_peak, RefinedPeak};
use crate::slowness::{extract_peak, Channel, PowerMap, SlownessGrid, CHANNEL_COUNT};
use crate::window::{estimate_snapshots, ArrayData};

/// Validated pipeline configuration. Constructed once at entry; every
/// precondition is checked here so the pipeline itself never revalidates.
#[derive(Debug, Clone)]
pub struct CleanConfig {
    /// Subwindow length in samples.
    pub nsamp: usize,
    /// Slowness bounds and increment, s/deg.
    pub smin: f64,
    pub smax: f64,
    pub sinc: f64,
    /// Target frequency bin; physical frequency is `find / (nsamp * dt)`.
    pub find: usize,
    /// Averaging half-bandwidth in bins.
    pub fave: usize,
    /// CLEAN loop gain in (0, 1].
    pub control: f64,
    /// CLEAN iteration count K; 0 is a plain Capon beamform.
    pub iterations: usize,
    /// Nested refinement passes R and per-pass subdivision factor.
    pub refine_depth: usize,
    pub refine_factor: usize,
    /// Diagonal-loading scale for the regularized inversion fallback;
    /// 0 disables the fallback.
    pub loading_scale: f64,
    /// Record per-iteration removal targets.
    pub track_history: bool,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            nsamp: 8000,
            smin: -40.0,
            smax: 40.0,
            sinc: 1.0,
            find: 80,
            fave: 4,
            control: 0.1,
            iterations: 0,
            refine_depth: 2,
            refine_factor: 5,
            loading_scale: 1e-6,
            track_history: false,
        }
    }
}

impl CleanConfig {
    pub fn validate(&self) -> Result<(), BeamError> {
        if self.nsamp == 0 {
            return Err(BeamError::config("nsamp must be positive"));
        }
        SlownessGrid::new(self.smin, self.smax, self.sinc)?;
        let half_len = self.nsamp / 2 + 1;
        if self.find <= self.fave || self.find + self.fave >= half_len {
            return Err(BeamError::config(format!(
                "find {} with fave {} falls outside the half spectrum of nsamp {}",
                self.find, self.fave, self.nsamp
            )));
        }
        if !(self.control > 0.0 && self.control <= 1.0) {
            return Err(BeamError::config(format!(
                "control must lie in (0, 1], got {}",
                self.control
            )));
        }
        if self.refine_depth > 0 && self.refine_factor < 2 {
            return Err(BeamError::config(
                "refine_factor must be at least 2 when refinement is enabled",
            ));
        }
        if !(self.loading_scale >= 0.0 && self.loading_scale.is_finite()) {
            return Err(BeamError::config("loading_scale must be non-negative"));
        }
        Ok(())
    }

    pub fn grid(&self) -> Result<SlownessGrid, BeamError> {
        SlownessGrid::new(self.smin, self.smax, self.sinc)
    }

    pub fn frequency_hz(&self, dt: f64) -> f64 {
        self.find as f64 / (self.nsamp as f64 * dt)
    }

    pub fn bandwidth_hz(&self, dt: f64) -> f64 {
        self.fave as f64 / (self.nsamp as f64 * dt)
    }
}

/// One CLEAN removal, kept when history tracking is on.
#[derive(Debug, Clone, Copy)]
pub struct PeakRemoval {
    pub iteration: usize,
    pub channel: Channel,
    pub sx: f64,
    pub sy: f64,
    pub removed_power: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticFlags {
    /// The diagonal-loading inversion fallback was used at least once.
    pub regularized: bool,
    /// A CSDM became uninvertible mid-run; remaining iterations were
    /// skipped and the accumulated power returned as-is.
    pub aborted: bool,
    /// A refinement pass hit the increment floor before reaching the
    /// configured depth.
    pub refinement_collapsed: bool,
    /// The CSDM trace grew across an iteration, which indicates a sign or
    /// normalization defect and should never happen.
    pub trace_increased: bool,
}

pub struct CleanOutcome {
    pub grid: SlownessGrid,
    /// Residual Capon maps from the final beamforming pass.
    pub residual: [PowerMap; CHANNEL_COUNT],
    /// Power removed by CLEAN, accumulated per grid cell and channel.
    pub deconvolved: [PowerMap; CHANNEL_COUNT],
    /// Refined peak of the final pass, per channel.
    pub final_peaks: [RefinedPeak; CHANNEL_COUNT],
    pub history: Vec<PeakRemoval>,
    pub flags: DiagnosticFlags,
    /// Number of CLEAN removals actually performed (<= configured K).
    pub removals_done: usize,
    /// Largest Hermitian asymmetry observed in any CSDM across the run.
    pub max_hermitian_defect: f64,
    /// Linear power of the vertical-block autocorrelations before any
    /// removal.
    pub vertical_auto_power: f64,
    pub frequency_hz: f64,
    pub bandwidth_hz: f64,
    pub subwindows: usize,
}

/// Run the full pipeline with the default two-stage inversion policy.
pub fn run_clean_capon(
    geometry: &ArrayGeometry,
    data: &ArrayData,
    cfg: &CleanConfig,
) -> Result<CleanOutcome, BeamError> {
    let inverter = LoadedInverter::new(cfg.loading_scale);
    run_clean_capon_with(geometry, data, cfg, &inverter)
}

/// Run the full pipeline with a caller-supplied inversion policy.
///
/// Iterations are strictly sequential: each depends on the CSDM mutated by
/// the previous removal. Within one pass the three channel inversions run
/// in parallel and the grid evaluation parallelises over rows.
pub fn run_clean_capon_with(
    geometry: &ArrayGeometry,
    data: &ArrayData,
    cfg: &CleanConfig,
    inverter: &dyn CsdmInverter,
) -> Result<CleanOutcome, BeamError> {
    cfg.validate()?;
    let nr = geometry.station_count();
    if nr != data.station_count() {
        return Err(BeamError::config(format!(
            "geometry has {nr} stations but dataset has {}",
            data.station_count()
        )));
    }
    let grid = cfg.grid()?;
    let freq = cfg.frequency_hz(data.dt());

    let spectra = estimate_snapshots(data, cfg.nsamp, cfg.find, cfg.fave)?;
    let base = CsdMatrix::from_snapshots(&spectra.snapshots)?;
    let vertical_auto_power = base.block_trace_re(0, nr);

    // One CSDM per output channel; they start identical and diverge as
    // CLEAN removes channel-specific source contributions.
    let mut csdms: [CsdMatrix; CHANNEL_COUNT] = [base.clone(), base.clone(), base];

    let nk = grid.nk();
    let mut deconvolved = [
        PowerMap::zeros(nk),
        PowerMap::zeros(nk),
        PowerMap::zeros(nk),
    ];
    let mut residual = [
        PowerMap::zeros(nk),
        PowerMap::zeros(nk),
        PowerMap::zeros(nk),
    ];
    let mut final_peaks: Option<[RefinedPeak; CHANNEL_COUNT]> = None;
    let mut history = Vec::new();
    let mut flags = DiagnosticFlags::default();
    let mut removals_done = 0usize;
    let mut max_hermitian_defect = 0.0f64;

    for pass in 0..=cfg.iterations {
        // Removal targets come from the previous pass's refined peaks; the
        // removed power is the Bartlett estimate from the current CSDM at
        // that slowness, so a fully removed source stops contributing on
        // later passes.
        if let Some(targets) = final_peaks.filter(|_| pass > 0) {
            for channel in Channel::ALL {
                let c = channel.index();
                let target = targets[c];
                let a = steering_vector(geometry, freq, target.sx, target.sy, channel);
                let bartlett =
                    (csdms[c].quadratic_form(&a).re / (nr * nr) as f64).max(0.0);
                let removed = cfg.control * bartlett;
                let trace_before = csdms[c].trace_re();
                csdms[c].subtract_scaled_outer(&a, removed);
                let trace_after = csdms[c].trace_re();
                if trace_after > trace_before + 1e-9 * trace_before.abs().max(1.0) {
                    flags.trace_increased = true;
                }
                max_hermitian_defect = max_hermitian_defect.max(csdms[c].hermitian_defect());

                let row = grid.nearest_index(target.sy);
                let col = grid.nearest_index(target.sx);
                deconvolved[c].add(row, col, removed);
                if cfg.track_history {
                    history.push(PeakRemoval {
                        iteration: pass,
                        channel,
                        sx: target.sx,
                        sy: target.sy,
                        removed_power: removed,
                    });
                }
            }
            removals_done = pass;
        }

        let inversions: Vec<Result<Inversion, BeamError>> =
            csdms.par_iter().map(|m| inverter.invert(m)).collect();
        let mut icsdms = Vec::with_capacity(CHANNEL_COUNT);
        let mut failed = false;
        for inversion in inversions {
            match inversion {
                Ok(inv) => {
                    flags.regularized |= inv.regularized;
                    icsdms.push(inv.matrix);
                }
                Err(BeamError::IllConditionedMatrix(_)) => {
                    failed = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        if failed {
            // Degenerate CSDM: abort remaining iterations, keep whatever
            // power has been accumulated so far.
            flags.aborted = true;
            break;
        }
        let icsdms: [CsdMatrix; CHANNEL_COUNT] = icsdms
            .try_into()
            .map_err(|_| BeamError::ill_conditioned("channel inversion set incomplete"))?;

        let maps = polarization_maps(&icsdms, geometry, &grid, freq);
        let mut peaks = [RefinedPeak {
            sx: 0.0,
            sy: 0.0,
            power: 0.0,
            collapsed: false,
        }; CHANNEL_COUNT];
        for channel in Channel::ALL {
            let c = channel.index();
            let coarse = extract_peak(&maps[c], &grid);
            let refined = if cfg.refine_depth > 0 {
                refine_peak(
                    &icsdms[c],
                    geometry,
                    freq,
                    channel,
                    coarse,
                    grid.sinc(),
                    cfg.refine_depth,
                    cfg.refine_factor,
                )
            } else {
                RefinedPeak::from(coarse)
            };
            flags.refinement_collapsed |= refined.collapsed;
            peaks[c] = refined;
        }
        residual = maps;
        final_peaks = Some(peaks);
    }

    let final_peaks = final_peaks.unwrap_or(
        [RefinedPeak {
            sx: 0.0,
            sy: 0.0,
            power: 0.0,
            collapsed: false,
        }; CHANNEL_COUNT],
    );

    Ok(CleanOutcome {
        grid,
        residual,
        deconvolved,
        final_peaks,
        history,
        flags,
        removals_done,
        max_hermitian_defect,
        vertical_auto_power,
        frequency_hz: freq,
        bandwidth_hz: cfg.bandwidth_hz(data.dt()),
        subwindows: spectra.subwindow_count,
    })
}
