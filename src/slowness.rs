use crate::error::BeamError;

pub const CHANNEL_COUNT: usize = 3;

/// Output channel of the 3-component beamformer. The core treats the three
/// channels as interchangeable parallel estimators in the raw sensor frame;
/// any rotation of the horizontals happens upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Vertical,
    Horizontal1,
    Horizontal2,
}

impl Channel {
    pub const ALL: [Channel; CHANNEL_COUNT] =
        [Channel::Vertical, Channel::Horizontal1, Channel::Horizontal2];

    pub fn index(self) -> usize {
        match self {
            Channel::Vertical => 0,
            Channel::Horizontal1 => 1,
            Channel::Horizontal2 => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Vertical => "Z",
            Channel::Horizontal1 => "H1",
            Channel::Horizontal2 => "H2",
        }
    }
}

/// Square grid of candidate horizontal slowness vectors, in s/deg.
///
/// `nk = floor((smax - smin)/sinc + 0.5) + 1` samples per axis, so the grid
/// covers [smin, smax] inclusive for increments that divide the span.
#[derive(Debug, Clone, Copy)]
pub struct SlownessGrid {
    smin: f64,
    sinc: f64,
    nk: usize,
}

impl SlownessGrid {
    pub fn new(smin: f64, smax: f64, sinc: f64) -> Result<Self, BeamError> {
        if !(smin.is_finite() && smax.is_finite() && sinc.is_finite()) {
            return Err(BeamError::config("slowness bounds must be finite"));
        }
        if smin >= smax {
            return Err(BeamError::config(format!(
                "invalid slowness bounds: smin {smin} >= smax {smax}"
            )));
        }
        if sinc <= 0.0 {
            return Err(BeamError::config(format!(
                "slowness increment must be positive, got {sinc}"
            )));
        }
        let nk = ((smax - smin) / sinc + 0.5).floor() as usize + 1;
        Ok(Self { smin, sinc, nk })
    }

    pub fn nk(&self) -> usize {
        self.nk
    }

    pub fn smin(&self) -> f64 {
        self.smin
    }

    pub fn sinc(&self) -> f64 {
        self.sinc
    }

    pub fn smax_effective(&self) -> f64 {
        self.value(self.nk - 1)
    }

    pub fn value(&self, index: usize) -> f64 {
        self.smin + index as f64 * self.sinc
    }

    /// Grid index nearest to a physical slowness, clamped to the grid.
    pub fn nearest_index(&self, s: f64) -> usize {
        let raw = ((s - self.smin) / self.sinc).round();
        if raw <= 0.0 {
            0
        } else {
            (raw as usize).min(self.nk - 1)
        }
    }
}

/// Real non-negative power over the slowness grid for one channel.
/// Flat layout `row * nk + col` with sy along rows and sx along columns.
#[derive(Debug, Clone)]
pub struct PowerMap {
    nk: usize,
    data: Vec<f64>,
}

impl PowerMap {
    pub fn zeros(nk: usize) -> Self {
        Self {
            nk,
            data: vec![0.0; nk * nk],
        }
    }

    pub fn nk(&self) -> usize {
        self.nk
    }

    #[inline]
    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.nk + col]
    }

    #[inline]
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.nk + col] += value;
    }

    pub fn values(&self) -> &[f64] {
        &self.data
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn max_value(&self) -> f64 {
        self.data.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Row-major argmax with a strictly-greater comparison, so numerically
    /// equal peaks resolve deterministically to the lowest flat index.
    pub fn argmax(&self) -> (usize, usize, f64) {
        let mut best_flat = 0;
        let mut best = self.data[0];
        for (flat, &value) in self.data.iter().enumerate().skip(1) {
            if value > best {
                best = value;
                best_flat = flat;
            }
        }
        (best_flat / self.nk, best_flat % self.nk, best)
    }
}

/// Coarse peak of one channel's map, mapped back to physical slowness.
#[derive(Debug, Clone, Copy)]
pub struct GridPeak {
    pub sx: f64,
    pub sy: f64,
    pub power: f64,
}

pub fn extract_peak(map: &PowerMap, grid: &SlownessGrid) -> GridPeak {
    let (row, col, power) = map.argmax();
    GridPeak {
        sx: grid.value(col),
        sy: grid.value(row),
        power,
    }
}
