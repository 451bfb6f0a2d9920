use num_complex::Complex;

use crate::error::BeamError;

/// Dense complex Hermitian matrix, row-major.
///
/// Used for the cross-spectral density matrices (3N x 3N) and their
/// inverses. Construction from snapshots enforces Hermitian symmetry; the
/// CLEAN subtraction step preserves it because the subtracted term is an
/// outer product `a a^H`.
#[derive(Debug, Clone, PartialEq)]
pub struct CsdMatrix {
    n: usize,
    data: Vec<Complex<f64>>,
}

impl CsdMatrix {
    pub fn zeros(n: usize) -> Self {
        Self {
            n,
            data: vec![Complex::new(0.0, 0.0); n * n],
        }
    }

    /// Frequency/time-averaged outer product of the spectral snapshots:
    /// `C[i][j] = mean_k( x_k[i] * conj(x_k[j]) )`.
    pub fn from_snapshots(snapshots: &[Vec<Complex<f64>>]) -> Result<Self, BeamError> {
        let Some(first) = snapshots.first() else {
            return Err(BeamError::insufficient("no spectral snapshots supplied"));
        };
        let n = first.len();
        let mut matrix = Self::zeros(n);
        let scale = 1.0 / snapshots.len() as f64;
        for snap in snapshots {
            if snap.len() != n {
                return Err(BeamError::config(format!(
                    "snapshot length mismatch: {} vs {n}",
                    snap.len()
                )));
            }
            for i in 0..n {
                let xi = snap[i];
                for j in 0..n {
                    matrix.data[i * n + j] += xi * snap[j].conj() * scale;
                }
            }
        }
        matrix.enforce_hermitian();
        Ok(matrix)
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    #[inline]
    pub fn get(&self, i: usize, j: usize) -> Complex<f64> {
        self.data[i * self.n + j]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: Complex<f64>) {
        self.data[i * self.n + j] = v;
    }

    /// Average the matrix with its conjugate transpose, squashing
    /// floating-point asymmetry from the accumulation order.
    pub fn enforce_hermitian(&mut self) {
        let n = self.n;
        for i in 0..n {
            self.data[i * n + i].im = 0.0;
            for j in (i + 1)..n {
                let upper = self.data[i * n + j];
                let lower = self.data[j * n + i];
                let avg = (upper + lower.conj()) * 0.5;
                self.data[i * n + j] = avg;
                self.data[j * n + i] = avg.conj();
            }
        }
    }

    /// Largest absolute deviation from Hermitian symmetry.
    pub fn hermitian_defect(&self) -> f64 {
        let n = self.n;
        let mut defect = 0.0f64;
        for i in 0..n {
            for j in i..n {
                let d = (self.data[i * n + j] - self.data[j * n + i].conj()).norm();
                defect = defect.max(d);
            }
        }
        defect
    }

    pub fn trace_re(&self) -> f64 {
        (0..self.n).map(|i| self.data[i * self.n + i].re).sum()
    }

    /// Real part of the trace restricted to one N x N diagonal block.
    pub fn block_trace_re(&self, block: usize, nr: usize) -> f64 {
        let base = block * nr;
        (0..nr)
            .map(|i| self.data[(base + i) * self.n + base + i].re)
            .sum()
    }

    pub fn add_diagonal_loading(&mut self, loading: f64) {
        for i in 0..self.n {
            self.data[i * self.n + i].re += loading;
        }
    }

    /// `A -= scale * a * a^H`, the CLEAN source-removal update.
    pub fn subtract_scaled_outer(&mut self, a: &[Complex<f64>], scale: f64) {
        debug_assert_eq!(a.len(), self.n);
        let n = self.n;
        for i in 0..n {
            let ai = a[i] * scale;
            for j in 0..n {
                self.data[i * n + j] -= ai * a[j].conj();
            }
        }
    }

    /// `a^H A a` over the full dimension.
    pub fn quadratic_form(&self, a: &[Complex<f64>]) -> Complex<f64> {
        debug_assert_eq!(a.len(), self.n);
        let n = self.n;
        let mut acc = Complex::new(0.0, 0.0);
        for i in 0..n {
            let mut row = Complex::new(0.0, 0.0);
            for j in 0..n {
                row += self.data[i * n + j] * a[j];
            }
            acc += a[i].conj() * row;
        }
        acc
    }

    /// `a^H A_bb a` where `A_bb` is the (block, block) N x N diagonal block
    /// and `a` has length N. This is the per-channel Capon denominator.
    pub fn block_quadratic_form(&self, block: usize, nr: usize, a: &[Complex<f64>]) -> Complex<f64> {
        debug_assert_eq!(a.len(), nr);
        let base = block * nr;
        let mut acc = Complex::new(0.0, 0.0);
        for i in 0..nr {
            let row_off = (base + i) * self.n + base;
            let mut row = Complex::new(0.0, 0.0);
            for j in 0..nr {
                row += self.data[row_off + j] * a[j];
            }
            acc += a[i].conj() * row;
        }
        acc
    }
}

/// Result of a CSDM inversion, with a note of whether the diagonal-loading
/// fallback had to kick in.
#[derive(Debug)]
pub struct Inversion {
    pub matrix: CsdMatrix,
    pub regularized: bool,
}

/// Seam for the per-iteration matrix inversion so that a regularized
/// variant can be substituted without touching the beamformer.
pub trait CsdmInverter: Sync {
    fn invert(&self, matrix: &CsdMatrix) -> Result<Inversion, BeamError>;
}

/// Gauss-Jordan elimination with partial pivoting. A pivot whose magnitude
/// falls below `pivot_rel_floor` times the mean diagonal magnitude of the
/// input signals rank deficiency.
pub struct GaussJordanInverter {
    pub pivot_rel_floor: f64,
}

impl Default for GaussJordanInverter {
    fn default() -> Self {
        Self {
            pivot_rel_floor: 1e-12,
        }
    }
}

impl CsdmInverter for GaussJordanInverter {
    fn invert(&self, matrix: &CsdMatrix) -> Result<Inversion, BeamError> {
        let n = matrix.dim();
        let mut diag_scale = (0..n).map(|i| matrix.get(i, i).norm()).sum::<f64>() / n as f64;
        if diag_scale <= 0.0 {
            diag_scale = 1.0;
        }
        let floor = self.pivot_rel_floor * diag_scale;

        // Augmented [A | I].
        let mut aug = vec![vec![Complex::new(0.0, 0.0); 2 * n]; n];
        for i in 0..n {
            for j in 0..n {
                aug[i][j] = matrix.get(i, j);
            }
            aug[i][n + i] = Complex::new(1.0, 0.0);
        }

        for col in 0..n {
            let mut best_row = col;
            let mut best_mag = aug[col][col].norm_sqr();
            for row in (col + 1)..n {
                let mag = aug[row][col].norm_sqr();
                if mag > best_mag {
                    best_mag = mag;
                    best_row = row;
                }
            }
            if best_mag.sqrt() < floor {
                return Err(BeamError::ill_conditioned(format!(
                    "pivot magnitude {:.3e} below floor {floor:.3e} at column {col}",
                    best_mag.sqrt()
                )));
            }
            aug.swap(col, best_row);

            let pivot_inv = aug[col][col].finv();
            for k in 0..2 * n {
                aug[col][k] *= pivot_inv;
            }

            for row in 0..n {
                if row == col {
                    continue;
                }
                let factor = aug[row][col];
                if factor.norm_sqr() == 0.0 {
                    continue;
                }
                for k in 0..2 * n {
                    let sub = factor * aug[col][k];
                    aug[row][k] -= sub;
                }
            }
        }

        let mut inv = CsdMatrix::zeros(n);
        for i in 0..n {
            for j in 0..n {
                inv.set(i, j, aug[i][n + j]);
            }
        }
        Ok(Inversion {
            matrix: inv,
            regularized: false,
        })
    }
}

/// Two-stage policy: direct inversion first, then one retry with diagonal
/// loading `loading_scale * trace / n` when the direct pass reports rank
/// deficiency. `loading_scale == 0` disables the fallback.
pub struct LoadedInverter {
    pub direct: GaussJordanInverter,
    pub loading_scale: f64,
}

impl LoadedInverter {
    pub fn new(loading_scale: f64) -> Self {
        Self {
            direct: GaussJordanInverter::default(),
            loading_scale,
        }
    }
}

impl CsdmInverter for LoadedInverter {
    fn invert(&self, matrix: &CsdMatrix) -> Result<Inversion, BeamError> {
        match self.direct.invert(matrix) {
            Ok(inv) => Ok(inv),
            Err(BeamError::IllConditionedMatrix(_)) if self.loading_scale > 0.0 => {
                let mut loaded = matrix.clone();
                let loading = self.loading_scale * matrix.trace_re().abs() / matrix.dim() as f64;
                // A zero-trace matrix gets an absolute floor instead.
                let loading = if loading > 0.0 { loading } else { self.loading_scale };
                loaded.add_diagonal_loading(loading);
                let inv = self.direct.invert(&loaded)?;
                Ok(Inversion {
                    matrix: inv.matrix,
                    regularized: true,
                })
            }
            Err(e) => Err(e),
        }
    }
}
