use std::f64::consts::PI;
use std::sync::Arc;

use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::error::Error;

pub type DynError = Box<dyn Error + Send + Sync>;

/// Cached forward real-to-complex FFT plan for one subwindow length.
pub struct FftHelper {
    len: usize,
    forward_r2c: Arc<dyn RealToComplex<f64>>,
}

impl FftHelper {
    pub fn new(len: usize) -> Self {
        let mut planner_r2c = RealFftPlanner::new();
        let forward_r2c = planner_r2c.plan_fft_forward(len);
        Self { len, forward_r2c }
    }

    pub fn half_spectrum_len(&self) -> usize {
        self.len / 2 + 1
    }

    pub fn forward_r2c_process(
        &self,
        input: &mut [f64],
        output: &mut [Complex<f64>],
    ) -> Result<(), DynError> {
        if input.len() != self.len {
            return Err("Input length for R2C does not match FFT configuration".into());
        }
        if output.len() != self.half_spectrum_len() {
            return Err(
                "Output length for R2C does not match expected half-spectrum length".into(),
            );
        }
        self.forward_r2c.process(input, output)?;
        Ok(())
    }
}

pub fn hanning_window(len: usize) -> Vec<f64> {
    let mut window = vec![0.0; len];
    for i in 0..len {
        window[i] = 0.5 * (1.0 - (2.0 * PI * i as f64 / (len as f64 - 1.0)).cos());
    }
    window
}

/// Subtract the mean from a buffer in place and return the removed mean.
pub fn remove_mean(samples: &mut [f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    for value in samples.iter_mut() {
        *value -= mean;
    }
    mean
}

/// Linear power to dB. Non-positive input maps to -inf; callers only format
/// the result, it never feeds back into the pipeline.
pub fn power_to_db(power: f64) -> f64 {
    10.0 * power.log10()
}

#[cfg(test)]
mod tests {
    use super::{hanning_window, power_to_db, remove_mean, FftHelper};
    use rustfft::num_complex::Complex;

    #[test]
    fn hann_endpoints_are_zero_and_center_is_one() {
        let w = hanning_window(65);
        assert!(w[0].abs() < 1e-12);
        assert!(w[64].abs() < 1e-12);
        assert!((w[32] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn remove_mean_centres_the_buffer() {
        let mut data = vec![1.0, 2.0, 3.0, 4.0];
        let mean = remove_mean(&mut data);
        assert!((mean - 2.5).abs() < 1e-12);
        assert!(data.iter().sum::<f64>().abs() < 1e-12);
    }

    #[test]
    fn forward_fft_recovers_single_tone_bin() {
        let len = 256;
        let helper = FftHelper::new(len);
        let bin = 10usize;
        let mut input: Vec<f64> = (0..len)
            .map(|i| (2.0 * std::f64::consts::PI * bin as f64 * i as f64 / len as f64).cos())
            .collect();
        let mut output = vec![Complex::new(0.0, 0.0); helper.half_spectrum_len()];
        helper.forward_r2c_process(&mut input, &mut output).unwrap();
        let (max_bin, _) = output
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.norm().partial_cmp(&b.1.norm()).unwrap())
            .unwrap();
        assert_eq!(max_bin, bin);
        // realfft forward is unnormalised: a unit cosine concentrates len/2.
        assert!((output[bin].norm() - len as f64 / 2.0).abs() < 1e-6);
    }

    #[test]
    fn db_conversion_matches_reference_points() {
        assert!((power_to_db(1.0) - 0.0).abs() < 1e-12);
        assert!((power_to_db(100.0) - 20.0).abs() < 1e-12);
    }
}
