//! Reference O(N²) DFT/IDFT
//!
//! Used as the correctness oracle for the recursive transform. Input is
//! zero-padded the same way so the two produce spectra of equal length.

use crate::complex::Complex;
use crate::transform::padded_len;
use std::f64::consts::PI;

/// `X[k] = Σ_n x[n]·(cos(2πkn/N) - i·sin(2πkn/N))`
pub fn dft(samples: &[f32]) -> Vec<Complex> {
    let n = padded_len(samples.len());
    let exponent = 2.0 * PI / n as f64;

    (0..n)
        .map(|bin| {
            let mut acc = Complex::ZERO;
            for (i, &sample) in samples.iter().enumerate() {
                // Reduce k·n modulo N to keep the angle small
                let angle = exponent * ((bin * i) % n) as f64;
                acc.re += sample as f64 * angle.cos();
                acc.im -= sample as f64 * angle.sin();
            }
            acc
        })
        .collect()
}

/// `x[n] = (1/N)·Σ_k Re(X[k])·cos(2πkn/N) - Im(X[k])·sin(2πkn/N)`
///
/// Only the real component is reconstructed.
pub fn idft(spectrum: &[Complex]) -> Vec<f64> {
    let n = spectrum.len();
    if n == 0 {
        return Vec::new();
    }
    let exponent = 2.0 * PI / n as f64;

    (0..n)
        .map(|sample| {
            let real: f64 = spectrum
                .iter()
                .enumerate()
                .map(|(bin, c)| {
                    let angle = exponent * ((bin * sample) % n) as f64;
                    c.re * angle.cos() - c.im * angle.sin()
                })
                .sum();
            real / n as f64
        })
        .collect()
}
