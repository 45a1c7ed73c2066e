//! Recursive radix-2 FFT and its inverse
//!
//! Input is zero-padded to the next power of two. Each level splits the
//! sequence into even and odd halves, transforms them recursively and
//! combines them with the butterfly
//!
//! ```text
//! X[k]       = E[k] + W·O[k]
//! X[k + N/2] = E[k] - W·O[k]      W = exp(∓2πi·k/N)
//! ```
//!
//! The engine keeps its twiddle table and scratch space between calls so a
//! steady stream of equally sized blocks does not allocate per level.

use crate::complex::Complex;
use crate::error::{TransformError, TransformResult};
use std::f64::consts::PI;

/// Frames per channel in one processing block
pub const NUM_SAMPLES_TO_PROCESS: usize = 4096;

/// Length a sequence of `len` samples is zero-padded to
#[inline]
pub fn padded_len(len: usize) -> usize {
    len.next_power_of_two()
}

/// Forward/inverse transform with reusable buffers
pub struct TransformEngine {
    /// `exp(-2πi·j/M)` for `j < M/2`, where `M` is the table size
    twiddles: Vec<Complex>,
    table_size: usize,
    work: Vec<Complex>,
    scratch: Vec<Complex>,
}

impl Default for TransformEngine {
    fn default() -> Self {
        Self::new(NUM_SAMPLES_TO_PROCESS)
    }
}

impl TransformEngine {
    /// Create an engine with buffers sized for blocks of up to `max_len` samples
    pub fn new(max_len: usize) -> Self {
        let table_size = padded_len(max_len.max(1));
        Self {
            twiddles: Self::compute_twiddles(table_size),
            table_size,
            work: Vec::with_capacity(table_size),
            scratch: vec![Complex::ZERO; table_size],
        }
    }

    fn compute_twiddles(size: usize) -> Vec<Complex> {
        (0..size / 2)
            .map(|j| Complex::from_polar(1.0, -2.0 * PI * j as f64 / size as f64))
            .collect()
    }

    /// Grow the twiddle table and scratch space for a transform of length `n`
    fn reserve(&mut self, n: usize) {
        if n > self.table_size {
            tracing::debug!(from = self.table_size, to = n, "growing transform tables");
            self.table_size = n;
            self.twiddles = Self::compute_twiddles(n);
        }
        if self.scratch.len() < n {
            self.scratch.resize(n, Complex::ZERO);
        }
    }

    /// Forward transform of a real channel
    pub fn forward(&mut self, samples: &[f32]) -> Vec<Complex> {
        let mut out = Vec::new();
        self.forward_into(samples, &mut out);
        out
    }

    /// Forward transform of a real channel into `out`
    ///
    /// `out` is cleared and filled with `padded_len(samples.len())` bins.
    pub fn forward_into(&mut self, samples: &[f32], out: &mut Vec<Complex>) {
        let n = padded_len(samples.len());
        self.reserve(n);

        out.clear();
        out.extend(samples.iter().map(|&s| Complex::real(s as f64)));
        out.resize(n, Complex::ZERO);

        let step = self.table_size / n;
        butterfly(out, &mut self.scratch[..n], &self.twiddles, step, false);
    }

    /// Inverse transform, keeping only the real part
    pub fn inverse(&mut self, spectrum: &[Complex]) -> TransformResult<Vec<f32>> {
        let mut out = Vec::new();
        self.inverse_into(spectrum, &mut out)?;
        Ok(out)
    }

    /// Inverse transform into `out`
    ///
    /// The spectrum length must be an exact power of two. Every real part is
    /// divided by N and the imaginary part is discarded.
    pub fn inverse_into(&mut self, spectrum: &[Complex], out: &mut Vec<f32>) -> TransformResult<()> {
        let n = spectrum.len();
        if n == 0 {
            return Err(TransformError::Empty);
        }
        if !n.is_power_of_two() {
            return Err(TransformError::NotPowerOfTwo { len: n });
        }
        self.reserve(n);

        self.work.clear();
        self.work.extend_from_slice(spectrum);

        let step = self.table_size / n;
        butterfly(&mut self.work, &mut self.scratch[..n], &self.twiddles, step, true);

        let norm = 1.0 / n as f64;
        out.clear();
        out.extend(self.work.iter().map(|c| (c.re * norm) as f32));
        Ok(())
    }
}

/// Recursive radix-2 step over `data` (length a power of two)
///
/// `scratch` holds the even/odd halves of this level and must be at least
/// as long as `data`. `step` is the twiddle table stride for this length.
fn butterfly(data: &mut [Complex], scratch: &mut [Complex], twiddles: &[Complex], step: usize, inverse: bool) {
    let n = data.len();
    if n == 1 {
        return;
    }
    let half = n / 2;

    let (evens, odds) = scratch[..n].split_at_mut(half);
    for i in 0..half {
        evens[i] = data[2 * i];
        odds[i] = data[2 * i + 1];
    }

    {
        // The halves of `data` are free to use as the children's scratch
        let (left, right) = data.split_at_mut(half);
        butterfly(evens, left, twiddles, step * 2, inverse);
        butterfly(odds, right, twiddles, step * 2, inverse);
    }

    for k in 0..half {
        let w = twiddles[k * step];
        let w = if inverse { w.conj() } else { w };
        let t = w * odds[k];
        data[k] = evens[k] + t;
        data[k + half] = evens[k] - t;
    }
}

/// Forward transform using a one-off engine
pub fn forward_transform(samples: &[f32]) -> Vec<Complex> {
    TransformEngine::new(samples.len()).forward(samples)
}

/// Inverse transform using a one-off engine
pub fn inverse_transform(spectrum: &[Complex]) -> TransformResult<Vec<f32>> {
    TransformEngine::new(spectrum.len()).inverse(spectrum)
}
