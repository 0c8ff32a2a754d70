//! Transform engine wrapper.
//!
//! DSP stages see plain forward/inverse transforms of a fixed size;
//! planner and scratch lifecycle stay in here so the engine is
//! swappable.

use num_complex::Complex32;
use rustfft::{Fft as RustFft, FftPlanner};
use std::sync::Arc;

pub struct Fft {
    size: usize,
    plan: Arc<dyn RustFft<f32>>,
    scratch: Vec<Complex32>,
}

impl Fft {
    pub fn forward(size: usize) -> Self {
        let plan = FftPlanner::new().plan_fft_forward(size);
        let scratch = vec![Complex32::new(0.0, 0.0); plan.get_inplace_scratch_len()];
        Fft { size, plan, scratch }
    }

    pub fn inverse(size: usize) -> Self {
        let plan = FftPlanner::new().plan_fft_inverse(size);
        let scratch = vec![Complex32::new(0.0, 0.0); plan.get_inplace_scratch_len()];
        Fft { size, plan, scratch }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transform in place. Neither direction normalises; the caller
    /// owns any 1/N scaling.
    pub fn process(&mut self, buffer: &mut [Complex32]) {
        debug_assert_eq!(buffer.len(), self.size);
        self.plan.process_with_scratch(buffer, &mut self.scratch);
    }
}
