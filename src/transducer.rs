// SPDX-License-Identifier: AGPL-3.0-only

//! Transducer arrays, recordings, and source pulses.
//!
//! Transducers are grid cells that either record pressure (forward mode)
//! or inject stored traces (time-reversal mode). A [`Recording`] is the
//! row-major transducers-by-steps pressure history; its time-flipped form
//! is what time reversal injects.

use crate::error::EchoError;
use crate::grid::Grid;

/// An ordered set of transducer positions on the grid.
#[derive(Debug, Clone)]
pub struct TransducerArray {
    positions: Vec<(usize, usize)>,
    indices: Vec<usize>,
}

impl TransducerArray {
    /// Validate positions against the grid and precompute flat indices.
    pub fn new(grid: &Grid, positions: Vec<(usize, usize)>) -> Result<Self, EchoError> {
        if positions.is_empty() {
            return Err(EchoError::Config("transducer array is empty".into()));
        }
        for (z, x) in &positions {
            if *z >= grid.size_z || *x >= grid.size_x {
                return Err(EchoError::Config(format!(
                    "transducer ({z}, {x}) outside {}x{} grid",
                    grid.size_z, grid.size_x
                )));
            }
        }
        let indices = positions.iter().map(|(z, x)| grid.index(*z, *x)).collect();
        Ok(Self { positions, indices })
    }

    /// Evenly spaced row of transducers along `z = row`, one every
    /// `stride` columns starting at `first_x`.
    pub fn linear_row(
        grid: &Grid,
        row: usize,
        first_x: usize,
        stride: usize,
        count: usize,
    ) -> Result<Self, EchoError> {
        if stride == 0 {
            return Err(EchoError::Config("transducer stride must be positive".into()));
        }
        let positions = (0..count).map(|i| (row, first_x + i * stride)).collect();
        Self::new(grid, positions)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[(usize, usize)] {
        &self.positions
    }

    /// Flat grid indices, in transducer order.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Dense cell-to-transducer map: `-1` for ordinary cells, the
    /// transducer's ordinal for transducer cells. The injection kernel
    /// looks its cell up here to pick which trace to add.
    pub fn cell_map(&self, grid: &Grid) -> Vec<i32> {
        let mut map = vec![-1i32; grid.cell_count()];
        for (t, idx) in self.indices.iter().enumerate() {
            map[*idx] = t as i32;
        }
        map
    }
}

/// Pressure history at each transducer: `rows` transducers by `steps`
/// time samples, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub rows: usize,
    pub steps: usize,
    data: Vec<f32>,
}

impl Recording {
    /// All-zero recording.
    pub fn zeros(rows: usize, steps: usize) -> Self {
        Self {
            rows,
            steps,
            data: vec![0.0; rows * steps],
        }
    }

    /// Wrap an existing row-major buffer.
    pub fn from_data(rows: usize, steps: usize, data: Vec<f32>) -> Result<Self, EchoError> {
        if data.len() != rows * steps {
            return Err(EchoError::DataLoad(format!(
                "recording holds {} samples, shape {rows}x{steps} needs {}",
                data.len(),
                rows * steps
            )));
        }
        Ok(Self { rows, steps, data })
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// One transducer's trace.
    pub fn trace(&self, row: usize) -> &[f32] {
        &self.data[row * self.steps..(row + 1) * self.steps]
    }

    /// Copy the pressure at each of `indices` out of a full-grid frame
    /// into time column `step`.
    pub fn record_column(&mut self, step: usize, frame: &[f32], indices: &[usize]) {
        debug_assert_eq!(indices.len(), self.rows);
        for (row, idx) in indices.iter().enumerate() {
            self.data[row * self.steps + step] = frame[*idx];
        }
    }

    /// Largest absolute sample.
    pub fn max_abs(&self) -> f32 {
        self.data.iter().fold(0.0f32, |m, v| m.max(v.abs()))
    }

    /// Zero every sample before time index `n` in all traces.
    ///
    /// Used to mute the direct arrival before back-propagation so the
    /// image is dominated by reflections.
    pub fn mute_before(&mut self, n: usize) {
        let n = n.min(self.steps);
        for row in 0..self.rows {
            let base = row * self.steps;
            for s in 0..n {
                self.data[base + s] = 0.0;
            }
        }
    }

    /// Time-reversed per-transducer traces for injection.
    ///
    /// Each trace is flipped along time, then zero-padded by
    /// `extra_steps` so the refocused field can keep evolving after the
    /// recorded history is exhausted. With `normalize`, all traces are
    /// scaled by the recording-wide max-abs (no-op when silent).
    pub fn flipped_traces(&self, extra_steps: usize, normalize: bool) -> Vec<Vec<f32>> {
        let scale = if normalize {
            let m = self.max_abs();
            if m > 0.0 {
                1.0 / m
            } else {
                1.0
            }
        } else {
            1.0
        };
        (0..self.rows)
            .map(|row| {
                let mut trace: Vec<f32> =
                    self.trace(row).iter().rev().map(|v| v * scale).collect();
                trace.extend(std::iter::repeat(0.0).take(extra_steps));
                trace
            })
            .collect()
    }
}

/// A point source: grid position plus its emission trace.
#[derive(Debug, Clone)]
pub struct Source {
    pub z: usize,
    pub x: usize,
    trace: Vec<f32>,
}

impl Source {
    /// Validate the position and fit the trace to the run length.
    pub fn new(
        grid: &Grid,
        z: usize,
        x: usize,
        trace: Vec<f32>,
    ) -> Result<Self, EchoError> {
        if z >= grid.size_z || x >= grid.size_x {
            return Err(EchoError::Config(format!(
                "source ({z}, {x}) outside {}x{} grid",
                grid.size_z, grid.size_x
            )));
        }
        Ok(Self {
            z,
            x,
            trace: resample(&trace, grid.total_steps as usize),
        })
    }

    /// Silent source (time reversal runs with no emission).
    pub fn silent(grid: &Grid, z: usize, x: usize) -> Result<Self, EchoError> {
        Self::new(grid, z, x, vec![])
    }

    pub fn trace(&self) -> &[f32] {
        &self.trace
    }
}

/// Fit a trace to exactly `total_steps` samples: truncate when longer,
/// zero-pad when shorter.
pub fn resample(trace: &[f32], total_steps: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(total_steps);
    out.extend(trace.iter().take(total_steps).copied());
    out.resize(total_steps, 0.0);
    out
}

/// Time-shifted Gaussian pulse: `exp(-((i - delay) / width)^2)` sampled
/// at step indices, truncated to `total_steps`.
pub fn gaussian_pulse(total_steps: usize, delay: f32, width: f32) -> Vec<f32> {
    (0..total_steps)
        .map(|i| {
            let arg = (i as f32 - delay) / width;
            (-arg * arg).exp()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    fn grid() -> Grid {
        Grid::new(64, 64, 1.5e-3, 1.5e-3, 5e-7, 100).expect("valid grid")
    }

    #[test]
    fn array_rejects_out_of_bounds() {
        let g = grid();
        assert!(TransducerArray::new(&g, vec![(0, 64)]).is_err());
        assert!(TransducerArray::new(&g, vec![(64, 0)]).is_err());
        assert!(TransducerArray::new(&g, vec![(63, 63)]).is_ok());
    }

    #[test]
    fn array_rejects_empty() {
        assert!(TransducerArray::new(&grid(), vec![]).is_err());
    }

    #[test]
    fn linear_row_positions() {
        let g = grid();
        let a = TransducerArray::linear_row(&g, 0, 4, 8, 8).expect("array");
        assert_eq!(a.len(), 8);
        assert_eq!(a.positions()[0], (0, 4));
        assert_eq!(a.positions()[7], (0, 60));
    }

    #[test]
    fn cell_map_marks_ordinals() {
        let g = grid();
        let a = TransducerArray::new(&g, vec![(0, 5), (0, 10)]).expect("array");
        let map = a.cell_map(&g);
        assert_eq!(map[g.index(0, 5)], 0);
        assert_eq!(map[g.index(0, 10)], 1);
        assert_eq!(map[g.index(1, 5)], -1);
    }

    #[test]
    fn record_column_picks_transducer_cells() {
        let g = grid();
        let a = TransducerArray::new(&g, vec![(2, 3), (4, 5)]).expect("array");
        let mut rec = Recording::zeros(2, 10);
        let mut frame = vec![0.0f32; g.cell_count()];
        frame[g.index(2, 3)] = 1.5;
        frame[g.index(4, 5)] = -2.5;
        rec.record_column(7, &frame, a.indices());
        assert_eq!(rec.trace(0)[7], 1.5);
        assert_eq!(rec.trace(1)[7], -2.5);
        assert_eq!(rec.trace(0)[6], 0.0);
    }

    #[test]
    fn flipped_traces_reverse_and_pad() {
        let rec = Recording::from_data(1, 4, vec![1.0, 2.0, 3.0, 4.0]).expect("recording");
        let flipped = rec.flipped_traces(2, false);
        assert_eq!(flipped[0], vec![4.0, 3.0, 2.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn flipped_traces_normalize_by_max_abs() {
        let rec = Recording::from_data(1, 3, vec![1.0, -4.0, 2.0]).expect("recording");
        let flipped = rec.flipped_traces(0, true);
        assert_eq!(flipped[0], vec![0.5, -1.0, 0.25]);
    }

    #[test]
    fn flipped_traces_silent_recording_unscaled() {
        let rec = Recording::zeros(2, 5);
        let flipped = rec.flipped_traces(1, true);
        assert!(flipped.iter().all(|t| t.iter().all(|v| *v == 0.0)));
        assert_eq!(flipped[0].len(), 6);
    }

    #[test]
    fn mute_before_zeroes_early_samples() {
        let mut rec = Recording::from_data(2, 3, vec![1.0; 6]).expect("recording");
        rec.mute_before(2);
        assert_eq!(rec.trace(0), &[0.0, 0.0, 1.0]);
        assert_eq!(rec.trace(1), &[0.0, 0.0, 1.0]);
        rec.mute_before(99);
        assert!(rec.data().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn resample_truncates_and_pads() {
        assert_eq!(resample(&[1.0, 2.0, 3.0], 2), vec![1.0, 2.0]);
        assert_eq!(resample(&[1.0], 3), vec![1.0, 0.0, 0.0]);
        assert_eq!(resample(&[], 2), vec![0.0, 0.0]);
    }

    #[test]
    fn gaussian_pulse_peaks_at_delay() {
        let pulse = gaussian_pulse(50, 20.0, 5.0);
        assert_eq!(pulse.len(), 50);
        let peak = pulse
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 20);
        assert!((pulse[20] - 1.0).abs() < 1e-6);
        assert!(pulse[0] < 1e-6);
    }

    #[test]
    fn source_trace_fits_run_length() {
        let g = grid();
        let s = Source::new(&g, 1, 1, vec![1.0; 250]).expect("source");
        assert_eq!(s.trace().len(), 100);
        let s2 = Source::new(&g, 1, 1, vec![1.0; 10]).expect("source");
        assert_eq!(s2.trace().len(), 100);
        assert_eq!(s2.trace()[9], 1.0);
        assert_eq!(s2.trace()[10], 0.0);
    }

    #[test]
    fn source_rejects_out_of_bounds() {
        let g = grid();
        assert!(Source::new(&g, 64, 0, vec![]).is_err());
    }
}
