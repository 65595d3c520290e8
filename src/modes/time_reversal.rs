// SPDX-License-Identifier: AGPL-3.0-only

//! Time reversal: inject time-flipped transducer recordings back into the
//! medium and accumulate where the field refocuses.
//!
//! Each transducer becomes an emitter replaying its own recording
//! backwards. The per-cell L2 norm of the evolving field over all steps
//! is the reconstruction image; the last two pressure frames are kept as
//! the seed for reverse-time migration.

use crate::error::EchoError;
use crate::field::{FieldSeed, FieldState};
use crate::gpu::GpuContext;
use crate::grid::{AbsorbingBoundary, Grid, Medium};
use crate::solver::dispatch::{FieldPlan, RunConfig, StepRunner};
use crate::solver::pipelines::{FieldRole, StepPipelines};
use crate::solver::resources::{BufferManifest, BufferSlot, SolverResources};
use crate::solver::shaders::{self, WorkgroupShape};
use crate::solver::SimParams;
use crate::transducer::{Recording, TransducerArray};
use rayon::prelude::*;

/// Pre-processing applied to the recording before back-propagation.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeReversalConfig {
    /// Zero-padded steps appended after the flipped history so the field
    /// keeps converging once the recording is exhausted.
    pub extra_steps: usize,
    /// Scale all traces by the recording-wide max-abs.
    pub normalize: bool,
    /// Zero this many leading samples of every trace (direct-arrival
    /// mute) before flipping.
    pub mute_steps: usize,
}

/// Output of a time-reversal run.
#[derive(Debug, Clone)]
pub struct ReversalImage {
    /// Per-cell `sqrt(sum of squares)` over all steps.
    pub l2_norm: Vec<f32>,
    /// Final pressure frame.
    pub last_frame: Vec<f32>,
    /// Frame one step before the final one.
    pub second_to_last_frame: Vec<f32>,
}

impl ReversalImage {
    /// Seed for the migration's back-propagated field: it resumes where
    /// the reversal stopped, one step further into reversed time.
    pub fn migration_seed(&self) -> FieldSeed {
        FieldSeed {
            current: self.second_to_last_frame.clone(),
            previous: self.last_frame.clone(),
        }
    }
}

/// A configured time-reversal run.
pub struct TimeReversal {
    grid: Grid,
    medium: Medium,
    boundary: AbsorbingBoundary,
    transducers: TransducerArray,
    recording: Recording,
    config: TimeReversalConfig,
    pub shape: WorkgroupShape,
    pub run_config: RunConfig,
}

impl TimeReversal {
    /// Validate the scene against the recording's shape.
    ///
    /// The run length must equal the flipped history: recorded steps plus
    /// the configured zero padding.
    pub fn new(
        grid: Grid,
        medium: Medium,
        boundary: AbsorbingBoundary,
        transducers: TransducerArray,
        recording: Recording,
        config: TimeReversalConfig,
    ) -> Result<Self, EchoError> {
        if recording.rows != transducers.len() {
            return Err(EchoError::Config(format!(
                "recording has {} traces, transducer array has {}",
                recording.rows,
                transducers.len()
            )));
        }
        let expected = recording.steps + config.extra_steps;
        if grid.total_steps as usize != expected {
            return Err(EchoError::Config(format!(
                "grid runs {} steps, flipped recording needs {expected}",
                grid.total_steps
            )));
        }
        Ok(Self {
            grid,
            medium,
            boundary,
            transducers,
            recording,
            config,
            shape: WorkgroupShape::default(),
            run_config: RunConfig::default(),
        })
    }

    /// Run to completion, returning the L2 image and the final frames.
    pub fn run(&self, gpu: &GpuContext) -> Result<ReversalImage, EchoError> {
        let mut recording = self.recording.clone();
        recording.mute_before(self.config.mute_steps);
        let traces = recording.flipped_traces(self.config.extra_steps, self.config.normalize);

        // No point source: injection is the only excitation.
        let params = SimParams::new(&self.grid, 0, 0);
        let field = FieldState::new("", 1);

        let mut manifest = BufferManifest::new();
        manifest.declare_all(super::shared_slots(&self.medium, &self.boundary, params, &[]));
        manifest.declare_all(field.slots(&self.grid, None)?);
        manifest.declare(BufferSlot::read_only_i32(
            "transducer_map",
            3,
            0,
            &self.transducers.cell_map(&self.grid),
        ));
        for (t, trace) in traces.iter().enumerate() {
            manifest.declare(BufferSlot::read_only_f32(
                &format!("injected_trace_{t}"),
                3,
                (t + 1) as u32,
                trace,
            ));
        }

        let resources = SolverResources::build(gpu, &manifest)?;
        let module = shaders::injection_module(self.shape, 3, traces.len())?;
        let pipelines = StepPipelines::new(
            gpu,
            &resources,
            &module,
            &[FieldRole::Injection],
            self.shape,
            self.grid.size_z,
            self.grid.size_x,
        )?;
        let mut runner = StepRunner::new(
            gpu,
            resources,
            pipelines,
            vec![FieldPlan {
                state: field,
                role: FieldRole::Injection,
            }],
            &self.grid,
            self.run_config.clone(),
        )?;

        let cells = self.grid.cell_count();
        let mut l2 = vec![0.0f64; cells];
        let mut last = vec![0.0f32; cells];
        let mut second_to_last = vec![0.0f32; cells];
        runner.run(|_, frames| {
            let frame = &frames[0];
            l2.par_iter_mut()
                .zip(frame.par_iter())
                .for_each(|(acc, v)| *acc += f64::from(*v) * f64::from(*v));
            std::mem::swap(&mut second_to_last, &mut last);
            last.copy_from_slice(frame);
            Ok(())
        })?;

        Ok(ReversalImage {
            l2_norm: l2.iter().map(|v| v.sqrt() as f32).collect(),
            last_frame: last,
            second_to_last_frame: second_to_last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BoundarySpec;

    fn parts(total_steps: u32) -> (Grid, Medium, AbsorbingBoundary, TransducerArray) {
        let grid = Grid::new(64, 64, 1.5e-3, 1.5e-3, 4e-7, total_steps).expect("grid");
        let medium = Medium::uniform(&grid, 1500.0).expect("medium");
        let boundary =
            AbsorbingBoundary::new(&grid, BoundarySpec::open_top(), 12, 3e6).expect("boundary");
        let transducers = TransducerArray::linear_row(&grid, 0, 8, 6, 4).expect("array");
        (grid, medium, boundary, transducers)
    }

    #[test]
    fn rejects_trace_count_mismatch() {
        let (grid, medium, boundary, transducers) = parts(100);
        let recording = Recording::zeros(3, 100);
        let result = TimeReversal::new(
            grid,
            medium,
            boundary,
            transducers,
            recording,
            TimeReversalConfig::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn rejects_run_length_mismatch() {
        let (grid, medium, boundary, transducers) = parts(100);
        let recording = Recording::zeros(4, 80);
        // 80 recorded + 10 extra != 100
        let config = TimeReversalConfig {
            extra_steps: 10,
            ..TimeReversalConfig::default()
        };
        assert!(
            TimeReversal::new(grid, medium, boundary, transducers, recording, config).is_err()
        );
    }

    #[test]
    fn accepts_padded_run_length() {
        let (grid, medium, boundary, transducers) = parts(100);
        let recording = Recording::zeros(4, 80);
        let config = TimeReversalConfig {
            extra_steps: 20,
            ..TimeReversalConfig::default()
        };
        assert!(
            TimeReversal::new(grid, medium, boundary, transducers, recording, config).is_ok()
        );
    }

    #[test]
    fn migration_seed_orders_frames() {
        let image = ReversalImage {
            l2_norm: vec![0.0],
            last_frame: vec![1.0],
            second_to_last_frame: vec![2.0],
        };
        let seed = image.migration_seed();
        assert_eq!(seed.current, vec![2.0]);
        assert_eq!(seed.previous, vec![1.0]);
    }

    #[test]
    #[ignore = "requires GPU"]
    fn silent_recording_yields_silent_image() {
        let (grid, medium, boundary, transducers) = parts(50);
        let recording = Recording::zeros(4, 50);
        let tr = TimeReversal::new(
            grid,
            medium,
            boundary,
            transducers,
            recording,
            TimeReversalConfig::default(),
        )
        .expect("scene");
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        let gpu = rt.block_on(GpuContext::new()).expect("GPU device");
        let image = tr.run(&gpu).expect("run");
        assert!(image.l2_norm.iter().all(|v| *v == 0.0));
    }
}
