// SPDX-License-Identifier: AGPL-3.0-only

//! Forward simulation: propagate a point-source pulse and record the
//! pressure history at each transducer.

use crate::error::EchoError;
use crate::field::FieldState;
use crate::gpu::GpuContext;
use crate::grid::{AbsorbingBoundary, Grid, Medium};
use crate::solver::dispatch::{FieldPlan, RunConfig, StepRunner};
use crate::solver::pipelines::{FieldRole, StepPipelines};
use crate::solver::resources::{BufferManifest, SolverResources};
use crate::solver::shaders::{self, WorkgroupShape};
use crate::solver::SimParams;
use crate::transducer::{Recording, Source, TransducerArray};

/// A configured forward run.
pub struct ForwardSimulation {
    grid: Grid,
    medium: Medium,
    boundary: AbsorbingBoundary,
    source: Source,
    transducers: TransducerArray,
    pub shape: WorkgroupShape,
    pub run_config: RunConfig,
}

impl ForwardSimulation {
    /// Validate the scene. An over-unity Courant number is reported but
    /// not rejected; short intentionally-unstable runs are legitimate.
    pub fn new(
        grid: Grid,
        medium: Medium,
        boundary: AbsorbingBoundary,
        source: Source,
        transducers: TransducerArray,
    ) -> Result<Self, EchoError> {
        if !medium.is_stable(&grid) {
            println!(
                "  warning: Courant number {:.3} exceeds 1, expect instability",
                medium.courant_number(&grid)
            );
        }
        Ok(Self {
            grid,
            medium,
            boundary,
            source,
            transducers,
            shape: WorkgroupShape::default(),
            run_config: RunConfig::default(),
        })
    }

    /// Run to completion, returning the transducer recording.
    pub fn run(&self, gpu: &GpuContext) -> Result<Recording, EchoError> {
        self.run_with_frames(gpu, 0, |_, _| {})
    }

    /// Run to completion, additionally handing every `frame_interval`-th
    /// pressure frame to `on_frame` (visualization stays outside this
    /// crate).
    pub fn run_with_frames(
        &self,
        gpu: &GpuContext,
        frame_interval: u32,
        mut on_frame: impl FnMut(u32, &[f32]),
    ) -> Result<Recording, EchoError> {
        let params = SimParams::new(&self.grid, self.source.z, self.source.x);
        let field = FieldState::new("", 1);

        let mut manifest = BufferManifest::new();
        manifest.declare_all(super::shared_slots(
            &self.medium,
            &self.boundary,
            params,
            self.source.trace(),
        ));
        manifest.declare_all(field.slots(&self.grid, None)?);

        let resources = SolverResources::build(gpu, &manifest)?;
        let module = shaders::base_module(self.shape)?;
        let pipelines = StepPipelines::new(
            gpu,
            &resources,
            &module,
            &[FieldRole::PointSource],
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
                role: FieldRole::PointSource,
            }],
            &self.grid,
            self.run_config.clone(),
        )?;

        let mut recording =
            Recording::zeros(self.transducers.len(), self.grid.total_steps as usize);
        let indices = self.transducers.indices();
        runner.run(|step, frames| {
            recording.record_column(step as usize, &frames[0], indices);
            if frame_interval > 0 && step % frame_interval == 0 {
                on_frame(step, &frames[0]);
            }
            Ok(())
        })?;
        Ok(recording)
    }
}
