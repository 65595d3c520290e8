// SPDX-License-Identifier: AGPL-3.0-only

//! Reverse-time migration: cross-correlate the re-simulated source field
//! with the back-propagated receiver field.
//!
//! Two fields step in lockstep through the same filled medium (reflector
//! cells replaced by the background speed). The incident field replays
//! the original source; the reversed field is seeded from the final two
//! time-reversal frames and propagates freely. Their per-cell product,
//! summed over all steps, is the migration image — it peaks where the
//! two wavefronts coincide, i.e. at reflectors.

use crate::error::EchoError;
use crate::field::{FieldSeed, FieldState};
use crate::gpu::GpuContext;
use crate::grid::{AbsorbingBoundary, Grid, Medium};
use crate::solver::dispatch::{FieldPlan, RunConfig, StepRunner};
use crate::solver::pipelines::{FieldRole, StepPipelines};
use crate::solver::resources::{BufferManifest, SolverResources};
use crate::solver::shaders::{self, WorkgroupShape};
use crate::solver::SimParams;
use crate::transducer::Source;
use rayon::prelude::*;

/// A configured migration run.
pub struct ReverseTimeMigration {
    grid: Grid,
    /// Medium with reflectors filled in.
    filled: Medium,
    boundary: AbsorbingBoundary,
    source: Source,
    seed: FieldSeed,
    pub shape: WorkgroupShape,
    pub run_config: RunConfig,
}

impl ReverseTimeMigration {
    /// Validate the scene.
    ///
    /// `medium` is the reflector-marked field used for the forward run;
    /// its zero cells are replaced by `background_c` so the re-simulated
    /// source propagates past them. `seed` comes from
    /// [`crate::modes::time_reversal::ReversalImage::migration_seed`].
    pub fn new(
        grid: Grid,
        medium: &Medium,
        background_c: f32,
        boundary: AbsorbingBoundary,
        source: Source,
        seed: FieldSeed,
    ) -> Result<Self, EchoError> {
        if background_c <= 0.0 {
            return Err(EchoError::Config(format!(
                "background speed must be positive, got {background_c}"
            )));
        }
        seed.validate(&grid)?;
        Ok(Self {
            grid,
            filled: medium.fill_reflectors(background_c),
            boundary,
            source,
            seed,
            shape: WorkgroupShape::default(),
            run_config: RunConfig::default(),
        })
    }

    /// Run to completion, returning the per-cell imaging-condition sum.
    pub fn run(&self, gpu: &GpuContext) -> Result<Vec<f32>, EchoError> {
        let params = SimParams::new(&self.grid, self.source.z, self.source.x);
        let incident = FieldState::new("src_", 1);
        // The reversed field's arrays sit in manifest group 3 but are
        // bound at slot 1 for its dispatches.
        let reversed = FieldState::new("rev_", 3);

        let mut manifest = BufferManifest::new();
        manifest.declare_all(super::shared_slots(
            &self.filled,
            &self.boundary,
            params,
            self.source.trace(),
        ));
        manifest.declare_all(incident.slots(&self.grid, None)?);
        manifest.declare_all(reversed.slots(&self.grid, Some(&self.seed))?);

        let resources = SolverResources::build(gpu, &manifest)?;
        let module = shaders::base_module(self.shape)?;
        let pipelines = StepPipelines::new(
            gpu,
            &resources,
            &module,
            &[FieldRole::PointSource, FieldRole::Free],
            self.shape,
            self.grid.size_z,
            self.grid.size_x,
        )?;
        let mut runner = StepRunner::new(
            gpu,
            resources,
            pipelines,
            vec![
                FieldPlan {
                    state: incident,
                    role: FieldRole::PointSource,
                },
                FieldPlan {
                    state: reversed,
                    role: FieldRole::Free,
                },
            ],
            &self.grid,
            self.run_config.clone(),
        )?;

        let mut image = vec![0.0f64; self.grid.cell_count()];
        runner.run(|_, frames| {
            let (fwd, rev) = (&frames[0], &frames[1]);
            image
                .par_iter_mut()
                .zip(fwd.par_iter().zip(rev.par_iter()))
                .for_each(|(acc, (a, b))| *acc += f64::from(*a) * f64::from(*b));
            Ok(())
        })?;
        Ok(image.iter().map(|v| *v as f32).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BoundarySpec;
    use crate::transducer::gaussian_pulse;

    fn parts() -> (Grid, Medium, AbsorbingBoundary, Source) {
        let grid = Grid::new(48, 48, 1.5e-3, 1.5e-3, 4e-7, 60).expect("grid");
        let mut medium = Medium::uniform(&grid, 1500.0).expect("medium");
        let wall = grid.index(30, 24);
        medium.speed_mut()[wall] = 0.0;
        let boundary =
            AbsorbingBoundary::new(&grid, BoundarySpec::open_top(), 10, 3e6).expect("boundary");
        let source = Source::new(&grid, 2, 24, gaussian_pulse(60, 10.0, 4.0)).expect("source");
        (grid, medium, boundary, source)
    }

    fn seed(grid: &Grid) -> FieldSeed {
        FieldSeed {
            current: vec![0.0; grid.cell_count()],
            previous: vec![0.0; grid.cell_count()],
        }
    }

    #[test]
    fn filled_medium_has_no_reflectors() {
        let (grid, medium, boundary, source) = parts();
        let rtm = ReverseTimeMigration::new(grid, &medium, 1500.0, boundary, source, seed(&grid))
            .expect("scene");
        assert!(rtm.filled.reflectors().is_empty());
    }

    #[test]
    fn rejects_bad_background_speed() {
        let (grid, medium, boundary, source) = parts();
        assert!(
            ReverseTimeMigration::new(grid, &medium, 0.0, boundary, source, seed(&grid)).is_err()
        );
    }

    #[test]
    fn rejects_wrong_seed_shape() {
        let (grid, medium, boundary, source) = parts();
        let bad = FieldSeed {
            current: vec![0.0; 3],
            previous: vec![0.0; grid.cell_count()],
        };
        assert!(
            ReverseTimeMigration::new(grid, &medium, 1500.0, boundary, source, bad).is_err()
        );
    }

    #[test]
    #[ignore = "requires GPU"]
    fn quiet_seed_and_silent_source_yield_zero_image() {
        let (grid, medium, boundary, _) = parts();
        let source = Source::silent(&grid, 2, 24).expect("source");
        let rtm = ReverseTimeMigration::new(grid, &medium, 1500.0, boundary, source, seed(&grid))
            .expect("scene");
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        let gpu = rt.block_on(GpuContext::new()).expect("GPU device");
        let image = rtm.run(&gpu).expect("run");
        assert!(image.iter().all(|v| *v == 0.0));
    }
}
