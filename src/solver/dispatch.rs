// SPDX-License-Identifier: AGPL-3.0-only

//! The stepping state machine.
//!
//! One leapfrog step is a single command encoder holding a single compute
//! pass: for each configured field, the four derivative/CPML kernels and
//! its simulate variant in fixed order, then one `increment_time`
//! invocation for the whole pass. Submission is followed by a blocking
//! readback of each field's `p_next` — the only host/GPU synchronization
//! point per step.

use crate::error::EchoError;
use crate::field::FieldState;
use crate::gpu::GpuContext;
use crate::grid::Grid;
use crate::solver::pipelines::{FieldRole, StepPipelines};
use crate::solver::resources::SolverResources;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Resources built, no step submitted yet.
    Ready,
    /// Step loop in progress.
    Stepping,
    /// All steps completed (or `total_steps` was zero).
    Done,
}

/// Cooperative cancellation flag, checked between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Optional numerical-stability watchdog.
///
/// Every `check_every` steps the energy (sum of squares) of the first
/// field's frame is tested; NaN or exceeding `energy_limit` aborts the
/// run with [`EchoError::Unstable`].
#[derive(Debug, Clone, Copy)]
pub struct InstabilityGuard {
    pub check_every: u32,
    pub energy_limit: f64,
}

impl InstabilityGuard {
    pub const fn new(check_every: u32, energy_limit: f64) -> Self {
        Self {
            check_every,
            energy_limit,
        }
    }

    /// Whether this step's energy trips the guard.
    pub fn breached(&self, step: u32, energy: f64) -> bool {
        if self.check_every == 0 || step % self.check_every != 0 {
            return false;
        }
        !energy.is_finite() || energy > self.energy_limit
    }
}

/// Sum of squares of a frame, accumulated in f64.
pub fn field_energy(frame: &[f32]) -> f64 {
    frame.iter().map(|v| f64::from(*v) * f64::from(*v)).sum()
}

/// Run-wide knobs that are not part of the physics.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    /// Print a progress line every this many steps (0 = silent).
    pub progress_interval: u32,
    /// Per-step readback deadline; `None` waits indefinitely.
    pub readback_deadline: Option<Duration>,
    pub cancel: Option<CancelToken>,
    pub guard: Option<InstabilityGuard>,
}

/// One field participating in the run.
pub struct FieldPlan {
    pub state: FieldState,
    pub role: FieldRole,
}

/// Drives the per-step kernel sequence over one or two fields.
pub struct StepRunner<'a> {
    gpu: &'a GpuContext,
    resources: SolverResources,
    pipelines: StepPipelines,
    fields: Vec<FieldPlan>,
    cells: usize,
    total_steps: u32,
    config: RunConfig,
    state: StepState,
}

impl<'a> StepRunner<'a> {
    pub fn new(
        gpu: &'a GpuContext,
        resources: SolverResources,
        pipelines: StepPipelines,
        fields: Vec<FieldPlan>,
        grid: &Grid,
        config: RunConfig,
    ) -> Result<Self, EchoError> {
        if fields.is_empty() {
            return Err(EchoError::Config("no fields configured".into()));
        }
        Ok(Self {
            gpu,
            resources,
            pipelines,
            fields,
            cells: grid.cell_count(),
            total_steps: grid.total_steps,
            config,
            state: StepState::Ready,
        })
    }

    pub const fn state(&self) -> StepState {
        self.state
    }

    pub const fn resources(&self) -> &SolverResources {
        &self.resources
    }

    /// Encode, submit, and read back one step. Returns the new `p_next`
    /// frame per field, in field order.
    fn step(&self, step: u32) -> Result<Vec<Vec<f32>>, EchoError> {
        let (wz, wx) = self.pipelines.workgroups;
        let mut encoder =
            self.gpu
                .device()
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("wave step"),
                });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("wave step"),
                timestamp_writes: None,
            });
            pass.set_bind_group(0, self.resources.bind_group(0)?, &[]);
            pass.set_bind_group(2, self.resources.bind_group(2)?, &[]);
            for field in &self.fields {
                // A second field's arrays live in another manifest group
                // but are bound at slot 1; its layout is structurally
                // identical, which is what bind-group compatibility needs.
                pass.set_bind_group(1, self.resources.bind_group(field.state.group())?, &[]);
                if field.role == FieldRole::Injection {
                    pass.set_bind_group(3, self.resources.bind_group(3)?, &[]);
                }
                pass.set_pipeline(&self.pipelines.forward_diff);
                pass.dispatch_workgroups(wz, wx, 1);
                pass.set_pipeline(&self.pipelines.cpml_first);
                pass.dispatch_workgroups(wz, wx, 1);
                pass.set_pipeline(&self.pipelines.backward_diff);
                pass.dispatch_workgroups(wz, wx, 1);
                pass.set_pipeline(&self.pipelines.cpml_second);
                pass.dispatch_workgroups(wz, wx, 1);
                pass.set_pipeline(self.pipelines.simulate_for(field.role)?);
                pass.dispatch_workgroups(wz, wx, 1);
            }
            pass.set_pipeline(&self.pipelines.increment_time);
            pass.dispatch_workgroups(1, 1, 1);
        }
        self.gpu.queue().submit(std::iter::once(encoder.finish()));

        self.fields
            .iter()
            .map(|field| {
                self.resources
                    .read_f32(
                        self.gpu,
                        &field.state.p_next_name(),
                        self.cells,
                        self.config.readback_deadline,
                    )
                    .map_err(|e| match e {
                        EchoError::ReadbackTimeout { .. } => EchoError::ReadbackTimeout { step },
                        other => other,
                    })
            })
            .collect()
    }

    /// Drive the full step loop, handing each step's frames to `on_step`.
    ///
    /// `total_steps == 0` completes immediately without touching the GPU.
    pub fn run(
        &mut self,
        mut on_step: impl FnMut(u32, &[Vec<f32>]) -> Result<(), EchoError>,
    ) -> Result<(), EchoError> {
        if self.state != StepState::Ready {
            return Err(EchoError::Config(
                "step runner has already been driven".into(),
            ));
        }
        if self.total_steps == 0 {
            self.state = StepState::Done;
            return Ok(());
        }
        self.state = StepState::Stepping;
        for step in 0..self.total_steps {
            if let Some(cancel) = &self.config.cancel {
                if cancel.is_cancelled() {
                    return Err(EchoError::Cancelled { step });
                }
            }
            let frames = self.step(step)?;
            if let Some(guard) = &self.config.guard {
                let energy = field_energy(&frames[0]);
                if guard.breached(step, energy) {
                    return Err(EchoError::Unstable {
                        step,
                        energy: energy as f32,
                    });
                }
            }
            on_step(step, &frames)?;
            if self.config.progress_interval > 0
                && (step + 1) % self.config.progress_interval == 0
            {
                println!("  step {}/{}", step + 1, self.total_steps);
            }
        }
        self.state = StepState::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let shared = token.clone();
        shared.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn guard_trips_on_nan_and_overflow() {
        let guard = InstabilityGuard::new(10, 1e6);
        assert!(guard.breached(0, f64::NAN));
        assert!(guard.breached(10, 1e7));
        assert!(!guard.breached(10, 1e5));
        // Off-cycle steps never checked.
        assert!(!guard.breached(7, f64::NAN));
    }

    #[test]
    fn guard_disabled_when_interval_zero() {
        let guard = InstabilityGuard::new(0, 1.0);
        assert!(!guard.breached(0, f64::NAN));
    }

    #[test]
    fn field_energy_sums_squares() {
        assert_eq!(field_energy(&[]), 0.0);
        assert_eq!(field_energy(&[3.0, 4.0]), 25.0);
        assert!(field_energy(&[f32::NAN]).is_nan());
    }

    #[test]
    #[ignore = "requires GPU"]
    fn zero_step_run_completes_immediately_with_untouched_state() {
        use crate::field::FieldState;
        use crate::grid::{AbsorbingBoundary, BoundarySpec, Medium};
        use crate::modes::shared_slots;
        use crate::solver::resources::BufferManifest;
        use crate::solver::shaders::{self, WorkgroupShape};
        use crate::solver::SimParams;

        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        let gpu = rt.block_on(GpuContext::new()).expect("GPU device");

        let grid = Grid::new(16, 16, 1.5e-3, 1.5e-3, 4e-7, 0).expect("grid");
        let medium = Medium::uniform(&grid, 1500.0).expect("medium");
        let boundary =
            AbsorbingBoundary::new(&grid, BoundarySpec::all(), 4, 3e6).expect("boundary");
        let field = FieldState::new("", 1);

        let mut manifest = BufferManifest::new();
        manifest.declare_all(shared_slots(
            &medium,
            &boundary,
            SimParams::new(&grid, 0, 0),
            &[],
        ));
        manifest.declare_all(field.slots(&grid, None).expect("slots"));
        let resources = SolverResources::build(&gpu, &manifest).expect("resources");
        let shape = WorkgroupShape::default();
        let module = shaders::base_module(shape).expect("module");
        let pipelines = StepPipelines::new(
            &gpu,
            &resources,
            &module,
            &[FieldRole::PointSource],
            shape,
            grid.size_z,
            grid.size_x,
        )
        .expect("pipelines");

        let mut runner = StepRunner::new(
            &gpu,
            resources,
            pipelines,
            vec![FieldPlan {
                state: field,
                role: FieldRole::PointSource,
            }],
            &grid,
            RunConfig::default(),
        )
        .expect("runner");
        assert_eq!(runner.state(), StepState::Ready);

        let mut calls = 0u32;
        runner
            .run(|_, _| {
                calls += 1;
                Ok(())
            })
            .expect("zero-step run");
        assert_eq!(runner.state(), StepState::Done);
        assert_eq!(calls, 0, "no step callback expected for total_steps = 0");

        let frame = runner
            .resources()
            .read_f32(&gpu, "p_current", grid.cell_count(), None)
            .expect("readback");
        assert!(frame.iter().all(|v| *v == 0.0));
    }
}
