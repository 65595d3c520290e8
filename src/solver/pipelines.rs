// SPDX-License-Identifier: AGPL-3.0-only

//! Compute pipeline construction for the step kernels.

use crate::error::EchoError;
use crate::gpu::GpuContext;
use crate::solver::resources::SolverResources;
use crate::solver::shaders::WorkgroupShape;

/// What a field's simulate kernel does at its own cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Leapfrog plus the point-source term.
    PointSource,
    /// Leapfrog plus per-transducer trace injection.
    Injection,
    /// Plain leapfrog (migration's back-propagated field).
    Free,
}

impl FieldRole {
    const fn entry_point(self) -> &'static str {
        match self {
            Self::PointSource => "simulate",
            Self::Injection => "simulate_injection",
            Self::Free => "simulate_free",
        }
    }
}

/// Build one compute pipeline with an explicit layout.
fn make_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    entry_point: &str,
    layouts: &[&wgpu::BindGroupLayout],
) -> wgpu::ComputePipeline {
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(entry_point),
        bind_group_layouts: layouts,
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(entry_point),
        layout: Some(&pipeline_layout),
        module,
        entry_point,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
        cache: None,
    })
}

/// The compiled kernel set for one run.
///
/// The four derivative/CPML kernels and `increment_time` are shared by
/// every field; each [`FieldRole`] appearing in the run gets its simulate
/// variant compiled once.
pub struct StepPipelines {
    pub forward_diff: wgpu::ComputePipeline,
    pub cpml_first: wgpu::ComputePipeline,
    pub backward_diff: wgpu::ComputePipeline,
    pub cpml_second: wgpu::ComputePipeline,
    simulate_source: Option<wgpu::ComputePipeline>,
    simulate_free: Option<wgpu::ComputePipeline>,
    simulate_injection: Option<wgpu::ComputePipeline>,
    pub increment_time: wgpu::ComputePipeline,
    /// Workgroup counts along (z, x) covering the grid.
    pub workgroups: (u32, u32),
}

impl StepPipelines {
    /// Compile the kernel module and build pipelines for `roles`.
    ///
    /// `module_src` is an already-expanded kernel source (base module, or
    /// injection module when a role is [`FieldRole::Injection`]).
    pub fn new(
        gpu: &GpuContext,
        resources: &SolverResources,
        module_src: &str,
        roles: &[FieldRole],
        shape: WorkgroupShape,
        size_z: usize,
        size_x: usize,
    ) -> Result<Self, EchoError> {
        if roles.is_empty() {
            return Err(EchoError::Config("no field roles configured".into()));
        }
        let device = gpu.device();
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("wave step kernels"),
            source: wgpu::ShaderSource::Wgsl(module_src.into()),
        });

        let grid_layouts = resources.layouts_for(&[0, 1, 2])?;
        let uniform_layouts = resources.layouts_for(&[0])?;

        let forward_diff = make_pipeline(device, &module, "forward_diff", &grid_layouts);
        let cpml_first = make_pipeline(device, &module, "apply_cpml_first_order", &grid_layouts);
        let backward_diff = make_pipeline(device, &module, "backward_diff", &grid_layouts);
        let cpml_second = make_pipeline(device, &module, "apply_cpml_second_order", &grid_layouts);
        let increment_time = make_pipeline(device, &module, "increment_time", &uniform_layouts);

        let mut simulate_source = None;
        let mut simulate_free = None;
        let mut simulate_injection = None;
        for role in roles {
            match role {
                FieldRole::PointSource if simulate_source.is_none() => {
                    simulate_source = Some(make_pipeline(
                        device,
                        &module,
                        role.entry_point(),
                        &grid_layouts,
                    ));
                }
                FieldRole::Free if simulate_free.is_none() => {
                    simulate_free = Some(make_pipeline(
                        device,
                        &module,
                        role.entry_point(),
                        &grid_layouts,
                    ));
                }
                FieldRole::Injection if simulate_injection.is_none() => {
                    // Injection binds the trace group as well.
                    let layouts = resources.layouts_for(&[0, 1, 2, 3])?;
                    simulate_injection =
                        Some(make_pipeline(device, &module, role.entry_point(), &layouts));
                }
                _ => {}
            }
        }

        Ok(Self {
            forward_diff,
            cpml_first,
            backward_diff,
            cpml_second,
            simulate_source,
            simulate_free,
            simulate_injection,
            increment_time,
            workgroups: shape.dispatch_counts(size_z, size_x),
        })
    }

    /// The simulate variant for `role`.
    pub fn simulate_for(&self, role: FieldRole) -> Result<&wgpu::ComputePipeline, EchoError> {
        let pipeline = match role {
            FieldRole::PointSource => self.simulate_source.as_ref(),
            FieldRole::Free => self.simulate_free.as_ref(),
            FieldRole::Injection => self.simulate_injection.as_ref(),
        };
        pipeline.ok_or_else(|| {
            EchoError::Config(format!("no simulate pipeline compiled for {role:?}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::shaders::WorkgroupShape;

    #[test]
    fn entry_points_per_role() {
        assert_eq!(FieldRole::PointSource.entry_point(), "simulate");
        assert_eq!(FieldRole::Free.entry_point(), "simulate_free");
        assert_eq!(FieldRole::Injection.entry_point(), "simulate_injection");
    }

    #[test]
    fn workgroup_counts_cover_grid() {
        let shape = WorkgroupShape { z: 8, x: 8 };
        assert_eq!(shape.dispatch_counts(1000, 1000), (125, 125));
        assert_eq!(shape.dispatch_counts(1001, 1000), (126, 125));
        // Coverage: counts * shape >= dims
        let (wz, wx) = shape.dispatch_counts(1001, 999);
        assert!(wz * 8 >= 1001);
        assert!(wx * 8 >= 999);
    }
}
