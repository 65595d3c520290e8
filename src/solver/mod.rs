// SPDX-License-Identifier: AGPL-3.0-only

//! The GPU step pipeline: kernel sources, buffer manifest, pipelines,
//! and the stepping state machine, plus a CPU mirror used for parity
//! testing.

pub mod cpu_reference;
pub mod dispatch;
pub mod pipelines;
pub mod resources;
pub mod shaders;

use crate::grid::Grid;
use bytemuck::{Pod, Zeroable};

/// Uniform parameter block shared by every kernel. Layout must match the
/// `SimParams` struct in the WGSL.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SimParams {
    pub size_z: u32,
    pub size_x: u32,
    pub source_z: u32,
    pub source_x: u32,
    pub spacing_z: f32,
    pub spacing_x: f32,
    pub time_step: f32,
    pub total_steps: u32,
}

impl SimParams {
    pub fn new(grid: &Grid, source_z: usize, source_x: usize) -> Self {
        Self {
            size_z: grid.size_z as u32,
            size_x: grid.size_x as u32,
            source_z: source_z as u32,
            source_x: source_x as u32,
            spacing_z: grid.spacing_z,
            spacing_x: grid.spacing_x,
            time_step: grid.time_step,
            total_steps: grid.total_steps,
        }
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(self).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_params_layout_matches_wgsl() {
        // 4 u32 + 3 f32 + 1 u32, tightly packed.
        assert_eq!(std::mem::size_of::<SimParams>(), 32);
        assert_eq!(std::mem::align_of::<SimParams>(), 4);
    }

    #[test]
    fn sim_params_from_grid() {
        let grid = Grid::new(100, 200, 1.5e-3, 2.0e-3, 5e-7, 1000).expect("valid grid");
        let p = SimParams::new(&grid, 10, 20);
        assert_eq!(p.size_z, 100);
        assert_eq!(p.size_x, 200);
        assert_eq!(p.source_z, 10);
        assert_eq!(p.source_x, 20);
        assert_eq!(p.total_steps, 1000);
        assert_eq!(p.as_bytes().len(), 32);
    }
}
