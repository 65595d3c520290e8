// SPDX-License-Identifier: AGPL-3.0-only

//! CPU mirror of the GPU step kernels.
//!
//! Same formulas, same stage order, same edge handling as the WGSL — one
//! leapfrog step is forward difference, first-order CPML, backward
//! difference, second-order CPML, the simulate update with per-cell ring
//! rotation, then the time increment. Physics tests run against this so
//! the suite needs no GPU, and a GPU run can be checked for parity
//! against it cell by cell.

use crate::grid::{AbsorbingBoundary, Grid, Medium};
use rayon::prelude::*;

/// What a CPU field adds at its own cell each step.
#[derive(Debug, Clone)]
pub enum CpuInjector {
    /// Point source: add `trace[t]` at `(z, x)`.
    PointSource {
        z: usize,
        x: usize,
        trace: Vec<f32>,
    },
    /// Transducer injection: cells with `cell_map >= 0` add their trace.
    Traces {
        cell_map: Vec<i32>,
        traces: Vec<Vec<f32>>,
    },
    /// Free propagation.
    None,
}

/// One propagating field's arrays.
#[derive(Debug, Clone)]
pub struct CpuField {
    pub p_previous: Vec<f32>,
    pub p_current: Vec<f32>,
    pub p_next: Vec<f32>,
    dp_z: Vec<f32>,
    dp_x: Vec<f32>,
    d2p_z: Vec<f32>,
    d2p_x: Vec<f32>,
    psi_z: Vec<f32>,
    psi_x: Vec<f32>,
    phi_z: Vec<f32>,
    phi_x: Vec<f32>,
    injector: CpuInjector,
}

impl CpuField {
    fn new(cells: usize, injector: CpuInjector) -> Self {
        Self {
            p_previous: vec![0.0; cells],
            p_current: vec![0.0; cells],
            p_next: vec![0.0; cells],
            dp_z: vec![0.0; cells],
            dp_x: vec![0.0; cells],
            d2p_z: vec![0.0; cells],
            d2p_x: vec![0.0; cells],
            psi_z: vec![0.0; cells],
            psi_x: vec![0.0; cells],
            phi_z: vec![0.0; cells],
            phi_x: vec![0.0; cells],
            injector,
        }
    }
}

/// CPU implementation of the full step pipeline over one or more fields.
pub struct CpuSolver {
    grid: Grid,
    speed: Vec<f32>,
    boundary: AbsorbingBoundary,
    fields: Vec<CpuField>,
    time: u32,
}

impl CpuSolver {
    pub fn new(grid: Grid, medium: &Medium, boundary: AbsorbingBoundary) -> Self {
        Self {
            grid,
            speed: medium.speed().to_vec(),
            boundary,
            fields: Vec::new(),
            time: 0,
        }
    }

    /// Add a field starting from rest.
    pub fn add_field(&mut self, injector: CpuInjector) -> usize {
        self.fields
            .push(CpuField::new(self.grid.cell_count(), injector));
        self.fields.len() - 1
    }

    /// Add a field with the pressure ring seeded from snapshots.
    pub fn add_seeded_field(
        &mut self,
        injector: CpuInjector,
        current: Vec<f32>,
        previous: Vec<f32>,
    ) -> usize {
        let mut field = CpuField::new(self.grid.cell_count(), injector);
        field.p_current = current;
        field.p_previous = previous;
        self.fields.push(field);
        self.fields.len() - 1
    }

    pub const fn time(&self) -> u32 {
        self.time
    }

    pub fn field(&self, idx: usize) -> &CpuField {
        &self.fields[idx]
    }

    /// Advance every field one step, then the shared clock.
    pub fn step(&mut self) {
        let t = self.time;
        for field in &mut self.fields {
            Self::forward_diff(&self.grid, field);
            Self::cpml_first_order(&self.grid, &self.boundary, field);
            Self::backward_diff(&self.grid, field);
            Self::cpml_second_order(&self.grid, &self.boundary, field);
            Self::simulate(&self.grid, &self.speed, field, t);
        }
        self.time += 1;
    }

    /// Forward difference; last row/column gets zero gradient.
    fn forward_diff(grid: &Grid, field: &mut CpuField) {
        let (size_z, size_x) = (grid.size_z, grid.size_x);
        let (dz, dx) = (grid.spacing_z, grid.spacing_x);
        let p = &field.p_current;
        field
            .dp_z
            .par_chunks_mut(size_x)
            .enumerate()
            .for_each(|(z, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = if z + 1 < size_z {
                        (p[(z + 1) * size_x + x] - p[z * size_x + x]) / dz
                    } else {
                        0.0
                    };
                }
            });
        field
            .dp_x
            .par_chunks_mut(size_x)
            .enumerate()
            .for_each(|(z, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = if x + 1 < size_x {
                        (p[z * size_x + x + 1] - p[z * size_x + x]) / dx
                    } else {
                        0.0
                    };
                }
            });
    }

    fn cpml_first_order(grid: &Grid, boundary: &AbsorbingBoundary, field: &mut CpuField) {
        Self::cpml_pass(
            grid,
            boundary,
            &mut field.psi_z,
            &mut field.psi_x,
            &mut field.dp_z,
            &mut field.dp_x,
        );
    }

    fn cpml_second_order(grid: &Grid, boundary: &AbsorbingBoundary, field: &mut CpuField) {
        Self::cpml_pass(
            grid,
            boundary,
            &mut field.phi_z,
            &mut field.phi_x,
            &mut field.d2p_z,
            &mut field.d2p_x,
        );
    }

    /// Recursive-convolution update: `mem = a*mem + (a-1)*d; d += mem`
    /// inside the layer masks, pass-through outside.
    fn cpml_pass(
        grid: &Grid,
        boundary: &AbsorbingBoundary,
        mem_z: &mut [f32],
        mem_x: &mut [f32],
        d_z: &mut [f32],
        d_x: &mut [f32],
    ) {
        let size_x = grid.size_x;
        mem_z
            .par_chunks_mut(size_x)
            .zip(d_z.par_chunks_mut(size_x))
            .enumerate()
            .for_each(|(z, (mem_row, d_row))| {
                if boundary.layer_mask_z[z] == 1 {
                    let a = boundary.absorption_z[z];
                    for (mem, d) in mem_row.iter_mut().zip(d_row.iter_mut()) {
                        *mem = a * *mem + (a - 1.0) * *d;
                        *d += *mem;
                    }
                }
            });
        mem_x
            .par_chunks_mut(size_x)
            .zip(d_x.par_chunks_mut(size_x))
            .for_each(|(mem_row, d_row)| {
                for x in 0..size_x {
                    if boundary.layer_mask_x[x] == 1 {
                        let a = boundary.absorption_x[x];
                        let mem = &mut mem_row[x];
                        let d = &mut d_row[x];
                        *mem = a * *mem + (a - 1.0) * *d;
                        *d += *mem;
                    }
                }
            });
    }

    /// Backward difference over the absorbed first derivatives; row and
    /// column zero get zero gradient.
    fn backward_diff(grid: &Grid, field: &mut CpuField) {
        let size_x = grid.size_x;
        let (dz, dx) = (grid.spacing_z, grid.spacing_x);
        let dp_z = &field.dp_z;
        let dp_x = &field.dp_x;
        field
            .d2p_z
            .par_chunks_mut(size_x)
            .enumerate()
            .for_each(|(z, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = if z >= 1 {
                        (dp_z[z * size_x + x] - dp_z[(z - 1) * size_x + x]) / dz
                    } else {
                        0.0
                    };
                }
            });
        field
            .d2p_x
            .par_chunks_mut(size_x)
            .enumerate()
            .for_each(|(z, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = if x >= 1 {
                        (dp_x[z * size_x + x] - dp_x[z * size_x + x - 1]) / dx
                    } else {
                        0.0
                    };
                }
            });
    }

    /// Leapfrog update, injection, and the per-cell ring rotation.
    fn simulate(grid: &Grid, speed: &[f32], field: &mut CpuField, t: u32) {
        let dt = grid.time_step;
        for i in 0..grid.cell_count() {
            let scale = speed[i] * dt;
            let mut next = 2.0 * field.p_current[i] - field.p_previous[i]
                + scale * scale * (field.d2p_z[i] + field.d2p_x[i]);
            match &field.injector {
                CpuInjector::PointSource { z, x, trace } => {
                    if i == grid.index(*z, *x) {
                        if let Some(v) = trace.get(t as usize) {
                            next += v;
                        }
                    }
                }
                CpuInjector::Traces { cell_map, traces } => {
                    let ti = cell_map[i];
                    if ti >= 0 {
                        if let Some(v) = traces[ti as usize].get(t as usize) {
                            next += v;
                        }
                    }
                }
                CpuInjector::None => {}
            }
            field.p_next[i] = next;
            field.p_previous[i] = field.p_current[i];
            field.p_current[i] = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::BoundarySpec;

    fn setup(c: f32) -> (Grid, Medium, AbsorbingBoundary) {
        let grid = Grid::new(32, 32, 1.5e-3, 1.5e-3, 4e-7, 50).expect("grid");
        let medium = Medium::uniform(&grid, c).expect("medium");
        let boundary = AbsorbingBoundary::new(&grid, BoundarySpec::all(), 8, 3e6).expect("boundary");
        (grid, medium, boundary)
    }

    #[test]
    fn quiet_field_stays_quiet() {
        let (grid, medium, boundary) = setup(1500.0);
        let mut solver = CpuSolver::new(grid, &medium, boundary);
        let f = solver.add_field(CpuInjector::None);
        for _ in 0..20 {
            solver.step();
        }
        assert!(solver.field(f).p_next.iter().all(|v| *v == 0.0));
        assert_eq!(solver.time(), 20);
    }

    #[test]
    fn point_source_perturbs_its_cell_first() {
        let (grid, medium, boundary) = setup(1500.0);
        let src = grid.index(16, 16);
        let mut solver = CpuSolver::new(grid, &medium, boundary);
        let f = solver.add_field(CpuInjector::PointSource {
            z: 16,
            x: 16,
            trace: vec![1.0],
        });
        solver.step();
        let field = solver.field(f);
        assert_eq!(field.p_next[src], 1.0);
        let touched = field.p_next.iter().filter(|v| **v != 0.0).count();
        assert_eq!(touched, 1);
    }

    #[test]
    fn disturbance_spreads_to_neighbors() {
        let (grid, medium, boundary) = setup(1500.0);
        let mut solver = CpuSolver::new(grid, &medium, boundary);
        let f = solver.add_field(CpuInjector::PointSource {
            z: 16,
            x: 16,
            trace: vec![1.0],
        });
        for _ in 0..5 {
            solver.step();
        }
        let field = solver.field(f);
        assert!(field.p_next[grid.index(15, 16)].abs() > 0.0);
        assert!(field.p_next[grid.index(16, 17)].abs() > 0.0);
    }

    #[test]
    fn zero_speed_cells_never_acquire_pressure() {
        let (grid, mut medium, boundary) = setup(1500.0);
        let wall = grid.index(10, 16);
        medium.speed_mut()[wall] = 0.0;
        let mut solver = CpuSolver::new(grid, &medium, boundary);
        let f = solver.add_field(CpuInjector::PointSource {
            z: 16,
            x: 16,
            trace: vec![1.0, 0.5, 0.25],
        });
        for _ in 0..30 {
            solver.step();
        }
        assert_eq!(solver.field(f).p_next[wall], 0.0);
    }

    #[test]
    fn trace_injection_adds_at_mapped_cells() {
        let (grid, medium, boundary) = setup(1500.0);
        let mut cell_map = vec![-1i32; grid.cell_count()];
        cell_map[grid.index(4, 4)] = 0;
        cell_map[grid.index(4, 8)] = 1;
        let mut solver = CpuSolver::new(grid, &medium, boundary);
        let f = solver.add_field(CpuInjector::Traces {
            cell_map,
            traces: vec![vec![2.0], vec![-3.0]],
        });
        solver.step();
        let field = solver.field(f);
        assert_eq!(field.p_next[grid.index(4, 4)], 2.0);
        assert_eq!(field.p_next[grid.index(4, 8)], -3.0);
    }

    #[test]
    fn seeded_field_keeps_propagating() {
        let (grid, medium, boundary) = setup(1500.0);
        let mut current = vec![0.0; grid.cell_count()];
        current[grid.index(16, 16)] = 1.0;
        let previous = vec![0.0; grid.cell_count()];
        let mut solver = CpuSolver::new(grid, &medium, boundary);
        let f = solver.add_seeded_field(CpuInjector::None, current, previous);
        solver.step();
        // Leapfrog from the seed: the seeded cell evolves, neighbors pick up.
        let field = solver.field(f);
        assert!(field.p_next[grid.index(16, 16)] != 0.0);
    }

    #[test]
    fn two_fields_step_independently() {
        let (grid, medium, boundary) = setup(1500.0);
        let mut solver = CpuSolver::new(grid, &medium, boundary);
        let a = solver.add_field(CpuInjector::PointSource {
            z: 8,
            x: 8,
            trace: vec![1.0],
        });
        let b = solver.add_field(CpuInjector::None);
        solver.step();
        assert_eq!(solver.field(a).p_next[grid.index(8, 8)], 1.0);
        assert!(solver.field(b).p_next.iter().all(|v| *v == 0.0));
    }
}
