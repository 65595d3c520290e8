// SPDX-License-Identifier: AGPL-3.0-only

//! Grid geometry, medium model, and CPML absorbing-boundary construction.
//!
//! The domain is a dense 2-D grid in row-major `(z, x)` order. The medium
//! is a per-cell wave-speed field; zero-speed cells act as ideal
//! reflectors (no propagation into or out of them). Absorbing layers are
//! described per axis and per side by [`BoundarySpec`] — which edges
//! absorb is an explicit caller decision, never inferred from the
//! simulation mode.

use crate::error::EchoError;

/// Simulation grid: dimensions, cell spacing, and temporal extent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Grid {
    /// Cell count along z (rows).
    pub size_z: usize,
    /// Cell count along x (columns).
    pub size_x: usize,
    /// Cell spacing along z in meters.
    pub spacing_z: f32,
    /// Cell spacing along x in meters.
    pub spacing_x: f32,
    /// Time step in seconds.
    pub time_step: f32,
    /// Number of leapfrog steps to run.
    pub total_steps: u32,
}

impl Grid {
    /// Validate and construct a grid.
    ///
    /// Rejects zero dimensions and non-positive spacings or time step.
    /// `total_steps == 0` is allowed and means an immediately-complete run.
    pub fn new(
        size_z: usize,
        size_x: usize,
        spacing_z: f32,
        spacing_x: f32,
        time_step: f32,
        total_steps: u32,
    ) -> Result<Self, EchoError> {
        if size_z == 0 || size_x == 0 {
            return Err(EchoError::Config(format!(
                "grid dimensions must be positive, got {size_z}x{size_x}"
            )));
        }
        if spacing_z <= 0.0 || spacing_x <= 0.0 {
            return Err(EchoError::Config(format!(
                "cell spacing must be positive, got dz={spacing_z} dx={spacing_x}"
            )));
        }
        if time_step <= 0.0 {
            return Err(EchoError::Config(format!(
                "time step must be positive, got {time_step}"
            )));
        }
        Ok(Self {
            size_z,
            size_x,
            spacing_z,
            spacing_x,
            time_step,
            total_steps,
        })
    }

    /// Total cell count.
    pub const fn cell_count(&self) -> usize {
        self.size_z * self.size_x
    }

    /// Row-major flat index of cell `(z, x)`.
    pub const fn index(&self, z: usize, x: usize) -> usize {
        z * self.size_x + x
    }
}

/// Per-cell wave-speed field over a grid.
///
/// Zero-speed cells are ideal reflectors: the Laplacian contribution
/// vanishes there, so an initially-quiet reflector cell stays quiet while
/// waves bounce off it.
#[derive(Debug, Clone)]
pub struct Medium {
    size_z: usize,
    size_x: usize,
    speed: Vec<f32>,
}

impl Medium {
    /// Construct from a dense row-major speed field.
    pub fn new(grid: &Grid, speed: Vec<f32>) -> Result<Self, EchoError> {
        if speed.len() != grid.cell_count() {
            return Err(EchoError::Config(format!(
                "medium has {} cells, grid needs {}",
                speed.len(),
                grid.cell_count()
            )));
        }
        if speed.iter().any(|c| *c < 0.0 || !c.is_finite()) {
            return Err(EchoError::Config(
                "wave speeds must be finite and non-negative".into(),
            ));
        }
        Ok(Self {
            size_z: grid.size_z,
            size_x: grid.size_x,
            speed,
        })
    }

    /// Uniform medium at speed `c`.
    pub fn uniform(grid: &Grid, c: f32) -> Result<Self, EchoError> {
        Self::new(grid, vec![c; grid.cell_count()])
    }

    /// The dense speed field, row-major.
    pub fn speed(&self) -> &[f32] {
        &self.speed
    }

    /// Mutable access for scene construction (placing reflectors etc.).
    pub fn speed_mut(&mut self) -> &mut [f32] {
        &mut self.speed
    }

    /// Flat indices of all zero-speed (reflector) cells.
    pub fn reflectors(&self) -> Vec<usize> {
        self.speed
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == 0.0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Copy of this medium with every reflector cell replaced by
    /// `background_c`. Migration re-simulates the source through this
    /// filled medium so the incident field propagates past reflectors.
    pub fn fill_reflectors(&self, background_c: f32) -> Self {
        let speed = self
            .speed
            .iter()
            .map(|c| if *c == 0.0 { background_c } else { *c })
            .collect();
        Self {
            size_z: self.size_z,
            size_x: self.size_x,
            speed,
        }
    }

    /// Maximum wave speed in the medium.
    pub fn max_speed(&self) -> f32 {
        self.speed.iter().fold(0.0f32, |m, c| m.max(*c))
    }

    /// Courant number `max(c) * dt * (1/dz + 1/dx)`.
    ///
    /// The leapfrog scheme is stable when this is at most 1. Not enforced
    /// at construction; callers decide via [`Medium::is_stable`].
    pub fn courant_number(&self, grid: &Grid) -> f32 {
        self.max_speed() * grid.time_step * (1.0 / grid.spacing_z + 1.0 / grid.spacing_x)
    }

    /// Whether the CFL condition holds for this medium on `grid`.
    pub fn is_stable(&self, grid: &Grid) -> bool {
        self.courant_number(grid) <= 1.0
    }
}

/// Absorption flags for the two sides of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgePair {
    /// Low-index side (z = 0 / x = 0).
    pub start: bool,
    /// High-index side (z = size_z - 1 / x = size_x - 1).
    pub end: bool,
}

/// Which domain edges carry an absorbing layer.
///
/// Explicit per-axis, per-side flags. Nothing about the simulation mode
/// changes which edges absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundarySpec {
    pub z: EdgePair,
    pub x: EdgePair,
}

impl BoundarySpec {
    /// Absorb on all four edges.
    pub const fn all() -> Self {
        Self {
            z: EdgePair { start: true, end: true },
            x: EdgePair { start: true, end: true },
        }
    }

    /// Absorb everywhere except the z = 0 edge — the classic transducer
    /// configuration with the array on a reflecting top surface.
    pub const fn open_top() -> Self {
        Self {
            z: EdgePair { start: false, end: true },
            x: EdgePair { start: true, end: true },
        }
    }

    /// No absorption anywhere (fully reflecting box).
    pub const fn none() -> Self {
        Self {
            z: EdgePair { start: false, end: false },
            x: EdgePair { start: false, end: false },
        }
    }
}

/// Per-axis CPML absorption profiles and layer masks.
///
/// For each axis this holds a 1-D multiplier array (length = that axis's
/// cell count) and a 0/1 mask marking cells inside an absorbing layer.
/// The multiplier is exactly 1.0 outside every layer; inside, it decays
/// from 1.0 at the layer's interior edge to its minimum at the domain
/// boundary following `exp(-damping * (k / layer)^2 * dt)` where `k`
/// counts cells from the interior edge.
#[derive(Debug, Clone)]
pub struct AbsorbingBoundary {
    pub layer_size: usize,
    pub damping: f32,
    /// Multiplier per z row.
    pub absorption_z: Vec<f32>,
    /// Multiplier per x column.
    pub absorption_x: Vec<f32>,
    /// 1 where the z row lies in an absorbing layer.
    pub layer_mask_z: Vec<u32>,
    /// 1 where the x column lies in an absorbing layer.
    pub layer_mask_x: Vec<u32>,
}

impl AbsorbingBoundary {
    /// Build the absorption profiles for `grid` per `spec`.
    ///
    /// Rejects layers that would overlap from opposite sides
    /// (`layer_size * 2 > min(size_z, size_x)`) and negative damping.
    pub fn new(
        grid: &Grid,
        spec: BoundarySpec,
        layer_size: usize,
        damping: f32,
    ) -> Result<Self, EchoError> {
        if layer_size * 2 > grid.size_z.min(grid.size_x) {
            return Err(EchoError::Config(format!(
                "absorbing layer of {layer_size} cells does not fit a {}x{} grid",
                grid.size_z, grid.size_x
            )));
        }
        if damping < 0.0 || !damping.is_finite() {
            return Err(EchoError::Config(format!(
                "damping coefficient must be finite and non-negative, got {damping}"
            )));
        }

        let profile = Self::profile(layer_size, damping, grid.time_step);
        let (absorption_z, layer_mask_z) = Self::axis(grid.size_z, &profile, spec.z);
        let (absorption_x, layer_mask_x) = Self::axis(grid.size_x, &profile, spec.x);

        Ok(Self {
            layer_size,
            damping,
            absorption_z,
            absorption_x,
            layer_mask_z,
            layer_mask_x,
        })
    }

    /// The one-sided decay profile, interior edge first.
    ///
    /// `profile[0] = 1.0`; `profile[k]` decays toward the boundary.
    fn profile(layer_size: usize, damping: f32, time_step: f32) -> Vec<f32> {
        (0..layer_size)
            .map(|k| {
                let frac = k as f32 / layer_size as f32;
                (-(damping * frac * frac) * time_step).exp()
            })
            .collect()
    }

    /// Lay the profile into a full axis according to its edge flags.
    fn axis(len: usize, profile: &[f32], edges: EdgePair) -> (Vec<f32>, Vec<u32>) {
        let layer = profile.len();
        let mut absorption = vec![1.0f32; len];
        let mut mask = vec![0u32; len];
        if edges.start {
            // Mirrored: boundary cell gets the deepest decay.
            for k in 0..layer {
                absorption[k] = profile[layer - 1 - k];
                mask[k] = 1;
            }
        }
        if edges.end {
            for k in 0..layer {
                absorption[len - layer + k] = profile[k];
                mask[len - layer + k] = 1;
            }
        }
        (absorption, mask)
    }
}
