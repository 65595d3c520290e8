// SPDX-License-Identifier: AGPL-3.0-only

//! Per-field GPU state: the pressure ring plus derivative and CPML
//! scratch arrays.
//!
//! One [`FieldState`] describes the eleven storage arrays a propagating
//! field occupies, as manifest slots. Forward and time-reversal runs
//! instantiate it once; migration instantiates it twice (incident and
//! back-propagated fields) with distinct name prefixes and manifest
//! groups.

use crate::error::EchoError;
use crate::grid::Grid;
use crate::solver::resources::BufferSlot;

/// Binding order of a field's arrays within its bind group. Matches the
/// kernel declarations.
pub const FIELD_ARRAYS: [&str; 11] = [
    "p_previous",
    "p_current",
    "p_next",
    "dp_z",
    "dp_x",
    "d2p_z",
    "d2p_x",
    "psi_z",
    "psi_x",
    "phi_z",
    "phi_x",
];

/// Optional initial pressure state (migration seeds its back-propagated
/// field from time-reversal snapshots).
#[derive(Debug, Clone)]
pub struct FieldSeed {
    pub current: Vec<f32>,
    pub previous: Vec<f32>,
}

impl FieldSeed {
    pub fn validate(&self, grid: &Grid) -> Result<(), EchoError> {
        if self.current.len() != grid.cell_count() || self.previous.len() != grid.cell_count() {
            return Err(EchoError::Config(format!(
                "field seed frames must hold {} cells, got {} and {}",
                grid.cell_count(),
                self.current.len(),
                self.previous.len()
            )));
        }
        Ok(())
    }
}

/// One propagating field's identity in the buffer manifest.
#[derive(Debug, Clone)]
pub struct FieldState {
    prefix: String,
    group: u32,
}

impl FieldState {
    /// `prefix` keeps the two migration fields' buffer names distinct;
    /// `group` is the manifest bind-group index holding the arrays.
    pub fn new(prefix: &str, group: u32) -> Self {
        Self {
            prefix: prefix.into(),
            group,
        }
    }

    pub const fn group(&self) -> u32 {
        self.group
    }

    /// Manifest name of one of this field's arrays.
    pub fn name(&self, array: &str) -> String {
        format!("{}{array}", self.prefix)
    }

    /// The buffer read back after each step.
    pub fn p_next_name(&self) -> String {
        self.name("p_next")
    }

    /// Declare all eleven arrays as manifest slots.
    ///
    /// Everything starts zeroed unless a seed supplies the pressure ring's
    /// `current` and `previous` levels.
    pub fn slots(
        &self,
        grid: &Grid,
        seed: Option<&FieldSeed>,
    ) -> Result<Vec<BufferSlot>, EchoError> {
        if let Some(seed) = seed {
            seed.validate(grid)?;
        }
        let cells = grid.cell_count();
        let slots = FIELD_ARRAYS
            .iter()
            .enumerate()
            .map(|(binding, array)| {
                let name = self.name(array);
                match (*array, seed) {
                    ("p_previous", Some(s)) => {
                        BufferSlot::seeded_f32(&name, self.group, binding as u32, &s.previous)
                    }
                    ("p_current", Some(s)) => {
                        BufferSlot::seeded_f32(&name, self.group, binding as u32, &s.current)
                    }
                    _ => BufferSlot::zeroed_f32(&name, self.group, binding as u32, cells),
                }
            })
            .collect();
        Ok(slots)
    }
}
