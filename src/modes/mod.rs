// SPDX-License-Identifier: AGPL-3.0-only

//! Run orchestrators: forward simulation, time reversal, and
//! reverse-time migration.
//!
//! Each mode owns its validated configuration and drives the shared step
//! pipeline; the GPU context is handed in at `run` time so configuration
//! errors surface without a device.

pub mod forward;
pub mod migration;
pub mod time_reversal;

use crate::grid::{AbsorbingBoundary, Medium};
use crate::solver::resources::BufferSlot;
use crate::solver::SimParams;

/// Bind group 0 (parameters, medium, source trace, clock) and bind
/// group 2 (absorption profiles) — the slots every mode shares.
pub(crate) fn shared_slots(
    medium: &Medium,
    boundary: &AbsorbingBoundary,
    params: SimParams,
    source_trace: &[f32],
) -> Vec<BufferSlot> {
    vec![
        BufferSlot::uniform("params", 0, 0, params.as_bytes()),
        BufferSlot::read_only_f32("speed", 0, 1, medium.speed()),
        BufferSlot::read_only_f32("source_trace", 0, 2, source_trace),
        // Single u32 clock, starts at zero.
        BufferSlot::zeroed_u32("time_index", 0, 3, 1),
        BufferSlot::read_only_f32("absorption_z", 2, 0, &boundary.absorption_z),
        BufferSlot::read_only_f32("absorption_x", 2, 1, &boundary.absorption_x),
        BufferSlot::read_only_u32("layer_mask_z", 2, 2, &boundary.layer_mask_z),
        BufferSlot::read_only_u32("layer_mask_x", 2, 3, &boundary.layer_mask_x),
    ]
}
