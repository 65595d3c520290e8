// SPDX-License-Identifier: AGPL-3.0-only

//! echofield — 2-D acoustic wave propagation on the GPU.
//!
//! Finite-difference time-domain (FDTD) solver for the scalar wave
//! equation with convolutional PML absorbing boundaries, executed as
//! wgpu compute kernels. Three orchestration modes sit on top of the
//! same step pipeline:
//!
//! ## Modes
//!   - `modes::forward` — propagate a point-source pulse through a
//!     heterogeneous medium and record pressure at transducer positions
//!   - `modes::time_reversal` — inject time-flipped recordings back into
//!     the medium and accumulate a per-cell L2 image of the refocused field
//!   - `modes::migration` — reverse-time migration: re-simulate the source
//!     alongside the back-propagated field and accumulate their pointwise
//!     product as the imaging condition
//!
//! ## Layers
//!   - `gpu` — device/adapter selection and readback plumbing
//!   - `grid` / `field` / `transducer` — simulation data model
//!   - `solver` — kernel sources, buffer manifest, pipelines, step loop
//!   - `io` — raw f32 array persistence with JSON sidecar metadata

pub mod error;
pub mod field;
pub mod gpu;
pub mod grid;
pub mod io;
pub mod modes;
pub mod solver;
pub mod transducer;

pub use error::EchoError;
