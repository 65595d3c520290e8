// SPDX-License-Identifier: AGPL-3.0-only

//! Array persistence: raw little-endian f32 files with a JSON sidecar.
//!
//! Every artifact the solver reads or writes — transducer recordings,
//! source pulses, field snapshots, output images — is a dense f32 array.
//! The array goes to `<path>` as raw little-endian bytes and its shape to
//! `<path>.json`, so files stay loadable from other tooling without a
//! custom container format.

use crate::error::EchoError;
use crate::grid::Grid;
use crate::transducer::Recording;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Sidecar metadata describing an array file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayMeta {
    pub rows: usize,
    pub cols: usize,
}

fn sidecar_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".json");
    std::path::PathBuf::from(name)
}

/// Write a row-major f32 array and its shape sidecar.
pub fn save_array(path: &Path, rows: usize, cols: usize, data: &[f32]) -> Result<(), EchoError> {
    if data.len() != rows * cols {
        return Err(EchoError::Config(format!(
            "array has {} values, shape {rows}x{cols} needs {}",
            data.len(),
            rows * cols
        )));
    }
    let bytes: &[u8] = bytemuck::cast_slice(data);
    std::fs::write(path, bytes)
        .map_err(|e| EchoError::DataLoad(format!("{}: {e}", path.display())))?;
    let meta = serde_json::to_string(&ArrayMeta { rows, cols })
        .map_err(|e| EchoError::DataLoad(format!("sidecar encode: {e}")))?;
    let sidecar = sidecar_path(path);
    std::fs::write(&sidecar, meta)
        .map_err(|e| EchoError::DataLoad(format!("{}: {e}", sidecar.display())))?;
    Ok(())
}

/// Load a row-major f32 array, checking its length against the sidecar.
pub fn load_array(path: &Path) -> Result<(ArrayMeta, Vec<f32>), EchoError> {
    let sidecar = sidecar_path(path);
    let meta_text = std::fs::read_to_string(&sidecar)
        .map_err(|e| EchoError::DataLoad(format!("{}: {e}", sidecar.display())))?;
    let meta: ArrayMeta = serde_json::from_str(&meta_text)
        .map_err(|e| EchoError::DataLoad(format!("{}: {e}", sidecar.display())))?;

    let bytes = std::fs::read(path)
        .map_err(|e| EchoError::DataLoad(format!("{}: {e}", path.display())))?;
    if bytes.len() % 4 != 0 {
        return Err(EchoError::DataLoad(format!(
            "{}: length {} is not a multiple of 4",
            path.display(),
            bytes.len()
        )));
    }
    let data: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    if data.len() != meta.rows * meta.cols {
        return Err(EchoError::DataLoad(format!(
            "{}: holds {} values, sidecar shape {}x{} needs {}",
            path.display(),
            data.len(),
            meta.rows,
            meta.cols,
            meta.rows * meta.cols
        )));
    }
    Ok((meta, data))
}

/// Persist a transducer recording.
pub fn save_recording(path: &Path, recording: &Recording) -> Result<(), EchoError> {
    save_array(path, recording.rows, recording.steps, recording.data())
}

/// Load a transducer recording.
pub fn load_recording(path: &Path) -> Result<Recording, EchoError> {
    let (meta, data) = load_array(path)?;
    Recording::from_data(meta.rows, meta.cols, data)
}

/// Load a full-grid field snapshot, checking the shape against `grid`.
pub fn load_frame(path: &Path, grid: &Grid) -> Result<Vec<f32>, EchoError> {
    let (meta, data) = load_array(path)?;
    if meta.rows != grid.size_z || meta.cols != grid.size_x {
        return Err(EchoError::DataLoad(format!(
            "{}: snapshot is {}x{}, grid is {}x{}",
            path.display(),
            meta.rows,
            meta.cols,
            grid.size_z,
            grid.size_x
        )));
    }
    Ok(data)
}

/// Load a 1-D source pulse (single-row array), fitted to the run length.
pub fn load_pulse(path: &Path, total_steps: usize) -> Result<Vec<f32>, EchoError> {
    let (meta, data) = load_array(path)?;
    if meta.rows != 1 {
        return Err(EchoError::DataLoad(format!(
            "{}: pulse must be a single row, got {} rows",
            path.display(),
            meta.rows
        )));
    }
    Ok(crate::transducer::resample(&data, total_steps))
}
