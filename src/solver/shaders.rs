// SPDX-License-Identifier: AGPL-3.0-only

//! WGSL kernel sources and their template expansion.
//!
//! The kernel file is a template: workgroup dimensions are placeholder
//! tokens, and the trace-injection kernel carries marker comments where
//! per-transducer bindings and branches get spliced in. Expansion is pure
//! string work, kept separate from buffer bookkeeping so both halves are
//! testable without a device.

use crate::error::EchoError;

/// The step-kernel template.
pub const WAVE_KERNELS: &str = include_str!("shaders/wave_kernels.wgsl");

const BINDINGS_MARKER: &str = "//@INJECTION_BINDINGS@";
const ADD_MARKER: &str = "//@INJECTION_ADD@";
const KERNEL_BEGIN: &str = "//@INJECTION_KERNEL_BEGIN@";
const KERNEL_END: &str = "//@INJECTION_KERNEL_END@";

/// Workgroup shape for the 2-D grid kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkgroupShape {
    pub z: u32,
    pub x: u32,
}

impl Default for WorkgroupShape {
    fn default() -> Self {
        Self { z: 8, x: 8 }
    }
}

impl WorkgroupShape {
    /// Dispatch grid covering `(size_z, size_x)` cells: `ceil(dim / ws)`
    /// workgroups per axis.
    pub const fn dispatch_counts(&self, size_z: usize, size_x: usize) -> (u32, u32) {
        (
            (size_z as u32).div_ceil(self.z),
            (size_x as u32).div_ceil(self.x),
        )
    }
}

/// Replace the `WG_Z` / `WG_X` / `WG_Y` placeholder tokens.
pub fn substitute_workgroup_size(src: &str, shape: WorkgroupShape) -> String {
    src.replace("WG_Z", &shape.z.to_string())
        .replace("WG_X", &shape.x.to_string())
        .replace("WG_Y", "1")
}

/// Per-transducer trace binding declarations for bind group `group`.
///
/// Binding 0 is the cell-to-transducer map; traces follow at 1..=n.
pub fn injection_bindings(group: u32, transducers: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "@group({group}) @binding(0) var<storage, read> transducer_map: array<i32>;\n"
    ));
    for t in 0..transducers {
        out.push_str(&format!(
            "@group({group}) @binding({}) var<storage, read> injected_trace_{t}: array<f32>;\n",
            t + 1
        ));
    }
    out
}

/// The generated per-transducer injection branches.
pub fn injection_branches(transducers: usize) -> String {
    let mut out = String::new();
    for t in 0..transducers {
        out.push_str(&format!(
            "        if (ti == {t} && t < arrayLength(&injected_trace_{t})) {{ next = next + injected_trace_{t}[t]; }}\n"
        ));
    }
    out
}

/// Kernel module without the injection kernel (forward and migration).
pub fn base_module(shape: WorkgroupShape) -> Result<String, EchoError> {
    let stripped = strip_between(WAVE_KERNELS, KERNEL_BEGIN, KERNEL_END)?;
    let stripped = stripped.replace(BINDINGS_MARKER, "");
    Ok(substitute_workgroup_size(&stripped, shape))
}

/// Kernel module with the injection kernel expanded for `transducers`
/// trace bindings in bind group `group`.
pub fn injection_module(
    shape: WorkgroupShape,
    group: u32,
    transducers: usize,
) -> Result<String, EchoError> {
    if transducers == 0 {
        return Err(EchoError::Config(
            "injection module needs at least one transducer".into(),
        ));
    }
    if !WAVE_KERNELS.contains(BINDINGS_MARKER) || !WAVE_KERNELS.contains(ADD_MARKER) {
        return Err(EchoError::Config(
            "kernel template is missing its injection markers".into(),
        ));
    }
    let expanded = WAVE_KERNELS
        .replace(BINDINGS_MARKER, &injection_bindings(group, transducers))
        .replace(ADD_MARKER, &injection_branches(transducers))
        .replace(KERNEL_BEGIN, "")
        .replace(KERNEL_END, "");
    Ok(substitute_workgroup_size(&expanded, shape))
}

fn strip_between(src: &str, begin: &str, end: &str) -> Result<String, EchoError> {
    let start = src
        .find(begin)
        .ok_or_else(|| EchoError::Config(format!("kernel template missing '{begin}'")))?;
    let stop = src
        .find(end)
        .ok_or_else(|| EchoError::Config(format!("kernel template missing '{end}'")))?;
    if stop < start {
        return Err(EchoError::Config("kernel template markers out of order".into()));
    }
    let mut out = String::with_capacity(src.len());
    out.push_str(&src[..start]);
    out.push_str(&src[stop + end.len()..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_counts_exact_and_remainder() {
        let shape = WorkgroupShape { z: 8, x: 8 };
        assert_eq!(shape.dispatch_counts(1000, 1000), (125, 125));
        assert_eq!(shape.dispatch_counts(1001, 999), (126, 125));
        assert_eq!(shape.dispatch_counts(1, 1), (1, 1));
    }

    #[test]
    fn workgroup_tokens_fully_substituted() {
        let out = substitute_workgroup_size(WAVE_KERNELS, WorkgroupShape { z: 16, x: 4 });
        assert!(!out.contains("WG_Z"));
        assert!(!out.contains("WG_X"));
        assert!(!out.contains("WG_Y"));
        assert!(out.contains("@workgroup_size(16, 4, 1)"));
    }

    #[test]
    fn base_module_has_no_injection_kernel() {
        let src = base_module(WorkgroupShape::default()).expect("base module");
        assert!(!src.contains("simulate_injection"));
        assert!(!src.contains("transducer_map"));
        assert!(!src.contains("@INJECTION"));
        for entry in [
            "fn forward_diff",
            "fn apply_cpml_first_order",
            "fn backward_diff",
            "fn apply_cpml_second_order",
            "fn simulate",
            "fn simulate_free",
            "fn increment_time",
        ] {
            assert!(src.contains(entry), "missing {entry}");
        }
    }

    #[test]
    fn injection_module_declares_each_trace() {
        let src = injection_module(WorkgroupShape::default(), 3, 4).expect("injection module");
        assert!(src.contains("fn simulate_injection"));
        assert!(src.contains("@group(3) @binding(0) var<storage, read> transducer_map"));
        for t in 0..4 {
            assert!(src.contains(&format!(
                "@group(3) @binding({}) var<storage, read> injected_trace_{t}",
                t + 1
            )));
            assert!(src.contains(&format!("if (ti == {t}")));
        }
        assert!(!src.contains("@INJECTION"));
    }

    #[test]
    fn injection_module_rejects_zero_transducers() {
        assert!(injection_module(WorkgroupShape::default(), 3, 0).is_err());
    }

    #[test]
    fn bindings_and_branches_count() {
        let bindings = injection_bindings(3, 2);
        assert_eq!(bindings.matches("injected_trace_").count(), 2);
        let branches = injection_branches(2);
        assert_eq!(branches.matches("next = next +").count(), 2);
    }
}
