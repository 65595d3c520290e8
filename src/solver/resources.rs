// SPDX-License-Identifier: AGPL-3.0-only

//! Declarative GPU buffer manifest and bind-group construction.
//!
//! Orchestrators describe every buffer a run needs — name, bind group,
//! binding index, storage class, initial contents — as [`BufferSlot`]
//! records. The manifest is validated up front (duplicate bindings,
//! duplicate names) so misconfiguration fails before any dispatch, and
//! the backend derives bind-group layouts from the records instead of
//! inspecting kernel text.

use crate::error::EchoError;
use crate::gpu::GpuContext;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use wgpu::util::DeviceExt;

/// How a kernel accesses a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotClass {
    Uniform,
    ReadOnly,
    ReadWrite,
}

/// Initial contents of a buffer.
#[derive(Debug, Clone)]
pub enum SlotInit {
    /// Allocate `n` bytes and clear them on the GPU before first use.
    Zeroed(u64),
    /// Upload these bytes at creation.
    Data(Vec<u8>),
}

/// One buffer the solver will bind.
#[derive(Debug, Clone)]
pub struct BufferSlot {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub class: SlotClass,
    pub init: SlotInit,
}

impl BufferSlot {
    pub fn uniform(name: &str, group: u32, binding: u32, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            group,
            binding,
            class: SlotClass::Uniform,
            init: SlotInit::Data(data),
        }
    }

    pub fn read_only_f32(name: &str, group: u32, binding: u32, data: &[f32]) -> Self {
        Self {
            name: name.into(),
            group,
            binding,
            class: SlotClass::ReadOnly,
            init: SlotInit::Data(bytemuck::cast_slice(data).to_vec()),
        }
    }

    pub fn read_only_i32(name: &str, group: u32, binding: u32, data: &[i32]) -> Self {
        Self {
            name: name.into(),
            group,
            binding,
            class: SlotClass::ReadOnly,
            init: SlotInit::Data(bytemuck::cast_slice(data).to_vec()),
        }
    }

    pub fn read_only_u32(name: &str, group: u32, binding: u32, data: &[u32]) -> Self {
        Self {
            name: name.into(),
            group,
            binding,
            class: SlotClass::ReadOnly,
            init: SlotInit::Data(bytemuck::cast_slice(data).to_vec()),
        }
    }

    /// Zero-initialized read-write f32 array of `count` cells.
    pub fn zeroed_f32(name: &str, group: u32, binding: u32, count: usize) -> Self {
        Self {
            name: name.into(),
            group,
            binding,
            class: SlotClass::ReadWrite,
            init: SlotInit::Zeroed((count * 4) as u64),
        }
    }

    /// Zero-initialized read-write u32 array of `count` elements.
    pub fn zeroed_u32(name: &str, group: u32, binding: u32, count: usize) -> Self {
        Self {
            name: name.into(),
            group,
            binding,
            class: SlotClass::ReadWrite,
            init: SlotInit::Zeroed((count * 4) as u64),
        }
    }

    /// Read-write f32 array seeded with `data`.
    pub fn seeded_f32(name: &str, group: u32, binding: u32, data: &[f32]) -> Self {
        Self {
            name: name.into(),
            group,
            binding,
            class: SlotClass::ReadWrite,
            init: SlotInit::Data(bytemuck::cast_slice(data).to_vec()),
        }
    }
}

/// Validated collection of buffer slots.
#[derive(Debug, Default)]
pub struct BufferManifest {
    slots: Vec<BufferSlot>,
}

impl BufferManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, slot: BufferSlot) -> &mut Self {
        self.slots.push(slot);
        self
    }

    pub fn declare_all(&mut self, slots: impl IntoIterator<Item = BufferSlot>) -> &mut Self {
        self.slots.extend(slots);
        self
    }

    pub fn slots(&self) -> &[BufferSlot] {
        &self.slots
    }

    /// Reject duplicate names, duplicate `(group, binding)` pairs, and
    /// group indices beyond what the device can bind.
    pub fn validate(&self) -> Result<(), EchoError> {
        let mut names: HashMap<&str, ()> = HashMap::new();
        let mut bindings: HashMap<(u32, u32), &str> = HashMap::new();
        for slot in &self.slots {
            if slot.group >= 4 {
                return Err(EchoError::Config(format!(
                    "buffer '{}' wants bind group {}, device guarantees only 4 groups",
                    slot.name, slot.group
                )));
            }
            if names.insert(slot.name.as_str(), ()).is_some() {
                return Err(EchoError::Config(format!(
                    "duplicate buffer name '{}'",
                    slot.name
                )));
            }
            if let Some(other) = bindings.insert((slot.group, slot.binding), slot.name.as_str()) {
                return Err(EchoError::Config(format!(
                    "buffers '{other}' and '{}' both bind group {} binding {}",
                    slot.name, slot.group, slot.binding
                )));
            }
        }
        Ok(())
    }
}

/// Built GPU-side resources for one run: buffers, layouts, bind groups.
pub struct SolverResources {
    buffers: HashMap<String, wgpu::Buffer>,
    layouts: BTreeMap<u32, wgpu::BindGroupLayout>,
    bind_groups: BTreeMap<u32, wgpu::BindGroup>,
}

impl SolverResources {
    /// Create every buffer in the manifest and the bind group per group
    /// index.
    ///
    /// Zero-initialized buffers are cleared with an explicit
    /// `clear_buffer` submitted before this returns, so no kernel can
    /// observe uninitialized memory.
    pub fn build(gpu: &GpuContext, manifest: &BufferManifest) -> Result<Self, EchoError> {
        manifest.validate()?;
        let device = gpu.device();

        let mut buffers = HashMap::new();
        let mut to_clear: Vec<String> = Vec::new();
        for slot in manifest.slots() {
            let usage = match slot.class {
                SlotClass::Uniform => wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                SlotClass::ReadOnly | SlotClass::ReadWrite => {
                    wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST
                }
            };
            let buffer = match &slot.init {
                SlotInit::Data(bytes) if !bytes.is_empty() => {
                    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(&slot.name),
                        contents: bytes,
                        usage,
                    })
                }
                // Empty and zeroed slots still need a valid binding; a
                // 4-byte floor keeps wgpu happy for zero-length arrays.
                SlotInit::Data(_) | SlotInit::Zeroed(_) => {
                    let size = match &slot.init {
                        SlotInit::Zeroed(n) => (*n).max(4),
                        SlotInit::Data(_) => 4,
                    };
                    to_clear.push(slot.name.clone());
                    device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(&slot.name),
                        size,
                        usage,
                        mapped_at_creation: false,
                    })
                }
            };
            buffers.insert(slot.name.clone(), buffer);
        }

        if !to_clear.is_empty() {
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("zero-init buffers"),
            });
            for name in &to_clear {
                if let Some(buffer) = buffers.get(name) {
                    encoder.clear_buffer(buffer, 0, None);
                }
            }
            gpu.queue().submit(std::iter::once(encoder.finish()));
        }

        // One layout + bind group per group index, ascending binding order.
        let mut grouped: BTreeMap<u32, Vec<&BufferSlot>> = BTreeMap::new();
        for slot in manifest.slots() {
            grouped.entry(slot.group).or_default().push(slot);
        }

        let mut layouts = BTreeMap::new();
        let mut bind_groups = BTreeMap::new();
        for (group, mut slots) in grouped {
            slots.sort_by_key(|s| s.binding);
            let layout_entries: Vec<wgpu::BindGroupLayoutEntry> = slots
                .iter()
                .map(|slot| wgpu::BindGroupLayoutEntry {
                    binding: slot.binding,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: match slot.class {
                            SlotClass::Uniform => wgpu::BufferBindingType::Uniform,
                            SlotClass::ReadOnly => {
                                wgpu::BufferBindingType::Storage { read_only: true }
                            }
                            SlotClass::ReadWrite => {
                                wgpu::BufferBindingType::Storage { read_only: false }
                            }
                        },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                })
                .collect();
            let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(&format!("group {group} layout")),
                entries: &layout_entries,
            });

            let entries: Vec<wgpu::BindGroupEntry> = slots
                .iter()
                .map(|slot| wgpu::BindGroupEntry {
                    binding: slot.binding,
                    resource: buffers[&slot.name].as_entire_binding(),
                })
                .collect();
            let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(&format!("group {group}")),
                layout: &layout,
                entries: &entries,
            });
            layouts.insert(group, layout);
            bind_groups.insert(group, bind_group);
        }

        Ok(Self {
            buffers,
            layouts,
            bind_groups,
        })
    }

    /// Look up a buffer by manifest name.
    pub fn buffer(&self, name: &str) -> Result<&wgpu::Buffer, EchoError> {
        self.buffers
            .get(name)
            .ok_or_else(|| EchoError::Config(format!("no buffer named '{name}' in manifest")))
    }

    /// Bind-group layouts for the given group indices, in order.
    pub fn layouts_for(&self, groups: &[u32]) -> Result<Vec<&wgpu::BindGroupLayout>, EchoError> {
        groups
            .iter()
            .map(|g| {
                self.layouts
                    .get(g)
                    .ok_or_else(|| EchoError::Config(format!("no bind group {g} in manifest")))
            })
            .collect()
    }

    pub fn bind_group(&self, group: u32) -> Result<&wgpu::BindGroup, EchoError> {
        self.bind_groups
            .get(&group)
            .ok_or_else(|| EchoError::Config(format!("no bind group {group} in manifest")))
    }

    /// Overwrite a buffer's contents from offset 0.
    pub fn upload_f32(
        &self,
        gpu: &GpuContext,
        name: &str,
        data: &[f32],
    ) -> Result<(), EchoError> {
        let buffer = self.buffer(name)?;
        gpu.queue().write_buffer(buffer, 0, bytemuck::cast_slice(data));
        Ok(())
    }

    /// Blocking f32 readback of a named buffer.
    pub fn read_f32(
        &self,
        gpu: &GpuContext,
        name: &str,
        count: usize,
        deadline: Option<Duration>,
    ) -> Result<Vec<f32>, EchoError> {
        let buffer = self.buffer(name)?;
        gpu.read_back_f32_with_deadline(buffer, count, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_accepts_distinct_slots() {
        let mut m = BufferManifest::new();
        m.declare(BufferSlot::zeroed_f32("a", 0, 0, 16))
            .declare(BufferSlot::zeroed_f32("b", 0, 1, 16))
            .declare(BufferSlot::zeroed_f32("c", 1, 0, 16));
        assert!(m.validate().is_ok());
    }

    #[test]
    fn validate_rejects_duplicate_binding() {
        let mut m = BufferManifest::new();
        m.declare(BufferSlot::zeroed_f32("a", 0, 0, 16))
            .declare(BufferSlot::zeroed_f32("b", 0, 0, 16));
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("group 0 binding 0"));
    }

    #[test]
    fn validate_rejects_duplicate_name() {
        let mut m = BufferManifest::new();
        m.declare(BufferSlot::zeroed_f32("a", 0, 0, 16))
            .declare(BufferSlot::zeroed_f32("a", 0, 1, 16));
        let err = m.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate buffer name"));
    }

    #[test]
    fn validate_rejects_group_beyond_limit() {
        let mut m = BufferManifest::new();
        m.declare(BufferSlot::zeroed_f32("a", 4, 0, 16));
        assert!(m.validate().is_err());
    }

    #[test]
    fn slot_helpers_carry_bytes() {
        let slot = BufferSlot::read_only_f32("c", 0, 1, &[1.0, 2.0]);
        match &slot.init {
            SlotInit::Data(bytes) => assert_eq!(bytes.len(), 8),
            SlotInit::Zeroed(_) => panic!("expected data init"),
        }
        let zero = BufferSlot::zeroed_f32("z", 1, 0, 100);
        match zero.init {
            SlotInit::Zeroed(n) => assert_eq!(n, 400),
            SlotInit::Data(_) => panic!("expected zeroed init"),
        }
    }

    #[test]
    fn zeroed_u32_sizes_in_bytes() {
        let clock = BufferSlot::zeroed_u32("time_index", 0, 3, 1);
        assert_eq!(clock.class, SlotClass::ReadWrite);
        match clock.init {
            SlotInit::Zeroed(n) => assert_eq!(n, 4),
            SlotInit::Data(_) => panic!("expected zeroed init"),
        }
    }
}
