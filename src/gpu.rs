// SPDX-License-Identifier: AGPL-3.0-only

//! GPU device layer for the wave solver.
//!
//! Creates a wgpu compute device and provides the buffer/readback helpers
//! the solver builds on. The solver is f32 throughout, so any adapter that
//! can run compute shaders qualifies; discrete GPUs are preferred.
//!
//! ## Adapter selection
//!
//! Set `ECHOFIELD_GPU_ADAPTER` to target a specific GPU:
//!
//! | Value | Behavior |
//! |-------|----------|
//! | `auto` / *(unset)* | First discrete GPU, else first adapter |
//! | `0`, `1`, … | Select adapter by enumeration index |
//! | substring | Case-insensitive name match (e.g. `"titan"`, `"4070"`) |
//!
//! `ECHOFIELD_WGPU_BACKEND` (`vulkan`, `metal`, `dx12`) restricts the
//! instance backend. Use [`GpuContext::enumerate_adapters`] to list GPUs
//! before selecting.

use crate::error::EchoError;
use std::time::{Duration, Instant};

/// Summary of a discovered GPU adapter.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    /// Enumeration index (stable within a single run).
    pub index: usize,
    /// Adapter name as reported by the driver.
    pub name: String,
    /// Driver name (e.g. `"NVIDIA"`, `"NVK"`, `"radv"`).
    pub driver: String,
    /// Adapter device type (discrete, integrated, software, etc.).
    pub device_type: wgpu::DeviceType,
}

impl std::fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.device_type {
            wgpu::DeviceType::DiscreteGpu => "discrete",
            wgpu::DeviceType::IntegratedGpu => "integrated",
            wgpu::DeviceType::VirtualGpu => "virtual",
            wgpu::DeviceType::Cpu => "cpu",
            wgpu::DeviceType::Other => "other",
        };
        write!(f, "[{}] {} ({}, {})", self.index, self.name, self.driver, kind)
    }
}

/// GPU context owning the wgpu device and queue.
///
/// Constructed explicitly and passed by reference to each orchestrator;
/// there is no global device singleton. `new()` is async — synchronous
/// callers block on it with a tokio runtime:
///
/// ```rust,ignore
/// let rt = tokio::runtime::Runtime::new()?;
/// let gpu = rt.block_on(GpuContext::new())?;
/// ```
pub struct GpuContext {
    pub adapter_name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl GpuContext {
    /// Access the underlying wgpu Device.
    pub const fn device(&self) -> &wgpu::Device {
        &self.device
    }

    /// Access the underlying wgpu Queue.
    pub const fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// Create a wgpu instance with the configured backend.
    fn create_instance() -> wgpu::Instance {
        let backends = match std::env::var("ECHOFIELD_WGPU_BACKEND").as_deref() {
            Ok("vulkan") => wgpu::Backends::VULKAN,
            Ok("metal") => wgpu::Backends::METAL,
            Ok("dx12") => wgpu::Backends::DX12,
            _ => wgpu::Backends::all(),
        };
        wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        })
    }

    /// Enumerate all available GPU adapters.
    ///
    /// Use the `index` field with `ECHOFIELD_GPU_ADAPTER=<index>` to
    /// target a specific GPU.
    pub fn enumerate_adapters() -> Vec<AdapterInfo> {
        let instance = Self::create_instance();
        instance
            .enumerate_adapters(wgpu::Backends::all())
            .into_iter()
            .enumerate()
            .map(|(i, adapter)| {
                let info = adapter.get_info();
                AdapterInfo {
                    index: i,
                    name: info.name.clone(),
                    driver: info.driver.clone(),
                    device_type: info.device_type,
                }
            })
            .collect()
    }

    /// Print all available adapters to stdout.
    ///
    /// Useful for discovery before setting `ECHOFIELD_GPU_ADAPTER`.
    pub fn print_available_adapters() {
        let adapters = Self::enumerate_adapters();
        println!("  Available GPU adapters:");
        for info in &adapters {
            println!("    {info}");
        }
        if adapters.is_empty() {
            println!("    (none found)");
        }
    }

    /// Create the GPU device.
    ///
    /// Adapter selection follows `ECHOFIELD_GPU_ADAPTER` (index, name
    /// substring, or `auto`); unset prefers the first discrete GPU.
    pub async fn new() -> Result<Self, EchoError> {
        let selector = std::env::var("ECHOFIELD_GPU_ADAPTER")
            .unwrap_or_default()
            .trim()
            .to_lowercase();

        let instance = Self::create_instance();
        let adapters: Vec<wgpu::Adapter> = instance.enumerate_adapters(wgpu::Backends::all());
        if adapters.is_empty() {
            return Err(EchoError::NoAdapter);
        }

        let adapter = if selector.is_empty() || selector == "auto" {
            let mut chosen: Option<wgpu::Adapter> = None;
            let mut fallback: Option<wgpu::Adapter> = None;
            for a in adapters {
                if a.get_info().device_type == wgpu::DeviceType::DiscreteGpu && chosen.is_none() {
                    chosen = Some(a);
                } else if fallback.is_none() {
                    fallback = Some(a);
                }
            }
            chosen.or(fallback).ok_or(EchoError::NoAdapter)?
        } else if let Ok(idx) = selector.parse::<usize>() {
            if idx < adapters.len() {
                adapters.into_iter().nth(idx).ok_or(EchoError::NoAdapter)?
            } else {
                // Numeric value exceeds adapter count — treat as name substring
                adapters
                    .into_iter()
                    .find(|a| a.get_info().name.to_ascii_lowercase().contains(&selector))
                    .ok_or_else(|| {
                        EchoError::DeviceCreation(format!(
                            "No adapter matching '{selector}' (tried as index {idx} and name)"
                        ))
                    })?
            }
        } else {
            adapters
                .into_iter()
                .find(|a| a.get_info().name.to_ascii_lowercase().contains(&selector))
                .ok_or_else(|| {
                    EchoError::DeviceCreation(format!("No adapter matching '{selector}'"))
                })?
        };

        let adapter_name = adapter.get_info().name.clone();

        // A field binds 11 storage arrays, the boundary 4 more, and the
        // injection group one trace buffer per transducer; the 8-buffer
        // default limit is nowhere near enough. Request what the adapter
        // actually supports.
        let supported = adapter.limits();
        let required_limits = wgpu::Limits {
            max_storage_buffers_per_shader_stage: supported.max_storage_buffers_per_shader_stage,
            max_storage_buffer_binding_size: supported.max_storage_buffer_binding_size,
            max_buffer_size: supported.max_buffer_size,
            ..wgpu::Limits::default()
        };

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("echofield wave solver device"),
                    required_features: wgpu::Features::empty(),
                    required_limits,
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await
            .map_err(|e| EchoError::DeviceCreation(e.to_string()))?;

        Ok(Self {
            adapter_name,
            device,
            queue,
        })
    }

    /// Print device capabilities.
    pub fn print_info(&self) {
        println!("  GPU: {}", self.adapter_name);
        let limits = self.device.limits();
        println!(
            "  storage buffers per stage: {}",
            limits.max_storage_buffers_per_shader_stage
        );
    }

    /// Create a staging buffer for reading results back to the CPU.
    pub fn create_staging_buffer(&self, size: u64, label: &str) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    /// Read back f32 data from a GPU buffer via staging copy.
    ///
    /// Blocks until the copy completes (`Maintain::Wait`). Returns `Err`
    /// if the map callback fails or the channel is dropped.
    pub fn read_back_f32(
        &self,
        buffer: &wgpu::Buffer,
        count: usize,
    ) -> Result<Vec<f32>, EchoError> {
        self.read_back_f32_with_deadline(buffer, count, None)
            .map_err(|e| match e {
                // No deadline was set, so a timeout variant cannot escape here.
                EchoError::ReadbackTimeout { .. } => {
                    EchoError::GpuCompute("readback wait failed".into())
                }
                other => other,
            })
    }

    /// Read back f32 data, failing with `ReadbackTimeout` if the mapping
    /// does not complete within `deadline`.
    ///
    /// With a deadline the device is polled non-blockingly in a loop so a
    /// hung driver surfaces as an error instead of wedging the host thread.
    pub fn read_back_f32_with_deadline(
        &self,
        buffer: &wgpu::Buffer,
        count: usize,
        deadline: Option<Duration>,
    ) -> Result<Vec<f32>, EchoError> {
        let bytes = (count * 4) as u64;
        let staging = self.create_staging_buffer(bytes, "readback staging");
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("readback"),
            });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, bytes);
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });

        let map_result = match deadline {
            None => {
                self.device.poll(wgpu::Maintain::Wait);
                receiver.recv().map_err(|_| {
                    EchoError::GpuCompute("GPU map callback: channel recv failed".into())
                })?
            }
            Some(limit) => {
                let start = Instant::now();
                loop {
                    self.device.poll(wgpu::Maintain::Poll);
                    match receiver.try_recv() {
                        Ok(result) => break result,
                        Err(std::sync::mpsc::TryRecvError::Empty) => {
                            if start.elapsed() > limit {
                                return Err(EchoError::ReadbackTimeout { step: 0 });
                            }
                            std::thread::sleep(Duration::from_micros(100));
                        }
                        Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                            return Err(EchoError::GpuCompute(
                                "GPU map callback: channel disconnected".into(),
                            ));
                        }
                    }
                }
            }
        };
        map_result.map_err(|e| EchoError::GpuCompute(format!("GPU buffer mapping: {e}")))?;

        let data = slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    /// Pure helper: f32 buffer size in bytes (matches readback sizing)
    fn f32_buffer_size_bytes(count: usize) -> u64 {
        (count * 4) as u64
    }

    #[test]
    fn f32_buffer_size_calculation() {
        assert_eq!(f32_buffer_size_bytes(0), 0);
        assert_eq!(f32_buffer_size_bytes(1), 4);
        assert_eq!(f32_buffer_size_bytes(1000 * 1000), 4_000_000);
    }

    #[test]
    fn f32_byte_roundtrip() {
        let original = vec![0.0f32, 1.0, -1.0, std::f32::consts::PI, f32::INFINITY];
        let bytes: Vec<u8> = bytemuck::cast_slice(&original).to_vec();
        let recovered: Vec<f32> = bytemuck::cast_slice(&bytes).to_vec();
        assert_eq!(original, recovered);
    }

    #[test]
    #[ignore = "requires GPU"]
    fn device_creation() {
        let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
        let gpu = rt.block_on(super::GpuContext::new()).expect("GPU device");
        assert!(!gpu.adapter_name.is_empty());
    }
}
