//! WebGPU device initialization via wgpu

use wgpu;

use crate::device::DeviceLimits;
use crate::grid::Extent3;

/// WebGPU-specific GPU context wrapping device + queue.
pub struct WgpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter_name: String,
}

fn request_adapter(instance: &wgpu::Instance) -> Option<wgpu::Adapter> {
    pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
}

fn instance() -> wgpu::Instance {
    wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    })
}

impl WgpuContext {
    /// Create a new wgpu context using the best available adapter.
    pub fn new() -> Option<Self> {
        let adapter = request_adapter(&instance())?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("lumen_gpu"),
                required_features: wgpu::Features::empty(),
                required_limits: adapter.limits(),
                ..Default::default()
            },
            None,
        ))
        .ok()?;

        Some(WgpuContext {
            device,
            queue,
            adapter_name,
        })
    }

    /// Check if wgpu is available on this system.
    pub fn is_available() -> bool {
        request_adapter(&instance()).is_some()
    }

    pub fn limits(&self) -> DeviceLimits {
        let limits = self.device.limits();
        let max_binding = limits.max_storage_buffer_binding_size as u64;
        DeviceLimits {
            max_threads_per_group: limits.max_compute_invocations_per_workgroup as usize,
            max_group_extent: Extent3::new(
                limits.max_compute_workgroup_size_x as usize,
                limits.max_compute_workgroup_size_y as usize,
                limits.max_compute_workgroup_size_z as usize,
            ),
            max_groups_per_dimension: limits.max_compute_workgroups_per_dimension as usize,
            // A buffer is only usable if it can be bound whole as storage.
            max_buffer_length: limits.max_buffer_size.min(max_binding) as usize,
        }
    }
}
