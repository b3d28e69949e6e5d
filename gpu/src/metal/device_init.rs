//! Metal device initialization

use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_metal::{MTLCommandQueue, MTLCreateSystemDefaultDevice, MTLDevice};

use crate::device::DeviceLimits;
use crate::grid::Extent3;

// MTLCreateSystemDefaultDevice requires CoreGraphics to be linked
#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {}

/// Metal has no documented cap on threadgroups per grid axis; use the
/// largest count a 32-bit grid coordinate can address.
const MAX_GROUPS_PER_DIMENSION: usize = u32::MAX as usize;

/// Metal-specific GPU context wrapping device + command queue.
pub struct MetalContext {
    pub device: Retained<ProtocolObject<dyn MTLDevice>>,
    pub command_queue: Retained<ProtocolObject<dyn MTLCommandQueue>>,
}

impl MetalContext {
    /// Create a new Metal context using the system default device.
    pub fn new() -> Option<Self> {
        let device = MTLCreateSystemDefaultDevice()?;
        let command_queue = device.newCommandQueue()?;
        Some(MetalContext {
            device,
            command_queue,
        })
    }

    /// Check if Metal is available on this system.
    pub fn is_available() -> bool {
        MTLCreateSystemDefaultDevice().is_some()
    }

    pub fn name(&self) -> String {
        self.device.name().to_string()
    }

    /// Device-wide limits. Pipelines may lower the threads-per-group ceiling.
    pub fn limits(&self) -> DeviceLimits {
        let per_axis = self.device.maxThreadsPerThreadgroup();
        DeviceLimits {
            // Per-axis maxima are all bounded by the same total on Apple GPUs.
            max_threads_per_group: per_axis.width,
            max_group_extent: Extent3::new(per_axis.width, per_axis.height, per_axis.depth),
            max_groups_per_dimension: MAX_GROUPS_PER_DIMENSION,
            max_buffer_length: self.device.maxBufferLength(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metal_device_creation() {
        let available = MetalContext::is_available();
        println!("Metal available: {}", available);
        if available {
            let ctx = MetalContext::new().expect("Failed to create Metal context");
            let limits = ctx.limits();
            println!("Metal device {}: {:?}", ctx.name(), limits);
            assert!(limits.max_threads_per_group > 0);
            assert!(limits.max_buffer_length > 0);
        }
    }
}
