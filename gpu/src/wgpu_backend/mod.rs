//! WebGPU backend for GPU compute (cross-platform via wgpu)

pub mod buffer_ops;
pub mod compile;
pub mod device_init;
pub mod dispatch;

use crate::device::{BackendKind, CommandEncoding, ComputeDevice, DeviceLimits, DriveMode};
use crate::error::Result;
use crate::kernel::CompiledKernel;
use buffer_ops::WgpuBuffer;
use compile::WgpuPipeline;
use device_init::WgpuContext;

/// [`ComputeDevice`] over the highest-performance wgpu adapter.
///
/// `allocate` and `build_pipeline` check their wgpu error scopes with
/// `pollster::block_on`. On native targets those futures are ready as soon
/// as the call returns and never wait on queued GPU work. Host reads, and
/// writes whose length is not a multiple of 4 bytes, do wait for the queue
/// to drain through a staging copy.
pub struct WgpuDevice {
    ctx: WgpuContext,
    limits: DeviceLimits,
}

impl WgpuDevice {
    pub fn new() -> Option<Self> {
        let ctx = WgpuContext::new()?;
        let limits = ctx.limits();
        Some(WgpuDevice { ctx, limits })
    }

    pub fn is_available() -> bool {
        WgpuContext::is_available()
    }

    pub fn context(&self) -> &WgpuContext {
        &self.ctx
    }
}

impl ComputeDevice for WgpuDevice {
    type Buffer = WgpuBuffer;
    type Pipeline = WgpuPipeline;

    fn name(&self) -> String {
        self.ctx.adapter_name.clone()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Wgpu
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn allocate(&self, byte_length: usize) -> Result<WgpuBuffer> {
        WgpuBuffer::allocate(&self.ctx, byte_length)
    }

    fn write_bytes(&self, buffer: &WgpuBuffer, offset: usize, bytes: &[u8]) {
        buffer.write(&self.ctx, offset, bytes);
    }

    fn read_bytes(&self, buffer: &WgpuBuffer, offset: usize, out: &mut [u8]) -> Result<()> {
        buffer.read(&self.ctx, offset, out)
    }

    fn build_pipeline(&self, kernel: &CompiledKernel) -> Result<WgpuPipeline> {
        compile::build_pipeline(&self.ctx, kernel)
    }

    fn pipeline_max_threads(&self, pipeline: &WgpuPipeline) -> usize {
        pipeline.workgroup_threads
    }

    fn enqueue(&self, encoding: CommandEncoding<'_, WgpuPipeline, WgpuBuffer>) -> Result<()> {
        dispatch::enqueue(&self.ctx, encoding)
    }

    fn drive(&self, mode: DriveMode) {
        let maintain = match mode {
            DriveMode::Poll => wgpu::Maintain::Poll,
            DriveMode::Wait => wgpu::Maintain::Wait,
        };
        let _ = self.ctx.device.poll(maintain);
    }
}
