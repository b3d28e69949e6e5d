//! Metal backend for GPU compute (macOS)

pub mod buffer_ops;
pub mod compile;
pub mod device_init;
pub mod dispatch;

use crate::device::{BackendKind, CommandEncoding, ComputeDevice, DeviceLimits};
use crate::error::Result;
use crate::kernel::CompiledKernel;
use buffer_ops::MetalBuffer;
use compile::MetalPipeline;
use device_init::MetalContext;

/// [`ComputeDevice`] over the system default Metal device.
pub struct MetalDevice {
    ctx: MetalContext,
    limits: DeviceLimits,
}

impl MetalDevice {
    pub fn new() -> Option<Self> {
        let ctx = MetalContext::new()?;
        let limits = ctx.limits();
        Some(MetalDevice { ctx, limits })
    }

    pub fn is_available() -> bool {
        MetalContext::is_available()
    }

    pub fn context(&self) -> &MetalContext {
        &self.ctx
    }
}

impl ComputeDevice for MetalDevice {
    type Buffer = MetalBuffer;
    type Pipeline = MetalPipeline;

    fn name(&self) -> String {
        self.ctx.name()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Metal
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn allocate(&self, byte_length: usize) -> Result<MetalBuffer> {
        MetalBuffer::allocate(&self.ctx, byte_length)
    }

    fn write_bytes(&self, buffer: &MetalBuffer, offset: usize, bytes: &[u8]) {
        buffer.write(offset, bytes);
    }

    fn read_bytes(&self, buffer: &MetalBuffer, offset: usize, out: &mut [u8]) -> Result<()> {
        buffer.read(offset, out)
    }

    fn build_pipeline(&self, kernel: &CompiledKernel) -> Result<MetalPipeline> {
        compile::build_pipeline(&self.ctx, kernel)
    }

    fn pipeline_max_threads(&self, pipeline: &MetalPipeline) -> usize {
        pipeline.max_threads_per_group
    }

    fn enqueue(&self, encoding: CommandEncoding<'_, MetalPipeline, MetalBuffer>) -> Result<()> {
        dispatch::enqueue(&self.ctx, encoding)
    }
}
