//! Metal compute dispatch: encodes one command buffer and commits it.
//!
//! The command buffer is committed without waiting; its completed handler
//! fires the dispatch's completion signal from Metal's callback thread.

use std::ptr::NonNull;

use block2::RcBlock;
use objc2::runtime::ProtocolObject;
use objc2_metal::{
    MTLCommandBuffer, MTLCommandBufferStatus, MTLCommandEncoder, MTLCommandQueue,
    MTLComputeCommandEncoder, MTLSize,
};
use parking_lot::Mutex;

use super::buffer_ops::MetalBuffer;
use super::compile::MetalPipeline;
use super::device_init::MetalContext;
use crate::device::CommandEncoding;
use crate::error::{DispatchError, Result};
use crate::grid::Extent3;

fn mtl_size(extent: Extent3) -> MTLSize {
    MTLSize {
        width: extent.width,
        height: extent.height,
        depth: extent.depth,
    }
}

/// Encode and commit one dispatch using explicit threadgroup counts.
pub fn enqueue(
    ctx: &MetalContext,
    encoding: CommandEncoding<'_, MetalPipeline, MetalBuffer>,
) -> Result<()> {
    let CommandEncoding {
        pipeline,
        bindings,
        grid,
        signal,
        ..
    } = encoding;

    let command_buffer = ctx
        .command_queue
        .commandBuffer()
        .ok_or_else(|| DispatchError::Submission("failed to create command buffer".to_string()))?;

    let encoder = command_buffer
        .computeCommandEncoder()
        .ok_or_else(|| DispatchError::Submission("failed to create compute encoder".to_string()))?;

    encoder.setComputePipelineState(&pipeline.pipeline);

    for binding in &bindings {
        unsafe {
            encoder.setBuffer_offset_atIndex(
                Some(&binding.buffer.mtl_buffer),
                0,
                binding.slot as usize,
            );
        }
    }

    encoder.dispatchThreadgroups_threadsPerThreadgroup(
        mtl_size(grid.groups),
        mtl_size(grid.group_size),
    );
    encoder.endEncoding();

    // The handler block is `Fn`, the signal is consumed once.
    let signal = Mutex::new(Some(signal));
    let handler = RcBlock::new(
        move |command_buffer: NonNull<ProtocolObject<dyn MTLCommandBuffer>>| {
            let Some(signal) = signal.lock().take() else {
                return;
            };
            let command_buffer = unsafe { command_buffer.as_ref() };
            if command_buffer.status() == MTLCommandBufferStatus::Error {
                let reason = command_buffer
                    .error()
                    .map(|e| e.localizedDescription().to_string())
                    .unwrap_or_else(|| "command buffer reported an error".to_string());
                signal.fail(reason);
            } else {
                signal.complete();
            }
        },
    );
    unsafe {
        command_buffer.addCompletedHandler(RcBlock::as_ptr(&handler));
    }

    command_buffer.commit();
    Ok(())
}
