//! WebGPU compute dispatch: encodes and submits GPU work.
//!
//! Submission never blocks. The completion signal is fired from the
//! queue's submitted-work-done callback, which wgpu only delivers while
//! the device is polled.

use wgpu;

use super::buffer_ops::WgpuBuffer;
use super::compile::WgpuPipeline;
use super::device_init::WgpuContext;
use crate::device::CommandEncoding;
use crate::error::Result;

/// Encode one compute pass with explicit workgroup counts and submit it.
pub fn enqueue(ctx: &WgpuContext, encoding: CommandEncoding<'_, WgpuPipeline, WgpuBuffer>) -> Result<()> {
    let CommandEncoding {
        label,
        pipeline,
        bindings,
        grid,
        signal,
        ..
    } = encoding;

    // Build bind group entries
    let entries: Vec<wgpu::BindGroupEntry> = bindings
        .iter()
        .map(|binding| wgpu::BindGroupEntry {
            binding: binding.slot,
            resource: binding.buffer.buffer.as_entire_binding(),
        })
        .collect();

    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

    let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &pipeline.bind_group_layout,
        entries: &entries,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });

    {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(label),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(
            grid.groups.width as u32,
            grid.groups.height as u32,
            grid.groups.depth as u32,
        );
    }

    ctx.queue.submit(std::iter::once(encoder.finish()));

    // Validation failures surface as a device fault on the token, the
    // submission itself has already happened.
    if let Some(error) = pollster::block_on(ctx.device.pop_error_scope()) {
        signal.fail(error.to_string());
        return Ok(());
    }

    ctx.queue.on_submitted_work_done(move || signal.complete());
    Ok(())
}
