//! WebGPU buffer operations: GPU memory allocation and data transfer

use std::ops::Range;

use log::warn;
use wgpu;

use super::device_init::WgpuContext;
use crate::error::{DispatchError, Result};

/// Copies and mappings must be multiples of this many bytes.
const COPY_ALIGNMENT: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

fn align_up(n: usize) -> usize {
    n.div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT
}

/// Bytes of a `byte_size` buffer that an unaligned write of `len` bytes at
/// `offset` would overwrite with padding.
fn preserved_tail(offset: usize, len: usize, byte_size: usize) -> Option<Range<usize>> {
    let end = offset + len;
    let padded_end = (offset + align_up(len)).min(byte_size);
    (padded_end > end).then_some(end..padded_end)
}

/// WebGPU-specific GPU buffer wrapping a wgpu::Buffer.
///
/// Storage buffers cannot be mapped on most adapters, so host writes go
/// through the queue and reads through a staging copy.
pub struct WgpuBuffer {
    pub(crate) buffer: wgpu::Buffer,
    pub(crate) byte_size: usize,
}

impl WgpuBuffer {
    /// Allocate a storage buffer of the given byte size.
    ///
    /// The underlying allocation is padded to the copy alignment.
    pub fn allocate(ctx: &WgpuContext, byte_size: usize) -> Result<Self> {
        ctx.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lumen_gpu_buffer"),
            size: align_up(byte_size) as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let validation = pollster::block_on(ctx.device.pop_error_scope());
        let out_of_memory = pollster::block_on(ctx.device.pop_error_scope());
        if let Some(error) = out_of_memory.or(validation) {
            return Err(DispatchError::Allocation {
                requested: byte_size,
                reason: error.to_string(),
            });
        }

        Ok(WgpuBuffer { buffer, byte_size })
    }

    /// Queue a host-to-device copy. Ordered before any later submission.
    pub fn write(&self, ctx: &WgpuContext, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= self.byte_size,
            "write past the end of a {}-byte wgpu buffer",
            self.byte_size
        );
        assert!(
            offset % COPY_ALIGNMENT == 0,
            "wgpu buffer writes must start on a {}-byte boundary",
            COPY_ALIGNMENT
        );
        if bytes.len() % COPY_ALIGNMENT == 0 {
            ctx.queue.write_buffer(&self.buffer, offset as u64, bytes);
            return;
        }

        // The queue only copies whole words, so the bytes after `bytes` in
        // the last word are written back with their current contents.
        let mut padded = bytes.to_vec();
        padded.resize(align_up(bytes.len()), 0);
        if let Some(tail) = preserved_tail(offset, bytes.len(), self.byte_size) {
            let word_start = tail.start - tail.start % COPY_ALIGNMENT;
            let mut current = vec![0u8; tail.end - word_start];
            match self.read(ctx, word_start, &mut current) {
                Ok(()) => {
                    let kept = &current[tail.start - word_start..];
                    padded[tail.start - offset..tail.end - offset].copy_from_slice(kept);
                }
                Err(e) => warn!("wgpu write may clobber {} trailing bytes: {}", tail.len(), e),
            }
        }
        ctx.queue.write_buffer(&self.buffer, offset as u64, &padded);
    }

    /// Read buffer contents back to CPU via staging buffer.
    pub fn read(&self, ctx: &WgpuContext, offset: usize, out: &mut [u8]) -> Result<()> {
        if offset + out.len() > self.byte_size || offset % COPY_ALIGNMENT != 0 {
            return Err(DispatchError::Submission(format!(
                "unsupported read of {} bytes at offset {} from a {}-byte buffer",
                out.len(),
                offset,
                self.byte_size
            )));
        }
        if out.is_empty() {
            return Ok(());
        }
        let copy_size = align_up(out.len()) as u64;

        // Create staging buffer for readback
        let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lumen_staging"),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Copy from GPU buffer to staging
        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumen_readback"),
            });
        encoder.copy_buffer_to_buffer(&self.buffer, offset as u64, &staging, 0, copy_size);
        ctx.queue.submit(std::iter::once(encoder.finish()));

        // Map and read
        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = ctx.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {
                {
                    let mapped = slice.get_mapped_range();
                    out.copy_from_slice(&mapped[..out.len()]);
                }
                staging.unmap();
                Ok(())
            }
            Ok(Err(e)) => Err(DispatchError::Submission(format!("readback map failed: {}", e))),
            Err(_) => Err(DispatchError::Submission(
                "readback map callback never fired".to_string(),
            )),
        }
    }

    /// Get the byte size of the buffer.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }
}
