//! Metal buffer operations: shared-storage allocation and host copies

use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_metal::{MTLBuffer, MTLDevice, MTLResourceOptions};

use super::device_init::MetalContext;
use crate::error::{DispatchError, Result};

/// Metal-specific GPU buffer wrapping an MTLBuffer.
///
/// Buffers use shared storage, so the host reads and writes the same memory
/// the GPU sees; no staging copies are needed.
pub struct MetalBuffer {
    pub(crate) mtl_buffer: Retained<ProtocolObject<dyn MTLBuffer>>,
    pub(crate) byte_size: usize,
}

impl MetalBuffer {
    /// Allocate a shared-storage Metal buffer of the given size.
    pub fn allocate(ctx: &MetalContext, byte_size: usize) -> Result<Self> {
        let mtl_buffer = ctx
            .device
            .newBufferWithLength_options(byte_size, MTLResourceOptions::StorageModeShared)
            .ok_or_else(|| DispatchError::Allocation {
                requested: byte_size,
                reason: "MTLDevice returned no buffer".to_string(),
            })?;

        Ok(MetalBuffer {
            mtl_buffer,
            byte_size,
        })
    }

    /// Get a raw CPU-accessible pointer to the buffer contents.
    pub fn contents(&self) -> *mut u8 {
        self.mtl_buffer.contents().as_ptr() as *mut u8
    }

    /// Get the byte size of the buffer.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) {
        assert!(
            offset + bytes.len() <= self.byte_size,
            "write past the end of a {}-byte Metal buffer",
            self.byte_size
        );
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.contents().add(offset), bytes.len());
        }
    }

    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        if offset + out.len() > self.byte_size {
            return Err(DispatchError::Submission(format!(
                "read of {} bytes at offset {} past the end of a {}-byte buffer",
                out.len(),
                offset,
                self.byte_size
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(self.contents().add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }
}
