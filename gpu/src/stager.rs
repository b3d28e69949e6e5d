//! Data stager: allocates device-visible buffers and moves host data in
//! and out of them.
//!
//! All host access goes through here so the lending rule can be checked in
//! one place: a buffer with an outstanding lease belongs to the device, and
//! touching it from the host panics.

use bytemuck::Pod;
use log::debug;

use crate::buffer::DeviceBuffer;
use crate::device::{ComputeDevice, DeviceLimits};
use crate::error::{DispatchError, Result};

pub struct DataStager<'d, D: ComputeDevice> {
    device: &'d D,
    limits: DeviceLimits,
}

impl<'d, D: ComputeDevice> DataStager<'d, D> {
    pub fn new(device: &'d D) -> Self {
        DataStager {
            device,
            limits: device.limits(),
        }
    }

    pub fn device(&self) -> &'d D {
        self.device
    }

    /// Allocate an untyped buffer of `byte_length` bytes.
    ///
    /// Contents are undefined until written or [`clear`](Self::clear)ed.
    pub fn allocate(&self, byte_length: usize) -> Result<DeviceBuffer<D::Buffer>> {
        self.allocate_with_stride(byte_length, 1)
    }

    /// Allocate room for `count` elements of `T`.
    pub fn allocate_for<T: Pod>(&self, count: usize) -> Result<DeviceBuffer<D::Buffer>> {
        let stride = std::mem::size_of::<T>();
        let byte_length = count
            .checked_mul(stride)
            .ok_or_else(|| DispatchError::Allocation {
                requested: usize::MAX,
                reason: format!("{} elements of {} bytes overflow usize", count, stride),
            })?;
        self.allocate_with_stride(byte_length, stride)
    }

    /// Allocate a buffer sized to `data` and copy it in.
    pub fn stage<T: Pod>(&self, data: &[T]) -> Result<DeviceBuffer<D::Buffer>> {
        let mut buffer = self.allocate_for::<T>(data.len())?;
        self.write(&mut buffer, data);
        Ok(buffer)
    }

    fn allocate_with_stride(
        &self,
        byte_length: usize,
        stride: usize,
    ) -> Result<DeviceBuffer<D::Buffer>> {
        if byte_length == 0 {
            return Err(DispatchError::Allocation {
                requested: 0,
                reason: "zero-length buffers are not supported".to_string(),
            });
        }
        if byte_length > self.limits.max_buffer_length {
            return Err(DispatchError::Allocation {
                requested: byte_length,
                reason: format!(
                    "exceeds device maximum buffer length of {} bytes",
                    self.limits.max_buffer_length
                ),
            });
        }

        let raw = self.device.allocate(byte_length)?;
        debug!(
            "allocated {} bytes (stride {}) on {}",
            byte_length,
            stride,
            self.device.name()
        );
        Ok(DeviceBuffer::new(raw, byte_length, stride))
    }

    /// Copy `data` into the start of `buffer`.
    ///
    /// # Panics
    ///
    /// If a pending dispatch holds the buffer, or `data` is larger than it.
    pub fn write<T: Pod>(&self, buffer: &mut DeviceBuffer<D::Buffer>, data: &[T]) {
        buffer.assert_host_access("write");
        let bytes: &[u8] = bytemuck::cast_slice(data);
        assert!(
            bytes.len() <= buffer.byte_length(),
            "write of {} bytes into a {}-byte buffer",
            bytes.len(),
            buffer.byte_length()
        );
        self.device.write_bytes(buffer.raw(), 0, bytes);
    }

    /// Zero-fill `buffer`.
    pub fn clear(&self, buffer: &mut DeviceBuffer<D::Buffer>) {
        buffer.assert_host_access("clear");
        let zeros = vec![0u8; buffer.byte_length()];
        self.device.write_bytes(buffer.raw(), 0, &zeros);
    }

    /// Copy the buffer's contents back as `T` values.
    ///
    /// Trailing bytes that do not fill a whole `T` are ignored.
    ///
    /// # Panics
    ///
    /// If a pending dispatch holds the buffer.
    pub fn read<T: Pod>(&self, buffer: &DeviceBuffer<D::Buffer>) -> Result<Vec<T>> {
        buffer.assert_host_access("read");
        let size = std::mem::size_of::<T>();
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut out = vec![T::zeroed(); buffer.byte_length() / size];
        self.device
            .read_bytes(buffer.raw(), 0, bytemuck::cast_slice_mut(&mut out))?;
        Ok(out)
    }
}
