//! Device buffers and the host/device lending contract.
//!
//! A `DeviceBuffer` belongs to the host until it is bound into a dispatch.
//! Binding hands out a [`Lease`]; the lease travels with the dispatch's
//! completion signal and is released when the device reports a terminal
//! state. While any lease is outstanding the host must neither write nor
//! read the buffer.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A host- and device-visible buffer created by the
/// [`DataStager`](crate::stager::DataStager).
pub struct DeviceBuffer<B> {
    raw: B,
    byte_length: usize,
    stride: usize,
    leases: Arc<AtomicUsize>,
}

impl<B> DeviceBuffer<B> {
    pub(crate) fn new(raw: B, byte_length: usize, stride: usize) -> Self {
        DeviceBuffer {
            raw,
            byte_length,
            stride: stride.max(1),
            leases: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Length in bytes as requested at allocation time.
    pub fn byte_length(&self) -> usize {
        self.byte_length
    }

    /// Size of one element in bytes (1 for untyped allocations).
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn element_count(&self) -> usize {
        self.byte_length / self.stride
    }

    /// Backend storage.
    pub fn raw(&self) -> &B {
        &self.raw
    }

    /// Number of pending dispatches this buffer is lent to.
    pub fn outstanding_leases(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }

    pub fn is_leased(&self) -> bool {
        self.outstanding_leases() > 0
    }

    pub(crate) fn lease(&self) -> Lease {
        Lease::acquire(&self.leases)
    }

    /// Panics if a pending dispatch still holds this buffer.
    pub(crate) fn assert_host_access(&self, operation: &str) {
        let leases = self.outstanding_leases();
        assert!(
            leases == 0,
            "host {} on a buffer lent to {} pending dispatch(es)",
            operation,
            leases
        );
    }
}

impl<B> std::fmt::Debug for DeviceBuffer<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("byte_length", &self.byte_length)
            .field("stride", &self.stride)
            .field("leases", &self.outstanding_leases())
            .finish()
    }
}

/// One outstanding dispatch's claim on a buffer. Released on drop.
pub struct Lease {
    counter: Arc<AtomicUsize>,
}

impl Lease {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Lease {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // Release pairs with the Acquire load in `outstanding_leases`, so
        // device writes made before the signal fired are visible to the host.
        self.counter.fetch_sub(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_count_uses_stride() {
        let buf = DeviceBuffer::new((), 16, 4);
        assert_eq!(buf.element_count(), 4);
        assert_eq!(buf.stride(), 4);
    }

    #[test]
    fn test_zero_stride_is_clamped() {
        let buf = DeviceBuffer::new((), 8, 0);
        assert_eq!(buf.element_count(), 8);
    }

    #[test]
    fn test_lease_counts_and_releases() {
        let buf = DeviceBuffer::new((), 4, 4);
        let a = buf.lease();
        let b = buf.lease();
        assert_eq!(buf.outstanding_leases(), 2);
        drop(a);
        assert!(buf.is_leased());
        drop(b);
        assert!(!buf.is_leased());
        buf.assert_host_access("write");
    }

    #[test]
    #[should_panic(expected = "lent to 1 pending dispatch")]
    fn test_host_access_while_leased_panics() {
        let buf = DeviceBuffer::new((), 4, 4);
        let _lease = buf.lease();
        buf.assert_host_access("write");
    }
}
