//! Software compute device.
//!
//! Runs host kernels on a dedicated queue thread, one call per thread of the
//! dispatch grid, tail threads included. It honours the same contract as the
//! GPU backends (FIFO queue, asynchronous completion, device limits) and is
//! the fallback when no GPU backend is compiled in or available.

mod invocation;
mod queue;

pub use invocation::KernelInvocation;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::device::{BackendKind, CommandEncoding, ComputeDevice, DeviceLimits};
use crate::error::{DispatchError, Result};
use crate::grid::Extent3;
use crate::kernel::{BindingSlot, CompiledKernel, HostKernelFn, KernelArtifact};
use queue::{Job, WorkQueue};

/// Default memory budget for all live software buffers.
pub const DEFAULT_MEMORY_BUDGET: usize = 1 << 30;

/// Host memory standing in for a device buffer.
#[derive(Clone)]
pub struct SoftwareBuffer {
    pub(crate) bytes: Arc<Mutex<Vec<u8>>>,
    reservation: Arc<Reservation>,
}

struct Reservation {
    bytes: usize,
    in_use: Arc<AtomicUsize>,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.in_use.fetch_sub(self.bytes, Ordering::AcqRel);
    }
}

impl SoftwareBuffer {
    pub fn byte_size(&self) -> usize {
        self.reservation.bytes
    }

    fn same_storage(&self, other: &SoftwareBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// Pipeline for the software device: the host kernel body.
pub struct SoftwarePipeline {
    label: String,
    body: Arc<HostKernelFn>,
}

impl SoftwarePipeline {
    pub fn label(&self) -> &str {
        &self.label
    }
}

/// CPU device with a single FIFO command queue.
pub struct SoftwareDevice {
    name: String,
    limits: DeviceLimits,
    memory_budget: usize,
    in_use: Arc<AtomicUsize>,
    queue: WorkQueue,
}

impl SoftwareDevice {
    /// Limits modelled on a typical discrete GPU.
    pub const DEFAULT_LIMITS: DeviceLimits = DeviceLimits {
        max_threads_per_group: 1024,
        max_group_extent: Extent3::new(1024, 1024, 64),
        max_groups_per_dimension: 65_535,
        max_buffer_length: 256 << 20,
    };

    pub fn new() -> Result<Self> {
        let name = "lumen-software".to_string();
        let queue = WorkQueue::spawn(&name)?;
        Ok(SoftwareDevice {
            name,
            limits: Self::DEFAULT_LIMITS,
            memory_budget: DEFAULT_MEMORY_BUDGET,
            in_use: Arc::new(AtomicUsize::new(0)),
            queue,
        })
    }

    pub fn with_limits(mut self, limits: DeviceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Cap the total bytes of live buffers.
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget = bytes;
        self
    }

    /// Dispatches accepted onto the queue so far.
    pub fn submissions(&self) -> u64 {
        self.queue.enqueued()
    }

    /// Dispatches the queue has finished executing.
    pub fn executed(&self) -> u64 {
        self.queue.executed()
    }

    /// Bytes currently held by live buffers.
    pub fn bytes_in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    fn reserve(&self, byte_length: usize) -> Result<()> {
        let budget = self.memory_budget;
        self.in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(byte_length).filter(|total| *total <= budget)
            })
            .map(|_| ())
            .map_err(|used| DispatchError::Allocation {
                requested: byte_length,
                reason: format!(
                    "device memory exhausted ({} of {} bytes in use)",
                    used, budget
                ),
            })
    }
}

impl ComputeDevice for SoftwareDevice {
    type Buffer = SoftwareBuffer;
    type Pipeline = SoftwarePipeline;

    fn name(&self) -> String {
        self.name.clone()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Software
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn allocate(&self, byte_length: usize) -> Result<SoftwareBuffer> {
        if byte_length > self.limits.max_buffer_length {
            return Err(DispatchError::Allocation {
                requested: byte_length,
                reason: format!(
                    "exceeds maximum buffer length of {} bytes",
                    self.limits.max_buffer_length
                ),
            });
        }
        self.reserve(byte_length)?;
        let reservation = Arc::new(Reservation {
            bytes: byte_length,
            in_use: Arc::clone(&self.in_use),
        });

        let mut bytes = Vec::new();
        bytes
            .try_reserve_exact(byte_length)
            .map_err(|e| DispatchError::Allocation {
                requested: byte_length,
                reason: e.to_string(),
            })?;
        bytes.resize(byte_length, 0);

        Ok(SoftwareBuffer {
            bytes: Arc::new(Mutex::new(bytes)),
            reservation,
        })
    }

    fn write_bytes(&self, buffer: &SoftwareBuffer, offset: usize, bytes: &[u8]) {
        let mut storage = buffer.bytes.lock();
        storage[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    fn read_bytes(&self, buffer: &SoftwareBuffer, offset: usize, out: &mut [u8]) -> Result<()> {
        let storage = buffer.bytes.lock();
        let source = storage.get(offset..offset + out.len()).ok_or_else(|| {
            DispatchError::Submission(format!(
                "read of {} bytes at offset {} past the end of a {}-byte buffer",
                out.len(),
                offset,
                storage.len()
            ))
        })?;
        out.copy_from_slice(source);
        Ok(())
    }

    fn build_pipeline(&self, kernel: &CompiledKernel) -> Result<SoftwarePipeline> {
        match kernel.artifact() {
            KernelArtifact::Host(body) => Ok(SoftwarePipeline {
                label: kernel.label().to_string(),
                body: Arc::clone(body),
            }),
            other => Err(DispatchError::PipelineBuild {
                kernel: kernel.label().to_string(),
                reason: format!(
                    "software device cannot run {} artifacts",
                    other.backend()
                ),
            }),
        }
    }

    fn pipeline_max_threads(&self, _pipeline: &SoftwarePipeline) -> usize {
        self.limits.max_threads_per_group
    }

    fn enqueue(&self, encoding: CommandEncoding<'_, SoftwarePipeline, SoftwareBuffer>) -> Result<()> {
        let CommandEncoding {
            label,
            submission,
            pipeline,
            bindings,
            grid,
            signal,
        } = encoding;

        let mut bound: Vec<(BindingSlot, SoftwareBuffer)> = Vec::with_capacity(bindings.len());
        for binding in &bindings {
            if bound.iter().any(|(_, b)| b.same_storage(binding.buffer)) {
                return Err(DispatchError::Submission(format!(
                    "buffer bound to more than one slot (slot {})",
                    binding.slot
                )));
            }
            let slot = BindingSlot {
                index: binding.slot,
                access: binding.access,
            };
            bound.push((slot, binding.buffer.clone()));
        }

        debug!(
            "software device: enqueue '{}' submission {} ({} threads)",
            label,
            submission,
            grid.total_threads()
        );
        self.queue.push(Job {
            label: label.to_string(),
            submission,
            body: Arc::clone(&pipeline.body),
            bindings: bound,
            grid,
            signal,
        })
    }
}
