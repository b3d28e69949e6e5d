//! Device capability surface consumed by the stager and the dispatcher.
//!
//! A backend is anything that can allocate host-visible buffers, turn a
//! [`CompiledKernel`] into a pipeline, enqueue one encoded dispatch on a
//! single FIFO queue, report its limits, and fire a [`CompletionSignal`]
//! when the dispatch is done. Device discovery is the backend's business;
//! the core only borrows an already-opened device.

use std::fmt;

use crate::completion::CompletionSignal;
use crate::error::Result;
use crate::grid::{DispatchGrid, Extent3};
use crate::kernel::{BindingAccess, CompiledKernel};

/// Which family of device a backend drives. Selects the kernel artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Metal,
    Wgpu,
    Software,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Metal => "metal",
            BackendKind::Wgpu => "wgpu",
            BackendKind::Software => "software",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Hardware limits that bound buffer sizes and dispatch shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Maximum threads in one thread-group (product of all axes).
    pub max_threads_per_group: usize,
    /// Maximum threads per thread-group along each axis.
    pub max_group_extent: Extent3,
    /// Maximum thread-groups along any single axis of a dispatch.
    pub max_groups_per_dimension: usize,
    /// Largest single buffer the device will allocate, in bytes.
    pub max_buffer_length: usize,
}

/// How hard [`ComputeDevice::drive`] should push the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveMode {
    /// Process whatever completions are ready, never block.
    Poll,
    /// Block until all submitted work has finished.
    Wait,
}

/// One buffer bound into a dispatch.
pub struct Binding<'a, B> {
    /// Slot index the kernel reads the buffer from.
    pub slot: u32,
    pub access: BindingAccess,
    pub buffer: &'a B,
}

/// Single-use record of one dispatch, consumed by [`ComputeDevice::enqueue`].
///
/// Bindings are in the order the kernel layout declares them. The signal
/// must be fired (or dropped) by the device once execution finishes.
pub struct CommandEncoding<'a, P, B> {
    pub label: &'a str,
    pub submission: u64,
    pub pipeline: &'a P,
    pub bindings: Vec<Binding<'a, B>>,
    pub grid: DispatchGrid,
    pub signal: CompletionSignal,
}

/// Capabilities the core needs from a compute device and its queue.
pub trait ComputeDevice {
    /// Backend storage behind a [`DeviceBuffer`](crate::buffer::DeviceBuffer).
    type Buffer;
    /// Backend pipeline object behind a [`PipelineState`](crate::dispatcher::PipelineState).
    type Pipeline;

    /// Human-readable device name.
    fn name(&self) -> String;

    fn kind(&self) -> BackendKind;

    fn limits(&self) -> DeviceLimits;

    /// Allocate a host-visible buffer of `byte_length` bytes.
    ///
    /// Contents are whatever the device hands out; callers must not rely on
    /// zeroing.
    fn allocate(&self, byte_length: usize) -> Result<Self::Buffer>;

    /// Copy host bytes into the buffer at `offset`.
    fn write_bytes(&self, buffer: &Self::Buffer, offset: usize, bytes: &[u8]);

    /// Copy buffer bytes starting at `offset` into `out`.
    fn read_bytes(&self, buffer: &Self::Buffer, offset: usize, out: &mut [u8]) -> Result<()>;

    /// Create a pipeline for `kernel`.
    fn build_pipeline(&self, kernel: &CompiledKernel) -> Result<Self::Pipeline>;

    /// Threads-per-group ceiling imposed by this particular pipeline.
    fn pipeline_max_threads(&self, pipeline: &Self::Pipeline) -> usize;

    /// Enqueue one dispatch without waiting for it.
    ///
    /// Commands run in enqueue order. On error nothing was enqueued.
    fn enqueue(&self, encoding: CommandEncoding<'_, Self::Pipeline, Self::Buffer>) -> Result<()>;

    /// Give the device a chance to deliver completion callbacks.
    ///
    /// Backends that deliver completions on their own threads ignore this.
    fn drive(&self, _mode: DriveMode) {}
}
