//! Compute dispatcher: builds pipelines, encodes one dispatch at a time and
//! hands out completion tokens.
//!
//! Everything that can be checked on the host is checked before the device
//! sees the command: binding count, thread-group size against the device
//! and pipeline limits, grid extents. Only execution faults are reported
//! asynchronously, through the token.

use std::sync::atomic::{fence, AtomicU64, Ordering};
use std::time::Duration;

use log::{debug, trace};

use crate::buffer::DeviceBuffer;
use crate::completion::{completion_pair, CompletionToken, TokenStatus};
use crate::device::{Binding, CommandEncoding, ComputeDevice, DeviceLimits, DriveMode};
use crate::error::{DispatchError, Result};
use crate::grid::{DispatchGrid, Extent3};
use crate::kernel::CompiledKernel;

/// How long `wait` sleeps on the token between device progress calls.
const WAIT_SLICE: Duration = Duration::from_millis(10);

/// A device pipeline together with the kernel it was built from.
pub struct PipelineState<P> {
    raw: P,
    kernel: CompiledKernel,
    max_threads_per_group: usize,
}

impl<P> PipelineState<P> {
    pub fn kernel(&self) -> &CompiledKernel {
        &self.kernel
    }

    /// Effective thread-group ceiling: the lower of the device and pipeline limits.
    pub fn max_threads_per_group(&self) -> usize {
        self.max_threads_per_group
    }

    pub fn raw(&self) -> &P {
        &self.raw
    }
}

pub struct ComputeDispatcher<'d, D: ComputeDevice> {
    device: &'d D,
    limits: DeviceLimits,
    next_submission: AtomicU64,
}

impl<'d, D: ComputeDevice> ComputeDispatcher<'d, D> {
    pub fn new(device: &'d D) -> Self {
        ComputeDispatcher {
            device,
            limits: device.limits(),
            next_submission: AtomicU64::new(1),
        }
    }

    pub fn device(&self) -> &'d D {
        self.device
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    /// Create the pipeline for `kernel`. Failures are fatal for the run.
    pub fn build_pipeline(&self, kernel: &CompiledKernel) -> Result<PipelineState<D::Pipeline>> {
        kernel
            .layout()
            .validate()
            .map_err(|reason| DispatchError::PipelineBuild {
                kernel: kernel.label().to_string(),
                reason,
            })?;

        let raw = self.device.build_pipeline(kernel)?;
        let max_threads_per_group = self
            .limits
            .max_threads_per_group
            .min(self.device.pipeline_max_threads(&raw));

        debug!(
            "built pipeline '{}' on {} (max {} threads per group)",
            kernel.label(),
            self.device.name(),
            max_threads_per_group
        );
        Ok(PipelineState {
            raw,
            kernel: kernel.clone(),
            max_threads_per_group,
        })
    }

    /// Encode one dispatch of `pipeline` over `grid_size` elements and
    /// enqueue it without waiting.
    ///
    /// `buffers` bind positionally to the kernel layout's slots. Every
    /// buffer is lent to the device until the returned token settles.
    ///
    /// # Panics
    ///
    /// If one of `buffers` is still lent to a pending dispatch.
    pub fn encode_and_submit(
        &self,
        pipeline: &PipelineState<D::Pipeline>,
        buffers: &[&DeviceBuffer<D::Buffer>],
        grid_size: impl Into<Extent3>,
        thread_group_size: impl Into<Extent3>,
    ) -> Result<CompletionToken> {
        let kernel = &pipeline.kernel;
        let layout = kernel.layout();
        if buffers.len() != layout.len() {
            return Err(DispatchError::BindingMismatch {
                kernel: kernel.label().to_string(),
                expected: layout.len(),
                actual: buffers.len(),
            });
        }

        let grid = DispatchGrid::plan(
            grid_size.into(),
            thread_group_size.into(),
            &self.limits,
            pipeline.max_threads_per_group,
            kernel.fixed_group_size(),
        )?;

        for buffer in buffers {
            buffer.assert_host_access("bind");
        }

        let bindings: Vec<Binding<'_, D::Buffer>> = layout
            .slots()
            .iter()
            .zip(buffers)
            .map(|(slot, buffer)| Binding {
                slot: slot.index,
                access: slot.access,
                buffer: buffer.raw(),
            })
            .collect();
        let leases = buffers.iter().map(|buffer| buffer.lease()).collect();

        let submission = self.next_submission.fetch_add(1, Ordering::Relaxed);
        let (token, signal) = completion_pair(submission, leases);

        // Host stores into the bound buffers happen-before the device reads them.
        fence(Ordering::Release);

        trace!(
            "submit '{}' #{}: {:?} groups of {:?}",
            kernel.label(),
            submission,
            grid.groups.to_array(),
            grid.group_size.to_array()
        );
        self.device.enqueue(CommandEncoding {
            label: kernel.label(),
            submission,
            pipeline: &pipeline.raw,
            bindings,
            grid,
            signal,
        })?;

        Ok(token)
    }

    /// Block until `token` settles and return its terminal state.
    pub fn wait(&self, token: &CompletionToken) -> TokenStatus {
        loop {
            let status = token.status();
            if status.is_terminal() {
                return status;
            }
            self.device.drive(DriveMode::Wait);
            let status = token.block_for(WAIT_SLICE);
            if status.is_terminal() {
                return status;
            }
        }
    }

    /// Current state of `token`, without blocking.
    pub fn poll(&self, token: &CompletionToken) -> TokenStatus {
        self.device.drive(DriveMode::Poll);
        token.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelLayout;
    use crate::software::SoftwareDevice;
    use crate::stager::DataStager;

    fn increment() -> CompiledKernel {
        CompiledKernel::host("increment", KernelLayout::new().read_write(0), |inv| {
            let i = inv.thread_position_in_grid().width;
            if i >= inv.len::<u32>(0)? {
                return Ok(());
            }
            let v: u32 = inv.load(0, i)?;
            inv.store(0, i, v + 1)
        })
    }

    #[test]
    fn test_submission_ids_increase() {
        let device = SoftwareDevice::new().unwrap();
        let stager = DataStager::new(&device);
        let dispatcher = ComputeDispatcher::new(&device);
        let pipeline = dispatcher.build_pipeline(&increment()).unwrap();
        let a = stager.stage(&[0u32; 4]).unwrap();
        let b = stager.stage(&[0u32; 4]).unwrap();

        let first = dispatcher.encode_and_submit(&pipeline, &[&a], Extent3::linear(4), Extent3::linear(4)).unwrap();
        let second = dispatcher.encode_and_submit(&pipeline, &[&b], Extent3::linear(4), Extent3::linear(4)).unwrap();
        assert!(second.submission() > first.submission());
        assert_eq!(dispatcher.wait(&second), TokenStatus::Completed);
        assert_eq!(dispatcher.wait(&first), TokenStatus::Completed);
    }

    #[test]
    fn test_binding_mismatch() {
        let device = SoftwareDevice::new().unwrap();
        let stager = DataStager::new(&device);
        let dispatcher = ComputeDispatcher::new(&device);
        let pipeline = dispatcher.build_pipeline(&increment()).unwrap();
        let a = stager.stage(&[0u32; 4]).unwrap();
        let b = stager.stage(&[0u32; 4]).unwrap();

        let err = dispatcher
            .encode_and_submit(&pipeline, &[&a, &b], Extent3::linear(4), Extent3::linear(4))
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::BindingMismatch {
                kernel: "increment".to_string(),
                expected: 1,
                actual: 2,
            }
        );
        assert!(!a.is_leased());
        assert_eq!(device.submissions(), 0);
    }

    #[test]
    fn test_empty_layout_fails_pipeline_build() {
        let device = SoftwareDevice::new().unwrap();
        let dispatcher = ComputeDispatcher::new(&device);
        let kernel = CompiledKernel::host("empty", KernelLayout::new(), |_| Ok(()));
        assert!(matches!(
            dispatcher.build_pipeline(&kernel),
            Err(DispatchError::PipelineBuild { .. })
        ));
    }

    #[test]
    fn test_lease_released_after_wait() {
        let device = SoftwareDevice::new().unwrap();
        let stager = DataStager::new(&device);
        let dispatcher = ComputeDispatcher::new(&device);
        let pipeline = dispatcher.build_pipeline(&increment()).unwrap();
        let mut buffer = stager.stage(&[1u32, 2, 3]).unwrap();

        let token = dispatcher.encode_and_submit(&pipeline, &[&buffer], Extent3::linear(3), Extent3::linear(2)).unwrap();
        assert!(dispatcher.wait(&token).is_completed());
        assert!(!buffer.is_leased());
        stager.write(&mut buffer, &[10u32]);
        assert_eq!(stager.read::<u32>(&buffer).unwrap(), vec![10, 3, 4]);
    }

    #[test]
    fn test_bound_buffer_duplicated_is_rejected() {
        let device = SoftwareDevice::new().unwrap();
        let stager = DataStager::new(&device);
        let dispatcher = ComputeDispatcher::new(&device);
        let kernel = CompiledKernel::host(
            "pair",
            KernelLayout::new().read_only(0).read_write(1),
            |_| Ok(()),
        );
        let pipeline = dispatcher.build_pipeline(&kernel).unwrap();
        let buffer = stager.stage(&[0u32; 2]).unwrap();

        let err = dispatcher
            .encode_and_submit(&pipeline, &[&buffer, &buffer], Extent3::linear(2), Extent3::linear(2))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Submission(_)));
        assert!(!buffer.is_leased());
    }
}
