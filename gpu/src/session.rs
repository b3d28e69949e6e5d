//! One kernel, its buffers and its launch shape, bundled for simple
//! prepare → run → read-back programs.

use bytemuck::Pod;

use crate::buffer::DeviceBuffer;
use crate::completion::{CompletionToken, TokenStatus};
use crate::device::{BackendKind, ComputeDevice};
use crate::dispatcher::{ComputeDispatcher, PipelineState};
use crate::error::{DispatchError, Result};
use crate::grid::Extent3;
use crate::kernel::CompiledKernel;
use crate::kernels::FixtureKernel;
use crate::stager::DataStager;

/// What a [`ComputeSession`] runs: the kernel, one buffer size per binding
/// (in layout order) and the grid/group shape of every dispatch.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub kernel: CompiledKernel,
    pub buffers: Vec<usize>,
    pub grid: Extent3,
    pub group: Extent3,
}

impl SessionConfig {
    pub fn new(kernel: CompiledKernel) -> Self {
        SessionConfig {
            kernel,
            buffers: Vec::new(),
            grid: Extent3::linear(1),
            group: Extent3::linear(1),
        }
    }

    /// Append a buffer of `byte_length` bytes for the next binding.
    pub fn buffer(mut self, byte_length: usize) -> Self {
        self.buffers.push(byte_length);
        self
    }

    /// Append a buffer holding `count` values of `T`.
    pub fn buffer_for<T: Pod>(self, count: usize) -> Self {
        self.buffer(count.saturating_mul(std::mem::size_of::<T>()))
    }

    pub fn grid(mut self, grid: impl Into<Extent3>) -> Self {
        self.grid = grid.into();
        self
    }

    pub fn group(mut self, group: impl Into<Extent3>) -> Self {
        self.group = group.into();
        self
    }

    /// A fixture kernel over `len` `f32` elements, one thread per element.
    pub fn fixture(kernel: FixtureKernel, backend: BackendKind, len: usize, group: Extent3) -> Self {
        SessionConfig::new(kernel.compiled_for(backend, group))
            .buffer_for::<f32>(len)
            .buffer_for::<u32>(1)
            .grid(Extent3::linear(len))
            .group(group)
    }
}

/// A stager, a dispatcher, a built pipeline and one buffer per binding.
pub struct ComputeSession<'d, D: ComputeDevice> {
    stager: DataStager<'d, D>,
    dispatcher: ComputeDispatcher<'d, D>,
    pipeline: PipelineState<D::Pipeline>,
    buffers: Vec<DeviceBuffer<D::Buffer>>,
    grid: Extent3,
    group: Extent3,
}

impl<'d, D: ComputeDevice> ComputeSession<'d, D> {
    /// Build the pipeline and allocate every buffer `config` asks for.
    pub fn new(device: &'d D, config: SessionConfig) -> Result<Self> {
        let stager = DataStager::new(device);
        let dispatcher = ComputeDispatcher::new(device);
        let pipeline = dispatcher.build_pipeline(&config.kernel)?;

        let expected = config.kernel.layout().len();
        if config.buffers.len() != expected {
            return Err(DispatchError::BindingMismatch {
                kernel: config.kernel.label().to_string(),
                expected,
                actual: config.buffers.len(),
            });
        }
        let buffers = config
            .buffers
            .iter()
            .map(|&byte_length| stager.allocate(byte_length))
            .collect::<Result<Vec<_>>>()?;

        Ok(ComputeSession {
            stager,
            dispatcher,
            pipeline,
            buffers,
            grid: config.grid,
            group: config.group,
        })
    }

    fn position(&self, slot: u32) -> Result<usize> {
        self.pipeline
            .kernel()
            .layout()
            .position_of(slot)
            .ok_or_else(|| {
                DispatchError::InvalidDispatchConfiguration(format!(
                    "kernel '{}' has no binding at slot {}",
                    self.pipeline.kernel().label(),
                    slot
                ))
            })
    }

    /// Copy host input into the buffer bound at `slot`.
    ///
    /// # Panics
    ///
    /// If `data` is larger than the buffer, or a dispatch still holds it.
    pub fn prepare_data<T: Pod>(&mut self, slot: u32, data: &[T]) -> Result<()> {
        let position = self.position(slot)?;
        self.stager.write(&mut self.buffers[position], data);
        Ok(())
    }

    /// Submit one dispatch with the configured shape, without waiting.
    pub fn submit(&self) -> Result<CompletionToken> {
        let buffers: Vec<&DeviceBuffer<D::Buffer>> = self.buffers.iter().collect();
        self.dispatcher
            .encode_and_submit(&self.pipeline, &buffers, self.grid, self.group)
    }

    /// Submit one dispatch and wait for it to settle.
    pub fn send_compute_command(&self) -> Result<TokenStatus> {
        let token = self.submit()?;
        Ok(self.dispatcher.wait(&token))
    }

    /// Read the buffer bound at `slot` back as `T` values.
    pub fn result<T: Pod>(&self, slot: u32) -> Result<Vec<T>> {
        let position = self.position(slot)?;
        self.stager.read(&self.buffers[position])
    }

    pub fn buffer(&self, slot: u32) -> Option<&DeviceBuffer<D::Buffer>> {
        let position = self.pipeline.kernel().layout().position_of(slot)?;
        self.buffers.get(position)
    }

    pub fn stager(&self) -> &DataStager<'d, D> {
        &self.stager
    }

    pub fn dispatcher(&self) -> &ComputeDispatcher<'d, D> {
        &self.dispatcher
    }

    pub fn pipeline(&self) -> &PipelineState<D::Pipeline> {
        &self.pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{COUNT_SLOT, DATA_SLOT};
    use crate::software::SoftwareDevice;

    #[test]
    fn test_fixture_session_runs_twice() {
        let device = SoftwareDevice::new().unwrap();
        let config =
            SessionConfig::fixture(FixtureKernel::AddOne, device.kind(), 10, Extent3::linear(4));
        let mut session = ComputeSession::new(&device, config).unwrap();

        let input: Vec<f32> = (0..10).map(|i| i as f32).collect();
        session.prepare_data(DATA_SLOT, &input).unwrap();
        session.prepare_data(COUNT_SLOT, &[10u32]).unwrap();

        assert_eq!(session.send_compute_command().unwrap(), TokenStatus::Completed);
        assert_eq!(session.send_compute_command().unwrap(), TokenStatus::Completed);

        let output = session.result::<f32>(DATA_SLOT).unwrap();
        let expected: Vec<f32> = (0..10).map(|i| i as f32 + 2.0).collect();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_buffer_count_must_match_layout() {
        let device = SoftwareDevice::new().unwrap();
        let config = SessionConfig::new(FixtureKernel::Identity.host()).buffer_for::<f32>(4);
        let err = ComputeSession::new(&device, config).err().unwrap();
        assert!(matches!(
            err,
            DispatchError::BindingMismatch {
                expected: 2,
                actual: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_slot_is_rejected() {
        let device = SoftwareDevice::new().unwrap();
        let config =
            SessionConfig::fixture(FixtureKernel::Identity, device.kind(), 4, Extent3::linear(4));
        let mut session = ComputeSession::new(&device, config).unwrap();
        assert!(session.prepare_data(7, &[1.0f32]).is_err());
        assert!(session.buffer(7).is_none());
        assert!(session.buffer(DATA_SLOT).is_some());
    }
}
