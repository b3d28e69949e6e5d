//! Lumen GPU compute: single-kernel dispatch with explicit completion.
//!
//! Three pieces, all generic over a [`ComputeDevice`]:
//!
//! - [`DataStager`] allocates device-visible buffers and moves host data
//!   in and out of them.
//! - [`ComputeDispatcher`] builds pipelines, sizes the dispatch grid,
//!   binds buffers and submits without blocking.
//! - [`CompletionToken`] reports `Pending → Completed | Failed` for each
//!   submission; [`ComputeDispatcher::wait`] is the only blocking call.
//!
//! Backends: the software device (always built), Metal (`metal-backend`,
//! macOS) and wgpu (`webgpu-backend`). [`NativeContext`] picks one at
//! runtime.
//!
//! ```rust,ignore
//! let device = lumen_gpu::NativeContext::new()?;
//! let stager = DataStager::new(&device);
//! let dispatcher = ComputeDispatcher::new(&device);
//! let group = Extent3::linear(64);
//! let pipeline = dispatcher.build_pipeline(&FixtureKernel::AddOne.compiled_for(device.kind(), group))?;
//! let data = stager.stage(&input)?;
//! let count = stager.stage(&[input.len() as u32])?;
//! let token = dispatcher.encode_and_submit(&pipeline, &[&data, &count], Extent3::linear(input.len()), group)?;
//! dispatcher.wait(&token).into_result()?;
//! let output: Vec<f32> = stager.read(&data)?;
//! ```

pub mod backend;
pub mod buffer;
pub mod completion;
pub mod config;
pub mod device;
pub mod dispatcher;
pub mod error;
pub mod grid;
pub mod kernel;
pub mod kernels;
pub mod logging;
pub mod session;
pub mod software;
pub mod stager;

#[cfg(all(feature = "metal-backend", target_os = "macos"))]
pub mod metal;

#[cfg(feature = "webgpu-backend")]
pub mod wgpu_backend;

pub use backend::NativeContext;
pub use buffer::DeviceBuffer;
pub use completion::{CompletionSignal, CompletionToken, DeviceFault, TokenStatus};
pub use config::BackendPreference;
pub use device::{BackendKind, ComputeDevice, DeviceLimits, DriveMode};
pub use dispatcher::{ComputeDispatcher, PipelineState};
pub use error::{DispatchError, Result};
pub use grid::{DispatchGrid, Extent3};
pub use kernel::{BindingAccess, CompiledKernel, KernelArtifact, KernelLayout};
pub use kernels::FixtureKernel;
pub use session::{ComputeSession, SessionConfig};
pub use software::{KernelInvocation, SoftwareDevice};
pub use stager::DataStager;
