//! Backend abstraction: thin enum dispatch layer over the compiled-in devices.
//!
//! `NativeContext`, `NativeBuffer` and `NativePipeline` wrap the
//! backend-specific types so callers can pick a device at runtime and still
//! use the generic [`DataStager`](crate::stager::DataStager) and
//! [`ComputeDispatcher`](crate::dispatcher::ComputeDispatcher). The software
//! device is always compiled in, so there is always one variant.

use log::info;

use crate::config::BackendPreference;
use crate::device::{
    BackendKind, Binding, CommandEncoding, ComputeDevice, DeviceLimits, DriveMode,
};
use crate::error::{DispatchError, Result};
use crate::kernel::CompiledKernel;
use crate::software::{SoftwareBuffer, SoftwareDevice, SoftwarePipeline};

#[cfg(all(feature = "metal-backend", target_os = "macos"))]
use crate::metal::{buffer_ops::MetalBuffer, compile::MetalPipeline, MetalDevice};

#[cfg(feature = "webgpu-backend")]
use crate::wgpu_backend::{buffer_ops::WgpuBuffer, compile::WgpuPipeline, WgpuDevice};

// ---------------------------------------------------------------------------
// NativeContext
// ---------------------------------------------------------------------------

pub enum NativeContext {
    #[cfg(all(feature = "metal-backend", target_os = "macos"))]
    Metal(MetalDevice),
    #[cfg(feature = "webgpu-backend")]
    Wgpu(WgpuDevice),
    Software(SoftwareDevice),
}

impl NativeContext {
    /// Open the best available device, falling back to the software device.
    pub fn new() -> Result<Self> {
        Self::with_preference(BackendPreference::Auto)
    }

    /// Open the device selected by `LUMEN_BACKEND`.
    pub fn from_env() -> Result<Self> {
        let preference = BackendPreference::from_env().map_err(DispatchError::DeviceUnavailable)?;
        Self::with_preference(preference)
    }

    pub fn with_preference(preference: BackendPreference) -> Result<Self> {
        let ctx = match preference {
            BackendPreference::Auto => match Self::open_gpu() {
                Some(ctx) => ctx,
                None => NativeContext::Software(SoftwareDevice::new()?),
            },
            BackendPreference::Metal => Self::open_metal()?,
            BackendPreference::Wgpu => Self::open_wgpu()?,
            BackendPreference::Software => NativeContext::Software(SoftwareDevice::new()?),
        };
        info!("opened {} device '{}'", ctx.kind(), ctx.name());
        Ok(ctx)
    }

    /// Check if any GPU backend is available.
    pub fn is_available() -> bool {
        #[cfg(all(feature = "metal-backend", target_os = "macos"))]
        {
            if MetalDevice::is_available() {
                return true;
            }
        }
        #[cfg(feature = "webgpu-backend")]
        {
            if WgpuDevice::is_available() {
                return true;
            }
        }
        false
    }

    fn open_gpu() -> Option<Self> {
        #[cfg(all(feature = "metal-backend", target_os = "macos"))]
        {
            if let Some(device) = MetalDevice::new() {
                return Some(NativeContext::Metal(device));
            }
        }
        #[cfg(feature = "webgpu-backend")]
        {
            if let Some(device) = WgpuDevice::new() {
                return Some(NativeContext::Wgpu(device));
            }
        }
        None
    }

    fn open_metal() -> Result<Self> {
        #[cfg(all(feature = "metal-backend", target_os = "macos"))]
        {
            MetalDevice::new()
                .map(NativeContext::Metal)
                .ok_or_else(|| DispatchError::DeviceUnavailable("no Metal device".to_string()))
        }
        #[cfg(not(all(feature = "metal-backend", target_os = "macos")))]
        {
            Err(DispatchError::DeviceUnavailable(
                "built without the metal-backend feature (macOS only)".to_string(),
            ))
        }
    }

    fn open_wgpu() -> Result<Self> {
        #[cfg(feature = "webgpu-backend")]
        {
            WgpuDevice::new()
                .map(NativeContext::Wgpu)
                .ok_or_else(|| DispatchError::DeviceUnavailable("no wgpu adapter".to_string()))
        }
        #[cfg(not(feature = "webgpu-backend"))]
        {
            Err(DispatchError::DeviceUnavailable(
                "built without the webgpu-backend feature".to_string(),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// NativeBuffer / NativePipeline
// ---------------------------------------------------------------------------

pub enum NativeBuffer {
    #[cfg(all(feature = "metal-backend", target_os = "macos"))]
    Metal(MetalBuffer),
    #[cfg(feature = "webgpu-backend")]
    Wgpu(WgpuBuffer),
    Software(SoftwareBuffer),
}

impl NativeBuffer {
    pub fn byte_size(&self) -> usize {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativeBuffer::Metal(buf) => buf.byte_size(),
            #[cfg(feature = "webgpu-backend")]
            NativeBuffer::Wgpu(buf) => buf.byte_size(),
            NativeBuffer::Software(buf) => buf.byte_size(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativeBuffer::Metal(_) => BackendKind::Metal,
            #[cfg(feature = "webgpu-backend")]
            NativeBuffer::Wgpu(_) => BackendKind::Wgpu,
            NativeBuffer::Software(_) => BackendKind::Software,
        }
    }
}

pub enum NativePipeline {
    #[cfg(all(feature = "metal-backend", target_os = "macos"))]
    Metal(MetalPipeline),
    #[cfg(feature = "webgpu-backend")]
    Wgpu(WgpuPipeline),
    Software(SoftwarePipeline),
}

impl NativePipeline {
    pub fn backend(&self) -> BackendKind {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativePipeline::Metal(_) => BackendKind::Metal,
            #[cfg(feature = "webgpu-backend")]
            NativePipeline::Wgpu(_) => BackendKind::Wgpu,
            NativePipeline::Software(_) => BackendKind::Software,
        }
    }
}

fn mismatch(what: &str, found: BackendKind, expected: BackendKind) -> DispatchError {
    DispatchError::Submission(format!(
        "{} belongs to the {} backend, not {}",
        what, found, expected
    ))
}

/// Re-type an encoding's bindings for the backend that owns `pipeline`.
fn narrow<'a, P, B>(
    encoding: CommandEncoding<'a, NativePipeline, NativeBuffer>,
    pipeline: &'a P,
    expected: BackendKind,
    unwrap: impl Fn(&'a NativeBuffer) -> Option<&'a B>,
) -> Result<CommandEncoding<'a, P, B>> {
    let CommandEncoding {
        label,
        submission,
        bindings,
        grid,
        signal,
        ..
    } = encoding;

    let bindings = bindings
        .into_iter()
        .map(|binding| -> Result<Binding<'a, B>> {
            let buffer = unwrap(binding.buffer)
                .ok_or_else(|| mismatch("buffer", binding.buffer.backend(), expected))?;
            Ok(Binding {
                slot: binding.slot,
                access: binding.access,
                buffer,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CommandEncoding {
        label,
        submission,
        pipeline,
        bindings,
        grid,
        signal,
    })
}

// ---------------------------------------------------------------------------
// ComputeDevice
// ---------------------------------------------------------------------------

impl ComputeDevice for NativeContext {
    type Buffer = NativeBuffer;
    type Pipeline = NativePipeline;

    fn name(&self) -> String {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativeContext::Metal(dev) => dev.name(),
            #[cfg(feature = "webgpu-backend")]
            NativeContext::Wgpu(dev) => dev.name(),
            NativeContext::Software(dev) => dev.name(),
        }
    }

    fn kind(&self) -> BackendKind {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativeContext::Metal(_) => BackendKind::Metal,
            #[cfg(feature = "webgpu-backend")]
            NativeContext::Wgpu(_) => BackendKind::Wgpu,
            NativeContext::Software(_) => BackendKind::Software,
        }
    }

    fn limits(&self) -> DeviceLimits {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativeContext::Metal(dev) => dev.limits(),
            #[cfg(feature = "webgpu-backend")]
            NativeContext::Wgpu(dev) => dev.limits(),
            NativeContext::Software(dev) => dev.limits(),
        }
    }

    fn allocate(&self, byte_length: usize) -> Result<NativeBuffer> {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativeContext::Metal(dev) => dev.allocate(byte_length).map(NativeBuffer::Metal),
            #[cfg(feature = "webgpu-backend")]
            NativeContext::Wgpu(dev) => dev.allocate(byte_length).map(NativeBuffer::Wgpu),
            NativeContext::Software(dev) => dev.allocate(byte_length).map(NativeBuffer::Software),
        }
    }

    #[allow(unreachable_patterns)]
    fn write_bytes(&self, buffer: &NativeBuffer, offset: usize, bytes: &[u8]) {
        match (self, buffer) {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            (NativeContext::Metal(dev), NativeBuffer::Metal(buf)) => {
                dev.write_bytes(buf, offset, bytes)
            }
            #[cfg(feature = "webgpu-backend")]
            (NativeContext::Wgpu(dev), NativeBuffer::Wgpu(buf)) => {
                dev.write_bytes(buf, offset, bytes)
            }
            (NativeContext::Software(dev), NativeBuffer::Software(buf)) => {
                dev.write_bytes(buf, offset, bytes)
            }
            _ => panic!("{}", mismatch("buffer", buffer.backend(), self.kind())),
        }
    }

    #[allow(unreachable_patterns)]
    fn read_bytes(&self, buffer: &NativeBuffer, offset: usize, out: &mut [u8]) -> Result<()> {
        match (self, buffer) {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            (NativeContext::Metal(dev), NativeBuffer::Metal(buf)) => dev.read_bytes(buf, offset, out),
            #[cfg(feature = "webgpu-backend")]
            (NativeContext::Wgpu(dev), NativeBuffer::Wgpu(buf)) => dev.read_bytes(buf, offset, out),
            (NativeContext::Software(dev), NativeBuffer::Software(buf)) => {
                dev.read_bytes(buf, offset, out)
            }
            _ => Err(mismatch("buffer", buffer.backend(), self.kind())),
        }
    }

    fn build_pipeline(&self, kernel: &CompiledKernel) -> Result<NativePipeline> {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativeContext::Metal(dev) => dev.build_pipeline(kernel).map(NativePipeline::Metal),
            #[cfg(feature = "webgpu-backend")]
            NativeContext::Wgpu(dev) => dev.build_pipeline(kernel).map(NativePipeline::Wgpu),
            NativeContext::Software(dev) => {
                dev.build_pipeline(kernel).map(NativePipeline::Software)
            }
        }
    }

    #[allow(unreachable_patterns)]
    fn pipeline_max_threads(&self, pipeline: &NativePipeline) -> usize {
        match (self, pipeline) {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            (NativeContext::Metal(dev), NativePipeline::Metal(p)) => dev.pipeline_max_threads(p),
            #[cfg(feature = "webgpu-backend")]
            (NativeContext::Wgpu(dev), NativePipeline::Wgpu(p)) => dev.pipeline_max_threads(p),
            (NativeContext::Software(dev), NativePipeline::Software(p)) => {
                dev.pipeline_max_threads(p)
            }
            _ => 0,
        }
    }

    #[allow(unreachable_patterns)]
    fn enqueue(&self, encoding: CommandEncoding<'_, NativePipeline, NativeBuffer>) -> Result<()> {
        let expected = self.kind();
        match (self, encoding.pipeline) {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            (NativeContext::Metal(dev), NativePipeline::Metal(p)) => {
                dev.enqueue(narrow(encoding, p, expected, |b| match b {
                    NativeBuffer::Metal(b) => Some(b),
                    _ => None,
                })?)
            }
            #[cfg(feature = "webgpu-backend")]
            (NativeContext::Wgpu(dev), NativePipeline::Wgpu(p)) => {
                dev.enqueue(narrow(encoding, p, expected, |b| match b {
                    NativeBuffer::Wgpu(b) => Some(b),
                    _ => None,
                })?)
            }
            (NativeContext::Software(dev), NativePipeline::Software(p)) => {
                dev.enqueue(narrow(encoding, p, expected, |b| match b {
                    NativeBuffer::Software(b) => Some(b),
                    _ => None,
                })?)
            }
            (_, pipeline) => Err(mismatch("pipeline", pipeline.backend(), expected)),
        }
    }

    fn drive(&self, mode: DriveMode) {
        match self {
            #[cfg(all(feature = "metal-backend", target_os = "macos"))]
            NativeContext::Metal(dev) => dev.drive(mode),
            #[cfg(feature = "webgpu-backend")]
            NativeContext::Wgpu(dev) => dev.drive(mode),
            NativeContext::Software(dev) => dev.drive(mode),
        }
    }
}
