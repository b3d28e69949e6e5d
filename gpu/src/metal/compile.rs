//! Metal pipeline creation: MSL artifact → MTLComputePipelineState

use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_foundation::NSString;
use objc2_metal::{MTLComputePipelineState, MTLDevice, MTLLibrary};

use super::device_init::MetalContext;
use crate::error::{DispatchError, Result};
use crate::kernel::{CompiledKernel, KernelArtifact};

/// A Metal compute pipeline ready for dispatch.
pub struct MetalPipeline {
    pub pipeline: Retained<ProtocolObject<dyn MTLComputePipelineState>>,
    /// Maximum threads per threadgroup for this pipeline.
    pub max_threads_per_group: usize,
}

/// Build a compute pipeline from an MSL kernel artifact.
///
/// The kernel's entry point must name a `kernel` function in the library.
pub fn build_pipeline(ctx: &MetalContext, kernel: &CompiledKernel) -> Result<MetalPipeline> {
    let fail = |reason: String| DispatchError::PipelineBuild {
        kernel: kernel.label().to_string(),
        reason,
    };

    let source = match kernel.artifact() {
        KernelArtifact::Msl(source) => source,
        other => {
            return Err(fail(format!(
                "Metal device cannot run {} artifacts",
                other.backend()
            )))
        }
    };

    let source_ns = NSString::from_str(source);
    let library: Retained<ProtocolObject<dyn MTLLibrary>> = ctx
        .device
        .newLibraryWithSource_options_error(&source_ns, None)
        .map_err(|e| fail(format!("library rejected: {}", e.localizedDescription())))?;

    let fn_name_ns = NSString::from_str(kernel.entry_point());
    let function = library.newFunctionWithName(&fn_name_ns).ok_or_else(|| {
        fail(format!(
            "kernel function '{}' not found in library",
            kernel.entry_point()
        ))
    })?;

    let pipeline: Retained<ProtocolObject<dyn MTLComputePipelineState>> = ctx
        .device
        .newComputePipelineStateWithFunction_error(&function)
        .map_err(|e| fail(format!("pipeline creation failed: {}", e.localizedDescription())))?;

    let max_threads_per_group = pipeline.maxTotalThreadsPerThreadgroup();

    Ok(MetalPipeline {
        pipeline,
        max_threads_per_group,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::KernelLayout;

    #[test]
    fn test_build_simple_pipeline() {
        if !MetalContext::is_available() {
            println!("Metal not available, skipping");
            return;
        }

        let ctx = MetalContext::new().unwrap();
        let source = r#"
            #include <metal_stdlib>
            using namespace metal;

            kernel void test_add(
                device const float* a [[buffer(0)]],
                device const float* b [[buffer(1)]],
                device float* result   [[buffer(2)]],
                uint id [[thread_position_in_grid]]
            ) {
                result[id] = a[id] + b[id];
            }
        "#;
        let layout = KernelLayout::new().read_only(0).read_only(1).read_write(2);
        let kernel = CompiledKernel::msl("test_add", source, layout);

        let pipeline = build_pipeline(&ctx, &kernel);
        assert!(pipeline.is_ok(), "build failed: {:?}", pipeline.err().map(|e| e.to_string()));
        let pipeline = pipeline.unwrap();
        assert!(pipeline.max_threads_per_group > 0);
    }

    #[test]
    fn test_missing_entry_point() {
        if !MetalContext::is_available() {
            println!("Metal not available, skipping");
            return;
        }

        let ctx = MetalContext::new().unwrap();
        let source = "#include <metal_stdlib>\nusing namespace metal;\nkernel void k(uint id [[thread_position_in_grid]]) {}";
        let kernel = CompiledKernel::msl("nope", source, KernelLayout::new().read_write(0));
        let err = build_pipeline(&ctx, &kernel).err().unwrap();
        assert!(matches!(err, DispatchError::PipelineBuild { .. }));
    }
}
