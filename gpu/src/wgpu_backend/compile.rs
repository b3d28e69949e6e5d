//! WGSL pipeline creation: WGSL artifact → wgpu::ComputePipeline

use std::borrow::Cow;

use wgpu;

use super::device_init::WgpuContext;
use crate::error::{DispatchError, Result};
use crate::kernel::{BindingAccess, CompiledKernel, KernelArtifact, KernelLayout};

/// A wgpu compute pipeline ready for dispatch.
pub struct WgpuPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub bind_group_layout: wgpu::BindGroupLayout,
    /// Invocations in one workgroup, as declared by `@workgroup_size`.
    pub workgroup_threads: usize,
}

fn layout_entries(layout: &KernelLayout) -> Vec<wgpu::BindGroupLayoutEntry> {
    layout
        .slots()
        .iter()
        .map(|slot| wgpu::BindGroupLayoutEntry {
            binding: slot.index,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage {
                    read_only: slot.access == BindingAccess::ReadOnly,
                },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        })
        .collect()
}

/// Build a compute pipeline from a WGSL kernel artifact.
///
/// Group 0 is laid out from the kernel layout, so a shader whose
/// `@binding`s or access modes disagree with it fails here.
pub fn build_pipeline(ctx: &WgpuContext, kernel: &CompiledKernel) -> Result<WgpuPipeline> {
    let fail = |reason: String| DispatchError::PipelineBuild {
        kernel: kernel.label().to_string(),
        reason,
    };

    let source = match kernel.artifact() {
        KernelArtifact::Wgsl(source) => source,
        other => {
            return Err(fail(format!(
                "wgpu device cannot run {} artifacts",
                other.backend()
            )))
        }
    };
    let group_size = kernel
        .fixed_group_size()
        .ok_or_else(|| fail("WGSL kernels must declare their workgroup size".to_string()))?;

    ctx.device.push_error_scope(wgpu::ErrorFilter::Validation);

    let shader_module = ctx
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(kernel.label()),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
        });

    let bind_group_layout = ctx
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(kernel.label()),
            entries: &layout_entries(kernel.layout()),
        });

    let pipeline_layout = ctx
        .device
        .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(kernel.label()),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

    let pipeline = ctx
        .device
        .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel.label()),
            layout: Some(&pipeline_layout),
            module: &shader_module,
            entry_point: Some(kernel.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        });

    if let Some(error) = pollster::block_on(ctx.device.pop_error_scope()) {
        return Err(fail(error.to_string()));
    }

    Ok(WgpuPipeline {
        pipeline,
        bind_group_layout,
        workgroup_threads: group_size.volume(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Extent3;
    use crate::kernel::KernelLayout;

    #[test]
    fn test_build_simple_pipeline() {
        let Some(ctx) = WgpuContext::new() else {
            println!("wgpu adapter not available, skipping");
            return;
        };
        let source = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(64)
fn double_it(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < arrayLength(&data)) {
        data[gid.x] = data[gid.x] * 2.0;
    }
}
"#;
        let layout = KernelLayout::new().read_write(0);
        let kernel = CompiledKernel::wgsl("double_it", source, layout, Extent3::linear(64));
        let pipeline = build_pipeline(&ctx, &kernel).unwrap();
        assert_eq!(pipeline.workgroup_threads, 64);
    }

    #[test]
    fn test_invalid_source_rejected() {
        let Some(ctx) = WgpuContext::new() else {
            println!("wgpu adapter not available, skipping");
            return;
        };
        let layout = KernelLayout::new().read_write(0);
        let kernel = CompiledKernel::wgsl("main", "fn main( {", layout, Extent3::linear(64));
        let err = build_pipeline(&ctx, &kernel).err().unwrap();
        assert!(matches!(err, DispatchError::PipelineBuild { .. }));
    }

    #[test]
    fn test_layout_entries_follow_access() {
        let entries = layout_entries(&KernelLayout::new().read_write(0).read_only(3));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].binding, 3);
        assert!(matches!(
            entries[0].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                ..
            }
        ));
        assert!(matches!(
            entries[1].ty,
            wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: true },
                ..
            }
        ));
    }

    #[test]
    fn test_incompatible_layout_rejected() {
        let Some(ctx) = WgpuContext::new() else {
            println!("wgpu adapter not available, skipping");
            return;
        };
        let source = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;
@group(0) @binding(1) var<storage, read> count: array<u32>;

@compute @workgroup_size(64)
fn add_one(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x < count[0]) {
        data[gid.x] = data[gid.x] + 1.0;
    }
}
"#;
        let group = Extent3::linear(64);

        // Slot 1 missing from the layout.
        let missing = KernelLayout::new().read_write(0);
        let kernel = CompiledKernel::wgsl("add_one", source, missing, group);
        let err = build_pipeline(&ctx, &kernel).err().unwrap();
        assert!(matches!(err, DispatchError::PipelineBuild { .. }));

        // Shader writes a slot the layout declares read-only.
        let read_only = KernelLayout::new().read_only(0).read_only(1);
        let kernel = CompiledKernel::wgsl("add_one", source, read_only, group);
        let err = build_pipeline(&ctx, &kernel).err().unwrap();
        assert!(matches!(err, DispatchError::PipelineBuild { .. }));

        let matching = KernelLayout::new().read_write(0).read_only(1);
        let kernel = CompiledKernel::wgsl("add_one", source, matching, group);
        assert!(build_pipeline(&ctx, &kernel).is_ok());
    }
}
