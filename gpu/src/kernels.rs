//! Fixture kernels for smoke tests and the probe tool.
//!
//! Every fixture updates an `f32` buffer in place:
//!
//! - slot 0: `data`, read-write, one element per thread
//! - slot 1: `count`, read-only, a single `u32` element count
//!
//! Threads past `count` return without touching memory, so any grid that
//! covers the data with whole thread-groups is valid.
//!
//! ```metal
//! kernel void lumen_add_one(
//!     device float* data        [[buffer(0)]],
//!     device const uint* count  [[buffer(1)]],
//!     uint id [[thread_position_in_grid]]
//! ) {
//!     if (id >= count[0]) return;
//!     data[id] = data[id] + 1.0f;
//! }
//! ```

use crate::device::BackendKind;
use crate::grid::Extent3;
use crate::kernel::{CompiledKernel, KernelLayout};

pub const DATA_SLOT: u32 = 0;
pub const COUNT_SLOT: u32 = 1;

/// An elementwise `f32` kernel available on every backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FixtureKernel {
    Identity,
    AddOne,
    Scale(f32),
}

impl FixtureKernel {
    pub fn name(self) -> &'static str {
        match self {
            FixtureKernel::Identity => "identity",
            FixtureKernel::AddOne => "add_one",
            FixtureKernel::Scale(_) => "scale",
        }
    }

    /// Entry point shared by the MSL and WGSL sources.
    pub fn entry_point(self) -> String {
        format!("lumen_{}", self.name())
    }

    /// Host-side reference of what the kernel does to one element.
    pub fn apply(self, x: f32) -> f32 {
        match self {
            FixtureKernel::Identity => x,
            FixtureKernel::AddOne => x + 1.0,
            FixtureKernel::Scale(factor) => x * factor,
        }
    }

    pub fn layout() -> KernelLayout {
        KernelLayout::new().read_write(DATA_SLOT).read_only(COUNT_SLOT)
    }

    fn expr(self, suffix: &str) -> String {
        match self {
            FixtureKernel::Identity => "data[id]".to_string(),
            FixtureKernel::AddOne => format!("data[id] + 1.0{}", suffix),
            FixtureKernel::Scale(factor) => format!("data[id] * {:?}{}", factor, suffix),
        }
    }

    /// Metal Shading Language source.
    pub fn msl_source(self) -> String {
        let fn_name = self.entry_point();
        let expr = self.expr("f");
        format!(
            r#"#include <metal_stdlib>
using namespace metal;

kernel void {fn_name}(
    device float* data        [[buffer({DATA_SLOT})]],
    device const uint* count  [[buffer({COUNT_SLOT})]],
    uint id [[thread_position_in_grid]]
) {{
    if (id >= count[0]) return;
    data[id] = {expr};
}}
"#
        )
    }

    /// WGSL source with `@workgroup_size` fixed to `group`.
    pub fn wgsl_source(self, group: Extent3) -> String {
        let fn_name = self.entry_point();
        let expr = self.expr("");
        let (x, y, z) = (group.width, group.height, group.depth);
        format!(
            r#"@group(0) @binding({DATA_SLOT}) var<storage, read_write> data: array<f32>;
@group(0) @binding({COUNT_SLOT}) var<storage, read> count: array<u32>;

@compute @workgroup_size({x}, {y}, {z})
fn {fn_name}(@builtin(global_invocation_id) gid: vec3<u32>) {{
    let id = gid.x;
    if (id >= count[0]) {{
        return;
    }}
    data[id] = {expr};
}}
"#
        )
    }

    /// Native closure for the software device.
    pub fn host(self) -> CompiledKernel {
        CompiledKernel::host(&self.entry_point(), Self::layout(), move |inv| {
            let id = inv.thread_position_in_grid().width;
            let count = inv.load::<u32>(COUNT_SLOT, 0)? as usize;
            if id >= count {
                return Ok(());
            }
            let value = inv.load::<f32>(DATA_SLOT, id)?;
            inv.store(DATA_SLOT, id, self.apply(value))
        })
    }

    /// The kernel artifact a `backend` device can build.
    ///
    /// `group` is only baked into WGSL; the other backends take the group
    /// size at dispatch time.
    pub fn compiled_for(self, backend: BackendKind, group: Extent3) -> CompiledKernel {
        match backend {
            BackendKind::Metal => {
                CompiledKernel::msl(&self.entry_point(), &self.msl_source(), Self::layout())
            }
            BackendKind::Wgpu => CompiledKernel::wgsl(
                &self.entry_point(),
                &self.wgsl_source(group),
                Self::layout(),
                group,
            ),
            BackendKind::Software => self.host(),
        }
    }
}
