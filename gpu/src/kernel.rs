//! Compiled kernels and their binding layouts.
//!
//! A `CompiledKernel` is an opaque, immutable artifact produced outside the
//! core. The core only looks at its declared binding layout and, for
//! backends that compile the thread-group size into the shader, at that
//! fixed size. The artifact itself is handed to the device untouched.

use std::fmt;
use std::sync::Arc;

use crate::device::BackendKind;
use crate::grid::Extent3;
use crate::software::KernelInvocation;

/// How a kernel accesses a bound buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingAccess {
    ReadOnly,
    ReadWrite,
}

/// One declared binding: the slot index the kernel reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    pub index: u32,
    pub access: BindingAccess,
}

/// Ordered list of a kernel's buffer bindings.
///
/// Buffers passed to a dispatch are matched to slots positionally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KernelLayout {
    slots: Vec<BindingSlot>,
}

impl KernelLayout {
    pub fn new() -> Self {
        KernelLayout { slots: Vec::new() }
    }

    /// Append a read-only binding at `index`.
    pub fn read_only(mut self, index: u32) -> Self {
        self.slots.push(BindingSlot {
            index,
            access: BindingAccess::ReadOnly,
        });
        self
    }

    /// Append a read-write binding at `index`.
    pub fn read_write(mut self, index: u32) -> Self {
        self.slots.push(BindingSlot {
            index,
            access: BindingAccess::ReadWrite,
        });
        self
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Position in the layout of the binding at slot `index`.
    pub fn position_of(&self, index: u32) -> Option<usize> {
        self.slots.iter().position(|slot| slot.index == index)
    }

    /// A layout must bind at least one buffer and never reuse a slot.
    pub fn validate(&self) -> Result<(), String> {
        if self.slots.is_empty() {
            return Err("layout declares no bindings".to_string());
        }
        for (i, slot) in self.slots.iter().enumerate() {
            if self.slots[..i].iter().any(|earlier| earlier.index == slot.index) {
                return Err(format!("slot {} is declared more than once", slot.index));
            }
        }
        Ok(())
    }
}

/// Host kernel body, run once per thread of the dispatch grid by the
/// software device. Returning `Err` faults the dispatch.
pub type HostKernelFn = dyn Fn(&mut KernelInvocation<'_>) -> Result<(), String> + Send + Sync;

/// Backend-specific payload of a compiled kernel.
#[derive(Clone)]
pub enum KernelArtifact {
    /// Metal Shading Language library source.
    Msl(Arc<str>),
    /// WGSL module source.
    Wgsl(Arc<str>),
    /// Native closure executed by the software device.
    Host(Arc<HostKernelFn>),
}

impl KernelArtifact {
    /// Backend able to build a pipeline from this artifact.
    pub fn backend(&self) -> BackendKind {
        match self {
            KernelArtifact::Msl(_) => BackendKind::Metal,
            KernelArtifact::Wgsl(_) => BackendKind::Wgpu,
            KernelArtifact::Host(_) => BackendKind::Software,
        }
    }
}

impl fmt::Debug for KernelArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArtifact::Msl(source) => write!(f, "Msl({} bytes)", source.len()),
            KernelArtifact::Wgsl(source) => write!(f, "Wgsl({} bytes)", source.len()),
            KernelArtifact::Host(_) => f.write_str("Host(..)"),
        }
    }
}

/// An immutable kernel ready for [`ComputeDispatcher::build_pipeline`].
///
/// [`ComputeDispatcher::build_pipeline`]: crate::dispatcher::ComputeDispatcher::build_pipeline
#[derive(Debug, Clone)]
pub struct CompiledKernel {
    label: Arc<str>,
    entry_point: Arc<str>,
    layout: KernelLayout,
    fixed_group_size: Option<Extent3>,
    artifact: KernelArtifact,
}

impl CompiledKernel {
    /// An MSL kernel. `entry_point` must match the `kernel` function name.
    pub fn msl(entry_point: &str, source: &str, layout: KernelLayout) -> Self {
        CompiledKernel {
            label: entry_point.into(),
            entry_point: entry_point.into(),
            layout,
            fixed_group_size: None,
            artifact: KernelArtifact::Msl(source.into()),
        }
    }

    /// A WGSL kernel whose `@workgroup_size` is `group_size`.
    pub fn wgsl(
        entry_point: &str,
        source: &str,
        layout: KernelLayout,
        group_size: impl Into<Extent3>,
    ) -> Self {
        CompiledKernel {
            label: entry_point.into(),
            entry_point: entry_point.into(),
            layout,
            fixed_group_size: Some(group_size.into()),
            artifact: KernelArtifact::Wgsl(source.into()),
        }
    }

    /// A native kernel for the software device.
    pub fn host<F>(label: &str, layout: KernelLayout, body: F) -> Self
    where
        F: Fn(&mut KernelInvocation<'_>) -> Result<(), String> + Send + Sync + 'static,
    {
        CompiledKernel {
            label: label.into(),
            entry_point: label.into(),
            layout,
            fixed_group_size: None,
            artifact: KernelArtifact::Host(Arc::new(body)),
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.into();
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn layout(&self) -> &KernelLayout {
        &self.layout
    }

    pub fn fixed_group_size(&self) -> Option<Extent3> {
        self.fixed_group_size
    }

    pub fn artifact(&self) -> &KernelArtifact {
        &self.artifact
    }
}
