//! Dispatch grid sizing.
//!
//! A dispatch is described by the problem's element count along each axis
//! (`grid_size`) and the number of threads per thread-group along each axis.
//! The group count per axis is the ceiling division of the two, so the last
//! group along an axis may run threads past the end of the data; kernels
//! bounds-check those themselves.

use crate::device::DeviceLimits;
use crate::error::{DispatchError, Result};

/// A three-dimensional size (elements, threads or thread-groups).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent3 {
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl Extent3 {
    pub const fn new(width: usize, height: usize, depth: usize) -> Self {
        Extent3 {
            width,
            height,
            depth,
        }
    }

    /// A one-dimensional extent of `n` along the x axis.
    pub const fn linear(n: usize) -> Self {
        Extent3::new(n, 1, 1)
    }

    /// Product of the three axes, saturating on overflow.
    pub fn volume(self) -> usize {
        self.width
            .saturating_mul(self.height)
            .saturating_mul(self.depth)
    }

    pub fn has_zero(self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }

    pub fn to_array(self) -> [usize; 3] {
        [self.width, self.height, self.depth]
    }
}

impl From<usize> for Extent3 {
    fn from(n: usize) -> Self {
        Extent3::linear(n)
    }
}

impl From<(usize, usize, usize)> for Extent3 {
    fn from((width, height, depth): (usize, usize, usize)) -> Self {
        Extent3::new(width, height, depth)
    }
}

impl From<[usize; 3]> for Extent3 {
    fn from([width, height, depth]: [usize; 3]) -> Self {
        Extent3::new(width, height, depth)
    }
}

/// Number of thread-groups needed along each axis to cover `elements`.
pub fn group_count(elements: Extent3, group_size: Extent3) -> Extent3 {
    Extent3::new(
        elements.width.div_ceil(group_size.width),
        elements.height.div_ceil(group_size.height),
        elements.depth.div_ceil(group_size.depth),
    )
}

/// Validated thread-group layout of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    /// Element count the dispatch must cover.
    pub elements: Extent3,
    /// Thread-groups along each axis.
    pub groups: Extent3,
    /// Threads per thread-group along each axis.
    pub group_size: Extent3,
}

impl DispatchGrid {
    /// Size a dispatch and check it against the device limits.
    ///
    /// `max_threads_per_group` is the effective limit for the pipeline being
    /// dispatched, which may be lower than the device-wide limit.
    /// `fixed_group_size` is set for kernels whose group size is compiled in.
    pub fn plan(
        elements: Extent3,
        group_size: Extent3,
        limits: &DeviceLimits,
        max_threads_per_group: usize,
        fixed_group_size: Option<Extent3>,
    ) -> Result<Self> {
        if elements.has_zero() {
            return Err(invalid(format!(
                "grid size {:?} has an empty dimension",
                elements.to_array()
            )));
        }
        if group_size.has_zero() {
            return Err(invalid(format!(
                "thread-group size {:?} has an empty dimension",
                group_size.to_array()
            )));
        }

        let threads = group_size.volume();
        if threads > max_threads_per_group {
            return Err(invalid(format!(
                "thread-group size {:?} is {} threads, device maximum is {}",
                group_size.to_array(),
                threads,
                max_threads_per_group
            )));
        }

        let axes = ["x", "y", "z"];
        let requested = group_size.to_array();
        let extent_limit = limits.max_group_extent.to_array();
        for axis in 0..3 {
            if requested[axis] > extent_limit[axis] {
                return Err(invalid(format!(
                    "thread-group size along {} is {}, device maximum is {}",
                    axes[axis], requested[axis], extent_limit[axis]
                )));
            }
        }

        if let Some(fixed) = fixed_group_size {
            if fixed != group_size {
                return Err(invalid(format!(
                    "kernel is compiled for thread-group size {:?}, dispatch requested {:?}",
                    fixed.to_array(),
                    group_size.to_array()
                )));
            }
        }

        let groups = group_count(elements, group_size);
        for (axis, count) in groups.to_array().into_iter().enumerate() {
            if count > limits.max_groups_per_dimension {
                return Err(invalid(format!(
                    "{} thread-groups along {}, device maximum is {}",
                    count, axes[axis], limits.max_groups_per_dimension
                )));
            }
        }

        Ok(DispatchGrid {
            elements,
            groups,
            group_size,
        })
    }

    /// Total threads launched, including tail threads past the element count.
    pub fn total_threads(&self) -> usize {
        self.groups.volume().saturating_mul(self.group_size.volume())
    }
}

fn invalid(message: String) -> DispatchError {
    DispatchError::InvalidDispatchConfiguration(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> DeviceLimits {
        DeviceLimits {
            max_threads_per_group: 256,
            max_group_extent: Extent3::new(256, 256, 64),
            max_groups_per_dimension: 1000,
            max_buffer_length: 1 << 20,
        }
    }

    #[test]
    fn test_group_count_exact() {
        let groups = group_count(Extent3::linear(1024), Extent3::linear(256));
        assert_eq!(groups, Extent3::linear(4));
    }

    #[test]
    fn test_group_count_rounds_up_tail() {
        let groups = group_count(Extent3::new(10, 5, 1), Extent3::new(4, 2, 1));
        assert_eq!(groups, Extent3::new(3, 3, 1));
    }

    #[test]
    fn test_plan_covers_every_element() {
        let grid = DispatchGrid::plan(Extent3::linear(1000), Extent3::linear(64), &limits(), 256, None)
            .unwrap();
        assert_eq!(grid.groups.width, 16);
        assert!(grid.total_threads() >= 1000);
        assert!(grid.total_threads() - 1000 < 64);
    }

    #[test]
    fn test_plan_rejects_oversized_group() {
        let err = DispatchGrid::plan(Extent3::linear(4096), Extent3::linear(512), &limits(), 256, None)
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidDispatchConfiguration(_)));
    }

    #[test]
    fn test_plan_respects_pipeline_limit() {
        let err = DispatchGrid::plan(Extent3::linear(4096), Extent3::linear(128), &limits(), 64, None)
            .unwrap_err();
        assert!(err.to_string().contains("device maximum is 64"));
    }

    #[test]
    fn test_plan_rejects_axis_extent() {
        // 2 * 128 = 256 threads is within the total, but z is capped at 64.
        let err = DispatchGrid::plan(
            Extent3::new(8, 8, 512),
            Extent3::new(1, 2, 128),
            &limits(),
            256,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("along z"));
    }

    #[test]
    fn test_plan_rejects_empty_dimensions() {
        assert!(DispatchGrid::plan(Extent3::linear(0), Extent3::linear(4), &limits(), 256, None).is_err());
        assert!(DispatchGrid::plan(Extent3::linear(4), Extent3::new(4, 0, 1), &limits(), 256, None).is_err());
    }

    #[test]
    fn test_plan_rejects_too_many_groups() {
        let err = DispatchGrid::plan(Extent3::linear(5000), Extent3::linear(1), &limits(), 256, None)
            .unwrap_err();
        assert!(err.to_string().contains("5000 thread-groups"));
    }

    #[test]
    fn test_plan_enforces_fixed_group_size() {
        let fixed = Some(Extent3::linear(64));
        assert!(DispatchGrid::plan(Extent3::linear(100), Extent3::linear(64), &limits(), 256, fixed).is_ok());
        assert!(DispatchGrid::plan(Extent3::linear(100), Extent3::linear(32), &limits(), 256, fixed).is_err());
    }
}
