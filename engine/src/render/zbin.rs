//! Depth Binner (Z-bins)
//!
//! A 1D table of `num_zbins` bins over `[near, far]`, each holding the
//! inclusive range of sorted light indices that may touch the bin's depth
//! interval. Rebuilt every frame: `cs_clear_zbins` writes the empty sentinel,
//! `cs_build_zbins` binary-searches the sorted keys for each bin.
//!
//! Soundness: every light whose depth lies in bin `i` has its sorted index in
//! `[min_light, max_light]` of bin `i`. Extra lights are allowed.

use super::compute_pipelines::ClusteringPipelines;

/// Sentinel `min_light` for a bin with no lights.
pub const ZBIN_EMPTY_MIN: u32 = u32::MAX;

/// One Z-bin entry.
///
/// WGSL Layout (8 bytes): min_light (u32), max_light (u32).
/// Empty when `min_light > max_light`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ZBin {
    pub min_light: u32,
    pub max_light: u32,
}

const _: () = assert!(std::mem::size_of::<ZBin>() == 8);

impl Default for ZBin {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl ZBin {
    pub const EMPTY: ZBin = ZBin {
        min_light: ZBIN_EMPTY_MIN,
        max_light: 0,
    };

    pub fn new(min_light: u32, max_light: u32) -> Self {
        Self { min_light, max_light }
    }

    pub fn is_empty(&self) -> bool {
        self.min_light > self.max_light
    }

    /// Whether sorted index `index` lies inside the bin's range.
    pub fn contains(&self, index: u32) -> bool {
        !self.is_empty() && self.min_light <= index && index <= self.max_light
    }

    /// Smallest range covering both bins; empty stays neutral.
    pub fn union(self, other: ZBin) -> ZBin {
        match (self.is_empty(), other.is_empty()) {
            (true, _) => other,
            (_, true) => self,
            _ => ZBin::new(
                self.min_light.min(other.min_light),
                self.max_light.max(other.max_light),
            ),
        }
    }
}

/// GPU Z-bin table and its dispatches.
pub struct DepthBinner {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    num_zbins: u32,
    workgroup_size: u32,
}

impl DepthBinner {
    pub fn new(
        device: &wgpu::Device,
        pipelines: &ClusteringPipelines,
        keys_buffer: &wgpu::Buffer,
        camera_buffer: &wgpu::Buffer,
        params_buffer: &wgpu::Buffer,
        num_zbins: u32,
        workgroup_size: u32,
    ) -> Self {
        let buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("zbin_buffer"),
            size: u64::from(num_zbins) * std::mem::size_of::<ZBin>() as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        // binding 0: sorted keys (read), 1: zbins (read_write), 2: camera, 3: cluster params
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("zbin_bind_group"),
            layout: &pipelines.zbin_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: keys_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        Self {
            buffer,
            bind_group,
            num_zbins,
            workgroup_size,
        }
    }

    /// Record the clear pass followed by the build pass.
    ///
    /// Must run after the light sort and before cluster assignment.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, pipelines: &ClusteringPipelines) {
        let groups = self.num_zbins.div_ceil(self.workgroup_size);

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("zbin_pass"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &self.bind_group, &[]);

        pass.set_pipeline(&pipelines.zbin_clear_pipeline);
        pass.dispatch_workgroups(groups, 1, 1);

        pass.set_pipeline(&pipelines.zbin_build_pipeline);
        pass.dispatch_workgroups(groups, 1, 1);
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sentinel() {
        assert!(ZBin::EMPTY.is_empty());
        assert!(ZBin::default().is_empty());
        assert!(!ZBin::EMPTY.contains(0));
        assert_eq!(bytemuck::bytes_of(&ZBin::EMPTY), &[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]);
    }

    #[test]
    fn test_single_light_bin() {
        let bin = ZBin::new(0, 0);
        assert!(!bin.is_empty());
        assert!(bin.contains(0));
        assert!(!bin.contains(1));
    }

    #[test]
    fn test_union() {
        let a = ZBin::new(2, 5);
        let b = ZBin::new(4, 9);
        assert_eq!(a.union(b), ZBin::new(2, 9));
        assert_eq!(a.union(ZBin::EMPTY), a);
        assert_eq!(ZBin::EMPTY.union(b), b);
        assert!(ZBin::EMPTY.union(ZBin::EMPTY).is_empty());
    }
}
