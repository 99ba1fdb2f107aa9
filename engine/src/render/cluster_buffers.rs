//! Cluster Buffer Structures
//!
//! GPU layout of the per-cluster light lists and the uniform block shared by
//! the Z-bin, cluster and shading stages.
//!
//! ## Cluster set layout
//!
//! ```text
//! offset 0:  num_clusters (u32)   written once at startup
//! offset 4:  capacity     (u32)   N, lights per cluster
//! offset 8:  stride       (u32)   N + 1 words per cluster
//! offset 12: dropped      (u32)   light/cluster pairs dropped this frame
//! offset 16: data[num_clusters * stride] (u32)
//!            data[c * stride]         = count of cluster c (<= N)
//!            data[c * stride + 1 + k] = k-th light index of cluster c
//! ```
//!
//! Cluster `(x, y, z)` has linear index `x + y * X + z * X * Y`.
//! The buffer is sized once and never resized. Each frame the `dropped`
//! counter is cleared and every count is rewritten by `cs_assign_lights`.

use wgpu::util::DeviceExt;

use super::cluster_config::ClusteringConfig;
use super::compute_pipelines::ClusteringPipelines;

/// Byte size of [`ClusterSetHeader`].
pub const CLUSTER_SET_HEADER_SIZE: u64 = 16;

/// Byte offset of the `dropped` counter inside the cluster set.
pub const DROPPED_COUNTER_OFFSET: u64 = 12;

// ============================================================================
// ClusterParams - uniform shared by Z-bin, cluster and shading shaders
// ============================================================================

/// Cluster stage parameters.
///
/// WGSL Layout (48 bytes, 3 rows of 16 bytes):
///   Row 0: clusters_x, clusters_y, clusters_z, capacity
///   Row 1: num_zbins, stride, depth_warp, use_zbins
///   Row 2: num_lights, light_radius (f32), _pad0, _pad1
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ClusterParams {
    pub clusters_x: u32,
    pub clusters_y: u32,
    pub clusters_z: u32,
    pub capacity: u32,
    pub num_zbins: u32,
    pub stride: u32,
    /// 0 = linear, 1 = logarithmic
    pub depth_warp: u32,
    /// 0 = scan all lights (brute force), 1 = restrict by Z-bins
    pub use_zbins: u32,
    pub num_lights: u32,
    pub light_radius: f32,
    pub _pad0: u32,
    pub _pad1: u32,
}

const _: () = {
    assert!(
        std::mem::size_of::<ClusterParams>() == 48,
        "ClusterParams must be exactly 48 bytes to match WGSL"
    );
};

impl ClusterParams {
    pub fn new(config: &ClusteringConfig, num_lights: u32) -> Self {
        Self {
            clusters_x: config.clusters_x,
            clusters_y: config.clusters_y,
            clusters_z: config.clusters_z,
            capacity: config.max_lights_per_cluster,
            num_zbins: config.num_zbins,
            stride: config.max_lights_per_cluster + 1,
            depth_warp: config.depth_warp.as_gpu(),
            use_zbins: u32::from(config.mode.uses_zbins()),
            num_lights,
            light_radius: config.light_radius,
            _pad0: 0,
            _pad1: 0,
        }
    }
}

// ============================================================================
// ClusterSetHeader
// ============================================================================

/// Header at the start of the cluster set buffer.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ClusterSetHeader {
    pub num_clusters: u32,
    pub capacity: u32,
    pub stride: u32,
    pub dropped: u32,
}

static_assertions::assert_eq_size!(ClusterSetHeader, [u8; CLUSTER_SET_HEADER_SIZE as usize]);

impl ClusterSetHeader {
    pub fn new(num_clusters: u32, capacity: u32) -> Self {
        Self {
            num_clusters,
            capacity,
            stride: capacity + 1,
            dropped: 0,
        }
    }
}

// ============================================================================
// ClusterGrid - host-side mirror of the cluster set
// ============================================================================

/// Host-side cluster lists, laid out like the GPU buffer.
///
/// Built by the CPU reference path or decoded from a GPU readback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterGrid {
    pub dims: [u32; 3],
    pub capacity: u32,
    counts: Vec<u32>,
    indices: Vec<u32>,
    /// Intersecting light/cluster pairs that did not fit.
    pub dropped: u32,
}

impl ClusterGrid {
    pub fn new(dims: [u32; 3], capacity: u32) -> Self {
        let total = (dims[0] * dims[1] * dims[2]) as usize;
        Self {
            dims,
            capacity,
            counts: vec![0; total],
            indices: vec![0; total * capacity as usize],
            dropped: 0,
        }
    }

    pub fn num_clusters(&self) -> u32 {
        self.counts.len() as u32
    }

    /// Linear index of cell `(x, y, z)`.
    #[inline]
    pub fn index(&self, x: u32, y: u32, z: u32) -> u32 {
        x + y * self.dims[0] + z * self.dims[0] * self.dims[1]
    }

    /// Cell coordinates of linear index `cluster`.
    pub fn coords(&self, cluster: u32) -> [u32; 3] {
        let plane = self.dims[0] * self.dims[1];
        [
            cluster % self.dims[0],
            (cluster % plane) / self.dims[0],
            cluster / plane,
        ]
    }

    /// Append `light` to `cluster`. Returns false (and counts a drop) when full.
    pub fn push(&mut self, cluster: u32, light: u32) -> bool {
        let c = cluster as usize;
        let count = self.counts[c];
        if count >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.indices[c * self.capacity as usize + count as usize] = light;
        self.counts[c] = count + 1;
        true
    }

    pub fn count(&self, cluster: u32) -> u32 {
        self.counts[cluster as usize]
    }

    /// Light indices stored for `cluster`, in insertion order.
    pub fn lights(&self, cluster: u32) -> &[u32] {
        let c = cluster as usize;
        let start = c * self.capacity as usize;
        &self.indices[start..start + self.counts[c] as usize]
    }

    pub fn clear(&mut self) {
        self.counts.fill(0);
        self.dropped = 0;
    }

    /// Sum of all counts.
    pub fn total_assignments(&self) -> u64 {
        self.counts.iter().map(|&c| u64::from(c)).sum()
    }

    pub fn max_count(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    pub fn occupied_clusters(&self) -> u32 {
        self.counts.iter().filter(|&&c| c > 0).count() as u32
    }

    /// Decode a cluster set read back from the GPU (header + data words).
    ///
    /// Returns `None` if the words are too short for the header's declared size.
    pub fn from_gpu_words(dims: [u32; 3], words: &[u32]) -> Option<Self> {
        let header_words = (CLUSTER_SET_HEADER_SIZE / 4) as usize;
        let header: ClusterSetHeader = bytemuck::pod_read_unaligned(bytemuck::cast_slice(words.get(..header_words)?));
        let mut grid = Self::new(dims, header.capacity);
        if header.num_clusters != grid.num_clusters() || header.stride != header.capacity + 1 {
            return None;
        }
        let stride = header.stride as usize;
        let data = &words[header_words..];
        if data.len() < grid.num_clusters() as usize * stride {
            return None;
        }
        for cluster in 0..grid.num_clusters() as usize {
            let cell = &data[cluster * stride..(cluster + 1) * stride];
            let count = cell[0].min(header.capacity);
            grid.counts[cluster] = count;
            let base = cluster * header.capacity as usize;
            grid.indices[base..base + count as usize].copy_from_slice(&cell[1..1 + count as usize]);
        }
        grid.dropped = header.dropped;
        Some(grid)
    }

    /// Encode into the GPU word layout (header + data).
    pub fn to_gpu_words(&self) -> Vec<u32> {
        let header = ClusterSetHeader {
            dropped: self.dropped,
            ..ClusterSetHeader::new(self.num_clusters(), self.capacity)
        };
        let stride = (self.capacity + 1) as usize;
        let mut words = Vec::with_capacity(4 + self.counts.len() * stride);
        words.extend_from_slice(&bytemuck::cast::<ClusterSetHeader, [u32; 4]>(header));
        for cluster in 0..self.num_clusters() {
            let lights = self.lights(cluster);
            words.push(lights.len() as u32);
            words.extend_from_slice(lights);
            words.resize(words.len() + stride - 1 - lights.len(), 0);
        }
        words
    }
}

// ============================================================================
// ClusterBuffers - GPU cluster set and the assignment dispatch
// ============================================================================

/// GPU cluster set buffer plus the `cs_assign_lights` bind group.
pub struct ClusterBuffers {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    dims: [u32; 3],
    capacity: u32,
    workgroup: [u32; 3],
}

impl ClusterBuffers {
    pub fn new(
        device: &wgpu::Device,
        pipelines: &ClusteringPipelines,
        config: &ClusteringConfig,
        light_buffer: &wgpu::Buffer,
        zbin_buffer: &wgpu::Buffer,
        camera_buffer: &wgpu::Buffer,
        params_buffer: &wgpu::Buffer,
    ) -> Self {
        let dims = [config.clusters_x, config.clusters_y, config.clusters_z];
        let capacity = config.max_lights_per_cluster;
        let grid = ClusterGrid::new(dims, capacity);

        // Header carries num_clusters/capacity/stride from the start
        let buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("cluster_set_buffer"),
            contents: bytemuck::cast_slice(&grid.to_gpu_words()),
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });

        // binding 0: lights (read), 1: zbins (read), 2: cluster set (read_write),
        // 3: camera, 4: cluster params
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cluster_assign_bind_group"),
            layout: &pipelines.cluster_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: light_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: zbin_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: params_buffer.as_entire_binding(),
                },
            ],
        });

        log::info!(
            "cluster set: {}x{}x{} clusters, capacity {}, {} bytes",
            dims[0],
            dims[1],
            dims[2],
            capacity,
            buffer.size()
        );

        Self {
            buffer,
            bind_group,
            dims,
            capacity,
            workgroup: config.workgroups.cluster,
        }
    }

    /// Reset the frame's drop counter and record the assignment dispatch.
    ///
    /// Every cell's count is rewritten, so no full clear is needed.
    pub fn record(&self, encoder: &mut wgpu::CommandEncoder, pipelines: &ClusteringPipelines) {
        encoder.clear_buffer(&self.buffer, DROPPED_COUNTER_OFFSET, Some(4));

        let [wx, wy, wz] = self.workgroup;
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("cluster_assign_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipelines.cluster_assign_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[]);
        pass.dispatch_workgroups(
            self.dims[0].div_ceil(wx),
            self.dims[1].div_ceil(wy),
            self.dims[2].div_ceil(wz),
        );
    }

    pub fn buffer(&self) -> &wgpu::Buffer {
        &self.buffer
    }

    pub fn dims(&self) -> [u32; 3] {
        self.dims
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }
}

// ============================================================================
// ClusterBindings - read-only bind group for shading passes
// ============================================================================

/// Bind group layout entries shading passes declare at their cluster group.
///
/// binding 0: camera (uniform), 1: light set (storage, read),
/// 2: cluster set (storage, read), 3: cluster params (uniform)
pub fn cluster_binding_layout_entries() -> [wgpu::BindGroupLayoutEntry; 4] {
    let visibility = wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::FRAGMENT;
    let uniform = wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Uniform,
        has_dynamic_offset: false,
        min_binding_size: None,
    };
    let storage_read = wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Storage { read_only: true },
        has_dynamic_offset: false,
        min_binding_size: None,
    };
    [
        wgpu::BindGroupLayoutEntry { binding: 0, visibility, ty: uniform, count: None },
        wgpu::BindGroupLayoutEntry { binding: 1, visibility, ty: storage_read, count: None },
        wgpu::BindGroupLayoutEntry { binding: 2, visibility, ty: storage_read, count: None },
        wgpu::BindGroupLayoutEntry { binding: 3, visibility, ty: uniform, count: None },
    ]
}

/// Read-only view of the clustering outputs for shading passes.
pub struct ClusterBindings {
    pub layout: wgpu::BindGroupLayout,
    pub bind_group: wgpu::BindGroup,
}

impl ClusterBindings {
    pub fn new(
        device: &wgpu::Device,
        camera_buffer: &wgpu::Buffer,
        light_buffer: &wgpu::Buffer,
        cluster_buffer: &wgpu::Buffer,
        params_buffer: &wgpu::Buffer,
    ) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cluster_shading_bind_group_layout"),
            entries: &cluster_binding_layout_entries(),
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("cluster_shading_bind_group"),
            layout: &layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: light_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: cluster_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: params_buffer.as_entire_binding() },
            ],
        });
        Self { layout, bind_group }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::cluster_config::{ClusteringMode, DepthWarp};

    #[test]
    fn test_cluster_params_from_config() {
        let mut config = ClusteringConfig::default();
        config.mode = ClusteringMode::BruteForce;
        config.depth_warp = DepthWarp::Linear;
        let params = ClusterParams::new(&config, 321);
        assert_eq!(params.clusters_x, 16);
        assert_eq!(params.stride, config.max_lights_per_cluster + 1);
        assert_eq!(params.use_zbins, 0);
        assert_eq!(params.depth_warp, 0);
        assert_eq!(params.num_lights, 321);
    }

    #[test]
    fn test_index_and_coords() {
        let grid = ClusterGrid::new([16, 9, 24], 4);
        assert_eq!(grid.index(0, 0, 0), 0);
        assert_eq!(grid.index(15, 0, 0), 15);
        assert_eq!(grid.index(0, 1, 0), 16);
        assert_eq!(grid.index(0, 0, 1), 144);
        assert_eq!(grid.index(15, 8, 23), 16 * 9 * 24 - 1);
        for cluster in [0, 17, 145, 3455] {
            let [x, y, z] = grid.coords(cluster);
            assert_eq!(grid.index(x, y, z), cluster);
        }
    }

    #[test]
    fn test_push_until_full() {
        let mut grid = ClusterGrid::new([1, 1, 1], 2);
        assert!(grid.push(0, 7));
        assert!(grid.push(0, 9));
        assert!(!grid.push(0, 11));
        assert_eq!(grid.lights(0), &[7, 9]);
        assert_eq!(grid.count(0), 2);
        assert_eq!(grid.dropped, 1);

        grid.clear();
        assert_eq!(grid.count(0), 0);
        assert_eq!(grid.dropped, 0);
    }

    #[test]
    fn test_gpu_words_layout() {
        let mut grid = ClusterGrid::new([2, 1, 1], 3);
        grid.push(1, 4);
        grid.push(1, 5);
        let words = grid.to_gpu_words();
        // header + 2 clusters * stride 4
        assert_eq!(words.len(), 4 + 2 * 4);
        assert_eq!(&words[..4], &[2, 3, 4, 0]);
        assert_eq!(&words[4..8], &[0, 0, 0, 0]);
        assert_eq!(&words[8..12], &[2, 4, 5, 0]);

        let decoded = ClusterGrid::from_gpu_words([2, 1, 1], &words).unwrap();
        assert_eq!(decoded, grid);
    }

    #[test]
    fn test_from_gpu_words_rejects_short_input() {
        let words = ClusterGrid::new([2, 2, 2], 4).to_gpu_words();
        assert!(ClusterGrid::from_gpu_words([2, 2, 2], &words[..words.len() - 1]).is_none());
        assert!(ClusterGrid::from_gpu_words([4, 2, 2], &words).is_none());
        assert!(ClusterGrid::from_gpu_words([2, 2, 2], &words[..2]).is_none());
    }

    #[test]
    fn test_header_layout() {
        let header = ClusterSetHeader::new(3456, 64);
        assert_eq!(header.stride, 65);
        assert_eq!(std::mem::size_of::<ClusterSetHeader>(), 16);
        assert_eq!(DROPPED_COUNTER_OFFSET, std::mem::offset_of!(ClusterSetHeader, dropped) as u64);
    }

    #[test]
    fn test_stats() {
        let mut grid = ClusterGrid::new([2, 2, 1], 8);
        grid.push(0, 1);
        grid.push(0, 2);
        grid.push(3, 1);
        assert_eq!(grid.total_assignments(), 3);
        assert_eq!(grid.max_count(), 2);
        assert_eq!(grid.occupied_clusters(), 2);
    }
}
