//! Light Sorter
//!
//! Bitonic sort of the light records by ascending view depth.
//!
//! For `n` active lights the network runs over `P = next_pow2(max(n, 1))`
//! slots. Step `s` (block size `k = 2^s`) has `s` stages with compare distance
//! `j = k/2, k/4, ..., 1`; a pair `(i, i + j)` is ordered ascending when
//! `i & k == 0`. That is `log2(P) * (log2(P) + 1) / 2` dispatches, each with
//! `P / 2` invocations. Slots `n..P` carry [`PADDING_SORT_KEY`] and end up
//! behind every real light.
//!
//! Each pass reads its `k`/`j` from a slot of one uniform buffer selected by a
//! dynamic offset, so the whole network is recorded into one compute pass.

use std::num::NonZeroU64;

use wgpu::util::DeviceExt;

use super::cluster_config::next_pow2;
use super::compute_pipelines::ClusteringPipelines;

/// Sort key given to padding slots. Larger than any reachable view depth.
pub const PADDING_SORT_KEY: f32 = 3.4e38;

/// One compare-exchange pass of the bitonic network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitonicPass {
    /// Bitonic block size `k` (sort direction alternates between blocks).
    pub block_size: u32,
    /// Distance `j` between compared elements.
    pub compare_distance: u32,
}

/// All passes for a padded domain of `padded_count` (a power of two) elements.
pub fn bitonic_schedule(padded_count: u32) -> Vec<BitonicPass> {
    debug_assert!(padded_count.is_power_of_two());
    let mut passes = Vec::new();
    let mut k = 2;
    while k <= padded_count {
        let mut j = k / 2;
        while j > 0 {
            passes.push(BitonicPass {
                block_size: k,
                compare_distance: j,
            });
            j /= 2;
        }
        k *= 2;
    }
    passes
}

/// Number of passes for `P` elements: `log2(P) * (log2(P) + 1) / 2`.
pub fn bitonic_pass_count(padded_count: u32) -> u32 {
    let log = padded_count.max(1).trailing_zeros();
    log * (log + 1) / 2
}

/// Indices `(i, l)` compared by invocation `pair` of a pass, with its direction.
#[inline]
pub fn bitonic_pair(pair: u32, pass: BitonicPass) -> (u32, u32, bool) {
    let j = pass.compare_distance;
    let i = (pair / j) * 2 * j + (pair % j);
    (i, i + j, (i & pass.block_size) == 0)
}

/// Uniform block for `light_sort.wgsl`.
///
/// WGSL Layout (16 bytes): num_lights, padded_count, block_size, compare_distance
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SortParams {
    pub num_lights: u32,
    pub padded_count: u32,
    pub block_size: u32,
    pub compare_distance: u32,
}

static_assertions::assert_eq_size!(SortParams, [u8; 16]);

/// Pack one `SortParams` per slot at `alignment`-byte intervals.
///
/// Slot 0 drives the key pass, slot `1 + p` drives network pass `p`.
pub fn pack_sort_params(num_lights: u32, alignment: u64) -> Vec<u8> {
    let padded_count = next_pow2(num_lights);
    let schedule = bitonic_schedule(padded_count);
    let stride = alignment as usize;
    let mut bytes = vec![0u8; stride * (schedule.len() + 1)];

    let key_params = SortParams {
        num_lights,
        padded_count,
        ..Default::default()
    };
    bytes[..16].copy_from_slice(bytemuck::bytes_of(&key_params));

    for (index, pass) in schedule.iter().enumerate() {
        let params = SortParams {
            num_lights,
            padded_count,
            block_size: pass.block_size,
            compare_distance: pass.compare_distance,
        };
        let offset = (index + 1) * stride;
        bytes[offset..offset + 16].copy_from_slice(bytemuck::bytes_of(&params));
    }
    bytes
}

/// GPU bitonic sorter over the light store's records.
pub struct LightSorter {
    keys_buffer: wgpu::Buffer,
    params_buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    alignment: u64,
    workgroup_size: u32,
    /// Active count the params buffer currently describes.
    prepared_for: Option<u32>,
}

impl LightSorter {
    pub fn new(
        device: &wgpu::Device,
        pipelines: &ClusteringPipelines,
        light_buffer: &wgpu::Buffer,
        camera_buffer: &wgpu::Buffer,
        light_capacity: u32,
        workgroup_size: u32,
    ) -> Self {
        let keys = vec![PADDING_SORT_KEY; light_capacity as usize];
        let keys_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("light_sort_keys"),
            contents: bytemuck::cast_slice(&keys),
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment).max(16);
        let slots = u64::from(bitonic_pass_count(light_capacity)) + 1;
        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("light_sort_params"),
            size: slots * alignment,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("light_sort_bind_group"),
            layout: &pipelines.sort_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: light_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: keys_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: camera_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &params_buffer,
                        offset: 0,
                        size: NonZeroU64::new(std::mem::size_of::<SortParams>() as u64),
                    }),
                },
            ],
        });

        log::debug!(
            "light sorter: {} key slots, {} param slots of {} bytes",
            light_capacity,
            slots,
            alignment
        );

        Self {
            keys_buffer,
            params_buffer,
            bind_group,
            alignment,
            workgroup_size,
            prepared_for: None,
        }
    }

    /// Upload the pass parameters for `num_lights` if they changed.
    pub fn prepare(&mut self, queue: &wgpu::Queue, num_lights: u32) {
        if self.prepared_for == Some(num_lights) {
            return;
        }
        let bytes = pack_sort_params(num_lights, self.alignment);
        queue.write_buffer(&self.params_buffer, 0, &bytes);
        self.prepared_for = Some(num_lights);
    }

    /// Record the key pass and the full network for `num_lights`.
    ///
    /// [`prepare`](Self::prepare) must have been called with the same count.
    pub fn record(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipelines: &ClusteringPipelines,
        num_lights: u32,
    ) {
        debug_assert_eq!(self.prepared_for, Some(num_lights));
        let padded_count = next_pow2(num_lights);
        let pass_count = bitonic_pass_count(padded_count);

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("light_sort_pass"),
            timestamp_writes: None,
        });

        pass.set_pipeline(&pipelines.sort_keys_pipeline);
        pass.set_bind_group(0, &self.bind_group, &[0]);
        pass.dispatch_workgroups(padded_count.div_ceil(self.workgroup_size), 1, 1);

        if pass_count == 0 {
            return;
        }

        pass.set_pipeline(&pipelines.bitonic_step_pipeline);
        let pair_groups = (padded_count / 2).div_ceil(self.workgroup_size);
        for index in 0..pass_count {
            let offset = (u64::from(index) + 1) * self.alignment;
            pass.set_bind_group(0, &self.bind_group, &[offset as u32]);
            pass.dispatch_workgroups(pair_groups, 1, 1);
        }
    }

    pub fn keys_buffer(&self) -> &wgpu::Buffer {
        &self.keys_buffer
    }
}
