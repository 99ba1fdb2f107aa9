//! GPU buffer readback.
//!
//! Blocking copies of storage buffers back to the host, used by the
//! integration tests and the benchmark binary to inspect clustering output.
//! Never called on the per-frame path.

use std::sync::mpsc;

use super::cluster_buffers::ClusterGrid;
use super::light_store::{GpuLight, LIGHT_SET_HEADER_SIZE};
use crate::error::ReadbackError;

/// Copy `size` bytes from `source` (which needs `COPY_SRC`) and wait for them.
///
/// Submits its own command buffer, so any work recorded earlier on the same
/// queue is complete before the copy runs.
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>, ReadbackError> {
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(source, offset, &staging, 0, Some(size));
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::PollType::wait_indefinitely())?;

    receiver
        .recv()
        .map_err(|_| ReadbackError::CallbackDropped)??;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(bytes)
}

/// Read a whole buffer as a vector of `T`.
pub fn read_pod_vec<T: bytemuck::Pod>(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    source: &wgpu::Buffer,
) -> Result<Vec<T>, ReadbackError> {
    let bytes = read_buffer(device, queue, source, 0, source.size())?;
    let elem = std::mem::size_of::<T>();
    if bytes.len() % elem != 0 {
        return Err(ReadbackError::Misaligned { len: bytes.len(), elem });
    }
    Ok(bytes
        .chunks_exact(elem)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Read the first `count` light records, skipping the light set header.
pub fn read_light_records(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    light_buffer: &wgpu::Buffer,
    count: u32,
) -> Result<Vec<GpuLight>, ReadbackError> {
    let record = std::mem::size_of::<GpuLight>() as u64;
    if count == 0 {
        return Ok(Vec::new());
    }
    let bytes = read_buffer(
        device,
        queue,
        light_buffer,
        LIGHT_SET_HEADER_SIZE,
        u64::from(count) * record,
    )?;
    Ok(bytes
        .chunks_exact(record as usize)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

/// Read and decode the cluster set buffer.
pub fn read_cluster_grid(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    cluster_buffer: &wgpu::Buffer,
    dims: [u32; 3],
) -> Result<ClusterGrid, ReadbackError> {
    let words: Vec<u32> = read_pod_vec(device, queue, cluster_buffer)?;
    ClusterGrid::from_gpu_words(dims, &words).ok_or(ReadbackError::Malformed("cluster set"))
}
