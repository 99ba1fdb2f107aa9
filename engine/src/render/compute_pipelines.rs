//! Compute Pipeline Infrastructure Module
//!
//! Creates the compute pipelines of the clustering core:
//! - Move lights: per-frame light motion
//! - Sort keys / bitonic step: depth sort of the light set
//! - Z-bin clear / build: depth-range index over sorted lights
//! - Cluster assign: per-cluster light lists
//!
//! Workgroup sizes are WGSL `override` constants supplied here through
//! `PipelineCompilationOptions`, so the shader text is never rewritten.

use std::num::NonZeroU64;

use super::binding_validator;
use super::cluster_config::WorkgroupSizes;
use super::light_sort::SortParams;
use super::shader_loader::{ClusteringShaders, create_shader_module};

fn buffer_entry(
    binding: u32,
    ty: wgpu::BufferBindingType,
    has_dynamic_offset: bool,
    min_binding_size: Option<NonZeroU64>,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty,
            has_dynamic_offset,
            min_binding_size,
        },
        count: None,
    }
}

const UNIFORM: wgpu::BufferBindingType = wgpu::BufferBindingType::Uniform;
const STORAGE_READ: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: true };
const STORAGE_RW: wgpu::BufferBindingType = wgpu::BufferBindingType::Storage { read_only: false };

/// @group(0): 0 storage<read_write> LightSet, 1 uniform MotionParams
pub fn move_lights_layout_entries() -> [wgpu::BindGroupLayoutEntry; 2] {
    [
        buffer_entry(0, STORAGE_RW, false, None),
        buffer_entry(1, UNIFORM, false, None),
    ]
}

/// @group(0): 0 storage<read_write> LightSet, 1 storage<read_write> keys,
/// 2 uniform Camera, 3 uniform SortParams (dynamic offset)
pub fn sort_layout_entries() -> [wgpu::BindGroupLayoutEntry; 4] {
    [
        buffer_entry(0, STORAGE_RW, false, None),
        buffer_entry(1, STORAGE_RW, false, None),
        buffer_entry(2, UNIFORM, false, None),
        buffer_entry(
            3,
            UNIFORM,
            true,
            NonZeroU64::new(std::mem::size_of::<SortParams>() as u64),
        ),
    ]
}

/// @group(0): 0 storage<read> keys, 1 storage<read_write> zbins,
/// 2 uniform Camera, 3 uniform ClusterParams
pub fn zbin_layout_entries() -> [wgpu::BindGroupLayoutEntry; 4] {
    [
        buffer_entry(0, STORAGE_READ, false, None),
        buffer_entry(1, STORAGE_RW, false, None),
        buffer_entry(2, UNIFORM, false, None),
        buffer_entry(3, UNIFORM, false, None),
    ]
}

/// @group(0): 0 storage<read> LightSet, 1 storage<read> zbins,
/// 2 storage<read_write> ClusterSet, 3 uniform Camera, 4 uniform ClusterParams
pub fn cluster_layout_entries() -> [wgpu::BindGroupLayoutEntry; 5] {
    [
        buffer_entry(0, STORAGE_READ, false, None),
        buffer_entry(1, STORAGE_READ, false, None),
        buffer_entry(2, STORAGE_RW, false, None),
        buffer_entry(3, UNIFORM, false, None),
        buffer_entry(4, UNIFORM, false, None),
    ]
}

/// Create a compute pipeline with the given override constants.
pub(crate) fn create_compute_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
    constants: &[(&str, f64)],
) -> wgpu::ComputePipeline {
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: wgpu::PipelineCompilationOptions {
            constants,
            ..Default::default()
        },
        cache: None,
    })
}

/// Holds all clustering compute pipelines and their bind group layouts.
pub struct ClusteringPipelines {
    /// Light motion: one invocation per active light.
    pub move_lights_pipeline: wgpu::ComputePipeline,
    pub move_lights_bind_group_layout: wgpu::BindGroupLayout,

    /// Writes view-depth keys (padding slots get the sentinel key).
    pub sort_keys_pipeline: wgpu::ComputePipeline,
    /// One compare-exchange pass of the bitonic network.
    pub bitonic_step_pipeline: wgpu::ComputePipeline,
    pub sort_bind_group_layout: wgpu::BindGroupLayout,

    /// Resets every Z-bin to the empty sentinel.
    pub zbin_clear_pipeline: wgpu::ComputePipeline,
    /// Fills Z-bins by binary search over the sorted keys.
    pub zbin_build_pipeline: wgpu::ComputePipeline,
    pub zbin_bind_group_layout: wgpu::BindGroupLayout,

    /// Builds per-cluster light lists.
    pub cluster_assign_pipeline: wgpu::ComputePipeline,
    pub cluster_bind_group_layout: wgpu::BindGroupLayout,

    /// Number of layout mismatches found at creation.
    pub binding_mismatches: u32,
}

impl ClusteringPipelines {
    /// Compile every clustering stage with the configured workgroup sizes.
    pub fn new(device: &wgpu::Device, shaders: &ClusteringShaders, workgroups: &WorkgroupSizes) -> Self {
        let move_lights_module = create_shader_module(device, "move_lights", &shaders.move_lights);
        let light_sort_module = create_shader_module(device, "light_sort", &shaders.light_sort);
        let zbin_module = create_shader_module(device, "zbin", &shaders.zbin);
        let cluster_assign_module = create_shader_module(device, "cluster_assign", &shaders.cluster_assign);

        // --- Move Lights ---
        let move_lights_entries = move_lights_layout_entries();
        let move_lights_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("move_lights_bind_group_layout"),
            entries: &move_lights_entries,
        });
        let move_lights_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("move_lights_pipeline_layout"),
            bind_group_layouts: &[&move_lights_bind_group_layout],
            push_constant_ranges: &[],
        });
        let move_lights_pipeline = create_compute_pipeline(
            device,
            "move_lights_pipeline",
            &move_lights_pipeline_layout,
            &move_lights_module,
            "cs_move_lights",
            &[("WORKGROUP_SIZE", f64::from(workgroups.move_lights))],
        );

        // --- Light Sort ---
        let sort_entries = sort_layout_entries();
        let sort_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("light_sort_bind_group_layout"),
            entries: &sort_entries,
        });
        let sort_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("light_sort_pipeline_layout"),
            bind_group_layouts: &[&sort_bind_group_layout],
            push_constant_ranges: &[],
        });
        let sort_constants = [("WORKGROUP_SIZE", f64::from(workgroups.sort))];
        let sort_keys_pipeline = create_compute_pipeline(
            device,
            "sort_keys_pipeline",
            &sort_pipeline_layout,
            &light_sort_module,
            "cs_compute_keys",
            &sort_constants,
        );
        let bitonic_step_pipeline = create_compute_pipeline(
            device,
            "bitonic_step_pipeline",
            &sort_pipeline_layout,
            &light_sort_module,
            "cs_bitonic_step",
            &sort_constants,
        );

        // --- Z-Bins ---
        let zbin_entries = zbin_layout_entries();
        let zbin_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("zbin_bind_group_layout"),
            entries: &zbin_entries,
        });
        let zbin_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("zbin_pipeline_layout"),
            bind_group_layouts: &[&zbin_bind_group_layout],
            push_constant_ranges: &[],
        });
        let zbin_constants = [("WORKGROUP_SIZE", f64::from(workgroups.zbin))];
        let zbin_clear_pipeline = create_compute_pipeline(
            device,
            "zbin_clear_pipeline",
            &zbin_pipeline_layout,
            &zbin_module,
            "cs_clear_zbins",
            &zbin_constants,
        );
        let zbin_build_pipeline = create_compute_pipeline(
            device,
            "zbin_build_pipeline",
            &zbin_pipeline_layout,
            &zbin_module,
            "cs_build_zbins",
            &zbin_constants,
        );

        // --- Cluster Assign ---
        let cluster_entries = cluster_layout_entries();
        let cluster_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("cluster_assign_bind_group_layout"),
            entries: &cluster_entries,
        });
        let cluster_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("cluster_assign_pipeline_layout"),
            bind_group_layouts: &[&cluster_bind_group_layout],
            push_constant_ranges: &[],
        });
        let [wx, wy, wz] = workgroups.cluster;
        let cluster_assign_pipeline = create_compute_pipeline(
            device,
            "cluster_assign_pipeline",
            &cluster_pipeline_layout,
            &cluster_assign_module,
            "cs_assign_lights",
            &[
                ("WORKGROUP_SIZE_X", f64::from(wx)),
                ("WORKGROUP_SIZE_Y", f64::from(wy)),
                ("WORKGROUP_SIZE_Z", f64::from(wz)),
            ],
        );

        let binding_mismatches = binding_validator::report(
            "clustering compute pipelines",
            binding_validator::validate_compute_bindings(
                &move_lights_entries,
                &sort_entries,
                &zbin_entries,
                &cluster_entries,
            ),
        );

        log::info!(
            "clustering pipelines created (workgroups: move {}, sort {}, zbin {}, cluster {}x{}x{})",
            workgroups.move_lights,
            workgroups.sort,
            workgroups.zbin,
            wx,
            wy,
            wz
        );

        Self {
            move_lights_pipeline,
            move_lights_bind_group_layout,
            sort_keys_pipeline,
            bitonic_step_pipeline,
            sort_bind_group_layout,
            zbin_clear_pipeline,
            zbin_build_pipeline,
            zbin_bind_group_layout,
            cluster_assign_pipeline,
            cluster_bind_group_layout,
            binding_mismatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_entries_match_shader_declarations() {
        let mismatches = binding_validator::validate_compute_bindings(
            &move_lights_layout_entries(),
            &sort_layout_entries(),
            &zbin_layout_entries(),
            &cluster_layout_entries(),
        );
        assert_eq!(mismatches, 0);
    }

    #[test]
    fn test_sort_params_binding_is_dynamic() {
        let entries = sort_layout_entries();
        match entries[3].ty {
            wgpu::BindingType::Buffer { has_dynamic_offset, min_binding_size, .. } => {
                assert!(has_dynamic_offset);
                assert_eq!(min_binding_size.map(|s| s.get()), Some(16));
            }
            _ => panic!("sort params must be a buffer binding"),
        }
    }
}
